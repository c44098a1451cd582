//! `hz <command>` pass-through to docker-compose / docker inside the install directory.

use anyhow::anyhow;
use log::debug;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::process::Command;

pub const DEFAULT_INSTALL_DIR: &str = "/opt/hetzner_monitor";
pub const CONTAINER_NAME: &str = "hetzner-monitor";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlCommand {
    Start,
    Stop,
    Restart,
    Logs,
    Config,
    Status,
    Help,
}

#[derive(Debug, PartialEq)]
pub struct UnknownCommand(pub String);

impl fmt::Display for UnknownCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "未知命令: {}", self.0)
    }
}

impl std::error::Error for UnknownCommand {}

impl FromStr for ControlCommand {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "restart" => Ok(Self::Restart),
            "logs" => Ok(Self::Logs),
            "config" => Ok(Self::Config),
            "status" => Ok(Self::Status),
            "help" => Ok(Self::Help),
            other => Err(UnknownCommand(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Deployment {
    pub dir: PathBuf,
    pub container: String,
    pub editor: String,
}

impl Deployment {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            container: CONTAINER_NAME.to_string(),
            editor: std::env::var("EDITOR").unwrap_or_else(|_| "nano".to_string()),
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.join("config.json")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
        }
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

impl ControlCommand {
    /// The single external command this maps to; `help` maps to none.
    pub fn invocation(self, deployment: &Deployment) -> Option<Invocation> {
        let config = deployment.config_path();
        let config = config.to_string_lossy();
        let filter = format!("name={}", deployment.container);

        match self {
            Self::Start => Some(Invocation::new("docker-compose", &["up", "-d"])),
            Self::Stop => Some(Invocation::new("docker-compose", &["down"])),
            Self::Restart => Some(Invocation::new("docker-compose", &["restart"])),
            Self::Logs => Some(Invocation::new(
                "docker",
                &["logs", "-f", "--tail", "100", &deployment.container],
            )),
            Self::Config => {
                let mut words = deployment.editor.split_whitespace();
                let program = words.next().unwrap_or("nano");
                let mut args: Vec<&str> = words.collect();
                args.push(&*config);
                Some(Invocation::new(program, &args))
            }
            Self::Status => Some(Invocation::new("docker", &["ps", "--filter", &filter])),
            Self::Help => None,
        }
    }
}

pub fn usage() -> String {
    [
        "Hetzner 流量监控管理工具",
        "",
        "用法: hz <命令>",
        "",
        "命令:",
        "  start    启动监控服务",
        "  stop     停止监控服务",
        "  restart  重启监控服务",
        "  logs     查看实时日志",
        "  config   编辑配置文件",
        "  status   查看容器状态",
        "  help     显示帮助信息",
        "",
        "其他:",
        "  run      在容器内运行监控服务",
        "  install  安装到 /opt/hetzner_monitor",
    ]
    .join("\n")
}

async fn execute(invocation: &Invocation, dir: &Path) -> anyhow::Result<i32> {
    if !dir.is_dir() {
        return Err(anyhow!("安装目录不存在: {}", dir.display()));
    }
    debug!("control: {invocation} (in {})", dir.display());

    let status = Command::new(&invocation.program)
        .args(&invocation.args)
        .current_dir(dir)
        .status()
        .await
        .map_err(|err| anyhow!("无法执行 {}: {err}", invocation.program))?;
    Ok(status.code().unwrap_or(1))
}

/// Runs one command and returns the wrapped tool's exit code.
pub async fn run(command: ControlCommand, deployment: &Deployment) -> anyhow::Result<i32> {
    match command.invocation(deployment) {
        Some(invocation) => execute(&invocation, &deployment.dir).await,
        None => {
            println!("{}", usage());
            Ok(0)
        }
    }
}

/// Entry point for a raw word from the command line.
pub async fn dispatch(word: &str, deployment: &Deployment) -> i32 {
    let command = match word.parse::<ControlCommand>() {
        Ok(command) => command,
        Err(err) => {
            eprintln!("{err}");
            eprintln!("{}", usage());
            return 1;
        }
    };

    match run(command, deployment).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("❌ {err}");
            1
        }
    }
}
