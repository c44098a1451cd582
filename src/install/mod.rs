use crate::control::{self, ControlCommand, Deployment};
use log::{debug, info};
use nix::unistd::Uid;
use std::fmt;
use std::fs::Permissions;
use std::io::{self, BufRead, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::fs;
use tokio::process::Command;

pub const LINK_PATH: &str = "/usr/local/bin/hz";

/// Files fetched from the repository, with the mode each one gets.
const FILES: [(&str, u32); 3] = [
    ("docker-compose.yml", 0o644),
    ("config.json", 0o600),
    ("Dockerfile", 0o644),
];

#[derive(Debug)]
pub enum InstallError {
    NotRoot,
    DockerMissing,
    ComposeMissing,
    Download { file: String, reason: String },
    Io(io::Error),
}

impl fmt::Display for InstallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallError::NotRoot => write!(f, "请使用root权限运行此脚本"),
            InstallError::DockerMissing => write!(f, "Docker未安装，请先安装Docker"),
            InstallError::ComposeMissing => {
                write!(f, "Docker Compose未安装，请先安装Docker Compose")
            }
            InstallError::Download { file, reason } => write!(f, "下载 {file} 失败: {reason}"),
            InstallError::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for InstallError {}
impl From<io::Error> for InstallError {
    fn from(err: io::Error) -> InstallError {
        InstallError::Io(err)
    }
}

pub fn is_root() -> bool {
    Uid::effective().is_root()
}

pub async fn tool_available(program: &str) -> bool {
    Command::new(program)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}

pub fn preflight(root: bool, docker: bool, compose: bool) -> Result<(), InstallError> {
    if !root {
        return Err(InstallError::NotRoot);
    }
    if !docker {
        return Err(InstallError::DockerMissing);
    }
    if !compose {
        return Err(InstallError::ComposeMissing);
    }
    Ok(())
}

pub async fn prepare_dirs(dir: &Path) -> Result<(), InstallError> {
    for path in [dir.to_path_buf(), dir.join("config"), dir.join("logs")] {
        fs::create_dir_all(&path).await?;
        fs::set_permissions(&path, Permissions::from_mode(0o755)).await?;
    }
    Ok(())
}

/// Writes a fetched file. An existing `config.json` holds the user's
/// credentials and is kept; returns whether the file was written.
pub async fn write_file(
    dir: &Path,
    name: &str,
    body: &[u8],
    mode: u32,
) -> Result<bool, InstallError> {
    let path = dir.join(name);
    if name == "config.json" && fs::try_exists(&path).await? {
        info!("Keeping existing {}", path.display());
        return Ok(false);
    }
    fs::write(&path, body).await?;
    fs::set_permissions(&path, Permissions::from_mode(mode)).await?;
    Ok(true)
}

/// Reads a y/n answer; anything but `y`/`yes` is a no.
pub fn confirm<R: BufRead, W: Write>(question: &str, input: &mut R, output: &mut W) -> bool {
    if write!(output, "{question} (y/n) ").and_then(|_| output.flush()).is_err() {
        return false;
    }
    let mut answer = String::new();
    if input.read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

pub struct Installer {
    pub dir: PathBuf,
    pub repo: String,
    pub assume_yes: bool,
    pub link_path: PathBuf,
}

impl Installer {
    pub fn new(dir: impl Into<PathBuf>, repo: &str, assume_yes: bool) -> Self {
        Self {
            dir: dir.into(),
            repo: repo.trim_end_matches('/').to_string(),
            assume_yes,
            link_path: PathBuf::from(LINK_PATH),
        }
    }

    async fn fetch(&self, http: &reqwest::Client, name: &str) -> Result<Vec<u8>, InstallError> {
        let url = format!("{}/{name}", self.repo);
        debug!("install: GET {url}");
        let download_err = |reason: String| InstallError::Download {
            file: name.to_string(),
            reason,
        };

        let response = http
            .get(&url)
            .send()
            .await
            .map_err(|err| download_err(err.to_string()))?;
        if !response.status().is_success() {
            return Err(download_err(format!("HTTP {}", response.status())));
        }
        let body = response
            .bytes()
            .await
            .map_err(|err| download_err(err.to_string()))?;
        Ok(body.to_vec())
    }

    /// Leaves any existing entry alone, including a dangling symlink.
    async fn link_binary(&self) -> Result<(), InstallError> {
        if fs::symlink_metadata(&self.link_path).await.is_ok() {
            return Ok(());
        }
        let exe = std::env::current_exe()?;
        fs::symlink(&exe, &self.link_path).await?;
        info!("Linked {} -> {}", self.link_path.display(), exe.display());
        Ok(())
    }

    /// Returns the exit code of the optional `start` step, 0 otherwise.
    pub async fn run(&self) -> Result<i32, InstallError> {
        preflight(
            is_root(),
            tool_available("docker").await,
            tool_available("docker-compose").await,
        )?;

        println!("📁 创建目录 {}", self.dir.display());
        prepare_dirs(&self.dir).await?;

        let http = reqwest::Client::new();
        for (name, mode) in FILES {
            println!("⬇️  下载 {name}");
            let body = self.fetch(&http, name).await?;
            write_file(&self.dir, name, &body, mode).await?;
        }

        self.link_binary().await?;

        println!("✅ 安装完成: {}", self.dir.display());
        println!(
            "请编辑 {} 填写 hcloud_token, telegram_bot_token, telegram_chat_id",
            self.dir.join("config.json").display()
        );

        let start = self.assume_yes
            || tokio::task::spawn_blocking(|| {
                confirm("是否立即启动?", &mut io::stdin().lock(), &mut io::stdout())
            })
            .await
            .unwrap_or(false);
        if !start {
            println!("稍后可使用 hz start 启动");
            return Ok(0);
        }

        control::run(ControlCommand::Start, &Deployment::new(self.dir.clone()))
            .await
            .map_err(|err| InstallError::Io(io::Error::other(err.to_string())))
    }
}
