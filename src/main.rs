use crate::control::{Deployment, DEFAULT_INSTALL_DIR};
use crate::install::Installer;
use crate::model::Config;
use crate::monitor::Monitor;
use clap::{Parser, Subcommand};
use log::{error, info};
use signal_hook::consts::TERM_SIGNALS;
use signal_hook::flag;
use std::process::exit;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::Requester;
use teloxide::Bot;
use tokio::time::sleep;

// Service
mod bot;
mod monitor;
mod tasks;

// Clients
mod cloudflare;
mod hcloud;

// Host-side tooling
mod control;
mod install;

// Other
mod errors;
mod format;
mod model;

#[derive(Parser)]
#[command(author, version, about = "Hetzner traffic monitor", long_about = None)]
#[command(propagate_version = true, disable_help_subcommand = true)]
struct Cli {
    /// Install directory holding docker-compose.yml and config.json
    #[arg(long, global = true, env = "HZ_DIR", default_value = DEFAULT_INSTALL_DIR)]
    dir: String,

    #[command(subcommand)]
    action: Option<Actions>,
}

#[derive(Subcommand)]
enum Actions {
    /// Run the monitor and Telegram bot (container entry point)
    Run {
        #[arg(short, long, env = "HZ_CONFIG", default_value = "/app/config.json")]
        config: String,
    },
    /// Install the deployment into the install directory
    Install {
        /// Base URL serving docker-compose.yml, config.json and Dockerfile
        #[arg(long, env = "HZ_REPO")]
        repo: String,
        /// Start the container without asking
        #[arg(short, long)]
        yes: bool,
    },
    #[command(external_subcommand)]
    Control(Vec<String>),
}

async fn run_monitor(config_path: &str) -> anyhow::Result<()> {
    let config = Config::load(config_path).await?;
    config.set_logging();
    info!("Starting Hetzner traffic monitor v{}", env!("CARGO_PKG_VERSION"));

    let term_now = Arc::new(AtomicBool::new(false));
    for sig in TERM_SIGNALS {
        flag::register_conditional_shutdown(*sig, 1, Arc::clone(&term_now))?;
        flag::register(*sig, Arc::clone(&term_now))?;
    }

    tokio::spawn(async move {
        while !term_now.load(Ordering::Relaxed) {
            sleep(Duration::from_secs(1)).await;
        }
        info!("Termination signal received, exiting");
        exit(0);
    });

    let bot = Bot::new(&config.telegram_bot_token);
    let me = bot.get_me().await?;
    info!("bot {} has started", me.username());

    let tasks = tasks::build_tasks(&config)?;
    let monitor = Arc::new(Monitor::new(config, bot.clone())?);
    tasks::spawn(tasks, monitor.clone());

    bot::run(bot, monitor).await;
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let code = match cli.action {
        Some(Actions::Run { config }) => match run_monitor(&config).await {
            Ok(()) => 0,
            Err(err) => {
                error!("Monitor failed: {err}");
                eprintln!("❌ 程序启动失败: {err}");
                1
            }
        },
        Some(Actions::Install { repo, yes }) => {
            match Installer::new(&cli.dir, &repo, yes).run().await {
                Ok(code) => code,
                Err(err) => {
                    eprintln!("❌ {err}");
                    1
                }
            }
        }
        Some(Actions::Control(words)) => {
            let word = words.first().map(String::as_str).unwrap_or("help");
            control::dispatch(word, &Deployment::new(&cli.dir)).await
        }
        None => control::dispatch("help", &Deployment::new(&cli.dir)).await,
    };

    exit(code);
}
