use crate::model::Config;
use crate::monitor::Monitor;
use anyhow::anyhow;
use chrono::{Local, NaiveTime, Timelike};
use futures_util::future::join_all;
use log::{debug, error, info, warn};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Job {
    CheckTraffic,
    Shutdown,
    Startup,
}

impl Job {
    async fn run(self, monitor: &Monitor) {
        debug!("tasks: running {self:?}");
        match self {
            Job::CheckTraffic => monitor.check_traffic_and_notify().await,
            Job::Shutdown => monitor.shutdown_servers().await,
            Job::Startup => monitor.startup_servers().await,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Task {
    Cron { cron: String, job: Job },
    Interval { every: Duration, job: Job },
}

impl Task {
    pub async fn execute(self, monitor: Arc<Monitor>) {
        match self {
            Task::Cron { cron, job } => {
                let schedule = match cron::Schedule::from_str(&cron) {
                    Ok(schedule) => schedule,
                    Err(err) => {
                        error!("tasks: invalid cron \"{cron}\" for {job:?}: {err}");
                        return;
                    }
                };
                loop {
                    let Some(next) = schedule.upcoming(Local).next() else {
                        warn!("tasks: cron \"{cron}\" has no upcoming runs");
                        return;
                    };
                    let wait = (next - Local::now()).to_std().unwrap_or_default();
                    debug!("tasks: {job:?} scheduled at {next}");
                    sleep(wait).await;
                    job.run(&monitor).await;
                }
            }
            Task::Interval { every, job } => {
                let mut ticker = interval_at(Instant::now() + every, every);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    job.run(&monitor).await;
                }
            }
        }
    }
}

/// `"HH:MM"` -> six-field cron expression firing daily at that local time.
pub fn daily_cron_expression(time: &str) -> anyhow::Result<String> {
    let parsed = NaiveTime::parse_from_str(time.trim(), "%H:%M")
        .map_err(|err| anyhow!("invalid daily time \"{time}\": {err}"))?;
    Ok(format!("0 {} {} * * *", parsed.minute(), parsed.hour()))
}

pub fn build_tasks(config: &Config) -> anyhow::Result<Vec<Task>> {
    let mut tasks = vec![Task::Interval {
        every: Duration::from_secs(config.check_interval_minutes * 60),
        job: Job::CheckTraffic,
    }];

    if config.sleep_mode.enable {
        tasks.push(Task::Cron {
            cron: daily_cron_expression(&config.sleep_mode.shutdown_time)?,
            job: Job::Shutdown,
        });
        tasks.push(Task::Cron {
            cron: daily_cron_expression(&config.sleep_mode.startup_time)?,
            job: Job::Startup,
        });
    }
    Ok(tasks)
}

pub fn spawn(tasks: Vec<Task>, monitor: Arc<Monitor>) -> JoinHandle<()> {
    info!("tasks: {} scheduled task(s)", tasks.len());
    let handles: Vec<_> = tasks
        .into_iter()
        .map(|task| tokio::spawn(task.execute(monitor.clone())))
        .collect();

    tokio::spawn(async move {
        for result in join_all(handles).await {
            if let Err(err) = result {
                error!("tasks: task failed: {err:?}");
            }
        }
    })
}
