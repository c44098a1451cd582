use crate::errors::ConfigError;
use crate::tasks::daily_cron_expression;
use env_logger::{Builder, Target};
use log::LevelFilter;
use nestify::nest;
use serde::Deserializer;
use serde_derive::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use tokio::fs::File as AsyncFile;
use tokio::io::AsyncReadExt;

nest! {
    #[derive(Clone, Deserialize)]
    pub struct Config {
        pub hcloud_token: String,
        pub telegram_bot_token: String,
        #[serde(deserialize_with = "deserialize_chat_id")]
        pub telegram_chat_id: i64,

        #[serde(default = "default_log_level")]
        pub log_level: String,
        pub log_file: Option<String>,

        #[serde(default = "default_check_interval_minutes")]
        pub check_interval_minutes: u64,
        #[serde(default = "default_notification_thresholds")]
        pub notification_thresholds: Vec<f64>,
        #[serde(default = "default_traffic_limit_percent")]
        pub traffic_limit_percent: f64,
        #[serde(default = "default_rebuild_delay_sec")]
        pub rebuild_delay_sec: u64,

        #[serde(default)]
        pub sleep_mode:
            #[derive(Clone, Deserialize)]
            pub struct SleepModeConfig {
                #[serde(default)]
                pub enable: bool,
                #[serde(default = "default_shutdown_time")]
                pub shutdown_time: String,
                #[serde(default = "default_startup_time")]
                pub startup_time: String,
                #[serde(default)]
                pub rebuild_servers: Vec<
                    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
                    pub struct ServerTemplate {
                        pub name: String,
                        pub server_type: String,
                        pub image: String,
                        pub location: String,
                        #[serde(default)]
                        pub ssh_keys: Vec<String>,
                    }>,
            },

        #[serde(default)]
        pub cloudflare:
            #[derive(Default, Clone, Deserialize)]
            pub struct CloudflareConfig {
                #[serde(default)]
                pub enable: bool,
                #[serde(default)]
                pub api_token: String,
                #[serde(default)]
                pub zone_id: String,
                #[serde(default)]
                pub domain: String,
                #[serde(default)]
                pub subdomain: String,
                #[serde(default)]
                pub proxied: bool,
                #[serde(default = "default_ttl")]
                pub ttl: u32,
            },
    }
}

fn default_log_level() -> String {
    "INFO".to_string()
}

/// One check a day at the slowest.
pub const MAX_CHECK_INTERVAL_MINUTES: u64 = 24 * 60;

fn default_check_interval_minutes() -> u64 {
    5
}

fn default_notification_thresholds() -> Vec<f64> {
    (1..=9).map(|n| f64::from(n * 10)).collect()
}

fn default_traffic_limit_percent() -> f64 {
    95.0
}

fn default_rebuild_delay_sec() -> u64 {
    5
}

fn default_shutdown_time() -> String {
    "23:50".to_string()
}

fn default_startup_time() -> String {
    "08:00".to_string()
}

fn default_ttl() -> u32 {
    1
}

impl Default for SleepModeConfig {
    fn default() -> Self {
        Self {
            enable: false,
            shutdown_time: default_shutdown_time(),
            startup_time: default_startup_time(),
            rebuild_servers: Vec::new(),
        }
    }
}

impl CloudflareConfig {
    /// `subdomain.domain`, or the bare domain when no subdomain is set.
    pub fn fqdn(&self) -> String {
        if self.subdomain.is_empty() {
            self.domain.clone()
        } else {
            format!("{}.{}", self.subdomain, self.domain)
        }
    }
}

fn deserialize_chat_id<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ChatId {
        Number(i64),
        Text(String),
    }

    match <ChatId as serde::Deserialize>::deserialize(deserializer)? {
        ChatId::Number(id) => Ok(id),
        ChatId::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid telegram_chat_id: {text}"))),
    }
}

impl Config {
    pub async fn load(path: &str) -> Result<Self, ConfigError> {
        let mut contents = String::new();

        AsyncFile::open(path)
            .await?
            .read_to_string(&mut contents)
            .await?;

        Self::parse(path, &contents)
    }

    pub fn parse(path: &str, contents: &str) -> Result<Self, ConfigError> {
        let is_yaml = matches!(
            Path::new(path).extension().and_then(|ext| ext.to_str()),
            Some("yaml" | "yml")
        );
        let mut config: Self = if is_yaml {
            serde_yaml::from_str(contents)?
        } else {
            serde_json::from_str(contents)?
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&mut self) -> Result<(), ConfigError> {
        if self.hcloud_token.trim().is_empty() {
            return Err(ConfigError::Invalid("hcloud_token is empty".into()));
        }
        if self.telegram_bot_token.trim().is_empty() {
            return Err(ConfigError::Invalid("telegram_bot_token is empty".into()));
        }
        if !(1..=MAX_CHECK_INTERVAL_MINUTES).contains(&self.check_interval_minutes) {
            return Err(ConfigError::Invalid(format!(
                "check_interval_minutes must be between 1 and {MAX_CHECK_INTERVAL_MINUTES}"
            )));
        }
        if let Some(bad) = self
            .notification_thresholds
            .iter()
            .find(|t| !(**t > 0.0 && **t <= 100.0))
        {
            return Err(ConfigError::Invalid(format!(
                "notification threshold {bad} is outside (0, 100]"
            )));
        }
        if !(self.traffic_limit_percent > 0.0 && self.traffic_limit_percent <= 100.0) {
            return Err(ConfigError::Invalid(format!(
                "traffic_limit_percent {} is outside (0, 100]",
                self.traffic_limit_percent
            )));
        }
        for time in [&self.sleep_mode.shutdown_time, &self.sleep_mode.startup_time] {
            daily_cron_expression(time).map_err(|err| ConfigError::Invalid(err.to_string()))?;
        }
        if self.cloudflare.enable
            && (self.cloudflare.api_token.is_empty()
                || self.cloudflare.zone_id.is_empty()
                || self.cloudflare.domain.is_empty())
        {
            return Err(ConfigError::Invalid(
                "cloudflare requires api_token, zone_id and domain".into(),
            ));
        }

        self.notification_thresholds.sort_by(|a, b| a.total_cmp(b));
        self.notification_thresholds.dedup();
        Ok(())
    }

    pub fn set_logging(&self) {
        let mut builder = Builder::new();
        builder.filter_level(LevelFilter::Info);
        builder.parse_filters(&log_filter(&self.log_level));

        if let Some(path) = &self.log_file {
            match OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => {
                    builder.target(Target::Pipe(Box::new(TeeWriter { file })));
                }
                Err(err) => eprintln!("Failed to open log file {path}: {err}"),
            }
        }
        builder.init();
    }
}

/// Maps upper-case level names (`INFO`, `WARNING`, ...) onto env_logger
/// filters; anything else is used as a filter directive as-is.
pub fn log_filter(level: &str) -> String {
    match level.to_ascii_uppercase().as_str() {
        "DEBUG" => "debug".to_string(),
        "INFO" => "info".to_string(),
        "WARNING" | "WARN" => "warn".to_string(),
        "ERROR" | "CRITICAL" => "error".to_string(),
        _ => level.to_string(),
    }
}

struct TeeWriter {
    file: File,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "hcloud_token": "hc",
        "telegram_bot_token": "123:abc",
        "telegram_chat_id": -100200
    }"#;

    #[test]
    fn test_defaults() {
        let config = Config::parse("config.json", MINIMAL).unwrap();
        assert_eq!(config.telegram_chat_id, -100200);
        assert_eq!(config.log_level, "INFO");
        assert_eq!(config.check_interval_minutes, 5);
        assert_eq!(config.traffic_limit_percent, 95.0);
        assert_eq!(config.notification_thresholds.len(), 9);
        assert_eq!(config.notification_thresholds[0], 10.0);
        assert!(!config.sleep_mode.enable);
        assert_eq!(config.sleep_mode.shutdown_time, "23:50");
        assert_eq!(config.sleep_mode.startup_time, "08:00");
        assert!(!config.cloudflare.enable);
    }

    #[test]
    fn test_chat_id_as_string() {
        let text = MINIMAL.replace("-100200", "\" 42 \"");
        let config = Config::parse("config.json", &text).unwrap();
        assert_eq!(config.telegram_chat_id, 42);
    }

    #[test]
    fn test_chat_id_not_numeric() {
        let text = MINIMAL.replace("-100200", "\"chat\"");
        assert!(matches!(
            Config::parse("config.json", &text),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn test_thresholds_sorted() {
        let text = r#"{
            "hcloud_token": "hc",
            "telegram_bot_token": "t",
            "telegram_chat_id": 1,
            "notification_thresholds": [80, 50, 50, 20]
        }"#;
        let config = Config::parse("config.json", text).unwrap();
        assert_eq!(config.notification_thresholds, vec![20.0, 50.0, 80.0]);
    }

    #[test]
    fn test_threshold_out_of_range() {
        let text = r#"{
            "hcloud_token": "hc",
            "telegram_bot_token": "t",
            "telegram_chat_id": 1,
            "notification_thresholds": [50, 120]
        }"#;
        assert!(matches!(
            Config::parse("config.json", text),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_check_interval_bounds() {
        let text = MINIMAL.replace(
            "\"telegram_chat_id\"",
            "\"check_interval_minutes\": 18446744073709551615, \"telegram_chat_id\"",
        );
        assert!(matches!(
            Config::parse("config.json", &text),
            Err(ConfigError::Invalid(_))
        ));

        let text = MINIMAL.replace(
            "\"telegram_chat_id\"",
            "\"check_interval_minutes\": 0, \"telegram_chat_id\"",
        );
        assert!(matches!(
            Config::parse("config.json", &text),
            Err(ConfigError::Invalid(_))
        ));

        let text = MINIMAL.replace(
            "\"telegram_chat_id\"",
            "\"check_interval_minutes\": 1440, \"telegram_chat_id\"",
        );
        assert_eq!(
            Config::parse("config.json", &text).unwrap().check_interval_minutes,
            MAX_CHECK_INTERVAL_MINUTES
        );
    }

    #[test]
    fn test_empty_token() {
        let text = MINIMAL.replace("\"hc\"", "\"  \"");
        assert!(matches!(
            Config::parse("config.json", &text),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_bad_sleep_time() {
        let text = r#"{
            "hcloud_token": "hc",
            "telegram_bot_token": "t",
            "telegram_chat_id": 1,
            "sleep_mode": {"enable": true, "shutdown_time": "25:99"}
        }"#;
        assert!(matches!(
            Config::parse("config.json", text),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_cloudflare_requires_zone() {
        let text = r#"{
            "hcloud_token": "hc",
            "telegram_bot_token": "t",
            "telegram_chat_id": 1,
            "cloudflare": {"enable": true, "api_token": "cf", "domain": "example.com"}
        }"#;
        assert!(matches!(
            Config::parse("config.json", text),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_yaml_config() {
        let text = r#"
hcloud_token: hc
telegram_bot_token: t
telegram_chat_id: "7"
sleep_mode:
  enable: true
  rebuild_servers:
    - name: web-1
      server_type: cx22
      image: ubuntu-24.04
      location: fsn1
"#;
        let config = Config::parse("config.yml", text).unwrap();
        assert_eq!(config.telegram_chat_id, 7);
        let template = &config.sleep_mode.rebuild_servers[0];
        assert_eq!(template.name, "web-1");
        assert!(template.ssh_keys.is_empty());
    }

    #[test]
    fn test_fqdn() {
        let mut cf = CloudflareConfig {
            domain: "example.com".into(),
            ..Default::default()
        };
        assert_eq!(cf.fqdn(), "example.com");
        cf.subdomain = "vpn".into();
        assert_eq!(cf.fqdn(), "vpn.example.com");
    }

    #[test]
    fn test_log_filter() {
        assert_eq!(log_filter("WARNING"), "warn");
        assert_eq!(log_filter("debug"), "debug");
        assert_eq!(log_filter("hz=trace"), "hz=trace");
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, MINIMAL).unwrap();

        let config = Config::load(path.to_str().unwrap()).await.unwrap();
        assert_eq!(config.hcloud_token, "hc");
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        assert!(matches!(
            Config::load("/nonexistent/config.json").await,
            Err(ConfigError::Io(_))
        ));
    }
}
