pub mod alerts;

use crate::cloudflare::Cloudflare;
use crate::format;
use crate::hcloud::model::{Server, TrafficUsage};
use crate::hcloud::HCloud;
use crate::model::{Config, ServerTemplate};
use crate::monitor::alerts::{ThresholdTracker, TrafficAction};
use anyhow::anyhow;
use chrono::{DateTime, Local};
use log::{error, info, warn};
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use tokio::sync::Mutex;
use tokio::time::sleep;

#[derive(Default)]
struct MonitorState {
    tracker: ThresholdTracker,
    last_check: Option<DateTime<Local>>,
}

pub struct Monitor {
    config: Config,
    hcloud: HCloud,
    cloudflare: Option<Cloudflare>,
    bot: Bot,
    chat_id: ChatId,
    state: Mutex<MonitorState>,
}

impl Monitor {
    pub fn new(config: Config, bot: Bot) -> anyhow::Result<Self> {
        let hcloud = HCloud::new(&config.hcloud_token)?;
        let cloudflare = if config.cloudflare.enable {
            Some(Cloudflare::new(config.cloudflare.clone())?)
        } else {
            None
        };
        info!("Hetzner Cloud client initialized");

        Ok(Self::with_clients(config, bot, hcloud, cloudflare))
    }

    pub fn with_clients(
        config: Config,
        bot: Bot,
        hcloud: HCloud,
        cloudflare: Option<Cloudflare>,
    ) -> Self {
        Self {
            chat_id: ChatId(config.telegram_chat_id),
            config,
            hcloud,
            cloudflare,
            bot,
            state: Mutex::new(MonitorState::default()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn chat_id(&self) -> ChatId {
        self.chat_id
    }

    pub async fn last_check(&self) -> Option<DateTime<Local>> {
        self.state.lock().await.last_check
    }

    /// Lists servers, logging and swallowing API failures.
    pub async fn get_all_servers(&self) -> Vec<Server> {
        match self.hcloud.list_servers().await {
            Ok(servers) => servers,
            Err(err) => {
                error!("Failed to list servers: {err}");
                Vec::new()
            }
        }
    }

    pub async fn check_traffic_and_notify(&self) {
        info!("Starting traffic check");
        let servers = self.get_all_servers().await;
        self.state.lock().await.last_check = Some(Local::now());

        for server in &servers {
            let usage = TrafficUsage::from_server(server).percent();
            let actions = self.state.lock().await.tracker.evaluate(
                &server.name,
                usage,
                &self.config.notification_thresholds,
                self.config.traffic_limit_percent,
            );

            for action in actions {
                match action {
                    TrafficAction::Notify { threshold } => {
                        self.send_telegram_message(&format::threshold_alert(
                            server,
                            usage,
                            Local::now(),
                        ))
                        .await;
                        info!("Server {} reached {threshold}% traffic", server.name);
                    }
                    TrafficAction::Delete => self.handle_traffic_exceeded(server, usage).await,
                }
            }
        }
    }

    pub async fn handle_traffic_exceeded(&self, server: &Server, usage: f64) {
        self.send_telegram_message(&format::exceeded_alert(server, usage))
            .await;
        warn!(
            "Server {} exceeded traffic limit ({usage:.1}%), deleting",
            server.name
        );

        match self.hcloud.delete_server(server.id).await {
            Ok(()) => {
                info!("Server {} deleted", server.name);
                self.state.lock().await.tracker.forget(&server.name);
            }
            Err(err) => error!("Failed to delete server {}: {err}", server.name),
        }
    }

    pub async fn delete_server(&self, name: &str) -> bool {
        match self.try_delete_server(name).await {
            Ok(()) => true,
            Err(err) => {
                error!("Failed to delete server {name}: {err}");
                false
            }
        }
    }

    async fn try_delete_server(&self, name: &str) -> anyhow::Result<()> {
        let server = self
            .hcloud
            .get_server_by_name(name)
            .await?
            .ok_or_else(|| anyhow!("server {name} not found"))?;
        self.hcloud.delete_server(server.id).await?;
        self.state.lock().await.tracker.forget(name);
        Ok(())
    }

    pub async fn rebuild_server(&self, name: &str) -> bool {
        match self.try_rebuild_server(name).await {
            Ok(server) => {
                info!(
                    "Server {name} rebuilt, ip {}",
                    server.ipv4().unwrap_or("-")
                );
                true
            }
            Err(err) => {
                error!("Failed to rebuild server {name}: {err}");
                false
            }
        }
    }

    async fn try_rebuild_server(&self, name: &str) -> anyhow::Result<Server> {
        let server = self
            .hcloud
            .get_server_by_name(name)
            .await?
            .ok_or_else(|| anyhow!("server {name} not found"))?;
        let template = self.snapshot_template(&server)?;

        self.hcloud.delete_server(server.id).await?;
        self.state.lock().await.tracker.forget(name);
        sleep(Duration::from_secs(self.config.rebuild_delay_sec)).await;

        let created = self.hcloud.create_server(&template).await?;
        if let Some(ip) = created.ipv4() {
            self.update_dns(ip).await;
        }
        Ok(created)
    }

    /// The API does not report which ssh keys a server was created with, so
    /// they are taken from a sleep-mode template of the same name if present.
    fn snapshot_template(&self, server: &Server) -> anyhow::Result<ServerTemplate> {
        let image = server
            .image
            .as_ref()
            .ok_or_else(|| anyhow!("server {} has no image to rebuild from", server.name))?;
        let ssh_keys = self
            .config
            .sleep_mode
            .rebuild_servers
            .iter()
            .find(|template| template.name == server.name)
            .map(|template| template.ssh_keys.clone())
            .unwrap_or_default();

        Ok(ServerTemplate {
            name: server.name.clone(),
            server_type: server.server_type.name.clone(),
            image: image.reference(),
            location: server.datacenter.location.name.clone(),
            ssh_keys,
        })
    }

    async fn update_dns(&self, ip: &str) {
        if let Some(cloudflare) = &self.cloudflare {
            if let Err(err) = cloudflare.update_a_record(ip).await {
                error!("Failed to update Cloudflare DNS: {err}");
            }
        }
    }

    pub async fn shutdown_servers(&self) {
        info!("Running scheduled shutdown");
        for server in self.get_all_servers().await {
            match self.hcloud.delete_server(server.id).await {
                Ok(()) => {
                    self.state.lock().await.tracker.forget(&server.name);
                    self.send_telegram_message(&format::shutdown_done(&server.name))
                        .await;
                }
                Err(err) => error!("Failed to delete server {}: {err}", server.name),
            }
        }
    }

    pub async fn startup_servers(&self) {
        info!("Running scheduled startup");
        if !self.config.sleep_mode.enable {
            return;
        }

        for template in &self.config.sleep_mode.rebuild_servers {
            match self.hcloud.create_server(template).await {
                Ok(server) => {
                    if let Some(ip) = server.ipv4() {
                        self.update_dns(ip).await;
                    }
                    self.send_telegram_message(&format::startup_done(
                        &template.name,
                        server.ipv4(),
                    ))
                    .await;
                }
                Err(err) => error!("Failed to create server {}: {err}", template.name),
            }
        }
    }

    pub async fn send_telegram_message(&self, text: &str) {
        if let Err(err) = self
            .bot
            .send_message(self.chat_id, text)
            .parse_mode(ParseMode::Html)
            .await
        {
            error!("Failed to send Telegram message: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hcloud::model::tests::server_json;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(extra: &str) -> Config {
        let text = format!(
            r#"{{
                "hcloud_token": "hc",
                "telegram_bot_token": "123:abc",
                "telegram_chat_id": 5
                {extra}
            }}"#
        );
        Config::parse("config.json", &text).unwrap()
    }

    fn monitor(extra: &str) -> Monitor {
        Monitor::new(config(extra), Bot::new("123:abc")).unwrap()
    }

    /// Hetzner and Telegram both point at `server`; Telegram calls hit no
    /// mock and fail, which the monitor only logs.
    fn mocked_monitor(server: &MockServer) -> Monitor {
        let url = reqwest::Url::parse(&server.uri()).unwrap();
        let bot = Bot::new("123:abc").set_api_url(url);
        let hcloud = HCloud::with_endpoint("hc", &server.uri()).unwrap();
        Monitor::with_clients(config(""), bot, hcloud, None)
    }

    async fn mount_delete(server: &MockServer, status: u16) {
        Mock::given(method("DELETE"))
            .and(path("/servers/42"))
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({
                "error": {"code": "locked", "message": "server is locked"}
            })))
            .expect(1)
            .mount(server)
            .await;
    }

    async fn mark_notified(monitor: &Monitor, name: &str, usage: f64) {
        monitor
            .state
            .lock()
            .await
            .tracker
            .crossed(name, usage, &monitor.config.notification_thresholds);
    }

    #[test]
    fn test_snapshot_template() {
        let monitor = monitor("");
        let server: Server = serde_json::from_value(server_json("web-1", 0, 1)).unwrap();
        let template = monitor.snapshot_template(&server).unwrap();
        assert_eq!(
            template,
            ServerTemplate {
                name: "web-1".into(),
                server_type: "cx22".into(),
                image: "ubuntu-24.04".into(),
                location: "fsn1".into(),
                ssh_keys: vec![],
            }
        );
    }

    #[test]
    fn test_snapshot_template_keys_from_sleep_mode() {
        let monitor = monitor(
            r#", "sleep_mode": {"rebuild_servers": [
                {"name": "web-1", "server_type": "cx32", "image": "debian-12", "location": "nbg1", "ssh_keys": ["ops"]}
            ]}"#,
        );
        let server: Server = serde_json::from_value(server_json("web-1", 0, 1)).unwrap();
        let template = monitor.snapshot_template(&server).unwrap();
        assert_eq!(template.ssh_keys, vec!["ops".to_string()]);
        assert_eq!(template.server_type, "cx22");
    }

    #[test]
    fn test_snapshot_without_image() {
        let monitor = monitor("");
        let mut json = server_json("web-1", 0, 1);
        json["image"] = serde_json::Value::Null;
        let server: Server = serde_json::from_value(json).unwrap();
        assert!(monitor.snapshot_template(&server).is_err());
    }

    #[test]
    fn test_cloudflare_disabled_by_default() {
        let monitor = monitor("");
        assert!(monitor.cloudflare.is_none());
        assert_eq!(monitor.chat_id(), ChatId(5));
    }

    #[tokio::test]
    async fn test_last_check_initially_empty() {
        let monitor = monitor("");
        assert!(monitor.last_check().await.is_none());
    }

    #[tokio::test]
    async fn test_list_failure_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/servers"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        assert!(mocked_monitor(&server).get_all_servers().await.is_empty());
    }

    #[tokio::test]
    async fn test_exceeded_forgets_after_delete() {
        let server = MockServer::start().await;
        mount_delete(&server, 200).await;
        let monitor = mocked_monitor(&server);
        mark_notified(&monitor, "web-1", 96.0).await;

        monitor.handle_traffic_exceeded(&server_fixture(), 96.0).await;
        assert_eq!(monitor.state.lock().await.tracker.last_notified("web-1"), 0.0);
    }

    #[tokio::test]
    async fn test_exceeded_keeps_state_when_delete_fails() {
        let server = MockServer::start().await;
        mount_delete(&server, 423).await;
        let monitor = mocked_monitor(&server);
        mark_notified(&monitor, "web-1", 96.0).await;

        monitor.handle_traffic_exceeded(&server_fixture(), 96.0).await;
        assert_eq!(monitor.state.lock().await.tracker.last_notified("web-1"), 90.0);
    }

    #[tokio::test]
    async fn test_check_deletes_over_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/servers"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "servers": [server_json("web-1", 96, 100)],
                "meta": {"pagination": {"next_page": null}}
            })))
            .mount(&server)
            .await;
        mount_delete(&server, 200).await;
        let monitor = mocked_monitor(&server);

        monitor.check_traffic_and_notify().await;
        assert!(monitor.last_check().await.is_some());
        assert_eq!(monitor.state.lock().await.tracker.last_notified("web-1"), 0.0);
    }

    #[tokio::test]
    async fn test_check_below_limit_only_notifies() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/servers"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "servers": [server_json("web-1", 55, 100)]
            })))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let monitor = mocked_monitor(&server);

        monitor.check_traffic_and_notify().await;
        assert_eq!(monitor.state.lock().await.tracker.last_notified("web-1"), 10.0);
        monitor.check_traffic_and_notify().await;
        assert_eq!(monitor.state.lock().await.tracker.last_notified("web-1"), 20.0);
    }

    fn server_fixture() -> Server {
        serde_json::from_value(server_json("web-1", 96, 100)).unwrap()
    }
}
