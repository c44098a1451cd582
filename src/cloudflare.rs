use crate::model::CloudflareConfig;
use anyhow::anyhow;
use log::info;
use reqwest::Client;
use serde_derive::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "https://api.cloudflare.com/client/v4";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<CfError>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct CfError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct DnsRecord {
    id: String,
    content: String,
}

#[derive(Debug, Serialize, PartialEq)]
struct DnsRecordBody<'a> {
    r#type: &'static str,
    name: &'a str,
    content: &'a str,
    ttl: u32,
    proxied: bool,
}

impl<T> Envelope<T> {
    fn into_result(self, action: &str) -> anyhow::Result<Option<T>> {
        if self.success {
            return Ok(self.result);
        }
        let errors = self
            .errors
            .iter()
            .map(|err| format!("{}: {}", err.code, err.message))
            .collect::<Vec<_>>()
            .join(", ");
        Err(anyhow!("cloudflare {action} failed: {errors}"))
    }
}

#[derive(Clone)]
pub struct Cloudflare {
    http: Client,
    endpoint: String,
    config: CloudflareConfig,
}

impl Cloudflare {
    pub fn new(config: CloudflareConfig) -> anyhow::Result<Self> {
        Self::with_endpoint(config, DEFAULT_ENDPOINT)
    }

    pub fn with_endpoint(config: CloudflareConfig, endpoint: &str) -> anyhow::Result<Self> {
        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            config,
        })
    }

    fn records_url(&self) -> String {
        format!("{}/zones/{}/dns_records", self.endpoint, self.config.zone_id)
    }

    /// Points the configured name at `ip`, creating the A record if it does not exist.
    pub async fn update_a_record(&self, ip: &str) -> anyhow::Result<()> {
        let fqdn = self.config.fqdn();
        let existing: Vec<DnsRecord> = self
            .http
            .get(self.records_url())
            .bearer_auth(&self.config.api_token)
            .query(&[("type", "A"), ("name", fqdn.as_str())])
            .send()
            .await?
            .json::<Envelope<Vec<DnsRecord>>>()
            .await?
            .into_result("list records")?
            .unwrap_or_default();

        let body = DnsRecordBody {
            r#type: "A",
            name: &fqdn,
            content: ip,
            ttl: self.config.ttl,
            proxied: self.config.proxied,
        };

        let request = match existing.first() {
            Some(record) if record.content == ip => {
                info!("cloudflare: {fqdn} already points to {ip}");
                return Ok(());
            }
            Some(record) => self
                .http
                .put(format!("{}/{}", self.records_url(), record.id)),
            None => self.http.post(self.records_url()),
        };

        request
            .bearer_auth(&self.config.api_token)
            .json(&body)
            .send()
            .await?
            .json::<Envelope<serde_json::Value>>()
            .await?
            .into_result("update record")?;

        info!("cloudflare: {fqdn} -> {ip}");
        Ok(())
    }
}
