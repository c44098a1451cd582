pub mod model;

use crate::hcloud::model::{
    ApiErrorResponse, CreateServerRequest, Server, ServerResponse, ServersResponse,
};
use crate::model::ServerTemplate;
use anyhow::anyhow;
use log::{debug, info};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "https://api.hetzner.cloud/v1";
const PER_PAGE: u32 = 50;

/// Minimal Hetzner Cloud client covering the server endpoints the monitor uses.
#[derive(Clone)]
pub struct HCloud {
    http: Client,
    endpoint: String,
    token: String,
}

impl HCloud {
    pub fn new(token: &str) -> anyhow::Result<Self> {
        Self::with_endpoint(token, DEFAULT_ENDPOINT)
    }

    pub fn with_endpoint(token: &str, endpoint: &str) -> anyhow::Result<Self> {
        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.endpoint, path))
            .bearer_auth(&self.token)
    }

    pub async fn list_servers(&self) -> anyhow::Result<Vec<Server>> {
        let mut servers = Vec::new();
        let mut page = 1;

        loop {
            let response = self
                .request(Method::GET, "/servers")
                .query(&[("page", page), ("per_page", PER_PAGE)])
                .send()
                .await?;
            let body: ServersResponse = parse(response, "list servers").await?;
            servers.extend(body.servers);

            match body.meta.and_then(|meta| meta.pagination.next_page) {
                Some(next) if next > page => page = next,
                _ => break,
            }
        }

        debug!("hcloud: listed {} servers", servers.len());
        Ok(servers)
    }

    pub async fn get_server_by_name(&self, name: &str) -> anyhow::Result<Option<Server>> {
        let response = self
            .request(Method::GET, "/servers")
            .query(&[("name", name)])
            .send()
            .await?;
        let body: ServersResponse = parse(response, "get server").await?;
        Ok(body.servers.into_iter().next())
    }

    pub async fn delete_server(&self, id: u64) -> anyhow::Result<()> {
        let response = self
            .request(Method::DELETE, &format!("/servers/{id}"))
            .send()
            .await?;
        check(response, "delete server").await?;
        info!("hcloud: server {id} deleted");
        Ok(())
    }

    pub async fn create_server(&self, template: &ServerTemplate) -> anyhow::Result<Server> {
        let request = CreateServerRequest {
            name: &template.name,
            server_type: &template.server_type,
            image: &template.image,
            location: &template.location,
            ssh_keys: &template.ssh_keys,
        };
        let response = self
            .request(Method::POST, "/servers")
            .json(&request)
            .send()
            .await?;
        let body: ServerResponse = parse(response, "create server").await?;
        info!(
            "hcloud: server {} created with id {}",
            body.server.name, body.server.id
        );
        Ok(body.server)
    }
}

async fn check(response: Response, action: &str) -> anyhow::Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    Err(match serde_json::from_str::<ApiErrorResponse>(&text) {
        Ok(body) => anyhow!(
            "{action} failed ({status}): {} - {}",
            body.error.code,
            body.error.message
        ),
        Err(_) => anyhow!("{action} failed ({status}): {text}"),
    })
}

async fn parse<T: DeserializeOwned>(response: Response, action: &str) -> anyhow::Result<T> {
    let response = check(response, action).await?;
    response
        .json::<T>()
        .await
        .map_err(|err| anyhow!("{action}: invalid response: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hcloud::model::tests::server_json;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> HCloud {
        HCloud::with_endpoint("hc-token", &server.uri()).unwrap()
    }

    fn page(servers: Vec<serde_json::Value>, next_page: Option<u32>) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "servers": servers,
            "meta": {"pagination": {"page": 1, "per_page": 50, "next_page": next_page}}
        }))
    }

    #[tokio::test]
    async fn test_list_servers_follows_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/servers"))
            .and(query_param("page", "1"))
            .and(header("authorization", "Bearer hc-token"))
            .respond_with(page(vec![server_json("web-1", 0, 1)], Some(2)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/servers"))
            .and(query_param("page", "2"))
            .respond_with(page(vec![server_json("web-2", 0, 1)], None))
            .expect(1)
            .mount(&server)
            .await;

        let servers = client(&server).list_servers().await.unwrap();
        let names: Vec<_> = servers.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["web-1", "web-2"]);
    }

    #[tokio::test]
    async fn test_api_error_carries_code_and_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/servers"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": {"code": "unauthorized", "message": "unable to authenticate"}
            })))
            .mount(&server)
            .await;

        let err = client(&server).list_servers().await.unwrap_err().to_string();
        assert!(err.starts_with("list servers failed (401"));
        assert!(err.ends_with("unauthorized - unable to authenticate"));
    }

    #[tokio::test]
    async fn test_api_error_without_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/servers/42"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let err = client(&server).delete_server(42).await.unwrap_err().to_string();
        assert!(err.ends_with("bad gateway"));
    }

    #[tokio::test]
    async fn test_get_server_by_name() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/servers"))
            .and(query_param("name", "web-1"))
            .respond_with(page(vec![server_json("web-1", 0, 1)], None))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/servers"))
            .and(query_param("name", "missing"))
            .respond_with(page(vec![], None))
            .mount(&server)
            .await;

        let hcloud = client(&server);
        let found = hcloud.get_server_by_name("web-1").await.unwrap();
        assert_eq!(found.map(|s| s.id), Some(42));
        assert!(hcloud.get_server_by_name("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_server() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/servers/42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"action": {"id": 1}})))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).delete_server(42).await.unwrap();
    }

    #[tokio::test]
    async fn test_create_server() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/servers"))
            .and(body_partial_json(json!({
                "name": "web-1",
                "server_type": "cx22",
                "image": "ubuntu-24.04",
                "location": "fsn1",
                "ssh_keys": ["ops"]
            })))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({"server": server_json("web-1", 0, 1)})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let template = ServerTemplate {
            name: "web-1".into(),
            server_type: "cx22".into(),
            image: "ubuntu-24.04".into(),
            location: "fsn1".into(),
            ssh_keys: vec!["ops".into()],
        };
        let created = client(&server).create_server(&template).await.unwrap();
        assert_eq!(created.ipv4(), Some("203.0.113.7"));
    }
}
