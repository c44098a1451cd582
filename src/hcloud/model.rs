use serde_derive::{Deserialize, Serialize};

const BYTES_PER_GB: f64 = 1_000_000_000.0;

#[derive(Debug, Clone, Deserialize)]
pub struct Server {
    pub id: u64,
    pub name: String,
    pub status: String,
    pub server_type: NamedRef,
    pub datacenter: Datacenter,
    pub image: Option<Image>,
    pub public_net: PublicNet,
    pub outgoing_traffic: Option<u64>,
    pub included_traffic: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamedRef {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Datacenter {
    pub location: NamedRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Image {
    pub id: u64,
    pub name: Option<String>,
}

impl Image {
    /// Snapshots and backups have no name; the API accepts the id instead.
    pub fn reference(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.id.to_string())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PublicNet {
    pub ipv4: Option<Ipv4>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Ipv4 {
    pub ip: String,
}

impl Server {
    pub fn ipv4(&self) -> Option<&str> {
        self.public_net.ipv4.as_ref().map(|net| net.ip.as_str())
    }

    pub fn is_running(&self) -> bool {
        self.status == "running"
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrafficUsage {
    pub used_gb: f64,
    pub total_gb: f64,
}

impl TrafficUsage {
    pub fn from_server(server: &Server) -> Self {
        Self::from_bytes(
            server.outgoing_traffic.unwrap_or(0),
            server.included_traffic.unwrap_or(0),
        )
    }

    pub fn from_bytes(used: u64, total: u64) -> Self {
        Self {
            used_gb: used as f64 / BYTES_PER_GB,
            total_gb: total as f64 / BYTES_PER_GB,
        }
    }

    pub fn percent(&self) -> f64 {
        if self.total_gb <= 0.0 {
            return 0.0;
        }
        self.used_gb / self.total_gb * 100.0
    }

    pub fn remaining_gb(&self) -> f64 {
        (self.total_gb - self.used_gb).max(0.0)
    }
}

#[derive(Debug, Deserialize)]
pub struct ServersResponse {
    pub servers: Vec<Server>,
    #[serde(default)]
    pub meta: Option<Meta>,
}

#[derive(Debug, Deserialize)]
pub struct Meta {
    pub pagination: Pagination,
}

#[derive(Debug, Deserialize)]
pub struct Pagination {
    pub next_page: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ServerResponse {
    pub server: Server,
}

#[derive(Debug, Serialize)]
pub struct CreateServerRequest<'a> {
    pub name: &'a str,
    pub server_type: &'a str,
    pub image: &'a str,
    pub location: &'a str,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    pub ssh_keys: &'a [String],
}

#[derive(Debug, Deserialize)]
pub struct ApiErrorResponse {
    pub error: ApiError,
}

#[derive(Debug, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}
