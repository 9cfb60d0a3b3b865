//! Request/response protocol spoken with the per-node agent.
//!
//! One newline-terminated JSON request per connection, answered by one
//! newline-terminated JSON response.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::debug;

use crate::config::{Dns, Route};

/// Pod attach/detach request sent to the agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CniRequest {
    pub cni_type: String,
    pub pod_name: String,
    pub pod_namespace: String,
    pub container_id: String,
    pub net_ns: String,
    pub if_name: String,
    pub provider: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<Route>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<Dns>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub vf_driver: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub device_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub vhost_user_socket_volume_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub vhost_user_socket_name: String,
}

/// Envelope carrying the operation name alongside the request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum AgentRequest {
    Add(CniRequest),
    Del(CniRequest),
}

/// IP families the agent assigned
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(rename = "IPv4")]
    IPv4,
    #[serde(rename = "IPv6")]
    IPv6,
    #[serde(rename = "Dual")]
    Dual,
    #[default]
    #[serde(other)]
    Unspecified,
}

/// How the pod interface is built on the node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceType {
    /// VF rebound to virtio and moved into the pod directly
    Virtio,
    /// Macvtap in passthrough mode stacked on the rebound VF
    Macvtap,
    /// Plugged by the agent itself, nothing to do here
    #[default]
    #[serde(other)]
    Default,
}

impl InterfaceType {
    /// Whether the VF has to be rebound to the virtio driver
    pub fn is_accelerated(self) -> bool {
        matches!(self, InterfaceType::Virtio | InterfaceType::Macvtap)
    }
}

/// Agent reply
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CniResponse {
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(rename = "address", default)]
    pub ip_address: String,
    #[serde(default)]
    pub mac_address: String,
    #[serde(default)]
    pub cidr: String,
    #[serde(default)]
    pub gateway: String,
    #[serde(default)]
    pub mtu: u32,
    #[serde(rename = "nicname", default)]
    pub pod_nic_name: String,
    #[serde(default)]
    pub interface_type: InterfaceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<Dns>,
    #[serde(rename = "error", default, skip_serializing_if = "String::is_empty")]
    pub err: String,
}

/// Client for the agent's unix socket
pub struct AgentClient {
    socket_path: PathBuf,
}

impl AgentClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    /// Request network setup for a pod
    pub async fn add(&self, request: CniRequest) -> Result<CniResponse, ClientError> {
        self.send(AgentRequest::Add(request)).await
    }

    /// Release a pod's network
    pub async fn del(&self, request: CniRequest) -> Result<(), ClientError> {
        self.send(AgentRequest::Del(request)).await.map(|_| ())
    }

    async fn send(&self, request: AgentRequest) -> Result<CniResponse, ClientError> {
        debug!("Connecting to agent at {}", self.socket_path.display());
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| ClientError::Connection(format!("{}: {}", self.socket_path.display(), e)))?;

        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let request_json = serde_json::to_string(&request)
            .map_err(|e| ClientError::Serialization(e.to_string()))?;

        writer
            .write_all(request_json.as_bytes())
            .await
            .map_err(|e| ClientError::Io(e.to_string()))?;
        writer
            .write_all(b"\n")
            .await
            .map_err(|e| ClientError::Io(e.to_string()))?;

        let mut response_line = String::new();
        let read = reader
            .read_line(&mut response_line)
            .await
            .map_err(|e| ClientError::Io(e.to_string()))?;
        if read == 0 {
            return Err(ClientError::Io("agent closed the connection without a reply".to_string()));
        }

        let response: CniResponse = serde_json::from_str(&response_line)
            .map_err(|e| ClientError::Serialization(e.to_string()))?;

        if !response.err.is_empty() {
            return Err(ClientError::Agent(response.err));
        }

        Ok(response)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Agent error: {0}")]
    Agent(String),
}
