use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::error::CniError;
use crate::types::CURRENT_VERSION;

/// Plugin type name of the native mode
pub const CNI_TYPE_NAME: &str = "kube-ovn";
/// Provider used for the primary interface of the native mode
pub const OVN_PROVIDER: &str = "ovn";
/// Conventional name of the pod's primary interface
pub const PRIMARY_IFNAME: &str = "eth0";
/// Default location of the agent socket
pub const DEFAULT_SERVER_SOCKET: &str = "/run/openvswitch/kube-ovn-daemon.sock";

/// Network configuration handed to the plugin on stdin
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetConf {
    /// CNI specification version
    #[serde(rename = "cniVersion", default)]
    pub cni_version: String,
    /// Name of the network
    #[serde(default)]
    pub name: String,
    /// Type of CNI plugin
    #[serde(rename = "type", default)]
    pub plugin_type: String,
    /// Logical network provider
    #[serde(default)]
    pub provider: String,
    /// Path of the agent's unix socket
    #[serde(default)]
    pub server_socket: String,
    /// Static routes passed through to the agent
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<Route>,
    /// DNS settings passed through to the agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<Dns>,
    /// IPAM section, used when the plugin is delegated to as an IPAM plugin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipam: Option<IpamConf>,
    /// PCI address (BDF) of the VF backing the interface
    #[serde(rename = "deviceID", default, skip_serializing_if = "String::is_empty")]
    pub device_id: String,
    /// Driver hint for the VF
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub vf_driver: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub vhost_user_socket_volume_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub vhost_user_socket_name: String,
}

/// IPAM section of a delegating plugin
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IpamConf {
    #[serde(rename = "type", default)]
    pub ipam_type: String,
    #[serde(default)]
    pub server_socket: String,
    #[serde(default)]
    pub provider: String,
}

/// Route configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    /// Destination CIDR
    #[serde(default)]
    pub dst: String,
    /// Gateway for this route
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub gw: String,
}

/// DNS configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dns {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nameservers: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub domain: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub search: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl NetConf {
    /// Parse NetConf from bytes
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut conf: NetConf = serde_json::from_slice(bytes).map_err(|e| {
            CniError::decoding_failure("failed to load netconf", e.to_string())
        })?;

        conf.post_load()?;
        Ok(conf)
    }

    /// Fill in fields derived from other sections and validate the result
    fn post_load(&mut self) -> Result<()> {
        if self.plugin_type != CNI_TYPE_NAME {
            if let Some(ipam) = &self.ipam {
                self.provider = ipam.provider.clone();
                self.server_socket = ipam.server_socket.clone();
            }
        }

        if self.server_socket.is_empty() {
            return Err(CniError::invalid_config(format!(
                "server_socket is required in cni.conf, {:?}",
                self
            ))
            .into());
        }

        Ok(())
    }

    /// The primary interface of the native mode defaults to the OVN provider
    pub fn apply_default_provider(&mut self, ifname: &str) {
        if self.plugin_type == CNI_TYPE_NAME && self.provider.is_empty() && ifname == PRIMARY_IFNAME {
            debug!("Defaulting provider to {} for {}", OVN_PROVIDER, ifname);
            self.provider = OVN_PROVIDER.to_string();
        }
    }

    /// CNI version to report results with
    pub fn result_version(&self) -> &str {
        if self.cni_version.is_empty() {
            CURRENT_VERSION
        } else {
            &self.cni_version
        }
    }

    /// Create a default configuration for the native mode
    pub fn new_default(name: &str, server_socket: &str) -> Self {
        Self {
            cni_version: CURRENT_VERSION.to_string(),
            name: name.to_string(),
            plugin_type: CNI_TYPE_NAME.to_string(),
            server_socket: server_socket.to_string(),
            ..Default::default()
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}
