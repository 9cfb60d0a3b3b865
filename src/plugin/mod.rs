use anyhow::{Context, Result};
use std::future::Future;
use tokio::runtime::{Builder, Runtime};
use tracing::info;

use crate::config::NetConf;
use crate::driver::{PciBinder, SRIOV_DRIVER, VIRTIO_DRIVER};
use crate::error::CniError;
use crate::link;
use crate::netns::NetNs;
use crate::request::{AgentClient, ClientError, CniRequest, CniResponse};
use crate::result::{generate_cni_result, pod_addresses};
use crate::types::{CmdArgs, Result as CniResult};

pub const POD_NAME_ARG: &str = "K8S_POD_NAME";
pub const POD_NAMESPACE_ARG: &str = "K8S_POD_NAMESPACE";

/// Look up `key` in a `;`-delimited `key=value` argument string. An empty
/// value counts as missing.
pub fn parse_value_from_args(args: &str, key: &str) -> std::result::Result<String, CniError> {
    if args.is_empty() {
        return Err(CniError::invalid_config("CNI_ARGS is required"));
    }

    args.split(';')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, v)| *k == key && !v.is_empty())
        .map(|(_, v)| v.to_string())
        .ok_or_else(|| CniError::invalid_config(format!("{} is required in CNI_ARGS", key)))
}

/// Map an agent failure to the retryable CNI error
fn rpc_failed(err: ClientError) -> anyhow::Error {
    CniError::try_again_later("RPC failed", err.to_string()).into()
}

/// Kube-OVN plugin implementation, one per invocation
pub struct OvnPlugin {
    /// Network configuration
    config: NetConf,
    /// Command arguments
    args: CmdArgs,
    binder: PciBinder,
}

impl OvnPlugin {
    /// Create a new plugin, applying the provider default for the
    /// requested interface
    pub fn new(mut config: NetConf, args: CmdArgs) -> Self {
        config.apply_default_provider(&args.ifname);
        Self {
            config,
            args,
            binder: PciBinder::default(),
        }
    }

    /// Use a different sysfs binder
    pub fn with_binder(mut self, binder: PciBinder) -> Self {
        self.binder = binder;
        self
    }

    pub fn config(&self) -> &NetConf {
        &self.config
    }

    /// Drive an agent call to completion on the calling thread
    fn block_on<F: Future>(&self, future: F) -> Result<F::Output> {
        let runtime: Runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to create Tokio runtime")?;
        Ok(runtime.block_on(future))
    }

    fn pod_identity(&self) -> Result<(String, String)> {
        let pod_name = parse_value_from_args(&self.args.args, POD_NAME_ARG)?;
        let pod_namespace = parse_value_from_args(&self.args.args, POD_NAMESPACE_ARG)?;
        Ok((pod_name, pod_namespace))
    }

    fn base_request(&self, pod_name: String, pod_namespace: String) -> CniRequest {
        CniRequest {
            cni_type: self.config.plugin_type.clone(),
            pod_name,
            pod_namespace,
            container_id: self.args.container_id.clone(),
            net_ns: self.args.netns.clone(),
            if_name: self.args.ifname.clone(),
            provider: self.config.provider.clone(),
            device_id: self.config.device_id.clone(),
            vhost_user_socket_volume_name: self.config.vhost_user_socket_volume_name.clone(),
            ..Default::default()
        }
    }

    /// Attach the pod to the network
    pub fn add_network(&self) -> Result<CniResult> {
        let (pod_name, pod_namespace) = self.pod_identity()?;
        info!(
            "Adding network for pod {}/{} on {}",
            pod_namespace, pod_name, self.args.ifname
        );

        let request = CniRequest {
            routes: self.config.routes.clone(),
            dns: self.config.dns.clone(),
            vf_driver: self.config.vf_driver.clone(),
            vhost_user_socket_name: self.config.vhost_user_socket_name.clone(),
            ..self.base_request(pod_name, pod_namespace)
        };

        let client = AgentClient::new(&self.config.server_socket);
        let response = self.block_on(client.add(request))?.map_err(rpc_failed)?;

        if response.interface_type.is_accelerated() {
            self.attach_vf(&response)?;
        }

        generate_cni_result(&response, &self.args.netns, self.config.result_version())
            .context("Failed to build CNI result")
    }

    /// Rebind the VF to virtio and hand it to the pod
    fn attach_vf(&self, response: &CniResponse) -> Result<()> {
        let device_id = &self.config.device_id;
        if device_id.is_empty() {
            return Err(CniError::invalid_config(format!(
                "deviceID is required for {:?} interfaces",
                response.interface_type
            ))
            .into());
        }

        self.binder.set_driver(device_id, VIRTIO_DRIVER)?;

        let vf_link = self.binder.discover_interface_name(device_id).with_context(|| {
            format!("Get virtio interface name timeout, deviceID {}", device_id)
        })?;

        let mac = link::parse_mac(&response.mac_address)
            .with_context(|| format!("Failed to parse mac for {}", vf_link))?;
        link::set_hardware_addr(&vf_link, &mac)?;
        link::set_alias(&vf_link, &vf_link)?;

        let netns = NetNs::open(&self.args.netns)?;
        let addrs = pod_addresses(response.protocol, &response.ip_address, &response.cidr)
            .with_context(|| format!("Failed to parse ip addr {:?}", response.ip_address))?;

        link::attach_to_pod(response.interface_type, &vf_link, &netns, &addrs)?;
        Ok(())
    }

    /// Detach the pod from the network
    pub fn del_network(&self) -> Result<()> {
        let device_id = &self.config.device_id;
        if self.binder.is_virtio_device(device_id) {
            info!("Returning device {} to {}", device_id, SRIOV_DRIVER);
            self.binder.set_driver(device_id, SRIOV_DRIVER)?;
        }

        let (pod_name, pod_namespace) = self.pod_identity()?;
        info!(
            "Deleting network for pod {}/{} on {}",
            pod_namespace, pod_name, self.args.ifname
        );

        let client = AgentClient::new(&self.config.server_socket);
        self.block_on(client.del(self.base_request(pod_name, pod_namespace)))?
            .map_err(rpc_failed)?;

        Ok(())
    }
}
