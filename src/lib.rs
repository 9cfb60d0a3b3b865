//! Kube-OVN CNI plugin for Kubernetes
//!
//! This implementation provides a pure Rust CNI plugin that:
//! - Asks the per-node agent to set up or release the pod's network
//! - Rebinds SR-IOV VFs to virtio for pass-through and macvtap interfaces
//! - Moves the resulting links into container namespaces and configures them
//! - Reports IPv4, IPv6 and dual-stack results

pub mod commands;
pub mod config;
pub mod driver;
pub mod error;
pub mod link;
pub mod netns;
pub mod plugin;
pub mod request;
pub mod result;
pub mod types;

// Re-export commonly used items
pub use commands::{cmd_add, cmd_del, execute, run_cni};
pub use config::NetConf;
pub use driver::PciBinder;
pub use error::CniError;
pub use plugin::OvnPlugin;
