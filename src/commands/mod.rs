use anyhow::{Context, Result};
use std::env;
use std::io::{self, Read};
use tracing::debug;

use crate::config::NetConf;
use crate::error::{CniError, Failure};
use crate::plugin::OvnPlugin;
use crate::types::{CmdArgs, VersionInfo};

/// Read a required environment variable
fn required_env(name: &str) -> Result<String> {
    env::var(name).map_err(|_| {
        anyhow::Error::from(CniError::invalid_env(format!("{} not found in environment", name)))
    })
}

/// Parse command arguments from environment
pub fn parse_args() -> Result<CmdArgs> {
    let container_id = required_env("CNI_CONTAINERID")?;
    let ifname = required_env("CNI_IFNAME")?;

    // The namespace may already be gone on DEL
    let netns = env::var("CNI_NETNS").unwrap_or_default();
    let path = env::var("CNI_PATH").unwrap_or_default();
    let args = env::var("CNI_ARGS").unwrap_or_default();

    // Read stdin data
    let mut stdin_data = Vec::new();
    io::stdin()
        .read_to_end(&mut stdin_data)
        .context("Failed to read from stdin")?;

    Ok(CmdArgs {
        container_id,
        netns,
        ifname,
        args,
        path,
        stdin_data,
    })
}

/// Execute the add command
pub fn cmd_add(conf: NetConf, args: CmdArgs) -> Result<()> {
    let plugin = OvnPlugin::new(conf, args);
    let result = plugin.add_network()?;

    result.print().context("Failed to print CNI result")
}

/// Execute the delete command
pub fn cmd_del(conf: NetConf, args: CmdArgs) -> Result<()> {
    let plugin = OvnPlugin::new(conf, args);
    plugin.del_network()
}

/// Decode the configuration and run ADD or DEL. Failures after decoding
/// are reported in the configuration's CNI version.
pub fn execute(cmd: &str, args: CmdArgs) -> std::result::Result<(), Failure> {
    let conf = NetConf::parse(&args.stdin_data)?;
    let cni_version = conf.result_version().to_string();

    let outcome = match cmd {
        "ADD" => cmd_add(conf, args),
        "DEL" => cmd_del(conf, args),
        _ => Err(CniError::invalid_env(format!("Unknown CNI command: {}", cmd)).into()),
    };
    outcome.map_err(|error| Failure::new(cni_version, error))
}

/// Main entry point for the CNI plugin.
///
/// Runs entirely on the calling thread: namespace switches made while
/// configuring the pod are per-thread.
pub fn run_cni() -> std::result::Result<(), Failure> {
    let cmd = required_env("CNI_COMMAND")?;
    debug!("CNI command {}", cmd);

    match cmd.as_str() {
        "ADD" | "DEL" => execute(&cmd, parse_args()?),
        "CHECK" => {
            debug!("CHECK is a no-op for this plugin");
            Ok(())
        }
        "VERSION" => {
            let info = serde_json::to_string(&VersionInfo::current())
                .context("Failed to encode version info")?;
            println!("{}", info);
            Ok(())
        }
        _ => Err(anyhow::Error::from(CniError::invalid_env(format!("Unknown CNI command: {}", cmd))).into()),
    }
}
