//! Link and address manipulation through iproute2.
//!
//! Commands inherit the network namespace of the calling thread, so calls
//! made inside [`NetNs::run_in`](crate::netns::NetNs::run_in) act on the
//! pod's namespace.

use anyhow::{Context, Result};
use ipnetwork::IpNetwork;
use mac_address::MacAddress;
use std::process::Command;
use std::str::FromStr;
use tracing::{debug, info};

use crate::netns::NetNs;
use crate::request::InterfaceType;

/// Run `ip` with the given arguments, failing on a non-zero exit
fn ip(args: &[&str]) -> Result<()> {
    debug!("ip {}", args.join(" "));
    let output = Command::new("ip")
        .args(args)
        .output()
        .with_context(|| format!("Failed to execute ip {}", args.join(" ")))?;

    if !output.status.success() {
        anyhow::bail!(
            "ip {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    Ok(())
}

/// Regroup dotted notation (`0000.5e00.5301`) into colon-separated octets
fn dotted_to_colons(mac: &str) -> Option<String> {
    let groups: Vec<&str> = mac.split('.').collect();
    if groups.len() != 3 || groups.iter().any(|g| g.len() != 4 || !g.is_ascii()) {
        return None;
    }
    let octets: Vec<&str> = groups.into_iter().flat_map(|g| [&g[..2], &g[2..]]).collect();
    Some(octets.join(":"))
}

/// Parse an EUI-48 MAC address in colon, hyphen or dotted notation into
/// the lowercase colon form iproute2 takes
pub fn parse_mac(mac: &str) -> Result<String> {
    let regrouped;
    let input = if mac.contains('.') {
        regrouped = dotted_to_colons(mac)
            .with_context(|| format!("Invalid MAC address {:?}", mac))?;
        regrouped.as_str()
    } else {
        mac
    };

    let parsed = MacAddress::from_str(input)
        .with_context(|| format!("Invalid MAC address {:?}", mac))?;
    Ok(parsed.to_string().to_ascii_lowercase())
}

pub fn set_hardware_addr(link: &str, mac: &str) -> Result<()> {
    ip(&["link", "set", "dev", link, "address", mac])
        .with_context(|| format!("Can not set mac address {} on {}", mac, link))
}

pub fn set_alias(link: &str, alias: &str) -> Result<()> {
    ip(&["link", "set", "dev", link, "alias", alias])
        .with_context(|| format!("Failed to set link alias {} on {}", alias, link))
}

pub fn set_netns(link: &str, netns: &NetNs) -> Result<()> {
    ip(&["link", "set", "dev", link, "netns", netns.path()])
        .with_context(|| format!("Failed to move link {} to netns {}", link, netns.path()))
}

pub fn add_addr(link: &str, addr: &IpNetwork) -> Result<()> {
    let addr = addr.to_string();
    ip(&["addr", "add", &addr, "dev", link])
        .with_context(|| format!("Failed to add ip addr {} to {}", addr, link))
}

pub fn set_up(link: &str) -> Result<()> {
    ip(&["link", "set", "dev", link, "up"])
        .with_context(|| format!("Failed to set link {} up", link))
}

/// Create a passthrough macvtap on top of `parent`
pub fn add_macvtap(name: &str, parent: &str) -> Result<()> {
    ip(&["link", "add", "link", parent, "name", name, "type", "macvtap", "mode", "passthru"])
        .with_context(|| format!("Failed to add macvtap link {} on {}", name, parent))
}

/// Name of the macvtap stacked on a VF link
pub fn macvtap_name(vf_link: &str) -> String {
    format!("{}-macvtap", vf_link)
}

/// Hand a rebound VF link to the pod according to the interface type.
///
/// Returns the name of the link that ended up in the namespace.
pub fn attach_to_pod(
    kind: InterfaceType,
    vf_link: &str,
    netns: &NetNs,
    addrs: &[IpNetwork],
) -> Result<String> {
    let pod_link = match kind {
        InterfaceType::Virtio => vf_link.to_string(),
        InterfaceType::Macvtap => {
            let name = macvtap_name(vf_link);
            add_macvtap(&name, vf_link)?;
            name
        }
        InterfaceType::Default => anyhow::bail!("Interface {} needs no attachment", vf_link),
    };

    set_netns(&pod_link, netns)?;

    netns
        .run_in(|| {
            for addr in addrs {
                add_addr(&pod_link, addr)?;
            }
            set_up(&pod_link)
        })
        .context("Failed to config in ns")?;

    info!("Attached {} to {} as {:?}", pod_link, netns.path(), kind);
    Ok(pod_link)
}
