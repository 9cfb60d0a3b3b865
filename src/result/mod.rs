//! Builds the CNI result from the agent's response.

use anyhow::{Context, Result};
use ipnetwork::{IpNetwork, Ipv4Network, Ipv6Network};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::warn;

use crate::request::{CniResponse, Protocol};
use crate::types::{IPConfig, Interface, Result as CniResult, Route};

/// Parse a comma-joined CIDR list
fn parse_cidrs(cidr: &str) -> Result<Vec<IpNetwork>> {
    cidr.split(',')
        .map(str::trim)
        .filter(|block| !block.is_empty())
        .map(|block| {
            block
                .parse::<IpNetwork>()
                .with_context(|| format!("Invalid CIDR {:?}", block))
        })
        .collect()
}

/// Positional component of a comma-joined list: IPv4 first, IPv6 second
fn family_component<'a>(list: &'a str, network: &IpNetwork, dual: bool) -> Option<&'a str> {
    if !dual {
        return Some(list.trim()).filter(|s| !s.is_empty());
    }
    let index = if network.is_ipv4() { 0 } else { 1 };
    list.split(',')
        .nth(index)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn parse_ip(ip: &str) -> Result<IpAddr> {
    ip.parse::<IpAddr>()
        .with_context(|| format!("Invalid IP address {:?}", ip))
}

/// Bring an address into the family of `network`, IPv4 as 4 bytes and
/// IPv6 as 16 bytes
fn normalize(ip: IpAddr, network: &IpNetwork) -> Option<IpAddr> {
    match (network, ip) {
        (IpNetwork::V4(_), IpAddr::V4(v4)) => Some(IpAddr::V4(v4)),
        (IpNetwork::V4(_), IpAddr::V6(v6)) => v6.to_ipv4_mapped().map(IpAddr::V4),
        (IpNetwork::V6(_), IpAddr::V6(v6)) => Some(IpAddr::V6(v6)),
        (IpNetwork::V6(_), IpAddr::V4(v4)) => Some(IpAddr::V6(v4.to_ipv6_mapped())),
    }
}

/// The match-everything route of a family
fn default_route(network: &IpNetwork, gw: IpAddr) -> Result<Route> {
    let dst = match network {
        IpNetwork::V4(_) => IpNetwork::V4(Ipv4Network::new(Ipv4Addr::UNSPECIFIED, 0)?),
        IpNetwork::V6(_) => IpNetwork::V6(Ipv6Network::new(Ipv6Addr::UNSPECIFIED, 0)?),
    };
    Ok(Route { dst, gw: Some(gw) })
}

/// Address entry and optional default route for one family
pub fn assign_address(
    ip_address: &str,
    gateway: Option<&str>,
    network: &IpNetwork,
) -> Result<(IPConfig, Option<Route>)> {
    let ip = normalize(parse_ip(ip_address)?, network).with_context(|| {
        format!("IP address {} does not belong to the family of {}", ip_address, network)
    })?;
    let address = IpNetwork::new(ip, network.prefix())
        .with_context(|| format!("Invalid prefix for {}", ip_address))?;

    let gateway = gateway
        .and_then(|gw| gw.parse::<IpAddr>().ok())
        .and_then(|gw| normalize(gw, network));

    let ip_config = IPConfig {
        interface: Some(0),
        address,
        gateway,
    };
    let route = gateway.map(|gw| default_route(network, gw)).transpose()?;

    Ok((ip_config, route))
}

/// Networks the agent assigned. Single-stack takes the first CIDR,
/// dual-stack the first CIDR of each family in list order.
fn assigned_networks(protocol: Protocol, cidr: &str) -> Result<Vec<IpNetwork>> {
    let networks = parse_cidrs(cidr)?;
    match protocol {
        Protocol::IPv4 | Protocol::IPv6 => {
            let network = networks
                .into_iter()
                .next()
                .with_context(|| format!("Missing CIDR for {:?} response", protocol))?;
            Ok(vec![network])
        }
        Protocol::Dual => {
            let (mut seen_v4, mut seen_v6) = (false, false);
            let picked: Vec<IpNetwork> = networks
                .into_iter()
                .filter(|network| {
                    let seen = if network.is_ipv4() { &mut seen_v4 } else { &mut seen_v6 };
                    !std::mem::replace(seen, true)
                })
                .collect();
            if picked.len() != 2 {
                anyhow::bail!("Dual-stack response needs an IPv4 and an IPv6 CIDR, got {:?}", cidr);
            }
            Ok(picked)
        }
        Protocol::Unspecified => Ok(Vec::new()),
    }
}

/// Address entry and default route of every assigned family
fn family_assignments(
    protocol: Protocol,
    ip_address: &str,
    gateway: &str,
    cidr: &str,
) -> Result<Vec<(IPConfig, Option<Route>)>> {
    let dual = protocol == Protocol::Dual;
    assigned_networks(protocol, cidr)?
        .iter()
        .map(|network| {
            let ip = family_component(ip_address, network, dual)
                .with_context(|| format!("No IP address for {} in {:?}", network, ip_address))?;
            assign_address(ip, family_component(gateway, network, dual), network)
        })
        .collect()
}

/// Addresses to configure on the pod link, one per assigned family
pub fn pod_addresses(protocol: Protocol, ip_address: &str, cidr: &str) -> Result<Vec<IpNetwork>> {
    Ok(family_assignments(protocol, ip_address, "", cidr)?
        .into_iter()
        .map(|(config, _)| config.address)
        .collect())
}

/// Assemble the result reported to the runtime
pub fn generate_cni_result(response: &CniResponse, netns: &str, cni_version: &str) -> Result<CniResult> {
    let mut result = CniResult::new(cni_version);
    if let Some(dns) = &response.dns {
        result.set_dns(dns.clone());
    }

    if response.protocol == Protocol::Unspecified {
        warn!("Agent response carries no protocol, reporting no addresses");
        return Ok(result);
    }

    let assignments = family_assignments(
        response.protocol,
        &response.ip_address,
        &response.gateway,
        &response.cidr,
    )?;
    for (ip_config, route) in assignments {
        result.add_ip(ip_config);
        if let Some(route) = route {
            result.add_route(route);
        }
    }

    result.add_interface(Interface {
        name: response.pod_nic_name.clone(),
        mac: Some(response.mac_address.clone()).filter(|m| !m.is_empty()),
        sandbox: Some(netns.to_string()).filter(|n| !n.is_empty()),
    });

    Ok(result)
}
