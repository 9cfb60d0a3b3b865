use ovncni::config::Dns;
use ovncni::request::{CniResponse, InterfaceType, Protocol};
use ovncni::result::{generate_cni_result, pod_addresses};
use ipnetwork::IpNetwork;
use std::net::IpAddr;

const NETNS: &str = "/var/run/netns/cni-1234";

fn response(protocol: Protocol, ip: &str, cidr: &str, gateway: &str) -> CniResponse {
    CniResponse {
        protocol,
        ip_address: ip.to_string(),
        mac_address: "00:00:00:12:34:56".to_string(),
        cidr: cidr.to_string(),
        gateway: gateway.to_string(),
        pod_nic_name: "eth0".to_string(),
        interface_type: InterfaceType::Default,
        ..Default::default()
    }
}

#[test]
fn test_ipv4_with_gateway() -> Result<(), Box<dyn std::error::Error>> {
    let resp = response(Protocol::IPv4, "10.0.0.5", "10.0.0.0/24", "10.0.0.1");
    let result = generate_cni_result(&resp, NETNS, "1.0.0")?;

    let ips = result.ips.expect("ips");
    assert_eq!(ips.len(), 1);
    assert_eq!(ips[0].address, "10.0.0.5/24".parse::<IpNetwork>()?);
    assert_eq!(ips[0].gateway, Some("10.0.0.1".parse::<IpAddr>()?));
    assert_eq!(ips[0].interface, Some(0));

    let routes = result.routes.expect("routes");
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].dst, "0.0.0.0/0".parse::<IpNetwork>()?);
    assert_eq!(routes[0].gw, Some("10.0.0.1".parse::<IpAddr>()?));

    let interfaces = result.interfaces.expect("interfaces");
    assert_eq!(interfaces.len(), 1);
    assert_eq!(interfaces[0].name, "eth0");
    assert_eq!(interfaces[0].mac.as_deref(), Some("00:00:00:12:34:56"));
    assert_eq!(interfaces[0].sandbox.as_deref(), Some(NETNS));

    Ok(())
}

#[test]
fn test_ipv4_without_gateway_has_no_routes() -> Result<(), Box<dyn std::error::Error>> {
    let resp = response(Protocol::IPv4, "10.0.0.5", "10.0.0.0/24", "");
    let result = generate_cni_result(&resp, NETNS, "1.0.0")?;

    assert_eq!(result.ips.as_ref().map(Vec::len), Some(1));
    assert_eq!(result.ips.expect("ips")[0].gateway, None);
    assert!(result.routes.is_none());
    Ok(())
}

#[test]
fn test_ipv6_single_stack() -> Result<(), Box<dyn std::error::Error>> {
    let resp = response(Protocol::IPv6, "fd00::5", "fd00::/64", "fd00::1");
    let result = generate_cni_result(&resp, NETNS, "1.0.0")?;

    let ips = result.ips.expect("ips");
    assert_eq!(ips[0].address, "fd00::5/64".parse::<IpNetwork>()?);

    let routes = result.routes.expect("routes");
    assert_eq!(routes[0].dst, "::/0".parse::<IpNetwork>()?);
    assert_eq!(routes[0].gw, Some("fd00::1".parse::<IpAddr>()?));
    Ok(())
}

#[test]
fn test_dual_stack() -> Result<(), Box<dyn std::error::Error>> {
    let resp = response(
        Protocol::Dual,
        "10.0.0.5,fd00::5",
        "10.0.0.0/24,fd00::/64",
        "10.0.0.1,fd00::1",
    );
    let result = generate_cni_result(&resp, NETNS, "1.0.0")?;

    let ips = result.ips.expect("ips");
    assert_eq!(ips.len(), 2);
    assert_eq!(ips[0].address, "10.0.0.5/24".parse::<IpNetwork>()?);
    assert_eq!(ips[1].address, "fd00::5/64".parse::<IpNetwork>()?);
    assert!(ips.iter().all(|ip| ip.interface == Some(0)));

    let routes = result.routes.expect("routes");
    assert_eq!(routes.len(), 2);
    assert_eq!(routes[0].dst, "0.0.0.0/0".parse::<IpNetwork>()?);
    assert_eq!(routes[1].dst, "::/0".parse::<IpNetwork>()?);

    assert_eq!(result.interfaces.map(|i| i.len()), Some(1));
    Ok(())
}

#[test]
fn test_dual_stack_follows_cidr_family_not_order() -> Result<(), Box<dyn std::error::Error>> {
    let resp = response(Protocol::Dual, "10.0.0.5,fd00::5", "fd00::/64,10.0.0.0/24", "");
    let result = generate_cni_result(&resp, NETNS, "1.0.0")?;

    let ips = result.ips.expect("ips");
    assert_eq!(ips[0].address, "fd00::5/64".parse::<IpNetwork>()?);
    assert_eq!(ips[1].address, "10.0.0.5/24".parse::<IpNetwork>()?);
    assert!(result.routes.is_none());
    Ok(())
}

#[test]
fn test_unspecified_protocol_reports_dns_only() -> Result<(), Box<dyn std::error::Error>> {
    let mut resp = response(Protocol::Unspecified, "", "", "");
    resp.dns = Some(Dns {
        nameservers: vec!["10.96.0.10".to_string()],
        ..Default::default()
    });
    let result = generate_cni_result(&resp, NETNS, "0.3.1")?;

    assert_eq!(result.cni_version, "0.3.1");
    assert!(result.ips.is_none());
    assert!(result.interfaces.is_none());
    assert!(result.dns.is_some());
    Ok(())
}

#[test]
fn test_invalid_address_is_an_error() {
    let resp = response(Protocol::IPv4, "not-an-ip", "10.0.0.0/24", "");
    assert!(generate_cni_result(&resp, NETNS, "1.0.0").is_err());
}

#[test]
fn test_pod_addresses() -> Result<(), Box<dyn std::error::Error>> {
    assert_eq!(
        pod_addresses(Protocol::IPv4, "10.0.0.5", "10.0.0.0/24")?,
        vec!["10.0.0.5/24".parse::<IpNetwork>()?]
    );
    assert_eq!(
        pod_addresses(Protocol::Dual, "10.0.0.5,fd00::5", "10.0.0.0/24,fd00::/64")?,
        vec!["10.0.0.5/24".parse::<IpNetwork>()?, "fd00::5/64".parse::<IpNetwork>()?]
    );
    assert!(pod_addresses(Protocol::Unspecified, "", "")?.is_empty());
    assert!(pod_addresses(Protocol::IPv4, "10.0.0.5", "").is_err());
    Ok(())
}

#[test]
fn test_pod_addresses_follow_protocol_not_cidr_count() -> Result<(), Box<dyn std::error::Error>> {
    // Single-stack with a second same-family CIDR yields one address
    assert_eq!(
        pod_addresses(Protocol::IPv4, "10.0.0.5", "10.0.0.0/24,10.1.0.0/24")?,
        vec!["10.0.0.5/24".parse::<IpNetwork>()?]
    );

    // Dual-stack without an IPv6 CIDR is rejected instead of repeating the address
    assert!(pod_addresses(Protocol::Dual, "10.0.0.5,fd00::5", "10.0.0.0/24,10.1.0.0/24").is_err());
    Ok(())
}

#[test]
fn test_pod_addresses_match_reported_ips() -> Result<(), Box<dyn std::error::Error>> {
    let resp = response(Protocol::Dual, "10.0.0.5,fd00::5", "fd00::/64,10.0.0.0/24", "10.0.0.1,fd00::1");
    let result = generate_cni_result(&resp, NETNS, "1.0.0")?;
    let reported: Vec<IpNetwork> = result.ips.expect("ips").iter().map(|ip| ip.address).collect();

    assert_eq!(pod_addresses(resp.protocol, &resp.ip_address, &resp.cidr)?, reported);
    Ok(())
}
