use ovncni::config::{NetConf, CNI_TYPE_NAME, OVN_PROVIDER};
use ovncni::error::{CniError, ErrorCode};

const NATIVE_CONF: &str = r#"{
    "cniVersion": "0.3.1",
    "name": "kube-ovn",
    "type": "kube-ovn",
    "server_socket": "/run/openvswitch/kube-ovn-daemon.sock",
    "routes": [
        {"dst": "10.96.0.0/12", "gw": "10.16.0.1"},
        {"dst": "192.168.0.0/16"}
    ],
    "dns": {
        "nameservers": ["10.96.0.10"],
        "search": ["default.svc.cluster.local"]
    },
    "deviceID": "0000:3b:00.2",
    "vf_driver": "virtio-pci"
}"#;

fn error_code(err: &anyhow::Error) -> ErrorCode {
    CniError::from_anyhow(err).code
}

#[test]
fn test_parse_native_conf() -> Result<(), Box<dyn std::error::Error>> {
    let conf = NetConf::parse(NATIVE_CONF.as_bytes())?;

    assert_eq!(conf.cni_version, "0.3.1");
    assert_eq!(conf.plugin_type, CNI_TYPE_NAME);
    assert_eq!(conf.server_socket, "/run/openvswitch/kube-ovn-daemon.sock");
    assert_eq!(conf.provider, "");
    assert_eq!(conf.routes.len(), 2);
    assert_eq!(conf.routes[0].dst, "10.96.0.0/12");
    assert_eq!(conf.routes[0].gw, "10.16.0.1");
    assert_eq!(conf.routes[1].gw, "");
    let dns = conf.dns.as_ref().expect("dns section");
    assert_eq!(dns.nameservers, vec!["10.96.0.10".to_string()]);
    assert_eq!(dns.search, vec!["default.svc.cluster.local".to_string()]);
    assert_eq!(conf.device_id, "0000:3b:00.2");
    assert_eq!(conf.vf_driver, "virtio-pci");

    // Saving and reloading keeps every field
    let reparsed = NetConf::parse(&serde_json::to_vec(&conf)?)?;
    assert_eq!(reparsed, conf);

    Ok(())
}

#[test]
fn test_malformed_json_is_decoding_failure() {
    let err = NetConf::parse(b"{\"type\": \"kube-ovn\",").unwrap_err();
    assert_eq!(error_code(&err), ErrorCode::DecodingFailure);
}

#[test]
fn test_missing_socket_is_invalid_config() {
    let err = NetConf::parse(br#"{"type": "kube-ovn"}"#).unwrap_err();
    assert_eq!(error_code(&err), ErrorCode::InvalidNetworkConfig);
}

#[test]
fn test_delegated_ipam_supplies_socket_and_provider() -> Result<(), Box<dyn std::error::Error>> {
    let conf = NetConf::parse(
        br#"{
            "cniVersion": "0.3.1",
            "type": "macvlan",
            "ipam": {
                "type": "kube-ovn",
                "server_socket": "/run/openvswitch/kube-ovn-daemon.sock",
                "provider": "attachnet.default.ovn"
            }
        }"#,
    )?;

    assert_eq!(conf.server_socket, "/run/openvswitch/kube-ovn-daemon.sock");
    assert_eq!(conf.provider, "attachnet.default.ovn");
    Ok(())
}

#[test]
fn test_default_provider_only_for_native_primary_interface() -> Result<(), Box<dyn std::error::Error>> {
    let base = NetConf::parse(NATIVE_CONF.as_bytes())?;

    let mut conf = base.clone();
    conf.apply_default_provider("eth0");
    assert_eq!(conf.provider, OVN_PROVIDER);

    let mut conf = base.clone();
    conf.apply_default_provider("net1");
    assert_eq!(conf.provider, "");

    let mut conf = base.clone();
    conf.provider = "attachnet.default.ovn".to_string();
    conf.apply_default_provider("eth0");
    assert_eq!(conf.provider, "attachnet.default.ovn");

    let mut conf = base;
    conf.plugin_type = "macvlan".to_string();
    conf.apply_default_provider("eth0");
    assert_eq!(conf.provider, "");

    Ok(())
}

#[test]
fn test_result_version_defaults() {
    let mut conf = NetConf::new_default("kube-ovn", "/tmp/agent.sock");
    assert_eq!(conf.result_version(), "1.0.0");
    conf.cni_version = String::new();
    assert_eq!(conf.result_version(), "1.0.0");
    conf.cni_version = "0.4.0".to_string();
    assert_eq!(conf.result_version(), "0.4.0");
}

#[test]
fn test_save_writes_loadable_conf() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("01-kube-ovn.conf");

    let mut conf = NetConf::new_default("kube-ovn", "/run/openvswitch/kube-ovn-daemon.sock");
    conf.device_id = "0000:3b:00.2".to_string();
    conf.save(&path)?;

    let loaded = NetConf::parse(&std::fs::read(&path)?)?;
    assert_eq!(loaded, conf);
    Ok(())
}
