// File: tests/common/mod.rs

#![allow(dead_code)]

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

/// Lay out the sysfs attributes of one PCI device under `root`
pub fn fake_pci_device(root: &Path, addr: &str) -> PathBuf {
    let device = root.join("bus/pci/devices").join(addr);
    fs::create_dir_all(device.join("driver")).unwrap();
    fs::write(device.join("driver_override"), "").unwrap();
    fs::write(device.join("driver/unbind"), "").unwrap();
    fs::write(root.join("bus/pci/drivers_probe"), "").unwrap();
    device
}

/// Mark a device as bound to virtio-pci
pub fn bind_virtio(root: &Path, addr: &str) {
    let driver = root.join("bus/pci/drivers/virtio-pci");
    fs::create_dir_all(driver.join(addr)).unwrap();
}

/// Add a netdev below the virtio child of a device
pub fn add_virtio_netdev(device: &Path, name: &str) {
    fs::create_dir_all(device.join("virtio3/net").join(name)).unwrap();
}

/// Agent stand-in answering a single request with `reply`. The join handle
/// yields the raw request line.
pub fn spawn_fake_agent(socket: &Path, reply: &str) -> JoinHandle<String> {
    let listener = UnixListener::bind(socket).unwrap();
    let reply = reply.to_string();
    thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();

        let mut writer = stream;
        writer.write_all(reply.as_bytes()).unwrap();
        writer.write_all(b"\n").unwrap();
        line
    })
}

pub fn pod_args() -> String {
    "IgnoreUnknown=1;K8S_POD_NAMESPACE=default;K8S_POD_NAME=web-0;K8S_POD_INFRA_CONTAINER_ID=abc".to_string()
}
