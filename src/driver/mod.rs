//! PCI driver rebinding through sysfs.
//!
//! The binding state of a device only lives in the kernel. Every write here
//! is idempotent and nothing is cached between calls.

use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::PRIMARY_IFNAME;

/// Default driver of the SR-IOV VFs
pub const SRIOV_DRIVER: &str = "jmnd_sriov";
/// Accelerated driver used for pass-through and macvtap interfaces
pub const VIRTIO_DRIVER: &str = "virtio-pci";

pub const DEFAULT_SYSFS_ROOT: &str = "/sys";

const DISCOVER_ATTEMPTS: u32 = 5;
const DISCOVER_INTERVAL: Duration = Duration::from_secs(1);

/// Outcome of a best-effort unbind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnbindOutcome {
    Unbound,
    /// No driver was bound
    NotBound,
    /// The write failed for another reason and was ignored
    Failed,
}

/// Driver binder for PCI devices, addressed by BDF
#[derive(Debug, Clone)]
pub struct PciBinder {
    sysfs_root: PathBuf,
    discover_attempts: u32,
    discover_interval: Duration,
}

impl Default for PciBinder {
    fn default() -> Self {
        Self::new(DEFAULT_SYSFS_ROOT)
    }
}

impl PciBinder {
    pub fn new(sysfs_root: impl Into<PathBuf>) -> Self {
        Self {
            sysfs_root: sysfs_root.into(),
            discover_attempts: DISCOVER_ATTEMPTS,
            discover_interval: DISCOVER_INTERVAL,
        }
    }

    /// Override the discovery poll, for tests
    pub fn with_discovery(mut self, attempts: u32, interval: Duration) -> Self {
        self.discover_attempts = attempts;
        self.discover_interval = interval;
        self
    }

    fn device_dir(&self, addr: &str) -> PathBuf {
        self.sysfs_root.join("bus/pci/devices").join(addr)
    }

    pub fn driver_override_path(&self, addr: &str) -> PathBuf {
        self.device_dir(addr).join("driver_override")
    }

    fn unbind_path(&self, addr: &str) -> PathBuf {
        self.device_dir(addr).join("driver/unbind")
    }

    fn probe_path(&self) -> PathBuf {
        self.sysfs_root.join("bus/pci/drivers_probe")
    }

    fn virtio_driver_path(&self, addr: &str) -> PathBuf {
        self.sysfs_root
            .join("bus/pci/drivers")
            .join(VIRTIO_DRIVER)
            .join(addr)
    }

    /// Write the driver name to the device's override attribute
    pub fn override_driver(&self, driver: &str, addr: &str) -> Result<()> {
        let path = self.driver_override_path(addr);
        stat_write(&path, driver.as_bytes())
            .with_context(|| format!("Failed to override driver of {} with {}", addr, driver))
    }

    /// Detach the device from whatever driver it is bound to. Failures are
    /// never propagated, the device may simply not be bound.
    pub fn unbind(&self, addr: &str) -> UnbindOutcome {
        let path = self.unbind_path(addr);
        match stat_write(&path, addr.as_bytes()) {
            Ok(()) => {
                debug!("Unbound {} from its driver", addr);
                UnbindOutcome::Unbound
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Device {} has no bound driver, nothing to unbind", addr);
                UnbindOutcome::NotBound
            }
            Err(e) => {
                warn!("Ignoring failure to unbind {} via {}: {}", addr, path.display(), e);
                UnbindOutcome::Failed
            }
        }
    }

    /// Ask the kernel to bind the device again, honoring the override
    pub fn probe(&self, addr: &str) -> Result<()> {
        let path = self.probe_path();
        stat_write(&path, addr.as_bytes()).with_context(|| format!("Failed to probe {}", addr))
    }

    /// Rebind a device to `driver_name`: override, best-effort unbind, probe
    pub fn set_driver(&self, device_id: &str, driver_name: &str) -> Result<()> {
        info!("Binding device {} to driver {}", device_id, driver_name);
        self.override_driver(driver_name, device_id)?;
        self.unbind(device_id);
        self.probe(device_id)
    }

    /// Whether the device is currently bound to the virtio driver
    pub fn is_virtio_device(&self, device_id: &str) -> bool {
        if device_id.is_empty() {
            return false;
        }
        self.virtio_driver_path(device_id).exists()
    }

    /// Current override of the device, if any
    pub fn current_override(&self, device_id: &str) -> Option<String> {
        let value = fs::read_to_string(self.driver_override_path(device_id)).ok()?;
        let value = value.trim();
        if value.is_empty() || value == "(null)" {
            None
        } else {
            Some(value.to_string())
        }
    }

    /// Find the network interface the virtio driver created for a device.
    ///
    /// Binding enumerates the child netdev asynchronously, so the lookup is
    /// retried. A match named like the pod's primary interface is stale.
    pub fn discover_interface_name(&self, pci_addr: &str) -> Option<String> {
        for attempt in 1..=self.discover_attempts {
            match self.find_virtio_netdev(pci_addr) {
                Some(name) if name != PRIMARY_IFNAME => {
                    info!("Device {} exposes interface {}", pci_addr, name);
                    return Some(name);
                }
                Some(name) => debug!("Ignoring stale interface {} of {}", name, pci_addr),
                None => debug!(
                    "No interface for {} yet (attempt {}/{})",
                    pci_addr, attempt, self.discover_attempts
                ),
            }
            if attempt < self.discover_attempts {
                thread::sleep(self.discover_interval);
            }
        }

        warn!("No interface appeared for {}", pci_addr);
        None
    }

    /// First entry of `<device>/virtio*/net/*`
    fn find_virtio_netdev(&self, pci_addr: &str) -> Option<String> {
        let mut virtio_dirs: Vec<PathBuf> = fs::read_dir(self.device_dir(pci_addr))
            .ok()?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with("virtio"))
            .map(|entry| entry.path().join("net"))
            .collect();
        virtio_dirs.sort();

        virtio_dirs.iter().find_map(|net_dir| {
            let mut names: Vec<String> = fs::read_dir(net_dir)
                .ok()?
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            names.into_iter().next()
        })
    }
}

/// Write to an existing sysfs attribute, keeping its mode
fn stat_write(path: &Path, data: &[u8]) -> io::Result<()> {
    fs::metadata(path)?;
    let mut file = OpenOptions::new().write(true).truncate(true).open(path)?;
    file.write_all(data)
}
