use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use ovncni::config::{NetConf, DEFAULT_SERVER_SOCKET};
use ovncni::driver::{PciBinder, DEFAULT_SYSFS_ROOT, SRIOV_DRIVER, VIRTIO_DRIVER};

/// A command line tool to inspect and manage VF driver bindings
#[derive(Parser)]
#[command(name = "ovncni-ctl", author, version, about)]
struct Cli {
    /// Root of the sysfs tree
    #[arg(long, default_value = DEFAULT_SYSFS_ROOT)]
    sysfs_root: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a plugin network configuration
    Generate {
        /// Network name
        #[arg(long, default_value = "kube-ovn")]
        name: String,

        /// Agent socket path
        #[arg(long, default_value = DEFAULT_SERVER_SOCKET)]
        socket: String,

        /// Logical network provider
        #[arg(long)]
        provider: Option<String>,

        /// PCI address of the VF
        #[arg(long)]
        device_id: Option<String>,

        /// VF driver hint
        #[arg(long)]
        vf_driver: Option<String>,

        /// Output file path
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Inspect or change the driver of a VF
    Driver {
        #[command(subcommand)]
        action: DriverAction,
    },

    /// Find the interface the virtio driver created for a VF
    Discover {
        /// PCI address of the VF
        #[arg(long)]
        device: String,

        /// Number of lookups before giving up
        #[arg(long, default_value_t = 5)]
        attempts: u32,
    },
}

#[derive(Subcommand)]
enum DriverAction {
    /// Rebind a VF to another driver
    Set {
        /// PCI address of the VF
        #[arg(long)]
        device: String,

        /// Driver to bind, e.g. virtio-pci or jmnd_sriov
        #[arg(long, default_value = SRIOV_DRIVER)]
        driver: String,
    },

    /// Show the current binding of a VF
    Status {
        /// PCI address of the VF
        #[arg(long)]
        device: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Configure logging based on verbosity
    let log_level = if cli.verbose { "debug" } else { "info" };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(log_level))
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set default subscriber")?;

    let binder = PciBinder::new(&cli.sysfs_root);

    match cli.command {
        Commands::Generate { name, socket, provider, device_id, vf_driver, output } => {
            let mut conf = NetConf::new_default(&name, &socket);
            conf.provider = provider.unwrap_or_default();
            conf.device_id = device_id.unwrap_or_default();
            conf.vf_driver = vf_driver.unwrap_or_default();

            if let Some(path) = output {
                conf.save(&path)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                println!("Network configuration written to {}", path.display());
            } else {
                println!("{}", serde_json::to_string_pretty(&conf)?);
            }
        }

        Commands::Driver { action: DriverAction::Set { device, driver } } => {
            binder.set_driver(&device, &driver)?;
            info!("Device {} bound to {}", device, driver);
            println!("Device {} bound to {}", device, driver);
        }

        Commands::Driver { action: DriverAction::Status { device } } => {
            let bound = if binder.is_virtio_device(&device) {
                VIRTIO_DRIVER
            } else {
                "not virtio"
            };
            println!("Device {}:", device);
            println!("  Driver: {}", bound);
            println!(
                "  Override: {}",
                binder.current_override(&device).unwrap_or_else(|| "none".to_string())
            );
        }

        Commands::Discover { device, attempts } => {
            let binder = binder.with_discovery(attempts, Duration::from_secs(1));
            match binder.discover_interface_name(&device) {
                Some(name) => println!("{}", name),
                None => anyhow::bail!("No interface found for device {}", device),
            }
        }
    }

    Ok(())
}
