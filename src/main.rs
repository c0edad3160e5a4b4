//! Storage Gateway Executor CLI
//!
//! Single-host executor front end: resolves a registered executor driver,
//! runs one operation against it, and prints the JSON result. Operation
//! availability follows the driver's capability mask; unimplemented
//! operations and device-wait timeouts exit with their own stable codes so
//! remote callers can tell them apart from generic failure.

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use storage_gateway::driver::{probe_capabilities, StorageExecutor};
use storage_gateway::types::{
    parse_duration, DeviceMountOpts, LocalDevicesOpts, ScanType, VolumeAttachOpts,
    VolumeCreateOpts, VolumeDetachOpts, VolumeRemoveOpts,
};
use storage_gateway::{
    drivers, ConfigStore, Context, DeviceReadyWaiter, DriverRegistry, Error, Result,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Storage Gateway Executor - run one storage operation on the local host
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Executor driver to use, as <name> or <name>:<service>
    driver: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the host's instance identity
    InstanceId,
    /// Print the next free local device name
    NextDevice,
    /// Enumerate local devices
    LocalDevices {
        /// 0,quick | 1,deep
        scan_type: String,
    },
    /// Poll local devices until an attach token appears or a deadline passes
    Wait {
        /// 0,quick | 1,deep
        scan_type: String,
        /// Token correlating the attach with the appearing device
        attach_token: String,
        /// Overall deadline, e.g. 30s | 5m | 1h
        timeout: String,
    },
    /// List mounted filesystems
    Mounts,
    /// Mount a device
    Mount {
        /// Mount label
        #[arg(short = 'l', long)]
        label: Option<String>,
        /// Mount options
        #[arg(short = 'o', long)]
        options: Option<String>,
        device: String,
        path: String,
    },
    /// Unmount a path
    Umount { path: String },
    /// Create a volume
    VolumeCreate {
        /// Create an encrypted volume
        #[arg(short = 'e', long)]
        encrypted: bool,
        /// Encryption key
        #[arg(short = 'k', long)]
        encryption_key: Option<String>,
        /// Provisioned IOPS
        #[arg(short = 'i', long)]
        iops: Option<i64>,
        /// Size in GiB
        #[arg(short = 's', long)]
        size: Option<i64>,
        /// Volume type
        #[arg(short = 't', long = "type")]
        volume_type: Option<String>,
        /// Availability zone
        #[arg(short = 'z', long)]
        zone: Option<String>,
        name: String,
    },
    /// Remove a volume
    VolumeRemove {
        #[arg(short = 'f', long)]
        force: bool,
        id: String,
    },
    /// Attach a volume to this host
    VolumeAttach {
        /// Pre-selected local device name
        #[arg(short = 'n', long)]
        next_device: Option<String>,
        #[arg(short = 'f', long)]
        force: bool,
        id: String,
    },
    /// Detach a volume from this host
    VolumeDetach {
        #[arg(short = 'f', long)]
        force: bool,
        id: String,
    },
    /// Print the driver's capability mask
    Supported,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(&args);

    match run(args).await {
        Ok(Some(value)) => match serde_json::to_string_pretty(&value) {
            Ok(rendered) => println!("{}", rendered),
            Err(e) => {
                eprintln!("error: encoding result: {}", e);
                std::process::exit(1);
            }
        },
        Ok(None) => {}
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(e.exit_code());
        }
    }
}

async fn run(args: Args) -> Result<Option<serde_json::Value>> {
    let (driver_name, service_name) = match args.driver.split_once(':') {
        Some((driver, service)) => (driver.to_string(), Some(service.to_string())),
        None => (args.driver.clone(), None),
    };

    let registry = DriverRegistry::new();
    drivers::register_builtin(&registry);
    let executor = registry.new_executor(&driver_name)?;

    let config = ConfigStore::new();
    let mut ctx = Context::new(config.clone(), None).with_new_transaction();
    if let Some(service) = service_name {
        ctx = ctx.with_service_name(service);
    }
    executor.init(&ctx, &config).await?;

    dispatch_op(args.command, &ctx, executor.as_ref()).await
}

fn require<'a, T: ?Sized>(ops: Option<&'a T>, op: &'static str) -> Result<&'a T> {
    ops.ok_or(Error::NotImplemented { op })
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Option<serde_json::Value>> {
    Ok(Some(serde_json::to_value(value)?))
}

async fn dispatch_op(
    command: Command,
    ctx: &Context,
    executor: &dyn StorageExecutor,
) -> Result<Option<serde_json::Value>> {
    match command {
        Command::InstanceId => {
            let mut iid = executor.instance_id(ctx).await?;
            iid.driver = executor.name().to_string();
            to_value(&iid)
        }

        Command::NextDevice => match executor.next_device(ctx).await {
            Ok(device) => to_value(&device),
            // A driver without a next-device hint is not an error here.
            Err(e) if e.is_not_implemented() => Ok(None),
            Err(e) => Err(e),
        },

        Command::LocalDevices { scan_type } => {
            let opts = LocalDevicesOpts {
                scan_type: scan_type.parse::<ScanType>()?,
            };
            let mut devices = executor.local_devices(ctx, &opts).await?;
            devices.driver = executor.name().to_string();
            to_value(&devices)
        }

        Command::Wait {
            scan_type,
            attach_token,
            timeout,
        } => {
            let opts = LocalDevicesOpts {
                scan_type: scan_type.parse::<ScanType>()?,
            };
            let timeout = parse_duration(&timeout)?;
            let waiter = DeviceReadyWaiter::default();
            let mut devices = waiter
                .wait(ctx, executor, &opts, &attach_token, timeout)
                .await?;
            devices.driver = executor.name().to_string();
            to_value(&devices)
        }

        Command::Mounts => {
            let ops = require(executor.mount_list_ops(), "mounts")?;
            let mounts = ops.mounts(ctx).await?;
            to_value(&mounts)
        }

        Command::Mount {
            label,
            options,
            device,
            path,
        } => {
            let ops = require(executor.mount_ops(), "mount")?;
            let opts = DeviceMountOpts {
                mount_label: label,
                mount_options: options,
            };
            ops.mount(ctx, &device, &path, &opts).await?;
            to_value(&path)
        }

        Command::Umount { path } => {
            let ops = require(executor.unmount_ops(), "umount")?;
            ops.unmount(ctx, &path).await?;
            to_value(&path)
        }

        Command::VolumeCreate {
            encrypted,
            encryption_key,
            iops,
            size,
            volume_type,
            zone,
            name,
        } => {
            let ops = require(executor.volume_create_ops(), "volumeCreate")?;
            let opts = VolumeCreateOpts {
                encrypted: encrypted.then_some(true),
                encryption_key,
                iops,
                size,
                volume_type,
                availability_zone: zone,
            };
            let volume = ops.volume_create(ctx, &name, &opts).await?;
            to_value(&volume)
        }

        Command::VolumeRemove { force, id } => {
            let ops = require(executor.volume_remove_ops(), "volumeRemove")?;
            ops.volume_remove(ctx, &id, &VolumeRemoveOpts { force })
                .await?;
            Ok(None)
        }

        Command::VolumeAttach {
            next_device,
            force,
            id,
        } => {
            let ops = require(executor.volume_attach_ops(), "volumeAttach")?;
            let next_device = match next_device {
                Some(d) => Some(d),
                None => match executor.next_device(ctx).await {
                    Ok(d) => Some(d),
                    Err(e) if e.is_not_implemented() => None,
                    Err(e) => return Err(e),
                },
            };
            let opts = VolumeAttachOpts { next_device, force };
            let result = ops.volume_attach(ctx, &id, &opts).await?;
            to_value(&result)
        }

        Command::VolumeDetach { force, id } => {
            let ops = require(executor.volume_detach_ops(), "volumeDetach")?;
            let volume = ops.volume_detach(ctx, &id, &VolumeDetachOpts { force }).await?;
            to_value(&volume)
        }

        Command::Supported => {
            let mask = probe_capabilities(executor);
            to_value(&serde_json::json!({
                "mask": mask.bits(),
                "ops": mask.to_string(),
            }))
        }
    }
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
