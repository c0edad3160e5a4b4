//! Storage Gateway Core
//!
//! The orchestration substrate of a storage gateway that exposes a uniform
//! volume/snapshot/device API over heterogeneous backends through pluggable
//! drivers.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                     API Routes (external)                      │
//! ├────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐   ┌──────────────┐   ┌───────────────────┐   │
//! │  │ RequestContext│   │ DriverRegistry│  │    TaskEngine     │   │
//! │  │ (scope chain) │   │ (capabilities)│  │ (fan-out/gather)  │   │
//! │  └──────┬───────┘   └──────┬───────┘   └─────────┬─────────┘   │
//! │         └──────────────────┼─────────────────────┘             │
//! │                            │                                   │
//! │                  ┌─────────┴──────────┐                        │
//! │                  │  DeviceReadyWaiter │                        │
//! │                  └────────────────────┘                        │
//! ├────────────────────────────────────────────────────────────────┤
//! │        Drivers: OS │ Storage │ Integration │ Executors         │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`context`]: immutable request context propagation
//! - [`registry`]: driver construction and capability discovery
//! - [`tasks`]: concurrent multi-service dispatch and aggregation
//! - [`device`]: post-attach device polling
//! - [`driver`]: driver traits and capability masks
//! - [`services`]: named driver bindings resolved from configuration
//! - [`drivers`]: built-in driver modules and the composition root
//! - [`error`]: error taxonomy and exit-code mapping

pub mod config;
pub mod context;
pub mod device;
pub mod driver;
pub mod drivers;
pub mod error;
pub mod registry;
pub mod services;
pub mod tasks;
pub mod types;

// Re-export commonly used types
pub use config::ConfigStore;
pub use context::{Context, ContextKey, ContextValue, RequestInfo, ScopedLogger};
pub use device::{DeviceReadyWaiter, DEFAULT_POLL_INTERVAL};
pub use driver::{
    probe_capabilities, CapabilityMask, Driver, IntegrationDriver, OsDriver, StorageDriver,
    StorageExecutor,
};
pub use error::{Error, Result, EXIT_CODE_NOT_IMPLEMENTED, EXIT_CODE_TIMED_OUT};
pub use registry::{DriverKind, DriverRegistry};
pub use services::{find_service, resolve_services, Service};
pub use tasks::{BatchError, CompletedTask, TaskEngine, TaskHandle};
pub use types::{
    parse_duration, DeviceMap, InstanceId, LocalDevices, LocalDevicesOpts, MountInfo, ScanType,
    Snapshot, Volume, VolumeAttachResult,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
