//! Driver traits and capability discovery
//!
//! Three driver kinds bind into a context (OS, storage, integration) and a
//! fourth surface, the single-host storage executor, runs on the machine a
//! volume attaches to. An executor's mandatory operations (instance
//! identity, next-device hint, local-device enumeration, and the device
//! wait built on top of enumeration) are required trait methods. Everything
//! else is optional: each optional operation is its own trait, and an
//! executor advertises one by returning `Some` from the matching accessor.
//! Probing is flat and has no side effects.

use crate::config::ConfigStore;
use crate::context::Context;
use crate::error::Result;
use crate::types::{
    DeviceMountOpts, InstanceId, LocalDevices, LocalDevicesOpts, MountInfo, Snapshot, Volume,
    VolumeAttachOpts, VolumeAttachResult, VolumeCreateOpts, VolumeDetachOpts, VolumeRemoveOpts,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// =============================================================================
// Capability Mask
// =============================================================================

/// Bitmask of the optional operations an executor implements.
///
/// The four mandatory behaviors (instance-id, next-device, local-devices,
/// wait-for-device) are outside the mask; an executor implementing only
/// those probes to the empty baseline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityMask(u32);

impl CapabilityMask {
    pub const BASELINE: CapabilityMask = CapabilityMask(0);

    pub const MOUNT: CapabilityMask = CapabilityMask(1);
    pub const UNMOUNT: CapabilityMask = CapabilityMask(1 << 1);
    pub const MOUNTS: CapabilityMask = CapabilityMask(1 << 2);
    pub const VOLUME_CREATE: CapabilityMask = CapabilityMask(1 << 3);
    pub const VOLUME_REMOVE: CapabilityMask = CapabilityMask(1 << 4);
    pub const VOLUME_ATTACH: CapabilityMask = CapabilityMask(1 << 5);
    pub const VOLUME_DETACH: CapabilityMask = CapabilityMask(1 << 6);

    const NAMES: [(CapabilityMask, &'static str); 7] = [
        (Self::MOUNT, "mount"),
        (Self::UNMOUNT, "umount"),
        (Self::MOUNTS, "mounts"),
        (Self::VOLUME_CREATE, "volumeCreate"),
        (Self::VOLUME_REMOVE, "volumeRemove"),
        (Self::VOLUME_ATTACH, "volumeAttach"),
        (Self::VOLUME_DETACH, "volumeDetach"),
    ];

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: CapabilityMask) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub fn union(self, other: CapabilityMask) -> CapabilityMask {
        CapabilityMask(self.0 | other.0)
    }

    pub fn is_baseline(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for CapabilityMask {
    type Output = CapabilityMask;

    fn bitor(self, rhs: CapabilityMask) -> CapabilityMask {
        self.union(rhs)
    }
}

impl std::fmt::Display for CapabilityMask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_baseline() {
            return write!(f, "baseline");
        }
        let mut first = true;
        for (bit, name) in Self::NAMES {
            if self.contains(bit) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        Ok(())
    }
}

// =============================================================================
// Common Driver Surface
// =============================================================================

/// Behavior shared by every driver kind.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Registry name of this driver
    fn name(&self) -> &str;

    /// Initialize the driver with its deployment configuration. Called once
    /// at construction; drivers are reused across requests afterward.
    async fn init(&self, ctx: &Context, config: &ConfigStore) -> Result<()>;
}

// =============================================================================
// OS Driver
// =============================================================================

/// Host-local mount-table operations.
#[async_trait]
pub trait OsDriver: Driver {
    async fn mounts(&self, ctx: &Context) -> Result<Vec<MountInfo>>;

    async fn mount(
        &self,
        ctx: &Context,
        device: &str,
        path: &str,
        opts: &DeviceMountOpts,
    ) -> Result<()>;

    async fn unmount(&self, ctx: &Context, path: &str) -> Result<()>;
}

// =============================================================================
// Storage Driver
// =============================================================================

/// Remote volume and snapshot surface of one backend platform.
#[async_trait]
pub trait StorageDriver: Driver {
    async fn volumes(&self, ctx: &Context) -> Result<Vec<Volume>>;

    async fn volume_inspect(&self, ctx: &Context, volume_id: &str) -> Result<Volume>;

    async fn snapshots(&self, ctx: &Context) -> Result<Vec<Snapshot>>;
}

impl std::fmt::Debug for dyn StorageDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageDriver")
            .field("name", &self.name())
            .finish()
    }
}

// =============================================================================
// Integration Driver
// =============================================================================

/// Glue between a platform scheduler and the storage layer: takes a volume
/// all the way to a host path and back.
#[async_trait]
pub trait IntegrationDriver: Driver {
    /// Attach and mount `volume_id`, returning the host path.
    async fn mount_volume(&self, ctx: &Context, volume_id: &str, path: &str) -> Result<String>;

    /// Unmount and detach `volume_id`.
    async fn unmount_volume(&self, ctx: &Context, volume_id: &str) -> Result<()>;
}

// =============================================================================
// Storage Executor
// =============================================================================

/// Single-host executor for one storage platform.
///
/// Mandatory operations are trait methods; optional operations are
/// advertised through the `*_ops` accessors, which default to `None`.
#[async_trait]
pub trait StorageExecutor: Driver {
    /// Identity of the host this executor runs on.
    async fn instance_id(&self, ctx: &Context) -> Result<InstanceId>;

    /// Hint for the next free local device name.
    async fn next_device(&self, ctx: &Context) -> Result<String>;

    /// Enumerate the devices currently visible on this host.
    async fn local_devices(&self, ctx: &Context, opts: &LocalDevicesOpts)
        -> Result<LocalDevices>;

    fn mount_ops(&self) -> Option<&dyn MountOps> {
        None
    }

    fn unmount_ops(&self) -> Option<&dyn UnmountOps> {
        None
    }

    fn mount_list_ops(&self) -> Option<&dyn MountListOps> {
        None
    }

    fn volume_create_ops(&self) -> Option<&dyn VolumeCreateOps> {
        None
    }

    fn volume_remove_ops(&self) -> Option<&dyn VolumeRemoveOps> {
        None
    }

    fn volume_attach_ops(&self) -> Option<&dyn VolumeAttachOps> {
        None
    }

    fn volume_detach_ops(&self) -> Option<&dyn VolumeDetachOps> {
        None
    }
}

impl std::fmt::Debug for dyn StorageExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageExecutor")
            .field("name", &self.name())
            .finish()
    }
}

#[async_trait]
pub trait MountOps: Send + Sync {
    async fn mount(
        &self,
        ctx: &Context,
        device: &str,
        path: &str,
        opts: &DeviceMountOpts,
    ) -> Result<()>;
}

#[async_trait]
pub trait UnmountOps: Send + Sync {
    async fn unmount(&self, ctx: &Context, path: &str) -> Result<()>;
}

#[async_trait]
pub trait MountListOps: Send + Sync {
    async fn mounts(&self, ctx: &Context) -> Result<Vec<MountInfo>>;
}

#[async_trait]
pub trait VolumeCreateOps: Send + Sync {
    async fn volume_create(
        &self,
        ctx: &Context,
        name: &str,
        opts: &VolumeCreateOpts,
    ) -> Result<Volume>;
}

#[async_trait]
pub trait VolumeRemoveOps: Send + Sync {
    async fn volume_remove(
        &self,
        ctx: &Context,
        volume_id: &str,
        opts: &VolumeRemoveOpts,
    ) -> Result<()>;
}

#[async_trait]
pub trait VolumeAttachOps: Send + Sync {
    async fn volume_attach(
        &self,
        ctx: &Context,
        volume_id: &str,
        opts: &VolumeAttachOpts,
    ) -> Result<VolumeAttachResult>;
}

#[async_trait]
pub trait VolumeDetachOps: Send + Sync {
    async fn volume_detach(
        &self,
        ctx: &Context,
        volume_id: &str,
        opts: &VolumeDetachOpts,
    ) -> Result<Volume>;
}

/// Probe which optional operations `executor` advertises.
///
/// Flat and side-effect free: nothing is called, only the accessors are
/// inspected. The result is cached by the registry at registration time.
pub fn probe_capabilities(executor: &dyn StorageExecutor) -> CapabilityMask {
    let mut mask = CapabilityMask::BASELINE;
    if executor.mount_ops().is_some() {
        mask = mask | CapabilityMask::MOUNT;
    }
    if executor.unmount_ops().is_some() {
        mask = mask | CapabilityMask::UNMOUNT;
    }
    if executor.mount_list_ops().is_some() {
        mask = mask | CapabilityMask::MOUNTS;
    }
    if executor.volume_create_ops().is_some() {
        mask = mask | CapabilityMask::VOLUME_CREATE;
    }
    if executor.volume_remove_ops().is_some() {
        mask = mask | CapabilityMask::VOLUME_REMOVE;
    }
    if executor.volume_attach_ops().is_some() {
        mask = mask | CapabilityMask::VOLUME_ATTACH;
    }
    if executor.volume_detach_ops().is_some() {
        mask = mask | CapabilityMask::VOLUME_DETACH;
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MandatoryOnly;

    #[async_trait]
    impl Driver for MandatoryOnly {
        fn name(&self) -> &str {
            "mandatory-only"
        }

        async fn init(&self, _ctx: &Context, _config: &ConfigStore) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl StorageExecutor for MandatoryOnly {
        async fn instance_id(&self, _ctx: &Context) -> Result<InstanceId> {
            Ok(InstanceId::new("i-0"))
        }

        async fn next_device(&self, _ctx: &Context) -> Result<String> {
            Ok("xvdb".into())
        }

        async fn local_devices(
            &self,
            _ctx: &Context,
            _opts: &LocalDevicesOpts,
        ) -> Result<LocalDevices> {
            Ok(LocalDevices::default())
        }
    }

    struct WithMounting(MandatoryOnly);

    #[async_trait]
    impl MountOps for WithMounting {
        async fn mount(
            &self,
            _ctx: &Context,
            _device: &str,
            _path: &str,
            _opts: &DeviceMountOpts,
        ) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl UnmountOps for WithMounting {
        async fn unmount(&self, _ctx: &Context, _path: &str) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl Driver for WithMounting {
        fn name(&self) -> &str {
            "with-mounting"
        }

        async fn init(&self, _ctx: &Context, _config: &ConfigStore) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl StorageExecutor for WithMounting {
        async fn instance_id(&self, ctx: &Context) -> Result<InstanceId> {
            self.0.instance_id(ctx).await
        }

        async fn next_device(&self, ctx: &Context) -> Result<String> {
            self.0.next_device(ctx).await
        }

        async fn local_devices(
            &self,
            ctx: &Context,
            opts: &LocalDevicesOpts,
        ) -> Result<LocalDevices> {
            self.0.local_devices(ctx, opts).await
        }

        fn mount_ops(&self) -> Option<&dyn MountOps> {
            Some(self)
        }

        fn unmount_ops(&self) -> Option<&dyn UnmountOps> {
            Some(self)
        }
    }

    #[test]
    fn test_mandatory_only_probes_to_baseline() {
        let mask = probe_capabilities(&MandatoryOnly);
        assert!(mask.is_baseline());
        assert!(!mask.contains(CapabilityMask::MOUNT));
    }

    #[test]
    fn test_mount_unmount_probe() {
        let mask = probe_capabilities(&WithMounting(MandatoryOnly));
        assert_eq!(
            mask,
            CapabilityMask::BASELINE | CapabilityMask::MOUNT | CapabilityMask::UNMOUNT
        );
        assert!(!mask.contains(CapabilityMask::VOLUME_ATTACH));
    }

    #[test]
    fn test_mask_display() {
        assert_eq!(CapabilityMask::BASELINE.to_string(), "baseline");
        let mask = CapabilityMask::MOUNT | CapabilityMask::UNMOUNT;
        assert_eq!(mask.to_string(), "mount|umount");
    }
}
