//! In-memory driver set
//!
//! A fully capable executor plus OS and integration drivers backed by
//! plain in-process state. These are what the CLI runs against out of the
//! box and what the engine tests dispatch over; real platform drivers
//! replace the backend calls, not the shape.

use crate::config::ConfigStore;
use crate::context::Context;
use crate::driver::{
    Driver, IntegrationDriver, MountListOps, MountOps, OsDriver, StorageDriver, StorageExecutor,
    UnmountOps, VolumeAttachOps, VolumeCreateOps, VolumeDetachOps, VolumeRemoveOps,
};
use crate::error::{Error, Result};
use crate::types::{
    DeviceMap, DeviceMountOpts, InstanceId, LocalDevices, LocalDevicesOpts, MountInfo, Snapshot,
    Volume, VolumeAttachOpts, VolumeAttachResult, VolumeCreateOpts, VolumeDetachOpts,
    VolumeRemoveOpts,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;

pub const DRIVER_NAME: &str = "memory";

const DEFAULT_VOLUME_SIZE_GB: i64 = 16;

// =============================================================================
// Memory Executor
// =============================================================================

#[derive(Default)]
struct MemoryState {
    volumes: BTreeMap<String, Volume>,
    devices: DeviceMap,
    mounts: Vec<MountInfo>,
    next_volume: u64,
}

impl MemoryState {
    // Next free local device name in the xvdb..xvdz window.
    fn next_device_name(&self) -> Result<String> {
        for letter in b'b'..=b'z' {
            let name = format!("xvd{}", letter as char);
            if !self.devices.contains_key(&name) {
                return Ok(name);
            }
        }
        Err(Error::Internal("local device window exhausted".into()))
    }
}

/// In-memory storage executor implementing the full optional capability
/// set, doubling as an in-memory storage driver.
pub struct MemoryExecutor {
    instance: String,
    state: Mutex<MemoryState>,
}

impl MemoryExecutor {
    pub fn new() -> Self {
        Self {
            instance: format!("mem-{}", std::process::id()),
            state: Mutex::new(MemoryState::default()),
        }
    }
}

impl Default for MemoryExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Driver for MemoryExecutor {
    fn name(&self) -> &str {
        DRIVER_NAME
    }

    async fn init(&self, ctx: &Context, _config: &ConfigStore) -> Result<()> {
        ctx.log_debug("memory executor initialized");
        Ok(())
    }
}

#[async_trait]
impl StorageExecutor for MemoryExecutor {
    async fn instance_id(&self, _ctx: &Context) -> Result<InstanceId> {
        Ok(InstanceId::new(self.instance.clone()))
    }

    async fn next_device(&self, _ctx: &Context) -> Result<String> {
        self.state.lock().next_device_name()
    }

    async fn local_devices(
        &self,
        _ctx: &Context,
        _opts: &LocalDevicesOpts,
    ) -> Result<LocalDevices> {
        Ok(LocalDevices {
            driver: DRIVER_NAME.into(),
            device_map: self.state.lock().devices.clone(),
        })
    }

    fn mount_ops(&self) -> Option<&dyn MountOps> {
        Some(self)
    }

    fn unmount_ops(&self) -> Option<&dyn UnmountOps> {
        Some(self)
    }

    fn mount_list_ops(&self) -> Option<&dyn MountListOps> {
        Some(self)
    }

    fn volume_create_ops(&self) -> Option<&dyn VolumeCreateOps> {
        Some(self)
    }

    fn volume_remove_ops(&self) -> Option<&dyn VolumeRemoveOps> {
        Some(self)
    }

    fn volume_attach_ops(&self) -> Option<&dyn VolumeAttachOps> {
        Some(self)
    }

    fn volume_detach_ops(&self) -> Option<&dyn VolumeDetachOps> {
        Some(self)
    }
}

#[async_trait]
impl MountOps for MemoryExecutor {
    async fn mount(
        &self,
        _ctx: &Context,
        device: &str,
        path: &str,
        opts: &DeviceMountOpts,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.mounts.push(MountInfo {
            source: device.to_string(),
            mount_point: path.to_string(),
            fs_type: "memfs".into(),
            opts: opts.mount_options.clone().unwrap_or_default(),
        });
        Ok(())
    }
}

#[async_trait]
impl UnmountOps for MemoryExecutor {
    async fn unmount(&self, _ctx: &Context, path: &str) -> Result<()> {
        self.state.lock().mounts.retain(|m| m.mount_point != path);
        Ok(())
    }
}

#[async_trait]
impl MountListOps for MemoryExecutor {
    async fn mounts(&self, _ctx: &Context) -> Result<Vec<MountInfo>> {
        Ok(self.state.lock().mounts.clone())
    }
}

#[async_trait]
impl VolumeCreateOps for MemoryExecutor {
    async fn volume_create(
        &self,
        _ctx: &Context,
        name: &str,
        opts: &VolumeCreateOpts,
    ) -> Result<Volume> {
        let mut state = self.state.lock();
        state.next_volume += 1;
        let volume = Volume {
            id: format!("vol-{:04}", state.next_volume),
            name: name.to_string(),
            size: opts.size.unwrap_or(DEFAULT_VOLUME_SIZE_GB),
            volume_type: opts.volume_type.clone(),
            availability_zone: opts.availability_zone.clone(),
            iops: opts.iops,
            encrypted: opts.encrypted.unwrap_or(false),
            attached_to: None,
            device_name: None,
        };
        state.volumes.insert(volume.id.clone(), volume.clone());
        Ok(volume)
    }
}

#[async_trait]
impl VolumeRemoveOps for MemoryExecutor {
    async fn volume_remove(
        &self,
        _ctx: &Context,
        volume_id: &str,
        opts: &VolumeRemoveOpts,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let volume = state
            .volumes
            .get(volume_id)
            .ok_or_else(|| Error::VolumeNotFound {
                id: volume_id.to_string(),
            })?;
        if volume.attached_to.is_some() && !opts.force {
            return Err(Error::Precondition(format!(
                "volume {} is attached; detach first or force",
                volume_id
            )));
        }
        if let Some(device) = state.volumes[volume_id].device_name.clone() {
            state.devices.remove(&device);
        }
        state.volumes.remove(volume_id);
        Ok(())
    }
}

#[async_trait]
impl VolumeAttachOps for MemoryExecutor {
    async fn volume_attach(
        &self,
        _ctx: &Context,
        volume_id: &str,
        opts: &VolumeAttachOpts,
    ) -> Result<VolumeAttachResult> {
        let mut state = self.state.lock();
        if !state.volumes.contains_key(volume_id) {
            return Err(Error::VolumeNotFound {
                id: volume_id.to_string(),
            });
        }
        if state.volumes[volume_id].attached_to.is_some() && !opts.force {
            return Err(Error::Precondition(format!(
                "volume {} is already attached",
                volume_id
            )));
        }
        let device = match &opts.next_device {
            Some(d) => d.clone(),
            None => state.next_device_name()?,
        };
        let path = format!("/dev/{}", device);
        state.devices.insert(device.clone(), path);

        let instance = self.instance.clone();
        let volume = state
            .volumes
            .get_mut(volume_id)
            .ok_or_else(|| Error::VolumeNotFound {
                id: volume_id.to_string(),
            })?;
        volume.attached_to = Some(instance);
        volume.device_name = Some(device.clone());

        Ok(VolumeAttachResult {
            volume: volume.clone(),
            token: device,
        })
    }
}

#[async_trait]
impl VolumeDetachOps for MemoryExecutor {
    async fn volume_detach(
        &self,
        _ctx: &Context,
        volume_id: &str,
        _opts: &VolumeDetachOpts,
    ) -> Result<Volume> {
        let mut state = self.state.lock();
        if !state.volumes.contains_key(volume_id) {
            return Err(Error::VolumeNotFound {
                id: volume_id.to_string(),
            });
        }
        if let Some(device) = state.volumes[volume_id].device_name.clone() {
            state.devices.remove(&device);
        }
        let volume = state
            .volumes
            .get_mut(volume_id)
            .ok_or_else(|| Error::VolumeNotFound {
                id: volume_id.to_string(),
            })?;
        volume.attached_to = None;
        volume.device_name = None;
        Ok(volume.clone())
    }
}

#[async_trait]
impl StorageDriver for MemoryExecutor {
    async fn volumes(&self, _ctx: &Context) -> Result<Vec<Volume>> {
        Ok(self.state.lock().volumes.values().cloned().collect())
    }

    async fn volume_inspect(&self, _ctx: &Context, volume_id: &str) -> Result<Volume> {
        self.state
            .lock()
            .volumes
            .get(volume_id)
            .cloned()
            .ok_or_else(|| Error::VolumeNotFound {
                id: volume_id.to_string(),
            })
    }

    async fn snapshots(&self, _ctx: &Context) -> Result<Vec<Snapshot>> {
        // The memory backend has no snapshot surface.
        Ok(Vec::new())
    }
}

// =============================================================================
// Memory OS Driver
// =============================================================================

/// In-memory mount-table driver.
#[derive(Default)]
pub struct MemoryOsDriver {
    mounts: Mutex<Vec<MountInfo>>,
}

impl MemoryOsDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Driver for MemoryOsDriver {
    fn name(&self) -> &str {
        DRIVER_NAME
    }

    async fn init(&self, _ctx: &Context, _config: &ConfigStore) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl OsDriver for MemoryOsDriver {
    async fn mounts(&self, _ctx: &Context) -> Result<Vec<MountInfo>> {
        Ok(self.mounts.lock().clone())
    }

    async fn mount(
        &self,
        _ctx: &Context,
        device: &str,
        path: &str,
        opts: &DeviceMountOpts,
    ) -> Result<()> {
        self.mounts.lock().push(MountInfo {
            source: device.to_string(),
            mount_point: path.to_string(),
            fs_type: "memfs".into(),
            opts: opts.mount_options.clone().unwrap_or_default(),
        });
        Ok(())
    }

    async fn unmount(&self, _ctx: &Context, path: &str) -> Result<()> {
        self.mounts.lock().retain(|m| m.mount_point != path);
        Ok(())
    }
}

// =============================================================================
// Memory Integration Driver
// =============================================================================

/// In-memory integration driver tracking which volumes are mounted where.
#[derive(Default)]
pub struct MemoryIntegrationDriver {
    mounted: Mutex<BTreeMap<String, String>>,
}

impl MemoryIntegrationDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Driver for MemoryIntegrationDriver {
    fn name(&self) -> &str {
        DRIVER_NAME
    }

    async fn init(&self, _ctx: &Context, _config: &ConfigStore) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl IntegrationDriver for MemoryIntegrationDriver {
    async fn mount_volume(&self, _ctx: &Context, volume_id: &str, path: &str) -> Result<String> {
        self.mounted
            .lock()
            .insert(volume_id.to_string(), path.to_string());
        Ok(path.to_string())
    }

    async fn unmount_volume(&self, _ctx: &Context, volume_id: &str) -> Result<()> {
        self.mounted.lock().remove(volume_id);
        Ok(())
    }
}
