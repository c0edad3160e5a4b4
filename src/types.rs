//! Shared data model
//!
//! Wire-facing types exchanged between the context, drivers, and the
//! executor CLI. Everything here serializes as camelCase JSON.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

// =============================================================================
// Instance Identity
// =============================================================================

/// Identity of the host an executor runs on, as reported by the driver and
/// stamped with the driver's registry name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceId {
    pub id: String,
    #[serde(default)]
    pub driver: String,
    /// Driver-specific identity fields (region, zone, account, ...)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
}

impl InstanceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            driver: String::new(),
            fields: BTreeMap::new(),
        }
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.driver.is_empty() {
            write!(f, "{}", self.id)
        } else {
            write!(f, "{}={}", self.driver, self.id)
        }
    }
}

// =============================================================================
// Local Devices
// =============================================================================

/// Device name to device path, e.g. `xvdb -> /dev/xvdb`.
pub type DeviceMap = BTreeMap<String, String>;

/// One enumeration snapshot of the devices visible on a host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalDevices {
    #[serde(default)]
    pub driver: String,
    #[serde(default)]
    pub device_map: DeviceMap,
}

/// How thoroughly a device enumeration scans the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanType {
    Quick,
    Deep,
}

impl Default for ScanType {
    fn default() -> Self {
        ScanType::Quick
    }
}

impl std::str::FromStr for ScanType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "0" | "quick" => Ok(ScanType::Quick),
            "1" | "deep" => Ok(ScanType::Deep),
            other => Err(Error::InvalidScanType(other.to_string())),
        }
    }
}

impl std::fmt::Display for ScanType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanType::Quick => write!(f, "quick"),
            ScanType::Deep => write!(f, "deep"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalDevicesOpts {
    pub scan_type: ScanType,
}

// =============================================================================
// Mounts
// =============================================================================

/// One row of a host's mount table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountInfo {
    pub source: String,
    pub mount_point: String,
    #[serde(default)]
    pub fs_type: String,
    #[serde(default)]
    pub opts: String,
}

#[derive(Debug, Clone, Default)]
pub struct DeviceMountOpts {
    pub mount_label: Option<String>,
    pub mount_options: Option<String>,
}

// =============================================================================
// Volumes and Snapshots
// =============================================================================

/// A storage volume as the backend reports it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub id: String,
    pub name: String,
    /// Size in GiB
    pub size: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iops: Option<i64>,
    #[serde(default)]
    pub encrypted: bool,
    /// Instance the volume is attached to, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attached_to: Option<String>,
    /// Local device name on the attached host, if attached
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
}

/// A point-in-time snapshot of a volume.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub id: String,
    pub name: String,
    pub volume_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct VolumeCreateOpts {
    pub encrypted: Option<bool>,
    pub encryption_key: Option<String>,
    pub iops: Option<i64>,
    pub size: Option<i64>,
    pub volume_type: Option<String>,
    pub availability_zone: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct VolumeRemoveOpts {
    pub force: bool,
}

#[derive(Debug, Clone, Default)]
pub struct VolumeAttachOpts {
    /// Pre-selected local device name; the driver picks one when absent.
    pub next_device: Option<String>,
    pub force: bool,
}

#[derive(Debug, Clone, Default)]
pub struct VolumeDetachOpts {
    pub force: bool,
}

/// Outcome of a volume attach: the updated volume plus the token that will
/// identify the device once it materializes on the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeAttachResult {
    pub volume: Volume,
    pub token: String,
}

// =============================================================================
// Durations
// =============================================================================

/// Parse a human duration: `30s`, `5m`, `1h`, `250ms`. A bare number is
/// milliseconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::DurationParse("empty duration".into()));
    }

    let (digits, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => s.split_at(idx),
        None => (s, "ms"),
    };

    let value: u64 = digits
        .parse()
        .map_err(|_| Error::DurationParse(s.to_string()))?;

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        _ => Err(Error::DurationParse(s.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_scan_type_parse() {
        assert_eq!("0".parse::<ScanType>().unwrap(), ScanType::Quick);
        assert_eq!("quick".parse::<ScanType>().unwrap(), ScanType::Quick);
        assert_eq!("1".parse::<ScanType>().unwrap(), ScanType::Deep);
        assert_eq!("DEEP".parse::<ScanType>().unwrap(), ScanType::Deep);
        assert_matches!(
            "fast".parse::<ScanType>(),
            Err(Error::InvalidScanType(_))
        );
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("750").unwrap(), Duration::from_millis(750));
        assert_matches!(parse_duration(""), Err(Error::DurationParse(_)));
        assert_matches!(parse_duration("10y"), Err(Error::DurationParse(_)));
    }

    #[test]
    fn test_instance_id_display() {
        let mut iid = InstanceId::new("i-012345");
        assert_eq!(iid.to_string(), "i-012345");
        iid.driver = "memory".into();
        assert_eq!(iid.to_string(), "memory=i-012345");
    }

    #[test]
    fn test_volume_serializes_camel_case() {
        let volume = Volume {
            id: "vol-0001".into(),
            name: "data".into(),
            size: 16,
            device_name: Some("xvdb".into()),
            ..Default::default()
        };
        let json = serde_json::to_value(&volume).unwrap();
        assert_eq!(json["deviceName"], "xvdb");
        assert!(json.get("attachedTo").is_none());
    }
}
