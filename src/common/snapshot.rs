use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::SimulationError;
use super::geometry::Point2D;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Anchor,
    Tag,
}

impl DeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Anchor => "anchor",
            DeviceKind::Tag => "tag",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceKind {
    type Err = SimulationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "anchor" => Ok(DeviceKind::Anchor),
            "tag" => Ok(DeviceKind::Tag),
            other => Err(SimulationError::Persistence(format!(
                "Unknown device type: {}",
                other
            ))),
        }
    }
}

/// Value form of a device: what gets persisted and what collaborators see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: DeviceKind,
    pub mac_address: String,
    pub position: Point2D,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_point: Option<Point2D>,
    pub randomizer: f64,
    #[serde(default)]
    pub cluster_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeviceRecord {
    pub fn is_tag(&self) -> bool {
        self.kind == DeviceKind::Tag
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Distance {
    pub raw_distance: f64,
    pub scaled_distance: f64,
}

/// One anchor-tag measurement, keyed by the anchor's MAC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangingSample {
    pub mac_address: String,
    pub distance: Distance,
}

/// Immutable view of one tick. Publisher and store share it behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub tick: u64,
    pub taken_at: DateTime<Utc>,
    pub devices: Vec<DeviceRecord>,
    /// Ranging samples per tag name, one per anchor in anchor-name order.
    pub ranging: BTreeMap<String, Vec<RangingSample>>,
}

impl RegistrySnapshot {
    pub fn device(&self, name: &str) -> Option<&DeviceRecord> {
        self.devices.iter().find(|d| d.name == name)
    }

    pub fn anchors(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.devices.iter().filter(|d| d.kind == DeviceKind::Anchor)
    }

    pub fn tags(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.devices.iter().filter(|d| d.kind == DeviceKind::Tag)
    }

    pub fn ranging_for(&self, tag_name: &str) -> &[RangingSample] {
        self.ranging
            .get(tag_name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
