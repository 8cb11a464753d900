//! Volume, capacity and topology types

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Topology segment key carrying the node a volume is reachable from
pub const TOPOLOGY_HOSTNAME_KEY: &str = "hostname";

/// A set of topology segments (key/value labels) a volume is accessible from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    #[serde(default)]
    pub segments: BTreeMap<String, String>,
}

impl Topology {
    /// Topology pinned to a single node via the `hostname` segment
    pub fn hostname(node_id: impl Into<String>) -> Self {
        let mut segments = BTreeMap::new();
        segments.insert(TOPOLOGY_HOSTNAME_KEY.to_string(), node_id.into());
        Self { segments }
    }

    pub fn node_id(&self) -> Option<&str> {
        self.segments.get(TOPOLOGY_HOSTNAME_KEY).map(String::as_str)
    }
}

/// Requested capacity bounds. Zero means "not specified".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityRange {
    #[serde(default)]
    pub required_bytes: u64,

    #[serde(default)]
    pub limit_bytes: u64,
}

impl CapacityRange {
    /// Whether an existing capacity satisfies this range for idempotent re-creation.
    ///
    /// Matches when the capacity equals either bound.
    pub fn matches(&self, capacity_bytes: u64) -> bool {
        capacity_bytes == self.limit_bytes || capacity_bytes == self.required_bytes
    }
}

/// A provisioned volume as reported to the orchestrator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    /// Volume identifier (equals the requested volume name)
    pub volume_id: String,

    /// Capacity in bytes
    pub capacity_bytes: u64,

    /// Opaque context echoed back to node calls
    #[serde(default)]
    pub volume_context: BTreeMap<String, String>,

    /// Nodes this volume is reachable from
    #[serde(default)]
    pub accessible_topology: Vec<Topology>,
}

/// Health condition of a volume
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeCondition {
    pub abnormal: bool,
    #[serde(default)]
    pub message: String,
}

impl VolumeCondition {
    pub fn healthy() -> Self {
        Self::default()
    }

    pub fn abnormal(message: impl Into<String>) -> Self {
        Self {
            abnormal: true,
            message: message.into(),
        }
    }
}

/// Convert bytes to a short human-readable string (e.g., "1.50 GiB")
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 7] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];

    let mut steps = 0;
    let mut val = bytes as f64;
    while val >= 1024. && steps < UNITS.len() - 1 {
        val /= 1024.;
        steps += 1;
    }

    if steps == 0 {
        format!("{bytes} B")
    } else {
        format!("{:.2} {}", val, UNITS[steps])
    }
}
