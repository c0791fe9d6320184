use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::node_id::NodeId;
use crate::error::HaError;

/// HA status of a node, as persisted in `ha_node.status` and transmitted
/// on the control channel. Numeric values are a wire contract (spec §6)
/// and must not be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    Unknown,
    Standby,
    Stopped,
    Unavailable,
    Active,
    Error,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Active => "ACTIVE",
            NodeStatus::Standby => "STANDBY",
            NodeStatus::Stopped => "STOPPED",
            NodeStatus::Unavailable => "UNAVAILABLE",
            NodeStatus::Error => "ERROR",
            NodeStatus::Unknown => "UNKNOWN",
        }
    }

    /// Lowercase rendering, matching `zbx_ha_status_str` in the original
    /// source. Used when a status is interpolated into an error message
    /// (spec §7/§8: `"found active node in standalone mode"`), never for
    /// the report table column, which keeps the uppercase `as_str()` form.
    pub fn as_log_str(&self) -> &'static str {
        match self {
            NodeStatus::Active => "active",
            NodeStatus::Standby => "standby",
            NodeStatus::Stopped => "stopped",
            NodeStatus::Unavailable => "unavailable",
            NodeStatus::Error => "error",
            NodeStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<NodeStatus> for i32 {
    fn from(status: NodeStatus) -> Self {
        match status {
            NodeStatus::Active => 3,
            NodeStatus::Standby => 0,
            NodeStatus::Stopped => 1,
            NodeStatus::Unavailable => 2,
            NodeStatus::Error => -1,
            NodeStatus::Unknown => -2,
        }
    }
}

impl TryFrom<i32> for NodeStatus {
    type Error = HaError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            3 => Ok(NodeStatus::Active),
            0 => Ok(NodeStatus::Standby),
            1 => Ok(NodeStatus::Stopped),
            2 => Ok(NodeStatus::Unavailable),
            -1 => Ok(NodeStatus::Error),
            -2 => Ok(NodeStatus::Unknown),
            other => Err(HaError::Database(format!("unknown node status code {other}"))),
        }
    }
}

/// A row of the `ha_node` table (spec §6: `ha_nodeid`, `name`, `status`,
/// `lastaccess`, `address`, `port`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub node_id: NodeId,
    pub name: String,
    pub status: NodeStatus,
    pub last_access: DateTime<Utc>,
    pub address: String,
    pub port: i32,
}

impl NodeRecord {
    pub fn is_standalone_row(&self) -> bool {
        self.name.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_wire_code() {
        for status in [
            NodeStatus::Active,
            NodeStatus::Standby,
            NodeStatus::Stopped,
            NodeStatus::Unavailable,
            NodeStatus::Error,
            NodeStatus::Unknown,
        ] {
            let code: i32 = status.into();
            let back = NodeStatus::try_from(code).expect("valid code");
            assert_eq!(status, back);
        }
    }

    #[test]
    fn wire_codes_match_spec() {
        assert_eq!(i32::from(NodeStatus::Active), 3);
        assert_eq!(i32::from(NodeStatus::Standby), 0);
        assert_eq!(i32::from(NodeStatus::Stopped), 1);
        assert_eq!(i32::from(NodeStatus::Unavailable), 2);
        assert_eq!(i32::from(NodeStatus::Error), -1);
        assert_eq!(i32::from(NodeStatus::Unknown), -2);
    }

    #[test]
    fn unknown_code_is_rejected() {
        assert!(NodeStatus::try_from(42).is_err());
    }
}
