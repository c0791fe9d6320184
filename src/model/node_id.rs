use std::fmt;

use serde::{Deserialize, Serialize};

/// Collision-resistant, immutable node identifier.
///
/// The original implementation generates a 25-byte CUID (`zbx_new_cuid`);
/// this crate generates a v4 UUID and renders it as a 32-character
/// lowercase hex string (`Uuid::simple`), which satisfies the same
/// ">= 25 character, opaque, collision-resistant" contract with a
/// standard source of randomness.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    pub fn generate() -> Self {
        NodeId(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse an existing id read back from the registry. Does not
    /// re-validate the hex alphabet; the registry is the source of truth.
    pub fn from_stored(value: String) -> Self {
        NodeId(value)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_id_meets_minimum_length() {
        let id = NodeId::generate();
        assert!(id.as_str().len() >= 25);
    }

    #[test]
    fn generated_ids_are_distinct() {
        let a = NodeId::generate();
        let b = NodeId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn id_is_lowercase_hex() {
        let id = NodeId::generate();
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
