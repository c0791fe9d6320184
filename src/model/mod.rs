mod node;
mod node_id;

pub use node::{NodeRecord, NodeStatus};
pub use node_id::NodeId;
