mod duration;
mod gateway;

pub use duration::{parse_failover_delay, DEFAULT_FAILOVER_DELAY};
pub use gateway::{NodeRegistry, RegistryTx};
