pub mod config;
pub mod context;

pub use config::{AllocationConfig, IsolationScope, PoolConfig, StoreConfig, VerifyConfig};
pub use context::{ContextError, OpContext};
