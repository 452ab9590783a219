//! Generic resource pooling.
//!
//! [`ResourcePool`] hands out reusable resources with bounded creation and an
//! acquisition timeout; [`ResourceManager`] owns a set of named pools and
//! initializes and closes them together.

pub mod error;
pub mod manager;
pub mod resource_pool;

pub use error::ResourceError;
pub use manager::{NamedPoolStats, ResourceManager, ResourceManagerStats};
pub use resource_pool::{Cleanup, Factory, PoolConfig, PoolStats, PooledResource, ResourcePool};
