//! Named collection of resource pools managed as a unit.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::error::ResourceError;
use super::resource_pool::{PoolStats, ResourcePool};

/// Type-erased view of a pool, so pools of different resource types can
/// live in one manager.
trait ManagedPool: Send + Sync {
    fn initialize(&self) -> Result<(), ResourceError>;
    fn close(&self) -> BoxFuture<'_, Result<(), ResourceError>>;
    fn stats(&self) -> PoolStats;
    fn as_any(&self) -> &dyn Any;
}

impl<T: Send + 'static> ManagedPool for ResourcePool<T> {
    fn initialize(&self) -> Result<(), ResourceError> {
        ResourcePool::initialize(self)
    }

    fn close(&self) -> BoxFuture<'_, Result<(), ResourceError>> {
        Box::pin(ResourcePool::close(self))
    }

    fn stats(&self) -> PoolStats {
        ResourcePool::stats(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Statistics of one named pool.
#[derive(Debug, Clone, Serialize)]
pub struct NamedPoolStats {
    pub name: String,
    #[serde(flatten)]
    pub stats: PoolStats,
}

/// Statistics of every pool in a [`ResourceManager`].
#[derive(Debug, Clone, Serialize)]
pub struct ResourceManagerStats {
    pub initialized: bool,
    pub pools: Vec<NamedPoolStats>,
}

/// Owns named resource pools and initializes/closes them together.
///
/// `initialize_all` is fail-fast: the first pool that fails to initialize
/// aborts the whole operation. `close_all` is fail-open: every pool is
/// closed even if some of them report errors.
#[derive(Default)]
pub struct ResourceManager {
    /// Pools in declaration order.
    pools: RwLock<Vec<(String, Arc<dyn ManagedPool>)>>,
    initialized: AtomicBool,
}

impl ResourceManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pool under `name`, returning a handle to it.
    pub fn register_pool<T: Send + 'static>(
        &self,
        name: impl Into<String>,
        pool: ResourcePool<T>,
    ) -> Result<ResourcePool<T>, ResourceError> {
        let name = name.into();
        let mut pools = self.pools.write();
        if pools.iter().any(|(existing, _)| *existing == name) {
            return Err(ResourceError::AlreadyRegistered(name));
        }
        debug!("Registered resource pool '{}'", name);
        pools.push((name, Arc::new(pool.clone())));
        Ok(pool)
    }

    /// Look up a pool by name and resource type.
    pub fn get_pool<T: Send + 'static>(&self, name: &str) -> Result<ResourcePool<T>, ResourceError> {
        let pools = self.pools.read();
        let (_, pool) = pools
            .iter()
            .find(|(existing, _)| existing == name)
            .ok_or_else(|| ResourceError::not_found(name))?;
        pool.as_any()
            .downcast_ref::<ResourcePool<T>>()
            .cloned()
            .ok_or_else(|| ResourceError::TypeMismatch(name.to_string()))
    }

    /// Names of all registered pools, in declaration order.
    pub fn pool_names(&self) -> Vec<String> {
        self.pools.read().iter().map(|(name, _)| name.clone()).collect()
    }

    /// Whether `initialize_all` has completed successfully.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Initialize every pool in declaration order, stopping at the first
    /// failure and returning it.
    pub fn initialize_all(&self) -> Result<(), ResourceError> {
        if self.is_initialized() {
            warn!("Resource manager already initialized");
            return Ok(());
        }

        let pools = self.snapshot();
        info!("Initializing {} resource pools...", pools.len());
        for (name, pool) in &pools {
            if let Err(e) = pool.initialize() {
                error!("Failed to initialize pool '{}': {}", name, e);
                return Err(e);
            }
            debug!("Initialized resource pool '{}'", name);
        }

        self.initialized.store(true, Ordering::Release);
        info!("All resource pools initialized successfully");
        Ok(())
    }

    /// Close every pool, logging failures without propagating them.
    ///
    /// Pools are closed even when `initialize_all` never completed, so a
    /// partial startup still releases what it created.
    pub async fn close_all(&self) {
        if !self.is_initialized() {
            warn!("Resource manager was not fully initialized, closing pools anyway");
        }

        let pools = self.snapshot();
        info!("Closing {} resource pools...", pools.len());
        let mut failures = 0;
        for (name, pool) in &pools {
            match pool.close().await {
                Ok(()) => debug!("Closed resource pool '{}'", name),
                Err(e) => {
                    error!("Error closing pool '{}': {}", name, e);
                    failures += 1;
                }
            }
        }

        self.initialized.store(false, Ordering::Release);
        if failures == 0 {
            info!("All resource pools closed successfully");
        } else {
            warn!("Resource pools closed with {} failures", failures);
        }
    }

    /// Statistics for all pools.
    pub fn stats(&self) -> ResourceManagerStats {
        ResourceManagerStats {
            initialized: self.is_initialized(),
            pools: self
                .snapshot()
                .into_iter()
                .map(|(name, pool)| NamedPoolStats {
                    name,
                    stats: pool.stats(),
                })
                .collect(),
        }
    }

    fn snapshot(&self) -> Vec<(String, Arc<dyn ManagedPool>)> {
        self.pools.read().clone()
    }
}

impl std::fmt::Debug for ResourceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceManager")
            .field("pools", &self.pool_names())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}
