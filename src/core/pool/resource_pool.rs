//! Generic bounded pool of reusable resources.
//!
//! The pool hands out resources created by a caller-supplied factory, never
//! creating more than `max_size` of them. Callers either pair `acquire()` with
//! `release()` themselves or use `acquire_scoped()`, whose guard returns the
//! resource on every exit path, cancellation included.
//!
//! Cleanup may be synchronous or asynchronous. `close()` awaits async cleanup
//! of idle resources; a resource released into an already closed pool has its
//! async cleanup spawned on the current runtime.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use super::error::ResourceError;

/// Creates a new resource.
pub type Factory<T> = Arc<dyn Fn() -> anyhow::Result<T> + Send + Sync>;

type SyncCleanupFn<T> = Arc<dyn Fn(T) -> anyhow::Result<()> + Send + Sync>;
type AsyncCleanupFn<T> = Arc<dyn Fn(T) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Disposes of a resource that leaves the pool for good.
pub enum Cleanup<T> {
    Sync(SyncCleanupFn<T>),
    Async(AsyncCleanupFn<T>),
}

impl<T> Clone for Cleanup<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Sync(f) => Self::Sync(Arc::clone(f)),
            Self::Async(f) => Self::Async(Arc::clone(f)),
        }
    }
}

impl<T> fmt::Debug for Cleanup<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync(_) => f.write_str("Sync(..)"),
            Self::Async(_) => f.write_str("Async(..)"),
        }
    }
}

impl<T: Send + 'static> Cleanup<T> {
    pub fn sync<C>(cleanup: C) -> Self
    where
        C: Fn(T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(cleanup))
    }

    pub fn from_async<C, Fut>(cleanup: C) -> Self
    where
        C: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::Async(Arc::new(move |resource| Box::pin(cleanup(resource))))
    }
}

/// Sizing and timeout settings for a [`ResourcePool`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolConfig {
    /// Upper bound on resources ever created by the pool.
    pub max_size: usize,

    /// Resources created up front by `initialize()`.
    pub min_size: usize,

    /// How long `acquire()` waits, counted from entry.
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 10,
            min_size: 1,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

impl PoolConfig {
    /// Create a pool configuration; `min_size` is capped at `max_size` and
    /// `max_size` is at least one.
    pub fn new(min_size: usize, max_size: usize, acquire_timeout: Duration) -> Self {
        let max_size = max_size.max(1);
        Self {
            max_size,
            min_size: min_size.min(max_size),
            acquire_timeout,
        }
    }
}

/// Point-in-time view of a pool's counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub max_size: usize,
    pub min_size: usize,
    pub created_count: usize,
    pub active_count: usize,
    pub available_count: usize,
    pub closed: bool,
}

struct PoolState<T> {
    idle: VecDeque<T>,
    created: usize,
    active: usize,
    closed: bool,
}

struct PoolInner<T> {
    config: PoolConfig,
    factory: Factory<T>,
    cleanup: Option<Cleanup<T>>,
    state: Mutex<PoolState<T>>,
    available: Notify,
}

/// Outcome of one look at the pool state.
enum Slot<T> {
    Idle(T),
    Grow,
    Wait,
}

/// A bounded pool of homogeneous, reusable resources.
///
/// Cloning the pool is cheap and yields another handle to the same pool.
pub struct ResourcePool<T> {
    inner: Arc<PoolInner<T>>,
}

impl<T> Clone for ResourcePool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> ResourcePool<T> {
    /// Create a pool whose resources need no cleanup.
    pub fn new<F>(config: PoolConfig, factory: F) -> Self
    where
        F: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self::build(config, Arc::new(factory), None)
    }

    /// Create a pool that runs `cleanup` on every resource it discards.
    pub fn with_cleanup<F, C>(config: PoolConfig, factory: F, cleanup: C) -> Self
    where
        F: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
        C: Fn(T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::build(config, Arc::new(factory), Some(Cleanup::sync(cleanup)))
    }

    /// Create a pool whose discarded resources are disposed of by an async
    /// `cleanup`, such as closing a network connection gracefully.
    pub fn with_async_cleanup<F, C, Fut>(config: PoolConfig, factory: F, cleanup: C) -> Self
    where
        F: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
        C: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::build(config, Arc::new(factory), Some(Cleanup::from_async(cleanup)))
    }

    fn build(config: PoolConfig, factory: Factory<T>, cleanup: Option<Cleanup<T>>) -> Self {
        let config = PoolConfig::new(config.min_size, config.max_size, config.acquire_timeout);
        Self {
            inner: Arc::new(PoolInner {
                config,
                factory,
                cleanup,
                state: Mutex::new(PoolState {
                    idle: VecDeque::with_capacity(config.max_size),
                    created: 0,
                    active: 0,
                    closed: false,
                }),
                available: Notify::new(),
            }),
        }
    }

    /// The pool's configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Whether `close()` has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Pre-populate the pool with `min_size` resources.
    ///
    /// A factory failure aborts initialization and is returned to the caller.
    pub fn initialize(&self) -> Result<(), ResourceError> {
        let reserved = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(ResourceError::Closed);
            }
            let missing = self.inner.config.min_size.saturating_sub(state.created);
            state.created += missing;
            missing
        };

        let mut fresh = Vec::with_capacity(reserved);
        for _ in 0..reserved {
            match (self.inner.factory)() {
                Ok(resource) => fresh.push(resource),
                Err(e) => {
                    let unused = reserved - fresh.len();
                    self.inner.state.lock().created -= unused;
                    self.restock(fresh);
                    error!("Resource pool initialization failed: {}", e);
                    return Err(ResourceError::factory(e.to_string()));
                }
            }
        }

        self.restock(fresh);
        debug!(
            "Resource pool initialized with {} resources (max: {})",
            self.inner.config.min_size, self.inner.config.max_size
        );
        Ok(())
    }

    /// Acquire a resource, growing the pool or waiting as needed.
    ///
    /// Fails with [`ResourceError::Exhausted`] once `acquire_timeout` has
    /// elapsed since entry with the pool at `max_size`, and with
    /// [`ResourceError::Closed`] if the pool is or becomes closed.
    pub async fn acquire(&self) -> Result<T, ResourceError> {
        let timeout = self.inner.config.acquire_timeout;
        let deadline = Instant::now() + timeout;

        loop {
            // Register interest before inspecting the state so a release
            // between the check and the wait is not missed.
            let notified = self.inner.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.take_slot()? {
                Slot::Idle(resource) => return Ok(resource),
                Slot::Grow => return self.create_checked_out(),
                Slot::Wait => {}
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                debug!("Timed out waiting for a pooled resource after {:?}", timeout);
                return Err(ResourceError::Exhausted {
                    waited: timeout,
                    max_size: self.inner.config.max_size,
                });
            }
        }
    }

    /// Acquire a resource wrapped in a guard that releases it when dropped.
    pub async fn acquire_scoped(&self) -> Result<PooledResource<T>, ResourceError> {
        let resource = self.acquire().await?;
        Ok(PooledResource {
            resource: Some(resource),
            pool: self.clone(),
        })
    }

    /// Return a resource to the pool.
    ///
    /// On a closed pool the resource is cleaned up instead of being queued;
    /// async cleanup is spawned onto the current runtime.
    /// Callers are trusted to release each resource exactly once.
    pub fn release(&self, resource: T) {
        let mut state = self.inner.state.lock();
        state.active = state.active.saturating_sub(1);

        if state.closed {
            drop(state);
            self.dispose_detached(resource);
            return;
        }

        state.idle.push_back(resource);
        drop(state);
        self.inner.available.notify_one();
    }

    /// Close the pool and clean up every idle resource.
    ///
    /// Checked-out resources are cleaned up when their holders release them.
    /// Waiting acquirers are woken and fail with [`ResourceError::Closed`].
    pub async fn close(&self) -> Result<(), ResourceError> {
        let drained: Vec<T> = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            state.idle.drain(..).collect()
        };
        self.inner.available.notify_waiters();

        let total = drained.len();
        let mut failed = 0;
        for resource in drained {
            if let Err(e) = self.dispose(resource).await {
                error!("Error cleaning up resource: {}", e);
                failed += 1;
            }
        }

        debug!("Resource pool closed, cleaned up {} resources", total);
        if failed > 0 {
            return Err(ResourceError::Cleanup { failed, total });
        }
        Ok(())
    }

    /// Current pool counters.
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats {
            max_size: self.inner.config.max_size,
            min_size: self.inner.config.min_size,
            created_count: state.created,
            active_count: state.active,
            available_count: state.idle.len(),
            closed: state.closed,
        }
    }

    fn take_slot(&self) -> Result<Slot<T>, ResourceError> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(ResourceError::Closed);
        }
        if let Some(resource) = state.idle.pop_front() {
            state.active += 1;
            return Ok(Slot::Idle(resource));
        }
        if state.created < self.inner.config.max_size {
            state.created += 1;
            state.active += 1;
            return Ok(Slot::Grow);
        }
        Ok(Slot::Wait)
    }

    /// Run the factory for a slot already counted as created and active.
    fn create_checked_out(&self) -> Result<T, ResourceError> {
        match (self.inner.factory)() {
            Ok(resource) => {
                debug!("Created new resource (total: {})", self.inner.state.lock().created);
                Ok(resource)
            }
            Err(e) => {
                {
                    let mut state = self.inner.state.lock();
                    state.created -= 1;
                    state.active -= 1;
                }
                self.inner.available.notify_one();
                Err(ResourceError::factory(e.to_string()))
            }
        }
    }

    fn restock(&self, resources: Vec<T>) {
        let mut state = self.inner.state.lock();
        if state.closed {
            drop(state);
            for resource in resources {
                self.dispose_detached(resource);
            }
            return;
        }
        let count = resources.len();
        state.idle.extend(resources);
        drop(state);
        for _ in 0..count {
            self.inner.available.notify_one();
        }
    }

    async fn dispose(&self, resource: T) -> anyhow::Result<()> {
        match &self.inner.cleanup {
            Some(Cleanup::Sync(cleanup)) => cleanup(resource),
            Some(Cleanup::Async(cleanup)) => cleanup(resource).await,
            None => Ok(()),
        }
    }

    /// Dispose of a resource from a synchronous call site.
    fn dispose_detached(&self, resource: T) {
        match &self.inner.cleanup {
            Some(Cleanup::Sync(cleanup)) => {
                if let Err(e) = cleanup(resource) {
                    error!("Error cleaning up resource: {}", e);
                }
            }
            Some(Cleanup::Async(cleanup)) => match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let cleanup = cleanup(resource);
                    handle.spawn(async move {
                        if let Err(e) = cleanup.await {
                            error!("Error cleaning up resource: {}", e);
                        }
                    });
                }
                Err(_) => warn!("No async runtime available, dropping resource without cleanup"),
            },
            None => {}
        }
    }
}

impl<T: Send + 'static> fmt::Debug for ResourcePool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourcePool")
            .field("stats", &self.stats())
            .finish()
    }
}

/// A checked-out resource that goes back to its pool when dropped.
pub struct PooledResource<T: Send + 'static> {
    resource: Option<T>,
    pool: ResourcePool<T>,
}

impl<T: Send + 'static> Deref for PooledResource<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.resource
            .as_ref()
            .unwrap_or_else(|| unreachable!("resource is present until drop"))
    }
}

impl<T: Send + 'static> DerefMut for PooledResource<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.resource
            .as_mut()
            .unwrap_or_else(|| unreachable!("resource is present until drop"))
    }
}

impl<T: Send + 'static> Drop for PooledResource<T> {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            self.pool.release(resource);
        }
    }
}
