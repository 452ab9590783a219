//! Server lifecycle management.
//!
//! The [`LifecycleManager`] runs named startup hooks in ascending priority
//! order and shutdown hooks in descending priority order. A failing hook
//! is logged and recorded but never stops the remaining hooks from running.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Priority used when none is given. Lower runs earlier at startup.
pub const DEFAULT_HOOK_PRIORITY: i32 = 100;

type SyncHookFn = Box<dyn Fn() -> anyhow::Result<()> + Send + Sync>;
type AsyncHookFn = Box<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// The work a hook performs.
pub enum HookAction {
    Sync(SyncHookFn),
    Async(AsyncHookFn),
}

impl HookAction {
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::Sync(Box::new(f))
    }

    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::Async(Box::new(move || Box::pin(f())))
    }
}

impl fmt::Debug for HookAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync(_) => f.write_str("Sync(..)"),
            Self::Async(_) => f.write_str("Async(..)"),
        }
    }
}

#[derive(Debug, Default)]
struct HookRun {
    executed: bool,
    execution_time: Option<Duration>,
    error: Option<String>,
}

/// A registered lifecycle hook.
#[derive(Debug)]
struct Hook {
    name: String,
    priority: i32,
    action: HookAction,
    run: Mutex<HookRun>,
}

impl Hook {
    async fn execute(&self) -> anyhow::Result<()> {
        let started = Instant::now();
        let result = match &self.action {
            HookAction::Sync(f) => f(),
            HookAction::Async(f) => f().await,
        };
        let elapsed = started.elapsed();

        let mut run = self.run.lock();
        run.execution_time = Some(elapsed);
        match &result {
            Ok(()) => {
                run.executed = true;
                run.error = None;
                debug!(
                    "Lifecycle hook '{}' executed successfully in {:.3}s",
                    self.name,
                    elapsed.as_secs_f64()
                );
            }
            Err(e) => {
                run.error = Some(format!("{e:#}"));
                error!(
                    "Lifecycle hook '{}' failed after {:.3}s: {:#}",
                    self.name,
                    elapsed.as_secs_f64(),
                    e
                );
            }
        }
        result
    }

    fn status(&self) -> HookStatus {
        let run = self.run.lock();
        HookStatus {
            name: self.name.clone(),
            priority: self.priority,
            executed: run.executed,
            execution_time: run.execution_time.map(|d| d.as_secs_f64()),
            error: run.error.clone(),
        }
    }
}

/// Introspection record for one hook.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HookStatus {
    pub name: String,
    pub priority: i32,
    pub executed: bool,
    /// Seconds the last run took.
    pub execution_time: Option<f64>,
    pub error: Option<String>,
}

/// Lifecycle phase. Phases only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    NotStarted,
    Starting,
    Started,
    ShuttingDown,
    ShutDown,
}

/// Health summary of the lifecycle.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub started: bool,
    pub shutting_down: bool,
    pub uptime_seconds: Option<f64>,
    pub startup_hooks_count: usize,
    pub shutdown_hooks_count: usize,
    pub startup_hooks_executed: usize,
    pub startup_hooks_failed: usize,
}

#[derive(Debug)]
struct State {
    phase: Phase,
    started_at: Option<Instant>,
}

/// Sequences startup and shutdown hooks around the process lifetime.
#[derive(Debug)]
pub struct LifecycleManager {
    startup_hooks: Mutex<Vec<Arc<Hook>>>,
    shutdown_hooks: Mutex<Vec<Arc<Hook>>>,
    state: Mutex<State>,
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self {
            startup_hooks: Mutex::new(Vec::new()),
            shutdown_hooks: Mutex::new(Vec::new()),
            state: Mutex::new(State {
                phase: Phase::NotStarted,
                started_at: None,
            }),
        }
    }

    /// Register a startup hook. Hooks with equal priority keep their
    /// registration order.
    pub fn register_startup_hook(&self, name: impl Into<String>, priority: i32, action: HookAction) {
        let name = name.into();
        debug!("Registered startup hook '{}' with priority {}", name, priority);
        insert_sorted(&self.startup_hooks, name, priority, action);
    }

    /// Register a shutdown hook. Shutdown runs hooks from the highest
    /// priority value down to the lowest.
    pub fn register_shutdown_hook(&self, name: impl Into<String>, priority: i32, action: HookAction) {
        let name = name.into();
        debug!("Registered shutdown hook '{}' with priority {}", name, priority);
        insert_sorted(&self.shutdown_hooks, name, priority, action);
    }

    pub fn on_startup<F>(&self, name: impl Into<String>, priority: i32, f: F)
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register_startup_hook(name, priority, HookAction::sync(f));
    }

    pub fn on_startup_async<F, Fut>(&self, name: impl Into<String>, priority: i32, f: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register_startup_hook(name, priority, HookAction::from_async(f));
    }

    pub fn on_shutdown<F>(&self, name: impl Into<String>, priority: i32, f: F)
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register_shutdown_hook(name, priority, HookAction::sync(f));
    }

    pub fn on_shutdown_async<F, Fut>(&self, name: impl Into<String>, priority: i32, f: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register_shutdown_hook(name, priority, HookAction::from_async(f));
    }

    pub fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    /// Run every startup hook in ascending priority order.
    ///
    /// Hook failures are logged as critical and recorded in the hook status;
    /// the lifecycle still reaches `Started`. Calling this a second time is
    /// a no-op.
    pub async fn startup(&self) {
        let started_at = {
            let mut state = self.state.lock();
            match state.phase {
                Phase::NotStarted => {}
                Phase::Starting | Phase::Started => {
                    warn!("Startup already executed, skipping");
                    return;
                }
                Phase::ShuttingDown | Phase::ShutDown => {
                    warn!("Startup called after shutdown, skipping");
                    return;
                }
            }
            let now = Instant::now();
            state.phase = Phase::Starting;
            state.started_at = Some(now);
            now
        };

        info!("Starting server lifecycle...");
        let hooks = self.startup_hooks.lock().clone();
        for hook in &hooks {
            if let Err(e) = hook.execute().await {
                error!(
                    "CRITICAL: startup hook '{}' failed, continuing with other hooks: {:#}",
                    hook.name, e
                );
            }
        }

        self.state.lock().phase = Phase::Started;
        info!(
            "Server lifecycle started in {:.3}s ({} hooks run)",
            started_at.elapsed().as_secs_f64(),
            hooks.len()
        );
    }

    /// Run every shutdown hook in descending priority order.
    ///
    /// Only runs once, and only after `startup`. Failures are logged and
    /// swallowed.
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.lock();
            match state.phase {
                Phase::Started => state.phase = Phase::ShuttingDown,
                Phase::ShuttingDown | Phase::ShutDown => {
                    warn!("Shutdown already in progress, skipping");
                    return;
                }
                Phase::NotStarted | Phase::Starting => {
                    warn!("Shutdown called but server was never started");
                    return;
                }
            }
        }

        info!("Shutting down server lifecycle...");
        let shutdown_started = Instant::now();
        let hooks = self.shutdown_hooks.lock().clone();
        for hook in hooks.iter().rev() {
            if let Err(e) = hook.execute().await {
                error!(
                    "Shutdown hook '{}' failed, continuing with other hooks: {:#}",
                    hook.name, e
                );
            }
        }

        self.state.lock().phase = Phase::ShutDown;
        info!(
            "Server lifecycle shutdown completed in {:.3}s ({} hooks run)",
            shutdown_started.elapsed().as_secs_f64(),
            hooks.len()
        );
    }

    /// Healthy once started and until shutdown begins.
    pub fn is_healthy(&self) -> bool {
        self.phase() == Phase::Started
    }

    pub fn health_status(&self) -> HealthStatus {
        let (phase, started_at) = {
            let state = self.state.lock();
            (state.phase, state.started_at)
        };
        let startup = self.get_startup_hooks_status();
        HealthStatus {
            healthy: phase == Phase::Started,
            started: phase >= Phase::Started,
            shutting_down: phase >= Phase::ShuttingDown,
            uptime_seconds: started_at.map(|at| at.elapsed().as_secs_f64()),
            startup_hooks_count: startup.len(),
            shutdown_hooks_count: self.shutdown_hooks.lock().len(),
            startup_hooks_executed: startup.iter().filter(|h| h.executed).count(),
            startup_hooks_failed: startup.iter().filter(|h| h.error.is_some()).count(),
        }
    }

    /// Status of startup hooks in execution order.
    pub fn get_startup_hooks_status(&self) -> Vec<HookStatus> {
        self.startup_hooks.lock().iter().map(|h| h.status()).collect()
    }

    /// Status of shutdown hooks in ascending priority order.
    pub fn get_shutdown_hooks_status(&self) -> Vec<HookStatus> {
        self.shutdown_hooks.lock().iter().map(|h| h.status()).collect()
    }
}

fn insert_sorted(hooks: &Mutex<Vec<Arc<Hook>>>, name: String, priority: i32, action: HookAction) {
    let mut hooks = hooks.lock();
    hooks.push(Arc::new(Hook {
        name,
        priority,
        action,
        run: Mutex::new(HookRun::default()),
    }));
    hooks.sort_by_key(|h| h.priority);
}
