//! Explicit composition of resilience policies around a handler.
//!
//! A [`HandlerPipeline`] is an ordered list of [`Policy`] values, outermost
//! first. `[Retry, Timeout]` retries calls that time out, while
//! `[Timeout, Retry]` bounds the whole retry loop by one deadline.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::warn;

use super::circuit_breaker::CircuitBreaker;
use super::retry::RetryExecutor;
use crate::core::error::{Error, Result};

/// A re-runnable async operation, borrowed for `'a`.
pub type Operation<'a, T> = dyn Fn() -> BoxFuture<'static, Result<T>> + Send + Sync + 'a;

/// One wrapping layer of a [`HandlerPipeline`].
#[derive(Debug, Clone)]
pub enum Policy {
    /// Fail with a `Timeout` error if the inner layers take longer.
    Timeout(Duration),
    /// Re-run the inner layers on retryable failures.
    Retry(RetryExecutor),
    /// Guard the inner layers with a shared circuit breaker.
    CircuitBreaker(Arc<CircuitBreaker>),
}

/// Ordered policy stack applied to every handler invocation.
#[derive(Debug, Clone, Default)]
pub struct HandlerPipeline {
    policies: Vec<Policy>,
}

impl HandlerPipeline {
    /// An empty pipeline that runs the operation directly.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a policy inside the ones already added.
    pub fn with(mut self, policy: Policy) -> Self {
        self.policies.push(policy);
        self
    }

    pub fn with_timeout(self, limit: Duration) -> Self {
        self.with(Policy::Timeout(limit))
    }

    pub fn with_retry(self, executor: RetryExecutor) -> Self {
        self.with(Policy::Retry(executor))
    }

    pub fn with_circuit_breaker(self, breaker: Arc<CircuitBreaker>) -> Self {
        self.with(Policy::CircuitBreaker(breaker))
    }

    pub fn policies(&self) -> &[Policy] {
        &self.policies
    }

    /// Run `operation` through every policy, outermost first.
    pub async fn execute<T, F>(&self, name: &str, operation: &F) -> Result<T>
    where
        T: Send + 'static,
        F: Fn() -> BoxFuture<'static, Result<T>> + Send + Sync,
    {
        let operation: &Operation<'_, T> = operation;
        self.layer(0, name, operation).await
    }

    fn layer<'a, T: Send + 'static>(
        &'a self,
        depth: usize,
        name: &'a str,
        operation: &'a Operation<'a, T>,
    ) -> BoxFuture<'a, Result<T>> {
        Box::pin(async move {
            match self.policies.get(depth) {
                None => operation().await,
                Some(Policy::Timeout(limit)) => {
                    match tokio::time::timeout(*limit, self.layer(depth + 1, name, operation)).await
                    {
                        Ok(result) => result,
                        Err(_) => {
                            warn!("Operation {} timed out after {:?}", name, limit);
                            Err(Error::timeout(name, *limit))
                        }
                    }
                }
                Some(Policy::Retry(executor)) => {
                    executor
                        .execute(name, || self.layer(depth + 1, name, operation))
                        .await
                }
                Some(Policy::CircuitBreaker(breaker)) => {
                    breaker
                        .call(|| self.layer(depth + 1, name, operation))
                        .await
                }
            }
        })
    }
}

/// Runs synchronous work on tokio's blocking pool so that pipeline
/// timeouts apply to it as well.
///
/// On timeout the caller gets its error immediately; the blocking work
/// itself runs to completion in the background.
pub struct BlockingTool<T> {
    work: Arc<dyn Fn() -> Result<T> + Send + Sync>,
}

impl<T: Send + 'static> BlockingTool<T> {
    pub fn new<F>(work: F) -> Self
    where
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        Self {
            work: Arc::new(work),
        }
    }

    /// Start one run of the work.
    pub fn run(&self) -> BoxFuture<'static, Result<T>> {
        let work = self.work.clone();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || work())
                .await
                .map_err(|e| Error::internal(format!("Blocking task failed: {e}")))?
        })
    }

    /// View as a pipeline operation.
    pub fn operation(&self) -> impl Fn() -> BoxFuture<'static, Result<T>> + Send + Sync + use<T> {
        let work = self.work.clone();
        move || BlockingTool { work: work.clone() }.run()
    }
}
