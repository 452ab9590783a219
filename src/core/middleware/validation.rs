//! Per-method request validation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use super::{Middleware, Request};
use crate::core::error::{Error, Result};

/// Checks a request, returning a reason on failure.
pub type Validator = Arc<dyn Fn(&Request) -> std::result::Result<(), String> + Send + Sync>;

/// Validator requiring `arguments` to be an object containing `fields`.
pub fn required_fields<I, S>(fields: I) -> Validator
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
    Arc::new(move |request: &Request| {
        let Some(args) = request.arguments.as_object() else {
            return Err("arguments must be an object".to_string());
        };
        let missing: Vec<&str> = fields
            .iter()
            .filter(|f| !args.contains_key(f.as_str()))
            .map(String::as_str)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(format!("missing required field(s): {}", missing.join(", ")))
        }
    })
}

/// Runs the validator registered for the request's method, if any.
#[derive(Default)]
pub struct ValidationMiddleware {
    validators: RwLock<HashMap<String, Validator>>,
}

impl ValidationMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the validator for `method`.
    pub fn add_validator(&self, method: impl Into<String>, validator: Validator) {
        let method = method.into();
        debug!("Registered validator for '{}'", method);
        self.validators.write().insert(method, validator);
    }

    pub fn with_validator(self, method: impl Into<String>, validator: Validator) -> Self {
        self.add_validator(method, validator);
        self
    }
}

#[async_trait]
impl Middleware for ValidationMiddleware {
    fn name(&self) -> &str {
        "validation"
    }

    async fn process_request(&self, request: Request) -> Result<Request> {
        let validator = self.validators.read().get(&request.method).cloned();
        if let Some(validator) = validator {
            validator(&request).map_err(|reason| {
                Error::validation(format!("Validation failed for method {}: {}", request.method, reason))
            })?;
        }
        Ok(request)
    }
}

impl std::fmt::Debug for ValidationMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let methods: Vec<String> = self.validators.read().keys().cloned().collect();
        f.debug_struct("ValidationMiddleware")
            .field("methods", &methods)
            .finish()
    }
}
