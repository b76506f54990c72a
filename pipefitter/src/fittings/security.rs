//! Security requirement evaluation.
//!
//! Requirement objects are OR-ed; schemes within one object are AND-ed.
//! Every failure surfaces as a 403 with code `server_error`.

use super::{Fitting, FittingDef, FittingResult, PipelineRuntime};
use crate::context::{Context, NativeRequest};
use crate::contract::{ApiContract, SecurityRequirement, SecurityScheme};
use crate::errors::{FailureKind, FittingError, PipeConfigError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Registered factory name.
pub const NAME: &str = "swagger_security";

const DENIED_STATUS: u16 = 403;
const DENIED_CODE: &str = "server_error";

/// Decides whether a request satisfies one security scheme.
#[async_trait]
pub trait SecurityHandler: Send + Sync {
    /// Returns an error describing the denial.
    async fn authorize(
        &self,
        request: &NativeRequest,
        scheme: &SecurityScheme,
        scopes: &[String],
    ) -> anyhow::Result<()>;
}

#[async_trait]
impl<F> SecurityHandler for F
where
    F: Fn(&NativeRequest, &SecurityScheme, &[String]) -> anyhow::Result<()> + Send + Sync,
{
    async fn authorize(
        &self,
        request: &NativeRequest,
        scheme: &SecurityScheme,
        scopes: &[String],
    ) -> anyhow::Result<()> {
        self(request, scheme, scopes)
    }
}

/// Security handlers keyed by scheme name.
#[derive(Clone, Default)]
pub struct SecurityHandlers {
    handlers: BTreeMap<String, Arc<dyn SecurityHandler>>,
}

impl SecurityHandlers {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for a scheme.
    #[must_use]
    pub fn with_handler(mut self, scheme: impl Into<String>, handler: impl SecurityHandler + 'static) -> Self {
        self.insert(scheme, handler);
        self
    }

    /// Registers a handler for a scheme.
    pub fn insert(&mut self, scheme: impl Into<String>, handler: impl SecurityHandler + 'static) {
        self.handlers.insert(scheme.into(), Arc::new(handler));
    }

    /// Looks up a handler.
    #[must_use]
    pub fn get(&self, scheme: &str) -> Option<&Arc<dyn SecurityHandler>> {
        self.handlers.get(scheme)
    }
}

impl fmt::Debug for SecurityHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}

/// Factory for [`SecurityFitting`].
pub fn create(def: &FittingDef, runtime: &PipelineRuntime) -> Result<Arc<dyn Fitting>, PipeConfigError> {
    Ok(Arc::new(SecurityFitting {
        name: def.name.clone(),
        contract: runtime.contract.clone(),
        handlers: runtime.security_handlers.clone(),
    }))
}

/// Checks the matched operation's security requirements.
#[derive(Debug)]
pub struct SecurityFitting {
    name: String,
    contract: Arc<ApiContract>,
    handlers: Arc<SecurityHandlers>,
}

impl SecurityFitting {
    async fn check_requirement(
        &self,
        request: &NativeRequest,
        requirement: &SecurityRequirement,
    ) -> Result<(), FittingError> {
        for (scheme_name, scopes) in requirement {
            let handler = self
                .handlers
                .get(scheme_name)
                .ok_or_else(|| denied(format!("Unknown security handler: {scheme_name}")))?;
            let scheme = self
                .contract
                .security_scheme(scheme_name)
                .ok_or_else(|| denied(format!("Unknown security definition: {scheme_name}")))?;

            handler
                .authorize(request, scheme, scopes)
                .await
                .map_err(|e| denied(e.to_string()))?;
        }
        Ok(())
    }
}

fn denied(message: String) -> FittingError {
    FittingError::new(FailureKind::Validation, message)
        .with_status(DENIED_STATUS)
        .with_code(DENIED_CODE)
}

#[async_trait]
impl Fitting for SecurityFitting {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, ctx: &mut Context) -> FittingResult {
        let Some(operation) = ctx.request.operation().cloned() else {
            return Ok(ctx.output.take());
        };
        if operation.security.is_empty() {
            return Ok(ctx.output.take());
        }

        let mut last_denial = None;
        for requirement in &operation.security {
            match self.check_requirement(&ctx.request, requirement).await {
                Ok(()) => return Ok(ctx.output.take()),
                Err(err) => {
                    debug!(error = %err, "security requirement not met");
                    last_denial = Some(err);
                }
            }
        }
        Err(last_denial.unwrap_or_else(|| denied("Access denied".to_string())))
    }
}
