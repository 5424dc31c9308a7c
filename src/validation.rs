use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};
use url::Url;

use crate::{
    context::FlowCtx,
    error::{Error, ErrorCode, Result},
    handler::is_issued_by,
    request::{AccessRequest, AuthorizeRequest, GRANT_TYPE_AUTHORIZATION_CODE},
};

/// A precondition check run before any side-effecting handler.
///
/// Validators must not keep state between requests; one instance is shared
/// by every concurrent unit of work.
#[async_trait]
pub trait Validator<R>: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    async fn validate(&self, ctx: &FlowCtx, request: &R) -> Result<()>;
}

/// Ordered validators that stop at the first rejection.
pub struct ValidationChain<R> {
    validators: Vec<Arc<dyn Validator<R>>>,
}

impl<R> Default for ValidationChain<R> {
    fn default() -> Self {
        Self {
            validators: Vec::new(),
        }
    }
}

impl<R> Clone for ValidationChain<R> {
    fn clone(&self) -> Self {
        Self {
            validators: self.validators.clone(),
        }
    }
}

impl<R: Send + Sync> ValidationChain<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<V>(mut self, validator: V) -> Self
    where
        V: Validator<R> + 'static,
    {
        self.validators.push(Arc::new(validator));
        self
    }

    pub fn push(&mut self, validator: Arc<dyn Validator<R>>) {
        self.validators.push(validator);
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Run every validator in order. Typed rejections come back as
    /// validation-kind errors; anything else is left for failure mapping.
    pub async fn validate(&self, ctx: &FlowCtx, request: &R) -> Result<()> {
        for validator in &self.validators {
            debug!(
                "Request {} running validator {}",
                ctx.request_id(),
                validator.name()
            );
            if let Err(e) = ctx.step(validator.validate(ctx, request)).await {
                warn!(
                    "Request {} rejected by validator {}: {}",
                    ctx.request_id(),
                    validator.name(),
                    e
                );
                return Err(e.into_validation());
            }
        }
        Ok(())
    }
}

/// Rejects requests without a client id.
#[derive(Debug, Clone, Default)]
pub struct ClientIdValidator;

impl ClientIdValidator {
    fn check(client_id: &str) -> Result<()> {
        if client_id.trim().is_empty() {
            return Err(Error::validation(
                ErrorCode::InvalidClient,
                "client_id is required",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Validator<AuthorizeRequest> for ClientIdValidator {
    fn name(&self) -> &str {
        "client_id"
    }

    async fn validate(&self, _ctx: &FlowCtx, request: &AuthorizeRequest) -> Result<()> {
        Self::check(&request.client_id)
    }
}

#[async_trait]
impl Validator<AccessRequest> for ClientIdValidator {
    fn name(&self) -> &str {
        "client_id"
    }

    async fn validate(&self, _ctx: &FlowCtx, request: &AccessRequest) -> Result<()> {
        Self::check(&request.client_id)
    }
}

/// Requires an absolute redirect URI without a fragment.
#[derive(Debug, Clone, Default)]
pub struct RedirectUriValidator;

impl RedirectUriValidator {
    fn check(redirect_uri: &str) -> Result<()> {
        let url = Url::parse(redirect_uri).map_err(|e| {
            Error::invalid_request(format!("redirect_uri is not an absolute URI: {e}"))
        })?;
        if url.fragment().is_some() {
            return Err(Error::invalid_request(
                "redirect_uri must not contain a fragment",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Validator<AuthorizeRequest> for RedirectUriValidator {
    fn name(&self) -> &str {
        "redirect_uri"
    }

    async fn validate(&self, _ctx: &FlowCtx, request: &AuthorizeRequest) -> Result<()> {
        Self::check(&request.redirect_uri)
    }
}

#[async_trait]
impl Validator<AccessRequest> for RedirectUriValidator {
    fn name(&self) -> &str {
        "redirect_uri"
    }

    async fn validate(&self, _ctx: &FlowCtx, request: &AccessRequest) -> Result<()> {
        Self::check(&request.redirect_uri)
    }
}

/// Rejects response types this deployment does not support.
#[derive(Debug, Clone)]
pub struct ResponseTypeValidator {
    supported: BTreeSet<String>,
}

impl ResponseTypeValidator {
    pub fn new<I, S>(supported: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            supported: supported.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl Validator<AuthorizeRequest> for ResponseTypeValidator {
    fn name(&self) -> &str {
        "response_type"
    }

    async fn validate(&self, _ctx: &FlowCtx, request: &AuthorizeRequest) -> Result<()> {
        if let Some(unsupported) = request
            .response_types
            .iter()
            .find(|t| !self.supported.contains(*t))
        {
            return Err(Error::validation(
                ErrorCode::UnsupportedResponseType,
                format!("response_type '{unsupported}' is not supported"),
            ));
        }
        Ok(())
    }
}

/// Only the authorization code grant is accepted by this service.
#[derive(Debug, Clone, Default)]
pub struct GrantTypeValidator;

#[async_trait]
impl Validator<AccessRequest> for GrantTypeValidator {
    fn name(&self) -> &str {
        "grant_type"
    }

    async fn validate(&self, _ctx: &FlowCtx, request: &AccessRequest) -> Result<()> {
        if request.grant_type != GRANT_TYPE_AUTHORIZATION_CODE {
            return Err(Error::validation(
                ErrorCode::UnsupportedGrantType,
                format!("grant_type '{}' is not supported", request.grant_type),
            ));
        }
        Ok(())
    }
}

/// Rejects codes that were not issued by this service.
#[derive(Debug, Clone)]
pub struct ServiceCodeValidator {
    service_id: String,
}

impl ServiceCodeValidator {
    pub fn new(service_id: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
        }
    }
}

#[async_trait]
impl Validator<AccessRequest> for ServiceCodeValidator {
    fn name(&self) -> &str {
        "service_code"
    }

    async fn validate(&self, _ctx: &FlowCtx, request: &AccessRequest) -> Result<()> {
        if is_issued_by(&request.code, &self.service_id) {
            return Ok(());
        }
        Err(Error::validation(
            ErrorCode::InvalidGrant,
            "authorization code was not issued by this service",
        ))
    }
}
