//! Authenticator capability.
//!
//! An API pipeline holds a set of authenticators and uses the first one, in
//! ascending priority order, whose [`Authenticator::can_authenticate`] accepts
//! the request. New credential types plug in by implementing the trait.

use async_trait::async_trait;

use crate::api::RequestContext;
use crate::errors::AuthError;

/// Key type used when a token does not carry one.
pub const DEFAULT_KEY_TYPE: &str = "PRODUCTION";

/// Result of a successful authentication. Never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationContext {
    pub token_id: String,
    pub authenticated: bool,
    pub key_type: String,
    pub consumer_key: Option<String>,
    pub username: Option<String>,
    pub issuer: String,
    /// API-level subscription tier, when resolved.
    pub tier: Option<String>,
    /// Token forwarded to the backend, when one is generated.
    pub end_user_token: Option<String>,
}

/// A credential type the enforcer can verify.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Short name for logs and metrics.
    fn name(&self) -> &'static str;

    /// Lower values are tried first.
    fn priority(&self) -> i32;

    /// Whether the request carries a credential of this type.
    fn can_authenticate(&self, request: &RequestContext) -> bool;

    /// Verify the request's credential.
    ///
    /// # Errors
    ///
    /// Any [`AuthError`]; the pipeline turns it into a deny response.
    async fn authenticate(
        &self,
        request: &mut RequestContext,
    ) -> Result<AuthenticationContext, AuthError>;
}
