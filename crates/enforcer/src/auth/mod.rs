//! Token authentication.
//!
//! - [`token`] - compact token decoding
//! - [`jwks`] - JWKS key resolution
//! - [`validator`] - signature and claim validation
//! - [`authenticator`] - the authenticator capability
//! - [`jwt_authenticator`] - bearer JWT authentication with caching,
//!   revocation, subscription and scope checks

pub mod authenticator;
pub mod jwks;
pub mod jwt_authenticator;
pub mod token;
pub mod validator;

pub use authenticator::{AuthenticationContext, Authenticator, DEFAULT_KEY_TYPE};
pub use jwt_authenticator::JwtAuthenticator;
pub use token::SignedToken;
pub use validator::{JwtValidator, TokenValidator, ValidationResult};
