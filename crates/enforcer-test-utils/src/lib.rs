//! # Enforcer Test Utilities
//!
//! Shared test utilities for the enforcer.
//!
//! This crate provides:
//! - Deterministic crypto fixtures (Ed25519 keys, PEM and JWK export)
//! - Test data builders (`TestTokenBuilder`)
//! - Test doubles (`MockKeyManager`, `CountingValidator`)
//! - Issuer, API and context fixtures
//!
//! ## Usage
//!
//! ```rust,ignore
//! use enforcer_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let keypair = TestKeypair::new(1, "key-1");
//!     let key_manager = Arc::new(MockKeyManager::authorizing());
//!     let context = test_context(
//!         TrustedIssuerRegistry::new([test_issuer(&keypair)]),
//!         key_manager.clone(),
//!     );
//!     let token = keypair.sign(&TestTokenBuilder::new().build());
//! }
//! ```

pub mod crypto_fixtures;
pub mod fixtures;
pub mod mocks;
pub mod token_builders;

// Re-export commonly used items
pub use crypto_fixtures::*;
pub use fixtures::*;
pub use mocks::*;
pub use token_builders::*;
