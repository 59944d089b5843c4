//! Common utilities shared across the enforcer workspace.

#![warn(clippy::pedantic)]

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for compact JWT helpers (shape checks, segment decoding, time checks)
pub mod jwt;
