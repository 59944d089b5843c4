//! Generated Protocol Buffer code for the enforcer's external authorization API.
//!
//! The messages are the subset of Envoy's `envoy.service.auth.v3` API that the
//! enforcer reads and writes. Field numbers follow Envoy so that a stock
//! `ext_authz` HTTP filter can call the enforcer directly.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)] // Generated code has various doc formatting
#![allow(clippy::default_trait_access)]
#![allow(clippy::too_many_lines)]

// Re-export prost traits for convenience
pub use prost::Message;

pub mod ext_authz {
    //! `envoy.service.auth.v3` Check service and messages
    tonic::include_proto!("envoy.service.auth.v3");
}
