//! Clients for the remote table service.
//!
//! The traits in this module describe the service operations the protocol layer needs. The
//! [`rest`] module implements them over HTTP; tests use the in-memory service from the test
//! utilities.

mod base;
pub mod rest;

pub use base::*;
pub use rest::RestClient;
