//! Client-side protocol layer for a remote table service.
//!
//! Covers the batch read protocol (split listing and assignment), the batch write protocol
//! (block writers, commit messages and session commit) and interactive SQL sessions that are
//! polled for start-up and results. The service is reached through the traits in [`client`];
//! [`client::RestClient`] implements them over HTTP.

pub mod client;
pub mod concurrency;
pub mod error;
#[cfg(feature = "failpoints")]
pub mod failpoints;
pub mod interactive;
mod macros;
pub mod metrics;
pub mod read;
pub mod session;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
pub mod write;
