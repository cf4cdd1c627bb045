//! Utilities for testing code built on the tunnel client.
//!
//! [`memory::MemoryTableService`] implements every client trait in memory with scripted
//! responses, so read, write and interactive flows can be exercised without a service.

#[cfg(feature = "failpoints")]
pub mod failpoints;
pub mod memory;
