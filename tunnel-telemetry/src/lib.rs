//! Telemetry setup shared by tunnel binaries and tests.

pub mod tracing;
