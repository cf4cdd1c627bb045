//! Concurrency helpers shared by the poll loops.
//!
//! The tunnel has no internal worker pool. The only coordination primitive it needs is the
//! [`shutdown`] channel, which lets a caller interrupt a task that is sleeping between two
//! polls of an interactive session.

pub mod shutdown;
