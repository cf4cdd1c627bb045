//! Shared configuration types for tunnel clients.

mod base;
mod console;
mod poll;
mod service;
mod writer;

pub use base::ValidationError;
pub use console::ConsoleConfig;
pub use poll::PollConfig;
pub use service::ServiceConfig;
pub use writer::{CommitConflictPolicy, DataFormat, DataFormatType, DataFormatVersion, WriterConfig};
