//! Common types used throughout the tunnel client.
//!
//! Tables, table sessions, splits, blocks and commit messages on the batch side, and
//! instances, task statuses and sub-query payloads on the interactive side.

mod block;
mod instance;
mod session;
mod split;
mod table;

pub use block::*;
pub use instance::*;
pub use session::*;
pub use split::*;
pub use table::*;

// Re-exports.
pub use tunnel_config::shared::{DataFormat, DataFormatType, DataFormatVersion};
