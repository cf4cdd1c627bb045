//! Batch write protocol.
//!
//! Data is written in blocks. Each [`BlockWriter`] streams one attempt of one block and yields a
//! commit message once the service has acknowledged the whole block. A [`CommitCoordinator`]
//! collects the messages of every block and finalizes the write session in a single call.

pub mod codec;
pub mod commit;
pub mod writer;

pub use codec::{BatchCodec, EncodedBatch, JsonLinesCodec, RawBatchCodec};
pub use commit::CommitCoordinator;
pub use writer::{BlockWriter, WriterMetrics, WriterPhase};
