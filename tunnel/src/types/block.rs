use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{DataFormat, SessionId, TableIdentifier};

/// Caller-assigned number of a write block.
pub type BlockNumber = u64;

/// Retry identity of a block.
///
/// The attempt number grows each time the owner retries the same block number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WriterAttemptId(u32);

impl WriterAttemptId {
    pub fn new(attempt_number: u32) -> Self {
        Self(attempt_number)
    }

    pub fn attempt_number(&self) -> u32 {
        self.0
    }

    /// Returns the attempt id to use when retrying the same block.
    pub fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for WriterAttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque proof that the service fully received one attempt of one block.
///
/// Commit messages are immutable and serializable so workers can ship them to whichever
/// process finalizes the session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommitMessage {
    block_number: BlockNumber,
    attempt: WriterAttemptId,
    token: String,
}

impl CommitMessage {
    pub fn new(block_number: BlockNumber, attempt: WriterAttemptId, token: impl Into<String>) -> Self {
        Self {
            block_number,
            attempt,
            token: token.into(),
        }
    }

    pub fn block_number(&self) -> BlockNumber {
        self.block_number
    }

    pub fn attempt(&self) -> WriterAttemptId {
        self.attempt
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

/// Parameters of a block stream open request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockOpenRequest {
    pub table: TableIdentifier,
    pub session_id: SessionId,
    pub block_number: BlockNumber,
    pub attempt: WriterAttemptId,
    pub data_format: DataFormat,
}
