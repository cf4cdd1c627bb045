use std::fmt;

use serde::{Deserialize, Serialize};

/// Encoding family of the bytes streamed for a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataFormatType {
    /// Columnar record batches.
    Arrow,
    /// Row-oriented records.
    Record,
}

impl DataFormatType {
    /// Returns the wire name sent in the block open request.
    pub fn as_str(&self) -> &'static str {
        match self {
            DataFormatType::Arrow => "ARROW",
            DataFormatType::Record => "RECORD",
        }
    }
}

impl fmt::Display for DataFormatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Version of the block data encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataFormatVersion {
    V1,
}

impl DataFormatVersion {
    /// Returns the wire name sent in the block open request.
    pub fn as_str(&self) -> &'static str {
        match self {
            DataFormatVersion::V1 => "V1",
        }
    }
}

impl fmt::Display for DataFormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Data format announced when a block stream is opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFormat {
    #[serde(rename = "type")]
    pub kind: DataFormatType,
    pub version: DataFormatVersion,
}

impl Default for DataFormat {
    fn default() -> Self {
        Self {
            kind: DataFormatType::Arrow,
            version: DataFormatVersion::V1,
        }
    }
}

/// How the commit coordinator treats two attempts of the same block that both
/// produced a commit message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitConflictPolicy {
    /// Refuse to finalize until the caller picks the authoritative attempt.
    #[default]
    Reject,
    /// The highest attempt number is authoritative.
    LatestAttemptWins,
}

/// Write path configuration.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WriterConfig {
    #[serde(default)]
    pub data_format: DataFormat,
    #[serde(default)]
    pub commit_conflict_policy: CommitConflictPolicy,
}
