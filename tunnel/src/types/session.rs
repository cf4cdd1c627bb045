use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::TableIdentifier;

/// Identity of a table session, assigned by the service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Direction of a table session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionKind {
    BatchRead,
    BatchWrite,
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionKind::BatchRead => f.write_str("batch_read"),
            SessionKind::BatchWrite => f.write_str("batch_write"),
        }
    }
}

/// Lifecycle state of a table session as reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Created,
    Active,
    /// A write session whose blocks were finalized.
    Committed,
    Terminated,
    Failed,
    Cancelled,
}

impl SessionStatus {
    /// Returns `true` if the session accepts no further operations.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Committed
                | SessionStatus::Terminated
                | SessionStatus::Failed
                | SessionStatus::Cancelled
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStatus::Created => "created",
            SessionStatus::Active => "active",
            SessionStatus::Committed => "committed",
            SessionStatus::Terminated => "terminated",
            SessionStatus::Failed => "failed",
            SessionStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Immutable snapshot of a table session.
///
/// A snapshot never changes after it is fetched. Call `refresh` on the owning handle to obtain
/// a newer one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSession {
    pub id: SessionId,
    pub table: TableIdentifier,
    pub kind: SessionKind,
    pub status: SessionStatus,
    /// Diagnostic message attached by the service, usually on failure.
    pub message: Option<String>,
    /// Link to the service log view for this session.
    pub log_view: Option<String>,
}

/// Options for creating a batch write session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteSessionOptions {
    /// Replace the contents of the target instead of appending.
    pub overwrite: bool,
    /// Static partition written by every block, for example `dt=20240101`.
    pub partition: Option<String>,
}
