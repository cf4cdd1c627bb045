use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a service instance hosting an interactive session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId {
    project: String,
    id: String,
}

impl InstanceId {
    pub fn new(project: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            id: id.into(),
        }
    }

    /// Project owning the instance.
    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn as_str(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// Status code carried by interactive session payloads.
///
/// Codes other than the four known ones are service-internal launch phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum ObjectStatus {
    Running,
    Failed,
    Terminated,
    Cancelled,
    Other(i32),
}

impl ObjectStatus {
    pub const RUNNING_CODE: i32 = 2;
    pub const FAILED_CODE: i32 = 4;
    pub const TERMINATED_CODE: i32 = 5;
    pub const CANCELLED_CODE: i32 = 6;

    pub fn code(&self) -> i32 {
        match self {
            ObjectStatus::Running => Self::RUNNING_CODE,
            ObjectStatus::Failed => Self::FAILED_CODE,
            ObjectStatus::Terminated => Self::TERMINATED_CODE,
            ObjectStatus::Cancelled => Self::CANCELLED_CODE,
            ObjectStatus::Other(code) => *code,
        }
    }
}

impl From<i32> for ObjectStatus {
    fn from(code: i32) -> Self {
        match code {
            Self::RUNNING_CODE => ObjectStatus::Running,
            Self::FAILED_CODE => ObjectStatus::Failed,
            Self::TERMINATED_CODE => ObjectStatus::Terminated,
            Self::CANCELLED_CODE => ObjectStatus::Cancelled,
            other => ObjectStatus::Other(other),
        }
    }
}

impl From<ObjectStatus> for i32 {
    fn from(status: ObjectStatus) -> Self {
        status.code()
    }
}

impl fmt::Display for ObjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectStatus::Running => f.write_str("running"),
            ObjectStatus::Failed => f.write_str("failed"),
            ObjectStatus::Terminated => f.write_str("terminated"),
            ObjectStatus::Cancelled => f.write_str("cancelled"),
            ObjectStatus::Other(code) => write!(f, "status {code}"),
        }
    }
}

/// Payload read from a task info channel of an interactive session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubQueryResponse {
    #[serde(default)]
    pub status: Option<ObjectStatus>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub warnings: Option<String>,
    #[serde(default)]
    pub sub_query_id: Option<i64>,
}

impl SubQueryResponse {
    /// Returns the result text if it is present and non-empty.
    pub fn non_empty_result(&self) -> Option<&str> {
        self.result.as_deref().filter(|result| !result.is_empty())
    }
}

/// Launch progress of the workers of an interactive session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProgress {
    #[serde(default)]
    pub total_worker_count: u32,
    #[serde(default)]
    pub launched_worker_count: u32,
    #[serde(default)]
    pub launched_percentage: u32,
}

/// Run state of the task that hosts an interactive session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Waiting,
    Running,
    Success,
    Failed,
    Suspended,
    Cancelled,
}

impl TaskStatus {
    /// Returns `true` once the task will never run again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Success | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::Waiting => "WAITING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Success => "SUCCESS",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Suspended => "SUSPENDED",
            TaskStatus::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}

/// Request to create an instance running an interactive SQL task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceRequest {
    pub project: String,
    pub task_name: String,
    /// Task settings, serialized as a JSON object into the task's `settings` property.
    pub settings: BTreeMap<String, String>,
    pub priority: Option<u32>,
    pub running_cluster: Option<String>,
}
