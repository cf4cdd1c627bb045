use std::collections::BTreeMap;
use std::time::Duration;

use crate::bail;
use crate::error::{ErrorKind, TunnelResult};

pub const SESSION_NAME_HINT: &str = "odps.sql.session.name";
pub const WORKER_COUNT_HINT: &str = "odps.sql.session.worker.count";
pub const WORKER_MEMORY_HINT: &str = "odps.sql.session.worker.memory";
pub const WORKER_SPARE_SPAN_HINT: &str = "odps.sql.session.worker.sparespan";
/// Names the running session an attached session shares.
pub const SHARE_ID_HINT: &str = "odps.sql.session.share.id";
pub const SUBMIT_MODE_HINT: &str = "odps.sql.submit.mode";
pub const SCRIPT_SUBMIT_MODE: &str = "script";

/// Options for creating an interactive session.
///
/// Unset fields fall back to the coordinator configuration: the default project and the
/// configured task name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InteractiveSessionOptions {
    pub session_name: Option<String>,
    pub project: Option<String>,
    pub worker_count: Option<u32>,
    /// Memory per worker, in MB.
    pub worker_memory_mb: Option<u32>,
    pub worker_spare_span: Option<String>,
    pub priority: Option<u32>,
    pub running_cluster: Option<String>,
    /// Task settings sent with the session. Never modified by the client.
    pub settings: BTreeMap<String, String>,
    pub task_name: Option<String>,
    /// Waits for the session to start after creating it. Zero waits without a deadline.
    pub start_timeout: Option<Duration>,
    pub(crate) share_id: Option<String>,
}

impl InteractiveSessionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session_name(mut self, session_name: impl Into<String>) -> Self {
        self.session_name = Some(session_name.into());
        self
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn with_workers(mut self, worker_count: u32, worker_memory_mb: u32) -> Self {
        self.worker_count = Some(worker_count);
        self.worker_memory_mb = Some(worker_memory_mb);
        self
    }

    pub fn with_worker_spare_span(mut self, spare_span: impl Into<String>) -> Self {
        self.worker_spare_span = Some(spare_span.into());
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_running_cluster(mut self, running_cluster: impl Into<String>) -> Self {
        self.running_cluster = Some(running_cluster.into());
        self
    }

    pub fn with_settings(mut self, settings: BTreeMap<String, String>) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_task_name(mut self, task_name: impl Into<String>) -> Self {
        self.task_name = Some(task_name.into());
        self
    }

    pub fn with_start_timeout(mut self, start_timeout: Duration) -> Self {
        self.start_timeout = Some(start_timeout);
        self
    }

    /// Options attaching to the running session `session_name`.
    ///
    /// `task_name` names the attaching task; `None` uses the configured default.
    pub(crate) fn attach(
        session_name: &str,
        settings: BTreeMap<String, String>,
        start_timeout: Option<Duration>,
        task_name: Option<String>,
    ) -> TunnelResult<Self> {
        if session_name.is_empty() {
            bail!(
                ErrorKind::ValidationError,
                "Session name can not be empty"
            );
        }

        Ok(Self {
            settings,
            start_timeout,
            task_name,
            share_id: Some(session_name.to_string()),
            ..Self::default()
        })
    }

    pub(crate) fn validate(&self) -> TunnelResult<()> {
        if let Some(project) = &self.project {
            if project.trim().is_empty() {
                bail!(
                    ErrorKind::ValidationError,
                    "Project name can not be empty"
                );
            }
        }

        if let Some(task_name) = &self.task_name {
            if task_name.trim().is_empty() {
                bail!(ErrorKind::ValidationError, "Task name can not be empty");
            }
        }

        Ok(())
    }

    /// Name shown in logs and errors: the session name, or the shared session for attaches.
    pub(crate) fn display_name(&self) -> Option<String> {
        self.session_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .or(self.share_id.as_deref())
            .map(str::to_string)
    }

    /// Builds the settings sent with the task.
    ///
    /// Starts from the caller settings, adds the session hints and forces the script submit
    /// mode. The caller map is left untouched.
    pub(crate) fn task_settings(&self) -> BTreeMap<String, String> {
        let mut settings = self.settings.clone();

        if let Some(spare_span) = &self.worker_spare_span {
            if !spare_span.is_empty() {
                settings.insert(WORKER_SPARE_SPAN_HINT.to_string(), spare_span.clone());
            }
        }

        if let Some(name) = &self.session_name {
            if !name.is_empty() {
                settings.insert(SESSION_NAME_HINT.to_string(), name.trim().to_string());
            }
        }

        if let Some(worker_count) = self.worker_count {
            settings.insert(WORKER_COUNT_HINT.to_string(), worker_count.to_string());
        }

        if let Some(worker_memory_mb) = self.worker_memory_mb {
            settings.insert(WORKER_MEMORY_HINT.to_string(), worker_memory_mb.to_string());
        }

        if let Some(share_id) = &self.share_id {
            settings.insert(SHARE_ID_HINT.to_string(), share_id.clone());
        }

        settings.insert(SUBMIT_MODE_HINT.to_string(), SCRIPT_SUBMIT_MODE.to_string());

        settings
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_json_snapshot;

    use super::*;

    #[test]
    fn task_settings_add_hints_and_force_script_mode() {
        let caller = BTreeMap::from([
            ("odps.sql.submit.mode".to_string(), "interactive".to_string()),
            ("odps.sql.timezone".to_string(), "UTC".to_string()),
        ]);
        let options = InteractiveSessionOptions::new()
            .with_session_name("  s1 ")
            .with_workers(4, 2048)
            .with_worker_spare_span("0-6")
            .with_settings(caller.clone());

        assert_json_snapshot!(options.task_settings(), @r#"
        {
          "odps.sql.session.name": "s1",
          "odps.sql.session.worker.count": "4",
          "odps.sql.session.worker.memory": "2048",
          "odps.sql.session.worker.sparespan": "0-6",
          "odps.sql.submit.mode": "script",
          "odps.sql.timezone": "UTC"
        }
        "#);
        assert_eq!(options.settings, caller);
    }

    #[test]
    fn attach_shares_the_named_session() {
        let options = InteractiveSessionOptions::attach("s1", BTreeMap::new(), None, None).unwrap();
        let settings = options.task_settings();

        assert_eq!(settings.get(SHARE_ID_HINT).map(String::as_str), Some("s1"));
        assert!(!settings.contains_key(SESSION_NAME_HINT));
        assert_eq!(options.display_name().as_deref(), Some("s1"));
    }

    #[test]
    fn attach_requires_a_name() {
        let err = InteractiveSessionOptions::attach("", BTreeMap::new(), None, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
    }

    #[test]
    fn blank_project_is_rejected() {
        let err = InteractiveSessionOptions::new()
            .with_project("  ")
            .validate()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);

        assert!(InteractiveSessionOptions::new().validate().is_ok());
    }
}
