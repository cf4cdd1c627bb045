use serde::Deserialize;

use crate::shared::ValidationError;

/// Polling behavior of interactive sessions.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PollConfig {
    /// Delay between two consecutive status or result reads, in milliseconds.
    ///
    /// Default: 3000 (3 seconds)
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Name of the SQL task hosting an interactive session on its instance.
    ///
    /// Default: `console_sqlrt_task`
    #[serde(default = "default_task_name")]
    pub task_name: String,
}

impl PollConfig {
    /// Default poll interval: 3 seconds.
    pub const DEFAULT_INTERVAL_MS: u64 = 3_000;

    /// Default interactive task name.
    pub const DEFAULT_TASK_NAME: &'static str = "console_sqlrt_task";

    /// Validates the poll configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.interval_ms == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "poll.interval_ms".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.task_name.trim().is_empty() {
            return Err(ValidationError::EmptyField("poll.task_name".to_string()));
        }

        Ok(())
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            task_name: default_task_name(),
        }
    }
}

fn default_interval_ms() -> u64 {
    PollConfig::DEFAULT_INTERVAL_MS
}

fn default_task_name() -> String {
    PollConfig::DEFAULT_TASK_NAME.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PollConfig::default();
        assert_eq!(config.interval_ms, 3_000);
        assert_eq!(config.task_name, "console_sqlrt_task");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_interval() {
        let config = PollConfig {
            interval_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
