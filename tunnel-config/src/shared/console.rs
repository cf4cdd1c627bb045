use serde::Deserialize;

use crate::Config;
use crate::shared::{PollConfig, ServiceConfig, ValidationError, WriterConfig};

/// Complete configuration of the console binary.
#[derive(Clone, Debug, Deserialize)]
pub struct ConsoleConfig {
    pub service: ServiceConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub writer: WriterConfig,
}

impl ConsoleConfig {
    /// Validates every section of the configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.service.validate()?;
        self.poll.validate()?;

        Ok(())
    }
}

impl Config for ConsoleConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}
