use secrecy::SecretString;
use serde::Deserialize;

use crate::shared::ValidationError;

/// Connection settings for the remote table service.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ServiceConfig {
    /// Base URL of the service REST API, for example `https://service.example.com/api`.
    pub endpoint: String,
    /// Project used when a call does not name one explicitly.
    pub project: String,
    /// Schema used when a table identifier does not name one explicitly.
    #[serde(default = "default_schema")]
    pub schema: String,
    /// Bearer token attached to every request, if the deployment requires one.
    #[serde(default)]
    pub access_token: Option<SecretString>,
    /// Timeout applied to request-response round trips, in milliseconds.
    ///
    /// Streaming block uploads are not bound by this timeout.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Host of the log view UI used to build diagnostic links for instances.
    #[serde(default)]
    pub log_view_host: Option<String>,
}

impl ServiceConfig {
    /// Default schema name.
    pub const DEFAULT_SCHEMA: &'static str = "default";

    /// Default request timeout: 60 seconds.
    pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 60_000;

    /// Creates a configuration for `endpoint` and `project` with defaults elsewhere.
    pub fn new(endpoint: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            project: project.into(),
            schema: default_schema(),
            access_token: None,
            request_timeout_ms: Self::DEFAULT_REQUEST_TIMEOUT_MS,
            log_view_host: None,
        }
    }

    /// Validates the service configuration.
    ///
    /// The endpoint must be an http(s) URL naming a host and the project must not be blank.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.endpoint.trim().is_empty() {
            return Err(ValidationError::EmptyField("service.endpoint".to_string()));
        }

        let Some(rest) = self
            .endpoint
            .strip_prefix("http://")
            .or_else(|| self.endpoint.strip_prefix("https://"))
        else {
            return Err(ValidationError::InvalidFieldValue {
                field: "service.endpoint".to_string(),
                constraint: "must start with http:// or https://".to_string(),
            });
        };

        let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
        let host = authority.rsplit('@').next().unwrap_or_default();
        if host.is_empty() || host.starts_with(':') || host.contains(char::is_whitespace) {
            return Err(ValidationError::InvalidFieldValue {
                field: "service.endpoint".to_string(),
                constraint: "must name a host".to_string(),
            });
        }

        if self.project.trim().is_empty() {
            return Err(ValidationError::EmptyField("service.project".to_string()));
        }

        if self.request_timeout_ms == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "service.request_timeout_ms".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

fn default_schema() -> String {
    ServiceConfig::DEFAULT_SCHEMA.to_string()
}

fn default_request_timeout_ms() -> u64 {
    ServiceConfig::DEFAULT_REQUEST_TIMEOUT_MS
}
