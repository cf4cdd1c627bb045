use std::fmt;

use serde::{Deserialize, Serialize};

/// Schema used when a table is not qualified with one.
pub const DEFAULT_SCHEMA: &str = "default";

/// Fully qualified name of a table on the service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableIdentifier {
    pub project: String,
    pub schema: String,
    pub table: String,
}

impl TableIdentifier {
    /// Creates an identifier for `table` in the default schema of `project`.
    pub fn new(project: impl Into<String>, table: impl Into<String>) -> Self {
        Self::with_schema(project, DEFAULT_SCHEMA, table)
    }

    pub fn with_schema(
        project: impl Into<String>,
        schema: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            schema: schema.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.schema, self.table)
    }
}
