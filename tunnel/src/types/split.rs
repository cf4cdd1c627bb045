use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// One independently readable unit of a table scan.
///
/// Splits are totally ordered by their key, which is their lexicographic position within the
/// scan. The locator is opaque and only meaningful to the reader that opens the split.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Split {
    pub key: String,
    pub locator: String,
}

impl Split {
    pub fn new(key: impl Into<String>, locator: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            locator: locator.into(),
        }
    }
}

impl PartialOrd for Split {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Split {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| self.locator.cmp(&other.locator))
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.key, self.locator)
    }
}

/// Opaque cursor returned by a paginated split listing.
///
/// An empty marker means there are no further pages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaginationMarker(String);

impl PaginationMarker {
    pub fn new(marker: impl Into<String>) -> Self {
        Self(marker.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PaginationMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One page of a split listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitPage {
    pub splits: Vec<Split>,
    /// Marker to pass when fetching the next page; absent or empty on the last page.
    pub next_marker: Option<PaginationMarker>,
    /// Page size the service applied, when it reports one.
    pub max_items: Option<u32>,
}

impl SplitPage {
    /// Returns the marker of the next page, or `None` if this page is the last.
    pub fn continuation(&self) -> Option<&PaginationMarker> {
        self.next_marker.as_ref().filter(|marker| !marker.is_empty())
    }
}

/// Description of the portion of a table a read session scans.
///
/// Filters are carried as opaque predicate text and never evaluated on the client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanScope {
    /// Partition specs to read, for example `dt=20240101`. Empty means every partition.
    #[serde(default)]
    pub partitions: Vec<String>,
    /// Columns to project. Empty means every column.
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub filter: Option<String>,
    /// Upper bound on splits per page requested from the service.
    #[serde(default)]
    pub page_size: Option<u32>,
}

impl ScanScope {
    /// Scope covering the whole table.
    pub fn full() -> Self {
        Self::default()
    }

    pub fn with_partitions<I, S>(mut self, partitions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.partitions = partitions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }
}
