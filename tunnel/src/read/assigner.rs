use tracing::debug;

use crate::bail;
use crate::client::ReadSessionClient;
use crate::error::{ErrorKind, TunnelResult};
use crate::read::{SplitDispenser, SplitListing};
use crate::types::{PaginationMarker, ScanScope, Split, SplitPage, TableSession};

/// Produces the splits of one read session.
///
/// The assigner is cheap to clone and never caches pages: every listing starts from the first
/// page.
#[derive(Debug, Clone)]
pub struct SplitAssigner<C> {
    client: C,
    session: TableSession,
}

impl<C> SplitAssigner<C>
where
    C: ReadSessionClient + Clone,
{
    pub fn new(client: C, session: TableSession) -> Self {
        Self { client, session }
    }

    pub fn session(&self) -> &TableSession {
        &self.session
    }

    /// Returns a lazy listing of every split in `scope`, starting from the first page.
    pub fn list_splits(&self, scope: ScanScope) -> SplitListing<C> {
        SplitListing::new(self.client.clone(), self.session.clone(), scope)
    }

    /// Returns a handle that hands the splits of `scope` out to concurrent workers.
    pub fn dispenser(&self, scope: ScanScope) -> SplitDispenser<C> {
        SplitDispenser::new(self.list_splits(scope))
    }

    /// Fetches a single page of splits.
    ///
    /// `None` requests the first page. A marker taken from a page that ended the listing is
    /// empty, and fetching with it fails with [`ErrorKind::StalePaginationMarker`].
    pub async fn fetch_page(
        &self,
        scope: &ScanScope,
        marker: Option<&PaginationMarker>,
    ) -> TunnelResult<SplitPage> {
        fetch_page(&self.client, &self.session, scope, marker).await
    }

    /// Lists the splits whose key lies in `[lower, upper)` in a single request.
    ///
    /// Range listings are not paginated. `lower` is required; a missing `upper` reads to the
    /// end of the scan.
    pub async fn list_splits_in_range(
        &self,
        lower: &str,
        upper: Option<&str>,
    ) -> TunnelResult<Vec<Split>> {
        if lower.is_empty() {
            bail!(
                ErrorKind::ValidationError,
                "A lower split key is required for range listings"
            );
        }

        let splits = self
            .client
            .list_splits_in_range(&self.session, lower, upper)
            .await?;

        debug!(
            session_id = %self.session.id,
            lower,
            upper,
            splits = splits.len(),
            "listed splits in range"
        );

        Ok(splits)
    }
}

pub(crate) async fn fetch_page<C: ReadSessionClient>(
    client: &C,
    session: &TableSession,
    scope: &ScanScope,
    marker: Option<&PaginationMarker>,
) -> TunnelResult<SplitPage> {
    if let Some(marker) = marker {
        if marker.is_empty() {
            bail!(
                ErrorKind::StalePaginationMarker,
                "The split listing already ended",
                format!("an empty marker was supplied for session {}", session.id)
            );
        }
    }

    client.list_splits(session, scope, marker).await
}
