use tracing::info;

use crate::client::ReadSessionClient;
use crate::error::TunnelResult;
use crate::read::{SplitAssigner, SplitDispenser, SplitListing};
use crate::types::{ScanScope, SessionKind, Split, TableSession};

/// Handle to a batch read session.
#[derive(Debug, Clone)]
pub struct ReadSession<C> {
    client: C,
    snapshot: TableSession,
    scope: ScanScope,
    stopped: bool,
}

impl<C> ReadSession<C>
where
    C: ReadSessionClient + Clone,
{
    pub(crate) fn new(client: C, snapshot: TableSession, scope: ScanScope) -> Self {
        Self {
            client,
            snapshot,
            scope,
            stopped: false,
        }
    }

    /// The last fetched snapshot of the session.
    pub fn session(&self) -> &TableSession {
        &self.snapshot
    }

    pub fn scope(&self) -> &ScanScope {
        &self.scope
    }

    /// Fetches a new snapshot of the session from the service.
    pub async fn refresh(&mut self) -> TunnelResult<&TableSession> {
        self.snapshot = self
            .client
            .get_session(&self.snapshot.table, &self.snapshot.id, SessionKind::BatchRead)
            .await?;

        Ok(&self.snapshot)
    }

    pub fn split_assigner(&self) -> SplitAssigner<C> {
        SplitAssigner::new(self.client.clone(), self.snapshot.clone())
    }

    /// Lists every split of the session scope.
    pub fn list_splits(&self) -> SplitListing<C> {
        self.split_assigner().list_splits(self.scope.clone())
    }

    /// Shares the splits of the session scope among concurrent workers.
    pub fn dispenser(&self) -> SplitDispenser<C> {
        self.split_assigner().dispenser(self.scope.clone())
    }

    pub async fn list_splits_in_range(
        &self,
        lower: &str,
        upper: Option<&str>,
    ) -> TunnelResult<Vec<Split>> {
        self.split_assigner()
            .list_splits_in_range(lower, upper)
            .await
    }

    /// Releases the session on the service. Only the first call reaches the service.
    pub async fn stop(&mut self) -> TunnelResult<()> {
        if self.stopped {
            return Ok(());
        }

        self.client.cleanup_session(&self.snapshot).await?;
        self.stopped = true;

        info!(session_id = %self.snapshot.id, table = %self.snapshot.table, "read session stopped");

        Ok(())
    }
}
