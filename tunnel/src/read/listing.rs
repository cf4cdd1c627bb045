use std::collections::VecDeque;

use futures::Stream;
use metrics::counter;
use tracing::debug;

use crate::bail;
use crate::client::ReadSessionClient;
use crate::error::{ErrorKind, TunnelError, TunnelResult};
use crate::metrics::{SESSION_ID_LABEL, TUNNEL_SPLIT_PAGES_FETCHED_TOTAL, TUNNEL_SPLITS_LISTED_TOTAL};
use crate::read::assigner::fetch_page;
use crate::types::{PaginationMarker, ScanScope, Split, TableSession};

#[derive(Debug, Clone, PartialEq, Eq)]
enum ListingState {
    /// No page was fetched yet.
    Initial,
    /// The next page is fetched with this marker.
    Continue(PaginationMarker),
    /// The last page was fetched but exhaustion was not reported yet.
    Exhausted,
    /// Exhaustion was reported to the caller.
    Reported,
}

/// Lazy, exhaustive listing of the splits of a read session.
///
/// Pages are fetched on demand. The marker of each page is checked before the next request is
/// issued, so the service never sees a request for a page past the end. Once the listing has
/// reported its end, pulling it again fails with [`ErrorKind::ListingExhausted`]; call
/// [`SplitListing::restart`] to list again from the first page.
#[derive(Debug)]
pub struct SplitListing<C> {
    client: C,
    session: TableSession,
    scope: ScanScope,
    state: ListingState,
    buffered: VecDeque<Split>,
    last_key: Option<String>,
    pages_fetched: u64,
}

impl<C> SplitListing<C>
where
    C: ReadSessionClient,
{
    pub(crate) fn new(client: C, session: TableSession, scope: ScanScope) -> Self {
        Self {
            client,
            session,
            scope,
            state: ListingState::Initial,
            buffered: VecDeque::new(),
            last_key: None,
            pages_fetched: 0,
        }
    }

    /// Number of pages fetched since the listing started.
    pub fn pages_fetched(&self) -> u64 {
        self.pages_fetched
    }

    /// Returns `true` once the last page was fetched and every split was handed out.
    pub fn is_exhausted(&self) -> bool {
        self.buffered.is_empty()
            && matches!(self.state, ListingState::Exhausted | ListingState::Reported)
    }

    /// Resets the listing to the first page.
    pub fn restart(&mut self) {
        self.state = ListingState::Initial;
        self.buffered.clear();
        self.last_key = None;
        self.pages_fetched = 0;
    }

    /// Returns the next page of splits, or `None` once the listing has ended.
    ///
    /// Splits buffered by [`SplitListing::next_split`] are returned first. A page may be empty
    /// when the service returns no splits but a non-empty marker.
    pub async fn next_page(&mut self) -> TunnelResult<Option<Vec<Split>>> {
        if !self.buffered.is_empty() {
            return Ok(Some(self.buffered.drain(..).collect()));
        }

        let marker = match self.state.clone() {
            ListingState::Initial => None,
            ListingState::Continue(marker) => Some(marker),
            ListingState::Exhausted => {
                self.state = ListingState::Reported;
                return Ok(None);
            }
            ListingState::Reported => {
                bail!(
                    ErrorKind::ListingExhausted,
                    "The split listing was already exhausted",
                    format!("session {}", self.session.id)
                );
            }
        };

        let page = fetch_page(&self.client, &self.session, &self.scope, marker.as_ref()).await?;
        self.check_order(&page.splits)?;

        self.pages_fetched += 1;
        self.state = match page.continuation() {
            Some(next) => ListingState::Continue(next.clone()),
            None => ListingState::Exhausted,
        };

        counter!(TUNNEL_SPLIT_PAGES_FETCHED_TOTAL, SESSION_ID_LABEL => self.session.id.to_string())
            .increment(1);
        counter!(TUNNEL_SPLITS_LISTED_TOTAL, SESSION_ID_LABEL => self.session.id.to_string())
            .increment(page.splits.len() as u64);

        debug!(
            session_id = %self.session.id,
            page = self.pages_fetched,
            splits = page.splits.len(),
            last = self.state == ListingState::Exhausted,
            "fetched split page"
        );

        Ok(Some(page.splits))
    }

    /// Returns the next split, fetching pages as needed, or `None` once the listing has ended.
    pub async fn next_split(&mut self) -> TunnelResult<Option<Split>> {
        loop {
            if let Some(split) = self.buffered.pop_front() {
                return Ok(Some(split));
            }

            match self.next_page().await? {
                Some(splits) => self.buffered.extend(splits),
                None => return Ok(None),
            }
        }
    }

    /// Converts the listing into a stream of splits that ends with the listing.
    pub fn into_stream(self) -> impl Stream<Item = TunnelResult<Split>> {
        futures::stream::try_unfold(self, |mut listing| async move {
            let split = listing.next_split().await?;
            Ok::<_, TunnelError>(split.map(|split| (split, listing)))
        })
    }

    fn check_order(&mut self, splits: &[Split]) -> TunnelResult<()> {
        for split in splits {
            if let Some(last_key) = &self.last_key {
                if split.key.as_str() <= last_key.as_str() {
                    bail!(
                        ErrorKind::SplitOrderViolated,
                        "The service returned splits out of order",
                        format!(
                            "split key '{}' follows '{}' in session {}",
                            split.key, last_key, self.session.id
                        )
                    );
                }
            }

            self.last_key = Some(split.key.clone());
        }

        Ok(())
    }
}
