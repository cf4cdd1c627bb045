use std::sync::Arc;

use tokio::sync::Mutex;

use crate::client::ReadSessionClient;
use crate::error::TunnelResult;
use crate::read::SplitListing;
use crate::types::Split;

#[derive(Debug)]
struct Inner<C> {
    listing: SplitListing<C>,
    done: bool,
}

/// Shares one split listing among concurrent workers.
///
/// Page fetches are serialized behind an async mutex, so each split is handed out exactly once
/// no matter how many clones pull from the dispenser. After the listing ends every pull returns
/// `None`.
#[derive(Debug)]
pub struct SplitDispenser<C> {
    inner: Arc<Mutex<Inner<C>>>,
}

impl<C> Clone for SplitDispenser<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C> SplitDispenser<C>
where
    C: ReadSessionClient,
{
    pub fn new(listing: SplitListing<C>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                listing,
                done: false,
            })),
        }
    }

    /// Hands out the next split, or `None` once every split was handed out.
    pub async fn next_split(&self) -> TunnelResult<Option<Split>> {
        let mut inner = self.inner.lock().await;
        if inner.done {
            return Ok(None);
        }

        let split = inner.listing.next_split().await?;
        if split.is_none() {
            inner.done = true;
        }

        Ok(split)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::client::ReadSessionClient;
    use crate::read::SplitAssigner;
    use crate::test_utils::memory::{MemoryTableService, numbered_splits};
    use crate::types::{ScanScope, TableIdentifier};

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_workers_never_share_a_split() {
        let service = MemoryTableService::new();
        let table = TableIdentifier::new("analytics", "events");
        service.add_splits(&table, numbered_splits(25)).await;
        let session = service
            .create_read_session(&table, &ScanScope::full())
            .await
            .unwrap();

        let dispenser = SplitAssigner::new(service, session).dispenser(ScanScope::full());

        let mut handles = vec![];
        for _ in 0..4 {
            let dispenser = dispenser.clone();
            handles.push(tokio::spawn(async move {
                let mut taken = vec![];
                while let Some(split) = dispenser.next_split().await.unwrap() {
                    taken.push(split);
                }
                taken
            }));
        }

        let mut all = vec![];
        for handle in handles {
            all.extend(handle.await.unwrap());
        }

        let unique: BTreeSet<_> = all.iter().cloned().collect();
        assert_eq!(all.len(), 25);
        assert_eq!(unique.len(), 25);
        assert_eq!(unique.into_iter().collect::<Vec<_>>(), numbered_splits(25));

        // Pulls after the end keep returning nothing.
        assert!(dispenser.next_split().await.unwrap().is_none());
    }
}
