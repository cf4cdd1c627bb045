use std::collections::BTreeMap;

use metrics::counter;
use tracing::{debug, info};
use tunnel_config::shared::CommitConflictPolicy;

use crate::client::WriteSessionClient;
use crate::error::{ErrorKind, TunnelError, TunnelResult};
#[cfg(feature = "failpoints")]
use crate::failpoints::{COMMIT_COORDINATOR_BEFORE_FINALIZE, tunnel_fail_point};
use crate::metrics::{SESSION_ID_LABEL, TUNNEL_SESSIONS_COMMITTED_TOTAL};
use crate::types::{BlockNumber, CommitMessage, TableSession, WriterAttemptId};
use crate::{bail, tunnel_error};

/// Collects the commit messages of a write session and finalizes it.
///
/// At most one message per block is sent to the service. Re-submitting an identical message is
/// a no-op. When two attempts of the same block both produced a message, the block is resolved
/// by [`CommitCoordinator::choose_attempt`] or by the [`CommitConflictPolicy`]; otherwise
/// finalizing fails with [`ErrorKind::ConflictingCommitMessages`].
#[derive(Debug, Clone, Default)]
pub struct CommitCoordinator {
    policy: CommitConflictPolicy,
    messages: BTreeMap<BlockNumber, BTreeMap<WriterAttemptId, CommitMessage>>,
    chosen: BTreeMap<BlockNumber, WriterAttemptId>,
}

impl CommitCoordinator {
    pub fn new(policy: CommitConflictPolicy) -> Self {
        Self {
            policy,
            messages: BTreeMap::new(),
            chosen: BTreeMap::new(),
        }
    }

    pub fn policy(&self) -> CommitConflictPolicy {
        self.policy
    }

    /// Number of distinct blocks with at least one commit message.
    pub fn block_count(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Adds the commit message of one block attempt.
    ///
    /// Fails with [`ErrorKind::ConflictingCommitMessages`] when the same attempt of the same
    /// block was already added with a different token.
    pub fn add(&mut self, message: CommitMessage) -> TunnelResult<()> {
        let attempts = self.messages.entry(message.block_number()).or_default();

        match attempts.get(&message.attempt()) {
            Some(existing) if *existing == message => {
                debug!(
                    block = message.block_number(),
                    attempt = %message.attempt(),
                    "collapsed duplicate commit message"
                );
            }
            Some(_) => {
                bail!(
                    ErrorKind::ConflictingCommitMessages,
                    "Two commit messages for the same block attempt differ",
                    format!(
                        "block {} attempt {}",
                        message.block_number(),
                        message.attempt()
                    )
                );
            }
            None => {
                attempts.insert(message.attempt(), message);
            }
        }

        Ok(())
    }

    /// Adds every message, stopping at the first conflict.
    pub fn extend<I>(&mut self, messages: I) -> TunnelResult<()>
    where
        I: IntoIterator<Item = CommitMessage>,
    {
        for message in messages {
            self.add(message)?;
        }

        Ok(())
    }

    /// Marks `attempt` as the authoritative attempt of `block_number`.
    ///
    /// The messages of every other attempt of the block are dropped when finalizing.
    pub fn choose_attempt(&mut self, block_number: BlockNumber, attempt: WriterAttemptId) {
        self.chosen.insert(block_number, attempt);
    }

    /// Returns the message sent for each block, ordered by block number.
    pub fn resolve(&self) -> TunnelResult<Vec<CommitMessage>> {
        let mut resolved = Vec::with_capacity(self.messages.len());
        let mut errors: Vec<TunnelError> = Vec::new();

        for (block_number, attempts) in &self.messages {
            if let Some(attempt) = self.chosen.get(block_number) {
                match attempts.get(attempt) {
                    Some(message) => resolved.push(message.clone()),
                    None => errors.push(tunnel_error!(
                        ErrorKind::InvalidState,
                        "The chosen attempt has no commit message",
                        format!("block {block_number} attempt {attempt}")
                    )),
                }

                continue;
            }

            if attempts.len() == 1 || self.policy == CommitConflictPolicy::LatestAttemptWins {
                if let Some((_, message)) = attempts.last_key_value() {
                    resolved.push(message.clone());
                }

                continue;
            }

            let attempt_numbers: Vec<String> = attempts.keys().map(ToString::to_string).collect();
            errors.push(tunnel_error!(
                ErrorKind::ConflictingCommitMessages,
                "Several attempts of the same block produced commit messages",
                format!(
                    "block {block_number} attempts {}",
                    attempt_numbers.join(", ")
                )
            ));
        }

        if !errors.is_empty() {
            return Err(errors.into());
        }

        Ok(resolved)
    }

    /// Finalizes `session` with one message per block in a single commit call.
    pub async fn finalize<C>(&self, client: &C, session: &TableSession) -> TunnelResult<TableSession>
    where
        C: WriteSessionClient,
    {
        let messages = self.resolve()?;

        #[cfg(feature = "failpoints")]
        tunnel_fail_point(COMMIT_COORDINATOR_BEFORE_FINALIZE)?;

        let committed = client.commit_session(session, &messages).await?;

        counter!(TUNNEL_SESSIONS_COMMITTED_TOTAL, SESSION_ID_LABEL => session.id.to_string())
            .increment(1);
        info!(
            session_id = %session.id,
            blocks = messages.len(),
            status = %committed.status,
            "write session committed"
        );

        Ok(committed)
    }
}
