//! One-shot read/write register over a single consensus instance.

use std::time::Duration;

use error_stack::Report;
use tracing::debug;

use crate::error::ConsensusError;
use crate::provider::Provider;
use crate::slot::Slot;

/// Register-style façade over one slot of a [`Provider`].
///
/// The register does not re-implement any protocol logic: `write`
/// orchestrates exactly one proposer round and one learner read, `read`
/// one learner read, and both report the outcome.
pub struct Register<'a, T> {
    provider: &'a mut Provider<T>,
    slot: Slot,
    timeout: Duration,
    round: u64,
}

impl<'a, T: Clone + Eq + Send + 'static> Register<'a, T> {
    /// A register over `slot` with a default per-operation deadline.
    #[must_use]
    pub fn new(provider: &'a mut Provider<T>, slot: Slot) -> Self {
        Self {
            provider,
            slot,
            timeout: Duration::from_secs(1),
            round: 0,
        }
    }

    /// Override the per-operation deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Read the decided value, or `None` when nothing has been decided
    /// before the deadline.
    ///
    /// # Errors
    ///
    /// [`ConsensusError::MailboxClosed`] when the runtime is gone.
    pub async fn read(&mut self) -> Result<Option<T>, Report<ConsensusError>> {
        self.provider.learner(self.slot).query(self.timeout).await
    }

    /// Drive one proposer round at a fresh ballot and return the value
    /// consensus chose — which may differ from `value` if an earlier round
    /// already got a value accepted.
    ///
    /// On timeout the round simply failed; calling `write` again retries
    /// at a strictly higher ballot.
    ///
    /// # Errors
    ///
    /// [`ConsensusError::Timeout`] when the round does not complete within
    /// the deadline, [`ConsensusError::MailboxClosed`] when the runtime is
    /// gone.
    pub async fn write(&mut self, value: T) -> Result<T, Report<ConsensusError>> {
        let ballot = self.provider.next_ballot(self.round);
        self.round += 1;
        debug!(slot = self.slot, ?ballot, "register write");
        self.provider
            .proposer(ballot, self.slot)
            .propose(value, self.timeout)
            .await
    }
}
