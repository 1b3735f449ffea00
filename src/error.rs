//! Error types.

use core::fmt;

/// Precondition violation: the proposer was driven to its quorum step
/// without a quorum of promises, or after it had already decided.
///
/// This is a programming error in the enclosing combinator, not a runtime
/// condition; protocol-level rejections are absorbed silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProposerNotReady;

impl fmt::Display for ProposerNotReady {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("proposer has no quorum to proceed on")
    }
}

impl core::error::Error for ProposerNotReady {}

/// Errors surfaced by the register and provider client surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsensusError {
    /// No decision was observed before the deadline.
    Timeout,
    /// The reply mailbox closed before a decision arrived.
    MailboxClosed,
}

impl fmt::Display for ConsensusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsensusError::Timeout => f.write_str("no decision before the deadline"),
            ConsensusError::MailboxClosed => f.write_str("reply mailbox closed"),
        }
    }
}

impl core::error::Error for ConsensusError {}
