//! The protocol message alphabet.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::ballot::Ballot;
use crate::mailbox::ActorId;

/// The closed set of protocol messages exchanged between roles.
///
/// `T` is the opaque value type the protocol agrees on. Every role's `step`
/// function is total over this alphabet: variants outside a role's domain
/// produce no output and no state change.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PaxosMessage<T> {
    /// Phase 1a: prepare request, proposer to acceptor.
    Prepare { ballot: Ballot, from: ActorId },
    /// Phase 1b: promise reply, carrying the acceptor's highest accepted
    /// entry (if any).
    Promise {
        granted: bool,
        from: ActorId,
        accepted: Option<(Ballot, T)>,
    },
    /// Phase 2a: accept request with the value chosen for this ballot.
    Accept {
        ballot: Ballot,
        from: ActorId,
        value: T,
    },
    /// Phase 2b: accept acknowledgement.
    Accepted {
        ballot: Ballot,
        from: ActorId,
        ack: bool,
    },
    /// Client request that starts a proposer round.
    Propose { value: T },
    /// Read request, learner to acceptor.
    ReadAccepted { requester: ActorId },
    /// Read reply carrying the acceptor's highest accepted value.
    AcceptedValue { from: ActorId, value: Option<T> },
    /// Client read request to a learner.
    Query { requester: ActorId },
    /// Learner reply once a quorum agrees on a value.
    Agreed { value: T, from: ActorId },
}

/// A message addressed to a single mailbox.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope<M> {
    /// Destination mailbox.
    pub to: ActorId,
    /// Payload.
    pub message: M,
}

impl<M> Envelope<M> {
    /// Address `message` to `to`.
    #[must_use]
    pub fn new(to: ActorId, message: M) -> Self {
        Self { to, message }
    }
}
