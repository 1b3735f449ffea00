//! Acceptor role state machine.

use crate::ballot::Ballot;
use crate::mailbox::ActorId;
use crate::messages::{Envelope, PaxosMessage};
use crate::traits::Machine;

/// Ballot comparison discipline for prepare requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrepareRule {
    /// Admit only strictly higher ballots. Used for single-decree operation.
    Greater,
    /// Admit equal ballots too, so a leader can re-prepare at its own
    /// ballot without bumping it. Default for the slot-replicated stack.
    GreaterOrEqual,
}

/// Pure acceptor state machine.
///
/// Tracks the highest promised ballot and an append-only log of accepted
/// `(ballot, value)` entries. Only the maximum-ballot entry is ever
/// consulted; a duplicate accept at the current ballot appends a duplicate
/// entry, which is harmless because any duplicate at that ballot carries
/// the same value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Acceptor<T> {
    id: ActorId,
    rule: PrepareRule,
    promised: Option<Ballot>,
    accepted: Vec<(Ballot, T)>,
}

impl<T: Clone> Acceptor<T> {
    /// Create an acceptor with no promises and nothing accepted.
    #[must_use]
    pub fn new(id: ActorId, rule: PrepareRule) -> Self {
        Self {
            id,
            rule,
            promised: None,
            accepted: Vec::new(),
        }
    }

    /// The highest ballot promised so far, if any.
    #[must_use]
    pub fn promised(&self) -> Option<Ballot> {
        self.promised
    }

    /// Every accepted entry, in arrival order.
    #[must_use]
    pub fn accepted(&self) -> &[(Ballot, T)] {
        &self.accepted
    }

    /// The accepted entry with the highest ballot, if any.
    #[must_use]
    pub fn max_accepted(&self) -> Option<&(Ballot, T)> {
        self.accepted.iter().max_by_key(|(ballot, _)| *ballot)
    }

    fn admits(&self, ballot: Ballot) -> bool {
        match self.rule {
            PrepareRule::Greater => self.promised.is_none_or(|promised| ballot > promised),
            PrepareRule::GreaterOrEqual => self.promised.is_none_or(|promised| ballot >= promised),
        }
    }
}

impl<T: Clone> Machine<PaxosMessage<T>> for Acceptor<T> {
    fn step(&mut self, message: PaxosMessage<T>) -> Vec<Envelope<PaxosMessage<T>>> {
        match message {
            PaxosMessage::Prepare { ballot, from } => {
                if !self.admits(ballot) {
                    return Vec::new();
                }
                self.promised = Some(ballot);
                vec![Envelope::new(
                    from,
                    PaxosMessage::Promise {
                        granted: true,
                        from: self.id,
                        accepted: self.max_accepted().cloned(),
                    },
                )]
            }
            PaxosMessage::Accept {
                ballot,
                from,
                value,
            } => {
                // Accepts are recorded only at the promised ballot.
                if Some(ballot) != self.promised {
                    return Vec::new();
                }
                self.accepted.push((ballot, value));
                vec![Envelope::new(
                    from,
                    PaxosMessage::Accepted {
                        ballot,
                        from: self.id,
                        ack: true,
                    },
                )]
            }
            PaxosMessage::ReadAccepted { requester } => {
                vec![Envelope::new(
                    requester,
                    PaxosMessage::AcceptedValue {
                        from: self.id,
                        value: self.max_accepted().map(|(_, value)| value.clone()),
                    },
                )]
            }
            _ => Vec::new(),
        }
    }
}
