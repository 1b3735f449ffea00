//! Learner role state machine: quorum reads over the acceptor set.

use std::collections::{BTreeMap, BTreeSet};

use crate::mailbox::ActorId;
use crate::messages::{Envelope, PaxosMessage};
use crate::quorum;
use crate::traits::Machine;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum LearnerPhase<T> {
    Idle,
    Polling {
        requester: ActorId,
        /// At most one reply per acceptor identity.
        replies: BTreeMap<ActorId, Option<T>>,
    },
}

/// Pure learner state machine.
///
/// A query broadcasts a read to every acceptor and waits until one
/// equivalence class of replies reaches a strict majority. If the majority
/// agrees on a value it is reported to the requester; if the majority has
/// no accepted value yet, the learner re-queues the query to itself and
/// polls again rather than reporting "agreed on nothing".
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Learner<T> {
    id: ActorId,
    acceptors: BTreeSet<ActorId>,
    phase: LearnerPhase<T>,
}

impl<T: Clone + Eq> Learner<T> {
    /// Create an idle learner over the given acceptor set.
    #[must_use]
    pub fn new(id: ActorId, acceptors: impl IntoIterator<Item = ActorId>) -> Self {
        Self {
            id,
            acceptors: acceptors.into_iter().collect(),
            phase: LearnerPhase::Idle,
        }
    }

    /// Whether a poll is in flight.
    #[must_use]
    pub fn is_polling(&self) -> bool {
        matches!(self.phase, LearnerPhase::Polling { .. })
    }
}

impl<T: Clone + Eq> Machine<PaxosMessage<T>> for Learner<T> {
    fn step(&mut self, message: PaxosMessage<T>) -> Vec<Envelope<PaxosMessage<T>>> {
        match message {
            PaxosMessage::Query { requester } => {
                if !matches!(self.phase, LearnerPhase::Idle) {
                    return Vec::new();
                }
                self.phase = LearnerPhase::Polling {
                    requester,
                    replies: BTreeMap::new(),
                };
                self.acceptors
                    .iter()
                    .map(|&acceptor| {
                        Envelope::new(acceptor, PaxosMessage::ReadAccepted { requester: self.id })
                    })
                    .collect()
            }
            PaxosMessage::AcceptedValue { from, value } => {
                if !self.acceptors.contains(&from) {
                    return Vec::new();
                }
                let threshold = quorum::majority(self.acceptors.len());
                let LearnerPhase::Polling { requester, replies } = &mut self.phase else {
                    // Replies arriving while idle are stale; drop them.
                    return Vec::new();
                };
                let requester = *requester;
                replies.insert(from, value);

                let votes: Vec<Option<T>> = replies.values().cloned().collect();
                let Some(winner) = quorum::plurality(&votes, threshold) else {
                    return Vec::new();
                };

                self.phase = LearnerPhase::Idle;
                match winner {
                    // A majority has no value yet: restart the poll so a
                    // later round can still decide one.
                    None => vec![Envelope::new(self.id, PaxosMessage::Query { requester })],
                    Some(value) => vec![Envelope::new(
                        requester,
                        PaxosMessage::Agreed {
                            value,
                            from: self.id,
                        },
                    )],
                }
            }
            _ => Vec::new(),
        }
    }
}
