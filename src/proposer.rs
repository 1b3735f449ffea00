//! Proposer role state machine.

use std::collections::{BTreeMap, BTreeSet};

use crate::ballot::Ballot;
use crate::error::ProposerNotReady;
use crate::mailbox::ActorId;
use crate::messages::{Envelope, PaxosMessage};
use crate::quorum;
use crate::traits::Machine;

/// Proposer phase.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum ProposerPhase<T> {
    /// Waiting for a value to propose.
    Idle,
    /// Collecting promises for our ballot.
    Collecting {
        /// Value to propose if no acceptor reports an earlier accept.
        fallback: T,
        /// At most one promise per acceptor identity.
        promises: BTreeMap<ActorId, Option<(Ballot, T)>>,
    },
    /// Phase 2a has been sent; terminal.
    Decided,
}

/// Pure proposer state machine for one ballot.
///
/// Consumes exactly one `Propose`, broadcasts prepare requests, and once a
/// strict majority of acceptors has promised, sends the accept request to
/// every responder. The value sent is the accepted value with the highest
/// ballot across the quorum's promises, or the proposed value if every
/// promise was empty.
///
/// A proposer whose ballot is stale never collects a quorum and stays in
/// `Collecting`; the client restarts with a higher ballot.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Proposer<T> {
    id: ActorId,
    ballot: Ballot,
    acceptors: BTreeSet<ActorId>,
    phase: ProposerPhase<T>,
}

impl<T: Clone> Proposer<T> {
    /// Create an idle proposer for `ballot` over the given acceptor set.
    #[must_use]
    pub fn new(id: ActorId, ballot: Ballot, acceptors: impl IntoIterator<Item = ActorId>) -> Self {
        Self {
            id,
            ballot,
            acceptors: acceptors.into_iter().collect(),
            phase: ProposerPhase::Idle,
        }
    }

    /// This proposer's immutable ballot.
    #[must_use]
    pub fn ballot(&self) -> Ballot {
        self.ballot
    }

    /// Whether a `Propose` has been consumed but no quorum reached yet.
    #[must_use]
    pub fn is_collecting(&self) -> bool {
        matches!(self.phase, ProposerPhase::Collecting { .. })
    }

    /// Whether phase 2a has been sent.
    #[must_use]
    pub fn is_decided(&self) -> bool {
        matches!(self.phase, ProposerPhase::Decided)
    }

    fn quorum(&self) -> usize {
        quorum::majority(self.acceptors.len())
    }

    /// Record a granted promise from `from`, idempotent per identity.
    /// Promises from identities outside the acceptor set, or arriving
    /// outside `Collecting`, are dropped.
    ///
    /// Returns true once the collected promises form a strict majority, at
    /// which point [`decide`](Self::decide) produces the accept requests.
    pub fn observe_promise(&mut self, from: ActorId, accepted: Option<(Ballot, T)>) -> bool {
        if !self.acceptors.contains(&from) {
            return false;
        }
        let quorum = self.quorum();
        let ProposerPhase::Collecting { promises, .. } = &mut self.phase else {
            return false;
        };
        promises.insert(from, accepted);
        promises.len() >= quorum
    }

    /// The quorum transition: adopt the chosen value and emit the accept
    /// requests to every responder.
    ///
    /// [`Machine::step`] drives this itself once a promise completes the
    /// quorum; batching combinators call
    /// [`observe_promise`](Self::observe_promise) and this method
    /// separately so the phase-2a batch is produced under their control.
    ///
    /// # Errors
    ///
    /// [`ProposerNotReady`] when no quorum of promises has been collected or
    /// the proposer has already decided. That is a precondition violation in
    /// the caller, never a protocol condition.
    pub fn decide(&mut self) -> Result<Vec<Envelope<PaxosMessage<T>>>, ProposerNotReady> {
        match &self.phase {
            ProposerPhase::Collecting { promises, .. } if promises.len() >= self.quorum() => {}
            _ => return Err(ProposerNotReady),
        }
        let ProposerPhase::Collecting { fallback, promises } =
            std::mem::replace(&mut self.phase, ProposerPhase::Decided)
        else {
            unreachable!("phase checked above");
        };

        // Adopt the highest-ballot accepted value reported by the quorum,
        // falling back to our own value when every promise was empty.
        let chosen = promises
            .values()
            .filter_map(Option::as_ref)
            .max_by_key(|(ballot, _)| *ballot)
            .map_or(fallback, |(_, value)| value.clone());

        Ok(promises
            .keys()
            .map(|&responder| {
                Envelope::new(
                    responder,
                    PaxosMessage::Accept {
                        ballot: self.ballot,
                        from: self.id,
                        value: chosen.clone(),
                    },
                )
            })
            .collect())
    }
}

impl<T: Clone> Machine<PaxosMessage<T>> for Proposer<T> {
    fn step(&mut self, message: PaxosMessage<T>) -> Vec<Envelope<PaxosMessage<T>>> {
        match message {
            PaxosMessage::Propose { value } => {
                if !matches!(self.phase, ProposerPhase::Idle) {
                    return Vec::new();
                }
                self.phase = ProposerPhase::Collecting {
                    fallback: value,
                    promises: BTreeMap::new(),
                };
                self.acceptors
                    .iter()
                    .map(|&acceptor| {
                        Envelope::new(
                            acceptor,
                            PaxosMessage::Prepare {
                                ballot: self.ballot,
                                from: self.id,
                            },
                        )
                    })
                    .collect()
            }
            PaxosMessage::Promise {
                granted: true,
                from,
                accepted,
            } => {
                if self.observe_promise(from, accepted) {
                    self.decide()
                        .expect("a quorum of promises was just observed")
                } else {
                    Vec::new()
                }
            }
            _ => Vec::new(),
        }
    }
}
