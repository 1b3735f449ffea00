//! Wiring: spawn role actors over the mailbox runtime and hand out
//! slot-scoped client handles.

use std::time::Duration;

use error_stack::Report;
use futures::{Stream, StreamExt};
use rand::Rng;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::task::JoinMap;
use tracing::{debug, trace};

use crate::acceptor::{Acceptor, PrepareRule};
use crate::ballot::Ballot;
use crate::bunch::Bunched;
use crate::error::ConsensusError;
use crate::learner::Learner;
use crate::mailbox::{ActorId, Router, spawn_batch_machine, spawn_machine};
use crate::messages::PaxosMessage;
use crate::proposer::Proposer;
use crate::slot::{Replicated, Slot, SlotMessage};
use crate::stoppable::{DataOrStop, StopRule};

/// Instantiates roles and combinators over the mailbox runtime.
///
/// The provider is the only component that touches the runtime: it spawns
/// the acceptor actors once, hands out proposer and learner actors on
/// demand, and owns every spawned task. Actors are never destroyed while
/// the provider lives; dropping the provider aborts them all.
pub struct Provider<T> {
    router: Router<SlotMessage<T>>,
    acceptors: Vec<ActorId>,
    tasks: JoinMap<ActorId, ()>,
    next_proposer: u32,
}

impl<T> Drop for Provider<T> {
    fn drop(&mut self) {
        self.tasks.abort_all();
    }
}

impl<T: Clone + Eq + Send + 'static> Provider<T> {
    /// Spawn `num_acceptors` slot-replicated acceptor actors.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(num_acceptors: usize) -> Self {
        let router = Router::new();
        let mut tasks = JoinMap::new();
        let mut acceptors = Vec::with_capacity(num_acceptors);
        for _ in 0..num_acceptors {
            let (id, rx) = router.register();
            let machine =
                Replicated::new(move |_slot| Acceptor::new(id, PrepareRule::GreaterOrEqual));
            spawn_machine(&mut tasks, &router, id, rx, machine);
            acceptors.push(id);
        }
        debug!(num_acceptors, "provider started");
        Self {
            router,
            acceptors,
            tasks,
            next_proposer: 0,
        }
    }

    /// The identities of the acceptor actors.
    #[must_use]
    pub fn acceptors(&self) -> &[ActorId] {
        &self.acceptors
    }

    /// Allocate a ballot no other proposer from this provider will ever
    /// hold, at the given round.
    pub fn next_ballot(&mut self, round: u64) -> Ballot {
        let proposer = self.next_proposer;
        self.next_proposer += 1;
        Ballot::new(round, proposer)
    }

    /// Spawn a slot-replicated proposer actor at `ballot` and return a
    /// handle scoped to `slot`.
    pub fn proposer(&mut self, ballot: Ballot, slot: Slot) -> ProposerHandle<T> {
        let (id, rx) = self.router.register();
        let acceptors = self.acceptors.clone();
        let machine =
            Replicated::new(move |_slot| Proposer::new(id, ballot, acceptors.iter().copied()));
        spawn_machine(&mut self.tasks, &self.router, id, rx, machine);
        trace!(id = id.raw(), ?ballot, "spawned proposer");
        self.handle_for(id, slot)
    }

    /// Spawn a slot-replicated learner actor and return a handle scoped to
    /// `slot`.
    pub fn learner(&mut self, slot: Slot) -> LearnerHandle<T> {
        let learner = self.learner_actor();
        let (reply, inbox) = self.router.register();
        LearnerHandle {
            router: self.router.clone(),
            slot,
            learner,
            reply,
            inbox,
        }
    }

    /// Propose with retries: each attempt runs one round through a fresh
    /// proposer at a strictly higher unique ballot, pausing between rounds
    /// per [`retry_pause`].
    ///
    /// # Errors
    ///
    /// [`ConsensusError::MailboxClosed`] if the runtime shuts down while a
    /// round is in flight. Timeouts are retried, not surfaced.
    pub async fn propose_retrying(
        &mut self,
        slot: Slot,
        value: T,
        round_timeout: Duration,
    ) -> Result<T, Report<ConsensusError>> {
        for attempt in 0u32.. {
            let ballot = self.next_ballot(u64::from(attempt));
            let mut handle = self.proposer(ballot, slot);
            match handle.propose(value.clone(), round_timeout).await {
                Ok(chosen) => return Ok(chosen),
                Err(report) if *report.current_context() == ConsensusError::Timeout => {
                    let pause = retry_pause(round_timeout, attempt, &mut rand::rng());
                    debug!(slot, attempt, ?pause, "round timed out, retrying higher");
                    tokio::time::sleep(pause).await;
                }
                Err(report) => return Err(report),
            }
        }
        unreachable!("retry loop returns from inside")
    }

    fn learner_actor(&mut self) -> ActorId {
        let (id, rx) = self.router.register();
        let acceptors = self.acceptors.clone();
        let machine = Replicated::new(move |_slot| Learner::new(id, acceptors.iter().copied()));
        spawn_machine(&mut self.tasks, &self.router, id, rx, machine);
        trace!(id = id.raw(), "spawned learner");
        id
    }

    fn handle_for(&mut self, proposer: ActorId, slot: Slot) -> ProposerHandle<T> {
        let learner = self.learner_actor();
        let (reply, inbox) = self.router.register();
        ProposerHandle {
            router: self.router.clone(),
            slot,
            proposer,
            learner,
            reply,
            inbox,
        }
    }
}

impl<T: Clone + Eq + Send + 'static> Provider<DataOrStop<T>> {
    /// Spawn a proposer actor whose phase-2a output passes through the
    /// cross-slot stop rule, and return a handle scoped to `slot`.
    ///
    /// All slots proposed through the same handle (see
    /// [`ProposerHandle::with_slot`]) share one bunched actor, so each
    /// slot's proposals are checked against the others'.
    pub fn stoppable_proposer(&mut self, ballot: Ballot, slot: Slot) -> ProposerHandle<DataOrStop<T>> {
        let (id, rx) = self.router.register();
        let acceptors = self.acceptors.clone();
        let machine = Bunched::new(
            move |_slot| Proposer::new(id, ballot, acceptors.iter().copied()),
            StopRule,
        );
        spawn_batch_machine(&mut self.tasks, &self.router, id, rx, machine);
        trace!(id = id.raw(), ?ballot, "spawned stoppable proposer");
        self.handle_for(id, slot)
    }
}

/// Slot-scoped proxy for one proposer actor.
///
/// Outbound payloads are wrapped as messages for the handle's slot;
/// inbound replies for other slots are ignored.
pub struct ProposerHandle<T> {
    router: Router<SlotMessage<T>>,
    slot: Slot,
    proposer: ActorId,
    learner: ActorId,
    reply: ActorId,
    inbox: mpsc::UnboundedReceiver<SlotMessage<T>>,
}

impl<T: Clone + Eq> ProposerHandle<T> {
    /// Rescope this handle to another slot of the same proposer actor.
    #[must_use]
    pub fn with_slot(mut self, slot: Slot) -> Self {
        self.slot = slot;
        self
    }

    /// The slot this handle is scoped to.
    #[must_use]
    pub fn slot(&self) -> Slot {
        self.slot
    }

    /// Drive one proposer round and wait for a learner to confirm the
    /// decided value.
    ///
    /// The result may differ from `value`: if an earlier round already got
    /// a value accepted, that value is what consensus chooses.
    ///
    /// # Errors
    ///
    /// [`ConsensusError::Timeout`] when no decision is confirmed within
    /// `timeout` (retry with a higher ballot), [`ConsensusError::MailboxClosed`]
    /// when the runtime is gone.
    pub async fn propose(
        &mut self,
        value: T,
        timeout: Duration,
    ) -> Result<T, Report<ConsensusError>> {
        trace!(slot = self.slot, "proposing");
        self.router.send(
            self.proposer,
            SlotMessage::new(self.slot, PaxosMessage::Propose { value }),
        );
        self.router.send(
            self.learner,
            SlotMessage::new(
                self.slot,
                PaxosMessage::Query {
                    requester: self.reply,
                },
            ),
        );
        await_agreed(&mut self.inbox, self.slot, timeout).await
    }
}

/// Slot-scoped proxy for one learner actor.
pub struct LearnerHandle<T> {
    router: Router<SlotMessage<T>>,
    slot: Slot,
    learner: ActorId,
    reply: ActorId,
    inbox: mpsc::UnboundedReceiver<SlotMessage<T>>,
}

impl<T: Clone + Eq> LearnerHandle<T> {
    /// Rescope this handle to another slot of the same learner actor.
    #[must_use]
    pub fn with_slot(mut self, slot: Slot) -> Self {
        self.slot = slot;
        self
    }

    /// Run one quorum read.
    ///
    /// Returns `Ok(None)` when nothing is decided before the deadline: the
    /// learner never reports "agreed on nothing", it keeps restarting its
    /// poll, so absence of an answer is the only "none yet" signal.
    ///
    /// # Errors
    ///
    /// [`ConsensusError::MailboxClosed`] when the runtime is gone.
    pub async fn query(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<T>, Report<ConsensusError>> {
        trace!(slot = self.slot, "querying");
        self.router.send(
            self.learner,
            SlotMessage::new(
                self.slot,
                PaxosMessage::Query {
                    requester: self.reply,
                },
            ),
        );
        match await_agreed(&mut self.inbox, self.slot, timeout).await {
            Ok(value) => Ok(Some(value)),
            Err(report) if *report.current_context() == ConsensusError::Timeout => Ok(None),
            Err(report) => Err(report),
        }
    }

    /// Turn this handle into a stream of decided values, one per query.
    ///
    /// Each yielded value is the outcome of one quorum read; send a fresh
    /// query through another handle to trigger more.
    pub fn into_updates(self) -> impl Stream<Item = T> {
        let slot = self.slot;
        UnboundedReceiverStream::new(self.inbox).filter_map(move |message| async move {
            if message.slot != slot {
                return None;
            }
            match message.inner {
                PaxosMessage::Agreed { value, .. } => Some(value),
                _ => None,
            }
        })
    }
}

/// Off-wire pause after `attempt` timed-out rounds.
///
/// Starts at an eighth of the round timeout, doubles per failed round, and
/// is capped at one full timeout: there is no point pacing retries on any
/// scale other than how long a round is allowed to take. The result is
/// randomised to between half and one-and-a-half of itself so contending
/// proposers that knocked each other out do not collide again in lockstep.
#[must_use]
pub fn retry_pause(round_timeout: Duration, attempt: u32, rng: &mut impl Rng) -> Duration {
    let step = (round_timeout / 8).saturating_mul(2u32.saturating_pow(attempt));
    step.min(round_timeout).mul_f64(rng.random_range(0.5..1.5))
}

async fn await_agreed<T>(
    inbox: &mut mpsc::UnboundedReceiver<SlotMessage<T>>,
    slot: Slot,
    timeout: Duration,
) -> Result<T, Report<ConsensusError>> {
    let recv = async {
        loop {
            let Some(message) = inbox.recv().await else {
                return Err(Report::new(ConsensusError::MailboxClosed));
            };
            if message.slot != slot {
                continue;
            }
            if let PaxosMessage::Agreed { value, .. } = message.inner {
                return Ok(value);
            }
        }
    };
    match tokio::time::timeout(timeout, recv).await {
        Ok(result) => result,
        Err(_) => Err(Report::new(ConsensusError::Timeout)
            .attach_printable(format!("no decision for slot {slot} within {timeout:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn retry_pause_scales_with_the_round_timeout() {
        let mut rng = StdRng::seed_from_u64(42);
        let timeout = Duration::from_millis(800);

        let first = retry_pause(timeout, 0, &mut rng);
        assert!(first >= Duration::from_millis(50));
        assert!(first <= Duration::from_millis(150));

        // Doubling caps at one full round timeout before jitter.
        let late = retry_pause(timeout, 30, &mut rng);
        assert!(late >= timeout / 2);
        assert!(late <= timeout * 3 / 2);
    }
}
