//! Bunching: collect one tick's outputs across slots and expose them to a
//! cross-slot post-processing hook.

use std::collections::BTreeMap;

use crate::ballot::Ballot;
use crate::messages::{Envelope, PaxosMessage};
use crate::proposer::Proposer;
use crate::slot::{Replicated, Slot, SlotMessage};
use crate::traits::{BatchMachine, Machine};

/// Per-slot phase-2a bookkeeping consulted by cross-slot hooks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Val2a<T> {
    /// Latest phase-2a payload this slot's instance sent, if any.
    pub value: Option<T>,
    /// Ballot that payload was sent at.
    pub ballot: Option<Ballot>,
    /// Whether the slot has sent any phase-2a at all.
    pub has_proposed: bool,
}

impl<T> Default for Val2a<T> {
    fn default() -> Self {
        Self {
            value: None,
            ballot: None,
            has_proposed: false,
        }
    }
}

/// Snapshot of every slot's [`Val2a`]. Slots absent from the map have not
/// proposed yet.
pub type SlotSnapshot<T> = BTreeMap<Slot, Val2a<T>>;

/// Hook applied to each slot's outputs within one tick.
pub trait PostProcess<T> {
    /// Rewrite one slot's outputs given the snapshot taken at the start of
    /// the tick.
    fn post_process(
        &mut self,
        slot: Slot,
        outputs: Vec<Envelope<PaxosMessage<T>>>,
        snapshot: &SlotSnapshot<T>,
    ) -> Vec<Envelope<PaxosMessage<T>>>;
}

/// Hook that leaves every batch untouched.
#[derive(Clone, Copy, Debug, Default)]
pub struct Passthrough;

impl<T> PostProcess<T> for Passthrough {
    fn post_process(
        &mut self,
        _slot: Slot,
        outputs: Vec<Envelope<PaxosMessage<T>>>,
        _snapshot: &SlotSnapshot<T>,
    ) -> Vec<Envelope<PaxosMessage<T>>> {
        outputs
    }
}

/// Slot replication for proposers, with per-tick batching.
///
/// Hosts a [`Proposer`] per slot. Every message delivered in one tick is
/// driven through its slot's instance; the outputs are then handed, slot
/// by slot and in delivery order, to the post-processing hook together
/// with a snapshot of every slot's latest phase-2a. The snapshot is taken
/// once at the start of the tick, so all outputs of one batch observe the
/// same cross-slot picture; phase-2a messages that survive
/// post-processing are recorded for the next tick.
///
/// Promises are not fed through the proposer's own `step`: this layer
/// records them with [`Proposer::observe_promise`] and performs the
/// quorum transition itself via [`Proposer::decide`], so the phase-2a
/// batch is produced under its control.
pub struct Bunched<T, F, P> {
    inner: Replicated<Proposer<T>, F>,
    post: P,
    val2a: SlotSnapshot<T>,
}

impl<T, F, P> Bunched<T, F, P>
where
    T: Clone,
    F: FnMut(Slot) -> Proposer<T>,
    P: PostProcess<T>,
{
    /// Create an empty bunched registry with the given post-processing hook.
    #[must_use]
    pub fn new(make: F, post: P) -> Self {
        Self {
            inner: Replicated::new(make),
            post,
            val2a: BTreeMap::new(),
        }
    }

    /// The recorded phase-2a state for `slot`.
    #[must_use]
    pub fn val2a(&self, slot: Slot) -> Option<&Val2a<T>> {
        self.val2a.get(&slot)
    }

    /// The proposer for `slot`, if one has been created.
    #[must_use]
    pub fn get(&self, slot: Slot) -> Option<&Proposer<T>> {
        self.inner.get(slot)
    }

    fn record(&mut self, slot: Slot, outputs: &[Envelope<PaxosMessage<T>>]) {
        for envelope in outputs {
            if let PaxosMessage::Accept { ballot, value, .. } = &envelope.message {
                let entry = self.val2a.entry(slot).or_default();
                entry.value = Some(value.clone());
                entry.ballot = Some(*ballot);
                entry.has_proposed = true;
            }
        }
    }
}

impl<T, F, P> Machine<SlotMessage<T>> for Bunched<T, F, P>
where
    T: Clone,
    F: FnMut(Slot) -> Proposer<T>,
    P: PostProcess<T>,
{
    fn step(&mut self, message: SlotMessage<T>) -> Vec<Envelope<SlotMessage<T>>> {
        self.step_batch(vec![message])
    }
}

impl<T, F, P> BatchMachine<SlotMessage<T>> for Bunched<T, F, P>
where
    T: Clone,
    F: FnMut(Slot) -> Proposer<T>,
    P: PostProcess<T>,
{
    fn step_batch(&mut self, messages: Vec<SlotMessage<T>>) -> Vec<Envelope<SlotMessage<T>>> {
        let mut groups: Vec<(Slot, Vec<Envelope<PaxosMessage<T>>>)> = Vec::new();
        for SlotMessage { slot, inner } in messages {
            let instance = self.inner.instance(slot);
            let outputs = match inner {
                PaxosMessage::Promise {
                    granted: true,
                    from,
                    accepted,
                } => {
                    if instance.observe_promise(from, accepted) {
                        instance
                            .decide()
                            .expect("a quorum of promises was just observed")
                    } else {
                        Vec::new()
                    }
                }
                other => instance.step(other),
            };
            groups.push((slot, outputs));
        }

        let snapshot = self.val2a.clone();
        let mut out = Vec::new();
        for (slot, outputs) in groups {
            let processed = self.post.post_process(slot, outputs, &snapshot);
            self.record(slot, &processed);
            out.extend(
                processed
                    .into_iter()
                    .map(|Envelope { to, message }| {
                        Envelope::new(to, SlotMessage::new(slot, message))
                    }),
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::ActorId;

    fn promise(from: u64) -> PaxosMessage<&'static str> {
        PaxosMessage::Promise {
            granted: true,
            from: ActorId::from_raw(from),
            accepted: None,
        }
    }

    fn bunched() -> Bunched<&'static str, impl FnMut(Slot) -> Proposer<&'static str>, Passthrough>
    {
        let id = ActorId::from_raw(10);
        let acceptors: Vec<ActorId> = (0..3).map(ActorId::from_raw).collect();
        Bunched::new(
            move |_slot| Proposer::new(id, Ballot::new(1, 0), acceptors.clone()),
            Passthrough,
        )
    }

    /// Drive a slot's proposer to its phase-2a broadcast.
    fn drive_to_accept(
        bunched: &mut Bunched<
            &'static str,
            impl FnMut(Slot) -> Proposer<&'static str>,
            Passthrough,
        >,
        slot: Slot,
        value: &'static str,
    ) -> Vec<Envelope<SlotMessage<&'static str>>> {
        bunched.step(SlotMessage::new(slot, PaxosMessage::Propose { value }));
        bunched.step(SlotMessage::new(slot, promise(0)));
        bunched.step(SlotMessage::new(slot, promise(1)))
    }

    #[test]
    fn val2a_tracks_emitted_accepts() {
        let mut bunched = bunched();
        assert!(bunched.val2a(4).is_none());

        let out = drive_to_accept(&mut bunched, 4, "v");
        assert!(!out.is_empty());

        let val2a = bunched.val2a(4).unwrap();
        assert!(val2a.has_proposed);
        assert_eq!(val2a.value, Some("v"));
        assert_eq!(val2a.ballot, Some(Ballot::new(1, 0)));
    }

    #[test]
    fn batch_preserves_per_slot_order() {
        let mut bunched = bunched();
        let out = bunched.step_batch(vec![
            SlotMessage::new(1, PaxosMessage::Propose { value: "a" }),
            SlotMessage::new(2, PaxosMessage::Propose { value: "b" }),
        ]);
        // Three prepares per slot, slot 1's outputs first.
        assert_eq!(out.len(), 6);
        assert!(out[..3].iter().all(|e| e.message.slot == 1));
        assert!(out[3..].iter().all(|e| e.message.slot == 2));
    }

    #[test]
    fn snapshot_is_taken_at_batch_start() {
        use std::cell::RefCell;
        use std::rc::Rc;

        struct SnapshotProbe {
            saw_other_slot: Rc<RefCell<Vec<(Slot, bool)>>>,
        }
        impl PostProcess<&'static str> for SnapshotProbe {
            fn post_process(
                &mut self,
                slot: Slot,
                outputs: Vec<Envelope<PaxosMessage<&'static str>>>,
                snapshot: &SlotSnapshot<&'static str>,
            ) -> Vec<Envelope<PaxosMessage<&'static str>>> {
                if !outputs.is_empty() {
                    let other = snapshot.keys().any(|&s| s != slot);
                    self.saw_other_slot.borrow_mut().push((slot, other));
                }
                outputs
            }
        }

        let observations = Rc::new(RefCell::new(Vec::new()));
        let id = ActorId::from_raw(10);
        let acceptors: Vec<ActorId> = (0..3).map(ActorId::from_raw).collect();
        let mut bunched = Bunched::new(
            move |_slot| Proposer::new(id, Ballot::new(1, 0), acceptors.clone()),
            SnapshotProbe {
                saw_other_slot: Rc::clone(&observations),
            },
        );

        // Both slots cross their quorum within one batch: neither sees the
        // other's phase-2a in the snapshot.
        bunched.step_batch(vec![
            SlotMessage::new(1, PaxosMessage::Propose { value: "a" }),
            SlotMessage::new(2, PaxosMessage::Propose { value: "b" }),
        ]);
        bunched.step_batch(vec![
            SlotMessage::new(1, promise(0)),
            SlotMessage::new(2, promise(0)),
        ]);
        bunched.step_batch(vec![
            SlotMessage::new(1, promise(1)),
            SlotMessage::new(2, promise(1)),
        ]);

        assert!(observations.borrow().iter().all(|&(_, other)| !other));
        // Next tick's snapshot does include both slots.
        assert!(bunched.val2a(1).is_some() && bunched.val2a(2).is_some());
    }
}
