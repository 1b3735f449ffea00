//! Slot replication: one mailbox hosting a per-slot family of role
//! instances.

use std::collections::BTreeMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::messages::{Envelope, PaxosMessage};
use crate::traits::Machine;

/// One independent consensus instance in multi-decree operation.
pub type Slot = u64;

/// A protocol message tagged with the slot it belongs to.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SlotMessage<T> {
    pub slot: Slot,
    pub inner: PaxosMessage<T>,
}

impl<T> SlotMessage<T> {
    /// Tag `inner` with `slot`.
    #[must_use]
    pub fn new(slot: Slot, inner: PaxosMessage<T>) -> Self {
        Self { slot, inner }
    }
}

/// Hosts a lazily created role instance per slot behind a single mailbox.
///
/// An incoming [`SlotMessage`] is unwrapped and stepped through the
/// instance for its slot (created on first contact, never destroyed); the
/// instance's outputs are re-tagged with the same slot. Messages for slot
/// `s` never touch the state of any other slot.
pub struct Replicated<R, F> {
    instances: BTreeMap<Slot, R>,
    make: F,
}

impl<R, F: FnMut(Slot) -> R> Replicated<R, F> {
    /// Create an empty registry; `make` builds the role instance for a slot
    /// on first contact.
    #[must_use]
    pub fn new(make: F) -> Self {
        Self {
            instances: BTreeMap::new(),
            make,
        }
    }

    /// The instance for `slot`, created if absent.
    pub fn instance(&mut self, slot: Slot) -> &mut R {
        let make = &mut self.make;
        self.instances.entry(slot).or_insert_with(|| {
            trace!(slot, "creating slot instance");
            make(slot)
        })
    }

    /// The instance for `slot`, if one has been created.
    #[must_use]
    pub fn get(&self, slot: Slot) -> Option<&R> {
        self.instances.get(&slot)
    }

    /// Number of live slot instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Whether no slot has been contacted yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

impl<T, R, F> Machine<SlotMessage<T>> for Replicated<R, F>
where
    R: Machine<PaxosMessage<T>>,
    F: FnMut(Slot) -> R,
{
    fn step(&mut self, message: SlotMessage<T>) -> Vec<Envelope<SlotMessage<T>>> {
        let SlotMessage { slot, inner } = message;
        self.instance(slot)
            .step(inner)
            .into_iter()
            .map(|Envelope { to, message }| Envelope::new(to, SlotMessage::new(slot, message)))
            .collect()
    }
}
