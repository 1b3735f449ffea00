//! Stoppable multi-decree operation: veto phase-2a proposals that would
//! cross a `Stop`.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ballot::Ballot;
use crate::bunch::{PostProcess, SlotSnapshot};
use crate::messages::{Envelope, PaxosMessage};
use crate::slot::Slot;

/// Void reason: a data proposal landed after an earlier slot's stop.
pub const VOIDED_EARLIER_STOP: &str = "Data (Earlier Stop)";
/// Void reason: a stop proposal landed before a later slot's data at an
/// equal or higher ballot.
pub const VOIDED_LATER_DATA: &str = "Stop (Later Data)";

/// Payload for a slot sequence that can be terminated.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DataOrStop<T> {
    /// Ordinary payload for this slot.
    Data(T),
    /// Terminates the sequence at this slot.
    Stop(String),
    /// Replacement for a proposal the cross-slot rule forbids. Still goes
    /// through consensus at its original ballot; it simply decides nothing.
    Voided(String),
}

impl<T> DataOrStop<T> {
    /// Whether this payload is a stop marker.
    #[must_use]
    pub fn is_stop(&self) -> bool {
        matches!(self, DataOrStop::Stop(_))
    }

    /// Whether this payload carries data.
    #[must_use]
    pub fn is_data(&self) -> bool {
        matches!(self, DataOrStop::Data(_))
    }

    /// Whether this payload was voided by the cross-slot rule.
    #[must_use]
    pub fn is_voided(&self) -> bool {
        matches!(self, DataOrStop::Voided(_))
    }
}

/// Post-processor enforcing the cross-slot stop rule over bunched
/// proposer output.
///
/// Only phase-2a messages are inspected. Against the tick's snapshot of
/// every other slot's latest proposal:
///
/// - `Data` is voided when any earlier slot has proposed a `Stop`.
/// - `Stop` is voided when any later slot has proposed `Data` at an equal
///   or higher ballot.
///
/// Voiding at emission time is conservative: it may cancel proposals that
/// sequencing would have allowed, but it never lets a forbidden pair
/// through. A `Voided` payload in the snapshot triggers neither rule,
/// since it can never be chosen as data or as a stop.
#[derive(Clone, Copy, Debug, Default)]
pub struct StopRule;

impl StopRule {
    fn veto<T: Clone>(
        slot: Slot,
        ballot: Ballot,
        value: DataOrStop<T>,
        snapshot: &SlotSnapshot<DataOrStop<T>>,
    ) -> DataOrStop<T> {
        match value {
            DataOrStop::Data(data) => {
                let stop_before = snapshot
                    .iter()
                    .any(|(&other, v)| other < slot && matches!(v.value, Some(DataOrStop::Stop(_))));
                if stop_before {
                    debug!(slot, reason = VOIDED_EARLIER_STOP, "voided proposal");
                    DataOrStop::Voided(VOIDED_EARLIER_STOP.to_owned())
                } else {
                    DataOrStop::Data(data)
                }
            }
            DataOrStop::Stop(id) => {
                let data_after = snapshot.iter().any(|(&other, v)| {
                    other > slot
                        && matches!(v.value, Some(DataOrStop::Data(_)))
                        && v.ballot.is_some_and(|b| b >= ballot)
                });
                if data_after {
                    debug!(slot, reason = VOIDED_LATER_DATA, "voided proposal");
                    DataOrStop::Voided(VOIDED_LATER_DATA.to_owned())
                } else {
                    DataOrStop::Stop(id)
                }
            }
            voided @ DataOrStop::Voided(_) => voided,
        }
    }
}

impl<T: Clone> PostProcess<DataOrStop<T>> for StopRule {
    fn post_process(
        &mut self,
        slot: Slot,
        outputs: Vec<Envelope<PaxosMessage<DataOrStop<T>>>>,
        snapshot: &SlotSnapshot<DataOrStop<T>>,
    ) -> Vec<Envelope<PaxosMessage<DataOrStop<T>>>> {
        outputs
            .into_iter()
            .map(|Envelope { to, message }| {
                let message = match message {
                    PaxosMessage::Accept {
                        ballot,
                        from,
                        value,
                    } => PaxosMessage::Accept {
                        ballot,
                        from,
                        value: Self::veto(slot, ballot, value, snapshot),
                    },
                    other => other,
                };
                Envelope::new(to, message)
            })
            .collect()
    }
}
