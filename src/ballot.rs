//! Ballot numbers.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Totally ordered proposal number, unique across proposers.
///
/// Compared lexicographically by `(round, proposer)` — the derived `Ord`
/// relies on field order. Two proposers never share a ballot as long as
/// their `proposer` components differ.
///
/// Acceptors hold `Option<Ballot>` rather than a sentinel value: `None`
/// orders below every real ballot, so "no ballot promised yet" compares
/// the way a `-1` sentinel would.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Ballot {
    /// Round counter, bumped by the owning proposer on retry.
    pub round: u64,
    /// Proposer identifier for global uniqueness and tie-breaking.
    pub proposer: u32,
}

impl Ballot {
    /// Create a new ballot.
    #[must_use]
    pub fn new(round: u64, proposer: u32) -> Self {
        Self { round, proposer }
    }

    /// The next-higher ballot for the same proposer.
    #[must_use]
    pub fn bump(self) -> Self {
        Self {
            round: self.round + 1,
            proposer: self.proposer,
        }
    }
}
