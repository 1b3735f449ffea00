//! Core traits for role state machines and their combinators.

use crate::messages::Envelope;

/// A message-driven state machine: one input in, addressed outputs out.
///
/// `step` must be total over `M`. Inputs outside the machine's domain
/// (unrecognized, duplicate, or out-of-phase) produce no output and no
/// state change.
pub trait Machine<M> {
    /// Process one message and return the messages to send in response.
    fn step(&mut self, message: M) -> Vec<Envelope<M>>;
}

/// A machine that can take several inputs in one tick.
///
/// Combinators that inspect outputs across co-located instances (bunching,
/// the stop rule) implement this so that everything produced within one
/// delivery is visible to post-processing as a single batch.
pub trait BatchMachine<M>: Machine<M> {
    /// Process a batch of messages delivered in one tick.
    fn step_batch(&mut self, messages: Vec<M>) -> Vec<Envelope<M>>;
}
