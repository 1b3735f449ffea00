//! Stateright model checker tests.
//!
//! Exhaustively verifies the pure role state machines: the acceptor and
//! proposer actors below step the exact same `Machine` implementations as
//! the production code, so the checker explores the real transitions.

use std::borrow::Cow;
use std::sync::Arc;

use stateright::actor::{Actor, ActorModel, Id, Network, Out};
use stateright::{Checker, Expectation, Model};

use stoppable_paxos::{
    Acceptor, ActorId, Ballot, Envelope, Machine, PaxosMessage, PrepareRule, Proposer, majority,
};

/// Message value (a small integer keeps the state space tractable).
type Value = u64;

type Msg = PaxosMessage<Value>;

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
enum PaxosActor {
    Acceptor,
    Proposer {
        acceptors: Vec<Id>,
        ballot: Ballot,
        value: Value,
    },
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
enum PaxosState {
    Acceptor(Acceptor<Value>),
    Proposer(Proposer<Value>),
}

/// Model configuration: the set of values ever proposed, for the Validity
/// property.
#[derive(Clone)]
struct PaxosCfg {
    proposed: Vec<Value>,
}

fn actor_id(id: Id) -> ActorId {
    ActorId::from_raw(usize::from(id) as u64)
}

fn route(envelopes: Vec<Envelope<Msg>>, o: &mut Out<PaxosActor>) {
    for Envelope { to, message } in envelopes {
        let to = usize::try_from(to.raw()).expect("identity fits in usize");
        o.send(Id::from(to), message);
    }
}

impl Actor for PaxosActor {
    type Msg = Msg;
    type State = PaxosState;
    type Timer = ();
    type Storage = ();
    type Random = ();

    fn on_start(
        &self,
        id: Id,
        _storage: &Option<Self::Storage>,
        o: &mut Out<Self>,
    ) -> Self::State {
        match self {
            PaxosActor::Acceptor => {
                PaxosState::Acceptor(Acceptor::new(actor_id(id), PrepareRule::GreaterOrEqual))
            }
            PaxosActor::Proposer {
                acceptors,
                ballot,
                value,
            } => {
                let acceptor_ids = acceptors.iter().map(|&a| actor_id(a));
                let mut proposer = Proposer::new(actor_id(id), *ballot, acceptor_ids);
                route(proposer.step(PaxosMessage::Propose { value: *value }), o);
                PaxosState::Proposer(proposer)
            }
        }
    }

    fn on_msg(
        &self,
        _id: Id,
        state: &mut Cow<Self::State>,
        _src: Id,
        msg: Self::Msg,
        o: &mut Out<Self>,
    ) {
        match state.to_mut() {
            PaxosState::Acceptor(acceptor) => route(acceptor.step(msg), o),
            PaxosState::Proposer(proposer) => route(proposer.step(msg), o),
        }
    }
}

/// Entries chosen by a quorum: `(ballot, value)` pairs present in a strict
/// majority of acceptor logs.
fn chosen_entries(states: &[Arc<PaxosState>]) -> Vec<(Ballot, Value)> {
    let logs: Vec<&[(Ballot, Value)]> = states
        .iter()
        .filter_map(|s| match s.as_ref() {
            PaxosState::Acceptor(a) => Some(a.accepted()),
            PaxosState::Proposer(_) => None,
        })
        .collect();
    let quorum = majority(logs.len());

    let mut chosen = Vec::new();
    for log in &logs {
        for entry in *log {
            if chosen.contains(entry) {
                continue;
            }
            let count = logs.iter().filter(|l| l.contains(entry)).count();
            if count >= quorum {
                chosen.push(*entry);
            }
        }
    }
    chosen
}

fn paxos_model(num_acceptors: usize, proposals: &[Value]) -> ActorModel<PaxosActor, PaxosCfg, ()> {
    let acceptor_ids: Vec<Id> = (0..num_acceptors).map(Id::from).collect();

    // Ordered network (FIFO per-link) for a smaller state space; the
    // protocol itself does not rely on ordering.
    let mut model = ActorModel::new(
        PaxosCfg {
            proposed: proposals.to_vec(),
        },
        (),
    )
    .init_network(Network::new_ordered([]));

    for _ in 0..num_acceptors {
        model = model.actor(PaxosActor::Acceptor);
    }
    for (i, &value) in proposals.iter().enumerate() {
        model = model.actor(PaxosActor::Proposer {
            acceptors: acceptor_ids.clone(),
            ballot: Ballot::new(0, u32::try_from(i).expect("few proposers")),
            value,
        });
    }

    // Agreement: all quorum-chosen entries carry the same value.
    model = model.property(Expectation::Always, "Agreement", |_, state| {
        let chosen = chosen_entries(&state.actor_states);
        chosen.iter().all(|(_, value)| *value == chosen[0].1)
    });

    // Validity: acceptors only ever hold proposed values.
    model = model.property(Expectation::Always, "Validity", |model, state| {
        state.actor_states.iter().all(|s| match s.as_ref() {
            PaxosState::Acceptor(a) => a
                .accepted()
                .iter()
                .all(|(_, value)| model.cfg.proposed.contains(value)),
            PaxosState::Proposer(_) => true,
        })
    });

    model
}

#[test]
fn check_single_proposer() {
    let model = paxos_model(3, &[1]);
    let checker = model.checker().threads(num_cpus::get()).spawn_bfs().join();
    checker.assert_properties();
    println!(
        "single proposer: {} states explored",
        checker.unique_state_count()
    );
}

#[test]
fn check_two_proposers() {
    let model = paxos_model(3, &[1, 2]);
    let checker = model.checker().threads(num_cpus::get()).spawn_bfs().join();
    checker.assert_properties();
    println!(
        "two proposers: {} states explored",
        checker.unique_state_count()
    );
}
