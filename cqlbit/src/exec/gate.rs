use crate::debug;
use crate::error::CqlError;
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, ThreadId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GateKind {
    Create,
    Reset,
}

enum GateState {
    InProgress { owner: ThreadId },
    Done,
    Failed(Arc<CqlError>),
}

struct Gate {
    state: Mutex<GateState>,
    settled: Condvar,
}

impl Gate {
    fn owned_by(owner: ThreadId) -> Self {
        Gate { state: Mutex::new(GateState::InProgress { owner }), settled: Condvar::new() }
    }

    fn settle(&self, outcome: GateState) -> Result<(), CqlError> {
        *self.state.lock()? = outcome;
        self.settled.notify_all();
        Ok(())
    }

    /// Blocks until the owner settles the gate. The owner itself passes straight through.
    fn wait(&self, entity: &str, caller: ThreadId) -> Result<(), CqlError> {
        let mut state = self.state.lock()?;
        loop {
            let outcome = match &*state {
                GateState::InProgress { owner } if *owner == caller => Some(Ok(())),
                GateState::InProgress { .. } => None,
                GateState::Done => Some(Ok(())),
                GateState::Failed(cause) => Some(Err(CqlError::SchemaCreation { entity: entity.to_string(), cause: Arc::clone(cause) })),
            };
            match outcome {
                Some(outcome) => return outcome,
                None => state = self.settled.wait(state)?,
            }
        }
    }
}

type GateKey = (String, String, GateKind);

/// One gate per entity, keyspace and kind; the first caller does the work, everybody else replays
/// its outcome. A failed gate, and any reset gate, is removed once settled so a later call runs
/// the work again.
#[derive(Default)]
pub(crate) struct SchemaGates {
    gates: Mutex<HashMap<GateKey, Arc<Gate>>>,
}

impl SchemaGates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run(&self, entity: &str, keyspace: &str, kind: GateKind, work: impl FnOnce() -> Result<(), CqlError>) -> Result<(), CqlError> {
        let key: GateKey = (entity.to_string(), keyspace.to_string(), kind);
        let caller = thread::current().id();
        let (gate, owner) = {
            let mut gates = self.gates.lock()?;
            match gates.get(&key) {
                Some(gate) => (Arc::clone(gate), false),
                None => {
                    let gate = Arc::new(Gate::owned_by(caller));
                    gates.insert(key.clone(), Arc::clone(&gate));
                    (gate, true)
                }
            }
        };
        if !owner {
            debug!("waiting on {:?} gate of {} in {}", kind, entity, keyspace);
            return gate.wait(entity, caller);
        }

        debug!("{:?} gate of {} in {} owned by {:?}", kind, entity, keyspace, caller);
        let (settled, outcome) = match work() {
            Ok(()) => (GateState::Done, Ok(())),
            Err(err) => {
                let cause = Arc::new(err);
                (GateState::Failed(Arc::clone(&cause)), Err(CqlError::SchemaCreation { entity: entity.to_string(), cause }))
            }
        };
        let release = kind == GateKind::Reset || outcome.is_err();
        gate.settle(settled)?;
        if release {
            let mut gates = self.gates.lock()?;
            if gates.get(&key).is_some_and(|current| Arc::ptr_eq(current, &gate)) {
                gates.remove(&key);
            }
        }
        outcome
    }

    #[cfg(test)]
    fn is_settled(&self, entity: &str, keyspace: &str, kind: GateKind) -> bool {
        let key: GateKey = (entity.to_string(), keyspace.to_string(), kind);
        let Some(gate) = self.gates.lock().ok().and_then(|gates| gates.get(&key).cloned()) else {
            return false;
        };
        gate.state.lock().map(|state| matches!(*state, GateState::Done)).unwrap_or(false)
    }

    /// Forgets every gate, so the next schema request does the work again.
    pub fn reset(&self) -> Result<(), CqlError> {
        self.gates.lock()?.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::time::Duration;

    #[test]
    fn concurrent_callers_share_one_run() {
        let gates = Arc::new(SchemaGates::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let (gates, runs, barrier) = (Arc::clone(&gates), Arc::clone(&runs), Arc::clone(&barrier));
                thread::spawn(move || {
                    barrier.wait();
                    gates.run("Order", "shop_acme", GateKind::Create, || {
                        runs.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(50));
                        Ok(())
                    })
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap().is_ok());
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(gates.is_settled("Order", "shop_acme", GateKind::Create));
    }

    #[test]
    fn failure_reaches_every_waiter_then_clears() {
        let gates = Arc::new(SchemaGates::new());
        let barrier = Arc::new(Barrier::new(4));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let (gates, barrier) = (Arc::clone(&gates), Arc::clone(&barrier));
                thread::spawn(move || {
                    barrier.wait();
                    gates.run("Order", "shop_acme", GateKind::Create, || {
                        thread::sleep(Duration::from_millis(50));
                        Err(CqlError::Custom("keyspace refused".to_string()))
                    })
                })
            })
            .collect();
        for handle in handles {
            let err = handle.join().unwrap().unwrap_err();
            assert!(matches!(&err, CqlError::SchemaCreation { cause, .. } if matches!(**cause, CqlError::Custom(_))));
        }
        let retried = gates.run("Order", "shop_acme", GateKind::Create, || Ok(()));
        assert!(retried.is_ok());
    }

    #[test]
    fn owner_reenters_its_own_gate() {
        let gates = SchemaGates::new();
        let mut nested = 0;
        let outcome = gates.run("Order", "shop_acme", GateKind::Create, || {
            gates.run("Order", "shop_acme", GateKind::Create, || {
                nested += 1;
                Ok(())
            })
        });
        assert!(outcome.is_ok());
        assert_eq!(nested, 0);
    }

    #[test]
    fn reset_gates_are_released() {
        let gates = SchemaGates::new();
        let mut runs = 0;
        for _ in 0..2 {
            gates
                .run("Order", "shop_acme", GateKind::Reset, || {
                    runs += 1;
                    Ok(())
                })
                .unwrap();
        }
        assert_eq!(runs, 2);
        gates.run("Order", "shop_acme", GateKind::Create, || Ok(())).unwrap();
        assert!(gates.is_settled("Order", "shop_acme", GateKind::Create));
        gates.reset().unwrap();
        assert!(!gates.is_settled("Order", "shop_acme", GateKind::Create));
    }
}
