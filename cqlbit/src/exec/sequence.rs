use crate::debug;
use crate::error::CqlError;
use crate::exec::driver::{Executor, Hop};
use crate::exec::result::ResultSet;
use futures::FutureExt;
use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::AbortHandle;

enum SequenceState {
    Running { index: usize, current: Option<AbortHandle>, pending: VecDeque<Hop> },
    Done(Option<ResultSet>),
    Failed(Option<CqlError>),
    Cancelled,
}

enum Control {
    Advance(Hop),
    Finish(ResultSet),
    Fail(CqlError),
}

struct Shared {
    state: Mutex<SequenceState>,
    settled: Condvar,
    changes: watch::Sender<u64>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SequenceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        self.settled.notify_all();
        self.changes.send_modify(|version| *version += 1);
    }
}

/// Runs hops strictly one after another; the next one is dispatched only once the previous one
/// succeeded. The first failure ends the sequence and hops after it never start.
pub struct SequenceFuture {
    shared: Arc<Shared>,
}

impl SequenceFuture {
    pub(crate) fn start(executor: Arc<Executor>, hops: Vec<Hop>) -> Self {
        let mut pending: VecDeque<Hop> = hops.into();
        let (changes, _) = watch::channel(0);
        let Some(first) = pending.pop_front() else {
            let state = Mutex::new(SequenceState::Done(Some(ResultSet::empty())));
            return SequenceFuture { shared: Arc::new(Shared { state, settled: Condvar::new(), changes }) };
        };
        debug!("sequence of {} hops started", pending.len() + 1);
        let state = Mutex::new(SequenceState::Running { index: 0, current: None, pending });
        let shared = Arc::new(Shared { state, settled: Condvar::new(), changes });
        // the first completion waits for this lock, so the handle is in place before it lands
        let mut state = shared.lock();
        let task = spawn_hop(&shared, &executor, 0, first);
        if let SequenceState::Running { current, .. } = &mut *state {
            *current = Some(task);
        }
        drop(state);
        SequenceFuture { shared }
    }

    fn finished(state: &mut SequenceState) -> Option<Result<ResultSet, CqlError>> {
        match state {
            SequenceState::Running { .. } => None,
            SequenceState::Done(result) => Some(result.take().ok_or_else(|| CqlError::Custom("result already taken".to_string()))),
            SequenceState::Failed(err) => Some(Err(err.take().unwrap_or_else(|| CqlError::Custom("failure already reported".to_string())))),
            SequenceState::Cancelled => Some(Err(CqlError::Cancelled)),
        }
    }

    pub fn get(&self) -> Result<ResultSet, CqlError> {
        let mut state = self.shared.lock();
        loop {
            if let Some(outcome) = Self::finished(&mut state) {
                return outcome;
            }
            state = self.shared.settled.wait(state)?;
        }
    }

    pub fn get_timeout(&self, timeout: Duration) -> Result<ResultSet, CqlError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock();
        loop {
            if let Some(outcome) = Self::finished(&mut state) {
                return outcome;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(CqlError::Timeout(timeout));
            }
            state = self.shared.settled.wait_timeout(state, remaining)?.0;
        }
    }

    pub(crate) async fn wait(self) -> Result<ResultSet, CqlError> {
        let mut changes = self.shared.changes.subscribe();
        loop {
            let outcome = {
                let mut state = self.shared.lock();
                Self::finished(&mut state)
            };
            if let Some(outcome) = outcome {
                return outcome;
            }
            if changes.changed().await.is_err() {
                return Err(CqlError::Cancelled);
            }
        }
    }

    /// Aborts the running hop and drops the ones not started yet. Returns false when there was
    /// nothing left to stop.
    pub fn cancel(&self) -> bool {
        let mut state = self.shared.lock();
        let SequenceState::Running { index, current, pending } = &mut *state else {
            return false;
        };
        let interrupted = current.as_ref().is_some_and(|task| !task.is_finished());
        let drained = pending.len();
        if !interrupted && drained == 0 {
            return false;
        }
        if let Some(task) = current.take() {
            task.abort();
        }
        pending.clear();
        debug!("sequence cancelled at hop {}, {} hops drained", index, drained);
        *state = SequenceState::Cancelled;
        drop(state);
        self.shared.notify();
        true
    }

    pub fn is_done(&self) -> bool {
        !matches!(*self.shared.lock(), SequenceState::Running { .. })
    }
}

fn spawn_hop(shared: &Arc<Shared>, executor: &Arc<Executor>, index: usize, hop: Hop) -> AbortHandle {
    let shared = Arc::clone(shared);
    let task_executor = Arc::clone(executor);
    executor
        .handle()
        .spawn(async move {
            let outcome = AssertUnwindSafe(task_executor.run(hop))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(CqlError::Custom(format!("execution task panicked: {}", panic_message(&*panic)))));
            complete(&shared, &task_executor, index, outcome);
        })
        .abort_handle()
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown cause")
}

fn complete(shared: &Arc<Shared>, executor: &Arc<Executor>, index: usize, outcome: Result<ResultSet, CqlError>) {
    let mut state = shared.lock();
    let control = match &mut *state {
        SequenceState::Running { index: running, pending, .. } if *running == index => match outcome {
            Ok(result) => pending.pop_front().map_or(Control::Finish(result), Control::Advance),
            Err(err) => Control::Fail(err),
        },
        // cancelled, or a stale completion
        _ => return,
    };
    match control {
        Control::Advance(hop) => {
            debug!("sequence hop {} done, starting hop {}", index, index + 1);
            let task = spawn_hop(shared, executor, index + 1, hop);
            if let SequenceState::Running { index: running, current, .. } = &mut *state {
                *running = index + 1;
                *current = Some(task);
            }
        }
        Control::Finish(result) => {
            debug!("sequence done after hop {}", index);
            *state = SequenceState::Done(Some(result));
        }
        Control::Fail(err) => {
            debug!("sequence failed at hop {}: {}", index, err);
            *state = SequenceState::Failed(Some(err));
        }
    }
    drop(state);
    shared.notify();
}
