use crate::error::CqlError;
use crate::exec::join;
use crate::exec::result::ResultSet;
use crate::exec::sequence::SequenceFuture;
use futures::future::{BoxFuture, FutureExt};
use std::future::IntoFuture;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

enum Inner {
    Pending { handle: Handle, task: JoinHandle<Result<ResultSet, CqlError>> },
    Sequence(SequenceFuture),
    Ready(Option<Result<ResultSet, CqlError>>),
}

/// Outcome of an asynchronously executed statement.
///
/// `get` and `get_timeout` block the calling thread and must not be used from inside the driver's
/// executor; async callers `.await` the future instead.
pub struct ResultFuture {
    inner: Inner,
}

fn consumed() -> CqlError {
    CqlError::Custom("result already taken".to_string())
}

impl ResultFuture {
    pub(crate) fn pending(handle: Handle, task: JoinHandle<Result<ResultSet, CqlError>>) -> Self {
        ResultFuture { inner: Inner::Pending { handle, task } }
    }

    pub(crate) fn sequence(sequence: SequenceFuture) -> Self {
        ResultFuture { inner: Inner::Sequence(sequence) }
    }

    pub(crate) fn ready(outcome: Result<ResultSet, CqlError>) -> Self {
        ResultFuture { inner: Inner::Ready(Some(outcome)) }
    }

    pub fn get(self) -> Result<ResultSet, CqlError> {
        match self.inner {
            Inner::Pending { handle, task } => join(handle.block_on(task)),
            Inner::Sequence(sequence) => sequence.get(),
            Inner::Ready(outcome) => outcome.unwrap_or_else(|| Err(consumed())),
        }
    }

    /// Waits at most `timeout`; on expiry the work keeps running and the future can be waited on again.
    pub fn get_timeout(&mut self, timeout: Duration) -> Result<ResultSet, CqlError> {
        if let Inner::Pending { handle, task } = &mut self.inner {
            let joined = handle.block_on(async { tokio::time::timeout(timeout, task).await }).map_err(|_| CqlError::Timeout(timeout))?;
            self.inner = Inner::Ready(Some(join(joined)));
        }
        match &mut self.inner {
            Inner::Sequence(sequence) => sequence.get_timeout(timeout),
            Inner::Ready(outcome) => outcome.take().unwrap_or_else(|| Err(consumed())),
            Inner::Pending { .. } => Err(CqlError::Timeout(timeout)),
        }
    }

    /// Aborts work not yet finished; returns whether anything was still left to abort.
    pub fn cancel(&self) -> bool {
        match &self.inner {
            Inner::Pending { task, .. } if !task.is_finished() => {
                task.abort();
                true
            }
            Inner::Pending { .. } | Inner::Ready(_) => false,
            Inner::Sequence(sequence) => sequence.cancel(),
        }
    }

    pub fn is_done(&self) -> bool {
        match &self.inner {
            Inner::Pending { task, .. } => task.is_finished(),
            Inner::Sequence(sequence) => sequence.is_done(),
            Inner::Ready(_) => true,
        }
    }
}

impl IntoFuture for ResultFuture {
    type Output = Result<ResultSet, CqlError>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        match self.inner {
            Inner::Pending { task, .. } => async move { join(task.await) }.boxed(),
            Inner::Sequence(sequence) => sequence.wait().boxed(),
            Inner::Ready(outcome) => futures::future::ready(outcome.unwrap_or_else(|| Err(consumed()))).boxed(),
        }
    }
}
