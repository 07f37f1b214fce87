pub mod driver;
pub mod future;
pub mod gate;
pub mod result;
pub mod sequence;

pub use driver::{BatchKind, Driver, RawResult, Request, StatementCapture};
pub use future::ResultFuture;
pub use gate::GateKind;
pub use result::ResultSet;
pub use sequence::SequenceFuture;

use crate::error::CqlError;
use tokio::task::JoinError;

/// Flattens a joined dispatch task into the statement outcome.
pub(crate) fn join(joined: Result<Result<ResultSet, CqlError>, JoinError>) -> Result<ResultSet, CqlError> {
    match joined {
        Ok(outcome) => outcome,
        Err(err) if err.is_cancelled() => Err(CqlError::Cancelled),
        Err(err) => Err(CqlError::Custom(format!("execution task panicked: {}", err))),
    }
}
