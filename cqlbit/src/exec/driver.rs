use crate::error::{CqlError, DriverError};
use crate::exec::result::{Decoding, ResultSet};
use crate::statement::clause::Options;
use crate::statement::TableQuery;
use crate::value::{Row, Value};
use crate::{debug, warn};
use async_trait::async_trait;
use std::fmt;
use std::sync::{Arc, RwLock};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    Logged,
    Unlogged,
    Counter,
}

impl BatchKind {
    fn begin(&self) -> &'static str {
        match self {
            BatchKind::Logged => "BEGIN BATCH",
            BatchKind::Unlogged => "BEGIN UNLOGGED BATCH",
            BatchKind::Counter => "BEGIN COUNTER BATCH",
        }
    }
}

/// One unit of work handed to the driver: a single query, or several queries sent as one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub keyspace: String,
    pub queries: Vec<TableQuery>,
    pub batch: Option<BatchKind>,
    pub options: Options,
}

impl Request {
    pub fn text(&self) -> String {
        match self.batch {
            None => self.queries.iter().map(|q| q.text.as_str()).collect::<Vec<_>>().join("; "),
            Some(kind) => {
                let body: Vec<String> = self.queries.iter().map(|q| format!("{};", q.text)).collect();
                format!("{}{} {} APPLY BATCH", kind.begin(), self.options.using(false), body.join(" "))
            }
        }
    }

    pub fn bindings(&self) -> Vec<Value> {
        self.queries.iter().flat_map(|q| q.bindings.iter().cloned()).collect()
    }

    pub fn tables(&self) -> Vec<&str> {
        self.queries.iter().map(|q| q.table.as_str()).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResult {
    pub rows: Vec<Row>,
    /// Outcome of a conditional write; `None` for unconditional statements.
    pub applied: Option<bool>,
}

impl RawResult {
    pub fn rows(rows: Vec<Row>) -> Self {
        RawResult { rows, applied: None }
    }

    pub fn applied(applied: bool) -> Self {
        RawResult { rows: Vec::new(), applied: Some(applied) }
    }
}

/// The network driver collaborator. It owns the executor every dispatch is spawned on.
#[async_trait]
pub trait Driver: Send + Sync {
    async fn execute(&self, request: Request) -> Result<RawResult, DriverError>;

    fn executor(&self) -> Handle;
}

/// Observes every request before dispatch; returning a result short-circuits the driver.
pub trait StatementCapture: Send + Sync {
    fn capture(&self, request: &Request) -> Option<Result<RawResult, DriverError>>;
}

impl<F> StatementCapture for F
where
    F: Fn(&Request) -> Option<Result<RawResult, DriverError>> + Send + Sync,
{
    fn capture(&self, request: &Request) -> Option<Result<RawResult, DriverError>> {
        self(request)
    }
}

/// How a rejected conditional write is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Expectation {
    Plain,
    NotExists,
    Exists,
    Condition,
}

pub(crate) struct Hop {
    pub request: Request,
    pub expectation: Expectation,
    pub decoding: Option<Decoding>,
}

impl fmt::Debug for Hop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hop").field("text", &self.request.text()).field("expectation", &self.expectation).finish()
    }
}

fn translate(hop: &Hop, result: Result<RawResult, DriverError>) -> Result<RawResult, CqlError> {
    match result {
        Err(DriverError::KeyspaceNotFound(keyspace)) => Err(CqlError::NotFound(format!("keyspace {}", keyspace))),
        Err(err) => Err(CqlError::ExecutionFailure(err)),
        Ok(raw) if raw.applied == Some(false) => match hop.expectation {
            Expectation::Plain => Ok(raw),
            Expectation::NotExists => Err(CqlError::AlreadyExists(hop.request.text())),
            Expectation::Exists | Expectation::Condition => Err(CqlError::ConditionNotApplied(hop.request.text())),
        },
        Ok(raw) => Ok(raw),
    }
}

/// Dispatches hops onto the driver's executor, letting capture hooks see each request first.
pub(crate) struct Executor {
    driver: Arc<dyn Driver>,
    captures: RwLock<Vec<Arc<dyn StatementCapture>>>,
}

impl Executor {
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self { driver, captures: RwLock::new(Vec::new()) }
    }

    pub fn handle(&self) -> Handle {
        self.driver.executor()
    }

    pub fn add_capture(&self, capture: Arc<dyn StatementCapture>) -> Result<(), CqlError> {
        self.captures.write()?.push(capture);
        Ok(())
    }

    pub fn clear_captures(&self) -> Result<(), CqlError> {
        self.captures.write()?.clear();
        Ok(())
    }

    pub async fn run(&self, hop: Hop) -> Result<ResultSet, CqlError> {
        let captures = self.captures.read()?.clone();
        let captured = captures.iter().find_map(|c| c.capture(&hop.request));
        let result = match captured {
            Some(result) => result,
            None => {
                debug!("dispatching to {}: {}", hop.request.keyspace, hop.request.text());
                self.driver.execute(hop.request.clone()).await
            }
        };
        let raw = translate(&hop, result).inspect_err(|e| warn!("{} failed: {}", hop.request.text(), e))?;
        Ok(ResultSet::new(raw, hop.decoding))
    }

    pub fn dispatch(self: &Arc<Self>, hop: Hop) -> JoinHandle<Result<ResultSet, CqlError>> {
        let executor = Arc::clone(self);
        self.handle().spawn(async move { executor.run(hop).await })
    }

    /// Runs one hop to completion from a thread outside the executor.
    pub fn run_blocking(self: &Arc<Self>, hop: Hop) -> Result<ResultSet, CqlError> {
        let handle = self.handle();
        let task = self.dispatch(hop);
        crate::exec::join(handle.block_on(task))
    }
}
