//! In-process driver for tests: records every request and answers from a programmable responder.

use crate::error::{CqlError, DriverError};
use crate::exec::driver::{Driver, RawResult, Request};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime};

type Responder = Box<dyn Fn(&Request) -> Result<RawResult, DriverError> + Send + Sync>;

pub struct RecordingDriver {
    runtime: Option<Runtime>,
    handle: Handle,
    requests: Mutex<Vec<Request>>,
    responder: RwLock<Option<Responder>>,
    latency: RwLock<Option<Duration>>,
}

impl RecordingDriver {
    pub fn new() -> Result<Arc<Self>, CqlError> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(4)
            .thread_name("cqlbit-driver")
            .enable_all()
            .build()
            .map_err(|e| CqlError::Custom(format!("driver runtime: {}", e)))?;
        let handle = runtime.handle().clone();
        Ok(Arc::new(RecordingDriver {
            runtime: Some(runtime),
            handle,
            requests: Mutex::new(Vec::new()),
            responder: RwLock::new(None),
            latency: RwLock::new(None),
        }))
    }

    /// Requests in the order the driver received them.
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn texts(&self) -> Vec<String> {
        self.requests().iter().map(Request::text).collect()
    }

    pub fn clear(&self) {
        if let Ok(mut requests) = self.requests.lock() {
            requests.clear();
        }
    }

    pub fn respond_with(&self, responder: impl Fn(&Request) -> Result<RawResult, DriverError> + Send + Sync + 'static) {
        if let Ok(mut slot) = self.responder.write() {
            *slot = Some(Box::new(responder));
        }
    }

    /// Delays every answer, leaving room for cancellation and concurrent callers.
    pub fn with_latency(&self, latency: Duration) {
        if let Ok(mut slot) = self.latency.write() {
            *slot = Some(latency);
        }
    }
}

fn poisoned<T>(_: PoisonError<T>) -> DriverError {
    DriverError::Execution("recording driver poisoned".to_string())
}

#[async_trait]
impl Driver for RecordingDriver {
    async fn execute(&self, request: Request) -> Result<RawResult, DriverError> {
        self.requests.lock().map_err(poisoned)?.push(request.clone());
        let latency = *self.latency.read().map_err(poisoned)?;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let responder = self.responder.read().map_err(poisoned)?;
        match responder.as_ref() {
            Some(respond) => respond(&request),
            None => Ok(RawResult::default()),
        }
    }

    fn executor(&self) -> Handle {
        self.handle.clone()
    }
}

impl Drop for RecordingDriver {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Keyspace name unlikely to collide with one of a concurrently running test.
pub fn random_keyspace(prefix: &str) -> String {
    format!("{}_{:08x}", prefix, rand::random::<u32>())
}
