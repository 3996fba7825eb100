//! Batched calls.
//!
//! A [`Batch`] queues calls and notifications locally and sends them as a
//! single JSON-RPC batch envelope. Each queued call gets its own [`Reply`],
//! settled individually when the batch response arrives.

use crate::engine::{validate_method_name, AsyncCall, Reply};
use crate::error::{Result, RpcError};
use crate::protocol::{Params, Request};
use serde_json::Value;
use std::mem;
use std::panic::Location;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Calls queued for one batch envelope.
///
/// Dropping a batch that was never sent aborts it.
pub struct Batch {
    remote: AsyncCall,
    queue: Mutex<Vec<Request>>,
}

impl Batch {
    pub fn new(remote: AsyncCall) -> Self {
        Self {
            remote,
            queue: Mutex::new(Vec::new()),
        }
    }

    fn queue(&self) -> MutexGuard<'_, Vec<Request>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a call. The reply settles after [`send`](Self::send).
    #[track_caller]
    pub fn call(&self, method: &str, params: impl Into<Params>) -> Reply<Value> {
        self.enqueue(method, params.into(), Location::caller())
    }

    /// Queue a call, keeping "no value" distinct from `null`.
    #[track_caller]
    pub fn call_optional(&self, method: &str, params: impl Into<Params>) -> Reply<Option<Value>> {
        self.enqueue(method, params.into(), Location::caller())
    }

    /// Queue a notification.
    pub fn notify(&self, method: &str, params: impl Into<Params>) -> Result<()> {
        validate_method_name(method)?;
        self.queue()
            .push(Request::notification(method, params.into()));
        Ok(())
    }

    fn enqueue<T>(&self, method: &str, params: Params, location: &Location<'_>) -> Reply<T> {
        if let Err(e) = validate_method_name(method) {
            return Reply::ready(Err(e));
        }
        match self.remote.prepare(method.to_string(), params, location) {
            Ok((request, reply)) => {
                self.queue().push(request);
                reply
            }
            Err(e) => Reply::ready(Err(e)),
        }
    }

    pub fn len(&self) -> usize {
        self.queue().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue().is_empty()
    }

    /// Send everything queued so far as one envelope and empty the queue.
    ///
    /// Sending an empty batch does nothing. If the envelope cannot be
    /// submitted, every queued call fails with the same error.
    pub fn send(&self) -> Result<()> {
        let requests = mem::take(&mut *self.queue());
        if requests.is_empty() {
            return Ok(());
        }

        if let Err(e) = self.remote.submit_batch(&requests) {
            self.remote.reject(requests.into_iter().filter_map(|r| r.id), e.clone());
            return Err(e);
        }
        Ok(())
    }

    /// Discard everything queued and fail the queued calls with `error`
    /// (`Aborted` by default).
    pub fn abort(&self, error: Option<RpcError>) {
        let requests = mem::take(&mut *self.queue());
        if requests.is_empty() {
            return;
        }

        debug!("Aborting batch of {} message(s)", requests.len());
        let error = error.unwrap_or_else(RpcError::aborted);
        self.remote.reject(requests.into_iter().filter_map(|r| r.id), error);
    }
}

impl Drop for Batch {
    fn drop(&mut self) {
        self.abort(None);
    }
}
