//! Pending-call table and the [`Reply`] future handed to callers.

use crate::error::{Result, RpcError};
use crate::protocol::Id;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Sleep;

pub(crate) type Settlement = Result<Option<Value>>;

/// An outstanding call waiting for its response.
pub(crate) struct PendingCall {
    pub sender: oneshot::Sender<Settlement>,
    pub method: String,
    /// Local trace captured when the call was issued.
    pub call_site: String,
}

#[derive(Default)]
struct Calls {
    map: HashMap<Id, PendingCall>,
    closed: bool,
}

/// Correlation table shared by the engine handle, the driver and every
/// outstanding [`Reply`].
#[derive(Default)]
pub(crate) struct PendingTable {
    calls: Mutex<Calls>,
}

impl PendingTable {
    fn lock(&self) -> MutexGuard<'_, Calls> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, id: Id, call: PendingCall) -> Result<()> {
        let mut calls = self.lock();
        if calls.closed {
            return Err(RpcError::ChannelClosed);
        }
        if calls.map.contains_key(&id) {
            return Err(RpcError::DuplicateId(id));
        }
        calls.map.insert(id, call);
        Ok(())
    }

    pub fn take(&self, id: &Id) -> Option<PendingCall> {
        self.lock().map.remove(id)
    }

    /// Settle a call. Returns `false` if no call is waiting under `id`.
    pub fn settle(&self, id: &Id, settlement: Settlement) -> bool {
        match self.take(id) {
            Some(call) => {
                // The caller may have stopped waiting in the meantime.
                let _ = call.sender.send(settlement);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().map.len()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Reject every waiting call and refuse new ones. Returns how many calls
    /// were rejected.
    pub fn close(&self) -> usize {
        let drained: Vec<PendingCall> = {
            let mut calls = self.lock();
            calls.closed = true;
            calls.map.drain().map(|(_, call)| call).collect()
        };

        let count = drained.len();
        for call in drained {
            let _ = call.sender.send(Err(RpcError::ChannelClosed));
        }
        count
    }
}

/// Removes the pending entry when a caller stops waiting.
pub(crate) struct PendingGuard {
    table: Arc<PendingTable>,
    id: Option<Id>,
}

impl PendingGuard {
    pub fn new(table: Arc<PendingTable>, id: Id) -> Self {
        Self {
            table,
            id: Some(id),
        }
    }

    fn id(&self) -> Option<&Id> {
        self.id.as_ref()
    }

    /// Forget the entry without touching the table.
    fn disarm(&mut self) {
        self.id = None;
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.table.take(&id);
        }
    }
}

/// Conversion from a settled call into the value a [`Reply`] yields.
pub trait FromReply: Sized {
    fn from_reply(value: Option<Value>) -> Self;
}

/// "No value" collapses to `null`.
impl FromReply for Value {
    fn from_reply(value: Option<Value>) -> Self {
        value.unwrap_or(Value::Null)
    }
}

/// Keeps "no value" (`None`) apart from an explicit `null`.
impl FromReply for Option<Value> {
    fn from_reply(value: Option<Value>) -> Self {
        value
    }
}

enum ReplyState {
    Waiting(oneshot::Receiver<Settlement>),
    Ready(Settlement),
    Done,
}

/// Future resolving to the outcome of one remote call.
///
/// Dropping a `Reply` stops waiting: the pending entry is removed and a late
/// response is discarded. The request itself has already been handed to the
/// channel and is not recalled.
#[must_use = "a Reply does nothing unless awaited"]
pub struct Reply<T = Value> {
    state: ReplyState,
    guard: Option<PendingGuard>,
    deadline: Option<(Pin<Box<Sleep>>, Duration)>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Reply<T> {
    pub(crate) fn waiting(
        receiver: oneshot::Receiver<Settlement>,
        guard: PendingGuard,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            state: ReplyState::Waiting(receiver),
            guard: Some(guard),
            deadline: timeout.map(|limit| (Box::pin(tokio::time::sleep(limit)), limit)),
            _marker: PhantomData,
        }
    }

    /// A reply that is already settled, used for failures detected before
    /// anything was sent.
    pub(crate) fn ready(settlement: Settlement) -> Self {
        Self {
            state: ReplyState::Ready(settlement),
            guard: None,
            deadline: None,
            _marker: PhantomData,
        }
    }

    /// Correlation ID of the call, if it was issued.
    pub fn id(&self) -> Option<&Id> {
        self.guard.as_ref().and_then(PendingGuard::id)
    }

    /// Stop waiting. The reply resolves to [`RpcError::Cancelled`].
    pub fn cancel(&mut self) {
        if matches!(self.state, ReplyState::Waiting(_)) {
            self.guard = None;
            self.state = ReplyState::Ready(Err(RpcError::Cancelled));
        }
    }
}

impl<T: FromReply> Future for Reply<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        let settlement = match std::mem::replace(&mut this.state, ReplyState::Done) {
            ReplyState::Ready(settlement) => settlement,
            ReplyState::Done => Err(RpcError::Cancelled),
            ReplyState::Waiting(mut receiver) => match Pin::new(&mut receiver).poll(cx) {
                Poll::Ready(Ok(settlement)) => {
                    if let Some(guard) = this.guard.as_mut() {
                        guard.disarm();
                    }
                    settlement
                }
                // The table dropped the sender without settling: torn down.
                Poll::Ready(Err(_)) => Err(RpcError::ChannelClosed),
                Poll::Pending => {
                    let expired = match this.deadline.as_mut() {
                        Some((sleep, limit)) => {
                            sleep.as_mut().poll(cx).is_ready().then_some(*limit)
                        }
                        None => None,
                    };
                    match expired {
                        Some(limit) => Err(RpcError::Timeout(limit)),
                        None => {
                            this.state = ReplyState::Waiting(receiver);
                            return Poll::Pending;
                        }
                    }
                }
            },
        };

        this.guard = None;
        this.deadline = None;
        Poll::Ready(settlement.map(T::from_reply))
    }
}
