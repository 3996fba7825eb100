//! The engine pump: inbound routing, local dispatch and outbound delivery.

use super::{Engine, Outcome, Outgoing, Route};
use crate::channel::{ChannelReceiver, ChannelSender};
use crate::error::{Result, RpcError};
use crate::protocol::{
    codes, is_response_shape, raw_id, Envelope, ErrorResponse, Id, Message, Request,
    SuccessResponse,
};
use crate::recover::{recover_error_object, remove_stack_header, RemoteError};
use crate::serializer::Payload;
use futures::future::{join_all, BoxFuture};
use futures::stream::{self, FuturesUnordered};
use futures::{FutureExt, StreamExt};
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Drives one engine until its channel closes.
///
/// Dropping the driver closes the engine: pending calls are rejected with
/// [`RpcError::ChannelClosed`] and new calls fail immediately.
pub struct Driver {
    engine: Arc<Engine>,
    sender: Box<dyn ChannelSender>,
    receiver: Option<Box<dyn ChannelReceiver>>,
    outbound: mpsc::UnboundedReceiver<Outgoing>,
}

/// Result of routing one request to a handler.
enum Dispatched {
    Done(std::result::Result<Outcome, RemoteError>),
    NotFound,
}

impl Driver {
    pub(crate) fn new(
        engine: Arc<Engine>,
        sender: Box<dyn ChannelSender>,
        receiver: Box<dyn ChannelReceiver>,
        outbound: mpsc::UnboundedReceiver<Outgoing>,
    ) -> Self {
        Self {
            engine,
            sender,
            receiver: Some(receiver),
            outbound,
        }
    }

    /// Pump messages until the channel closes.
    ///
    /// Returns `Ok(())` when the peer closed the channel cleanly and the
    /// transport error otherwise. Either way every pending call is rejected
    /// once this returns.
    pub async fn run(mut self) -> Result<()> {
        let engine = self.engine.clone();
        let Some(receiver) = self.receiver.take() else {
            return Ok(());
        };

        // Reads go through a stream so a message is never lost to a
        // cancelled `recv` when another branch wins the select.
        let mut incoming = Box::pin(stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|item| (item, receiver))
        }));
        let mut inflight: FuturesUnordered<BoxFuture<'static, ()>> = FuturesUnordered::new();

        debug!("{}: engine running", engine.name());

        let result = loop {
            tokio::select! {
                item = incoming.next() => match item {
                    Some(Ok(payload)) => {
                        if let Some(task) = engine.receive(payload) {
                            inflight.push(task);
                        }
                    }
                    Some(Err(e)) => {
                        warn!("{}: channel failed: {}", engine.name(), e);
                        break Err(e);
                    }
                    None => {
                        info!("{}: channel closed", engine.name());
                        break Ok(());
                    }
                },
                Some(outgoing) = self.outbound.recv() => {
                    engine.deliver(&mut self.sender, outgoing).await;
                }
                Some(()) = inflight.next(), if !inflight.is_empty() => {}
            }
        };

        engine.shutdown();
        result
    }

    /// Run the driver on the current tokio runtime.
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.engine.shutdown();
    }
}

impl Engine {
    async fn deliver(&self, sender: &mut Box<dyn ChannelSender>, outgoing: Outgoing) {
        let (payload, ids) = match outgoing {
            Outgoing::Message { payload, ids } => (payload, ids),
            Outgoing::Flush(done) => {
                let _ = done.send(());
                return;
            }
        };
        if let Err(e) = sender.send(payload).await {
            warn!("{}: send failed: {}", self.name(), e);
            for id in ids {
                self.pending.settle(&id, Err(e.clone()));
            }
        }
    }

    /// Route one inbound payload. Responses settle immediately; requests
    /// return a task that runs the handler and queues the answer.
    fn receive(self: &Arc<Self>, payload: Payload) -> Option<BoxFuture<'static, ()>> {
        let value = match self.options.serializer.deserialize(&payload) {
            Ok(value) => value,
            Err(e) => {
                warn!("{}: undecodable message: {}", self.name(), e);
                if self.options.strict.unknown_message {
                    let response = if payload.is_text() {
                        ErrorResponse::parse_error(e.to_string())
                    } else {
                        ErrorResponse::invalid_request(None)
                    };
                    self.respond_message(response.into());
                }
                return None;
            }
        };

        match Envelope::from(value) {
            Envelope::Single(value) => {
                let id = raw_id(&value);
                let is_response = is_response_shape(&value);
                match Message::from_value(value) {
                    Ok(Message::Request(request)) => {
                        let engine = self.clone();
                        Some(
                            async move {
                                if let Some(response) = engine.clone().dispatch(request).await {
                                    engine.respond_message(response);
                                }
                            }
                            .boxed(),
                        )
                    }
                    Ok(response) => {
                        self.settle(response);
                        None
                    }
                    Err(e) if is_response => {
                        self.fail_malformed_response(id, e);
                        None
                    }
                    Err(e) => {
                        self.reject_unknown(id, &e);
                        None
                    }
                }
            }
            Envelope::Batch(items) => self.receive_batch(items),
        }
    }

    fn receive_batch(self: &Arc<Self>, items: Vec<Value>) -> Option<BoxFuture<'static, ()>> {
        if items.is_empty() {
            self.reject_unknown(
                None,
                &RpcError::InvalidMessage {
                    message: "empty batch".to_string(),
                },
            );
            return None;
        }

        let mut requests = Vec::new();
        let mut immediate = Vec::new();
        for item in items {
            let id = raw_id(&item);
            let is_response = is_response_shape(&item);
            match Message::from_value(item) {
                Ok(Message::Request(request)) => requests.push(request),
                Ok(response) => self.settle(response),
                Err(e) if is_response => self.fail_malformed_response(id, e),
                Err(e) => {
                    warn!("{}: invalid batch entry: {}", self.name(), e);
                    if self.options.strict.unknown_message {
                        immediate.push(Message::from(ErrorResponse::invalid_request(id)));
                    }
                }
            }
        }

        if requests.is_empty() && immediate.is_empty() {
            return None;
        }

        let engine = self.clone();
        Some(
            async move {
                let answered = join_all(
                    requests
                        .into_iter()
                        .map(|request| engine.clone().dispatch(request)),
                )
                .await;

                let mut responses = immediate;
                responses.extend(answered.into_iter().flatten());
                if responses.is_empty() {
                    return;
                }

                let encoded: std::result::Result<Vec<Value>, _> =
                    responses.iter().map(Message::to_value).collect();
                match encoded {
                    Ok(items) => engine.respond(&Value::Array(items)),
                    Err(e) => warn!("{}: failed to encode batch response: {}", engine.name(), e),
                }
            }
            .boxed(),
        )
    }

    fn reject_unknown(&self, id: Option<Id>, error: &RpcError) {
        warn!("{}: ignoring invalid message: {}", self.name(), error);
        if self.options.strict.unknown_message {
            self.respond_message(ErrorResponse::invalid_request(id).into());
        }
    }

    /// A response that cannot be decoded still ends its call. Responses are
    /// never answered.
    fn fail_malformed_response(&self, id: Option<Id>, error: RpcError) {
        warn!("{}: malformed response: {}", self.name(), error);
        if let Some(id) = id {
            if !self.pending.settle(&id, Err(error)) {
                debug!("{}: discarding malformed response for unknown call {}", self.name(), id);
            }
        }
    }

    /// Hand a response to the call waiting for it.
    fn settle(&self, message: Message) {
        match message {
            Message::Success(response) => {
                let Some(id) = response.id.clone() else {
                    warn!("{}: success response without id", self.name());
                    return;
                };
                let result = response.into_result(self.options.keep_undefined);
                if !self.pending.settle(&id, Ok(result)) {
                    debug!("{}: discarding response for unknown call {}", self.name(), id);
                }
            }
            Message::Error(response) => {
                let Some(id) = response.id else {
                    warn!(
                        "{}: peer reported an error: {} ({})",
                        self.name(),
                        response.error.message,
                        response.error.code
                    );
                    return;
                };
                match self.pending.take(&id) {
                    Some(call) => {
                        let mut error = recover_error_object(&response.error);
                        error.append_stack(&remove_stack_header(&call.call_site));
                        debug!("{}: {} ({}) failed: {}", self.name(), call.method, id, error);
                        let _ = call.sender.send(Err(RpcError::Remote(error)));
                    }
                    None => {
                        debug!("{}: discarding error for unknown call {}", self.name(), id);
                    }
                }
            }
            Message::Request(_) => {}
        }
    }

    /// Run one inbound request. Returns the response to send, if any.
    async fn dispatch(self: Arc<Self>, request: Request) -> Option<Message> {
        let Request {
            id,
            method,
            params,
            remote_stack,
            ..
        } = request;

        let dispatched = match Route::of(&method) {
            Route::Internal(internal) => match &self.internal {
                Some(handler) => Dispatched::Done(
                    catch_panic(handler.handle(internal, params)).await,
                ),
                None => Dispatched::NotFound,
            },
            Route::User(name) => {
                let handler = self
                    .implementation
                    .resolve()
                    .await
                    .and_then(|implementation| implementation.method(name));
                match handler {
                    Some(handler) => Dispatched::Done(
                        catch_panic(async move { handler(params).await.map(Outcome::Reply) })
                            .await,
                    ),
                    None => Dispatched::NotFound,
                }
            }
            Route::Reserved => Dispatched::NotFound,
        };

        let outcome = match dispatched {
            Dispatched::NotFound => {
                if self.options.strict.method_not_found {
                    debug!("{}: method not found: {}", self.name(), method);
                    return id.map(|id| ErrorResponse::method_not_found(Some(id)).into());
                }
                debug!("{}: ignoring call to unknown method {}", self.name(), method);
                return None;
            }
            Dispatched::Done(outcome) => outcome,
        };

        match outcome {
            Ok(Outcome::Ignore) => None,
            Ok(Outcome::Reply(result)) => {
                let id = id?;
                Some(SuccessResponse::new(Some(id), result, self.options.keep_undefined).into())
            }
            Err(error) => {
                let error = match &self.options.map_error {
                    Some(map) => map(error),
                    None => error,
                };

                if tracing::enabled!(tracing::Level::DEBUG) {
                    let mut trace = error.stack().to_string();
                    if let Some(remote) = &remote_stack {
                        trace.push('\n');
                        trace.push_str(remote);
                    }
                    debug!("{}: {} failed\n{}", self.name(), method, trace);
                } else {
                    warn!("{}: {} failed: {}", self.name(), method, error);
                }

                let id = id?;
                Some(ErrorResponse::from_error(Some(id), &error).into())
            }
        }
    }
}

/// Turn a panicking handler into an internal error.
async fn catch_panic<F>(future: F) -> std::result::Result<Outcome, RemoteError>
where
    F: std::future::Future<Output = std::result::Result<Outcome, RemoteError>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => {
            Err(RemoteError::error(panic_message(panic)).with_code(codes::INTERNAL_ERROR))
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "method panicked".to_string()
    }
}
