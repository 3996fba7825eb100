//! Message channel abstraction.
//!
//! The engine needs exactly two things from a transport: a way to send one
//! serialized payload, and a stream of incoming payloads. Anything that can
//! provide both (a socket, a worker port, a pipe pair) plugs in through
//! [`ChannelSender`] and [`ChannelReceiver`].
//!
//! Two reference channels ship with the crate:
//! - [`memory`]: an in-process pair, mostly for tests and same-process peers
//! - [`framed`]: length-prefixed frames over any `AsyncRead`/`AsyncWrite`

pub mod framed;
pub mod memory;

use crate::error::Result;
use crate::serializer::Payload;
use async_trait::async_trait;

/// Outbound half of a channel.
#[async_trait]
pub trait ChannelSender: Send + 'static {
    /// Hand one payload to the transport.
    async fn send(&mut self, payload: Payload) -> Result<()>;
}

/// Inbound half of a channel.
#[async_trait]
pub trait ChannelReceiver: Send + 'static {
    /// Wait for the next payload.
    ///
    /// `None` means the channel closed cleanly. A transport failure is
    /// reported as `Some(Err(_))` and also ends the conversation.
    async fn recv(&mut self) -> Option<Result<Payload>>;
}

#[async_trait]
impl<S: ChannelSender + ?Sized> ChannelSender for Box<S> {
    async fn send(&mut self, payload: Payload) -> Result<()> {
        (**self).send(payload).await
    }
}

#[async_trait]
impl<R: ChannelReceiver + ?Sized> ChannelReceiver for Box<R> {
    async fn recv(&mut self) -> Option<Result<Payload>> {
        (**self).recv().await
    }
}
