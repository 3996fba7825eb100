//! Length-prefixed framing over byte streams.
//!
//! Frame format: `[4-byte BE u32 length][payload bytes]`. Suitable for TCP,
//! Unix sockets, pipes, or `tokio::io::duplex` in tests.

use super::{ChannelReceiver, ChannelSender};
use crate::config::ChannelConfig;
use crate::error::{Result, RpcError};
use crate::serializer::Payload;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

/// Read one length-prefixed frame.
///
/// Returns `None` on a clean EOF before the length prefix.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > ChannelConfig::MAX_FRAME_SIZE {
        return Err(RpcError::Transport {
            message: format!(
                "Frame size {} exceeds maximum {}",
                len,
                ChannelConfig::MAX_FRAME_SIZE
            ),
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// Write one length-prefixed frame and flush.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    if payload.len() > ChannelConfig::MAX_FRAME_SIZE {
        return Err(RpcError::Transport {
            message: format!(
                "Frame size {} exceeds maximum {}",
                payload.len(),
                ChannelConfig::MAX_FRAME_SIZE
            ),
        });
    }

    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Sending half over any async writer.
#[derive(Debug)]
pub struct FramedSender<W> {
    writer: W,
}

/// Receiving half over any async reader.
#[derive(Debug)]
pub struct FramedReceiver<R> {
    reader: R,
}

impl<W> FramedSender<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<R> FramedReceiver<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

#[async_trait]
impl<W> ChannelSender for FramedSender<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&mut self, payload: Payload) -> Result<()> {
        write_frame(&mut self.writer, payload.as_bytes()).await
    }
}

#[async_trait]
impl<R> ChannelReceiver for FramedReceiver<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    async fn recv(&mut self) -> Option<Result<Payload>> {
        read_frame(&mut self.reader)
            .await
            .transpose()
            .map(|frame| frame.map(Payload::from_bytes))
    }
}

/// Split a bidirectional stream into a framed sender and receiver.
pub fn framed<S>(stream: S) -> (FramedSender<WriteHalf<S>>, FramedReceiver<ReadHalf<S>>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    (FramedSender::new(writer), FramedReceiver::new(reader))
}
