//! Framed transport for driver-remote exchanges.
//!
//! A stream socket only guarantees ordered delivery in bounded chunks, so
//! each logical message is negotiated: the sender announces the chunk
//! count, waits for a one-byte acknowledgement, then streams the payload.
//! Works over any AsyncRead/AsyncWrite (TCP in production, an in-memory
//! duplex in tests).

use std::io;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest chunk moved in a single stream operation.
pub const MAX_PACKET_SIZE: usize = 1024;

const ACK: [u8; 1] = [b'1'];

#[derive(Debug, Error)]
pub enum ChannelError {
    /// The peer closed the stream mid-exchange.
    #[error("peer disconnected")]
    Disconnected,

    /// The packet-count header was not a decimal integer.
    #[error("malformed packet-count header: {0:?}")]
    MalformedHeader(String),

    #[error("stream error: {0}")]
    Io(#[from] io::Error),
}

/// One logical message per `send`/`recv` pair.
///
/// The exchange is strictly lockstep and the channel is only ever used
/// half-duplex, so the acknowledgement byte can never interleave with
/// payload chunks.
pub struct FramedChannel<S> {
    stream: S,
}

impl<S: AsyncRead + AsyncWrite + Unpin> FramedChannel<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Send one message, blocking until the receiver has acknowledged the
    /// chunk count and the full payload has been written.
    pub async fn send(&mut self, payload: &[u8]) -> Result<(), ChannelError> {
        let chunks = payload.len().div_ceil(MAX_PACKET_SIZE);
        tracing::trace!(len = payload.len(), chunks, "sending frame");

        self.stream.write_all(chunks.to_string().as_bytes()).await?;
        self.stream.flush().await?;

        let mut ack = [0u8; 1];
        if self.stream.read(&mut ack).await? == 0 {
            return Err(ChannelError::Disconnected);
        }

        for chunk in payload.chunks(MAX_PACKET_SIZE) {
            self.stream.write_all(chunk).await?;
        }
        self.stream.flush().await?;
        Ok(())
    }

    /// Receive one message, blocking until every announced chunk arrived.
    ///
    /// An empty message announces zero chunks and needs no chunk reads.
    pub async fn recv(&mut self) -> Result<Vec<u8>, ChannelError> {
        let mut header = [0u8; MAX_PACKET_SIZE];
        let n = self.stream.read(&mut header).await?;
        if n == 0 {
            return Err(ChannelError::Disconnected);
        }

        let text = std::str::from_utf8(&header[..n]).map_err(|_| {
            ChannelError::MalformedHeader(String::from_utf8_lossy(&header[..n]).into_owned())
        })?;
        let chunks: usize = text
            .trim()
            .parse()
            .map_err(|_| ChannelError::MalformedHeader(text.to_string()))?;

        self.stream.write_all(&ACK).await?;
        self.stream.flush().await?;

        let mut payload = Vec::with_capacity(chunks.saturating_mul(MAX_PACKET_SIZE));
        for i in 0..chunks {
            let mut buf = [0u8; MAX_PACKET_SIZE];
            if i + 1 < chunks {
                // Interior chunks are full by construction.
                self.stream
                    .read_exact(&mut buf)
                    .await
                    .map_err(eof_as_disconnect)?;
                payload.extend_from_slice(&buf);
            } else {
                // The final chunk carries the remainder; a single
                // sub-packet write arrives in one read on a loopback
                // stream.
                let n = self.stream.read(&mut buf).await?;
                if n == 0 {
                    return Err(ChannelError::Disconnected);
                }
                payload.extend_from_slice(&buf[..n]);
            }
        }

        tracing::trace!(len = payload.len(), chunks, "received frame");
        Ok(payload)
    }
}

fn eof_as_disconnect(e: io::Error) -> ChannelError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        ChannelError::Disconnected
    } else {
        ChannelError::Io(e)
    }
}
