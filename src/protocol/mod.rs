//! Control↔agent protocol: wire format, mutual TLS, and the agent-side
//! connection state machine.

pub mod connection;
pub mod tls;
pub mod wire;

use futures::{SinkExt, StreamExt};
use tokio::io::{split, AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio_util::codec::{Framed, FramedRead, FramedWrite, LengthDelimitedCodec};

use thiserror::Error;
use wire::WireError;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("connection closed by peer")]
    ClosedByPeer,
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}

/// Wraps a TLS stream in the length-delimited framing every protocol
/// message rides on, and provides typed send/receive over it.
pub struct MessageStream<S> {
    framed: Framed<S, LengthDelimitedCodec>,
}

impl<S> MessageStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            framed: Framed::new(stream, LengthDelimitedCodec::new()),
        }
    }

    pub async fn send<T: serde::Serialize>(&mut self, message: &T) -> Result<(), ProtocolError> {
        let bytes = wire::encode(message)?;
        self.framed.send(bytes.into()).await?;
        Ok(())
    }

    pub async fn recv<T: for<'de> serde::Deserialize<'de>>(&mut self) -> Result<T, ProtocolError> {
        let bytes = self
            .framed
            .next()
            .await
            .ok_or(ProtocolError::ClosedByPeer)??;
        Ok(wire::decode(&bytes)?)
    }

    /// Splits into an independently-owned writer and reader. Needed wherever
    /// a caller must send and receive concurrently (`tokio::select!` can't
    /// hold two `&mut self` borrows of the same `MessageStream` across its
    /// arms); each half borrows only its own framed stream.
    pub fn split(self) -> (MessageWriter<S>, MessageReader<S>) {
        let (read_half, write_half) = split(self.framed.into_inner());
        (
            MessageWriter {
                framed: FramedWrite::new(write_half, LengthDelimitedCodec::new()),
            },
            MessageReader {
                framed: FramedRead::new(read_half, LengthDelimitedCodec::new()),
            },
        )
    }
}

pub struct MessageWriter<S> {
    framed: FramedWrite<WriteHalf<S>, LengthDelimitedCodec>,
}

impl<S: AsyncWrite + Unpin> MessageWriter<S> {
    pub async fn send<T: serde::Serialize>(&mut self, message: &T) -> Result<(), ProtocolError> {
        let bytes = wire::encode(message)?;
        self.framed.send(bytes.into()).await?;
        Ok(())
    }
}

pub struct MessageReader<S> {
    framed: FramedRead<ReadHalf<S>, LengthDelimitedCodec>,
}

impl<S: AsyncRead + Unpin> MessageReader<S> {
    pub async fn recv<T: for<'de> serde::Deserialize<'de>>(&mut self) -> Result<T, ProtocolError> {
        let bytes = self
            .framed
            .next()
            .await
            .ok_or(ProtocolError::ClosedByPeer)??;
        Ok(wire::decode(&bytes)?)
    }
}
