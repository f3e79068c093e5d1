//! Environment-side client.
//!
//! What a simulated network (or a test) uses to talk to the controller: send
//! observations, read back decisions.

use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::debug;

use crate::error::{Result, WireError};
use crate::framing::{read_frame, write_frame, Frame};
use crate::wire::{Decision, Observation};

pub struct EnvClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl EnvClient {
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
        })
    }

    pub async fn send(&mut self, observation: &Observation) -> Result<()> {
        let payload = observation.encode();
        debug!(device = %observation.device, payload = %payload, "sending observation");
        write_frame(&mut self.writer, payload.as_bytes()).await
    }

    /// Send an arbitrary payload as one frame, bypassing the codec.
    pub async fn send_raw(&mut self, payload: &[u8]) -> Result<()> {
        write_frame(&mut self.writer, payload).await
    }

    /// Next decision, or `None` once the controller closed the connection.
    pub async fn recv(&mut self) -> Result<Option<Decision>> {
        match read_frame(&mut self.reader).await? {
            Some(Frame::Payload(bytes)) => Decision::decode(&bytes).map(Some),
            Some(Frame::Oversized(len)) => Err(WireError::FrameTooLarge {
                len,
                max: crate::framing::MAX_FRAME_SIZE,
            }),
            None => Ok(None),
        }
    }

    /// Send one observation and wait up to `timeout` for the next decision.
    pub async fn request(&mut self, observation: &Observation, timeout: Duration) -> Result<Decision> {
        self.send(observation).await?;
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(Ok(Some(decision))) => Ok(decision),
            Ok(Ok(None)) => Err(WireError::ConnectionClosed),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(WireError::Timeout),
        }
    }

    pub async fn close(mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
