//! Session / transport layer.
//!
//! One task per connection. Each session reads frames in arrival order,
//! admits observations synchronously and computes decisions on spawned
//! tasks, so a slow decision for one device never stalls reading the next
//! message. A writer task owns the write half and sends decisions in the
//! order they complete.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use adr_core::SessionId;
use adr_wire::{read_frame, write_frame, Decision, Frame, Observation, WireError, MAX_FRAME_SIZE};

use crate::dispatcher::Dispatcher;
use crate::error::{ControllerError, Result};

const OUTBOUND_QUEUE_DEPTH: usize = 256;

/// Accepts environment connections and serves them until shutdown.
pub struct Server {
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
}

impl Server {
    pub async fn bind(addr: &str, dispatcher: Arc<Dispatcher>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ControllerError::Startup(format!("cannot listen on {}: {}", addr, e)))?;
        info!(addr = %listener.local_addr()?, "controller listening");
        Ok(Self { listener, dispatcher })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept sessions until `shutdown` resolves.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("no longer accepting sessions");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let dispatcher = Arc::clone(&self.dispatcher);
                        tokio::spawn(serve_session(stream, peer, dispatcher));
                    }
                    Err(e) => {
                        error!(error = %e, "accept failed");
                    }
                }
            }
        }
    }
}

async fn serve_session(stream: TcpStream, peer: SocketAddr, dispatcher: Arc<Dispatcher>) {
    let session = SessionId::generate();
    dispatcher.session_opened();
    info!(session = %session, peer = %peer, "session opened");

    if let Err(e) = stream.set_nodelay(true) {
        debug!(session = %session, error = %e, "could not disable nagle");
    }
    let (reader, writer) = stream.into_split();
    let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
    tokio::spawn(write_decisions(writer, rx, session));

    match read_observations(BufReader::new(reader), session, &dispatcher, tx).await {
        Ok(()) => info!(session = %session, "session closed by peer"),
        Err(e) => warn!(session = %session, error = %e, "session ended"),
    }

    dispatcher.session_closed(session);
}

/// Read loop for one session. Only transport failures end it, on either
/// half: once the writer is gone there is nobody to answer.
async fn read_observations<R>(
    mut reader: R,
    session: SessionId,
    dispatcher: &Arc<Dispatcher>,
    outbound: mpsc::Sender<Decision>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    loop {
        let frame = tokio::select! {
            frame = read_frame(&mut reader) => frame?,
            _ = outbound.closed() => {
                return Err(ControllerError::Connection(WireError::ConnectionClosed));
            }
        };

        let payload = match frame {
            Some(Frame::Payload(payload)) => payload,
            Some(Frame::Oversized(len)) => {
                dispatcher.record_malformed();
                let e = WireError::FrameTooLarge {
                    len,
                    max: MAX_FRAME_SIZE,
                };
                warn!(session = %session, error = %e, "message dropped");
                continue;
            }
            None => return Ok(()),
        };

        let obs = match Observation::decode(&payload) {
            Ok(obs) => obs,
            Err(e) => {
                dispatcher.record_malformed();
                warn!(session = %session, error = %e, "message dropped");
                continue;
            }
        };

        let Some(admission) = dispatcher.admit(session, obs) else {
            continue;
        };

        let dispatcher = Arc::clone(dispatcher);
        let outbound = outbound.clone();
        tokio::spawn(async move {
            let device = admission.device().clone();
            if let Some(decision) = dispatcher.decide(admission).await {
                if outbound.send(decision).await.is_err() {
                    debug!(device = %device, "session writer gone, decision dropped");
                }
            }
        });
    }
}

async fn write_decisions(
    mut writer: OwnedWriteHalf,
    mut decisions: mpsc::Receiver<Decision>,
    session: SessionId,
) {
    while let Some(decision) = decisions.recv().await {
        if let Err(e) = write_frame(&mut writer, decision.encode().as_bytes()).await {
            warn!(session = %session, device = %decision.device, error = %e, "send failed");
            break;
        }
    }
    debug!(session = %session, "session writer finished");
}
