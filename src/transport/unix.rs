//! Unix domain socket pair channels.
//!
//! `ipc://<path>` endpoints carry frames over a `UnixStream` with a u32
//! little-endian length prefix. Each endpoint runs one background pump task
//! that owns the stream: it establishes the connection (connect side
//! retries until the peer appears, bind side accepts one peer at a time),
//! shuttles frames between the socket and the endpoint's bounded
//! inbox/outbox, and on connection loss goes back to establishing. That
//! reconnect loop is what lets a proxy outlive a restarted module host
//! without either side reopening the endpoint.

use super::{ChannelError, PairChannel, TrySendError};
use crate::defaults;
use crate::error::ProxyError;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

enum Endpoint {
    Connect(PathBuf),
    Accept(UnixListener),
}

/// One endpoint of a unix-socket pair.
pub struct UnixChannel {
    uri: String,
    socket_path: PathBuf,
    /// Only the binding side unlinks the socket file on close.
    owns_socket_file: bool,
    /// Taken on close so the pump drains what was accepted and exits.
    outbox: parking_lot::Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    inbox: tokio::sync::Mutex<mpsc::Receiver<Vec<u8>>>,
    closed: Arc<AtomicBool>,
    pump: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl UnixChannel {
    /// Connect to the socket at `uri`, retrying in the background until the
    /// binding peer appears.
    pub async fn connect(uri: &str) -> Result<Self, ProxyError> {
        let path = PathBuf::from(super::locator(uri)?);
        Self::start(uri, Endpoint::Connect(path.clone()), path, false)
    }

    /// Bind the socket at `uri` and accept one peer at a time. A stale
    /// socket file from an earlier run is removed first.
    pub async fn bind(uri: &str) -> Result<Self, ProxyError> {
        let path = PathBuf::from(super::locator(uri)?);
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path)
            .map_err(|e| ProxyError::TransportSetup(format!("bind {uri}: {e}")))?;
        Self::start(uri, Endpoint::Accept(listener), path, true)
    }

    fn start(
        uri: &str,
        endpoint: Endpoint,
        socket_path: PathBuf,
        owns_socket_file: bool,
    ) -> Result<Self, ProxyError> {
        let (outbox_tx, outbox_rx) = mpsc::channel(defaults::CHANNEL_DEPTH);
        let (inbox_tx, inbox_rx) = mpsc::channel(defaults::CHANNEL_DEPTH);
        let closed = Arc::new(AtomicBool::new(false));

        let pump = tokio::spawn(pump(
            uri.to_owned(),
            endpoint,
            outbox_rx,
            inbox_tx,
            closed.clone(),
        ));

        Ok(Self {
            uri: uri.to_owned(),
            socket_path,
            owns_socket_file,
            outbox: parking_lot::Mutex::new(Some(outbox_tx)),
            inbox: tokio::sync::Mutex::new(inbox_rx),
            closed,
            pump: parking_lot::Mutex::new(Some(pump)),
        })
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn cleanup_socket_file(&self) {
        if self.owns_socket_file {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %self.socket_path.display(), "failed to remove socket file: {e}");
                }
            }
        }
    }
}

#[async_trait]
impl PairChannel for UnixChannel {
    async fn send(&self, frame: Vec<u8>) -> Result<(), ChannelError> {
        let outbox = self.outbox.lock().clone();
        match outbox {
            Some(outbox) if !self.is_closed() => {
                outbox.send(frame).await.map_err(|_| ChannelError::Closed)
            }
            _ => Err(ChannelError::Closed),
        }
    }

    fn try_send(&self, frame: Vec<u8>) -> Result<(), TrySendError> {
        let outbox = self.outbox.lock().clone();
        let Some(outbox) = outbox.filter(|_| !self.is_closed()) else {
            return Err(TrySendError {
                frame,
                error: ChannelError::Closed,
            });
        };
        outbox.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(frame) => TrySendError {
                frame,
                error: ChannelError::WouldBlock,
            },
            mpsc::error::TrySendError::Closed(frame) => TrySendError {
                frame,
                error: ChannelError::Closed,
            },
        })
    }

    async fn recv(&self) -> Result<Vec<u8>, ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        let mut inbox = self.inbox.lock().await;
        match inbox.recv().await {
            Some(frame) => Ok(frame),
            None => Err(ChannelError::Closed),
        }
    }

    fn try_recv(&self) -> Result<Vec<u8>, ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        let mut inbox = self
            .inbox
            .try_lock()
            .map_err(|_| ChannelError::WouldBlock)?;
        match inbox.try_recv() {
            Ok(frame) => Ok(frame),
            Err(mpsc::error::TryRecvError::Empty) => Err(ChannelError::WouldBlock),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(ChannelError::Closed),
        }
    }

    async fn recv_timeout(&self, timeout: Duration) -> Result<Vec<u8>, ChannelError> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(result) => result,
            Err(_) => Err(ChannelError::TimedOut),
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Dropping the sender lets the pump flush frames it already
        // accepted, then exit on its own; the delayed abort only fires if
        // the pump is wedged on a dead peer.
        *self.outbox.lock() = None;
        if let Some(pump) = self.pump.lock().take() {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move {
                    tokio::time::sleep(defaults::CLOSE_GRACE).await;
                    pump.abort();
                });
            } else {
                pump.abort();
            }
        }
        self.cleanup_socket_file();
        debug!(uri = %self.uri, "unix endpoint closed");
    }

    fn uri(&self) -> &str {
        &self.uri
    }
}

impl Drop for UnixChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Background task owning the stream for one endpoint.
async fn pump(
    uri: String,
    mut endpoint: Endpoint,
    mut outbox: mpsc::Receiver<Vec<u8>>,
    inbox: mpsc::Sender<Vec<u8>>,
    closed: Arc<AtomicBool>,
) {
    loop {
        let stream = match establish(&mut endpoint, &uri, &closed).await {
            Some(stream) => stream,
            None => return,
        };
        debug!(uri = %uri, "unix endpoint connected");

        if !session(stream, &mut outbox, &inbox).await {
            return;
        }
        debug!(uri = %uri, "unix endpoint lost its peer, re-establishing");
    }
}

async fn establish(
    endpoint: &mut Endpoint,
    uri: &str,
    closed: &Arc<AtomicBool>,
) -> Option<UnixStream> {
    match endpoint {
        Endpoint::Connect(path) => loop {
            if closed.load(Ordering::Acquire) {
                return None;
            }
            match UnixStream::connect(&*path).await {
                Ok(stream) => return Some(stream),
                Err(_) => tokio::time::sleep(defaults::RECONNECT_DELAY).await,
            }
        },
        Endpoint::Accept(listener) => loop {
            if closed.load(Ordering::Acquire) {
                return None;
            }
            match listener.accept().await {
                Ok((stream, _)) => return Some(stream),
                Err(e) => {
                    warn!(uri, "accept failed: {e}");
                    tokio::time::sleep(defaults::RECONNECT_DELAY).await;
                }
            }
        },
    }
}

/// Shuttle frames until the connection drops (returns true, reconnect) or
/// the endpoint is being torn down (returns false).
async fn session(
    mut stream: UnixStream,
    outbox: &mut mpsc::Receiver<Vec<u8>>,
    inbox: &mpsc::Sender<Vec<u8>>,
) -> bool {
    let mut read_buf: Vec<u8> = Vec::with_capacity(8 * 1024);
    loop {
        tokio::select! {
            read = stream.read_buf(&mut read_buf) => match read {
                Ok(0) | Err(_) => return true,
                Ok(_) => loop {
                    match extract_frame(&mut read_buf) {
                        Ok(Some(frame)) => {
                            if inbox.send(frame).await.is_err() {
                                return false;
                            }
                        }
                        Ok(None) => break,
                        Err(_) => return true,
                    }
                },
            },
            frame = outbox.recv() => match frame {
                None => return false,
                Some(frame) => {
                    if write_frame(&mut stream, &frame).await.is_err() {
                        // The frame was accepted by the transport and is
                        // lost with the connection, as with any datagram
                        // sent into a dying peer.
                        return true;
                    }
                }
            },
        }
    }
}

/// Pop one complete length-prefixed frame off the front of `buf`.
fn extract_frame(buf: &mut Vec<u8>) -> Result<Option<Vec<u8>>, ProxyError> {
    if buf.len() < 4 {
        return Ok(None);
    }
    let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len > defaults::MAX_FRAME_SIZE {
        return Err(ProxyError::CodecFailed(format!("frame too large: {len} bytes")));
    }
    if buf.len() < 4 + len {
        return Ok(None);
    }
    let frame = buf[4..4 + len].to_vec();
    buf.drain(..4 + len);
    Ok(Some(frame))
}

async fn write_frame(stream: &mut UnixStream, frame: &[u8]) -> std::io::Result<()> {
    stream.write_all(&(frame.len() as u32).to_le_bytes()).await?;
    stream.write_all(frame).await?;
    stream.flush().await
}
