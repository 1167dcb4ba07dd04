//! In-process pair channels.
//!
//! `inproc://<name>` endpoints rendezvous through a process-global name
//! registry. Each endpoint owns an inbox; sending means looking up the
//! peer's inbox sender under the registry lock and pushing the frame into
//! it. That indirection is what gives these channels pair-socket behavior:
//! an endpoint outlives its peer, sends fail with `WouldBlock` while no
//! peer is attached, and a replacement peer picks up where the old one
//! left off.

use super::{ChannelError, PairChannel, TrySendError};
use crate::defaults;
use crate::error::ProxyError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Role {
    Bind,
    Connect,
}

#[derive(Default)]
struct Entry {
    bind: Option<mpsc::Sender<Vec<u8>>>,
    connect: Option<mpsc::Sender<Vec<u8>>>,
}

impl Entry {
    fn slot(&mut self, role: Role) -> &mut Option<mpsc::Sender<Vec<u8>>> {
        match role {
            Role::Bind => &mut self.bind,
            Role::Connect => &mut self.connect,
        }
    }

    fn is_vacant(&self) -> bool {
        self.bind.is_none() && self.connect.is_none()
    }
}

fn registry() -> &'static Mutex<HashMap<String, Entry>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, Entry>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// One endpoint of an in-process pair.
pub struct MemoryChannel {
    uri: String,
    name: String,
    role: Role,
    inbox: tokio::sync::Mutex<mpsc::Receiver<Vec<u8>>>,
    closed: AtomicBool,
}

impl MemoryChannel {
    /// Claim the bind side of `uri`. Fails while another live endpoint
    /// holds the bind side.
    pub fn bind(uri: &str) -> Result<Self, ProxyError> {
        Self::attach(uri, Role::Bind)
    }

    /// Claim the connect side of `uri`. Succeeds whether or not a bind-side
    /// peer exists yet; frames flow once both sides are attached.
    pub fn connect(uri: &str) -> Result<Self, ProxyError> {
        Self::attach(uri, Role::Connect)
    }

    fn attach(uri: &str, role: Role) -> Result<Self, ProxyError> {
        let name = super::locator(uri)?.to_owned();
        let (tx, rx) = mpsc::channel(defaults::CHANNEL_DEPTH);

        let mut entries = registry().lock();
        let entry = entries.entry(name.clone()).or_default();
        let slot = entry.slot(role);
        if slot.as_ref().is_some_and(|s| !s.is_closed()) {
            return Err(ProxyError::TransportSetup(format!(
                "endpoint already in use: {uri} ({role:?})"
            )));
        }
        *slot = Some(tx);
        drop(entries);

        debug!(uri, ?role, "inproc endpoint attached");
        Ok(Self {
            uri: uri.to_owned(),
            name,
            role,
            inbox: tokio::sync::Mutex::new(rx),
            closed: AtomicBool::new(false),
        })
    }

    fn peer_role(&self) -> Role {
        match self.role {
            Role::Bind => Role::Connect,
            Role::Connect => Role::Bind,
        }
    }

    /// Fetch the peer's inbox sender, clearing a stale slot left behind by
    /// a dropped peer.
    fn peer_sender(&self) -> Option<mpsc::Sender<Vec<u8>>> {
        let mut entries = registry().lock();
        let entry = entries.get_mut(&self.name)?;
        let slot = entry.slot(self.peer_role());
        match slot {
            Some(sender) if !sender.is_closed() => Some(sender.clone()),
            Some(_) => {
                *slot = None;
                None
            }
            None => None,
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn detach(&self) {
        let mut entries = registry().lock();
        if let Some(entry) = entries.get_mut(&self.name) {
            *entry.slot(self.role) = None;
            if entry.is_vacant() {
                entries.remove(&self.name);
            }
        }
    }
}

#[async_trait]
impl PairChannel for MemoryChannel {
    async fn send(&self, frame: Vec<u8>) -> Result<(), ChannelError> {
        let mut frame = frame;
        loop {
            match self.try_send(frame) {
                Ok(()) => return Ok(()),
                Err(TrySendError {
                    error: ChannelError::Closed,
                    ..
                }) => return Err(ChannelError::Closed),
                Err(TrySendError { frame: back, .. }) => {
                    frame = back;
                    tokio::time::sleep(defaults::MESSAGE_POLL_INTERVAL).await;
                }
            }
        }
    }

    fn try_send(&self, frame: Vec<u8>) -> Result<(), TrySendError> {
        if self.is_closed() {
            return Err(TrySendError {
                frame,
                error: ChannelError::Closed,
            });
        }
        let Some(peer) = self.peer_sender() else {
            return Err(TrySendError {
                frame,
                error: ChannelError::WouldBlock,
            });
        };
        peer.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(frame) => TrySendError {
                frame,
                error: ChannelError::WouldBlock,
            },
            // Peer tore down between lookup and push.
            mpsc::error::TrySendError::Closed(frame) => TrySendError {
                frame,
                error: ChannelError::WouldBlock,
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
        self.detach();
        debug!(uri = %self.uri, "inproc endpoint closed");
    }

    fn uri(&self) -> &str {
        &self.uri
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        self.close();
    }
}
