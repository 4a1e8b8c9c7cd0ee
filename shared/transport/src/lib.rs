//! Transport-layer session contract shared across MeshChat clients.
//!
//! The real transport (discovery, session establishment, encryption,
//! retransmission) lives behind [`SessionTransport`]; this crate only pins
//! down the event and send contract the chat engine consumes, plus an
//! in-memory transport used by tests and the demo binary.

mod memory;
mod progress;

pub use memory::{MemoryEndpoint, MemoryHub};
pub use progress::{ProgressHandle, ProgressSnapshot};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::sync::oneshot;
use uuid::Uuid;

/// Opaque session-scoped identity for a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId(pub Uuid);

impl PeerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

/// A participant: opaque identity plus a human-readable display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Peer {
    pub id: PeerId,
    pub display_name: String,
}

impl Peer {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            id: PeerId::new(),
            display_name: display_name.into(),
        }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name)
    }
}

/// Connection state of a remote peer within the active session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerState {
    Connecting,
    Connected,
    NotConnected,
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PeerState::Connecting => "Connecting",
            PeerState::Connected => "Connected",
            PeerState::NotConnected => "NotConnected",
        };
        f.write_str(label)
    }
}

/// Delivery mode requested for a datagram submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reliability {
    Reliable,
    Unreliable,
}

/// Errors surfaced by the transport for a single submission or transfer.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransferError {
    #[error("transfer cancelled")]
    Cancelled,
    #[error("peer unavailable: {0}")]
    PeerUnavailable(String),
    #[error("io error: {0}")]
    Io(String),
}

pub type TransportResult<T> = Result<T, TransferError>;

/// One event from the transport layer. Events for a given peer arrive in
/// FIFO order; no ordering is promised across peers.
#[derive(Debug)]
pub enum SessionEvent {
    PeerStateChanged {
        peer: Peer,
        state: PeerState,
    },
    DataReceived {
        peer: Peer,
        bytes: Vec<u8>,
    },
    ResourceStarted {
        peer: Peer,
        name: String,
        progress: ProgressHandle,
    },
    ResourceFinished {
        peer: Peer,
        name: String,
        outcome: TransportResult<PathBuf>,
    },
}

/// Per-peer handle for one outbound resource transfer: live progress plus a
/// terminal completion signal from the transport.
#[derive(Debug)]
pub struct OutboundResource {
    pub progress: ProgressHandle,
    pub done: oneshot::Receiver<TransportResult<()>>,
}

/// The send-side surface of an established multi-peer session.
#[async_trait]
pub trait SessionTransport: Send + Sync + 'static {
    fn local_peer(&self) -> Peer;

    async fn connected_peers(&self) -> Vec<Peer>;

    /// Submit a datagram to the given peers. An empty peer slice is a
    /// successful no-op: zero remote recipients is not a submission failure.
    async fn submit_data(
        &self,
        peers: &[Peer],
        bytes: Vec<u8>,
        mode: Reliability,
    ) -> TransportResult<()>;

    /// Start one chunked resource transfer of the file at `location` to a
    /// single peer under the declared `name`.
    async fn submit_resource(
        &self,
        peer: &Peer,
        location: &Path,
        name: &str,
    ) -> TransportResult<OutboundResource>;
}
