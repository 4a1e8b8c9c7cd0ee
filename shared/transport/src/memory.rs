//! In-memory transport connecting endpoints within one process.
//!
//! Used by tests and the demo binary; delivery semantics mirror the real
//! transport contract (per-peer FIFO event channels, chunked resource
//! streaming with live progress, terminal completion signals).

use crate::{
    OutboundResource, Peer, PeerId, PeerState, ProgressHandle, Reliability, SessionEvent,
    SessionTransport, TransferError, TransportResult,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

const EVENT_CHANNEL_CAPACITY: usize = 64;
const STREAM_CHUNK_BYTES: u64 = 64 * 1024;

struct Registration {
    peer: Peer,
    events_tx: mpsc::Sender<SessionEvent>,
    staging_dir: PathBuf,
}

/// Hub wiring any number of in-process endpoints into one session.
#[derive(Clone, Default)]
pub struct MemoryHub {
    registry: Arc<Mutex<HashMap<PeerId, Registration>>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the session under `display_name`. Every existing endpoint sees
    /// the new peer as `Connected`, and the new endpoint sees every existing
    /// peer as `Connected`.
    pub async fn join(
        &self,
        display_name: impl Into<String>,
    ) -> TransportResult<(Arc<MemoryEndpoint>, mpsc::Receiver<SessionEvent>)> {
        let peer = Peer::new(display_name);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let staging_dir = std::env::temp_dir().join(format!("meshchat-staging-{}", peer.id.0));
        tokio::fs::create_dir_all(&staging_dir)
            .await
            .map_err(|e| TransferError::Io(format!("staging dir: {e}")))?;

        let mut registry = self.registry.lock().await;
        for existing in registry.values() {
            let _ = existing
                .events_tx
                .send(SessionEvent::PeerStateChanged {
                    peer: peer.clone(),
                    state: PeerState::Connected,
                })
                .await;
            let _ = events_tx
                .send(SessionEvent::PeerStateChanged {
                    peer: existing.peer.clone(),
                    state: PeerState::Connected,
                })
                .await;
        }
        registry.insert(
            peer.id,
            Registration {
                peer: peer.clone(),
                events_tx,
                staging_dir,
            },
        );
        drop(registry);

        debug!(%peer, "endpoint joined memory hub");
        let endpoint = Arc::new(MemoryEndpoint {
            local: peer,
            registry: self.registry.clone(),
        });
        Ok((endpoint, events_rx))
    }
}

/// One participant attached to a [`MemoryHub`].
pub struct MemoryEndpoint {
    local: Peer,
    registry: Arc<Mutex<HashMap<PeerId, Registration>>>,
}

impl MemoryEndpoint {
    /// Leave the session; every remaining endpoint sees `NotConnected`.
    pub async fn leave(&self) {
        let mut registry = self.registry.lock().await;
        registry.remove(&self.local.id);
        for remaining in registry.values() {
            let _ = remaining
                .events_tx
                .send(SessionEvent::PeerStateChanged {
                    peer: self.local.clone(),
                    state: PeerState::NotConnected,
                })
                .await;
        }
    }
}

#[async_trait]
impl SessionTransport for MemoryEndpoint {
    fn local_peer(&self) -> Peer {
        self.local.clone()
    }

    async fn connected_peers(&self) -> Vec<Peer> {
        self.registry
            .lock()
            .await
            .values()
            .filter(|reg| reg.peer.id != self.local.id)
            .map(|reg| reg.peer.clone())
            .collect()
    }

    async fn submit_data(
        &self,
        peers: &[Peer],
        bytes: Vec<u8>,
        _mode: Reliability,
    ) -> TransportResult<()> {
        let registry = self.registry.lock().await;
        for peer in peers {
            let reg = registry
                .get(&peer.id)
                .ok_or_else(|| TransferError::PeerUnavailable(peer.display_name.clone()))?;
            reg.events_tx
                .send(SessionEvent::DataReceived {
                    peer: self.local.clone(),
                    bytes: bytes.clone(),
                })
                .await
                .map_err(|_| TransferError::PeerUnavailable(peer.display_name.clone()))?;
        }
        Ok(())
    }

    async fn submit_resource(
        &self,
        peer: &Peer,
        location: &Path,
        name: &str,
    ) -> TransportResult<OutboundResource> {
        let (recipient_tx, staging_dir) = {
            let registry = self.registry.lock().await;
            let reg = registry
                .get(&peer.id)
                .ok_or_else(|| TransferError::PeerUnavailable(peer.display_name.clone()))?;
            (reg.events_tx.clone(), reg.staging_dir.clone())
        };

        let metadata = tokio::fs::metadata(location)
            .await
            .map_err(|e| TransferError::Io(format!("{}: {e}", location.display())))?;
        let total_units = metadata.len();

        let progress = ProgressHandle::new(total_units);
        let (done_tx, done_rx) = oneshot::channel();

        recipient_tx
            .send(SessionEvent::ResourceStarted {
                peer: self.local.clone(),
                name: name.to_string(),
                progress: progress.clone(),
            })
            .await
            .map_err(|_| TransferError::PeerUnavailable(peer.display_name.clone()))?;

        let sender = self.local.clone();
        let source = location.to_path_buf();
        let transfer_name = name.to_string();
        let transfer_progress = progress.clone();
        tokio::spawn(async move {
            let outcome = stream_resource(
                &source,
                &staging_dir,
                &transfer_name,
                &transfer_progress,
            )
            .await;

            if let Err(err) = &outcome {
                warn!(%sender, name = %transfer_name, %err, "memory transfer failed");
            }
            let _ = recipient_tx
                .send(SessionEvent::ResourceFinished {
                    peer: sender,
                    name: transfer_name,
                    outcome: outcome.clone(),
                })
                .await;
            let _ = done_tx.send(outcome.map(|_| ()));
        });

        Ok(OutboundResource {
            progress,
            done: done_rx,
        })
    }
}

async fn stream_resource(
    source: &Path,
    staging_dir: &Path,
    name: &str,
    progress: &ProgressHandle,
) -> TransportResult<PathBuf> {
    let bytes = tokio::fs::read(source)
        .await
        .map_err(|e| TransferError::Io(format!("{}: {e}", source.display())))?;

    let mut streamed: u64 = 0;
    let total = bytes.len() as u64;
    while streamed < total {
        if progress.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        let chunk = STREAM_CHUNK_BYTES.min(total - streamed);
        streamed += chunk;
        progress.advance(chunk);
        tokio::task::yield_now().await;
    }
    if progress.is_cancelled() {
        return Err(TransferError::Cancelled);
    }

    // Unique temporary landing spot; the consumer copies it to durable
    // storage under the declared name.
    let temp_path = staging_dir.join(format!("{}-{name}", Uuid::new_v4()));
    tokio::fs::write(&temp_path, &bytes)
        .await
        .map_err(|e| TransferError::Io(format!("{}: {e}", temp_path.display())))?;
    Ok(temp_path)
}
