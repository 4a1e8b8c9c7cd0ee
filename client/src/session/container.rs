//! Owns the transport session and translates its events into transcripts.

use super::{ProgressEvent, ProgressObserver, Result, SessionError, TranscriptEvent};
use crate::config::ChatConfig;
use crate::transcript::{Direction, Transcript};
use meshchat_transport::{
    OutboundResource, Peer, PeerId, ProgressHandle, Reliability, SessionEvent, SessionTransport,
    TransferError,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Translates transport-layer events into [`TranscriptEvent`]s and offers
/// the send operations. Translation holds no transcript history; entries
/// are only ever emitted, never looked up, so the event loop stays free of
/// ordering state. The one piece of bookkeeping kept here is the set of
/// in-flight transfer watchers, keyed by (peer, name).
pub struct SessionContainer {
    local_peer: Peer,
    storage_dir: PathBuf,
    transport: Arc<dyn SessionTransport>,
    events_tx: mpsc::UnboundedSender<TranscriptEvent>,
    inbound_watchers: Mutex<HashMap<(PeerId, String), JoinHandle<()>>>,
}

impl SessionContainer {
    /// Start the translation loop over `session_events` and hand back the
    /// delegate stream. The receiver side is the single serialization
    /// point for the consumer's append/replace step.
    pub fn start(
        config: &ChatConfig,
        transport: Arc<dyn SessionTransport>,
        session_events: mpsc::Receiver<SessionEvent>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<TranscriptEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let container = Arc::new(Self {
            local_peer: transport.local_peer(),
            storage_dir: config.storage_dir.clone(),
            transport,
            events_tx,
            inbound_watchers: Mutex::new(HashMap::new()),
        });

        let looped = Arc::clone(&container);
        tokio::spawn(async move {
            looped.run(session_events).await;
        });

        (container, events_rx)
    }

    pub fn local_peer(&self) -> &Peer {
        &self.local_peer
    }

    /// Submit `text` reliably to all currently connected peers and return
    /// the local echo. Zero connected peers is still a local success: the
    /// transport treats an empty recipient set as a no-op. Submission
    /// failure returns an error and produces no transcript; there is no
    /// automatic retry.
    pub async fn send_message(&self, text: &str) -> Result<Transcript> {
        let peers = self.transport.connected_peers().await;
        self.transport
            .submit_data(&peers, text.as_bytes().to_vec(), Reliability::Reliable)
            .await
            .map_err(|err| {
                warn!(%err, "message submission failed");
                SessionError::Submission(err)
            })?;
        Ok(Transcript::text(
            self.local_peer.clone(),
            Direction::Sent,
            text,
        ))
    }

    /// Start one resource transfer per connected peer for the file at
    /// `location`, keyed by its base name. Returns the provisional
    /// in-progress entry synchronously; it carries an aggregate progress
    /// handle spanning every peer's transfer. A single terminal `Updated`
    /// event follows once all per-peer transfers resolve.
    pub async fn send_resource(&self, location: &Path) -> Result<Transcript> {
        let name = location
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| SessionError::InvalidResource(location.display().to_string()))?;

        let peers = self.transport.connected_peers().await;
        if peers.is_empty() {
            return Err(SessionError::NoPeers);
        }

        let mut transfers: Vec<(Peer, OutboundResource)> = Vec::with_capacity(peers.len());
        for peer in peers {
            match self.transport.submit_resource(&peer, location, &name).await {
                Ok(outbound) => transfers.push((peer, outbound)),
                Err(err) => {
                    warn!(%peer, name = %name, %err, "resource submission failed");
                    // Transfers already started for earlier peers must not
                    // outlive the failed send; their recipients see a
                    // cancellation instead of an orphaned transfer.
                    for (_, started) in &transfers {
                        started.progress.cancel();
                    }
                    return Err(SessionError::Submission(err));
                }
            }
        }

        let total_units: u64 = transfers
            .iter()
            .map(|(_, t)| t.progress.snapshot().total_units)
            .sum();
        let aggregate = ProgressHandle::new(total_units);

        let mut done_rxs = Vec::with_capacity(transfers.len());
        for (peer, outbound) in transfers {
            let OutboundResource { progress, done } = outbound;
            done_rxs.push(done);
            spawn_outbound_feeder(peer, name.clone(), progress, aggregate.clone());
        }

        let events_tx = self.events_tx.clone();
        let local_peer = self.local_peer.clone();
        let terminal_name = name.clone();
        let sent_location = location.to_path_buf();
        tokio::spawn(async move {
            let results = futures::future::join_all(done_rxs).await;
            let mut first_failure: Option<String> = None;
            for result in results {
                let failed = match result {
                    Ok(Ok(())) => None,
                    Ok(Err(err)) => Some(err.to_string()),
                    Err(_) => Some("transport dropped completion channel".to_string()),
                };
                if first_failure.is_none() {
                    first_failure = failed;
                }
            }

            let transcript = match first_failure {
                None => Transcript::resource_complete(
                    local_peer,
                    Direction::Sent,
                    terminal_name,
                    sent_location,
                ),
                Some(reason) => {
                    warn!(name = %terminal_name, %reason, "outbound resource transfer failed");
                    Transcript::resource_failed(local_peer, Direction::Sent, terminal_name, reason)
                }
            };
            let _ = events_tx.send(TranscriptEvent::Updated(transcript));
        });

        Ok(Transcript::resource_in_progress(
            self.local_peer.clone(),
            Direction::Sent,
            name,
            aggregate,
        ))
    }

    async fn run(self: Arc<Self>, mut session_events: mpsc::Receiver<SessionEvent>) {
        while let Some(event) = session_events.recv().await {
            self.translate(event).await;
        }
        debug!("session event channel closed");
    }

    async fn translate(&self, event: SessionEvent) {
        match event {
            SessionEvent::PeerStateChanged { peer, state } => {
                let notice = format!("{peer} is {state}");
                debug!(%peer, %state, "peer state changed");
                self.emit_appended(Transcript::text(peer, Direction::Local, notice));
            }
            SessionEvent::DataReceived { peer, bytes } => match String::from_utf8(bytes) {
                Ok(body) => {
                    self.emit_appended(Transcript::text(peer, Direction::Received, body));
                }
                Err(err) => {
                    // Malformed payloads are dropped, but visibly: the log
                    // gets a local diagnostic instead of silent loss.
                    warn!(%peer, %err, "dropping undecodable payload");
                    let notice = format!("dropped an unreadable message from {peer}");
                    self.emit_appended(Transcript::text(peer, Direction::Local, notice));
                }
            },
            SessionEvent::ResourceStarted {
                peer,
                name,
                progress,
            } => {
                self.emit_appended(Transcript::resource_in_progress(
                    peer.clone(),
                    Direction::Received,
                    name.clone(),
                    progress.clone(),
                ));
                self.watch_inbound(peer, name, progress).await;
            }
            SessionEvent::ResourceFinished {
                peer,
                name,
                outcome,
            } => {
                self.release_inbound_watcher(&peer, &name).await;
                match outcome {
                    Ok(temp_location) => {
                        self.persist_and_resolve(peer, name, temp_location);
                    }
                    Err(err) => {
                        warn!(%peer, name = %name, %err, "inbound resource transfer failed");
                        let transcript = match err {
                            TransferError::Cancelled => {
                                Transcript::resource_cancelled(peer, Direction::Received, name)
                            }
                            other => Transcript::resource_failed(
                                peer,
                                Direction::Received,
                                name,
                                other.to_string(),
                            ),
                        };
                        self.emit_updated(transcript);
                    }
                }
            }
        }
    }

    /// Watch an inbound transfer's progress handle so a cancellation raised
    /// by the transport or remote peer resolves the visible entry instead of
    /// leaving it in progress forever.
    async fn watch_inbound(&self, peer: Peer, name: String, progress: ProgressHandle) {
        let events_tx = self.events_tx.clone();
        let key = (peer.id, name.clone());
        let task = tokio::spawn(async move {
            let (token, mut events) = ProgressObserver::subscribe(name.clone(), &progress);
            while let Some(event) = events.recv().await {
                match event {
                    ProgressEvent::Cancelled => {
                        let _ = events_tx.send(TranscriptEvent::Updated(
                            Transcript::resource_cancelled(peer, Direction::Received, name),
                        ));
                        break;
                    }
                    // The transport's finished event is the authoritative
                    // terminal signal for inbound transfers.
                    ProgressEvent::Completed => break,
                    ProgressEvent::Changed(_) => {}
                }
            }
            token.unsubscribe();
        });

        if let Some(stale) = self.inbound_watchers.lock().await.insert(key, task) {
            stale.abort();
        }
    }

    async fn release_inbound_watcher(&self, peer: &Peer, name: &str) {
        if let Some(task) = self
            .inbound_watchers
            .lock()
            .await
            .remove(&(peer.id, name.to_string()))
        {
            task.abort();
        }
    }

    /// Copy a completed inbound resource to durable storage off the event
    /// loop, feeding the result back through the delegate channel.
    fn persist_and_resolve(&self, peer: Peer, name: String, temp_location: PathBuf) {
        let storage_dir = self.storage_dir.clone();
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            let transcript = match persist_resource(&temp_location, &storage_dir, &name).await {
                Ok(durable) => {
                    Transcript::resource_complete(peer, Direction::Received, name, durable)
                }
                Err(err) => {
                    warn!(%peer, name = %name, %err, "failed to persist received resource");
                    Transcript::resource_failed(
                        peer,
                        Direction::Received,
                        name,
                        format!("could not persist resource: {err}"),
                    )
                }
            };
            let _ = events_tx.send(TranscriptEvent::Updated(transcript));
        });
    }

    fn emit_appended(&self, transcript: Transcript) {
        let _ = self.events_tx.send(TranscriptEvent::Appended(transcript));
    }

    fn emit_updated(&self, transcript: Transcript) {
        let _ = self.events_tx.send(TranscriptEvent::Updated(transcript));
    }
}

/// Feed one peer's transfer progress into the aggregate handle carried by
/// the provisional transcript.
fn spawn_outbound_feeder(
    peer: Peer,
    name: String,
    progress: ProgressHandle,
    aggregate: ProgressHandle,
) {
    tokio::spawn(async move {
        let (token, mut events) = ProgressObserver::subscribe(name.clone(), &progress);
        // Catch up with anything streamed before the subscription landed,
        // then drop our handle clone so the observer channel closes when
        // the transport finishes with the transfer.
        let initial = progress.snapshot();
        let mut last_completed = initial.completed_units;
        aggregate.advance(initial.completed_units);
        drop(progress);

        while let Some(event) = events.recv().await {
            match event {
                ProgressEvent::Changed(snap) => {
                    aggregate.advance(snap.completed_units.saturating_sub(last_completed));
                    last_completed = snap.completed_units;
                }
                ProgressEvent::Completed => break,
                ProgressEvent::Cancelled => {
                    debug!(%peer, name = %name, "outbound transfer cancelled for peer");
                    break;
                }
            }
        }
        token.unsubscribe();
    });
}

async fn persist_resource(
    temp_location: &Path,
    storage_dir: &Path,
    name: &str,
) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(storage_dir).await?;
    let durable = storage_dir.join(name);
    tokio::fs::copy(temp_location, &durable).await?;
    Ok(durable)
}
