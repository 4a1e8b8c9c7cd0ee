//! Ordered transcript sequence plus the name-to-position correlation index.

use crate::session::TranscriptEvent;
use crate::transcript::{Transcript, TranscriptKind};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::warn;

/// The consumer's ordered view of the chat log. All mutation goes through
/// [`TranscriptStore::apply`] behind one lock, so concurrent lifecycle
/// events for different transfers never race on the index and readers
/// never observe a half-applied append.
///
/// Invariant: an index entry for a name exists iff the entry at that
/// position is currently in progress for that name. Terminal replacement
/// clears the index entry.
#[derive(Clone, Default)]
pub struct TranscriptStore {
    inner: Arc<RwLock<StoreInner>>,
}

#[derive(Default)]
struct StoreInner {
    entries: Vec<Transcript>,
    index: HashMap<String, usize>,
}

impl TranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve one delegate event into an append or an in-place replace.
    pub async fn apply(&self, event: TranscriptEvent) {
        match event {
            TranscriptEvent::Appended(transcript) => self.append(transcript).await,
            TranscriptEvent::Updated(transcript) => self.replace(transcript).await,
        }
    }

    /// Consume the delegate stream on its own task; the store lock keeps
    /// the append/replace step serialized with any direct callers.
    pub fn attach(
        &self,
        mut events: mpsc::UnboundedReceiver<TranscriptEvent>,
    ) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                store.apply(event).await;
            }
        })
    }

    async fn append(&self, transcript: Transcript) {
        let in_progress_name = match &transcript.kind {
            TranscriptKind::ResourceInProgress { name, .. } => Some(name.clone()),
            _ => None,
        };

        let mut inner = self.inner.write().await;
        let Some(name) = in_progress_name else {
            inner.entries.push(transcript);
            return;
        };

        // A repeated in-flight name supersedes the earlier transfer: the
        // old entry resolves to cancelled and the index moves on.
        if let Some(position) = inner.index.get(&name).copied() {
            warn!(name = %name, "in-flight transfer name reused, superseding");
            let (old_peer, old_direction) = {
                let old = &inner.entries[position];
                (old.peer.clone(), old.direction)
            };
            inner.entries[position] =
                Transcript::resource_cancelled(old_peer, old_direction, name.clone());
        }

        inner.entries.push(transcript);
        let position = inner.entries.len() - 1;
        inner.index.insert(name, position);
    }

    async fn replace(&self, transcript: Transcript) {
        let Some(name) = transcript.resource_name().map(str::to_string) else {
            warn!("update event without a resource name dropped");
            return;
        };

        let mut inner = self.inner.write().await;
        match inner.index.remove(&name) {
            Some(position) if inner.entries[position].is_in_progress() => {
                inner.entries[position] = transcript;
            }
            Some(position) => {
                // Index said in-progress but the entry moved on; leave it.
                warn!(name = %name, position, "stale index entry on update");
            }
            None => {
                warn!(name = %name, "update for unknown or already-resolved transfer dropped");
            }
        }
    }

    pub async fn entries(&self) -> Vec<Transcript> {
        self.inner.read().await.entries.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.entries.is_empty()
    }

    /// Latest entry for a resource name, wherever it sits in the sequence.
    pub async fn entry_for(&self, name: &str) -> Option<Transcript> {
        self.inner
            .read()
            .await
            .entries
            .iter()
            .rev()
            .find(|t| t.resource_name() == Some(name))
            .cloned()
    }

    pub async fn in_flight(&self, name: &str) -> bool {
        let inner = self.inner.read().await;
        inner
            .index
            .get(name)
            .map(|&position| inner.entries[position].is_in_progress())
            .unwrap_or(false)
    }
}
