//! Chat log entries produced by the session engine.

use meshchat_transport::{Peer, ProgressHandle};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Attribution of a transcript entry. `Local` marks system-generated
/// notices (peer state changes, diagnostics) owned by no remote sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Sent,
    Received,
    Local,
}

/// Payload of one transcript entry. A `ResourceInProgress` entry is never
/// mutated; it is replaced wholesale by one of the terminal resource kinds
/// carrying the same name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TranscriptKind {
    Text {
        body: String,
    },
    ResourceInProgress {
        name: String,
        // Runtime-only reference; not part of the persisted form.
        #[serde(skip)]
        progress: Option<ProgressHandle>,
    },
    ResourceComplete {
        name: String,
        location: PathBuf,
    },
    ResourceFailed {
        name: String,
        reason: String,
    },
    ResourceCancelled {
        name: String,
    },
}

/// One entry in the chat log. Immutable after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub direction: Direction,
    pub peer: Peer,
    pub kind: TranscriptKind,
}

impl Transcript {
    pub fn text(peer: Peer, direction: Direction, body: impl Into<String>) -> Self {
        Self {
            direction,
            peer,
            kind: TranscriptKind::Text { body: body.into() },
        }
    }

    pub fn resource_in_progress(
        peer: Peer,
        direction: Direction,
        name: impl Into<String>,
        progress: ProgressHandle,
    ) -> Self {
        Self {
            direction,
            peer,
            kind: TranscriptKind::ResourceInProgress {
                name: name.into(),
                progress: Some(progress),
            },
        }
    }

    pub fn resource_complete(
        peer: Peer,
        direction: Direction,
        name: impl Into<String>,
        location: PathBuf,
    ) -> Self {
        Self {
            direction,
            peer,
            kind: TranscriptKind::ResourceComplete {
                name: name.into(),
                location,
            },
        }
    }

    pub fn resource_failed(
        peer: Peer,
        direction: Direction,
        name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            direction,
            peer,
            kind: TranscriptKind::ResourceFailed {
                name: name.into(),
                reason: reason.into(),
            },
        }
    }

    pub fn resource_cancelled(peer: Peer, direction: Direction, name: impl Into<String>) -> Self {
        Self {
            direction,
            peer,
            kind: TranscriptKind::ResourceCancelled { name: name.into() },
        }
    }

    /// Resource name for any resource-flavored kind.
    pub fn resource_name(&self) -> Option<&str> {
        match &self.kind {
            TranscriptKind::Text { .. } => None,
            TranscriptKind::ResourceInProgress { name, .. }
            | TranscriptKind::ResourceComplete { name, .. }
            | TranscriptKind::ResourceFailed { name, .. }
            | TranscriptKind::ResourceCancelled { name } => Some(name),
        }
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self.kind, TranscriptKind::ResourceInProgress { .. })
    }

    pub fn is_terminal_resource(&self) -> bool {
        matches!(
            self.kind,
            TranscriptKind::ResourceComplete { .. }
                | TranscriptKind::ResourceFailed { .. }
                | TranscriptKind::ResourceCancelled { .. }
        )
    }
}
