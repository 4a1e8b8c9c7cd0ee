//! Session engine: transport event translation and progress bridging.

mod container;
mod progress;

pub use container::SessionContainer;
pub use progress::{ProgressEvent, ProgressObserver, SubscriptionToken};

use crate::transcript::Transcript;
use meshchat_transport::TransferError;

/// Errors surfaced by the send operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("submission failed: {0}")]
    Submission(#[from] TransferError),
    #[error("no connected peers for resource transfer")]
    NoPeers,
    #[error("invalid resource path: {0}")]
    InvalidResource(String),
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// Delegate interface: everything the engine tells its consumer.
#[derive(Debug, Clone)]
pub enum TranscriptEvent {
    /// A new entry was produced; append it to the ordered view.
    Appended(Transcript),
    /// An existing entry, correlated by resource name, must be replaced
    /// in place with its new (terminal) state.
    Updated(Transcript),
}

impl TranscriptEvent {
    pub fn transcript(&self) -> &Transcript {
        match self {
            TranscriptEvent::Appended(t) | TranscriptEvent::Updated(t) => t,
        }
    }
}
