pub mod config;
pub mod session;
pub mod store;
pub mod transcript;

pub use config::ChatConfig;
pub use session::{SessionContainer, SessionError, TranscriptEvent};
pub use store::TranscriptStore;
pub use transcript::{Direction, Transcript, TranscriptKind};

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
