use std::env;
use std::path::PathBuf;

/// Runtime configuration for the chat client.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Name shown to other participants.
    pub display_name: String,
    /// Room identifier the session advertises under.
    pub service_type: String,
    /// Durable landing directory for completed inbound resources.
    pub storage_dir: PathBuf,
}

impl ChatConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let display_name =
            env::var("MESHCHAT_DISPLAY_NAME").unwrap_or_else(|_| "anonymous".to_string());
        let service_type =
            env::var("MESHCHAT_SERVICE_TYPE").unwrap_or_else(|_| "meshchat-room".to_string());
        let storage_dir = env::var("MESHCHAT_STORAGE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::temp_dir().join("meshchat-received"));
        Ok(Self {
            display_name,
            service_type,
            storage_dir,
        })
    }
}
