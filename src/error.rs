use thiserror::Error;

/// Errors raised by the OS capture primitive.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Interface not found: {0}")]
    InterfaceNotFound(String),

    #[error("Failed to create capture channel: {0}")]
    ChannelCreation(String),

    #[error("Insufficient privileges to capture packets (run as root or grant CAP_NET_RAW)")]
    InsufficientPermissions,

    #[error("Capture IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CaptureError {
    /// Only a missing capture privilege stops the loop for good.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CaptureError::InsufficientPermissions)
    }
}

/// Errors from the packet log.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt packet log line {line}: {reason}")]
    Corrupt { line: usize, reason: String },

    #[error("Failed to lock packet log: {0}")]
    Lock(String),
}

/// Errors from live event publishing.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Publish IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Publisher closed")]
    Closed,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config value for '{key}': {value}")]
    Invalid { key: String, value: String },
}
