use thiserror::Error;

/// Bridge-wide error type
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The external authority or the caller broke the boundary contract
    /// (empty id, null handle, malformed enum text).
    #[error("Contract violation: {0}")]
    ContractViolation(String),

    #[error("Marshalling error: {0}")]
    Marshal(#[from] serde_json::Error),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Invalid resolution {width}x{height}")]
    InvalidResolution { width: u32, height: u32 },

    #[error("Transport {0} has failed")]
    TransportFailed(String),

    #[error("Transport {0} is closed")]
    TransportClosed(String),

    #[error("Resource closed: {0}")]
    ResourceClosed(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// No codec, no capture source, or similar creation-time shortage.
    #[error("Resource exhausted: {0}")]
    Exhausted(String),

    #[error("Video device error: {0}")]
    VideoDevice(String),

    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Engine thread error: {0}")]
    EngineThread(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Whether this error belongs to the class that terminates the process
    /// when it reaches the foreign boundary.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BridgeError::ContractViolation(_)
                | BridgeError::Exhausted(_)
                | BridgeError::EngineThread(_)
        )
    }
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Log the failing operation and terminate the process.
///
/// Errors are never unwound across the foreign boundary; this is the only
/// exit for failures that have no status return.
pub fn fatal(operation: &str, err: &dyn std::fmt::Display) -> ! {
    tracing::error!(operation, error = %err, "Unrecoverable bridge error, aborting");
    std::process::abort()
}
