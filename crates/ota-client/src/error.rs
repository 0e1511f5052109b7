//! Error types for the client.

use ota_core::{PayloadError, Stage};
use std::path::PathBuf;

/// A user operation could not be sent.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// No channel to the update service is attached.
    #[error("service not bound")]
    NotBound,
    /// The send attempt itself failed.
    #[error("transport failure: {0}")]
    TransportFailure(#[from] TransportError),
    #[error("no update candidate is known; search first")]
    NoCandidate,
    #[error("no validated download is available to install")]
    NoInstallableArtifact,
    #[error("session engine is not running")]
    EngineStopped,
}

/// The underlying channel rejected a message.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("channel closed")]
    Closed,
    #[error("websocket: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("encoding message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// An inbound message was recognized but could not be applied.
///
/// Never propagated past the engine; it becomes a status line and the session
/// state is left exactly as it was.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("invalid {stage} payload for {kind}: {source}")]
    InvalidPayload {
        kind: &'static str,
        stage: Stage,
        #[source]
        source: PayloadError,
    },
}

/// Configuration could not be loaded.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),
}
