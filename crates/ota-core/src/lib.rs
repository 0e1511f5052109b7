//! Core types for the OTA update protocol.
//!
//! This crate provides the protocol primitives: the generic wire envelope, the
//! payload codec that maps typed records to and from field maps, and the closed
//! message taxonomy. It performs no I/O; the client crate drives the session.

mod codec;
mod endpoint;
mod message;
mod model;
mod taxonomy;
mod value;

pub use codec::{FieldSpec, PayloadError, Record};
pub use endpoint::{EndpointParseError, ServiceEndpoint};
pub use message::{Message, ProtocolError, ReplyTo, Request, Response};
pub use model::{Channel, DownloadResult, Progress, UpdateCandidate};
pub use taxonomy::{PayloadSchema, RequestKind, ResponseReason, Stage};
pub use value::{FieldMap, FieldType, Value};

/// Field names used on the wire.
///
/// These are part of the protocol contract; renaming any of them breaks
/// compatibility with deployed services.
pub mod fields {
    pub const MESSAGE: &str = "message";
    pub const VERSION: &str = "version";
    pub const VERSION_ID: &str = "versionId";
    pub const CHANNEL: &str = "channel";
    pub const SIZE: &str = "size";
    pub const HASH: &str = "hash";
    pub const CANDIDATES: &str = "candidates";
    pub const PATH: &str = "path";
    pub const VALIDATED: &str = "validated";
    pub const PROGRESS: &str = "progress";
    pub const ENABLED: &str = "enabled";
    pub const ALL_CHANNELS: &str = "allChannels";
}
