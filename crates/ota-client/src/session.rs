//! Session state for one update lifecycle.

use crate::config::Preferences;
use ota_core::{Channel, DownloadResult, Stage, UpdateCandidate};
use std::fmt;

/// Position in the update lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Searching,
    Found,
    UpToDate,
    Downloading,
    Downloaded,
    Installing,
    RebootRequired,
    /// The last request of this stage failed; it can be retried.
    Failed(Stage),
}

impl Phase {
    /// The stage whose replies are expected in this phase, if any.
    pub fn awaiting(self) -> Option<Stage> {
        match self {
            Phase::Searching => Some(Stage::Search),
            Phase::Downloading => Some(Stage::Download),
            Phase::Installing => Some(Stage::Install),
            _ => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Idle => f.write_str("idle"),
            Phase::Searching => f.write_str("searching"),
            Phase::Found => f.write_str("found"),
            Phase::UpToDate => f.write_str("up-to-date"),
            Phase::Downloading => f.write_str("downloading"),
            Phase::Downloaded => f.write_str("downloaded"),
            Phase::Installing => f.write_str("installing"),
            Phase::RebootRequired => f.write_str("reboot-required"),
            Phase::Failed(stage) => write!(f, "{stage}-failed"),
        }
    }
}

/// User-initiated operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    QueryOsVersion,
    Search { include_all_channels: bool },
    Download,
    Install,
    SetChannel(Channel),
    SetWifiOnly(bool),
}

/// Which operations the current phase makes actionable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnabledOperations {
    pub search: bool,
    pub download: bool,
    pub install: bool,
}

impl EnabledOperations {
    pub fn allows(&self, op: &Operation) -> bool {
        match op {
            Operation::Search { .. } => self.search,
            Operation::Download => self.download,
            Operation::Install => self.install,
            Operation::QueryOsVersion | Operation::SetChannel(_) | Operation::SetWifiOnly(_) => {
                true
            }
        }
    }
}

/// Snapshot of lifecycle progress.
///
/// Written only by the dispatcher. Everyone else sees clones that are valid
/// until the next inbound message is applied.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionState {
    pub phase: Phase,
    /// Canonical candidate: the first one the last search returned.
    pub current_candidate: Option<UpdateCandidate>,
    /// All candidates from the last search, in service order.
    pub candidates: Vec<UpdateCandidate>,
    /// Present only for a validated download.
    pub downloaded_artifact: Option<DownloadResult>,
    pub channel_preference: Channel,
    pub wifi_only_preference: bool,
    pub os_version: Option<String>,
    /// Message from the last domain failure.
    pub last_error: Option<String>,
}

impl SessionState {
    pub fn new(preferences: Preferences) -> Self {
        Self {
            channel_preference: preferences.channel,
            wifi_only_preference: preferences.wifi_only,
            ..Self::default()
        }
    }

    /// Back to Idle, keeping preferences and the known OS version.
    pub fn reset(&self) -> Self {
        Self {
            channel_preference: self.channel_preference,
            wifi_only_preference: self.wifi_only_preference,
            os_version: self.os_version.clone(),
            ..Self::default()
        }
    }

    pub fn enabled_operations(&self) -> EnabledOperations {
        EnabledOperations {
            search: matches!(
                self.phase,
                Phase::Idle | Phase::UpToDate | Phase::Failed(Stage::Search)
            ),
            download: matches!(self.phase, Phase::Found | Phase::Failed(Stage::Download))
                && self.current_candidate.is_some(),
            install: matches!(self.phase, Phase::Downloaded | Phase::Failed(Stage::Install))
                && self.installable_artifact().is_some(),
        }
    }

    /// The downloaded artifact, if it passed validation.
    pub fn installable_artifact(&self) -> Option<&DownloadResult> {
        self.downloaded_artifact.as_ref().filter(|a| a.validated)
    }
}

/// A user-facing status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub kind: StatusKind,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Info,
    /// The service reported a failure for the current stage.
    DomainError,
    /// A download completed but did not validate.
    ValidationFailure,
    /// A reply was recognized but malformed.
    InvalidPayload,
    /// The request never reached the service.
    Transport,
}

impl Status {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            kind: StatusKind::Info,
            text: text.into(),
        }
    }

    pub fn new(kind: StatusKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.kind != StatusKind::Info
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
