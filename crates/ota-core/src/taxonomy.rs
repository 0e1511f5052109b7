//! The closed set of request kinds and response reasons.
//!
//! Every kind carries a hand-assigned tag. Tags are resolved through lookup
//! tables, never by position, so reordering the enums below does not change
//! the wire contract.

use crate::codec::FieldSpec;
use crate::fields;
use crate::value::FieldType;
use std::fmt;

/// Protocol phase a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    OsVersion,
    Search,
    Download,
    Install,
    Preference,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::OsVersion => "os-version",
            Stage::Search => "search",
            Stage::Download => "download",
            Stage::Install => "install",
            Stage::Preference => "preference",
        };
        f.write_str(name)
    }
}

/// Outgoing request kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    QueryOsVersion,
    SearchUpdates,
    DownloadUpdate,
    InstallUpdate,
    SetChannelPreference,
    SetConnectionPreference,
}

const REQUEST_TAGS: &[(i32, RequestKind)] = &[
    (0, RequestKind::QueryOsVersion),
    (1, RequestKind::SearchUpdates),
    (2, RequestKind::DownloadUpdate),
    (3, RequestKind::InstallUpdate),
    (4, RequestKind::SetChannelPreference),
    (5, RequestKind::SetConnectionPreference),
];

impl RequestKind {
    pub const ALL: [RequestKind; 6] = [
        RequestKind::QueryOsVersion,
        RequestKind::SearchUpdates,
        RequestKind::DownloadUpdate,
        RequestKind::InstallUpdate,
        RequestKind::SetChannelPreference,
        RequestKind::SetConnectionPreference,
    ];

    pub fn tag(self) -> i32 {
        match self {
            RequestKind::QueryOsVersion => 0,
            RequestKind::SearchUpdates => 1,
            RequestKind::DownloadUpdate => 2,
            RequestKind::InstallUpdate => 3,
            RequestKind::SetChannelPreference => 4,
            RequestKind::SetConnectionPreference => 5,
        }
    }

    pub fn from_tag(tag: i32) -> Option<Self> {
        REQUEST_TAGS
            .iter()
            .find(|(t, _)| *t == tag)
            .map(|(_, kind)| *kind)
    }

    pub fn name(self) -> &'static str {
        match self {
            RequestKind::QueryOsVersion => "QUERY_OS_VERSION",
            RequestKind::SearchUpdates => "SEARCH_UPDATES",
            RequestKind::DownloadUpdate => "DOWNLOAD_UPDATE",
            RequestKind::InstallUpdate => "INSTALL_UPDATE",
            RequestKind::SetChannelPreference => "SET_CHANNEL_PREFERENCE",
            RequestKind::SetConnectionPreference => "SET_CONNECTION_PREFERENCE",
        }
    }

    pub fn stage(self) -> Stage {
        match self {
            RequestKind::QueryOsVersion => Stage::OsVersion,
            RequestKind::SearchUpdates => Stage::Search,
            RequestKind::DownloadUpdate => Stage::Download,
            RequestKind::InstallUpdate => Stage::Install,
            RequestKind::SetChannelPreference | RequestKind::SetConnectionPreference => {
                Stage::Preference
            }
        }
    }

    pub fn fields(self) -> &'static [FieldSpec] {
        const SEARCH: &[FieldSpec] = &[FieldSpec::required(fields::ALL_CHANNELS, FieldType::Bool)];
        const DOWNLOAD: &[FieldSpec] = &[
            FieldSpec::required(fields::VERSION_ID, FieldType::String),
            FieldSpec::required(fields::CHANNEL, FieldType::String),
            FieldSpec::required(fields::SIZE, FieldType::Int),
            FieldSpec::optional(fields::HASH, FieldType::String),
        ];
        const INSTALL: &[FieldSpec] = &[
            FieldSpec::required(fields::VERSION_ID, FieldType::String),
            FieldSpec::required(fields::PATH, FieldType::String),
        ];
        const CHANNEL: &[FieldSpec] = &[FieldSpec::required(fields::CHANNEL, FieldType::Int)];
        const CONNECTION: &[FieldSpec] = &[FieldSpec::required(fields::ENABLED, FieldType::Bool)];

        match self {
            RequestKind::QueryOsVersion => &[],
            RequestKind::SearchUpdates => SEARCH,
            RequestKind::DownloadUpdate => DOWNLOAD,
            RequestKind::InstallUpdate => INSTALL,
            RequestKind::SetChannelPreference => CHANNEL,
            RequestKind::SetConnectionPreference => CONNECTION,
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Shape of the payload a response reason carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadSchema {
    None,
    ErrorMessage,
    OsVersion,
    CandidateList,
    Progress,
    DownloadRecord,
}

impl PayloadSchema {
    /// Top-level fields. A candidate list may also arrive as a single flat
    /// record, so its only top-level field is optional.
    pub fn fields(self) -> &'static [FieldSpec] {
        const ERROR: &[FieldSpec] = &[FieldSpec::required(fields::MESSAGE, FieldType::String)];
        const VERSION: &[FieldSpec] = &[FieldSpec::required(fields::VERSION, FieldType::String)];
        const CANDIDATES: &[FieldSpec] =
            &[FieldSpec::optional(fields::CANDIDATES, FieldType::List)];
        const PROGRESS: &[FieldSpec] = &[FieldSpec::required(fields::PROGRESS, FieldType::Int)];
        const DOWNLOAD: &[FieldSpec] = &[
            FieldSpec::required(fields::PATH, FieldType::String),
            FieldSpec::required(fields::VALIDATED, FieldType::Bool),
        ];

        match self {
            PayloadSchema::None => &[],
            PayloadSchema::ErrorMessage => ERROR,
            PayloadSchema::OsVersion => VERSION,
            PayloadSchema::CandidateList => CANDIDATES,
            PayloadSchema::Progress => PROGRESS,
            PayloadSchema::DownloadRecord => DOWNLOAD,
        }
    }
}

/// Inbound response reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseReason {
    OsVersion,
    OsVersionError,
    SearchUpToDate,
    SearchError,
    SearchResult,
    DownloadError,
    DownloadProgress,
    DownloadSuccess,
    InstallError,
    InstallProgress,
    InstallRebootRequired,
    PreferenceUpdated,
    PreferenceError,
}

const RESPONSE_TAGS: &[(i32, ResponseReason)] = &[
    (0, ResponseReason::OsVersion),
    (1, ResponseReason::OsVersionError),
    (2, ResponseReason::SearchUpToDate),
    (3, ResponseReason::SearchError),
    (4, ResponseReason::SearchResult),
    (5, ResponseReason::DownloadError),
    (6, ResponseReason::DownloadProgress),
    (7, ResponseReason::DownloadSuccess),
    (8, ResponseReason::InstallError),
    (9, ResponseReason::InstallProgress),
    (10, ResponseReason::InstallRebootRequired),
    (11, ResponseReason::PreferenceUpdated),
    (12, ResponseReason::PreferenceError),
];

impl ResponseReason {
    /// Number of known reasons; valid tags are `0..COUNT`.
    pub const COUNT: usize = RESPONSE_TAGS.len();

    pub fn tag(self) -> i32 {
        match self {
            ResponseReason::OsVersion => 0,
            ResponseReason::OsVersionError => 1,
            ResponseReason::SearchUpToDate => 2,
            ResponseReason::SearchError => 3,
            ResponseReason::SearchResult => 4,
            ResponseReason::DownloadError => 5,
            ResponseReason::DownloadProgress => 6,
            ResponseReason::DownloadSuccess => 7,
            ResponseReason::InstallError => 8,
            ResponseReason::InstallProgress => 9,
            ResponseReason::InstallRebootRequired => 10,
            ResponseReason::PreferenceUpdated => 11,
            ResponseReason::PreferenceError => 12,
        }
    }

    pub fn from_tag(tag: i32) -> Option<Self> {
        RESPONSE_TAGS
            .iter()
            .find(|(t, _)| *t == tag)
            .map(|(_, reason)| *reason)
    }

    pub fn all() -> impl Iterator<Item = ResponseReason> {
        RESPONSE_TAGS.iter().map(|(_, reason)| *reason)
    }

    pub fn name(self) -> &'static str {
        match self {
            ResponseReason::OsVersion => "OS_VERSION",
            ResponseReason::OsVersionError => "OS_VERSION_ERROR",
            ResponseReason::SearchUpToDate => "SEARCH_UP_TO_DATE",
            ResponseReason::SearchError => "SEARCH_ERROR",
            ResponseReason::SearchResult => "SEARCH_RESULT",
            ResponseReason::DownloadError => "DOWNLOAD_ERROR",
            ResponseReason::DownloadProgress => "DOWNLOAD_PROGRESS",
            ResponseReason::DownloadSuccess => "DOWNLOAD_SUCCESS",
            ResponseReason::InstallError => "INSTALL_ERROR",
            ResponseReason::InstallProgress => "INSTALL_PROGRESS",
            ResponseReason::InstallRebootRequired => "INSTALL_REBOOT_REQUIRED",
            ResponseReason::PreferenceUpdated => "PREFERENCE_UPDATED",
            ResponseReason::PreferenceError => "PREFERENCE_ERROR",
        }
    }

    pub fn stage(self) -> Stage {
        match self {
            ResponseReason::OsVersion | ResponseReason::OsVersionError => Stage::OsVersion,
            ResponseReason::SearchUpToDate
            | ResponseReason::SearchError
            | ResponseReason::SearchResult => Stage::Search,
            ResponseReason::DownloadError
            | ResponseReason::DownloadProgress
            | ResponseReason::DownloadSuccess => Stage::Download,
            ResponseReason::InstallError
            | ResponseReason::InstallProgress
            | ResponseReason::InstallRebootRequired => Stage::Install,
            ResponseReason::PreferenceUpdated | ResponseReason::PreferenceError => {
                Stage::Preference
            }
        }
    }

    pub fn schema(self) -> PayloadSchema {
        match self {
            ResponseReason::SearchUpToDate
            | ResponseReason::InstallRebootRequired
            | ResponseReason::PreferenceUpdated => PayloadSchema::None,
            ResponseReason::OsVersionError
            | ResponseReason::SearchError
            | ResponseReason::DownloadError
            | ResponseReason::InstallError
            | ResponseReason::PreferenceError => PayloadSchema::ErrorMessage,
            ResponseReason::OsVersion => PayloadSchema::OsVersion,
            ResponseReason::SearchResult => PayloadSchema::CandidateList,
            ResponseReason::DownloadProgress | ResponseReason::InstallProgress => {
                PayloadSchema::Progress
            }
            ResponseReason::DownloadSuccess => PayloadSchema::DownloadRecord,
        }
    }

    /// Whether this reason ends the request it answers. Progress reports do
    /// not; everything else does.
    pub fn is_final(self) -> bool {
        self.schema() != PayloadSchema::Progress
    }
}

impl fmt::Display for ResponseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn response_tags_are_dense_and_consistent() {
        let tags: HashSet<i32> = ResponseReason::all().map(ResponseReason::tag).collect();
        assert_eq!(tags.len(), ResponseReason::COUNT);
        for tag in 0..ResponseReason::COUNT as i32 {
            let reason = ResponseReason::from_tag(tag).expect("dense tag");
            assert_eq!(reason.tag(), tag);
        }
    }

    #[test]
    fn request_tags_are_consistent() {
        for kind in RequestKind::ALL {
            assert_eq!(RequestKind::from_tag(kind.tag()), Some(kind));
        }
    }

    #[test]
    fn out_of_range_tags_resolve_to_nothing() {
        assert_eq!(ResponseReason::from_tag(-1), None);
        assert_eq!(ResponseReason::from_tag(999), None);
        assert_eq!(ResponseReason::from_tag(ResponseReason::COUNT as i32), None);
    }

    #[test]
    fn every_reason_has_one_stage() {
        assert_eq!(ResponseReason::DownloadProgress.stage(), Stage::Download);
        assert_eq!(ResponseReason::InstallRebootRequired.stage(), Stage::Install);
        assert!(!ResponseReason::InstallProgress.is_final());
        assert!(ResponseReason::SearchUpToDate.is_final());
    }
}
