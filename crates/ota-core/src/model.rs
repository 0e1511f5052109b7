//! Domain records exchanged during an update session.

use crate::codec::{FieldSpec, PayloadError, Record, read_bool, read_int, read_opt_string, read_string};
use crate::fields;
use crate::value::{FieldMap, FieldType, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Release channel an update is published on.
///
/// The declaration order is the index order used by the channel preference
/// request; `Live` is index 0 and the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    #[default]
    Live,
    Rc,
    Dev,
}

impl Channel {
    /// Channels in selector order.
    pub const ORDERED: [Channel; 3] = [Channel::Live, Channel::Rc, Channel::Dev];

    pub fn index(self) -> i32 {
        match self {
            Channel::Live => 0,
            Channel::Rc => 1,
            Channel::Dev => 2,
        }
    }

    pub fn from_index(index: i32) -> Option<Self> {
        usize::try_from(index)
            .ok()
            .and_then(|i| Self::ORDERED.get(i).copied())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Live => "live",
            Channel::Rc => "rc",
            Channel::Dev => "dev",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ORDERED
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| s.to_string())
    }
}

/// An available update returned by a search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateCandidate {
    pub version_id: String,
    pub channel: Channel,
    /// Package size in bytes.
    pub size: u64,
    /// Content hash the service validates the download against.
    pub hash: Option<String>,
}

impl UpdateCandidate {
    pub fn new(version_id: impl Into<String>, channel: Channel, size: u64) -> Self {
        Self {
            version_id: version_id.into(),
            channel,
            size,
            hash: None,
        }
    }

    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = Some(hash.into());
        self
    }
}

impl fmt::Display for UpdateCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {} bytes)", self.version_id, self.channel, self.size)
    }
}

impl Record for UpdateCandidate {
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::required(fields::VERSION_ID, FieldType::String),
        FieldSpec::required(fields::CHANNEL, FieldType::String),
        FieldSpec::required(fields::SIZE, FieldType::Int),
        FieldSpec::optional(fields::HASH, FieldType::String),
    ];

    fn to_fields(&self) -> FieldMap {
        let mut map = FieldMap::new();
        map.insert(fields::VERSION_ID.into(), Value::from(self.version_id.as_str()));
        map.insert(fields::CHANNEL.into(), Value::from(self.channel.as_str()));
        map.insert(
            fields::SIZE.into(),
            Value::integer(i64::try_from(self.size).unwrap_or(i64::MAX)),
        );
        if let Some(hash) = &self.hash {
            map.insert(fields::HASH.into(), Value::from(hash.as_str()));
        }
        map
    }

    fn from_checked(map: &FieldMap) -> Result<Self, PayloadError> {
        let channel = read_string(map, fields::CHANNEL)?;
        let channel = channel
            .parse::<Channel>()
            .map_err(|value| PayloadError::Unparsable {
                field: fields::CHANNEL,
                value,
            })?;
        let size = read_int(map, fields::SIZE)?;
        let size = u64::try_from(size).map_err(|_| PayloadError::OutOfRange {
            field: fields::SIZE,
            value: size,
        })?;
        Ok(Self {
            version_id: read_string(map, fields::VERSION_ID)?,
            channel,
            size,
            hash: read_opt_string(map, fields::HASH)?,
        })
    }
}

/// Outcome of a completed download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadResult {
    pub local_artifact_path: String,
    /// False when content-hash verification failed; such an artifact must
    /// never be installed.
    pub validated: bool,
}

impl DownloadResult {
    pub fn new(local_artifact_path: impl Into<String>, validated: bool) -> Self {
        Self {
            local_artifact_path: local_artifact_path.into(),
            validated,
        }
    }
}

impl Record for DownloadResult {
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::required(fields::PATH, FieldType::String),
        FieldSpec::required(fields::VALIDATED, FieldType::Bool),
    ];

    fn to_fields(&self) -> FieldMap {
        let mut map = FieldMap::new();
        map.insert(
            fields::PATH.into(),
            Value::from(self.local_artifact_path.as_str()),
        );
        map.insert(fields::VALIDATED.into(), Value::Bool(self.validated));
        map
    }

    fn from_checked(map: &FieldMap) -> Result<Self, PayloadError> {
        Ok(Self {
            local_artifact_path: read_string(map, fields::PATH)?,
            validated: read_bool(map, fields::VALIDATED)?,
        })
    }
}

/// A progress report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Progress {
    /// No known completion percentage.
    Indeterminate,
    /// Percent complete, `0..=100`.
    Percent(u8),
}

impl Progress {
    /// Wire value reserved for indeterminate progress.
    pub const INDETERMINATE: i32 = -1;

    pub fn from_wire(value: i64) -> Result<Self, PayloadError> {
        match value {
            -1 => Ok(Progress::Indeterminate),
            0..=100 => Ok(Progress::Percent(value as u8)),
            _ => Err(PayloadError::OutOfRange {
                field: fields::PROGRESS,
                value,
            }),
        }
    }

    pub fn to_wire(self) -> i32 {
        match self {
            Progress::Indeterminate => Self::INDETERMINATE,
            Progress::Percent(p) => i32::from(p),
        }
    }

    pub fn is_indeterminate(self) -> bool {
        self == Progress::Indeterminate
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Progress::Indeterminate => f.write_str("in progress"),
            Progress::Percent(p) => write!(f, "{p}%"),
        }
    }
}
