//! Protocol messages.
//!
//! [`Message`] is the generic envelope that travels over the channel.
//! [`Request`] and [`Response`] are the typed views of its body, one variant per
//! discriminant.

use crate::codec::{
    PayloadError, Record, check_all, encode_records, read_bool, read_int, read_records, read_string,
};
use crate::fields;
use crate::model::{Channel, DownloadResult, Progress, UpdateCandidate};
use crate::taxonomy::{RequestKind, ResponseReason};
use crate::value::{FieldMap, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where replies to a request should be delivered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplyTo(String);

impl ReplyTo {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReplyTo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The wire envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub discriminant: i32,
    /// Set on every request; echoed by services that support correlation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
    /// Requests only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ReplyTo>,
    #[serde(default)]
    pub fields: FieldMap,
}

impl Message {
    pub fn new(discriminant: i32, fields: FieldMap) -> Self {
        Self {
            discriminant,
            request_id: None,
            reply_to: None,
            fields,
        }
    }

    pub fn with_request_id(mut self, id: u64) -> Self {
        self.request_id = Some(id);
        self
    }

    pub fn with_reply_to(mut self, reply_to: ReplyTo) -> Self {
        self.reply_to = Some(reply_to);
        self
    }
}

/// An inbound message could not be interpreted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown discriminant {0}")]
    UnknownDiscriminant(i32),
    #[error("invalid payload for {kind}: {source}")]
    InvalidPayload {
        kind: &'static str,
        #[source]
        source: PayloadError,
    },
}

/// A typed outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    QueryOsVersion,
    SearchUpdates { include_all_channels: bool },
    DownloadUpdate { candidate: UpdateCandidate },
    InstallUpdate { version_id: String, artifact_path: String },
    SetChannelPreference { channel: Channel },
    SetConnectionPreference { wifi_only: bool },
}

impl Request {
    pub fn kind(&self) -> RequestKind {
        match self {
            Request::QueryOsVersion => RequestKind::QueryOsVersion,
            Request::SearchUpdates { .. } => RequestKind::SearchUpdates,
            Request::DownloadUpdate { .. } => RequestKind::DownloadUpdate,
            Request::InstallUpdate { .. } => RequestKind::InstallUpdate,
            Request::SetChannelPreference { .. } => RequestKind::SetChannelPreference,
            Request::SetConnectionPreference { .. } => RequestKind::SetConnectionPreference,
        }
    }

    pub fn encode(&self) -> FieldMap {
        let mut map = FieldMap::new();
        match self {
            Request::QueryOsVersion => {}
            Request::SearchUpdates {
                include_all_channels,
            } => {
                map.insert(fields::ALL_CHANNELS.into(), Value::Bool(*include_all_channels));
            }
            Request::DownloadUpdate { candidate } => map = candidate.to_fields(),
            Request::InstallUpdate {
                version_id,
                artifact_path,
            } => {
                map.insert(fields::VERSION_ID.into(), Value::from(version_id.as_str()));
                map.insert(fields::PATH.into(), Value::from(artifact_path.as_str()));
            }
            Request::SetChannelPreference { channel } => {
                map.insert(fields::CHANNEL.into(), Value::Int(channel.index()));
            }
            Request::SetConnectionPreference { wifi_only } => {
                map.insert(fields::ENABLED.into(), Value::Bool(*wifi_only));
            }
        }
        map
    }

    /// Decode a request body. Used by service implementations.
    pub fn decode(kind: RequestKind, map: &FieldMap) -> Result<Self, PayloadError> {
        check_all(kind.fields(), map)?;
        Ok(match kind {
            RequestKind::QueryOsVersion => Request::QueryOsVersion,
            RequestKind::SearchUpdates => Request::SearchUpdates {
                include_all_channels: read_bool(map, fields::ALL_CHANNELS)?,
            },
            RequestKind::DownloadUpdate => Request::DownloadUpdate {
                candidate: UpdateCandidate::from_checked(map)?,
            },
            RequestKind::InstallUpdate => Request::InstallUpdate {
                version_id: read_string(map, fields::VERSION_ID)?,
                artifact_path: read_string(map, fields::PATH)?,
            },
            RequestKind::SetChannelPreference => {
                let index = read_int(map, fields::CHANNEL)?;
                let channel = i32::try_from(index)
                    .ok()
                    .and_then(Channel::from_index)
                    .ok_or(PayloadError::OutOfRange {
                        field: fields::CHANNEL,
                        value: index,
                    })?;
                Request::SetChannelPreference { channel }
            }
            RequestKind::SetConnectionPreference => Request::SetConnectionPreference {
                wifi_only: read_bool(map, fields::ENABLED)?,
            },
        })
    }

    /// Wrap in an envelope addressed back to `reply_to`.
    pub fn into_message(self, request_id: u64, reply_to: ReplyTo) -> Message {
        Message::new(self.kind().tag(), self.encode())
            .with_request_id(request_id)
            .with_reply_to(reply_to)
    }

    /// Interpret an inbound request envelope.
    pub fn from_message(message: &Message) -> Result<Self, ProtocolError> {
        let kind = RequestKind::from_tag(message.discriminant)
            .ok_or(ProtocolError::UnknownDiscriminant(message.discriminant))?;
        Self::decode(kind, &message.fields).map_err(|source| ProtocolError::InvalidPayload {
            kind: kind.name(),
            source,
        })
    }
}

/// A typed inbound response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    OsVersion { version: String },
    OsVersionError { message: String },
    UpToDate,
    SearchError { message: String },
    /// Candidates in service order; the first is canonical.
    SearchResult { candidates: Vec<UpdateCandidate> },
    DownloadError { message: String },
    DownloadProgress(Progress),
    DownloadSuccess(DownloadResult),
    InstallError { message: String },
    InstallProgress(Progress),
    RebootRequired,
    PreferenceUpdated,
    PreferenceError { message: String },
}

impl Response {
    pub fn reason(&self) -> ResponseReason {
        match self {
            Response::OsVersion { .. } => ResponseReason::OsVersion,
            Response::OsVersionError { .. } => ResponseReason::OsVersionError,
            Response::UpToDate => ResponseReason::SearchUpToDate,
            Response::SearchError { .. } => ResponseReason::SearchError,
            Response::SearchResult { .. } => ResponseReason::SearchResult,
            Response::DownloadError { .. } => ResponseReason::DownloadError,
            Response::DownloadProgress(_) => ResponseReason::DownloadProgress,
            Response::DownloadSuccess(_) => ResponseReason::DownloadSuccess,
            Response::InstallError { .. } => ResponseReason::InstallError,
            Response::InstallProgress(_) => ResponseReason::InstallProgress,
            Response::RebootRequired => ResponseReason::InstallRebootRequired,
            Response::PreferenceUpdated => ResponseReason::PreferenceUpdated,
            Response::PreferenceError { .. } => ResponseReason::PreferenceError,
        }
    }

    pub fn encode(&self) -> FieldMap {
        let mut map = FieldMap::new();
        match self {
            Response::UpToDate | Response::RebootRequired | Response::PreferenceUpdated => {}
            Response::OsVersion { version } => {
                map.insert(fields::VERSION.into(), Value::from(version.as_str()));
            }
            Response::OsVersionError { message }
            | Response::SearchError { message }
            | Response::DownloadError { message }
            | Response::InstallError { message }
            | Response::PreferenceError { message } => {
                map.insert(fields::MESSAGE.into(), Value::from(message.as_str()));
            }
            Response::SearchResult { candidates } => {
                map.insert(fields::CANDIDATES.into(), encode_records(candidates));
            }
            Response::DownloadProgress(progress) | Response::InstallProgress(progress) => {
                map.insert(fields::PROGRESS.into(), Value::Int(progress.to_wire()));
            }
            Response::DownloadSuccess(result) => map = result.to_fields(),
        }
        map
    }

    /// Decode a response body for a known reason.
    ///
    /// The schema is checked up front; nothing is returned unless every
    /// required field is present and well-typed.
    pub fn decode(reason: ResponseReason, map: &FieldMap) -> Result<Self, PayloadError> {
        check_all(reason.schema().fields(), map)?;
        let message = || read_string(map, fields::MESSAGE);
        let progress = || read_int(map, fields::PROGRESS).and_then(Progress::from_wire);

        Ok(match reason {
            ResponseReason::OsVersion => Response::OsVersion {
                version: read_string(map, fields::VERSION)?,
            },
            ResponseReason::OsVersionError => Response::OsVersionError { message: message()? },
            ResponseReason::SearchUpToDate => Response::UpToDate,
            ResponseReason::SearchError => Response::SearchError { message: message()? },
            ResponseReason::SearchResult => Response::SearchResult {
                candidates: decode_candidates(map)?,
            },
            ResponseReason::DownloadError => Response::DownloadError { message: message()? },
            ResponseReason::DownloadProgress => Response::DownloadProgress(progress()?),
            ResponseReason::DownloadSuccess => {
                Response::DownloadSuccess(DownloadResult::from_checked(map)?)
            }
            ResponseReason::InstallError => Response::InstallError { message: message()? },
            ResponseReason::InstallProgress => Response::InstallProgress(progress()?),
            ResponseReason::InstallRebootRequired => Response::RebootRequired,
            ResponseReason::PreferenceUpdated => Response::PreferenceUpdated,
            ResponseReason::PreferenceError => Response::PreferenceError { message: message()? },
        })
    }

    /// Interpret an inbound envelope.
    pub fn from_message(message: &Message) -> Result<Self, ProtocolError> {
        let reason = ResponseReason::from_tag(message.discriminant)
            .ok_or(ProtocolError::UnknownDiscriminant(message.discriminant))?;
        Self::decode(reason, &message.fields).map_err(|source| ProtocolError::InvalidPayload {
            kind: reason.name(),
            source,
        })
    }

    /// Wrap in an envelope answering `request_id`.
    pub fn into_message(self, request_id: Option<u64>) -> Message {
        let mut message = Message::new(self.reason().tag(), self.encode());
        message.request_id = request_id;
        message
    }
}

/// Later services send `candidates: [..]`; earlier ones send one flat record.
fn decode_candidates(map: &FieldMap) -> Result<Vec<UpdateCandidate>, PayloadError> {
    if map.contains_key(fields::CANDIDATES) {
        read_records(map, fields::CANDIDATES)
    } else {
        UpdateCandidate::from_fields(map).map(|c| vec![c])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(entries: &[(&str, Value)]) -> FieldMap {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn response_roundtrip_per_schema() {
        let samples = vec![
            Response::OsVersion {
                version: "13.0.1".into(),
            },
            Response::UpToDate,
            Response::SearchError {
                message: "no network".into(),
            },
            Response::SearchResult {
                candidates: vec![
                    UpdateCandidate::new("24.0", Channel::Live, 734_003_200),
                    UpdateCandidate::new("24.1-rc1", Channel::Rc, 5_000_000_000).with_hash("ff"),
                ],
            },
            Response::DownloadProgress(Progress::Indeterminate),
            Response::InstallProgress(Progress::Percent(100)),
            Response::DownloadSuccess(DownloadResult::new("/data/ota/pkg.zip", true)),
            Response::RebootRequired,
            Response::PreferenceError {
                message: "locked".into(),
            },
        ];
        for response in samples {
            let message = response.clone().into_message(Some(3));
            assert_eq!(Response::from_message(&message), Ok(response));
        }
    }

    #[test]
    fn flat_search_record_decodes_as_single_candidate() {
        let map = flat(&[
            ("versionId", Value::from("24.0")),
            ("channel", Value::from("live")),
            ("size", Value::Int(734_003_200)),
        ]);
        let decoded = Response::decode(ResponseReason::SearchResult, &map).unwrap();
        assert_eq!(
            decoded,
            Response::SearchResult {
                candidates: vec![UpdateCandidate::new("24.0", Channel::Live, 734_003_200)]
            }
        );
    }

    #[test]
    fn candidate_list_keeps_service_order() {
        let list = vec![
            UpdateCandidate::new("b", Channel::Dev, 2),
            UpdateCandidate::new("a", Channel::Live, 1),
        ];
        let map = Response::SearchResult {
            candidates: list.clone(),
        }
        .encode();
        match Response::decode(ResponseReason::SearchResult, &map).unwrap() {
            Response::SearchResult { candidates } => assert_eq!(candidates, list),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn bad_list_element_fails_whole_decode() {
        let map = flat(&[(
            "candidates",
            Value::List(vec![
                Value::Map(UpdateCandidate::new("a", Channel::Live, 1).to_fields()),
                Value::Int(7),
            ]),
        )]);
        assert!(Response::decode(ResponseReason::SearchResult, &map).is_err());
    }

    #[test]
    fn missing_field_is_invalid_payload() {
        let fields = flat(&[("path", Value::from("/x"))]);
        let message = Message::new(ResponseReason::DownloadSuccess.tag(), fields);
        assert_eq!(
            Response::from_message(&message),
            Err(ProtocolError::InvalidPayload {
                kind: "DOWNLOAD_SUCCESS",
                source: PayloadError::MissingField("validated"),
            })
        );
    }

    #[test]
    fn unknown_discriminant() {
        let message = Message::new(999, FieldMap::new());
        assert_eq!(
            Response::from_message(&message),
            Err(ProtocolError::UnknownDiscriminant(999))
        );
    }

    #[test]
    fn request_roundtrip_through_envelope() {
        let request = Request::DownloadUpdate {
            candidate: UpdateCandidate::new("24.0", Channel::Live, 734_003_200),
        };
        let message = request.clone().into_message(7, ReplyTo::new("client"));
        assert_eq!(message.request_id, Some(7));
        assert_eq!(message.reply_to, Some(ReplyTo::new("client")));
        assert_eq!(message.discriminant, RequestKind::DownloadUpdate.tag());
        assert_eq!(Request::from_message(&message), Ok(request));
    }

    #[test]
    fn channel_preference_travels_as_index() {
        let fields = Request::SetChannelPreference {
            channel: Channel::Dev,
        }
        .encode();
        assert_eq!(fields.get("channel"), Some(&Value::Int(2)));
    }

    #[test]
    fn envelope_json_omits_absent_correlation() {
        let message = Response::UpToDate.into_message(None);
        let json = serde_json::to_string(&message).unwrap();
        assert_eq!(json, r#"{"discriminant":2,"fields":{}}"#);
    }
}
