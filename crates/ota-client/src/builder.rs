//! Outgoing request construction.

use crate::error::ClientError;
use crate::session::{Operation, SessionState};
use ota_core::{Message, ReplyTo, Request};

/// Maps user operations to wire messages.
///
/// Holds only the reply destination; session data comes from the snapshot
/// passed in.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    reply_to: ReplyTo,
}

impl RequestBuilder {
    pub fn new(reply_to: ReplyTo) -> Self {
        Self { reply_to }
    }

    pub fn reply_to(&self) -> &ReplyTo {
        &self.reply_to
    }

    /// Fill in the arguments an operation takes from the session.
    ///
    /// Download needs a known candidate and install needs a validated artifact;
    /// everything else is self-contained.
    pub fn resolve(&self, op: Operation, state: &SessionState) -> Result<Request, ClientError> {
        Ok(match op {
            Operation::QueryOsVersion => Request::QueryOsVersion,
            Operation::Search {
                include_all_channels,
            } => Request::SearchUpdates {
                include_all_channels,
            },
            Operation::Download => Request::DownloadUpdate {
                candidate: state
                    .current_candidate
                    .clone()
                    .ok_or(ClientError::NoCandidate)?,
            },
            Operation::Install => {
                let artifact = state
                    .installable_artifact()
                    .ok_or(ClientError::NoInstallableArtifact)?;
                let version_id = state
                    .current_candidate
                    .as_ref()
                    .map(|c| c.version_id.clone())
                    .unwrap_or_default();
                Request::InstallUpdate {
                    version_id,
                    artifact_path: artifact.local_artifact_path.clone(),
                }
            }
            Operation::SetChannel(channel) => Request::SetChannelPreference { channel },
            Operation::SetWifiOnly(wifi_only) => Request::SetConnectionPreference { wifi_only },
        })
    }

    /// Build the envelope. Never fails.
    pub fn build(&self, request: Request, request_id: u64) -> Message {
        request.into_message(request_id, self.reply_to.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Phase;
    use ota_core::{Channel, DownloadResult, RequestKind, UpdateCandidate, Value};

    fn builder() -> RequestBuilder {
        RequestBuilder::new(ReplyTo::new("test-client"))
    }

    #[test]
    fn download_uses_current_candidate() {
        let state = SessionState {
            phase: Phase::Found,
            current_candidate: Some(UpdateCandidate::new("24.0", Channel::Live, 10)),
            ..SessionState::default()
        };
        let request = builder().resolve(Operation::Download, &state).unwrap();
        let message = builder().build(request, 4);
        assert_eq!(message.discriminant, RequestKind::DownloadUpdate.tag());
        assert_eq!(message.fields.get("versionId"), Some(&Value::from("24.0")));
        assert_eq!(message.reply_to, Some(ReplyTo::new("test-client")));
        assert_eq!(message.request_id, Some(4));
    }

    #[test]
    fn download_without_candidate() {
        let err = builder()
            .resolve(Operation::Download, &SessionState::default())
            .unwrap_err();
        assert!(matches!(err, ClientError::NoCandidate));
    }

    #[test]
    fn install_refuses_unvalidated_artifact() {
        let state = SessionState {
            phase: Phase::Downloaded,
            current_candidate: Some(UpdateCandidate::new("24.0", Channel::Live, 10)),
            downloaded_artifact: Some(DownloadResult::new("/data/ota/pkg.zip", false)),
            ..SessionState::default()
        };
        let err = builder().resolve(Operation::Install, &state).unwrap_err();
        assert!(matches!(err, ClientError::NoInstallableArtifact));
    }

    #[test]
    fn install_carries_version_and_path() {
        let state = SessionState {
            phase: Phase::Downloaded,
            current_candidate: Some(UpdateCandidate::new("24.0", Channel::Live, 10)),
            downloaded_artifact: Some(DownloadResult::new("/data/ota/pkg.zip", true)),
            ..SessionState::default()
        };
        let request = builder().resolve(Operation::Install, &state).unwrap();
        assert_eq!(
            request,
            Request::InstallUpdate {
                version_id: "24.0".into(),
                artifact_path: "/data/ota/pkg.zip".into(),
            }
        );
    }

    #[test]
    fn search_ignores_session() {
        let request = builder()
            .resolve(
                Operation::Search {
                    include_all_channels: true,
                },
                &SessionState::default(),
            )
            .unwrap();
        let message = builder().build(request, 1);
        assert_eq!(message.fields.get("allChannels"), Some(&Value::Bool(true)));
    }
}
