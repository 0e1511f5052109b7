//! Response dispatch and the session state machine.
//!
//! [`transition`] is the pure core: given a state and a decoded response it
//! returns the next state and what to tell the user. [`Dispatcher`] wraps it
//! with discriminant lookup, decoding, request correlation and phase gating,
//! and is the only writer of [`SessionState`].

use crate::error::DispatchError;
use crate::session::{Phase, SessionState, Status, StatusKind};
use ota_core::{Message, Progress, Request, RequestKind, Response, ResponseReason, Stage};

/// What applying a message produced for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Effect {
    pub status: Option<Status>,
    pub progress: Option<(Stage, Progress)>,
}

impl Effect {
    fn status(status: Status) -> Self {
        Self {
            status: Some(status),
            progress: None,
        }
    }

    fn progress(stage: Stage, progress: Progress) -> Self {
        Self {
            status: None,
            progress: Some((stage, progress)),
        }
    }
}

/// Result of dispatching one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Applied(Effect),
    /// Ignored without touching state.
    Dropped(DropReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// Tag outside the known taxonomy.
    UnknownDiscriminant(i32),
    /// Reply names a request id that is not outstanding.
    UnknownRequest { request_id: u64, reason: ResponseReason },
    /// Reply names an outstanding request of a different stage.
    StageMismatch {
        request_id: u64,
        expected: Stage,
        reason: ResponseReason,
    },
    /// No outstanding request of this stage, or the phase has moved on.
    NotAwaiting { reason: ResponseReason, phase: Phase },
}

#[derive(Debug, Clone)]
struct Pending {
    id: u64,
    kind: RequestKind,
    before: SessionState,
    after: SessionState,
}

impl Pending {
    fn stage(&self) -> Stage {
        self.kind.stage()
    }

    /// Put back the preference this request changed optimistically.
    fn restore_preference(&self, state: &mut SessionState) {
        match self.kind {
            RequestKind::SetChannelPreference => {
                state.channel_preference = self.before.channel_preference;
            }
            RequestKind::SetConnectionPreference => {
                state.wifi_only_preference = self.before.wifi_only_preference;
            }
            _ => {}
        }
    }
}

/// Outstanding requests in send order. At most one per request kind, so the
/// two preference requests are correlated independently.
#[derive(Debug, Clone, Default)]
struct PendingRequests {
    entries: Vec<Pending>,
}

impl PendingRequests {
    /// Track a new request, returning ids of the same-kind requests it replaces.
    fn insert(&mut self, entry: Pending) -> Vec<u64> {
        let kind = entry.kind;
        let superseded = self
            .entries
            .iter()
            .filter(|p| p.kind == kind)
            .map(|p| p.id)
            .collect();
        self.entries.retain(|p| p.kind != kind);
        self.entries.push(entry);
        superseded
    }

    fn get(&self, id: u64) -> Option<&Pending> {
        self.entries.iter().find(|p| p.id == id)
    }

    fn remove(&mut self, id: u64) -> Option<Pending> {
        let index = self.entries.iter().position(|p| p.id == id)?;
        Some(self.entries.remove(index))
    }

    /// Find the request a reply answers. Replies without an id match the
    /// oldest outstanding request of their stage.
    fn find(
        &self,
        request_id: Option<u64>,
        reason: ResponseReason,
        phase: Phase,
    ) -> Result<u64, DropReason> {
        let stage = reason.stage();
        match request_id {
            Some(id) => {
                let entry = self
                    .entries
                    .iter()
                    .find(|p| p.id == id)
                    .ok_or(DropReason::UnknownRequest {
                        request_id: id,
                        reason,
                    })?;
                if entry.stage() == stage {
                    Ok(id)
                } else {
                    Err(DropReason::StageMismatch {
                        request_id: id,
                        expected: entry.stage(),
                        reason,
                    })
                }
            }
            None => self
                .entries
                .iter()
                .find(|p| p.stage() == stage)
                .map(|p| p.id)
                .ok_or(DropReason::NotAwaiting { reason, phase }),
        }
    }
}

/// Owns the session state and applies every message to it in order.
#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    state: SessionState,
    pending: PendingRequests,
}

impl Dispatcher {
    pub fn new(state: SessionState) -> Self {
        Self {
            state,
            pending: PendingRequests::default(),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn pending_count(&self) -> usize {
        self.pending.entries.len()
    }

    /// Record an outgoing request and apply its client-side effect.
    pub fn request_sent(&mut self, id: u64, request: &Request) -> Effect {
        let before = self.state.clone();
        let (after, effect) = on_request(&before, request);
        let superseded = self.pending.insert(Pending {
            id,
            kind: request.kind(),
            before,
            after: after.clone(),
        });
        for old in superseded {
            tracing::warn!("request {} superseded by {} ({})", old, id, request.kind());
        }
        self.set_state(after);
        effect
    }

    /// Undo a request whose send failed, if nothing else happened since.
    pub fn request_failed(&mut self, id: u64) -> bool {
        let Some(entry) = self.pending.remove(id) else {
            return false;
        };
        if self.state == entry.after {
            self.set_state(entry.before);
        }
        true
    }

    /// Apply one inbound message.
    ///
    /// Unknown discriminants and uncorrelated replies are dropped. A payload
    /// that fails to decode is an error and leaves the state untouched.
    pub fn dispatch(&mut self, message: &Message) -> Result<Dispatch, DispatchError> {
        let Some(reason) = ResponseReason::from_tag(message.discriminant) else {
            return Ok(Dispatch::Dropped(DropReason::UnknownDiscriminant(
                message.discriminant,
            )));
        };
        let response = Response::decode(reason, &message.fields).map_err(|source| {
            DispatchError::InvalidPayload {
                kind: reason.name(),
                stage: reason.stage(),
                source,
            }
        })?;

        let phase = self.state.phase;
        let id = match self.pending.find(message.request_id, reason, phase) {
            Ok(id) => id,
            Err(drop) => return Ok(Dispatch::Dropped(drop)),
        };
        let stage = reason.stage();
        if matches!(stage, Stage::Search | Stage::Download | Stage::Install)
            && phase.awaiting() != Some(stage)
        {
            return Ok(Dispatch::Dropped(DropReason::NotAwaiting { reason, phase }));
        }

        let (mut next, effect) = transition(&self.state, &response);
        if let Response::PreferenceError { .. } = response {
            if let Some(entry) = self.pending.get(id) {
                entry.restore_preference(&mut next);
            }
        }
        if reason.is_final() {
            self.pending.remove(id);
        }
        self.set_state(next);
        Ok(Dispatch::Applied(effect))
    }

    /// The channel went away; outstanding requests will never be answered.
    /// The phase is left where it was.
    pub fn disconnected(&mut self) -> usize {
        let orphaned = self.pending.entries.len();
        self.pending.entries.clear();
        orphaned
    }

    /// Start a fresh session, keeping preferences.
    pub fn reset(&mut self) {
        self.pending.entries.clear();
        let fresh = self.state.reset();
        self.set_state(fresh);
    }

    fn set_state(&mut self, next: SessionState) {
        if next.phase != self.state.phase {
            tracing::info!("phase {} -> {}", self.state.phase, next.phase);
        }
        self.state = next;
    }
}

fn on_request(state: &SessionState, request: &Request) -> (SessionState, Effect) {
    let mut next = state.clone();
    let effect = match request {
        Request::QueryOsVersion => Effect::status(Status::info("Querying OS version")),
        Request::SearchUpdates { .. } => {
            next.phase = Phase::Searching;
            next.last_error = None;
            Effect {
                status: Some(Status::info("Getting latest version")),
                progress: Some((Stage::Search, Progress::Indeterminate)),
            }
        }
        Request::DownloadUpdate { .. } => {
            next.phase = Phase::Downloading;
            next.last_error = None;
            next.downloaded_artifact = None;
            Effect {
                status: Some(Status::info("Downloading update")),
                progress: Some((Stage::Download, Progress::Indeterminate)),
            }
        }
        Request::InstallUpdate { .. } => {
            next.phase = Phase::Installing;
            next.last_error = None;
            Effect::status(Status::info(
                "Installing update, the device will need a reboot to apply it",
            ))
        }
        Request::SetChannelPreference { channel } => {
            next.channel_preference = *channel;
            Effect::status(Status::info(format!("Update channel set to {channel}")))
        }
        Request::SetConnectionPreference { wifi_only } => {
            next.wifi_only_preference = *wifi_only;
            Effect::status(Status::info(if *wifi_only {
                "Only wifi downloads"
            } else {
                "All connections allowed"
            }))
        }
    };
    (next, effect)
}

fn failed(state: &mut SessionState, stage: Stage, message: &str) {
    state.phase = Phase::Failed(stage);
    state.last_error = Some(message.to_string());
}

/// Apply a decoded response to a state.
pub fn transition(state: &SessionState, response: &Response) -> (SessionState, Effect) {
    let mut next = state.clone();
    let effect = match response {
        Response::OsVersion { version } => {
            next.os_version = Some(version.clone());
            Effect::status(Status::info(format!("OS version {version}")))
        }
        Response::OsVersionError { message } => Effect::status(Status::new(
            StatusKind::DomainError,
            format!("Could not query OS version: {message}"),
        )),
        Response::UpToDate => {
            next.phase = Phase::UpToDate;
            next.current_candidate = None;
            next.candidates.clear();
            Effect::status(Status::info("Your OS is up to date"))
        }
        Response::SearchError { message } => {
            failed(&mut next, Stage::Search, message);
            Effect::status(Status::new(
                StatusKind::DomainError,
                format!("Could not retrieve updates: {message}"),
            ))
        }
        Response::SearchResult { candidates } => match candidates.first() {
            None => return transition(state, &Response::UpToDate),
            Some(first) => {
                next.phase = Phase::Found;
                next.current_candidate = Some(first.clone());
                next.candidates = candidates.clone();
                next.downloaded_artifact = None;
                Effect::status(Status::info(format!("Found version {first}")))
            }
        },
        Response::DownloadError { message } => {
            failed(&mut next, Stage::Download, message);
            Effect::status(Status::new(
                StatusKind::DomainError,
                format!("Download failed: {message}"),
            ))
        }
        Response::DownloadProgress(progress) => Effect::progress(Stage::Download, *progress),
        Response::DownloadSuccess(result) if result.validated => {
            next.phase = Phase::Downloaded;
            next.downloaded_artifact = Some(result.clone());
            Effect::status(Status::info(format!(
                "Download successful in {}",
                result.local_artifact_path
            )))
        }
        Response::DownloadSuccess(_) => {
            failed(&mut next, Stage::Download, "Package validation failed");
            next.downloaded_artifact = None;
            Effect::status(Status::new(
                StatusKind::ValidationFailure,
                "Package validation failed",
            ))
        }
        Response::InstallError { message } => {
            failed(&mut next, Stage::Install, message);
            Effect::status(Status::new(
                StatusKind::DomainError,
                format!("Installation failed: {message}"),
            ))
        }
        Response::InstallProgress(progress) => Effect::progress(Stage::Install, *progress),
        Response::RebootRequired => {
            next.phase = Phase::RebootRequired;
            Effect::status(Status::info("Installation complete, reboot required"))
        }
        Response::PreferenceUpdated => Effect::status(Status::info("Preferences updated")),
        Response::PreferenceError { message } => Effect::status(Status::new(
            StatusKind::DomainError,
            format!("Could not change preferences: {message}"),
        )),
    };
    (next, effect)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ota_core::{Channel, DownloadResult, FieldMap, UpdateCandidate, Value};

    fn candidate() -> UpdateCandidate {
        UpdateCandidate::new("24.0", Channel::Live, 734_003_200)
    }

    fn searching() -> Dispatcher {
        let mut d = Dispatcher::default();
        d.request_sent(
            1,
            &Request::SearchUpdates {
                include_all_channels: false,
            },
        );
        d
    }

    fn downloading() -> Dispatcher {
        let mut d = searching();
        d.dispatch(
            &Response::SearchResult {
                candidates: vec![candidate()],
            }
            .into_message(Some(1)),
        )
        .unwrap();
        d.request_sent(
            2,
            &Request::DownloadUpdate {
                candidate: candidate(),
            },
        );
        d
    }

    #[test]
    fn search_result_stores_first_candidate() {
        let mut d = searching();
        let second = UpdateCandidate::new("25.0-rc1", Channel::Rc, 1);
        let out = d
            .dispatch(
                &Response::SearchResult {
                    candidates: vec![candidate(), second.clone()],
                }
                .into_message(Some(1)),
            )
            .unwrap();
        assert!(matches!(out, Dispatch::Applied(_)));
        assert_eq!(d.state().phase, Phase::Found);
        assert_eq!(d.state().current_candidate, Some(candidate()));
        assert_eq!(d.state().candidates.len(), 2);
        assert_eq!(d.pending_count(), 0);
    }

    #[test]
    fn empty_candidate_list_is_up_to_date() {
        let (next, effect) = transition(
            &SessionState::default(),
            &Response::SearchResult { candidates: vec![] },
        );
        assert_eq!(next.phase, Phase::UpToDate);
        assert_eq!(effect.status.unwrap().text, "Your OS is up to date");
    }

    #[test]
    fn invalid_payload_leaves_state_untouched() {
        let mut d = downloading();
        let before = d.state().clone();
        let mut fields = FieldMap::new();
        fields.insert("path".into(), Value::from("/data/ota/pkg.zip"));
        let message = Message::new(ResponseReason::DownloadSuccess.tag(), fields);
        let err = d.dispatch(&message).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidPayload { stage: Stage::Download, .. }));
        assert_eq!(d.state(), &before);
        assert_eq!(d.pending_count(), 1);
    }

    #[test]
    fn unknown_discriminant_is_dropped() {
        let mut d = searching();
        let before = d.state().clone();
        let out = d.dispatch(&Message::new(999, FieldMap::new())).unwrap();
        assert_eq!(out, Dispatch::Dropped(DropReason::UnknownDiscriminant(999)));
        assert_eq!(d.state(), &before);
        let out = d.dispatch(&Message::new(-3, FieldMap::new())).unwrap();
        assert_eq!(out, Dispatch::Dropped(DropReason::UnknownDiscriminant(-3)));
    }

    #[test]
    fn progress_keeps_request_outstanding() {
        let mut d = downloading();
        let out = d
            .dispatch(&Response::DownloadProgress(Progress::Indeterminate).into_message(Some(2)))
            .unwrap();
        assert_eq!(
            out,
            Dispatch::Applied(Effect::progress(Stage::Download, Progress::Indeterminate))
        );
        assert_eq!(d.state().phase, Phase::Downloading);
        assert_eq!(d.pending_count(), 1);
    }

    #[test]
    fn unvalidated_download_does_not_advance() {
        let mut d = downloading();
        let out = d
            .dispatch(
                &Response::DownloadSuccess(DownloadResult::new("/data/ota/pkg.zip", false))
                    .into_message(Some(2)),
            )
            .unwrap();
        let Dispatch::Applied(effect) = out else {
            panic!("expected applied");
        };
        assert_eq!(effect.status.unwrap().kind, StatusKind::ValidationFailure);
        assert_eq!(d.state().phase, Phase::Failed(Stage::Download));
        assert_eq!(d.state().downloaded_artifact, None);
        assert!(d.state().enabled_operations().download);
    }

    #[test]
    fn stray_progress_after_phase_moved_is_dropped() {
        let mut d = downloading();
        d.dispatch(
            &Response::DownloadSuccess(DownloadResult::new("/p.zip", true)).into_message(Some(2)),
        )
        .unwrap();
        let before = d.state().clone();
        let out = d
            .dispatch(&Response::DownloadProgress(Progress::Percent(90)).into_message(None))
            .unwrap();
        assert!(matches!(
            out,
            Dispatch::Dropped(DropReason::NotAwaiting { .. })
        ));
        assert_eq!(d.state(), &before);
    }

    #[test]
    fn reply_for_unknown_id_is_dropped() {
        let mut d = searching();
        let out = d.dispatch(&Response::UpToDate.into_message(Some(77))).unwrap();
        assert!(matches!(
            out,
            Dispatch::Dropped(DropReason::UnknownRequest { request_id: 77, .. })
        ));
        assert_eq!(d.state().phase, Phase::Searching);
    }

    #[test]
    fn reply_with_wrong_stage_is_dropped() {
        let mut d = searching();
        let out = d
            .dispatch(&Response::RebootRequired.into_message(Some(1)))
            .unwrap();
        assert_eq!(
            out,
            Dispatch::Dropped(DropReason::StageMismatch {
                request_id: 1,
                expected: Stage::Search,
                reason: ResponseReason::InstallRebootRequired,
            })
        );
    }

    #[test]
    fn uncorrelated_reply_matches_outstanding_stage() {
        let mut d = searching();
        d.dispatch(&Response::UpToDate.into_message(None)).unwrap();
        assert_eq!(d.state().phase, Phase::UpToDate);
        assert_eq!(d.pending_count(), 0);
    }

    #[test]
    fn newer_request_supersedes_older_of_same_kind() {
        let mut d = searching();
        d.request_sent(
            5,
            &Request::SearchUpdates {
                include_all_channels: true,
            },
        );
        assert_eq!(d.pending_count(), 1);
        let out = d.dispatch(&Response::UpToDate.into_message(Some(1))).unwrap();
        assert!(matches!(out, Dispatch::Dropped(DropReason::UnknownRequest { .. })));
    }

    #[test]
    fn failed_send_restores_previous_phase() {
        let mut d = searching();
        assert!(d.request_failed(1));
        assert_eq!(d.state().phase, Phase::Idle);
        assert!(!d.request_failed(1));
    }

    #[test]
    fn search_error_keeps_message() {
        let mut d = searching();
        d.dispatch(
            &Response::SearchError {
                message: "server unreachable".into(),
            }
            .into_message(Some(1)),
        )
        .unwrap();
        assert_eq!(d.state().phase, Phase::Failed(Stage::Search));
        assert_eq!(d.state().last_error.as_deref(), Some("server unreachable"));
        assert!(d.state().enabled_operations().search);
    }

    #[test]
    fn preference_request_updates_session_immediately() {
        let mut d = Dispatcher::default();
        d.request_sent(
            9,
            &Request::SetChannelPreference {
                channel: Channel::Dev,
            },
        );
        assert_eq!(d.state().channel_preference, Channel::Dev);
        assert_eq!(d.state().phase, Phase::Idle);
        let out = d
            .dispatch(&Response::PreferenceUpdated.into_message(Some(9)))
            .unwrap();
        assert!(matches!(out, Dispatch::Applied(_)));
    }

    #[test]
    fn preference_requests_are_correlated_separately() {
        let mut d = Dispatcher::default();
        d.request_sent(
            1,
            &Request::SetChannelPreference {
                channel: Channel::Dev,
            },
        );
        d.request_sent(2, &Request::SetConnectionPreference { wifi_only: true });
        assert_eq!(d.pending_count(), 2);

        let out = d
            .dispatch(
                &Response::PreferenceError {
                    message: "channel locked".into(),
                }
                .into_message(Some(1)),
            )
            .unwrap();
        let Dispatch::Applied(effect) = out else {
            panic!("expected applied");
        };
        assert_eq!(
            effect.status.unwrap().text,
            "Could not change preferences: channel locked"
        );
        // Only the rejected preference is put back.
        assert_eq!(d.state().channel_preference, Channel::Live);
        assert!(d.state().wifi_only_preference);

        let out = d
            .dispatch(&Response::PreferenceUpdated.into_message(Some(2)))
            .unwrap();
        assert!(matches!(out, Dispatch::Applied(_)));
        assert!(d.state().wifi_only_preference);
        assert_eq!(d.pending_count(), 0);
    }

    #[test]
    fn repeated_preference_of_same_kind_supersedes() {
        let mut d = Dispatcher::default();
        d.request_sent(1, &Request::SetConnectionPreference { wifi_only: true });
        d.request_sent(2, &Request::SetConnectionPreference { wifi_only: false });
        assert_eq!(d.pending_count(), 1);
        let out = d
            .dispatch(&Response::PreferenceUpdated.into_message(Some(1)))
            .unwrap();
        assert!(matches!(
            out,
            Dispatch::Dropped(DropReason::UnknownRequest { request_id: 1, .. })
        ));
    }

    #[test]
    fn download_error_fails_download_stage() {
        let mut d = downloading();
        let out = d
            .dispatch(
                &Response::DownloadError {
                    message: "disk full".into(),
                }
                .into_message(Some(2)),
            )
            .unwrap();
        let Dispatch::Applied(effect) = out else {
            panic!("expected applied");
        };
        let status = effect.status.unwrap();
        assert_eq!(status.kind, StatusKind::DomainError);
        assert_eq!(status.text, "Download failed: disk full");
        assert_eq!(d.state().phase, Phase::Failed(Stage::Download));
        assert_eq!(d.state().last_error.as_deref(), Some("disk full"));
        assert_eq!(d.state().current_candidate, Some(candidate()));
        let enabled = d.state().enabled_operations();
        assert!(enabled.download);
        assert!(!enabled.install);
        assert_eq!(d.pending_count(), 0);
    }

    #[test]
    fn install_error_allows_retry() {
        let mut d = downloading();
        d.dispatch(
            &Response::DownloadSuccess(DownloadResult::new("/data/ota/pkg.zip", true))
                .into_message(Some(2)),
        )
        .unwrap();
        d.request_sent(
            3,
            &Request::InstallUpdate {
                version_id: "24.0".into(),
                artifact_path: "/data/ota/pkg.zip".into(),
            },
        );
        assert_eq!(d.state().phase, Phase::Installing);

        let out = d
            .dispatch(
                &Response::InstallError {
                    message: "battery low".into(),
                }
                .into_message(Some(3)),
            )
            .unwrap();
        let Dispatch::Applied(effect) = out else {
            panic!("expected applied");
        };
        let status = effect.status.unwrap();
        assert_eq!(status.kind, StatusKind::DomainError);
        assert_eq!(status.text, "Installation failed: battery low");
        assert_eq!(d.state().phase, Phase::Failed(Stage::Install));
        assert_eq!(d.state().last_error.as_deref(), Some("battery low"));
        assert!(d.state().installable_artifact().is_some());
        let enabled = d.state().enabled_operations();
        assert!(enabled.install);
        assert!(!enabled.download);
    }

    #[test]
    fn disconnect_orphans_pending_and_keeps_phase() {
        let mut d = downloading();
        assert_eq!(d.disconnected(), 1);
        assert_eq!(d.state().phase, Phase::Downloading);
        let out = d
            .dispatch(&Response::DownloadProgress(Progress::Percent(3)).into_message(Some(2)))
            .unwrap();
        assert!(matches!(out, Dispatch::Dropped(_)));
    }
}
