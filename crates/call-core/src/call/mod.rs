//! Call state machine
//!
//! A [`Call`] coordinates one signaling session: it mirrors the session's
//! notifications onto the event bus, keeps the local and remote stream groups
//! in sync with the media transport, implements the hold/mute/transfer
//! protocol and takes part in primary arbitration.
//!
//! Calls are created through [`Phone::create_call`](crate::Phone::create_call)
//! and always live behind an `Arc`. Public operations never fail: problems
//! are reported as notifications (`answer.failed`, `transfer.failed`,
//! `error`) and logged.
//!
//! Lock discipline: the call's state mutex is never held while calling into
//! the session, the transport or the event bus. Listeners are therefore free
//! to call back into the call.

mod controls;
mod primary;
mod session_events;
mod streams;
mod timer;

use std::fmt;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::CallConfig;
use crate::events::{CallEvent, EventBus};
use crate::media::{KindFlags, MediaKind, StreamGroup, StreamGroupKind, StreamSinks};
use crate::providers::{Collaborators, DeviceKind};
use crate::session::{HoldStatus, Identity, MuteOptions, SessionDirection, SignalingSession};

pub use timer::{format_duration, TICK_INTERVAL};

/// Unique identifier for a call, stable for its lifetime
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    /// Random v4 identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CallId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for CallId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Signaling-derived status of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    /// No session attached
    Idle,
    /// Session attached, not yet confirmed
    Negotiating,
    /// Terminating direction, waiting for the local user to answer
    Ringing,
    /// Established and not held
    Active,
    /// Established and held by either side
    Held,
    /// Session ended or failed; absorbing
    Terminated,
}

impl CallStatus {
    pub fn is_established(&self) -> bool {
        matches!(self, CallStatus::Active | CallStatus::Held)
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, CallStatus::Terminated)
    }
}

/// Direction of a call from the phone's perspective
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallDirection {
    /// Placed by the local user (or no session yet)
    Originating,
    /// Received from the network
    Terminating,
}

/// Snapshot consumed by renderers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSummary {
    pub call_id: CallId,
    pub status: CallStatus,
    pub has_session: bool,
    pub progress: bool,
    pub established: bool,
    pub ended: bool,
    pub held: bool,
    pub is_audio_muted: bool,
    pub is_video_muted: bool,
    pub primary: bool,
    pub in_transfer: bool,
    pub direction: CallDirection,
    pub terminating: bool,
    pub originating: bool,
    pub local_identity: Option<String>,
    pub remote_identity: Option<String>,
}

/// Phase of a key event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPhase {
    Down,
    Up,
}

/// A keyboard event forwarded by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEvent {
    /// Key value, `" "` for the spacebar
    pub key: String,
    pub phase: KeyPhase,
    /// Auto-repeat event
    pub repeat: bool,
    /// The event targeted the page rather than an input field
    pub on_document_body: bool,
}

impl KeyEvent {
    pub fn down(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            phase: KeyPhase::Down,
            repeat: false,
            on_document_body: true,
        }
    }

    pub fn up(key: impl Into<String>) -> Self {
        Self {
            phase: KeyPhase::Up,
            ..Self::down(key)
        }
    }
}

struct CallInner {
    session: Option<Arc<dyn SignalingSession>>,
    terminated: bool,
    primary: bool,
    in_transfer: bool,
    /// Wall-clock time of the first confirmation
    answer_time: Option<DateTime<Utc>>,
    /// Monotonic counterpart of `answer_time`
    answered_at: Option<tokio::time::Instant>,
    remote_identity_override: Option<Identity>,
    /// Mute state remembered on push-to-talk key down
    mute_hint: bool,
    local: StreamGroup,
    remote: StreamGroup,
    ticker: Option<JoinHandle<()>>,
}

impl CallInner {
    fn group_mut(&mut self, group: StreamGroupKind) -> &mut StreamGroup {
        match group {
            StreamGroupKind::Local => &mut self.local,
            StreamGroupKind::Remote => &mut self.remote,
        }
    }

    fn group(&self, group: StreamGroupKind) -> &StreamGroup {
        match group {
            StreamGroupKind::Local => &self.local,
            StreamGroupKind::Remote => &self.remote,
        }
    }
}

/// One communication session
pub struct Call {
    id: CallId,
    phone_id: Uuid,
    config: Arc<CallConfig>,
    bus: EventBus,
    collaborators: Collaborators,
    this: Weak<Call>,
    state: Mutex<CallInner>,
}

impl Call {
    /// Build and initialize a call.
    ///
    /// With `auto_primary` (no call list attached) the call promotes itself
    /// before announcing `created`.
    pub(crate) fn create(
        phone_id: Uuid,
        config: Arc<CallConfig>,
        bus: EventBus,
        collaborators: Collaborators,
        session: Option<Arc<dyn SignalingSession>>,
        auto_primary: bool,
    ) -> Arc<Call> {
        let id = session
            .as_ref()
            .and_then(|session| session.stream_id_hint())
            .map(CallId::from)
            .unwrap_or_default();

        let make_group = |group: StreamGroupKind| {
            let factory = &collaborators.sinks;
            StreamGroup::new(StreamSinks::new(
                group,
                factory.create_sink(&id, group, MediaKind::Audio),
                factory.create_sink(&id, group, MediaKind::Video),
            ))
        };
        let local = make_group(StreamGroupKind::Local);
        let remote = make_group(StreamGroupKind::Remote);

        let call = Arc::new_cyclic(|this| Call {
            id: id.clone(),
            phone_id,
            config,
            bus,
            collaborators: collaborators.clone(),
            this: this.clone(),
            state: Mutex::new(CallInner {
                session,
                terminated: false,
                primary: false,
                in_transfer: false,
                answer_time: None,
                answered_at: None,
                remote_identity_override: None,
                mute_hint: false,
                local,
                remote,
                ticker: None,
            }),
        });

        call.initialize(auto_primary);
        call
    }

    fn initialize(&self, auto_primary: bool) {
        self.init_sinks();

        if self.is_ringing() {
            self.emit(CallEvent::RingingStarted);
        }

        if self.session().and_then(|session| session.transport()).is_some() {
            self.emit(CallEvent::PeerConnection);
        }

        if auto_primary {
            self.set_primary(true);
        }

        tracing::info!(call_id = %self.id, direction = ?self.direction(), "Call created");
        self.emit(CallEvent::Created);
    }

    /// Apply output device and muted flags to every sink, then announce them
    fn init_sinks(&self) {
        let preferred = match (self.has_session(), &self.collaborators.devices) {
            (true, Some(devices)) => devices.preferred_device(DeviceKind::AudioOutput),
            _ => None,
        };
        let use_audio_context = self.config.use_audio_context;

        let errors = {
            let mut inner = self.state.lock();
            let mut errors = Vec::new();
            for group in StreamGroupKind::ALL {
                let sinks = &mut inner.group_mut(group).sinks;
                if let Some(device) = &preferred {
                    errors.extend(sinks.set_output_device(device));
                }
                for kind in MediaKind::ALL {
                    // only remote audio plays through the sinks unless mixed elsewhere
                    let muted = use_audio_context
                        || !(group == StreamGroupKind::Remote && kind == MediaKind::Audio);
                    sinks.sink_mut(kind).set_muted(muted);
                }
            }
            errors
        };

        for error in errors {
            self.emit(CallEvent::Error { error });
        }
        for group in StreamGroupKind::ALL {
            for kind in MediaKind::ALL {
                self.emit(CallEvent::SinkCreated { group, kind });
            }
        }
    }

    /// Publish an event with primary fan-out
    pub(crate) fn emit(&self, event: CallEvent) {
        let primary = self.state.lock().primary;
        self.bus.dispatch(self.phone_id, &self.id, primary, event);
    }

    pub(crate) fn session(&self) -> Option<Arc<dyn SignalingSession>> {
        self.state.lock().session.clone()
    }

    /// Session still attached and the call not torn down
    pub(crate) fn is_alive(&self) -> bool {
        let inner = self.state.lock();
        inner.session.is_some() && !inner.terminated
    }

    pub fn id(&self) -> &CallId {
        &self.id
    }

    /// Identifier of the phone that owns this call
    pub fn phone_id(&self) -> Uuid {
        self.phone_id
    }

    pub fn config(&self) -> &CallConfig {
        &self.config
    }

    pub fn has_session(&self) -> bool {
        self.state.lock().session.is_some()
    }

    /// Whether a media transport is attached
    pub fn has_transport(&self) -> bool {
        self.session().and_then(|session| session.transport()).is_some()
    }

    pub fn is_primary(&self) -> bool {
        self.state.lock().primary
    }

    pub fn is_in_transfer(&self) -> bool {
        self.state.lock().in_transfer
    }

    pub fn is_terminated(&self) -> bool {
        self.state.lock().terminated
    }

    pub fn is_in_progress(&self) -> bool {
        self.session().is_some_and(|session| session.is_in_progress())
    }

    pub fn is_established(&self) -> bool {
        self.session().is_some_and(|session| session.is_established())
    }

    pub fn is_ended(&self) -> bool {
        self.session().is_some_and(|session| session.is_ended())
    }

    pub fn is_ringing(&self) -> bool {
        self.direction() == CallDirection::Terminating && !self.is_established()
    }

    pub fn direction(&self) -> CallDirection {
        match self.session().map(|session| session.direction()) {
            Some(SessionDirection::Incoming) => CallDirection::Terminating,
            _ => CallDirection::Originating,
        }
    }

    pub fn status(&self) -> CallStatus {
        if self.is_terminated() {
            return CallStatus::Terminated;
        }
        let Some(session) = self.session() else {
            return CallStatus::Idle;
        };
        if session.is_established() {
            if session.hold_status().is_held() {
                CallStatus::Held
            } else {
                CallStatus::Active
            }
        } else if session.direction() == SessionDirection::Incoming {
            CallStatus::Ringing
        } else {
            CallStatus::Negotiating
        }
    }

    pub fn is_on_hold(&self) -> bool {
        self.hold_status().is_held()
    }

    /// Local and remote hold flags
    pub fn hold_status(&self) -> HoldStatus {
        self.session()
            .map(|session| session.hold_status())
            .unwrap_or_default()
    }

    pub fn is_muted(&self) -> bool {
        self.mute_status().any()
    }

    /// Per-channel mute flags
    pub fn mute_status(&self) -> MuteOptions {
        self.session()
            .map(|session| session.mute_status())
            .unwrap_or(MuteOptions::NONE)
    }

    /// Wall-clock time of the first confirmation
    pub fn answer_time(&self) -> Option<DateTime<Utc>> {
        self.state.lock().answer_time
    }

    /// Local party as `"Display (user)"`
    pub fn local_identity(&self) -> Option<String> {
        self.local_identity_details().map(|identity| identity.formatted())
    }

    pub fn local_identity_details(&self) -> Option<Identity> {
        self.session().map(|session| session.local_identity())
    }

    /// Remote party as `"Display (user)"`
    pub fn remote_identity(&self) -> Option<String> {
        self.remote_identity_details().map(|identity| identity.formatted())
    }

    /// Remote party, including any identity advertised by a later UPDATE
    pub fn remote_identity_details(&self) -> Option<Identity> {
        let session = self.session()?;
        let overridden = self.state.lock().remote_identity_override.clone();
        Some(overridden.unwrap_or_else(|| session.remote_identity()))
    }

    /// Kinds currently present in a stream group
    pub fn track_kinds(&self, group: StreamGroupKind) -> KindFlags {
        self.state.lock().group(group).tracks().kinds()
    }

    /// Identifiers of the tracks currently synchronized into a stream group
    pub fn track_ids(&self, group: StreamGroupKind) -> Vec<String> {
        self.state
            .lock()
            .group(group)
            .tracks()
            .stream()
            .tracks()
            .iter()
            .map(|track| track.id())
            .collect()
    }

    /// Identifier of the stream shown by a group's sinks
    pub fn stream_id(&self, group: StreamGroupKind) -> String {
        self.state.lock().group(group).tracks().stream().id().to_string()
    }

    pub fn summary(&self) -> CallSummary {
        let direction = self.direction();
        let mute = self.mute_status();
        let (has_session, primary, in_transfer, terminated) = {
            let inner = self.state.lock();
            (inner.session.is_some(), inner.primary, inner.in_transfer, inner.terminated)
        };

        CallSummary {
            call_id: self.id.clone(),
            status: self.status(),
            has_session,
            progress: self.is_in_progress(),
            established: self.is_established(),
            ended: terminated || self.is_ended(),
            held: self.is_on_hold(),
            is_audio_muted: mute.audio,
            is_video_muted: mute.video,
            primary,
            in_transfer,
            direction,
            terminating: direction == CallDirection::Terminating,
            originating: direction == CallDirection::Originating,
            local_identity: self.local_identity(),
            remote_identity: self.remote_identity(),
        }
    }
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.state.lock();
        f.debug_struct("Call")
            .field("id", &self.id)
            .field("has_session", &inner.session.is_some())
            .field("primary", &inner.primary)
            .field("in_transfer", &inner.in_transfer)
            .field("terminated", &inner.terminated)
            .finish()
    }
}
