//! Signaling session and media transport boundary
//!
//! Signaling (message construction, transactions, registration) lives outside
//! this crate. A call drives its session through [`SignalingSession`] and is
//! driven by it through [`SessionEvent`]s, which the host feeds to
//! [`Call::handle_session_event`](crate::Call::handle_session_event) or pumps
//! from a channel with [`Call::attach_session_events`](crate::Call::attach_session_events).
//!
//! Session operations are requests: their outcome arrives later as events
//! (`hold`, `unhold`, `ended`, ...). None of them report errors directly.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CallResult;
use crate::media::{MediaKind, TrackRef};

/// Headers advertised when accepting a session
pub const ALLOW_HEADER: &str = "Allow: INVITE, ACK, BYE, CANCEL, OPTIONS, MESSAGE, INFO, UPDATE, REFER, NOTIFY";

/// Direction of the signaling session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionDirection {
    Incoming,
    Outgoing,
}

/// Who caused a session event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Originator {
    Local,
    Remote,
    System,
}

/// A party of the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub display_name: Option<String>,
    /// User part of the URI
    pub user: String,
    /// Full URI (address of record)
    pub uri: String,
}

impl Identity {
    pub fn new(display_name: Option<&str>, user: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            display_name: display_name.map(str::to_string),
            user: user.into(),
            uri: uri.into(),
        }
    }

    /// `"Display (user)"` when the display name adds information, otherwise the user
    pub fn formatted(&self) -> String {
        match self.display_name.as_deref() {
            Some(name) if !name.is_empty() && name != self.user => format!("{} ({})", name, self.user),
            _ => self.user.clone(),
        }
    }
}

/// Local/remote hold flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldStatus {
    pub local: bool,
    pub remote: bool,
}

impl HoldStatus {
    pub fn is_held(&self) -> bool {
        self.local || self.remote
    }
}

/// Per-channel mute selection. Used both as a request and as a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuteOptions {
    pub audio: bool,
    pub video: bool,
}

impl MuteOptions {
    /// Both channels
    pub const ALL: MuteOptions = MuteOptions { audio: true, video: true };
    /// Neither channel
    pub const NONE: MuteOptions = MuteOptions { audio: false, video: false };

    pub fn audio_only() -> Self {
        Self { audio: true, video: false }
    }

    pub fn video_only() -> Self {
        Self { audio: false, video: true }
    }

    pub fn get(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Audio => self.audio,
            MediaKind::Video => self.video,
        }
    }

    pub fn any(&self) -> bool {
        self.audio || self.video
    }
}

impl Default for MuteOptions {
    fn default() -> Self {
        Self::ALL
    }
}

/// Options for accepting a session
#[derive(Clone, Default)]
pub struct AnswerOptions {
    /// Local tracks to send
    pub media: Vec<TrackRef>,
    /// Raw header lines added to the accept response
    pub extra_headers: Vec<String>,
}

impl std::fmt::Debug for AnswerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tracks: Vec<String> = self.media.iter().map(|track| track.id()).collect();
        f.debug_struct("AnswerOptions")
            .field("media", &tracks)
            .field("extra_headers", &self.extra_headers)
            .finish()
    }
}

/// Options for sending DTMF
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtmfOptions {
    /// Tone duration in milliseconds
    pub duration_ms: Option<u32>,
    /// Gap between tones in milliseconds
    pub inter_tone_gap_ms: Option<u32>,
}

/// Notifications raised by the session and its transport
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Provisional response received or sent
    Progress { status_code: Option<u16> },
    /// Local media attached, offer/answer under way
    Connecting,
    /// Session confirmed (ACK exchanged)
    Confirmed,
    Hold { originator: Originator },
    Unhold { originator: Originator },
    Muted(MuteOptions),
    Unmuted(MuteOptions),
    NewDtmf { signal: String, originator: Originator },
    NewInfo { content_type: String, body: String, originator: Originator },
    /// In-dialog UPDATE; `from` carries the identity advertised by the peer
    Update { from: Option<Identity> },
    Ended { originator: Originator, cause: String },
    Failed { originator: Originator, cause: String },
    /// A media transport was attached; it is now reachable through [`SignalingSession::transport`]
    PeerConnection,
    /// The transport reported a new track
    TrackAdded,
    /// The transport reported a removed track
    TrackRemoved,
}

/// Signaling session of one call
pub trait SignalingSession: Send + Sync {
    /// Identifier the host wants the call to adopt
    fn stream_id_hint(&self) -> Option<String> {
        None
    }

    fn direction(&self) -> SessionDirection;

    fn local_identity(&self) -> Identity;

    fn remote_identity(&self) -> Identity;

    fn is_in_progress(&self) -> bool;

    fn is_established(&self) -> bool;

    fn is_ended(&self) -> bool;

    fn hold_status(&self) -> HoldStatus;

    fn mute_status(&self) -> MuteOptions;

    /// Current media transport, once attached
    fn transport(&self) -> Option<Arc<dyn MediaTransport>>;

    fn answer(&self, options: AnswerOptions);

    fn terminate(&self);

    fn hold(&self);

    fn unhold(&self);

    fn mute(&self, options: MuteOptions);

    fn unmute(&self, options: MuteOptions);

    /// Send a REFER to `target`, replacing `replaces` when given
    fn refer(&self, target: &str, replaces: Option<Arc<dyn SignalingSession>>);

    fn send_dtmf(&self, signal: &str, options: &DtmfOptions);

    fn renegotiate(&self);
}

/// An outbound RTP sender
#[async_trait]
pub trait RtpSender: Send + Sync {
    fn id(&self) -> String;

    fn track(&self) -> Option<TrackRef>;

    async fn replace_track(&self, track: TrackRef) -> CallResult<()>;
}

/// Media transport of one session
pub trait MediaTransport: Send + Sync {
    fn senders(&self) -> Vec<Arc<dyn RtpSender>>;

    /// Tracks of every receiver that currently has one
    fn receiver_tracks(&self) -> Vec<TrackRef>;

    fn add_track(&self, track: TrackRef) -> CallResult<()>;

    fn remove_sender(&self, sender_id: &str) -> CallResult<()>;

    /// Signaling or connection state is closed
    fn is_closed(&self) -> bool;

    /// Tracks of every sender that currently has one
    fn sender_tracks(&self) -> Vec<TrackRef> {
        self.senders().iter().filter_map(|sender| sender.track()).collect()
    }
}
