//! Media primitives shared by the synchronizer and the sink manager
//!
//! A call owns two stream groups, `local` and `remote`. Each group keeps a
//! [`MediaStream`] mirroring the transport's current tracks (see [`tracks`])
//! and one rendering sink per media kind (see [`sinks`]).

pub mod sinks;
pub mod tracks;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use sinks::{HeadlessSink, MediaSink, SinkState, StreamSinks};
pub use tracks::{TrackDiff, TrackSet};

/// Kind of a media track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// All kinds, in the order sinks are visited
    pub const ALL: [MediaKind; 2] = [MediaKind::Audio, MediaKind::Video];

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of the call a stream group represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamGroupKind {
    /// Outbound media captured locally
    Local,
    /// Inbound media from the remote party
    Remote,
}

impl StreamGroupKind {
    /// All groups, in the order they are synchronized and connected
    pub const ALL: [StreamGroupKind; 2] = [StreamGroupKind::Remote, StreamGroupKind::Local];

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamGroupKind::Local => "local",
            StreamGroupKind::Remote => "remote",
        }
    }
}

impl fmt::Display for StreamGroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A media track exposed by the transport or the device provider
pub trait MediaTrack: Send + Sync {
    /// Identifier, unique per transport
    fn id(&self) -> String;

    fn kind(&self) -> MediaKind;

    /// Human readable label (usually the capture device name)
    fn label(&self) -> String;

    fn is_enabled(&self) -> bool;

    fn set_enabled(&self, enabled: bool);

    /// Stop the track permanently
    fn stop(&self);
}

/// Shared handle to a media track
pub type TrackRef = Arc<dyn MediaTrack>;

/// Ordered collection of tracks with a stable identity
#[derive(Clone)]
pub struct MediaStream {
    id: String,
    tracks: Vec<TrackRef>,
}

impl MediaStream {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tracks: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[TrackRef] {
        &self.tracks
    }

    /// First track of the given kind
    pub fn track_of_kind(&self, kind: MediaKind) -> Option<&TrackRef> {
        self.tracks.iter().find(|track| track.kind() == kind)
    }

    pub fn contains(&self, track_id: &str) -> bool {
        self.tracks.iter().any(|track| track.id() == track_id)
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub(crate) fn add_track(&mut self, track: TrackRef) {
        self.tracks.push(track);
    }

    pub(crate) fn take_tracks(&mut self) -> Vec<TrackRef> {
        std::mem::take(&mut self.tracks)
    }

    pub(crate) fn retain_tracks(&mut self, mut keep: impl FnMut(&TrackRef) -> bool) {
        self.tracks.retain(|track| keep(track));
    }
}

impl Default for MediaStream {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<String> = self.tracks.iter().map(|track| track.id()).collect();
        f.debug_struct("MediaStream")
            .field("id", &self.id)
            .field("tracks", &ids)
            .finish()
    }
}

/// Parameters describing a track in add/remove notifications
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackParameters {
    /// Stream the track belongs to
    pub stream_id: String,
    pub track_id: String,
    pub kind: MediaKind,
    pub label: String,
    pub enabled: bool,
}

impl TrackParameters {
    pub fn describe(stream: &MediaStream, track: &TrackRef) -> Self {
        Self {
            stream_id: stream.id().to_string(),
            track_id: track.id(),
            kind: track.kind(),
            label: track.label(),
            enabled: track.is_enabled(),
        }
    }
}

/// Presence flag per media kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindFlags {
    pub audio: bool,
    pub video: bool,
}

impl KindFlags {
    pub fn get(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Audio => self.audio,
            MediaKind::Video => self.video,
        }
    }

    pub fn set(&mut self, kind: MediaKind, present: bool) {
        match kind {
            MediaKind::Audio => self.audio = present,
            MediaKind::Video => self.video = present,
        }
    }
}

/// A stream group: synchronized tracks plus one sink per kind
pub struct StreamGroup {
    pub(crate) tracks: TrackSet,
    pub(crate) sinks: StreamSinks,
}

impl StreamGroup {
    pub fn new(sinks: StreamSinks) -> Self {
        Self {
            tracks: TrackSet::new(),
            sinks,
        }
    }

    pub fn kind(&self) -> StreamGroupKind {
        self.sinks.group()
    }

    pub fn tracks(&self) -> &TrackSet {
        &self.tracks
    }

    pub fn sinks(&self) -> &StreamSinks {
        &self.sinks
    }

    /// Re-point every sink at the group's stream, or detach it when its kind is absent.
    ///
    /// `changed` names the kinds whose tracks changed since the last refresh.
    pub(crate) fn refresh_sinks(&mut self, changed: KindFlags) {
        self.sinks.refresh(&self.tracks, changed);
    }
}
