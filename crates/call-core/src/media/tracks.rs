//! Track synchronization
//!
//! The transport is the source of truth for which tracks exist. A [`TrackSet`]
//! remembers what was last seen for one stream group; each synchronization
//! diffs the transport's current tracks against it by identifier and reports
//! what appeared and what vanished. Running it twice against an unchanged
//! transport reports nothing the second time.

use std::collections::HashSet;

use super::{KindFlags, MediaStream, TrackParameters, TrackRef};

/// Result of one synchronization pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackDiff {
    /// Tracks that vanished from the transport, in stream order
    pub removed: Vec<TrackParameters>,
    /// Tracks that appeared on the transport, in transport order
    pub added: Vec<TrackParameters>,
}

impl TrackDiff {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty()
    }

    /// Kinds with at least one added or removed track
    pub fn kinds(&self) -> KindFlags {
        let mut kinds = KindFlags::default();
        for track in self.removed.iter().chain(&self.added) {
            kinds.set(track.kind, true);
        }
        kinds
    }
}

/// Last synchronized tracks of one stream group
#[derive(Debug, Default)]
pub struct TrackSet {
    stream: MediaStream,
    kinds: KindFlags,
}

impl TrackSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stream(&self) -> &MediaStream {
        &self.stream
    }

    /// Which kinds currently have a track
    pub fn kinds(&self) -> KindFlags {
        self.kinds
    }

    /// Diff `current` against the stored set and apply the difference
    pub fn synchronize(&mut self, current: &[TrackRef]) -> TrackDiff {
        let current_ids: HashSet<String> = current.iter().map(|track| track.id()).collect();
        let mut diff = TrackDiff::default();

        let stream_snapshot = self.stream.clone();
        self.stream.retain_tracks(|track| {
            if current_ids.contains(&track.id()) {
                true
            } else {
                diff.removed.push(TrackParameters::describe(&stream_snapshot, track));
                false
            }
        });

        for track in current {
            if !self.stream.contains(&track.id()) {
                self.stream.add_track(track.clone());
                diff.added.push(TrackParameters::describe(&self.stream, track));
            }
        }

        self.refresh_kinds();
        diff
    }

    /// Drop every track, returning them so the caller can stop them
    pub fn clear(&mut self) -> Vec<TrackRef> {
        let tracks = self.stream.take_tracks();
        self.refresh_kinds();
        tracks
    }

    fn refresh_kinds(&mut self) {
        let mut kinds = KindFlags::default();
        for track in self.stream.tracks() {
            kinds.set(track.kind(), true);
        }
        self.kinds = kinds;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaKind;
    use crate::memory::MemoryTrack;

    fn ids(params: &[TrackParameters]) -> Vec<&str> {
        params.iter().map(|p| p.track_id.as_str()).collect()
    }

    #[test]
    fn test_add_then_remove() {
        let t1 = MemoryTrack::audio("t1");
        let t2 = MemoryTrack::video("t2");
        let mut set = TrackSet::new();

        let diff = set.synchronize(&[t1.clone(), t2.clone()]);
        assert_eq!(ids(&diff.added), vec!["t1", "t2"]);
        assert!(diff.removed.is_empty());
        assert_eq!(set.kinds(), KindFlags { audio: true, video: true });

        let diff = set.synchronize(&[t2.clone()]);
        assert!(diff.added.is_empty());
        assert_eq!(ids(&diff.removed), vec!["t1"]);
        assert_eq!(diff.removed[0].kind, MediaKind::Audio);
        assert_eq!(set.kinds(), KindFlags { audio: false, video: true });
    }

    #[test]
    fn test_diff_kinds() {
        let mut set = TrackSet::new();
        set.synchronize(&[MemoryTrack::audio("a1"), MemoryTrack::video("v1")]);

        let swap = set.synchronize(&[MemoryTrack::audio("a2"), MemoryTrack::video("v1")]);
        assert_eq!(swap.kinds(), KindFlags { audio: true, video: false });
        assert_eq!(TrackDiff::default().kinds(), KindFlags::default());
    }

    #[test]
    fn test_unchanged_transport_is_idempotent() {
        let tracks = vec![MemoryTrack::audio("a"), MemoryTrack::video("v")];
        let mut set = TrackSet::new();

        assert_eq!(set.synchronize(&tracks).added.len(), 2);
        assert!(set.synchronize(&tracks).is_empty());
        assert!(set.synchronize(&tracks).is_empty());
    }

    #[test]
    fn test_duplicate_ids_added_once() {
        let track = MemoryTrack::audio("dup");
        let mut set = TrackSet::new();

        let diff = set.synchronize(&[track.clone(), track.clone()]);
        assert_eq!(ids(&diff.added), vec!["dup"]);
        assert_eq!(set.stream().tracks().len(), 1);
    }

    #[test]
    fn test_readd_after_remove() {
        let track = MemoryTrack::audio("t1");
        let mut set = TrackSet::new();

        set.synchronize(&[track.clone()]);
        set.synchronize(&[]);
        let diff = set.synchronize(&[track.clone()]);
        assert_eq!(ids(&diff.added), vec!["t1"]);
    }

    #[test]
    fn test_parameters_carry_stream_and_label() {
        let track = MemoryTrack::with_label("mic-1", MediaKind::Audio, "USB Microphone");
        let mut set = TrackSet::new();

        let diff = set.synchronize(&[track]);
        let params = &diff.added[0];
        assert_eq!(params.stream_id, set.stream().id());
        assert_eq!(params.label, "USB Microphone");
        assert!(params.enabled);
    }

    #[test]
    fn test_clear() {
        let mut set = TrackSet::new();
        set.synchronize(&[MemoryTrack::audio("a")]);

        let tracks = set.clear();
        assert_eq!(tracks.len(), 1);
        assert!(set.stream().is_empty());
        assert_eq!(set.kinds(), KindFlags::default());
    }
}
