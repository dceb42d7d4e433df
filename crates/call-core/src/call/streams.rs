//! Stream group synchronization and sink connection

use crate::events::CallEvent;
use crate::media::{KindFlags, MediaKind, StreamGroupKind, TrackRef};
use crate::session::MediaTransport;

use super::Call;

impl Call {
    /// Re-read the transport's tracks into both stream groups and refresh the sinks.
    ///
    /// Outbound tracks are enabled according to the current mute status
    /// before they are diffed. Calls without a transport only refresh sinks.
    pub fn sync_streams(&self) {
        let transport = self.session().and_then(|session| session.transport());

        let current = transport.map(|transport| {
            let mute = self.mute_status();
            let local: Vec<TrackRef> = transport
                .sender_tracks()
                .into_iter()
                .inspect(|track| track.set_enabled(!mute.get(track.kind())))
                .collect();
            (transport.receiver_tracks(), local)
        });

        let mut events = Vec::new();
        {
            let mut inner = self.state.lock();
            for group in StreamGroupKind::ALL {
                let stream_group = inner.group_mut(group);
                let mut changed = KindFlags::default();
                if let Some((remote, local)) = &current {
                    let tracks = match group {
                        StreamGroupKind::Remote => remote,
                        StreamGroupKind::Local => local,
                    };
                    let diff = stream_group.tracks.synchronize(tracks);
                    if !diff.is_empty() {
                        tracing::debug!(
                            call_id = %self.id,
                            group = %group,
                            added = diff.added.len(),
                            removed = diff.removed.len(),
                            "Stream group synchronized"
                        );
                    }
                    changed = diff.kinds();
                    events.extend(
                        diff.removed
                            .into_iter()
                            .map(|track| CallEvent::TrackRemoved { group, track }),
                    );
                    events.extend(
                        diff.added
                            .into_iter()
                            .map(|track| CallEvent::TrackAdded { group, track }),
                    );
                }
                stream_group.refresh_sinks(changed);
            }
        }

        for event in events {
            self.emit(event);
        }
    }

    /// Start rendering; only called on promotion
    pub(crate) fn connect_streams(&self) {
        for group in StreamGroupKind::ALL {
            self.emit(CallEvent::StreamConnected { group });
        }

        let Some(session) = self.session() else {
            return;
        };
        if let Some(transport) = session.transport() {
            set_senders_enabled(transport.as_ref(), true);
        }

        let connected = self.with_groups(|group, sinks| (group, sinks.connect()));
        for (group, kinds) in connected {
            for kind in kinds {
                self.emit(CallEvent::SinkConnected { group, kind });
            }
        }
    }

    /// Stop rendering; only called on demotion
    pub(crate) fn disconnect_streams(&self) {
        for group in StreamGroupKind::ALL {
            self.emit(CallEvent::StreamDisconnected { group });
        }

        let Some(session) = self.session() else {
            return;
        };
        if let Some(transport) = session.transport() {
            set_senders_enabled(transport.as_ref(), false);
        }

        let disconnected = self.with_groups(|group, sinks| (group, sinks.disconnect()));
        for (group, kinds) in disconnected {
            for kind in kinds {
                self.emit(CallEvent::SinkDisconnected { group, kind });
            }
        }
    }

    /// Stop outbound capture and detach every sink
    pub(crate) fn destroy_streams(&self) {
        self.emit(CallEvent::RingingStopped);

        if let Some(transport) = self.session().and_then(|session| session.transport()) {
            for track in transport.sender_tracks() {
                track.stop();
            }
        }

        let mut inner = self.state.lock();
        for group in StreamGroupKind::ALL {
            let stream_group = inner.group_mut(group);
            stream_group.sinks.detach_all();
            stream_group.tracks.clear();
        }
    }

    fn with_groups<T>(
        &self,
        mut f: impl FnMut(StreamGroupKind, &mut crate::media::StreamSinks) -> T,
    ) -> Vec<T> {
        let mut inner = self.state.lock();
        StreamGroupKind::ALL
            .into_iter()
            .map(|group| f(group, &mut inner.group_mut(group).sinks))
            .collect()
    }

    /// Apply a volume to the remote sinks
    pub(crate) fn set_remote_volume(&self, volume: f64, kind: Option<MediaKind>) {
        self.state
            .lock()
            .group_mut(StreamGroupKind::Remote)
            .sinks
            .set_volume(volume, kind);
    }
}

fn set_senders_enabled(transport: &dyn MediaTransport, enabled: bool) {
    for track in transport.sender_tracks() {
        track.set_enabled(enabled);
    }
}
