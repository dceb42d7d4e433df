//! Rendering sinks
//!
//! Every stream group owns one sink per media kind. A sink renders at most one
//! stream at a time. Sinks only play while their call is primary: the call
//! connects them on promotion and disconnects them on demotion, which keeps
//! concurrent calls from rendering over each other.

use std::sync::Arc;

use parking_lot::Mutex;

use super::{KindFlags, MediaKind, MediaStream, StreamGroupKind, TrackSet};
use crate::error::{CallError, CallResult};
use crate::providers::DeviceInfo;

/// A rendering target for one media kind (an audio or video output)
pub trait MediaSink: Send {
    /// Identifier of the attached stream, if any
    fn source_id(&self) -> Option<String>;

    /// Attach a stream, or detach with `None`
    fn set_source(&mut self, stream: Option<&MediaStream>);

    fn is_paused(&self) -> bool;

    /// Start playback. Sinks holding a placeholder track may never start.
    fn play(&mut self) -> CallResult<()>;

    fn pause(&mut self);

    fn set_muted(&mut self, muted: bool);

    /// Volume in `[0, 1]`
    fn set_volume(&mut self, volume: f64);

    /// Route output to a specific device
    fn set_output_device(&mut self, device: &DeviceInfo) -> CallResult<()>;
}

/// The audio and video sinks of one stream group
pub struct StreamSinks {
    group: StreamGroupKind,
    audio: Box<dyn MediaSink>,
    video: Box<dyn MediaSink>,
}

impl StreamSinks {
    pub fn new(group: StreamGroupKind, audio: Box<dyn MediaSink>, video: Box<dyn MediaSink>) -> Self {
        Self { group, audio, video }
    }

    pub fn group(&self) -> StreamGroupKind {
        self.group
    }

    pub fn sink(&self, kind: MediaKind) -> &dyn MediaSink {
        match kind {
            MediaKind::Audio => self.audio.as_ref(),
            MediaKind::Video => self.video.as_ref(),
        }
    }

    pub(crate) fn sink_mut(&mut self, kind: MediaKind) -> &mut dyn MediaSink {
        match kind {
            MediaKind::Audio => self.audio.as_mut(),
            MediaKind::Video => self.video.as_mut(),
        }
    }

    /// Attach the group's stream to each sink whose kind is present, detach the rest.
    ///
    /// Sinks receive a snapshot of the stream, so a sink already showing the
    /// group's stream is re-attached only when `changed` marks its kind.
    pub fn refresh(&mut self, tracks: &TrackSet, changed: KindFlags) {
        let stream = tracks.stream();
        let kinds = tracks.kinds();
        for kind in MediaKind::ALL {
            let sink = self.sink_mut(kind);
            if kinds.get(kind) {
                if changed.get(kind) || sink.source_id().as_deref() != Some(stream.id()) {
                    sink.set_source(Some(stream));
                }
            } else if sink.source_id().is_some() {
                sink.set_source(None);
            }
        }
    }

    /// Start every paused sink; returns the kinds visited
    pub fn connect(&mut self) -> Vec<MediaKind> {
        let group = self.group;
        MediaKind::ALL
            .into_iter()
            .inspect(|&kind| {
                let sink = self.sink_mut(kind);
                if sink.is_paused() {
                    if let Err(e) = sink.play() {
                        // placeholder tracks never produce data, playback interruption is expected
                        tracing::debug!(group = %group, kind = %kind, error = %e, "Sink playback did not start");
                    }
                }
            })
            .collect()
    }

    /// Pause every playing sink; returns the kinds visited
    pub fn disconnect(&mut self) -> Vec<MediaKind> {
        MediaKind::ALL
            .into_iter()
            .inspect(|&kind| {
                let sink = self.sink_mut(kind);
                if !sink.is_paused() {
                    sink.pause();
                }
            })
            .collect()
    }

    /// Detach every sink
    pub fn detach_all(&mut self) {
        for kind in MediaKind::ALL {
            let sink = self.sink_mut(kind);
            if !sink.is_paused() {
                sink.pause();
            }
            sink.set_source(None);
        }
    }

    pub fn set_volume(&mut self, volume: f64, kind: Option<MediaKind>) {
        match kind {
            Some(kind) => self.sink_mut(kind).set_volume(volume),
            None => {
                for kind in MediaKind::ALL {
                    self.sink_mut(kind).set_volume(volume);
                }
            }
        }
    }

    /// Route every sink to `device`, collecting the rejections
    pub fn set_output_device(&mut self, device: &DeviceInfo) -> Vec<CallError> {
        let group = self.group;
        MediaKind::ALL
            .into_iter()
            .filter_map(|kind| {
                self.sink_mut(kind).set_output_device(device).err().map(|e| {
                    tracing::warn!(group = %group, kind = %kind, device = %device.id, error = %e, "Output device rejected, keeping default");
                    e
                })
            })
            .collect()
    }
}

/// Observable state of a [`HeadlessSink`]
#[derive(Debug, Clone, PartialEq)]
pub struct SinkState {
    pub source_id: Option<String>,
    pub paused: bool,
    pub muted: bool,
    pub volume: f64,
    pub output_device: Option<String>,
    /// Tracks of the attached stream at the time it was attached
    pub track_ids: Vec<String>,
    /// Number of times a stream was (re)attached
    pub attach_count: usize,
}

impl Default for SinkState {
    fn default() -> Self {
        Self {
            source_id: None,
            paused: true,
            muted: false,
            volume: 1.0,
            output_device: None,
            track_ids: Vec::new(),
            attach_count: 0,
        }
    }
}

/// Sink that renders nothing and only tracks its state.
///
/// Used when no renderer is attached; the state handle stays readable after the
/// sink has been handed to a call.
#[derive(Debug, Clone, Default)]
pub struct HeadlessSink {
    state: Arc<Mutex<SinkState>>,
    rejected_devices: Arc<Mutex<Vec<String>>>,
}

impl HeadlessSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle to the sink's state
    pub fn state(&self) -> Arc<Mutex<SinkState>> {
        Arc::clone(&self.state)
    }

    pub fn snapshot(&self) -> SinkState {
        self.state.lock().clone()
    }

    /// Make `set_output_device` fail for the given device id
    pub fn reject_device(&self, device_id: impl Into<String>) {
        self.rejected_devices.lock().push(device_id.into());
    }
}

impl MediaSink for HeadlessSink {
    fn source_id(&self) -> Option<String> {
        self.state.lock().source_id.clone()
    }

    fn set_source(&mut self, stream: Option<&MediaStream>) {
        let mut state = self.state.lock();
        state.source_id = stream.map(|s| s.id().to_string());
        state.track_ids = stream
            .map(|s| s.tracks().iter().map(|track| track.id()).collect())
            .unwrap_or_default();
        if stream.is_some() {
            state.attach_count += 1;
        }
    }

    fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    fn play(&mut self) -> CallResult<()> {
        self.state.lock().paused = false;
        Ok(())
    }

    fn pause(&mut self) {
        self.state.lock().paused = true;
    }

    fn set_muted(&mut self, muted: bool) {
        self.state.lock().muted = muted;
    }

    fn set_volume(&mut self, volume: f64) {
        self.state.lock().volume = volume;
    }

    fn set_output_device(&mut self, device: &DeviceInfo) -> CallResult<()> {
        if self.rejected_devices.lock().contains(&device.id) {
            return Err(CallError::sink_failed(
                "output",
                format!("device {} not available", device.id),
            ));
        }
        self.state.lock().output_device = Some(device.id.clone());
        Ok(())
    }
}
