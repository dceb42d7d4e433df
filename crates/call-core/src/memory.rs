//! In-memory implementations of every boundary trait
//!
//! These drive a [`Call`](crate::Call) without any real signaling stack or
//! media devices: sessions record the operations they were asked to perform,
//! transports hold plain track lists, and listeners collect notification
//! names. Useful for tests and for hosts that run calls headless.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::call::CallId;
use crate::error::{CallError, CallResult};
use crate::events::{Channel, EventBus, Notification};
use crate::media::{HeadlessSink, MediaKind, MediaSink, MediaTrack, StreamGroupKind, TrackRef};
use crate::providers::{
    DeviceInfo, DeviceKind, DeviceProvider, SinkFactory, TransferTarget, TransferTargetSource,
    VolumeChannel, VolumeOptions, VolumeProvider,
};
use crate::session::{
    AnswerOptions, DtmfOptions, HoldStatus, Identity, MediaTransport, MuteOptions, Originator,
    RtpSender, SessionDirection, SessionEvent, SignalingSession,
};

/// A track that carries no media
#[derive(Debug)]
pub struct MemoryTrack {
    id: String,
    kind: MediaKind,
    label: String,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

impl MemoryTrack {
    pub fn new(id: impl Into<String>, kind: MediaKind) -> Arc<Self> {
        Self::labelled(id, kind, "")
    }

    pub fn labelled(id: impl Into<String>, kind: MediaKind, label: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            kind,
            label: label.into(),
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn audio(id: impl Into<String>) -> TrackRef {
        Self::new(id, MediaKind::Audio)
    }

    pub fn video(id: impl Into<String>) -> TrackRef {
        Self::new(id, MediaKind::Video)
    }

    pub fn with_label(id: impl Into<String>, kind: MediaKind, label: impl Into<String>) -> TrackRef {
        Self::labelled(id, kind, label)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl MediaTrack for MemoryTrack {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn label(&self) -> String {
        self.label.clone()
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// Outbound sender of a [`MemoryTransport`]
pub struct MemorySender {
    id: String,
    track: Mutex<Option<TrackRef>>,
    reject_replace: AtomicBool,
    gated: AtomicBool,
    gate: Notify,
}

impl MemorySender {
    fn new(track: TrackRef) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            track: Mutex::new(Some(track)),
            reject_replace: AtomicBool::new(false),
            gated: AtomicBool::new(false),
            gate: Notify::new(),
        }
    }

    /// Make the next track replacements fail
    pub fn reject_replace(&self, reject: bool) {
        self.reject_replace.store(reject, Ordering::SeqCst);
    }

    /// Make track replacements wait for [`MemorySender::release`]
    pub fn gate_replace(&self) {
        self.gated.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.gate.notify_one();
    }
}

#[async_trait]
impl RtpSender for MemorySender {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn track(&self) -> Option<TrackRef> {
        self.track.lock().clone()
    }

    async fn replace_track(&self, track: TrackRef) -> CallResult<()> {
        if self.gated.load(Ordering::SeqCst) {
            self.gate.notified().await;
        }
        if self.reject_replace.load(Ordering::SeqCst) {
            return Err(CallError::transport_failed(format!(
                "sender {} refused track {}",
                self.id,
                track.id()
            )));
        }
        *self.track.lock() = Some(track);
        Ok(())
    }
}

/// A media transport holding plain track lists
#[derive(Default)]
pub struct MemoryTransport {
    senders: Mutex<Vec<Arc<MemorySender>>>,
    receivers: Mutex<Vec<TrackRef>>,
    closed: AtomicBool,
}

impl MemoryTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add an outbound sender carrying `track`
    pub fn add_sender(&self, track: TrackRef) -> Arc<MemorySender> {
        let sender = Arc::new(MemorySender::new(track));
        self.senders.lock().push(Arc::clone(&sender));
        sender
    }

    /// Simulate a track arriving from the remote party
    pub fn add_receiver_track(&self, track: TrackRef) {
        self.receivers.lock().push(track);
    }

    pub fn remove_receiver_track(&self, track_id: &str) {
        self.receivers.lock().retain(|track| track.id() != track_id);
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn sender_count(&self) -> usize {
        self.senders.lock().len()
    }
}

impl MediaTransport for MemoryTransport {
    fn senders(&self) -> Vec<Arc<dyn RtpSender>> {
        self.senders
            .lock()
            .iter()
            .map(|sender| Arc::clone(sender) as Arc<dyn RtpSender>)
            .collect()
    }

    fn receiver_tracks(&self) -> Vec<TrackRef> {
        self.receivers.lock().clone()
    }

    fn add_track(&self, track: TrackRef) -> CallResult<()> {
        if self.is_closed() {
            return Err(CallError::TransportClosed);
        }
        self.add_sender(track);
        Ok(())
    }

    fn remove_sender(&self, sender_id: &str) -> CallResult<()> {
        if self.is_closed() {
            return Err(CallError::TransportClosed);
        }
        let mut senders = self.senders.lock();
        let before = senders.len();
        senders.retain(|sender| sender.id != sender_id);
        if senders.len() == before {
            return Err(CallError::transport_failed(format!("unknown sender {}", sender_id)));
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// An operation requested from a [`MemorySession`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOp {
    Answer { tracks: Vec<String>, headers: Vec<String> },
    Terminate,
    Hold,
    Unhold,
    Mute(MuteOptions),
    Unmute(MuteOptions),
    Refer { target: String, replaces: bool },
    SendDtmf { signal: String },
    Renegotiate,
}

#[derive(Debug, Default)]
struct SessionFlags {
    in_progress: bool,
    established: bool,
    ended: bool,
    hold: HoldStatus,
    mute: MuteOptions,
}

/// Signaling session that records requested operations.
///
/// Hold and mute requests take effect immediately on the reported status;
/// everything else is only recorded. Notifications are produced by the
/// helpers (`confirm`, `end`, ...) and fed to the call by the test.
pub struct MemorySession {
    stream_id: Option<String>,
    direction: SessionDirection,
    local: Identity,
    remote: Identity,
    flags: Mutex<SessionFlags>,
    transport: Mutex<Option<Arc<MemoryTransport>>>,
    ops: Mutex<Vec<SessionOp>>,
}

impl MemorySession {
    fn new(direction: SessionDirection, remote_user: &str) -> Self {
        Self {
            stream_id: None,
            direction,
            local: Identity::new(Some("Local"), "1000", "sip:1000@example.com"),
            remote: Identity::new(None, remote_user, format!("sip:{}@example.com", remote_user)),
            flags: Mutex::new(SessionFlags {
                in_progress: true,
                mute: MuteOptions::NONE,
                ..SessionFlags::default()
            }),
            transport: Mutex::new(None),
            ops: Mutex::new(Vec::new()),
        }
    }

    /// Session received from `remote_user`
    pub fn incoming(remote_user: &str) -> Self {
        Self::new(SessionDirection::Incoming, remote_user)
    }

    /// Session placed to `remote_user`
    pub fn outgoing(remote_user: &str) -> Self {
        Self::new(SessionDirection::Outgoing, remote_user)
    }

    pub fn with_stream_id(mut self, stream_id: impl Into<String>) -> Self {
        self.stream_id = Some(stream_id.into());
        self
    }

    pub fn with_remote(mut self, remote: Identity) -> Self {
        self.remote = remote;
        self
    }

    pub fn with_transport(self, transport: Arc<MemoryTransport>) -> Self {
        *self.transport.lock() = Some(transport);
        self
    }

    /// Attach a transport and return the matching notification
    pub fn attach_transport(&self, transport: Arc<MemoryTransport>) -> SessionEvent {
        *self.transport.lock() = Some(transport);
        SessionEvent::PeerConnection
    }

    pub fn set_established(&self, established: bool) {
        let mut flags = self.flags.lock();
        flags.established = established;
        flags.in_progress = !established;
    }

    pub fn set_hold(&self, hold: HoldStatus) {
        self.flags.lock().hold = hold;
    }

    pub fn set_mute(&self, mute: MuteOptions) {
        self.flags.lock().mute = mute;
    }

    /// Mark the session confirmed and return the notification
    pub fn confirm(&self) -> SessionEvent {
        self.set_established(true);
        SessionEvent::Confirmed
    }

    /// Mark the session ended and return the notification
    pub fn end(&self, originator: Originator) -> SessionEvent {
        let mut flags = self.flags.lock();
        flags.ended = true;
        flags.established = false;
        flags.in_progress = false;
        SessionEvent::Ended {
            originator,
            cause: "Terminated".to_string(),
        }
    }

    /// Operations requested so far
    pub fn ops(&self) -> Vec<SessionOp> {
        self.ops.lock().clone()
    }

    pub fn count(&self, matches: impl Fn(&SessionOp) -> bool) -> usize {
        self.ops.lock().iter().filter(|op| matches(op)).count()
    }

    fn record(&self, op: SessionOp) {
        self.ops.lock().push(op);
    }
}

impl SignalingSession for MemorySession {
    fn stream_id_hint(&self) -> Option<String> {
        self.stream_id.clone()
    }

    fn direction(&self) -> SessionDirection {
        self.direction
    }

    fn local_identity(&self) -> Identity {
        self.local.clone()
    }

    fn remote_identity(&self) -> Identity {
        self.remote.clone()
    }

    fn is_in_progress(&self) -> bool {
        self.flags.lock().in_progress
    }

    fn is_established(&self) -> bool {
        self.flags.lock().established
    }

    fn is_ended(&self) -> bool {
        self.flags.lock().ended
    }

    fn hold_status(&self) -> HoldStatus {
        self.flags.lock().hold
    }

    fn mute_status(&self) -> MuteOptions {
        self.flags.lock().mute
    }

    fn transport(&self) -> Option<Arc<dyn MediaTransport>> {
        self.transport
            .lock()
            .clone()
            .map(|transport| transport as Arc<dyn MediaTransport>)
    }

    fn answer(&self, options: AnswerOptions) {
        self.record(SessionOp::Answer {
            tracks: options.media.iter().map(|track| track.id()).collect(),
            headers: options.extra_headers,
        });
    }

    fn terminate(&self) {
        self.record(SessionOp::Terminate);
    }

    fn hold(&self) {
        self.flags.lock().hold.local = true;
        self.record(SessionOp::Hold);
    }

    fn unhold(&self) {
        self.flags.lock().hold.local = false;
        self.record(SessionOp::Unhold);
    }

    fn mute(&self, options: MuteOptions) {
        {
            let mut flags = self.flags.lock();
            flags.mute.audio |= options.audio;
            flags.mute.video |= options.video;
        }
        self.record(SessionOp::Mute(options));
    }

    fn unmute(&self, options: MuteOptions) {
        {
            let mut flags = self.flags.lock();
            flags.mute.audio &= !options.audio;
            flags.mute.video &= !options.video;
        }
        self.record(SessionOp::Unmute(options));
    }

    fn refer(&self, target: &str, replaces: Option<Arc<dyn SignalingSession>>) {
        self.record(SessionOp::Refer {
            target: target.to_string(),
            replaces: replaces.is_some(),
        });
    }

    fn send_dtmf(&self, signal: &str, _options: &DtmfOptions) {
        self.record(SessionOp::SendDtmf {
            signal: signal.to_string(),
        });
    }

    fn renegotiate(&self) {
        self.record(SessionOp::Renegotiate);
    }
}

/// Device provider handing out fixed tracks
#[derive(Default)]
pub struct MemoryDevices {
    tracks: Mutex<Vec<TrackRef>>,
    failure: Mutex<Option<CallError>>,
    preferred: Mutex<HashMap<DeviceKind, DeviceInfo>>,
    gate: Option<Notify>,
}

impl MemoryDevices {
    pub fn new(tracks: Vec<TrackRef>) -> Self {
        Self {
            tracks: Mutex::new(tracks),
            ..Self::default()
        }
    }

    /// Provider whose `start_streams` waits for [`MemoryDevices::release`]
    pub fn gated(tracks: Vec<TrackRef>) -> Self {
        Self {
            gate: Some(Notify::new()),
            ..Self::new(tracks)
        }
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }

    /// Make `start_streams` fail with `error`
    pub fn fail_with(&self, error: CallError) {
        *self.failure.lock() = Some(error);
    }

    pub fn prefer(&self, device: DeviceInfo) {
        self.preferred.lock().insert(device.kind, device);
    }
}

#[async_trait]
impl DeviceProvider for MemoryDevices {
    async fn start_streams(&self, _stream_id: &str) -> CallResult<Vec<TrackRef>> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(error) = self.failure.lock().clone() {
            return Err(error);
        }
        Ok(self.tracks.lock().clone())
    }

    fn preferred_device(&self, kind: DeviceKind) -> Option<DeviceInfo> {
        self.preferred.lock().get(&kind).cloned()
    }
}

/// Mixer reporting one volume for every channel
#[derive(Debug)]
pub struct FixedVolume(Mutex<Option<f64>>);

impl FixedVolume {
    pub fn new(volume: Option<f64>) -> Self {
        Self(Mutex::new(volume))
    }

    pub fn set(&self, volume: Option<f64>) {
        *self.0.lock() = volume;
    }
}

impl VolumeProvider for FixedVolume {
    fn volume(&self, _channel: VolumeChannel, _options: VolumeOptions) -> Option<f64> {
        *self.0.lock()
    }
}

/// Transfer-target source holding one collected target
#[derive(Debug, Default)]
pub struct MemoryTargets(Mutex<Option<TransferTarget>>);

impl MemoryTargets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, target: impl Into<TransferTarget>) {
        *self.0.lock() = Some(target.into());
    }
}

impl TransferTargetSource for MemoryTargets {
    fn take_target(&self) -> Option<TransferTarget> {
        self.0.lock().take()
    }
}

/// Listener collecting every notification
#[derive(Debug, Default)]
pub struct RecordingListener {
    notifications: Mutex<Vec<Notification>>,
}

impl RecordingListener {
    /// Create a listener and subscribe it to `bus`
    pub fn attach(bus: &EventBus) -> Arc<Self> {
        let listener = Arc::new(Self::default());
        bus.subscribe(listener.clone());
        listener
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().clone()
    }

    /// Notification names, with the trailing type for `call.primary.update`
    pub fn names(&self) -> Vec<String> {
        self.notifications.lock().iter().map(Notification::name).collect()
    }

    /// Names published on the plain call channel only
    pub fn call_channel_names(&self) -> Vec<String> {
        self.notifications
            .lock()
            .iter()
            .filter(|notification| notification.channel == Channel::Call)
            .map(Notification::name)
            .collect()
    }

    /// Names of one call's notifications
    pub fn names_for(&self, call_id: &CallId) -> Vec<String> {
        self.notifications
            .lock()
            .iter()
            .filter(|notification| &notification.call_id == call_id)
            .map(Notification::name)
            .collect()
    }

    pub fn names_ending_with(&self, suffix: &str) -> Vec<String> {
        self.names()
            .into_iter()
            .filter(|name| name.ends_with(suffix))
            .collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.names().iter().filter(|n| n.as_str() == name).count()
    }

    pub fn clear(&self) {
        self.notifications.lock().clear();
    }
}

impl crate::events::CallEventListener for RecordingListener {
    fn on_notification(&self, notification: &Notification) {
        self.notifications.lock().push(notification.clone());
    }
}

/// Sink factory keeping a handle to every sink it creates
#[derive(Debug, Default)]
pub struct RecordingSinkFactory {
    sinks: Mutex<HashMap<(CallId, StreamGroupKind, MediaKind), HeadlessSink>>,
    rejected_devices: Mutex<Vec<String>>,
}

impl RecordingSinkFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every sink created afterwards rejects `device_id`
    pub fn reject_device(&self, device_id: impl Into<String>) {
        self.rejected_devices.lock().push(device_id.into());
    }

    pub fn sink(&self, call_id: &CallId, group: StreamGroupKind, kind: MediaKind) -> Option<HeadlessSink> {
        self.sinks.lock().get(&(call_id.clone(), group, kind)).cloned()
    }
}

impl SinkFactory for RecordingSinkFactory {
    fn create_sink(&self, call_id: &CallId, group: StreamGroupKind, kind: MediaKind) -> Box<dyn MediaSink> {
        let sink = HeadlessSink::new();
        for device in self.rejected_devices.lock().iter() {
            sink.reject_device(device.clone());
        }
        self.sinks
            .lock()
            .insert((call_id.clone(), group, kind), sink.clone());
        Box::new(sink)
    }
}
