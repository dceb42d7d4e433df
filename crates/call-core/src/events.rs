//! Call notifications and the event bus
//!
//! Every call-scoped notification is a [`CallEvent`]. A call publishes it on
//! the [`EventBus`] through [`EventBus::dispatch`], which implements the
//! primary fan-out: the event goes out on the `call.<type>` channel and, when
//! the call is primary, is repeated on `call.primary.<type>` and then on
//! `call.primary.update` (with `<type>` as the trailing argument). Renderers
//! that only care about "the current call" subscribe to the primary channels
//! and never track which call that is.
//!
//! # Listening
//!
//! Listeners run synchronously, in registration order, during dispatch:
//!
//! ```rust
//! use softphone_call_core::events::{Channel, EventBus, Notification};
//!
//! let bus = EventBus::new();
//! bus.subscribe(std::sync::Arc::new(|notification: &Notification| {
//!     if notification.channel == Channel::PrimaryUpdate {
//!         println!("primary call changed: {}", notification.event.type_name());
//!     }
//! }));
//! ```
//!
//! Asynchronous consumers can take a broadcast receiver with
//! [`EventBus::receiver`] instead.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::call::CallId;
use crate::error::CallError;
use crate::media::{MediaKind, StreamGroupKind, TrackParameters};
use crate::session::{DtmfOptions, Identity, MuteOptions, Originator};

/// Capacity of the broadcast channel backing [`EventBus::receiver`]
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// A call-scoped notification
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CallEvent {
    Created,
    RingingStarted,
    RingingStopped,
    Progress { status_code: Option<u16> },
    /// Session confirmed
    Established,
    DtmfReceived { signal: String, originator: Originator },
    InfoReceived { content_type: String, body: String, originator: Originator },
    Hold { originator: Originator },
    Unhold { originator: Originator },
    Muted { channels: MuteOptions },
    Unmuted { channels: MuteOptions },
    /// In-dialog update; carries the new remote identity when the peer changed it
    Updated { remote_identity: Option<Identity> },
    Ended { originator: Originator, cause: String },
    Failed { originator: Originator, cause: String },
    /// Call torn down; always precedes `Ended`/`Failed`
    Terminated,
    PeerConnection,
    TransportTrackAdded,
    TransportTrackRemoved,
    Answered,
    AnswerFailed {
        #[serde(serialize_with = "error_message")]
        error: CallError,
    },
    Rejected,
    Renegotiated,
    DtmfSent { signal: String, options: DtmfOptions },
    TransferCollecting,
    /// Blind transfer requested
    TransferStarted { target: String },
    /// Attended transfer requested against another call
    TransferComplete { target: CallId },
    TransferFailed { target: Option<String> },
    Promoted,
    Demoted,
    TimeUpdate {
        answer_time: DateTime<Utc>,
        #[serde(with = "duration_millis")]
        elapsed: Duration,
        formatted: String,
    },
    TrackAdded { group: StreamGroupKind, track: TrackParameters },
    TrackRemoved { group: StreamGroupKind, track: TrackParameters },
    SinkCreated { group: StreamGroupKind, kind: MediaKind },
    StreamConnected { group: StreamGroupKind },
    StreamDisconnected { group: StreamGroupKind },
    SinkConnected { group: StreamGroupKind, kind: MediaKind },
    SinkDisconnected { group: StreamGroupKind, kind: MediaKind },
    Error {
        #[serde(serialize_with = "error_message")]
        error: CallError,
    },
}

impl CallEvent {
    /// Dot-namespaced type, e.g. `transfer.started` or `remote.audio.added`
    pub fn type_name(&self) -> String {
        let name = match self {
            CallEvent::Created => "created",
            CallEvent::RingingStarted => "ringing.started",
            CallEvent::RingingStopped => "ringing.stopped",
            CallEvent::Progress { .. } => "progress",
            CallEvent::Established => "established",
            CallEvent::DtmfReceived { .. } => "receive.dtmf",
            CallEvent::InfoReceived { .. } => "receive.info",
            CallEvent::Hold { .. } => "hold",
            CallEvent::Unhold { .. } => "unhold",
            CallEvent::Muted { .. } => "muted",
            CallEvent::Unmuted { .. } => "unmuted",
            CallEvent::Updated { .. } => "update",
            CallEvent::Ended { .. } => "ended",
            CallEvent::Failed { .. } => "failed",
            CallEvent::Terminated => "terminated",
            CallEvent::PeerConnection => "peerconnection",
            CallEvent::TransportTrackAdded => "peerconnection.add.track",
            CallEvent::TransportTrackRemoved => "peerconnection.remove.track",
            CallEvent::Answered => "answered",
            CallEvent::AnswerFailed { .. } => "answer.failed",
            CallEvent::Rejected => "rejected",
            CallEvent::Renegotiated => "renegotiated",
            CallEvent::DtmfSent { .. } => "send.dtmf",
            CallEvent::TransferCollecting => "transfer.collecting",
            CallEvent::TransferStarted { .. } => "transfer.started",
            CallEvent::TransferComplete { .. } => "transfer.complete",
            CallEvent::TransferFailed { .. } => "transfer.failed",
            CallEvent::Promoted => "promoted",
            CallEvent::Demoted => "demoted",
            CallEvent::TimeUpdate { .. } => "timeupdate",
            CallEvent::TrackAdded { group, track } => return format!("{}.{}.added", group, track.kind),
            CallEvent::TrackRemoved { group, track } => return format!("{}.{}.removed", group, track.kind),
            CallEvent::SinkCreated { group, kind } => return format!("{}.{}.element", group, kind),
            CallEvent::StreamConnected { group } => return format!("{}.mediaStream.connect", group),
            CallEvent::StreamDisconnected { group } => return format!("{}.mediaStream.disconnect", group),
            CallEvent::SinkConnected { group, kind } => return format!("{}.{}.connect", group, kind),
            CallEvent::SinkDisconnected { group, kind } => return format!("{}.{}.disconnect", group, kind),
            CallEvent::Error { .. } => "error",
        };
        name.to_string()
    }
}

/// Channel a notification was published on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// `call.<type>`
    Call,
    /// `call.primary.<type>`
    Primary,
    /// `call.primary.update`, with the type as trailing argument
    PrimaryUpdate,
}

/// One published notification
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub channel: Channel,
    /// Phone instance that owns the call
    pub phone_id: Uuid,
    pub call_id: CallId,
    pub event: CallEvent,
}

impl Notification {
    /// Full notification name, e.g. `call.primary.hold`
    pub fn name(&self) -> String {
        match self.channel {
            Channel::Call => format!("call.{}", self.event.type_name()),
            Channel::Primary => format!("call.primary.{}", self.event.type_name()),
            Channel::PrimaryUpdate => "call.primary.update".to_string(),
        }
    }

    /// The trailing type argument of `call.primary.update`
    pub fn update_type(&self) -> Option<String> {
        match self.channel {
            Channel::PrimaryUpdate => Some(self.event.type_name()),
            _ => None,
        }
    }

    /// JSON form for renderers outside the process: `{"name", "phoneId", "callId", "event", "updateType"}`
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name(),
            "phoneId": self.phone_id,
            "callId": self.call_id,
            "event": self.event,
            "updateType": self.update_type(),
        })
    }
}

/// Receives notifications synchronously during dispatch
pub trait CallEventListener: Send + Sync {
    fn on_notification(&self, notification: &Notification);
}

impl<F> CallEventListener for F
where
    F: Fn(&Notification) + Send + Sync,
{
    fn on_notification(&self, notification: &Notification) {
        self(notification)
    }
}

struct BusInner {
    listeners: RwLock<Vec<(Uuid, Arc<dyn CallEventListener>)>>,
    tx: broadcast::Sender<Notification>,
}

/// Append-only fan-out of call notifications
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(BusInner {
                listeners: RwLock::new(Vec::new()),
                tx,
            }),
        }
    }

    /// Register a synchronous listener; returns its id for [`EventBus::unsubscribe`]
    pub fn subscribe(&self, listener: Arc<dyn CallEventListener>) -> Uuid {
        let id = Uuid::new_v4();
        self.inner.listeners.write().push((id, listener));
        id
    }

    pub fn unsubscribe(&self, listener_id: Uuid) -> bool {
        let mut listeners = self.inner.listeners.write();
        if let Some(pos) = listeners.iter().position(|(id, _)| *id == listener_id) {
            listeners.remove(pos);
            true
        } else {
            false
        }
    }

    /// Broadcast receiver for asynchronous consumers. Slow receivers lag, they never block dispatch.
    pub fn receiver(&self) -> broadcast::Receiver<Notification> {
        self.inner.tx.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.read().len()
    }

    /// Publish a single notification to every listener and receiver
    pub fn publish(&self, notification: Notification) {
        let listeners: Vec<Arc<dyn CallEventListener>> = self
            .inner
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            listener.on_notification(&notification);
        }

        // no receivers is fine
        let _ = self.inner.tx.send(notification);
    }

    /// Publish a call event with primary fan-out.
    ///
    /// Emits `call.<type>`; when `primary`, then `call.primary.<type>` and
    /// `call.primary.update`, in that order.
    pub fn dispatch(&self, phone_id: Uuid, call_id: &CallId, primary: bool, event: CallEvent) {
        tracing::trace!(call_id = %call_id, event = %event.type_name(), primary, "Dispatching call event");

        let channels: &[Channel] = if primary {
            &[Channel::Call, Channel::Primary, Channel::PrimaryUpdate]
        } else {
            &[Channel::Call]
        };

        for &channel in channels {
            self.publish(Notification {
                channel,
                phone_id,
                call_id: call_id.clone(),
                event: event.clone(),
            });
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn error_message<S: serde::Serializer>(error: &CallError, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

mod duration_millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::RecordingListener;

    fn call_id() -> CallId {
        CallId::from("call-1")
    }

    #[test]
    fn test_fan_out_for_primary() {
        let bus = EventBus::new();
        let recorder = RecordingListener::attach(&bus);

        bus.dispatch(Uuid::nil(), &call_id(), true, CallEvent::Hold { originator: Originator::Local });

        assert_eq!(
            recorder.names(),
            vec!["call.hold", "call.primary.hold", "call.primary.update"]
        );
        let last = recorder.notifications().pop().unwrap();
        assert_eq!(last.update_type().as_deref(), Some("hold"));
    }

    #[test]
    fn test_no_fan_out_for_secondary() {
        let bus = EventBus::new();
        let recorder = RecordingListener::attach(&bus);

        bus.dispatch(Uuid::nil(), &call_id(), false, CallEvent::Renegotiated);

        assert_eq!(recorder.names(), vec!["call.renegotiated"]);
    }

    #[test]
    fn test_type_names() {
        let track = TrackParameters {
            stream_id: "s".into(),
            track_id: "t1".into(),
            kind: MediaKind::Audio,
            label: String::new(),
            enabled: true,
        };
        assert_eq!(
            CallEvent::TrackAdded { group: StreamGroupKind::Remote, track: track.clone() }.type_name(),
            "remote.audio.added"
        );
        assert_eq!(
            CallEvent::TrackRemoved { group: StreamGroupKind::Local, track }.type_name(),
            "local.audio.removed"
        );
        assert_eq!(
            CallEvent::StreamConnected { group: StreamGroupKind::Local }.type_name(),
            "local.mediaStream.connect"
        );
        assert_eq!(
            CallEvent::SinkCreated { group: StreamGroupKind::Remote, kind: MediaKind::Video }.type_name(),
            "remote.video.element"
        );
        assert_eq!(CallEvent::TransportTrackAdded.type_name(), "peerconnection.add.track");
        assert_eq!(CallEvent::DtmfSent { signal: "1".into(), options: DtmfOptions::default() }.type_name(), "send.dtmf");
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let id = bus.subscribe(Arc::new(|_: &Notification| {}));
        assert_eq!(bus.listener_count(), 1);
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert_eq!(bus.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_broadcast_receiver_sees_fan_out() {
        let bus = EventBus::new();
        let mut rx = bus.receiver();

        bus.dispatch(Uuid::nil(), &call_id(), true, CallEvent::Promoted);

        assert_eq!(rx.recv().await.unwrap().channel, Channel::Call);
        assert_eq!(rx.recv().await.unwrap().channel, Channel::Primary);
        assert_eq!(rx.recv().await.unwrap().channel, Channel::PrimaryUpdate);
    }

    #[test]
    fn test_notification_serializes() {
        let notification = Notification {
            channel: Channel::Call,
            phone_id: Uuid::nil(),
            call_id: call_id(),
            event: CallEvent::TransferStarted { target: "sip:bob@example.com".into() },
        };
        let json = notification.to_json();
        assert_eq!(json["name"], "call.transfer.started");
        assert_eq!(json["callId"], "call-1");
        assert_eq!(json["event"]["type"], "transfer_started");
        assert_eq!(json["event"]["target"], "sip:bob@example.com");
        assert!(json["updateType"].is_null());
    }
}
