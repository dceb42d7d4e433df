//! Call-core: session coordination for a softphone
//!
//! This crate keeps the state of every call a phone is handling consistent
//! while signaling transitions, transport track changes and user actions
//! arrive asynchronously. Signaling, device access, audio mixing and
//! rendering are external capabilities consumed through traits.
//!
//! ## Components
//! ```text
//! Phone ──creates──> Call ──drives──> SignalingSession / MediaTransport
//!                     │
//!                     ├── media::tracks   track synchronizer (diff transport vs. last seen)
//!                     ├── media::sinks    per-group audio/video sinks
//!                     ├── call::primary   promote / demote, hold & sink coordination
//!                     └── events          fan-out: call.X, call.primary.X, call.primary.update
//! ```
//!
//! Exactly one call is primary at a time: it renders media and receives key
//! shortcuts. Without a [`CallList`] a phone handles a single call, which
//! promotes itself on creation.
//!
//! ## Quick start
//! ```rust
//! use std::sync::Arc;
//! use softphone_call_core::memory::{MemorySession, RecordingListener};
//! use softphone_call_core::{Originator, Phone};
//!
//! let phone = Phone::builder().build();
//! let recorder = RecordingListener::attach(phone.bus());
//!
//! let session = Arc::new(MemorySession::incoming("1001"));
//! let call = phone.create_call(Some(session.clone()));
//! assert!(call.is_primary());
//! assert!(call.is_ringing());
//!
//! call.handle_session_event(session.confirm());
//! assert!(call.is_established());
//!
//! call.hold();
//! assert!(call.is_on_hold());
//!
//! call.handle_session_event(session.end(Originator::Remote));
//! assert!(call.is_terminated());
//! assert!(recorder.names().contains(&"call.ended".to_string()));
//! ```

pub mod call;
pub mod config;
pub mod error;
pub mod events;
pub mod media;
pub mod memory;
pub mod phone;
pub mod providers;
pub mod registry;
pub mod session;

pub use call::{
    format_duration, Call, CallDirection, CallId, CallStatus, CallSummary, KeyEvent, KeyPhase,
};
pub use config::{CallConfig, KeyAction, KeyBinding, KeyBindings};
pub use error::{CallError, CallResult};
pub use events::{CallEvent, CallEventListener, Channel, EventBus, Notification};
pub use media::{KindFlags, MediaKind, MediaSink, MediaStream, MediaTrack, StreamGroupKind, TrackParameters, TrackRef};
pub use phone::{Phone, PhoneBuilder};
pub use providers::{
    Collaborators, DeviceInfo, DeviceKind, DeviceProvider, SinkFactory, TransferTarget,
    TransferTargetSource, VolumeChannel, VolumeOptions, VolumeProvider,
};
pub use registry::CallList;
pub use session::{
    DtmfOptions, HoldStatus, Identity, MediaTransport, MuteOptions, Originator, RtpSender,
    SessionDirection, SessionEvent, SignalingSession,
};

/// Call-core version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
