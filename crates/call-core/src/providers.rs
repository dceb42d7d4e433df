//! Capabilities consumed by calls
//!
//! Device enumeration, audio mixing, dial target collection and rendering are
//! owned by other components. A call only sees them through these traits,
//! bundled in [`Collaborators`]. Every collaborator except the sink factory is
//! optional; a call degrades gracefully when one is missing.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::call::{Call, CallId};
use crate::error::CallResult;
use crate::media::{HeadlessSink, MediaKind, MediaSink, StreamGroupKind, TrackRef};

/// Kind of a media device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    AudioInput,
    AudioOutput,
    VideoInput,
}

/// A media device as reported by the device provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: String,
    pub label: String,
    pub kind: DeviceKind,
}

impl DeviceInfo {
    pub fn new(id: impl Into<String>, label: impl Into<String>, kind: DeviceKind) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            kind,
        }
    }
}

/// Capture device access
#[async_trait]
pub trait DeviceProvider: Send + Sync {
    /// Start local capture for the stream identified by `stream_id`
    async fn start_streams(&self, stream_id: &str) -> CallResult<Vec<TrackRef>>;

    /// The device the user prefers for `kind`, if any
    fn preferred_device(&self, kind: DeviceKind) -> Option<DeviceInfo>;
}

/// Mixer channel a volume is read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VolumeChannel {
    Master,
    Remote,
    Ringer,
}

/// How a channel volume is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeOptions {
    /// Report the raw mixer value instead of a `[0, 1]` ratio
    pub scale: bool,
    /// Multiply by the master volume
    pub relative_to_master: bool,
}

impl Default for VolumeOptions {
    fn default() -> Self {
        Self {
            scale: false,
            relative_to_master: true,
        }
    }
}

/// Audio mixing graph
pub trait VolumeProvider: Send + Sync {
    fn volume(&self, channel: VolumeChannel, options: VolumeOptions) -> Option<f64>;
}

/// Where a transfer should go
#[derive(Clone)]
pub enum TransferTarget {
    /// Another live call; results in an attended transfer replacing its session
    Call(Arc<Call>),
    /// A literal address; results in a blind transfer
    Address(String),
}

impl TransferTarget {
    pub fn address(address: impl Into<String>) -> Self {
        Self::Address(address.into())
    }
}

impl fmt::Debug for TransferTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferTarget::Call(call) => f.debug_tuple("Call").field(call.id()).finish(),
            TransferTarget::Address(address) => f.debug_tuple("Address").field(address).finish(),
        }
    }
}

impl From<Arc<Call>> for TransferTarget {
    fn from(call: Arc<Call>) -> Self {
        Self::Call(call)
    }
}

impl From<&str> for TransferTarget {
    fn from(address: &str) -> Self {
        Self::Address(address.to_string())
    }
}

/// Source of transfer targets collected while a call is in transfer (e.g. a dialpad)
pub trait TransferTargetSource: Send + Sync {
    /// Take the collected target, clearing it
    fn take_target(&self) -> Option<TransferTarget>;
}

/// Creates rendering sinks for new calls
pub trait SinkFactory: Send + Sync {
    fn create_sink(&self, call_id: &CallId, group: StreamGroupKind, kind: MediaKind) -> Box<dyn MediaSink>;
}

/// Factory producing [`HeadlessSink`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct HeadlessSinkFactory;

impl SinkFactory for HeadlessSinkFactory {
    fn create_sink(&self, _call_id: &CallId, _group: StreamGroupKind, _kind: MediaKind) -> Box<dyn MediaSink> {
        Box::new(HeadlessSink::new())
    }
}

/// Every capability a call may consume
#[derive(Clone)]
pub struct Collaborators {
    pub devices: Option<Arc<dyn DeviceProvider>>,
    pub mixer: Option<Arc<dyn VolumeProvider>>,
    pub targets: Option<Arc<dyn TransferTargetSource>>,
    pub sinks: Arc<dyn SinkFactory>,
}

impl Collaborators {
    pub fn new() -> Self {
        Self {
            devices: None,
            mixer: None,
            targets: None,
            sinks: Arc::new(HeadlessSinkFactory),
        }
    }

    pub fn with_devices(mut self, devices: Arc<dyn DeviceProvider>) -> Self {
        self.devices = Some(devices);
        self
    }

    pub fn with_mixer(mut self, mixer: Arc<dyn VolumeProvider>) -> Self {
        self.mixer = Some(mixer);
        self
    }

    pub fn with_targets(mut self, targets: Arc<dyn TransferTargetSource>) -> Self {
        self.targets = Some(targets);
        self
    }

    pub fn with_sinks(mut self, sinks: Arc<dyn SinkFactory>) -> Self {
        self.sinks = sinks;
        self
    }
}

impl Default for Collaborators {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("devices", &self.devices.is_some())
            .field("mixer", &self.mixer.is_some())
            .field("targets", &self.targets.is_some())
            .finish()
    }
}
