//! Call control operations: answer, terminate, hold, mute, transfer, DTMF,
//! volume and outbound track management

use crate::config::KeyAction;
use crate::events::CallEvent;
use crate::media::{MediaKind, TrackRef};
use crate::providers::{DeviceInfo, TransferTarget, VolumeChannel, VolumeOptions};
use crate::session::{AnswerOptions, DtmfOptions, MuteOptions, ALLOW_HEADER};

use super::{Call, KeyEvent, KeyPhase};

impl Call {
    /// Accept the session.
    ///
    /// Local capture is started through the device provider first; if that
    /// fails `answer.failed` is published and the call stays as it was.
    pub async fn answer(&self) {
        let Some(session) = self.session() else {
            return;
        };
        if session.is_established() {
            tracing::debug!(call_id = %self.id, "Answer ignored, session already established");
            return;
        }

        let mut options = AnswerOptions::default();
        if let Some(devices) = self.collaborators.devices.clone() {
            let tracks = match devices.start_streams(self.id.as_str()).await {
                Ok(tracks) => tracks,
                Err(e) => {
                    tracing::warn!(call_id = %self.id, error = %e, "Could not start local media, answer aborted");
                    self.emit(CallEvent::AnswerFailed { error: e });
                    return;
                }
            };

            if !self.is_alive() {
                tracing::warn!(call_id = %self.id, "Call ended while acquiring media, dropping answer");
                for track in &tracks {
                    track.stop();
                }
                return;
            }

            options.media = tracks;
            options.extra_headers.push(ALLOW_HEADER.to_string());
            if let Some(user_agent) = &self.config.user_agent {
                options.extra_headers.push(format!("User-Agent: {}", user_agent));
            }
        }

        session.answer(options);
        tracing::info!(call_id = %self.id, "Call answered");
        self.emit(CallEvent::Answered);
    }

    /// Hang up when established, cancel otherwise
    pub fn terminate(&self) {
        if self.is_established() {
            self.hangup();
        } else {
            self.cancel();
        }
    }

    pub fn cancel(&self) {
        if let Some(session) = self.session() {
            tracing::info!(call_id = %self.id, "Cancelling call");
            session.terminate();
        }
    }

    pub fn hangup(&self) {
        if let Some(session) = self.session() {
            tracing::info!(call_id = %self.id, "Hanging up call");
            session.terminate();
        }
    }

    /// Decline an incoming session
    pub fn reject(&self) {
        if let Some(session) = self.session() {
            tracing::info!(call_id = %self.id, "Rejecting call");
            session.terminate();
            self.emit(CallEvent::Rejected);
        }
    }

    pub fn hold(&self) {
        if let Some(session) = self.session() {
            session.hold();
        }
    }

    /// Resume from hold; the transport may have swapped tracks, so streams are re-synchronized
    pub fn unhold(&self) {
        if let Some(session) = self.session() {
            session.unhold();
            self.sync_streams();
        }
    }

    pub fn mute(&self, options: MuteOptions) {
        if let Some(session) = self.session() {
            session.mute(options);
        }
    }

    pub fn unmute(&self, options: MuteOptions) {
        if let Some(session) = self.session() {
            session.unmute(options);
        }
    }

    /// Renegotiate media; only while established and not held
    pub fn renegotiate(&self) {
        let Some(session) = self.session() else {
            return;
        };
        if !session.is_established() || session.hold_status().is_held() {
            tracing::debug!(call_id = %self.id, "Renegotiation skipped, call not active");
            return;
        }

        session.renegotiate();
        self.sync_streams();
        self.emit(CallEvent::Renegotiated);
    }

    /// Two-phase transfer.
    ///
    /// Without a target and outside a transfer, the call starts collecting
    /// one (holding itself when `auto_hold`). With a target, or when called
    /// again while collecting, the transfer is carried out: another live call
    /// gives an attended transfer, an address a blind one. The collected
    /// target is taken from the transfer-target source when none is given.
    pub fn transfer(&self, target: Option<TransferTarget>, auto_hold: bool) {
        let Some(session) = self.session() else {
            return;
        };

        let collecting = self.is_in_transfer();
        if !collecting && target.is_none() {
            self.state.lock().in_transfer = true;
            if auto_hold {
                self.hold();
            }
            tracing::info!(call_id = %self.id, "Collecting transfer target");
            self.emit(CallEvent::TransferCollecting);
            return;
        }

        self.state.lock().in_transfer = false;

        let target = target.or_else(|| {
            self.collaborators
                .targets
                .as_ref()
                .and_then(|targets| targets.take_target())
        });

        match target {
            Some(TransferTarget::Call(other)) => {
                let replaces = other
                    .session()
                    .filter(|_| other.id != self.id && !other.is_terminated());
                match replaces {
                    Some(replaces) => {
                        let address = replaces.remote_identity().uri;
                        tracing::info!(call_id = %self.id, replaces = %other.id, target = %address, "Attended transfer");
                        session.refer(&address, Some(replaces));
                        self.emit(CallEvent::TransferComplete {
                            target: other.id.clone(),
                        });
                    }
                    None => self.fail_transfer(Some(other.id.to_string()), auto_hold),
                }
            }
            Some(TransferTarget::Address(address)) if !address.trim().is_empty() => {
                tracing::info!(call_id = %self.id, target = %address, "Blind transfer");
                session.refer(&address, None);
                self.emit(CallEvent::TransferStarted { target: address });
            }
            _ => self.fail_transfer(None, auto_hold),
        }
    }

    fn fail_transfer(&self, target: Option<String>, auto_hold: bool) {
        tracing::warn!(call_id = %self.id, target = ?target, "Transfer failed, no usable target");
        if auto_hold {
            self.unhold();
        }
        self.emit(CallEvent::TransferFailed { target });
    }

    pub fn send_dtmf(&self, signal: &str, options: DtmfOptions) {
        if let Some(session) = self.session() {
            session.send_dtmf(signal, &options);
            self.emit(CallEvent::DtmfSent {
                signal: signal.to_string(),
                options,
            });
        }
    }

    /// Apply a playback volume to the remote sinks.
    ///
    /// Without an explicit volume, the mixer's remote channel (relative to
    /// master) is used. The value is clamped to `[0, 1]`.
    pub fn change_volume(&self, volume: Option<f64>, kind: Option<MediaKind>) {
        let volume = volume.or_else(|| {
            self.collaborators.mixer.as_ref().and_then(|mixer| {
                mixer.volume(VolumeChannel::Remote, VolumeOptions::default())
            })
        });

        let Some(volume) = volume.filter(|volume| !volume.is_nan()) else {
            return;
        };

        self.set_remote_volume(volume.clamp(0.0, 1.0), kind);
    }

    /// Swap the outbound track of the same kind, or add it when no sender carries that kind.
    ///
    /// Skipped silently when the transport is closed.
    pub async fn replace_sender_track(&self, track: TrackRef) {
        let Some(transport) = self.session().and_then(|session| session.transport()) else {
            return;
        };
        if transport.is_closed() {
            tracing::debug!(call_id = %self.id, "Transport closed, not replacing sender track");
            return;
        }

        let kind = track.kind();
        let sender = transport
            .senders()
            .into_iter()
            .find(|sender| sender.track().is_some_and(|current| current.kind() == kind));

        let result = match sender {
            Some(sender) => sender.replace_track(track).await,
            None => transport.add_track(track),
        };

        if let Err(e) = result {
            tracing::warn!(call_id = %self.id, kind = %kind, error = %e, "Sender track not replaced");
            self.emit(CallEvent::Error { error: e });
            return;
        }

        if !self.is_alive() {
            tracing::warn!(call_id = %self.id, "Call ended while replacing sender track, skipping renegotiation");
            return;
        }

        self.renegotiate();
    }

    /// Remove the outbound sender carrying `kind`
    pub fn remove_sender_track(&self, kind: MediaKind) {
        let Some(transport) = self.session().and_then(|session| session.transport()) else {
            return;
        };
        if transport.is_closed() {
            tracing::debug!(call_id = %self.id, "Transport closed, not removing sender track");
            return;
        }

        let Some(sender) = transport
            .senders()
            .into_iter()
            .find(|sender| sender.track().is_some_and(|current| current.kind() == kind))
        else {
            return;
        };

        if let Err(e) = transport.remove_sender(&sender.id()) {
            tracing::warn!(call_id = %self.id, kind = %kind, error = %e, "Sender not removed");
            self.emit(CallEvent::Error { error: e });
            return;
        }

        self.renegotiate();
    }

    /// The selected capture microphone changed; `None` means it went away
    pub async fn on_audio_input_changed(&self, track: Option<TrackRef>) {
        if !self.has_session() {
            return;
        }
        match track {
            Some(track) => self.replace_sender_track(track).await,
            None => self.remove_sender_track(MediaKind::Audio),
        }
    }

    /// The selected camera changed
    pub async fn on_video_input_changed(&self, track: Option<TrackRef>) {
        if let (true, Some(track)) = (self.has_session(), track) {
            self.replace_sender_track(track).await;
        }
    }

    /// Route remote playback to a new output device
    pub fn on_audio_output_changed(&self, device: &DeviceInfo) {
        let errors = self
            .state
            .lock()
            .group_mut(crate::media::StreamGroupKind::Remote)
            .sinks
            .set_output_device(device);

        for error in errors {
            self.emit(CallEvent::Error { error });
        }
    }

    /// Master or remote mixer volume changed
    pub fn on_volume_changed(&self) {
        self.change_volume(None, None);
    }

    /// Handle a global key shortcut. Returns whether the event was consumed.
    pub fn handle_key(&self, event: &KeyEvent) -> bool {
        if !self.config.global_key_shortcuts
            || !self.has_session()
            || !event.on_document_body
            || event.repeat
            || !self.is_primary()
        {
            return false;
        }

        let binding = match event.key.as_str() {
            " " => &self.config.keys.spacebar,
            _ => return false,
        };
        if !binding.enabled {
            return false;
        }

        match binding.action {
            KeyAction::PushToTalk => self.push_to_talk(event.phase),
            KeyAction::Nothing => {}
        }
        true
    }

    fn push_to_talk(&self, phase: KeyPhase) {
        let unmute = match phase {
            KeyPhase::Down => {
                let muted = self.is_muted();
                self.state.lock().mute_hint = muted;
                muted
            }
            KeyPhase::Up => !self.state.lock().mute_hint,
        };

        if unmute {
            self.unmute(MuteOptions::ALL);
        } else {
            self.mute(MuteOptions::ALL);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tracing_test::traced_test;

    use crate::memory::{MemorySession, MemoryTrack, MemoryTransport, RecordingListener, SessionOp};
    use crate::session::Originator;
    use crate::Phone;

    fn established(phone: &Phone) -> (Arc<super::Call>, Arc<MemorySession>) {
        let session = Arc::new(MemorySession::outgoing("1002"));
        session.set_established(true);
        let call = phone.create_call(Some(session.clone()));
        (call, session)
    }

    #[test]
    #[traced_test]
    fn test_failed_transfer_is_logged() {
        let phone = Phone::builder().build();
        let (call, _session) = established(&phone);

        call.transfer(None, false);
        call.transfer(None, false);

        assert!(logs_contain("Collecting transfer target"));
        assert!(logs_contain("Transfer failed"));
    }

    #[test]
    #[traced_test]
    fn test_renegotiation_skipped_while_held() {
        let phone = Phone::builder().build();
        let (call, session) = established(&phone);

        call.hold();
        call.renegotiate();

        assert_eq!(session.count(|op| *op == SessionOp::Renegotiate), 0);
        assert!(logs_contain("Renegotiation skipped"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_replacement_after_end_skips_renegotiation() {
        let phone = Phone::builder().build();
        let transport = MemoryTransport::new();
        let session = Arc::new(MemorySession::outgoing("1002").with_transport(transport.clone()));
        session.set_established(true);
        let call = phone.create_call(Some(session.clone()));
        let sender = transport.add_sender(MemoryTrack::audio("mic-1"));
        sender.gate_replace();

        let replace = call.replace_sender_track(MemoryTrack::audio("mic-2"));
        let end = async {
            call.handle_session_event(session.end(Originator::Local));
            sender.release();
        };
        // the replacement is pending on the sender when the session ends
        tokio::join!(replace, end);

        assert!(logs_contain("Call ended while replacing sender track"));
        assert_eq!(session.count(|op| *op == SessionOp::Renegotiate), 0);
    }

    #[test]
    fn test_volume_without_mixer_is_ignored() {
        let phone = Phone::builder().build();
        let recorder = RecordingListener::attach(phone.bus());
        let call = phone.create_call(None);
        recorder.clear();

        call.change_volume(None, None);
        call.on_volume_changed();

        assert!(recorder.names().is_empty());
    }
}
