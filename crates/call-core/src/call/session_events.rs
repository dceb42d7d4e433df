//! Reactions to signaling session notifications

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::events::CallEvent;
use crate::session::{MuteOptions, SessionEvent};

use super::Call;

impl Call {
    /// Feed one session notification into the state machine.
    ///
    /// Notifications arriving after the call was torn down are ignored.
    pub fn handle_session_event(&self, event: SessionEvent) {
        if !self.is_alive() {
            tracing::debug!(call_id = %self.id, event = ?event, "Session event after teardown ignored");
            return;
        }

        match event {
            SessionEvent::Progress { status_code } => {
                self.emit(CallEvent::Progress { status_code });
            }
            SessionEvent::Connecting => {
                let start_muted = MuteOptions {
                    audio: self.config.start_with_audio_muted,
                    video: self.config.start_with_video_muted,
                };
                if start_muted.any() {
                    tracing::debug!(call_id = %self.id, ?start_muted, "Muting at session start");
                    self.mute(start_muted);
                }
            }
            SessionEvent::Confirmed => self.on_confirmed(),
            SessionEvent::Hold { originator } => self.emit(CallEvent::Hold { originator }),
            SessionEvent::Unhold { originator } => self.emit(CallEvent::Unhold { originator }),
            SessionEvent::Muted(channels) => self.emit(CallEvent::Muted { channels }),
            SessionEvent::Unmuted(channels) => self.emit(CallEvent::Unmuted { channels }),
            SessionEvent::NewDtmf { signal, originator } => {
                self.emit(CallEvent::DtmfReceived { signal, originator });
            }
            SessionEvent::NewInfo {
                content_type,
                body,
                originator,
            } => {
                self.emit(CallEvent::InfoReceived {
                    content_type,
                    body,
                    originator,
                });
            }
            SessionEvent::Update { from } => {
                if let Some(identity) = &from {
                    tracing::debug!(call_id = %self.id, remote = %identity.formatted(), "Remote identity updated");
                    self.state.lock().remote_identity_override = Some(identity.clone());
                }
                self.emit(CallEvent::Updated { remote_identity: from });
            }
            SessionEvent::Ended { originator, cause } => {
                tracing::info!(call_id = %self.id, ?originator, %cause, "Call ended");
                self.destroy();
                self.emit(CallEvent::Ended { originator, cause });
            }
            SessionEvent::Failed { originator, cause } => {
                tracing::info!(call_id = %self.id, ?originator, %cause, "Call failed");
                self.destroy();
                self.emit(CallEvent::Failed { originator, cause });
            }
            SessionEvent::PeerConnection => self.emit(CallEvent::PeerConnection),
            SessionEvent::TrackAdded => {
                self.emit(CallEvent::TransportTrackAdded);
                self.sync_streams();
            }
            SessionEvent::TrackRemoved => {
                self.emit(CallEvent::TransportTrackRemoved);
                self.sync_streams();
            }
        }
    }

    /// Pump session notifications from a channel until it closes or the call is dropped
    pub fn attach_session_events(self: &Arc<Self>, mut events: mpsc::Receiver<SessionEvent>) -> JoinHandle<()> {
        let call = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(call) = call.upgrade() else {
                    break;
                };
                call.handle_session_event(event);
            }
        })
    }

    fn on_confirmed(&self) {
        let first = {
            let mut inner = self.state.lock();
            if inner.answer_time.is_none() {
                inner.answer_time = Some(Utc::now());
                inner.answered_at = Some(tokio::time::Instant::now());
                true
            } else {
                false
            }
        };

        tracing::info!(call_id = %self.id, "Call established");
        self.emit(CallEvent::RingingStopped);
        self.emit(CallEvent::Established);

        if first {
            self.start_ticker();
        }
    }

    /// Irreversible teardown on session end or failure
    fn destroy(&self) {
        self.emit(CallEvent::Terminated);

        if self.is_primary() {
            self.clear_primary(false);
        }

        self.destroy_streams();

        let ticker = {
            let mut inner = self.state.lock();
            inner.terminated = true;
            inner.in_transfer = false;
            inner.session = None;
            inner.ticker.take()
        };
        if let Some(ticker) = ticker {
            ticker.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::call::CallStatus;
    use crate::memory::{MemorySession, RecordingListener};
    use crate::session::{Identity, Originator};
    use crate::Phone;

    #[test]
    fn test_update_replaces_remote_identity() {
        let phone = Phone::builder().build();
        let session = Arc::new(MemorySession::incoming("1001"));
        let call = phone.create_call(Some(session));

        call.handle_session_event(crate::session::SessionEvent::Update {
            from: Some(Identity::new(Some("Front Desk"), "2000", "sip:2000@example.com")),
        });

        assert_eq!(call.remote_identity().as_deref(), Some("Front Desk (2000)"));
        assert_eq!(call.summary().remote_identity.as_deref(), Some("Front Desk (2000)"));
    }

    #[test]
    fn test_events_after_end_are_ignored() {
        let phone = Phone::builder().build();
        let recorder = RecordingListener::attach(phone.bus());
        let session = Arc::new(MemorySession::incoming("1001"));
        let call = phone.create_call(Some(session.clone()));

        call.handle_session_event(session.end(Originator::Remote));
        assert_eq!(call.status(), CallStatus::Terminated);
        assert!(!call.has_session());

        recorder.clear();
        call.handle_session_event(crate::session::SessionEvent::Hold {
            originator: Originator::Remote,
        });
        assert!(recorder.names().is_empty());
    }

    #[test]
    fn test_terminated_precedes_ended_and_is_fanned_out() {
        let phone = Phone::builder().build();
        let recorder = RecordingListener::attach(phone.bus());
        let session = Arc::new(MemorySession::incoming("1001"));
        let call = phone.create_call(Some(session.clone()));
        recorder.clear();

        call.handle_session_event(session.end(Originator::Remote));

        let names = recorder.names();
        let terminated = names.iter().position(|name| name == "call.primary.terminated");
        let ended = names.iter().position(|name| name == "call.ended");
        assert!(terminated.is_some());
        assert!(terminated < ended);
        // demoted before ended, so ended is not fanned out
        assert_eq!(recorder.count("call.primary.ended"), 0);
        assert!(!call.is_primary());
    }
}
