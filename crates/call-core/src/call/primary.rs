//! Primary arbitration
//!
//! Only the primary call renders media and reacts to key shortcuts.
//! Promotion and demotion are idempotent per call; keeping at most one call
//! primary across a phone is the job of whoever owns the set of calls (see
//! [`CallList`](crate::registry::CallList)).

use crate::events::CallEvent;

use super::Call;

impl Call {
    /// Make this call primary.
    ///
    /// With `resume`, an established call on hold is taken off hold first.
    /// The flag is set and the sinks connected before `promoted` goes out, so
    /// promotion is visible on the primary channels.
    pub fn set_primary(&self, resume: bool) {
        if self.is_primary() {
            return;
        }

        if resume && self.is_established() && self.is_on_hold() {
            self.unhold();
        }

        {
            let mut inner = self.state.lock();
            if inner.primary {
                return;
            }
            inner.primary = true;
        }
        tracing::info!(call_id = %self.id, "Call promoted to primary");

        self.connect_streams();

        self.emit(CallEvent::Promoted);
    }

    /// Stop being primary.
    ///
    /// A transfer being collected is aborted first. With `pause`, an
    /// established call that is not yet held is put on hold.
    pub fn clear_primary(&self, pause: bool) {
        if !self.is_primary() {
            return;
        }

        let aborted_transfer = std::mem::take(&mut self.state.lock().in_transfer);
        if aborted_transfer {
            tracing::info!(call_id = %self.id, "Transfer aborted by demotion");
            self.emit(CallEvent::TransferFailed { target: None });
        }

        self.state.lock().primary = false;
        tracing::info!(call_id = %self.id, pause, "Call demoted");

        if pause && self.is_established() && !self.is_on_hold() {
            self.hold();
        }

        self.disconnect_streams();

        self.emit(CallEvent::Demoted);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::events::{CallEvent, Channel};
    use crate::memory::{MemorySession, RecordingListener};
    use crate::session::HoldStatus;
    use crate::Phone;

    #[test]
    fn test_standalone_call_is_primary() {
        let phone = Phone::builder().build();
        let call = phone.create_call(None);
        assert!(call.is_primary());
    }

    #[test]
    fn test_promotion_is_idempotent() {
        let phone = Phone::builder().build();
        let recorder = RecordingListener::attach(phone.bus());
        let call = phone.create_call(None);

        call.set_primary(true);
        call.set_primary(true);
        assert_eq!(recorder.count("call.promoted"), 1);

        call.clear_primary(true);
        call.clear_primary(true);
        assert_eq!(recorder.count("call.demoted"), 1);
        assert!(!call.is_primary());
    }

    #[test]
    fn test_promotion_is_fanned_out_and_demotion_is_not() {
        let phone = Phone::builder().with_call_list(true).build();
        let recorder = RecordingListener::attach(phone.bus());
        let call = phone.create_call(None);

        call.set_primary(true);
        let channels: Vec<Channel> = recorder
            .notifications()
            .into_iter()
            .filter(|n| n.event == CallEvent::Promoted)
            .map(|n| n.channel)
            .collect();
        assert_eq!(channels, vec![Channel::Call, Channel::Primary, Channel::PrimaryUpdate]);
        let names = recorder.names();
        let connected = names.iter().position(|name| name == "call.local.mediaStream.connect");
        let promoted = names.iter().position(|name| name == "call.promoted");
        assert!(connected < promoted);

        call.clear_primary(false);
        assert_eq!(recorder.count("call.primary.demoted"), 0);
        assert_eq!(recorder.count("call.local.mediaStream.disconnect"), 1);
        assert_eq!(recorder.count("call.primary.local.mediaStream.disconnect"), 0);
    }

    #[test]
    fn test_resume_unholds_established_call() {
        let phone = Phone::builder().with_call_list(true).build();
        let session = Arc::new(MemorySession::outgoing("1002"));
        session.set_established(true);
        session.set_hold(HoldStatus { local: true, remote: false });
        let call = phone.create_call(Some(session.clone()));

        call.set_primary(true);
        assert!(!call.is_on_hold());
    }

    #[test]
    fn test_demotion_aborts_transfer() {
        let phone = Phone::builder().build();
        let recorder = RecordingListener::attach(phone.bus());
        let session = Arc::new(MemorySession::outgoing("1002"));
        session.set_established(true);
        let call = phone.create_call(Some(session.clone()));

        call.transfer(None, false);
        assert!(call.is_in_transfer());

        call.clear_primary(false);
        assert!(!call.is_in_transfer());
        assert_eq!(recorder.names_ending_with("transfer.failed"), vec![
            "call.transfer.failed",
            "call.primary.transfer.failed",
        ]);
        assert!(!call.is_on_hold());
    }
}
