//! Integration tests for primary call arbitration and event fan-out
//!
//! Covers the single-primary rule across calls managed by a call list, the
//! hold/resume round trip on demotion and promotion, and the exact order of
//! fanned-out notifications.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use softphone_call_core::memory::{MemorySession, RecordingListener, SessionOp};
use softphone_call_core::{
    Call, CallList, CallStatus, Channel, DtmfOptions, HoldStatus, Notification, Phone,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("softphone_call_core=debug")
        .with_test_writer()
        .try_init();
}

fn established_call(phone: &Phone, user: &str) -> (Arc<Call>, Arc<MemorySession>) {
    let session = Arc::new(MemorySession::outgoing(user));
    session.set_established(true);
    let call = phone.create_call(Some(session.clone()));
    (call, session)
}

fn primary_count(list: &CallList) -> usize {
    list.calls().iter().filter(|call| call.is_primary()).count()
}

/// Test that a standalone call without a call list promotes itself
#[test]
fn test_standalone_call_is_primary_immediately() {
    init_tracing();

    let phone = Phone::builder().build();
    let call = phone.create_call(None);

    assert!(call.is_primary());
    assert_eq!(call.status(), CallStatus::Idle);
}

/// Test that at most one call is primary at every observation point
#[test]
fn test_primary_uniqueness_across_switches() {
    init_tracing();

    let phone = Phone::builder().with_call_list(true).build();
    let list = Arc::clone(phone.call_list().unwrap());

    // every notification is an observation point
    let violations = Arc::new(Mutex::new(0usize));
    let observed: Weak<CallList> = Arc::downgrade(&list);
    let counter = Arc::clone(&violations);
    phone.bus().subscribe(Arc::new(move |_: &Notification| {
        if let Some(list) = observed.upgrade() {
            if primary_count(&list) > 1 {
                *counter.lock() += 1;
            }
        }
    }));

    let calls: Vec<Arc<Call>> = (0..3)
        .map(|i| established_call(&phone, &format!("10{}", i)).0)
        .collect();
    assert_eq!(primary_count(&list), 0);

    for index in [0, 1, 1, 2, 0, 2, 1] {
        assert!(list.switch_to(calls[index].id()));
        assert_eq!(primary_count(&list), 1);
        assert!(calls[index].is_primary());
    }

    list.clear_primary();
    assert_eq!(primary_count(&list), 0);
    assert_eq!(*violations.lock(), 0);
}

/// Test that concurrent switches still leave exactly one primary
#[test]
fn test_concurrent_switches() {
    init_tracing();

    let phone = Phone::builder().with_call_list(true).build();
    let list = Arc::clone(phone.call_list().unwrap());
    let calls: Vec<Arc<Call>> = (0..4).map(|_| phone.create_call(None)).collect();

    let handles: Vec<_> = calls
        .iter()
        .map(|call| {
            let list = Arc::clone(&list);
            let id = call.id().clone();
            std::thread::spawn(move || {
                for _ in 0..25 {
                    list.switch_to(&id);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(primary_count(&list), 1);
}

/// Test that a listener switching calls from inside a switch does not block
#[test]
fn test_switch_from_listener() {
    init_tracing();

    let phone = Phone::builder().with_call_list(true).build();
    let list = Arc::clone(phone.call_list().unwrap());
    let (first, _) = established_call(&phone, "1001");
    let (second, _) = established_call(&phone, "1002");

    // moving away from the second call sends focus back to the first
    let observed: Weak<CallList> = Arc::downgrade(&list);
    let watched = second.id().clone();
    let fallback = first.id().clone();
    phone.bus().subscribe(Arc::new(move |notification: &Notification| {
        if notification.name() == "call.demoted" && notification.call_id == watched {
            if let Some(list) = observed.upgrade() {
                list.switch_to(&fallback);
            }
        }
    }));

    let (done_tx, done_rx) = std::sync::mpsc::channel();
    let switching = {
        let list = Arc::clone(&list);
        let (first, second) = (first.id().clone(), second.id().clone());
        std::thread::spawn(move || {
            list.switch_to(&second);
            list.switch_to(&first);
            let _ = done_tx.send(());
        })
    };

    assert!(done_rx.recv_timeout(Duration::from_secs(3)).is_ok(), "switch did not complete");
    switching.join().unwrap();
    assert!(first.is_primary());
    assert!(!second.is_primary());
    assert!(second.is_on_hold());
    assert_eq!(primary_count(&list), 1);
}

/// Test that demotion with pause holds and promotion with resume unholds
#[test]
fn test_promotion_demotion_round_trip() {
    init_tracing();

    let phone = Phone::builder().with_call_list(true).build();
    let list = phone.call_list().unwrap();
    let (call, session) = established_call(&phone, "1001");

    list.switch_to(call.id());
    assert!(call.is_primary());
    assert!(!call.is_on_hold());

    call.clear_primary(true);
    assert!(!call.is_primary());
    assert!(call.is_on_hold());
    assert_eq!(call.status(), CallStatus::Held);

    call.set_primary(true);
    assert!(call.is_primary());
    assert!(!call.is_on_hold());
    assert_eq!(call.status(), CallStatus::Active);

    assert_eq!(session.count(|op| *op == SessionOp::Hold), 1);
    assert_eq!(session.count(|op| *op == SessionOp::Unhold), 1);
}

/// Test that demotion without pause and promotion without resume leave hold alone
#[test]
fn test_no_pause_no_resume() {
    init_tracing();

    let phone = Phone::builder().with_call_list(true).build();
    let (call, session) = established_call(&phone, "1001");

    call.set_primary(false);
    call.clear_primary(false);
    assert!(!call.is_on_hold());

    session.set_hold(HoldStatus { local: false, remote: true });
    call.set_primary(false);
    assert!(call.is_on_hold());
    assert_eq!(session.count(|op| *op == SessionOp::Unhold), 0);
}

/// Test that a held established call is unheld when promoted with resume
#[test]
fn test_held_call_unheld_by_promotion() {
    init_tracing();

    let phone = Phone::builder().with_call_list(true).build();
    let (call, session) = established_call(&phone, "1001");
    session.set_hold(HoldStatus { local: true, remote: false });
    assert!(call.is_on_hold());

    call.set_primary(true);
    assert!(!call.is_on_hold());
}

/// Test the exact fan-out sequence for a primary call
#[test]
fn test_fan_out_order_for_primary_call() {
    init_tracing();

    let phone = Phone::builder().build();
    let (call, _session) = established_call(&phone, "1001");
    let recorder = RecordingListener::attach(phone.bus());
    assert!(call.is_primary());

    call.send_dtmf("5", DtmfOptions::default());

    assert_eq!(
        recorder.names(),
        vec!["call.send.dtmf", "call.primary.send.dtmf", "call.primary.update"]
    );
    let notifications = recorder.notifications();
    assert_eq!(
        notifications.iter().map(|n| n.channel).collect::<Vec<_>>(),
        vec![Channel::Call, Channel::Primary, Channel::PrimaryUpdate]
    );
    assert_eq!(notifications[2].update_type().as_deref(), Some("send.dtmf"));
    assert!(notifications.iter().all(|n| n.phone_id == phone.id() && &n.call_id == call.id()));
    // every copy carries the same payload
    assert!(notifications.windows(2).all(|pair| pair[0].event == pair[1].event));
}

/// Test that a non-primary call only publishes on the call channel
#[test]
fn test_no_fan_out_for_secondary_call() {
    init_tracing();

    let phone = Phone::builder().with_call_list(true).build();
    let (call, _session) = established_call(&phone, "1001");
    let recorder = RecordingListener::attach(phone.bus());
    assert!(!call.is_primary());

    call.send_dtmf("5", DtmfOptions::default());

    assert_eq!(recorder.names(), vec!["call.send.dtmf"]);
}

/// Test the notifications published while switching between calls
#[test]
fn test_switch_notifications() {
    init_tracing();

    let phone = Phone::builder().with_call_list(true).build();
    let list = phone.call_list().unwrap();
    let (first, _) = established_call(&phone, "1001");
    let (second, _) = established_call(&phone, "1002");
    list.switch_to(first.id());

    let recorder = RecordingListener::attach(phone.bus());
    list.switch_to(second.id());

    let first_names = recorder.names_for(first.id());
    // the flag is cleared before sinks disconnect, so disconnection is not fanned out
    assert!(first_names.contains(&"call.local.mediaStream.disconnect".to_string()));
    assert!(!first_names.contains(&"call.primary.local.mediaStream.disconnect".to_string()));
    assert_eq!(first_names.last().map(String::as_str), Some("call.demoted"));
    assert!(!first_names.iter().any(|name| name.contains("primary.demoted")));

    let second_names = recorder.names_for(second.id());
    assert_eq!(second_names.first().map(String::as_str), Some("call.remote.mediaStream.connect"));
    assert!(second_names.contains(&"call.primary.remote.audio.connect".to_string()));
    // promotion is announced last and reaches the primary channels
    assert_eq!(
        &second_names[second_names.len() - 3..],
        ["call.promoted", "call.primary.promoted", "call.primary.update"]
    );

    // demotion of the old primary completes before the new one connects
    let names = recorder.names();
    let demoted = names.iter().position(|name| name == "call.demoted").unwrap();
    let connected = names.iter().position(|name| name == "call.remote.mediaStream.connect").unwrap();
    assert!(demoted < connected);
}

/// Test that a placeholder call without session only announces stream connection
#[test]
fn test_connect_without_session() {
    init_tracing();

    let phone = Phone::builder().with_call_list(true).build();
    let call = phone.create_call(None);
    let recorder = RecordingListener::attach(phone.bus());

    call.set_primary(true);

    let names = recorder.call_channel_names();
    assert_eq!(
        names,
        vec![
            "call.remote.mediaStream.connect",
            "call.local.mediaStream.connect",
            "call.promoted",
        ]
    );
}
