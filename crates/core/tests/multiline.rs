//! Manual multi-line supervisor integration tests

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{advance, settle};
use powerdial_core::prelude::*;

const FROM: &str = "+15550100";

fn supervisor(telephony: SimulatedTelephony) -> (MultiLineSupervisor, Arc<SimulatedTelephony>) {
    let telephony = Arc::new(telephony);
    let supervisor = MultiLineSupervisor::new(MultiLineConfig::default(), telephony.clone());
    (supervisor, telephony)
}

async fn dial(supervisor: &MultiLineSupervisor, to: &str) -> ManualDialerCall {
    let call = supervisor.start_call(None, to, FROM).await.expect("call placed");
    settle().await;
    call
}

#[tokio::test(start_paused = true)]
async fn test_fourth_call_refused_without_side_effects() {
    let (supervisor, telephony) = supervisor(SimulatedTelephony::new());
    for to in ["+15551001", "+15551002", "+15551003"] {
        dial(&supervisor, to).await;
    }
    let before = supervisor.calls();

    let err = supervisor.start_call(None, "+15551004", FROM).await.unwrap_err();

    assert!(matches!(err, DialerError::LineLimitReached { limit: 3 }));
    assert_eq!(supervisor.calls(), before);
    assert_eq!(telephony.originations().len(), 3);
    assert!(telephony.hangups().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_first_connected_call_becomes_primary() {
    let (supervisor, telephony) = supervisor(SimulatedTelephony::new());
    let a = dial(&supervisor, "+15551001").await;
    let b = dial(&supervisor, "+15551002").await;
    telephony.ring(&b.handle).unwrap();
    settle().await;

    telephony.answer(&a.handle).unwrap();
    settle().await;

    let primary = supervisor.primary_call().expect("primary assigned");
    assert_eq!(primary.id, a.id);
    assert_eq!(primary.status, ManualCallStatus::Connected);
    assert!(primary.connected_at.is_some());
    assert_eq!(telephony.audio_focus(), Some(a.handle.clone()));

    // Ringing lines are cleared once someone picks up
    assert!(telephony.was_hung_up(&b.handle));
    assert_eq!(supervisor.call(b.id).unwrap().status, ManualCallStatus::Ended);
    assert_eq!(supervisor.live_call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_switch_primary_requires_connected_call() {
    let (supervisor, telephony) = supervisor(SimulatedTelephony::new());
    let a = dial(&supervisor, "+15551001").await;
    telephony.answer(&a.handle).unwrap();
    settle().await;
    let b = dial(&supervisor, "+15551002").await;

    assert!(!supervisor.switch_primary_call(b.id).await);
    assert_eq!(supervisor.primary_call().unwrap().id, a.id);
    assert_eq!(supervisor.call(b.id).unwrap().status, ManualCallStatus::Ringing);

    telephony.answer(&b.handle).unwrap();
    settle().await;
    assert_eq!(supervisor.primary_call().unwrap().id, a.id);

    assert!(supervisor.switch_primary_call(b.id).await);
    assert_eq!(supervisor.primary_call().unwrap().id, b.id);
    assert_eq!(telephony.audio_focus(), Some(b.handle.clone()));
    assert_eq!(supervisor.call(a.id).unwrap().status, ManualCallStatus::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_primary_ending_moves_focus() {
    let (supervisor, telephony) = supervisor(SimulatedTelephony::new());
    let a = dial(&supervisor, "+15551001").await;
    telephony.answer(&a.handle).unwrap();
    settle().await;
    let b = dial(&supervisor, "+15551002").await;
    telephony.answer(&b.handle).unwrap();
    settle().await;
    let mut events = supervisor.subscribe();

    telephony.remote_hangup(&a.handle).unwrap();
    settle().await;

    assert_eq!(supervisor.call(a.id).unwrap().status, ManualCallStatus::Ended);
    assert_eq!(supervisor.primary_call().unwrap().id, b.id);
    assert_eq!(telephony.audio_focus(), Some(b.handle.clone()));

    let mut primary_changes = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let MultiLineEvent::PrimaryChanged { call_id } = event {
            primary_changes.push(call_id);
        }
    }
    assert_eq!(primary_changes, vec![Some(b.id)]);
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_call_fails_and_frees_line() {
    let (supervisor, telephony) = supervisor(SimulatedTelephony::new());
    let calls = [
        dial(&supervisor, "+15551001").await,
        dial(&supervisor, "+15551002").await,
        dial(&supervisor, "+15551003").await,
    ];

    telephony.set_state(&calls[0].handle, TelephonyCallState::Rejected).unwrap();
    settle().await;

    assert_eq!(supervisor.call(calls[0].id).unwrap().status, ManualCallStatus::Failed);
    assert!(supervisor.primary_call().is_none());
    assert_eq!(supervisor.live_call_count(), 2);
    assert!(supervisor.start_call(None, "+15551004", FROM).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_hang_up_and_dismiss() {
    let (supervisor, telephony) = supervisor(SimulatedTelephony::new());
    let a = dial(&supervisor, "+15551001").await;
    telephony.answer(&a.handle).unwrap();
    settle().await;

    // Live calls cannot be dismissed
    assert!(!supervisor.dismiss_call(a.id));

    supervisor.hang_up_call(a.id).await.unwrap();
    settle().await;
    assert!(telephony.was_hung_up(&a.handle));
    let ended = supervisor.call(a.id).unwrap();
    assert_eq!(ended.status, ManualCallStatus::Ended);
    assert!(ended.ended_at.is_some());
    assert!(supervisor.primary_call().is_none());

    assert!(supervisor.dismiss_call(a.id));
    assert!(supervisor.call(a.id).is_none());

    let unknown = supervisor.hang_up_call(CallId::from_u128(0x5eed)).await.unwrap_err();
    assert!(matches!(unknown, DialerError::NotFound(_)));
}

#[tokio::test(start_paused = true)]
async fn test_dismiss_all_ended_keeps_live_calls() {
    let (supervisor, telephony) = supervisor(SimulatedTelephony::new());
    let a = dial(&supervisor, "+15551001").await;
    let b = dial(&supervisor, "+15551002").await;
    let c = dial(&supervisor, "+15551003").await;
    telephony.set_state(&a.handle, TelephonyCallState::Cancel).unwrap();
    telephony.set_state(&b.handle, TelephonyCallState::Failed).unwrap();
    settle().await;

    assert_eq!(supervisor.dismiss_all_ended(), 2);
    let remaining = supervisor.calls();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, c.id);
}

#[tokio::test(start_paused = true)]
async fn test_blank_number_refused() {
    let (supervisor, telephony) = supervisor(SimulatedTelephony::new());
    let contact = ContactSummary::new("c-9", "Blank");

    let err = supervisor.start_call(Some(&contact), "  ", FROM).await.unwrap_err();

    assert!(matches!(err, DialerError::NoPhoneNumber(_)));
    assert!(telephony.originations().is_empty());
    assert_eq!(supervisor.live_call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_origination_failure_releases_reservation() {
    let (supervisor, telephony) = supervisor(SimulatedTelephony::new());
    telephony.fail_calls_to("+15551009");

    assert!(supervisor.start_call(None, "+15551009", FROM).await.is_err());
    for to in ["+15551001", "+15551002", "+15551003"] {
        dial(&supervisor, to).await;
    }
    assert_eq!(supervisor.live_call_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_start_call_gives_line_back() {
    let (supervisor, telephony) = supervisor(SimulatedTelephony::new());
    telephony.stall_calls_to("+15551999");

    for _ in 0..3 {
        let attempt = tokio::time::timeout(
            Duration::from_secs(5),
            supervisor.start_call(None, "+15551999", FROM),
        )
        .await;
        assert!(attempt.is_err());
    }
    assert_eq!(supervisor.live_call_count(), 0);
    assert!(supervisor.calls().is_empty());

    for to in ["+15551001", "+15551002", "+15551003"] {
        dial(&supervisor, to).await;
    }
    assert_eq!(supervisor.live_call_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_contact_details_carried_on_call() {
    let (supervisor, _telephony) = supervisor(SimulatedTelephony::new());
    let contact = ContactSummary::new("c-1", "Morgan Buyer").with_phone("+15551001");

    let call = supervisor
        .start_call(Some(&contact), "+15551001", FROM)
        .await
        .unwrap();

    assert_eq!(call.contact_id, Some(ContactId::from("c-1")));
    assert_eq!(call.contact_name.as_deref(), Some("Morgan Buyer"));
    assert_eq!(call.status, ManualCallStatus::Ringing);
    assert_eq!(call.from_number, FROM);
}

#[tokio::test(start_paused = true)]
async fn test_polling_backend_connects_calls() {
    let (supervisor, telephony) = supervisor(SimulatedTelephony::polling());
    let a = dial(&supervisor, "+15551001").await;

    telephony.answer(&a.handle).unwrap();
    advance(Duration::from_secs(1)).await;
    assert_eq!(supervisor.primary_call().unwrap().id, a.id);

    telephony.remote_hangup(&a.handle).unwrap();
    advance(Duration::from_secs(1)).await;
    assert_eq!(supervisor.call(a.id).unwrap().status, ManualCallStatus::Ended);
    assert_eq!(supervisor.live_call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_ends_every_call() {
    let (supervisor, telephony) = supervisor(SimulatedTelephony::new());
    let a = dial(&supervisor, "+15551001").await;
    telephony.answer(&a.handle).unwrap();
    settle().await;
    let b = dial(&supervisor, "+15551002").await;

    supervisor.shutdown().await;
    settle().await;

    assert!(telephony.was_hung_up(&a.handle));
    assert!(telephony.was_hung_up(&b.handle));
    assert_eq!(supervisor.live_call_count(), 0);
    assert!(supervisor.primary_call().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_poll_failure_limit_is_configurable() {
    let telephony = Arc::new(SimulatedTelephony::polling());
    let config = MultiLineConfig {
        max_poll_failures: 1,
        ..Default::default()
    };
    let supervisor = MultiLineSupervisor::new(config, telephony.clone());
    let a = dial(&supervisor, "+15551001").await;

    telephony.fail_next_polls(&a.handle, 1);
    advance(Duration::from_secs(1)).await;

    assert_eq!(supervisor.call(a.id).unwrap().status, ManualCallStatus::Ended);
    assert_eq!(supervisor.live_call_count(), 0);
}
