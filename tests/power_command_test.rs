//! Power commands issued through a mounted view, confirmed (or not) by the
//! status stream.

mod common;

use std::time::Duration;

use common::{identity, server_url, wait_for_state, Harness};
use panel_sync::adapters::mock::MockResponse;
use panel_sync::config::SyncConfig;
use panel_sync::connection::ConnectionState;
use panel_sync::error::{CommandError, SyncError};
use panel_sync::models::{PowerSignal, ServerStatus};
use panel_sync::power::PowerOutcome;

#[tokio::test(start_paused = true)]
async fn test_restart_confirmed_by_stream() {
    let h = Harness::new();
    let conn = h.connector.accept();
    h.http.set_response(&server_url("/power"), MockResponse::empty(204));

    let view = h.registry.mount(identity()).await.unwrap();
    wait_for_state(&view, ConnectionState::Connected).await;
    let mut outcomes = view.power_controller().subscribe_outcomes();

    view.power(PowerSignal::Restart).await.unwrap();
    let requests = h.http.get_requests();
    let power = requests.iter().find(|r| r.method == "POST").unwrap();
    assert_eq!(power.body.as_deref(), Some(r#"{"signal":"restart"}"#));

    conn.push_event("status", &["stopping"]);
    let outcome = tokio::time::timeout(Duration::from_secs(5), outcomes.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        outcome,
        PowerOutcome::Confirmed {
            signal: PowerSignal::Restart,
            status: ServerStatus::Stopping,
        }
    );
    assert!(view.power_controller().pending().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_kill_without_transition_times_out_once() {
    let config = SyncConfig::default().with_power_watchdog(Duration::from_secs(10));
    let h = Harness::with_config(config);
    h.connector.accept();
    h.http.set_response(&server_url("/power"), MockResponse::empty(204));

    let view = h.registry.mount(identity()).await.unwrap();
    wait_for_state(&view, ConnectionState::Connected).await;
    let mut outcomes = view.power_controller().subscribe_outcomes();

    view.power(PowerSignal::Kill).await.unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;

    let outcome = outcomes.try_recv().unwrap();
    let err = outcome.error().unwrap();
    assert!(err.is_timeout());
    assert_eq!(err.signal(), PowerSignal::Kill);
    assert!(outcomes.try_recv().is_err());
    assert!(view.power_controller().pending().is_none());

    // The slot is free again
    view.power(PowerSignal::Start).await.unwrap();
    assert_eq!(
        view.power_controller().pending().map(|p| p.signal),
        Some(PowerSignal::Start)
    );
}

#[tokio::test(start_paused = true)]
async fn test_conflicting_command_rejected_locally() {
    let h = Harness::new();
    h.connector.accept();
    h.http.set_response(&server_url("/power"), MockResponse::empty(204));

    let view = h.registry.mount(identity()).await.unwrap();
    view.power(PowerSignal::Stop).await.unwrap();

    let err = view.power(PowerSignal::Start).await.unwrap_err();
    assert!(matches!(
        err.as_command(),
        Some(CommandError::Conflicting { .. })
    ));
    assert_eq!(h.http.request_count("POST", &server_url("/power")), 1);
    assert!(matches!(err.inner(), SyncError::Command(_)));
}
