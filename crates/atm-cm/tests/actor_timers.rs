//! Actor integration tests.
//!
//! Exercise the `ConnectionManagerHandle` end to end: messages, the circuit
//! timer wheel and graceful shutdown. The tokio clock is paused so timer
//! ticks advance instantly.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use atm_cm::adapter::Upcall;
use atm_cm::errors::CmError;
use atm_cm::manager::CircuitState;
use atm_cm::{ConnectStatus, ConnectionManagerHandle};
use atm_cm_test_utils::*;
use atm_common::{Cause, CauseValue, EndpointToken, SignalingHandle};
use bytes::Bytes;
use std::time::Duration;
use tokio::task::JoinHandle;

async fn spawn_with(
    signaling: MockSignaling,
    adapter: MockAdapter,
) -> (ConnectionManagerHandle, JoinHandle<()>) {
    init_test_tracing();
    let (handle, task) = ConnectionManagerHandle::spawn(&test_config(), Box::new(adapter));
    handle
        .attach_interface(TEST_NIF, Box::new(signaling))
        .await
        .unwrap();
    (handle, task)
}

/// Wait until the circuit table holds `count` circuits.
async fn wait_for_circuits(handle: &ConnectionManagerHandle, count: usize) -> bool {
    for _ in 0..50 {
        if handle.status().await.unwrap().circuits == count {
            return true;
        }
        tokio::time::sleep(TEST_TICK).await;
    }
    false
}

#[tokio::test(start_paused = true)]
async fn test_release_retried_on_timer_ticks() {
    let signaling = MockSignaling::builder()
        .fail_release(2, CmError::OutOfMemory)
        .build();
    let adapter = MockAdapter::new();
    let (handle, _task) = spawn_with(signaling.clone(), adapter.clone()).await;
    let endpoint = RecordingEndpoint::new();

    let (conn, status) = handle
        .connect(endpoint.clone(), EndpointToken(1), CallAttrs::outbound().build())
        .await
        .unwrap();
    assert_eq!(status, ConnectStatus::Connected);
    let circuit = handle
        .connection_info(conn)
        .await
        .unwrap()
        .and_then(|info| info.circuit)
        .unwrap();

    handle.release(conn, Cause::normal()).await.unwrap();
    let pending = handle.circuit_info(circuit).await.unwrap().unwrap();
    assert_eq!(pending.state, CircuitState::Release);
    assert!(pending.timer_armed);

    assert!(wait_for_circuits(&handle, 0).await);

    let status = handle.status().await.unwrap();
    assert_eq!(signaling.releases(), 3);
    assert_eq!(signaling.frees(), 1);
    assert_eq!(adapter.terminations(), 1);
    assert_eq!(status.stats.release_retries, 2);
    assert_eq!(status.connections, 0);
    assert!(endpoint.cleared().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_abort_clears_every_member_of_shared_circuit() {
    let (handle, _task) = spawn_with(MockSignaling::default(), MockAdapter::new()).await;
    let a = RecordingEndpoint::new();
    let b = RecordingEndpoint::new();

    let (conn_a, _) = handle
        .connect(
            a.clone(),
            EndpointToken(1),
            CallAttrs::outbound().with_llc(&LLC_IP, true).build(),
        )
        .await
        .unwrap();
    handle
        .connect(
            b.clone(),
            EndpointToken(2),
            CallAttrs::outbound().with_llc(&LLC_ARP, true).build(),
        )
        .await
        .unwrap();
    let circuit = handle
        .connection_info(conn_a)
        .await
        .unwrap()
        .and_then(|info| info.circuit)
        .unwrap();

    handle
        .abort(circuit, Cause::new(CauseValue::DestinationOutOfOrder))
        .await
        .unwrap();

    assert!(a.wait_for_events(2, Duration::from_secs(5)).await);
    assert!(b.wait_for_events(2, Duration::from_secs(5)).await);
    assert_eq!(
        a.cleared(),
        vec![(EndpointToken(1), CauseValue::DestinationOutOfOrder)]
    );
    assert_eq!(
        b.cleared(),
        vec![(EndpointToken(2), CauseValue::DestinationOutOfOrder)]
    );
    assert!(wait_for_circuits(&handle, 0).await);
    assert_eq!(handle.status().await.unwrap().stats.aborts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_incoming_call_offered_and_data_delivered() {
    let (handle, _task) = spawn_with(MockSignaling::default(), MockAdapter::new()).await;
    let listener = RecordingEndpoint::new();
    handle
        .listen(listener.clone(), EndpointToken(7), CallAttrs::listener().build())
        .await
        .unwrap();

    let circuit = handle
        .incoming_call(TEST_NIF, SignalingHandle(42), CallAttrs::incoming().build())
        .await
        .unwrap();

    // Offer and activation
    assert!(listener.wait_for_events(2, Duration::from_secs(5)).await);
    let token = listener.accepted().into_iter().next().unwrap();
    assert_eq!(listener.connected(), vec![token]);
    let info = handle.circuit_info(circuit).await.unwrap().unwrap();
    assert_eq!(info.state, CircuitState::Active);

    handle
        .upcall(circuit, Upcall::Bulk(Bytes::from_static(b"hello")))
        .await
        .unwrap();

    assert!(listener.wait_for_events(3, Duration::from_secs(5)).await);
    assert_eq!(
        listener.bulk_frames(token),
        vec![Bytes::from_static(b"hello")]
    );
}

#[tokio::test(start_paused = true)]
async fn test_incoming_call_without_listener_is_rejected() {
    let signaling = MockSignaling::default();
    let (handle, _task) = spawn_with(signaling.clone(), MockAdapter::new()).await;

    handle
        .incoming_call(TEST_NIF, SignalingHandle(42), CallAttrs::incoming().build())
        .await
        .unwrap();

    assert!(wait_for_circuits(&handle, 0).await);
    assert_eq!(
        signaling.last_reject_cause(),
        Some(CauseValue::IncompatibleDestination)
    );
    assert_eq!(handle.status().await.unwrap().stats.calls_rejected, 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_drains_circuits_before_stopping() {
    let signaling = MockSignaling::builder()
        .fail_release(2, CmError::NoBuffers)
        .build();
    let (handle, task) = spawn_with(signaling.clone(), MockAdapter::new()).await;
    let caller = RecordingEndpoint::new();
    let listener = RecordingEndpoint::new();
    handle
        .connect(caller.clone(), EndpointToken(1), CallAttrs::outbound().build())
        .await
        .unwrap();
    handle
        .listen(listener.clone(), EndpointToken(2), CallAttrs::listener().build())
        .await
        .unwrap();

    handle.shutdown().await.unwrap();

    let joined = tokio::time::timeout(Duration::from_secs(5), task).await;
    assert!(matches!(joined, Ok(Ok(()))));
    assert_eq!(
        caller.cleared(),
        vec![(EndpointToken(1), CauseValue::NormalCallClearing)]
    );
    assert_eq!(
        listener.cleared(),
        vec![(EndpointToken(2), CauseValue::NormalCallClearing)]
    );
    assert_eq!(signaling.releases(), 3);
    assert_eq!(signaling.frees(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_handle_fails_after_actor_stops() {
    let (handle, task) = spawn_with(MockSignaling::default(), MockAdapter::new()).await;

    handle.cancel();
    assert!(handle.is_cancelled());
    let joined = tokio::time::timeout(Duration::from_secs(5), task).await;
    assert!(matches!(joined, Ok(Ok(()))));

    let result = handle.status().await;
    assert!(matches!(result, Err(CmError::Internal(_))));
}

#[tokio::test(start_paused = true)]
async fn test_new_work_refused_while_draining() {
    let signaling = MockSignaling::builder()
        .fail_release(5, CmError::OutOfMemory)
        .build();
    let (handle, _task) = spawn_with(signaling, MockAdapter::new()).await;
    let caller = RecordingEndpoint::new();
    handle
        .connect(caller.clone(), EndpointToken(1), CallAttrs::outbound().build())
        .await
        .unwrap();

    handle.shutdown().await.unwrap();

    // The circuit is still retrying its release, so the actor is alive
    let result = handle
        .connect(caller, EndpointToken(2), CallAttrs::outbound().build())
        .await;
    assert_eq!(result.unwrap_err(), CmError::ShuttingDown);
}
