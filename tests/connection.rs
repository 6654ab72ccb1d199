//! Connect retries, link loss and adapter state.

mod common;

use std::time::Duration;

use gattq::prelude::*;
use gattq::simulated::SimPeripheral;
use gattq::{GattCommand, Response};
use rstest::rstest;

use common::*;

#[tokio::test(start_paused = true)]
async fn test_connect_retries_until_success() {
    let peripheral = SimPeripheral::new();
    peripheral.fail_connects(2, GattStatus::GATT_ERROR);
    let client = spawn(&peripheral);

    let attempts = Counter::default();
    let on_attempt = attempts.clone();
    client
        .execute(
            ConnectOperation::new(peripheral.peer())
                .retry(3, Duration::from_millis(200))
                .before(move |_| on_attempt.hit()),
        )
        .await
        .unwrap();

    assert_eq!(peripheral.connect_attempts(), 3);
    assert_eq!(attempts.get(), 3);
    assert!(client.link_status().connected);
}

#[rstest]
#[case(0)]
#[case(1)]
#[case(4)]
#[tokio::test(start_paused = true)]
async fn test_connect_makes_retries_plus_one_attempts(#[case] retries: u32) {
    let peripheral = SimPeripheral::new();
    peripheral.fail_connects(10, GattStatus::GATT_ERROR);
    let client = spawn(&peripheral);

    let err = client
        .execute(ConnectOperation::new(peripheral.peer()).retry(retries, Duration::from_millis(50)))
        .await
        .unwrap_err();

    assert_eq!(err, GattError::Failed(GattStatus::GATT_ERROR));
    assert_eq!(peripheral.connect_attempts(), retries as usize + 1);
    assert!(!client.link_status().connected);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_peer_times_out_without_retrying() {
    let peripheral = SimPeripheral::new();
    peripheral.fail_connects(1, GattStatus::UNREACHABLE);
    let client = spawn(&peripheral);

    let err = client
        .execute(ConnectOperation::new(peripheral.peer()).retry(5, Duration::from_millis(50)))
        .await
        .unwrap_err();

    assert_eq!(err, GattError::Timeout);
    assert_eq!(peripheral.connect_attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_auto_connect_is_used_after_first_attempt() {
    let peripheral = SimPeripheral::new();
    peripheral.fail_connects(1, GattStatus::GATT_ERROR);
    let client = spawn(&peripheral);

    client
        .execute(
            ConnectOperation::new(peripheral.peer())
                .retry(1, Duration::from_millis(10))
                .use_auto_connect(true),
        )
        .await
        .unwrap();

    let paths: Vec<_> = peripheral
        .commands()
        .into_iter()
        .filter_map(|command| match command {
            GattCommand::Connect { path, .. } => Some(path),
            _ => None,
        })
        .collect();
    assert_eq!(
        paths,
        vec![
            gattq::operation::ConnectPath::Direct,
            gattq::operation::ConnectPath::AutoConnect
        ]
    );
}

#[tokio::test]
async fn test_connect_when_connected_succeeds_immediately() {
    let peripheral = SimPeripheral::new();
    let client = connected(&peripheral).await;

    client
        .execute(ConnectOperation::new(peripheral.peer()))
        .await
        .unwrap();
    assert_eq!(peripheral.connect_attempts(), 1);
}

#[tokio::test]
async fn test_disconnect_when_disconnected_succeeds_immediately() {
    let peripheral = SimPeripheral::new();
    let client = connected(&peripheral).await;

    client.execute(SimpleOperation::disconnect()).await.unwrap();
    client.execute(SimpleOperation::disconnect()).await.unwrap();

    let disconnects = peripheral
        .command_kinds()
        .into_iter()
        .filter(|kind| *kind == OperationKind::Disconnect)
        .count();
    assert_eq!(disconnects, 1);
    assert!(!client.link_status().connected);
}

#[tokio::test]
async fn test_link_loss_fails_pending_but_keeps_connects() {
    let peripheral = SimPeripheral::new();
    let client = connected(&peripheral).await;
    peripheral.stall_next(OperationKind::Read);

    let read = client.enqueue(ReadOperation::characteristic(info()));
    let rssi = client.enqueue(RssiOperation::read_rssi());
    let reconnect = client.enqueue(ConnectOperation::new(peripheral.peer()));
    tokio::task::yield_now().await;

    peripheral.drop_link(GattStatus::GATT_ERROR);

    assert_eq!(read.await.unwrap_err(), GattError::Disconnected);
    assert_eq!(rssi.await.unwrap_err(), GattError::Disconnected);
    reconnect.await.unwrap();
    assert!(client.link_status().connected);
    assert_eq!(peripheral.connect_attempts(), 2);
}

#[tokio::test]
async fn test_adapter_disabled_fails_everything() {
    let peripheral = SimPeripheral::new();
    let client = connected(&peripheral).await;
    peripheral.stall_next(OperationKind::ReadRssi);

    let rssi = client.enqueue(RssiOperation::read_rssi());
    let connect = client.enqueue(ConnectOperation::new(peripheral.peer()));
    tokio::task::yield_now().await;
    peripheral.set_adapter_enabled(false);

    assert_eq!(rssi.await.unwrap_err(), GattError::AdapterDisabled);
    assert_eq!(connect.await.unwrap_err(), GattError::AdapterDisabled);

    let err = client
        .execute(ConnectOperation::new(peripheral.peer()))
        .await
        .unwrap_err();
    assert_eq!(err, GattError::AdapterDisabled);
    assert!(!client.link_status().adapter_enabled);

    peripheral.set_adapter_enabled(true);
    tokio::task::yield_now().await;
    client
        .execute(ConnectOperation::new(peripheral.peer()))
        .await
        .unwrap();
    assert!(client.link_status().connected);
}

#[tokio::test]
async fn test_status_changes_track_link() {
    let peripheral = SimPeripheral::new();
    let client = spawn(&peripheral);
    let mut status = client.status_changes();
    assert!(!status.borrow().connected);

    client
        .execute(ConnectOperation::new(peripheral.peer()))
        .await
        .unwrap();
    status.changed().await.unwrap();
    let snapshot = status.borrow_and_update().clone();
    assert!(snapshot.connected);
    assert_eq!(snapshot.peer, Some(peripheral.peer()));
    assert_eq!(snapshot.mtu, 23);

    client
        .execute(MtuOperation::request_mtu(247))
        .await
        .unwrap();
    assert_eq!(client.link_status().mtu, 247);

    peripheral.drop_link(GattStatus::GATT_ERROR);
    status
        .wait_for(|status| !status.connected)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_late_completion_after_disconnect_is_ignored() {
    let peripheral = SimPeripheral::new();
    let client = connected(&peripheral).await;
    client.execute(SimpleOperation::disconnect()).await.unwrap();

    peripheral.complete_pending(GattStatus::SUCCESS, Response::None);
    let err = client
        .execute(RssiOperation::read_rssi())
        .await
        .unwrap_err();
    assert_eq!(err, GattError::Disconnected);
}
