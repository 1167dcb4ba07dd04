//! Full lifecycle runs against a scripted module host over in-process
//! channels.

mod common;

use common::*;
use outprocess_proxy::control::ControlFrame;
use outprocess_proxy::{proxy, ChannelBroker, GatewayMessage, LifecycleMode, LifecycleState};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn sync_happy_path_runs_create_start_receive_destroy() {
    let config = fast_config("happy");
    let (control, message) = bind_host(&config).await;
    let mut frames = script_control(control, 0, Duration::ZERO);

    let (broker, mut published) = ChannelBroker::new();
    let handle = proxy::create(Arc::new(broker), config)
        .await
        .expect("sync create succeeds when the host acknowledges");
    assert_eq!(handle.state(), LifecycleState::Ready);
    assert!(matches!(
        expect_frame(&mut frames).await,
        ControlFrame::Create { .. }
    ));

    handle.start().await.expect("start succeeds");
    assert_eq!(handle.state(), LifecycleState::Running);
    assert!(matches!(expect_frame(&mut frames).await, ControlFrame::Start));

    // Gateway to module: one receive call shows up as one framed message.
    let outgoing = GatewayMessage::new(b"to-module".to_vec()).with_property("hop", "out");
    handle.receive(&outgoing).await;
    assert_eq!(recv_gateway_message(&message).await, outgoing);

    // Module to gateway: a frame on the message channel reaches the broker.
    let inbound = GatewayMessage::new(b"to-gateway".to_vec()).with_property("hop", "in");
    message.send(inbound.to_bytes().unwrap()).await.unwrap();
    let (source, delivered) = tokio::time::timeout(STEP_TIMEOUT, published.recv())
        .await
        .expect("timed out waiting for a publish")
        .expect("broker stream open");
    assert_eq!(source, handle.id());
    assert_eq!(delivered, inbound);

    handle.destroy().await;
    assert!(matches!(
        expect_frame(&mut frames).await,
        ControlFrame::Destroy
    ));
}

#[tokio::test]
async fn async_create_with_delayed_reply_still_delivers_early_messages() {
    let mut config = fast_config("delayed");
    config.lifecycle = LifecycleMode::Async;
    let (control, message) = bind_host(&config).await;
    let mut frames = script_control(control, 0, Duration::from_millis(200));

    let (broker, _published) = ChannelBroker::new();
    let handle = proxy::create(Arc::new(broker), config)
        .await
        .expect("async create returns a live handle immediately");
    // the handshake has not settled yet
    assert!(matches!(
        handle.state(),
        LifecycleState::Handshaking | LifecycleState::Ready
    ));

    handle.start().await.expect("start succeeds mid-handshake");

    // Enqueue before the host has acknowledged creation.
    let first = GatewayMessage::new(b"first".to_vec());
    let second = GatewayMessage::new(b"second".to_vec());
    handle.receive(&first).await;
    handle.receive(&second).await;

    assert_eq!(recv_gateway_message(&message).await, first);
    assert_eq!(recv_gateway_message(&message).await, second);

    // The delayed reply eventually lands and the handshake settles.
    let handle_probe = handle.clone();
    wait_until(move || {
        matches!(
            handle_probe.state(),
            LifecycleState::Ready | LifecycleState::Running
        )
    })
    .await;
    assert!(matches!(
        expect_frame(&mut frames).await,
        ControlFrame::Create { .. }
    ));

    handle.destroy().await;
}

#[tokio::test]
async fn destroy_with_unreachable_remote_stays_bounded() {
    let config = fast_config("unreachable");
    let (control, message) = bind_host(&config).await;
    let mut frames = script_control(control.clone(), 0, Duration::ZERO);

    let (broker, _published) = ChannelBroker::new();
    let handle = proxy::create(Arc::new(broker), config).await.expect("create");
    handle.start().await.expect("start");
    assert!(matches!(
        expect_frame(&mut frames).await,
        ControlFrame::Create { .. }
    ));

    // The host process goes away entirely.
    control.close();
    message.close();

    // Destroy must give up on the destroy frame after its bounded retries
    // and still join everything promptly.
    tokio::time::timeout(Duration::from_secs(2), handle.destroy())
        .await
        .expect("destroy completes despite an unreachable host");
}

#[tokio::test]
async fn sync_create_gives_up_when_nobody_answers() {
    let mut config = fast_config("silent");
    config.handshake_attempts = Some(4);
    config.remote_message_wait_ms = 10;

    // Bind the host side but never answer anything.
    let (_control, _message) = bind_host(&config).await;

    let (broker, _published) = ChannelBroker::new();
    let started = tokio::time::Instant::now();
    let handle = proxy::create(Arc::new(broker), config).await;
    assert!(handle.is_none(), "create must report failure");
    // 4 attempts at ~10ms each plus overhead, nowhere near the step timeout
    assert!(started.elapsed() < STEP_TIMEOUT);
}
