//! Recovery after the module host reports failure mid-run.

mod common;

use common::*;
use outprocess_proxy::control::ControlFrame;
use outprocess_proxy::transport;
use outprocess_proxy::{proxy, ChannelBroker, GatewayMessage, LifecycleState};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn failure_reply_triggers_rehandshake_and_restart() {
    let config = fast_config("reattach");
    let (control, message) = bind_host(&config).await;
    let mut frames = script_control(control.clone(), 0, Duration::ZERO);

    let (broker, _published) = ChannelBroker::new();
    let handle = proxy::create(Arc::new(broker), config.clone())
        .await
        .expect("create");
    handle.start().await.expect("start");
    assert!(matches!(
        expect_frame(&mut frames).await,
        ControlFrame::Create { .. }
    ));
    assert!(matches!(expect_frame(&mut frames).await, ControlFrame::Start));

    // The host's module dies: its message endpoint disappears and the host
    // reports the failure on the control channel.
    message.close();
    let failure = (ControlFrame::Reply { status: 1 }).encode().unwrap();
    control.send(failure).await.unwrap();

    // Messages enqueued while the host is down are held, not lost.
    let m1 = GatewayMessage::new(b"m1".to_vec());
    let m2 = GatewayMessage::new(b"m2".to_vec());
    let m3 = GatewayMessage::new(b"m3".to_vec());
    handle.receive(&m1).await;
    handle.receive(&m2).await;
    handle.receive(&m3).await;

    // The monitor notices, re-runs the handshake, and restarts the host.
    assert!(matches!(
        expect_frame(&mut frames).await,
        ControlFrame::Create { .. }
    ));
    assert!(matches!(expect_frame(&mut frames).await, ControlFrame::Start));

    // The host's replacement module endpoint picks the queue up in order.
    let message = transport::bind(&config.message_uri).await.unwrap();
    assert_eq!(recv_gateway_message(&message).await, m1);
    assert_eq!(recv_gateway_message(&message).await, m2);
    assert_eq!(recv_gateway_message(&message).await, m3);

    let handle_probe = handle.clone();
    wait_until(move || handle_probe.state() == LifecycleState::Running).await;
    handle.destroy().await;
}

#[tokio::test]
async fn success_replies_do_not_trigger_reattach() {
    let config = fast_config("benign-reply");
    let (control, _message) = bind_host(&config).await;
    let mut frames = script_control(control.clone(), 0, Duration::ZERO);

    let (broker, _published) = ChannelBroker::new();
    let handle = proxy::create(Arc::new(broker), config).await.expect("create");
    handle.start().await.expect("start");
    assert!(matches!(
        expect_frame(&mut frames).await,
        ControlFrame::Create { .. }
    ));
    assert!(matches!(expect_frame(&mut frames).await, ControlFrame::Start));

    // A stray success reply is not a detach signal.
    let benign = (ControlFrame::Reply { status: 0 }).encode().unwrap();
    control.send(benign).await.unwrap();

    // Give the monitor a couple of poll rounds; no new create may appear.
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(
        frames.try_recv().is_err(),
        "monitor must not re-handshake on a success reply"
    );
    assert_eq!(handle.state(), LifecycleState::Running);

    handle.destroy().await;
}
