//! One lifecycle pass over real unix domain sockets.

mod common;

use common::*;
use outprocess_proxy::control::ControlFrame;
use outprocess_proxy::{proxy, ChannelBroker, GatewayMessage, ProxyConfig};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn lifecycle_over_unix_sockets() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = ProxyConfig::new(
        format!("ipc://{}", dir.path().join("mod.control").display()),
        format!("ipc://{}", dir.path().join("mod.message").display()),
        r#"{"module": "uds-test"}"#,
    );
    config.remote_message_wait_ms = 100;

    let (control, message) = bind_host(&config).await;
    let mut frames = script_control(control, 0, Duration::ZERO);

    let (broker, mut published) = ChannelBroker::new();
    let handle = proxy::create(Arc::new(broker), config)
        .await
        .expect("sync create over unix sockets");
    assert!(matches!(
        expect_frame(&mut frames).await,
        ControlFrame::Create { .. }
    ));

    handle.start().await.expect("start");
    assert!(matches!(expect_frame(&mut frames).await, ControlFrame::Start));

    let outgoing = GatewayMessage::new(b"over-the-socket".to_vec());
    handle.receive(&outgoing).await;
    assert_eq!(recv_gateway_message(&message).await, outgoing);

    let inbound = GatewayMessage::new(b"from-the-host".to_vec());
    message.send(inbound.to_bytes().unwrap()).await.unwrap();
    let (_, delivered) = tokio::time::timeout(STEP_TIMEOUT, published.recv())
        .await
        .expect("timed out waiting for a publish")
        .expect("broker stream open");
    assert_eq!(delivered, inbound);

    handle.destroy().await;
    assert!(matches!(
        expect_frame(&mut frames).await,
        ControlFrame::Destroy
    ));
}
