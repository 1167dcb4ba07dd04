//! Shared helpers for driving a proxy against a scripted module host.

#![allow(dead_code)]

use outprocess_proxy::control::ControlFrame;
use outprocess_proxy::transport::{self, PairChannel};
use outprocess_proxy::{GatewayMessage, ProxyConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

/// How long a test is willing to wait for any single protocol step.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// A configuration pointing at in-process endpoints, tuned for fast test
/// turnaround.
pub fn fast_config(tag: &str) -> ProxyConfig {
    let mut config = ProxyConfig::new(
        format!("inproc://{tag}/control"),
        format!("inproc://{tag}/message"),
        r#"{"module": "test"}"#,
    );
    config.remote_message_wait_ms = 25;
    config
}

/// Bind the module-host side of both channels.
pub async fn bind_host(
    config: &ProxyConfig,
) -> (Arc<dyn PairChannel>, Arc<dyn PairChannel>) {
    let control = transport::bind(&config.control_uri).await.expect("bind control");
    let message = transport::bind(&config.message_uri).await.expect("bind message");
    (control, message)
}

/// Script the host's control endpoint: every observed frame is forwarded to
/// the returned stream, and every create frame is answered with a reply of
/// the given status after `delay`.
pub fn script_control(
    channel: Arc<dyn PairChannel>,
    status: i32,
    delay: Duration,
) -> UnboundedReceiver<ControlFrame> {
    let (seen, frames) = unbounded_channel();
    tokio::spawn(async move {
        while let Ok(bytes) = channel.recv().await {
            let Ok(frame) = ControlFrame::decode(&bytes) else {
                continue;
            };
            let is_create = matches!(frame, ControlFrame::Create { .. });
            if seen.send(frame).is_err() {
                break;
            }
            if is_create {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let reply = (ControlFrame::Reply { status }).encode().unwrap();
                let _ = channel.send(reply).await;
            }
        }
    });
    frames
}

/// Wait for the next control frame the host observed.
pub async fn expect_frame(frames: &mut UnboundedReceiver<ControlFrame>) -> ControlFrame {
    tokio::time::timeout(STEP_TIMEOUT, frames.recv())
        .await
        .expect("timed out waiting for a control frame")
        .expect("control script ended")
}

/// Receive and decode one gateway message on the host's message endpoint.
pub async fn recv_gateway_message(channel: &Arc<dyn PairChannel>) -> GatewayMessage {
    let bytes = channel
        .recv_timeout(STEP_TIMEOUT)
        .await
        .expect("timed out waiting for a gateway message");
    GatewayMessage::from_bytes(&bytes).expect("gateway message decodes")
}

/// Poll until `predicate` holds or the step timeout elapses.
pub async fn wait_until(mut predicate: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + STEP_TIMEOUT;
    while !predicate() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within the step timeout"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
