//! Controllers talking to a real relay
//!
//! Run with: cargo test -p kamera-client --test relay_session

use kamera_client::transport::RtcTransportFactory;
use kamera_client::{BroadcasterController, SignalingClient, ViewerController};
use kamera_media::{MediaSourceManager, SyntheticBackend};
use kamera_protocol::{ClientMessage, ServerMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

struct TestServer {
    addr: std::net::SocketAddr,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    async fn start() -> anyhow::Result<Self> {
        let router = kamera_server::create_app();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .ok();
        });

        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

fn factory() -> Arc<RtcTransportFactory> {
    Arc::new(RtcTransportFactory::new(vec![]).unwrap())
}

#[tokio::test]
async fn stopping_the_broadcaster_tells_viewers_it_left() {
    let server = TestServer::start().await.unwrap();

    let (signaling, _, inbound) = SignalingClient::connect(&server.ws_url()).await.unwrap();
    let media = Arc::new(MediaSourceManager::new(Arc::new(
        SyntheticBackend::from_labels(&["Back Camera"]),
    )));
    let (controller, handle) = BroadcasterController::new(signaling, inbound, factory(), media);
    let task = tokio::spawn(controller.run());
    let mut status = handle.status();
    timeout(WAIT, status.wait_for(|s| s.registered))
        .await
        .unwrap()
        .unwrap();

    let (_viewer, _, mut viewer_rx) = SignalingClient::connect(&server.ws_url()).await.unwrap();

    handle.stop().await.unwrap();
    task.await.unwrap().unwrap();

    assert_eq!(
        timeout(WAIT, viewer_rx.recv()).await.unwrap(),
        Some(ServerMessage::BroadcasterLeft)
    );
}

#[tokio::test]
async fn leaving_viewer_is_reported_to_the_broadcaster() {
    let server = TestServer::start().await.unwrap();

    let (broadcaster, _, mut broadcaster_rx) =
        SignalingClient::connect(&server.ws_url()).await.unwrap();
    broadcaster
        .send(ClientMessage::RegisterBroadcaster)
        .await
        .unwrap();
    assert_eq!(
        timeout(WAIT, broadcaster_rx.recv()).await.unwrap(),
        Some(ServerMessage::BroadcasterRegistered)
    );

    let (signaling, viewer_id, inbound) =
        SignalingClient::connect(&server.ws_url()).await.unwrap();
    let (controller, handle) =
        ViewerController::new(signaling, inbound, factory(), Duration::from_secs(3));
    let task = tokio::spawn(controller.run());
    assert_eq!(
        timeout(WAIT, broadcaster_rx.recv()).await.unwrap(),
        Some(ServerMessage::PeerJoined { viewer_id })
    );

    handle.leave().await.unwrap();
    task.await.unwrap().unwrap();

    assert_eq!(
        timeout(WAIT, broadcaster_rx.recv()).await.unwrap(),
        Some(ServerMessage::PeerLeft { viewer_id })
    );
}
