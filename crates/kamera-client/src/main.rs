use anyhow::Result;
use clap::Parser;
use kamera_client::config::{Cli, Command};
use kamera_client::transport::RtcTransportFactory;
use kamera_client::{
    BroadcasterCommand, BroadcasterController, SignalingClient, ViewerCommand, ViewerController,
};
use kamera_media::{MediaSourceManager, SyntheticBackend};
use kamera_protocol::CaptureMode;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kamera=debug,kamera_client=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let factory = Arc::new(RtcTransportFactory::new(cli.ice_servers())?);

    tracing::info!("Connecting to {}", cli.signaling_url);
    let (signaling, _connection_id, inbound) = SignalingClient::connect(&cli.signaling_url).await?;

    match cli.command {
        Command::Broadcast { devices, low_light } => {
            let media = Arc::new(MediaSourceManager::new(Arc::new(
                SyntheticBackend::from_labels(&devices),
            )));
            let (controller, handle) =
                BroadcasterController::new(signaling, inbound, factory, media);
            let task = tokio::spawn(controller.run());

            if low_light {
                handle
                    .send(BroadcasterCommand::SetMode(CaptureMode::LowLight))
                    .await?;
            }

            let mut status = handle.status();
            tokio::spawn(async move {
                while status.changed().await.is_ok() {
                    let s = status.borrow_and_update().clone();
                    tracing::info!(
                        "Broadcasting {} in {:?} mode, {} of {} viewers live",
                        s.source.as_deref().unwrap_or("(no source)"),
                        s.mode,
                        s.live_viewers(),
                        s.viewers.len()
                    );
                }
            });

            println!("Commands: s = switch camera, l = low light, n = standard, q = quit");
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                tokio::select! {
                    line = lines.next_line() => {
                        let command = match line?.as_deref().map(str::trim) {
                            Some("s") => BroadcasterCommand::SwitchCamera,
                            Some("l") => BroadcasterCommand::SetMode(CaptureMode::LowLight),
                            Some("n") => BroadcasterCommand::SetMode(CaptureMode::Standard),
                            Some("q") | None => BroadcasterCommand::Stop,
                            Some(_) => continue,
                        };
                        let stop = command == BroadcasterCommand::Stop;
                        if handle.send(command).await.is_err() || stop {
                            break;
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        let _ = handle.stop().await;
                        break;
                    }
                }
            }

            task.await??;
        }
        Command::View { reconnect_delay_ms } => {
            let (controller, handle) = ViewerController::new(
                signaling,
                inbound,
                factory,
                Duration::from_millis(reconnect_delay_ms),
            );
            let task = tokio::spawn(controller.run());

            let mut status = handle.status();
            tokio::spawn(async move {
                while status.changed().await.is_ok() {
                    let s = status.borrow_and_update().clone();
                    if s.waiting {
                        tracing::info!("Waiting for a broadcaster");
                    } else {
                        tracing::info!("Stream {:?}", s.state);
                    }
                }
            });

            println!("Commands: s = ask for next camera, l = toggle low light, q = leave");
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                tokio::select! {
                    line = lines.next_line() => {
                        let command = match line?.as_deref().map(str::trim) {
                            Some("s") => ViewerCommand::RequestCameraSwitch,
                            Some("l") => ViewerCommand::RequestModeSwitch { low_light: None },
                            Some("q") | None => ViewerCommand::Leave,
                            Some(_) => continue,
                        };
                        let leave = command == ViewerCommand::Leave;
                        if handle.send(command).await.is_err() || leave {
                            break;
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        let _ = handle.leave().await;
                        break;
                    }
                }
            }

            task.await??;
        }
    }

    Ok(())
}
