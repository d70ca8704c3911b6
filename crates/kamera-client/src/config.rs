//! Command line and environment configuration for the `kamera` binary

use clap::{Parser, Subcommand};
use std::time::Duration;

pub const DEFAULT_STUN_SERVERS: &[&str] = &[
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
    "stun:stun2.l.google.com:19302",
];

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Kamera peer-to-peer camera streaming
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Signaling relay WebSocket URL
    #[arg(
        long,
        global = true,
        default_value = "ws://localhost:3000/ws",
        env = "KAMERA_SIGNALING_URL"
    )]
    pub signaling_url: String,

    /// STUN servers (comma-separated)
    #[arg(
        long,
        global = true,
        value_delimiter = ',',
        default_value = "stun:stun.l.google.com:19302,stun:stun1.l.google.com:19302,stun:stun2.l.google.com:19302",
        env = "KAMERA_STUN_SERVERS"
    )]
    pub stun_servers: Vec<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Stream the local camera to every viewer
    Broadcast {
        /// Capture device labels served by the synthetic backend (comma-separated)
        #[arg(
            long,
            value_delimiter = ',',
            default_value = "Back Main Camera,Back Ultra Wide Camera,Front Camera",
            env = "KAMERA_DEVICES"
        )]
        devices: Vec<String>,

        /// Start in low-light capture mode
        #[arg(long, default_value_t = false, env = "KAMERA_LOW_LIGHT")]
        low_light: bool,
    },

    /// Watch the current broadcaster
    View {
        /// Delay before re-requesting an offer after a failed session, in milliseconds
        #[arg(long, default_value_t = 3000, env = "KAMERA_RECONNECT_DELAY_MS")]
        reconnect_delay_ms: u64,
    },
}

impl Cli {
    pub fn ice_servers(&self) -> Vec<String> {
        if self.stun_servers.is_empty() {
            DEFAULT_STUN_SERVERS.iter().map(|s| s.to_string()).collect()
        } else {
            self.stun_servers.clone()
        }
    }
}
