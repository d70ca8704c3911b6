use crate::relay::Relay;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;

const DEFAULT_PORT: &str = "3000";

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub bind_address: String,
}

impl Config {
    /// Defaults, then `PORT`, then `KAMERA_*` environment variables
    pub fn load() -> anyhow::Result<Self> {
        let port = std::env::var("PORT").unwrap_or_else(|_| DEFAULT_PORT.to_string());

        let config = config::Config::builder()
            .set_default("bind_address", format!("0.0.0.0:{}", port))?
            .add_source(config::Environment::with_prefix("KAMERA"))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<Relay>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            relay: Arc::new(Relay::new()),
            started_at: Instant::now(),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
