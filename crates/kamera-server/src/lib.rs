//! Kamera relay server library
//!
//! This module exposes the relay components for testing and embedding.

pub mod api;
pub mod relay;
pub mod state;
pub mod ws;

/// Create and configure the relay application
pub fn create_app() -> axum::Router {
    let app_state = state::AppState::new();
    api::create_router(app_state)
}
