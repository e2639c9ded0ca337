// Route table for the NotJS server

use axum::{routing::get, Router};
use std::sync::Arc;

use crate::handlers;
use crate::ws;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/status", get(handlers::health_check))
        .route("/api/language/supported", get(handlers::supported_languages))
        .route("/api/language/version/:language", get(handlers::language_versions))
        .route("/api/language/version/:language/default", get(handlers::default_version))
        .route("/api/language/info/:language", get(handlers::language_info))
        .route("/ws/terminal", get(ws::terminal_ws))
}
