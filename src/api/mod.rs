use crate::state::AppState;
use axum::Router;
use axum::routing::{get, post, put};
use std::sync::{Arc, RwLock};

pub mod handlers;
pub mod responses;

pub fn router(state: Arc<RwLock<AppState>>) -> Router {
    Router::new()
        .route("/api/health", get(handlers::get_health))
        .route("/api/devices/{device}/status", get(handlers::get_status))
        .route(
            "/api/devices/{device}/settings",
            get(handlers::get_settings).patch(handlers::patch_settings),
        )
        .route("/api/devices/{device}/command", put(handlers::put_command))
        .route("/api/history/{device}/events", get(handlers::get_events))
        .route("/api/history/{device}/summary", get(handlers::get_summary))
        .route(
            "/api/notifications/{device}",
            get(handlers::get_notifications).delete(handlers::delete_notifications),
        )
        .route(
            "/api/notifications/{device}/{id}/read",
            post(handlers::post_notification_read),
        )
        .with_state(state)
}
