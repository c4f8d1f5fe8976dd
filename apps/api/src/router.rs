use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};

use appointment_cell::router::appointment_routes;
use slot_cell::router::slot_routes;
use slot_cell::SchedulingContext;

pub fn create_router(state: Arc<SchedulingContext>) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic booking API is running!" }))
        .route("/health", get(health).with_state(state.clone()))
        .nest("/slots", slot_routes(state.clone()))
        .nest("/appointments", appointment_routes(state))
}

async fn health(State(state): State<Arc<SchedulingContext>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "storage": state.config.storage_backend,
        "timezone": state.config.clinic_timezone,
        "today": state.clock.today(),
        "locations": state.catalog.locations().collect::<Vec<_>>()
    }))
}
