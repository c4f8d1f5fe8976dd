use std::sync::Arc;

use axum::{
    routing::{delete, get, patch, post, put},
    Router,
};

use crate::context::SchedulingContext;
use crate::handlers;

pub fn slot_routes(state: Arc<SchedulingContext>) -> Router {
    let maintenance_routes = Router::new()
        .route("/generate", post(handlers::generate_slots))
        .route("/ensure-window", post(handlers::ensure_rolling_window))
        .route("/cleanup-slots", post(handlers::cleanup_past_slots))
        .route("/cleanup-appointments", post(handlers::cleanup_past_appointments))
        .route("/force-cleanup", post(handlers::force_cleanup))
        .route("/repair-orphans", post(handlers::repair_orphan_slots));

    Router::new()
        .route("/", get(handlers::list_slots))
        .route("/", post(handlers::create_slot))
        .route("/bookable", get(handlers::list_bookable_slots))
        .route("/{slot_id}", get(handlers::get_slot))
        .route("/{slot_id}", patch(handlers::edit_slot))
        .route("/{slot_id}", delete(handlers::delete_slot))
        .route("/{slot_id}/availability", put(handlers::set_slot_availability))
        .nest("/maintenance", maintenance_routes)
        .with_state(state)
}
