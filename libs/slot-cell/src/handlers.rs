use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::error::AppError;
use shared_models::SlotUpdate;
use shared_utils::parse_time_of_day;

use crate::context::SchedulingContext;
use crate::error::SlotError;
use crate::models::{
    BookableSlotQuery, CreateSlotRequest, EditSlotRequest, GenerateSlotsRequest, GenerationTarget,
    RollingWindowQuery, SetAvailabilityRequest, SlotListQuery,
};
use crate::services::{SlotLifecycleService, SlotService};

fn generation_target(ctx: &SchedulingContext, request: &GenerateSlotsRequest) -> Result<GenerationTarget, SlotError> {
    if let Some(date) = &request.date {
        return Ok(GenerationTarget::Date(ctx.clock.parse_date(date)?));
    }

    match (&request.from, &request.to) {
        (Some(from), Some(to)) => Ok(GenerationTarget::Range {
            from: ctx.clock.parse_date(from)?,
            to: ctx.clock.parse_date(to)?,
        }),
        (None, None) => Ok(GenerationTarget::DaysAhead(
            request.days_ahead.unwrap_or(ctx.config.booking_horizon_days),
        )),
        _ => Err(SlotError::Validation("a range needs both 'from' and 'to'".to_string())),
    }
}

// ==============================================================================
// QUERIES
// ==============================================================================

#[axum::debug_handler]
pub async fn list_slots(
    State(state): State<Arc<SchedulingContext>>,
    Query(query): Query<SlotListQuery>,
) -> Result<Json<Value>, AppError> {
    let date = state.clock.parse_date(&query.date).map_err(SlotError::from)?;
    let slots = SlotService::new(state.clone())
        .list_slots(date, query.location, query.doctor_id)
        .await?;

    Ok(Json(json!({
        "date": date,
        "slots": slots,
        "total": slots.len()
    })))
}

#[axum::debug_handler]
pub async fn list_bookable_slots(
    State(state): State<Arc<SchedulingContext>>,
    Query(query): Query<BookableSlotQuery>,
) -> Result<Json<Value>, AppError> {
    let date = state.clock.parse_date(&query.date).map_err(SlotError::from)?;
    let slots = SlotService::new(state.clone())
        .list_bookable_slots(date, query.location)
        .await?;

    Ok(Json(json!({
        "date": date,
        "slots": slots,
        "total": slots.len()
    })))
}

#[axum::debug_handler]
pub async fn get_slot(
    State(state): State<Arc<SchedulingContext>>,
    Path(slot_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let slot = SlotService::new(state.clone()).get_slot(slot_id).await?;
    Ok(Json(json!({ "slot": slot })))
}

// ==============================================================================
// ADMIN
// ==============================================================================

#[axum::debug_handler]
pub async fn create_slot(
    State(state): State<Arc<SchedulingContext>>,
    Json(request): Json<CreateSlotRequest>,
) -> Result<Json<Value>, AppError> {
    let date = state.clock.parse_date(&request.date).map_err(SlotError::from)?;
    let start = parse_time_of_day(&request.start_time).map_err(SlotError::from)?;
    let end = parse_time_of_day(&request.end_time).map_err(SlotError::from)?;

    let slot = SlotService::new(state.clone())
        .create_slot(date, start, end, request.location, request.notes, request.created_by)
        .await?;

    Ok(Json(json!({
        "success": true,
        "slot": slot
    })))
}

#[axum::debug_handler]
pub async fn edit_slot(
    State(state): State<Arc<SchedulingContext>>,
    Path(slot_id): Path<Uuid>,
    Json(request): Json<EditSlotRequest>,
) -> Result<Json<Value>, AppError> {
    let update = SlotUpdate {
        start_time: request
            .start_time
            .as_deref()
            .map(parse_time_of_day)
            .transpose()
            .map_err(SlotError::from)?,
        end_time: request
            .end_time
            .as_deref()
            .map(parse_time_of_day)
            .transpose()
            .map_err(SlotError::from)?,
        location: request.location,
        is_available: None,
        notes: request.notes,
    };

    let slot = SlotService::new(state.clone()).edit_slot(slot_id, update).await?;

    Ok(Json(json!({
        "success": true,
        "slot": slot
    })))
}

#[axum::debug_handler]
pub async fn set_slot_availability(
    State(state): State<Arc<SchedulingContext>>,
    Path(slot_id): Path<Uuid>,
    Json(request): Json<SetAvailabilityRequest>,
) -> Result<Json<Value>, AppError> {
    let slot = SlotService::new(state.clone())
        .set_availability(slot_id, request.is_available)
        .await?;

    Ok(Json(json!({
        "success": true,
        "slot": slot
    })))
}

#[axum::debug_handler]
pub async fn delete_slot(
    State(state): State<Arc<SchedulingContext>>,
    Path(slot_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    SlotService::new(state.clone()).delete_slot(slot_id).await?;

    Ok(Json(json!({
        "success": true,
        "deleted": slot_id
    })))
}

// ==============================================================================
// MAINTENANCE
// ==============================================================================

#[axum::debug_handler]
pub async fn generate_slots(
    State(state): State<Arc<SchedulingContext>>,
    Json(request): Json<GenerateSlotsRequest>,
) -> Result<Json<Value>, AppError> {
    let target = generation_target(&state, &request)?;
    let report = SlotLifecycleService::new(state.clone()).generate(target).await?;
    Ok(Json(json!(report)))
}

#[axum::debug_handler]
pub async fn ensure_rolling_window(
    State(state): State<Arc<SchedulingContext>>,
    Query(query): Query<RollingWindowQuery>,
) -> Result<Json<Value>, AppError> {
    let horizon = query.horizon_days.unwrap_or(state.config.booking_horizon_days);
    let lifecycle = SlotLifecycleService::new(state.clone());
    let report = lifecycle.ensure_rolling_window(horizon).await?;

    Ok(Json(json!({
        "report": report,
        "through": lifecycle.window_end(horizon)
    })))
}

#[axum::debug_handler]
pub async fn cleanup_past_slots(State(state): State<Arc<SchedulingContext>>) -> Result<Json<Value>, AppError> {
    let report = SlotLifecycleService::new(state.clone()).cleanup_past_slots().await?;
    Ok(Json(json!(report)))
}

#[axum::debug_handler]
pub async fn cleanup_past_appointments(
    State(state): State<Arc<SchedulingContext>>,
) -> Result<Json<Value>, AppError> {
    let report = SlotLifecycleService::new(state.clone())
        .cleanup_past_appointments()
        .await?;
    Ok(Json(json!(report)))
}

#[axum::debug_handler]
pub async fn force_cleanup(State(state): State<Arc<SchedulingContext>>) -> Result<Json<Value>, AppError> {
    let report = SlotLifecycleService::new(state.clone()).force_cleanup().await?;
    Ok(Json(json!(report)))
}

#[axum::debug_handler]
pub async fn repair_orphan_slots(State(state): State<Arc<SchedulingContext>>) -> Result<Json<Value>, AppError> {
    let report = SlotLifecycleService::new(state.clone()).repair_orphan_slots().await?;
    Ok(Json(json!(report)))
}
