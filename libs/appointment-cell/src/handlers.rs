use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::error::AppError;
use shared_models::{AppointmentFilter, AppointmentStatus};
use shared_utils::parse_time_of_day;
use slot_cell::SchedulingContext;

use crate::models::{
    AppointmentError, AppointmentListQuery, ApproveAppointmentRequest, BookAppointmentRequest,
    CancelAppointmentRequest, RejectAppointmentRequest, RescheduleAppointmentRequest, SlotTarget,
    UpdateStatusRequest,
};
use crate::services::AppointmentBookingService;

fn slot_target(
    ctx: &SchedulingContext,
    slot_id: Option<Uuid>,
    date: Option<&str>,
    time: Option<&str>,
    location: Option<String>,
) -> Result<SlotTarget, AppointmentError> {
    if let Some(id) = slot_id {
        return Ok(SlotTarget::Slot(id));
    }

    match (date, time) {
        (Some(date), Some(time)) => Ok(SlotTarget::At {
            date: ctx.clock.parse_date(date)?,
            time: parse_time_of_day(time)?,
            location: location.filter(|l| !l.trim().is_empty()),
        }),
        _ => Err(AppointmentError::ValidationError(
            "either slot_id or both date and time are required".to_string(),
        )),
    }
}

// ==============================================================================
// BOOKING
// ==============================================================================

#[axum::debug_handler]
pub async fn book_appointment(
    State(state): State<Arc<SchedulingContext>>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let target = slot_target(
        &state,
        request.slot_id,
        request.date.as_deref(),
        request.time.as_deref(),
        request.location,
    )?;

    let outcome = AppointmentBookingService::new(state.clone())
        .book(
            target,
            request.doctor_id,
            request.patient_id,
            request.requires_approval,
            request.details,
        )
        .await?;

    let message = if outcome.appointment.status == AppointmentStatus::Pending {
        "Appointment requested and awaiting approval"
    } else {
        "Appointment booked successfully"
    };

    Ok(Json(json!({
        "success": true,
        "appointment": outcome.appointment,
        "slot": outcome.slot,
        "message": message
    })))
}

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<Arc<SchedulingContext>>,
    Path(appointment_id): Path<Uuid>,
    payload: Option<Json<CancelAppointmentRequest>>,
) -> Result<Json<Value>, AppError> {
    // The body is optional; an empty POST cancels without a reason.
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    let outcome = AppointmentBookingService::new(state.clone())
        .cancel(appointment_id, request.reason)
        .await?;

    Ok(Json(json!({
        "success": true,
        "appointment_id": outcome.appointment.id,
        "released_slot": outcome.released_slot,
        "cancelled_by": request.cancelled_by,
        "message": "Appointment cancelled successfully"
    })))
}

#[axum::debug_handler]
pub async fn reschedule_appointment(
    State(state): State<Arc<SchedulingContext>>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<RescheduleAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let target = slot_target(
        &state,
        request.slot_id,
        request.date.as_deref(),
        request.time.as_deref(),
        request.location,
    )?;

    let outcome = AppointmentBookingService::new(state.clone())
        .reschedule(appointment_id, target, request.changes)
        .await?;

    Ok(Json(json!({
        "success": true,
        "appointment": outcome.appointment,
        "slot": outcome.slot,
        "message": "Appointment rescheduled successfully"
    })))
}

// ==============================================================================
// STATUS
// ==============================================================================

#[axum::debug_handler]
pub async fn update_appointment_status(
    State(state): State<Arc<SchedulingContext>>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<Value>, AppError> {
    let status: AppointmentStatus = request
        .status
        .parse()
        .map_err(|e: shared_models::UnknownStatus| AppError::ValidationError(e.to_string()))?;

    let appointment = AppointmentBookingService::new(state.clone())
        .set_status(appointment_id, status, request.updated_by)
        .await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment
    })))
}

#[axum::debug_handler]
pub async fn approve_appointment(
    State(state): State<Arc<SchedulingContext>>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<ApproveAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let appointment = AppointmentBookingService::new(state.clone())
        .approve(appointment_id, request.approved_by)
        .await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment approved"
    })))
}

#[axum::debug_handler]
pub async fn reject_appointment(
    State(state): State<Arc<SchedulingContext>>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<RejectAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let outcome = AppointmentBookingService::new(state.clone())
        .reject(appointment_id, request.reason, request.rejected_by)
        .await?;

    Ok(Json(json!({
        "success": true,
        "appointment_id": outcome.appointment.id,
        "released_slot": outcome.released_slot,
        "reason": outcome.reason,
        "message": "Appointment rejected"
    })))
}

// ==============================================================================
// QUERIES
// ==============================================================================

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<Arc<SchedulingContext>>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let appointment = AppointmentBookingService::new(state.clone())
        .get(appointment_id)
        .await?;

    Ok(Json(json!({
        "appointment": appointment,
        "can_be_cancelled": appointment.can_be_cancelled(),
        "can_be_rescheduled": appointment.can_be_rescheduled()
    })))
}

#[axum::debug_handler]
pub async fn list_appointments(
    State(state): State<Arc<SchedulingContext>>,
    Query(query): Query<AppointmentListQuery>,
) -> Result<Json<Value>, AppError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<AppointmentStatus>)
        .transpose()
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    let filter = AppointmentFilter {
        patient_id: query.patient_id,
        doctor_id: query.doctor_id,
        status,
        from_date: query
            .from
            .as_deref()
            .map(|raw| state.clock.parse_date(raw))
            .transpose()
            .map_err(AppointmentError::from)?,
        to_date: query
            .to
            .as_deref()
            .map(|raw| state.clock.parse_date(raw))
            .transpose()
            .map_err(AppointmentError::from)?,
    };

    let appointments = AppointmentBookingService::new(state.clone()).list(filter).await?;

    Ok(Json(json!({
        "appointments": appointments,
        "total": appointments.len()
    })))
}
