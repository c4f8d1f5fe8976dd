use std::fmt;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use shared_database::StoreError;
use shared_models::error::AppError;
use shared_models::{Appointment, AppointmentChanges, AppointmentDetails, AppointmentStatus, Slot};
use shared_utils::ClockError;
use slot_cell::SlotError;

// ==============================================================================
// STATE MACHINE
// ==============================================================================

/// Caller-initiated operations on an existing appointment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppointmentAction {
    Approve,
    Reject,
    Cancel,
    Reschedule,
    SetStatus(AppointmentStatus),
}

impl fmt::Display for AppointmentAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentAction::Approve => write!(f, "approve"),
            AppointmentAction::Reject => write!(f, "reject"),
            AppointmentAction::Cancel => write!(f, "cancel"),
            AppointmentAction::Reschedule => write!(f, "reschedule"),
            AppointmentAction::SetStatus(status) => write!(f, "set status to {}", status),
        }
    }
}

/// Result of a legal transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    To(AppointmentStatus),
    /// Row is removed and its slot released.
    Delete,
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

/// Where to book: an explicit slot, or the slot at a date and time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotTarget {
    Slot(Uuid),
    At {
        date: NaiveDate,
        time: NaiveTime,
        location: Option<String>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookAppointmentRequest {
    pub patient_id: Uuid,
    pub slot_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub location: Option<String>,
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(flatten)]
    pub details: AppointmentDetails,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RescheduleAppointmentRequest {
    pub slot_id: Option<Uuid>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub location: Option<String>,
    #[serde(flatten)]
    pub changes: AppointmentChanges,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
    pub updated_by: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApproveAppointmentRequest {
    pub approved_by: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RejectAppointmentRequest {
    pub reason: String,
    pub rejected_by: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CancelAppointmentRequest {
    pub reason: Option<String>,
    pub cancelled_by: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppointmentListQuery {
    pub patient_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub status: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
}

// ==============================================================================
// RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct BookingOutcome {
    pub slot: Slot,
    pub appointment: Appointment,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemovalOutcome {
    pub appointment: Appointment,
    pub released_slot: Option<Slot>,
    pub reason: Option<String>,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Error, Debug)]
pub enum AppointmentError {
    #[error("Appointment {0} not found")]
    NotFound(Uuid),

    #[error("Slot {0} not found")]
    SlotNotFound(Uuid),

    #[error("No slot on {date} at {}", .time.format("%H:%M"))]
    NoSlotAt { date: NaiveDate, time: NaiveTime },

    #[error("Slot {0} is already booked or has been withdrawn")]
    SlotUnavailable(Uuid),

    #[error("Doctor already has an appointment on {date} at {}", .time.format("%H:%M"))]
    DoctorConflict { date: NaiveDate, time: NaiveTime },

    #[error("Cannot {action} an appointment that is {status}")]
    InvalidTransition {
        status: AppointmentStatus,
        action: AppointmentAction,
    },

    #[error("Appointment {0} was changed by another request")]
    ConcurrentUpdate(Uuid),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error(transparent)]
    Practitioner(SlotError),

    #[error("Storage error: {0}")]
    Storage(StoreError),
}

impl AppointmentError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppointmentError::Storage(e) if e.is_retryable())
    }
}

impl From<StoreError> for AppointmentError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::AppointmentNotFound(id) => AppointmentError::NotFound(id),
            StoreError::SlotNotFound(id) => AppointmentError::SlotNotFound(id),
            StoreError::SlotUnavailable(id) => AppointmentError::SlotUnavailable(id),
            StoreError::DoctorConflict { date, time, .. } => AppointmentError::DoctorConflict { date, time },
            StoreError::StaleAppointment { id, .. } => AppointmentError::ConcurrentUpdate(id),
            other => AppointmentError::Storage(other),
        }
    }
}

impl From<SlotError> for AppointmentError {
    fn from(e: SlotError) -> Self {
        match e {
            SlotError::Store(store) => store.into(),
            SlotError::Clock(clock) => clock.into(),
            SlotError::Validation(msg) => AppointmentError::ValidationError(msg),
            other => AppointmentError::Practitioner(other),
        }
    }
}

impl From<ClockError> for AppointmentError {
    fn from(e: ClockError) -> Self {
        AppointmentError::ValidationError(e.to_string())
    }
}

impl From<AppointmentError> for AppError {
    fn from(e: AppointmentError) -> Self {
        match e {
            AppointmentError::NotFound(_) | AppointmentError::SlotNotFound(_) | AppointmentError::NoSlotAt { .. } => {
                AppError::NotFound(e.to_string())
            }
            AppointmentError::SlotUnavailable(_)
            | AppointmentError::DoctorConflict { .. }
            | AppointmentError::ConcurrentUpdate(_) => AppError::Conflict(e.to_string()),
            AppointmentError::InvalidTransition { .. } => AppError::InvalidTransition(e.to_string()),
            AppointmentError::ValidationError(msg) => AppError::ValidationError(msg),
            AppointmentError::Practitioner(slot) => slot.into(),
            AppointmentError::Storage(store) => store.into(),
        }
    }
}
