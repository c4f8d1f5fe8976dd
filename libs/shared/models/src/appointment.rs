use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::time_format;

// ==============================================================================
// CORE APPOINTMENT MODEL
// ==============================================================================

/// A patient's reservation, denormalized from the slot it was booked against.
///
/// The appointment carries no foreign key to its slot; the slot holds the
/// back-reference in `Slot::appointment_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub appointment_date: NaiveDate,
    #[serde(with = "time_format")]
    pub appointment_time: NaiveTime,
    pub duration_minutes: i32,
    pub service_type: ServiceType,
    pub status: AppointmentStatus,
    pub priority: AppointmentPriority,
    pub reason: Option<String>,
    pub symptoms: Option<String>,
    pub vitals: Option<serde_json::Value>,
    pub diagnosis: Option<serde_json::Value>,
    pub prescription: Option<serde_json::Value>,
    pub payment: Option<PaymentInfo>,
    pub location: String,
    pub created_by: Option<Uuid>,
    pub updated_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    /// Civil start instant (date + time, clinic timezone).
    pub fn starts_at(&self) -> NaiveDateTime {
        self.appointment_date.and_time(self.appointment_time)
    }

    pub fn ends_at(&self) -> NaiveDateTime {
        self.starts_at() + Duration::minutes(self.duration_minutes as i64)
    }

    pub fn can_be_cancelled(&self) -> bool {
        self.status.can_be_cancelled()
    }

    pub fn can_be_rescheduled(&self) -> bool {
        self.status.can_be_rescheduled()
    }

    /// Whether this appointment holds the doctor's time at `date`/`time`.
    pub fn occupies(&self, doctor_id: Uuid, date: NaiveDate, time: NaiveTime) -> bool {
        self.doctor_id == doctor_id
            && self.appointment_date == date
            && self.appointment_time == time
            && self.status.occupies_schedule()
    }
}

// ==============================================================================
// STATUS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AppointmentStatus {
    Pending,
    Scheduled,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
    Rejected,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 8] = [
        AppointmentStatus::Pending,
        AppointmentStatus::Scheduled,
        AppointmentStatus::Confirmed,
        AppointmentStatus::InProgress,
        AppointmentStatus::Completed,
        AppointmentStatus::Cancelled,
        AppointmentStatus::NoShow,
        AppointmentStatus::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::InProgress => "in-progress",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no-show",
            AppointmentStatus::Rejected => "rejected",
        }
    }

    /// No time-based restriction: a past-dated confirmed appointment stays
    /// cancellable so staff can clear it after the fact.
    pub fn can_be_cancelled(&self) -> bool {
        !matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::NoShow
        )
    }

    pub fn can_be_rescheduled(&self) -> bool {
        self.can_be_cancelled() && *self != AppointmentStatus::InProgress
    }

    /// Statuses that hold the doctor's time; at most one per doctor+date+time.
    pub fn occupies_schedule(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Pending
                | AppointmentStatus::Scheduled
                | AppointmentStatus::Confirmed
                | AppointmentStatus::InProgress
        )
    }

    /// Cancelled and rejected appointments are deleted, never stored.
    pub fn is_persistable(&self) -> bool {
        !matches!(self, AppointmentStatus::Cancelled | AppointmentStatus::Rejected)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown appointment status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for AppointmentStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        AppointmentStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

// ==============================================================================
// SERVICE TYPE / PRIORITY / PAYMENT
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    #[default]
    #[serde(alias = "general", alias = "general_consultation")]
    Consultation,
    #[serde(alias = "followup", alias = "follow-up")]
    FollowUp,
    #[serde(alias = "checkup")]
    RoutineCheckup,
    Emergency,
    Procedure,
    Vaccination,
    Other,
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceType::Consultation => write!(f, "consultation"),
            ServiceType::FollowUp => write!(f, "follow_up"),
            ServiceType::RoutineCheckup => write!(f, "routine_checkup"),
            ServiceType::Emergency => write!(f, "emergency"),
            ServiceType::Procedure => write!(f, "procedure"),
            ServiceType::Vaccination => write!(f, "vaccination"),
            ServiceType::Other => write!(f, "other"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    Refunded,
    Waived,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PaymentInfo {
    pub amount: Option<f64>,
    #[serde(default)]
    pub status: PaymentStatus,
    pub method: Option<String>,
    pub transaction_ref: Option<String>,
}

// ==============================================================================
// WRITE / QUERY MODELS
// ==============================================================================

/// Caller-supplied fields of a booking; slot-derived fields are filled in by
/// the booking transaction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppointmentDetails {
    #[serde(default)]
    pub service_type: ServiceType,
    #[serde(default)]
    pub priority: AppointmentPriority,
    pub reason: Option<String>,
    pub symptoms: Option<String>,
    pub payment: Option<PaymentInfo>,
    pub acting_user: Option<Uuid>,
}

/// Fields a reschedule may change besides the slot-derived ones.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppointmentChanges {
    pub service_type: Option<ServiceType>,
    pub priority: Option<AppointmentPriority>,
    pub reason: Option<String>,
    pub symptoms: Option<String>,
    pub acting_user: Option<Uuid>,
}

impl AppointmentChanges {
    pub fn apply_to(&self, appointment: &mut Appointment) {
        if let Some(service_type) = self.service_type {
            appointment.service_type = service_type;
        }
        if let Some(priority) = self.priority {
            appointment.priority = priority;
        }
        if let Some(reason) = &self.reason {
            appointment.reason = Some(reason.clone());
        }
        if let Some(symptoms) = &self.symptoms {
            appointment.symptoms = Some(symptoms.clone());
        }
        if let Some(user) = self.acting_user {
            appointment.updated_by = Some(user);
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppointmentFilter {
    pub patient_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
}

impl AppointmentFilter {
    /// Appointments dated strictly before `date`.
    pub fn before(date: NaiveDate) -> Self {
        Self {
            to_date: date.pred_opt(),
            ..Self::default()
        }
    }

    pub fn matches(&self, appointment: &Appointment) -> bool {
        self.patient_id.map_or(true, |id| appointment.patient_id == id)
            && self.doctor_id.map_or(true, |id| appointment.doctor_id == id)
            && self.status.map_or(true, |s| appointment.status == s)
            && self.from_date.map_or(true, |d| appointment.appointment_date >= d)
            && self.to_date.map_or(true, |d| appointment.appointment_date <= d)
    }
}
