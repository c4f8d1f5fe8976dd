use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ==============================================================================
// MAINTENANCE
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceOperation {
    GenerateSlots,
    EnsureRollingWindow,
    CleanupPastSlots,
    CleanupPastAppointments,
    ForceCleanup,
    RepairOrphanSlots,
}

/// One record a maintenance pass could not process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordFailure {
    pub record: String,
    pub error: String,
}

/// Outcome of a maintenance pass. "Nothing to do" is a report with zero
/// counts, never an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub operation: MaintenanceOperation,
    pub affected: usize,
    pub skipped: usize,
    pub failures: Vec<RecordFailure>,
}

impl MaintenanceReport {
    pub fn new(operation: MaintenanceOperation) -> Self {
        Self {
            operation,
            affected: 0,
            skipped: 0,
            failures: Vec::new(),
        }
    }

    pub fn fail(&mut self, record: impl ToString, error: impl ToString) {
        self.failures.push(RecordFailure {
            record: record.to_string(),
            error: error.to_string(),
        });
    }

    /// Fold a sub-pass into this report.
    pub fn absorb(&mut self, other: MaintenanceReport) {
        self.affected += other.affected;
        self.skipped += other.skipped;
        self.failures.extend(other.failures);
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

// ==============================================================================
// REQUESTS
// ==============================================================================

/// Which dates to materialize. Dates are raw strings (`dd/mm/yyyy` or ISO)
/// parsed with the clinic clock.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateSlotsRequest {
    pub date: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub days_ahead: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationTarget {
    Date(NaiveDate),
    Range { from: NaiveDate, to: NaiveDate },
    DaysAhead(u32),
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlotListQuery {
    pub date: String,
    pub location: Option<String>,
    pub doctor_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookableSlotQuery {
    pub date: String,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSlotRequest {
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub location: String,
    pub notes: Option<String>,
    pub created_by: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EditSlotRequest {
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub location: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetAvailabilityRequest {
    pub is_available: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RollingWindowQuery {
    pub horizon_days: Option<u32>,
}
