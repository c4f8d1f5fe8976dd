use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use thiserror::Error;
use uuid::Uuid;

use shared_config::{AppConfig, StorageBackend};
use shared_models::error::AppError;
use shared_models::{
    Appointment, AppointmentFilter, AppointmentStatus, NewSlot, Slot, SlotFilter, SlotKey, SlotUpdate,
};

use crate::memory::MemoryStore;
use crate::postgrest::SupabaseStore;
use crate::supabase::SupabaseClient;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("slot {0} not found")]
    SlotNotFound(Uuid),

    #[error("appointment {0} not found")]
    AppointmentNotFound(Uuid),

    #[error("slot {0} is already booked or has been withdrawn")]
    SlotUnavailable(Uuid),

    #[error("doctor {doctor_id} already has an appointment on {date} at {time}")]
    DoctorConflict {
        doctor_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
    },

    #[error("slot {0} is booked and cannot be moved or deleted")]
    SlotBooked(Uuid),

    #[error("a slot already exists at {} {} ({})", .0.date, .0.start_time.format("%H:%M"), .0.location)]
    DuplicateSlot(SlotKey),

    #[error("appointment {id} changed concurrently (now {actual})")]
    StaleAppointment { id: Uuid, actual: AppointmentStatus },

    #[error("storage call timed out after {0} ms")]
    Timeout(u64),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Timeout(_) | StoreError::Backend(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A deleted appointment and the outcome of releasing its slot.
///
/// The row is gone once this is returned; `released` carries a release that
/// failed afterwards so callers can report the slot as needing repair.
#[derive(Debug, Clone)]
pub struct RemovedAppointment {
    pub appointment: Appointment,
    pub released: StoreResult<Option<Slot>>,
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::SlotNotFound(_) | StoreError::AppointmentNotFound(_) => AppError::NotFound(e.to_string()),
            StoreError::SlotUnavailable(_)
            | StoreError::DoctorConflict { .. }
            | StoreError::SlotBooked(_)
            | StoreError::DuplicateSlot(_)
            | StoreError::StaleAppointment { .. } => AppError::Conflict(e.to_string()),
            StoreError::Timeout(_) | StoreError::Backend(_) => AppError::StorageUnavailable(e.to_string()),
        }
    }
}

/// Persistence for slots and appointments.
///
/// The `book_slot`, `rebook` and `remove_appointment` methods are the booking
/// transaction: each either applies completely to both records or not at all.
/// Slot-derived appointment fields (doctor, date, time, duration, location)
/// are copied from the slot by the store itself. `rebook` and
/// `remove_appointment` only act while the stored status still equals
/// `expected`, and fail with `StaleAppointment` otherwise.
#[async_trait]
pub trait SchedulingStore: Send + Sync {
    /// Ids of active users holding a doctor-capable role.
    async fn active_practitioners(&self) -> StoreResult<Vec<Uuid>>;

    async fn insert_slot(&self, slot: NewSlot) -> StoreResult<Slot>;

    async fn get_slot(&self, id: Uuid) -> StoreResult<Slot>;

    async fn find_slot(&self, key: &SlotKey) -> StoreResult<Option<Slot>>;

    /// Ordered by date, start time, location.
    async fn list_slots(&self, filter: &SlotFilter) -> StoreResult<Vec<Slot>>;

    async fn update_slot(&self, id: Uuid, update: SlotUpdate) -> StoreResult<Slot>;

    async fn delete_slot(&self, id: Uuid, allow_booked: bool) -> StoreResult<()>;

    async fn slots_before(&self, date: NaiveDate) -> StoreResult<Vec<Slot>>;

    async fn booked_slots(&self) -> StoreResult<Vec<Slot>>;

    /// Release `slot_id` only if it is still bound to `appointment_id`.
    async fn release_slot_if_bound(&self, slot_id: Uuid, appointment_id: Uuid) -> StoreResult<bool>;

    async fn get_appointment(&self, id: Uuid) -> StoreResult<Appointment>;

    /// Ordered by date then time.
    async fn list_appointments(&self, filter: &AppointmentFilter) -> StoreResult<Vec<Appointment>>;

    /// Compare-and-set on the status column.
    async fn update_appointment_status(
        &self,
        id: Uuid,
        expected: AppointmentStatus,
        status: AppointmentStatus,
        updated_by: Option<Uuid>,
    ) -> StoreResult<Appointment>;

    /// Claim `slot_id` and persist `appointment` against it.
    async fn book_slot(&self, slot_id: Uuid, appointment: Appointment) -> StoreResult<(Slot, Appointment)>;

    /// Move an existing appointment onto `new_slot_id`, releasing its old slot.
    async fn rebook(
        &self,
        appointment: Appointment,
        expected: AppointmentStatus,
        new_slot_id: Uuid,
    ) -> StoreResult<(Slot, Appointment)>;

    /// Clear the booking fields of whatever slot is bound to the appointment.
    async fn release_appointment_slot(&self, appointment_id: Uuid) -> StoreResult<Option<Slot>>;

    /// Delete the appointment and release its slot.
    async fn remove_appointment(
        &self,
        appointment_id: Uuid,
        expected: AppointmentStatus,
    ) -> StoreResult<RemovedAppointment>;
}

/// Applies a per-call deadline to every store operation.
///
/// A timed-out call is dropped at its next await point, so the inner store
/// must keep every method a single critical section. Stores that issue
/// several remote writes per call enforce deadlines per request instead.
pub struct TimedStore {
    inner: Arc<dyn SchedulingStore>,
    timeout: Duration,
}

impl TimedStore {
    pub fn new(inner: Arc<dyn SchedulingStore>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn guard<T, F>(&self, fut: F) -> StoreResult<T>
    where
        F: Future<Output = StoreResult<T>> + Send,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("Storage call exceeded {:?}", self.timeout);
                Err(StoreError::Timeout(self.timeout.as_millis() as u64))
            }
        }
    }
}

#[async_trait]
impl SchedulingStore for TimedStore {
    async fn active_practitioners(&self) -> StoreResult<Vec<Uuid>> {
        self.guard(self.inner.active_practitioners()).await
    }

    async fn insert_slot(&self, slot: NewSlot) -> StoreResult<Slot> {
        self.guard(self.inner.insert_slot(slot)).await
    }

    async fn get_slot(&self, id: Uuid) -> StoreResult<Slot> {
        self.guard(self.inner.get_slot(id)).await
    }

    async fn find_slot(&self, key: &SlotKey) -> StoreResult<Option<Slot>> {
        self.guard(self.inner.find_slot(key)).await
    }

    async fn list_slots(&self, filter: &SlotFilter) -> StoreResult<Vec<Slot>> {
        self.guard(self.inner.list_slots(filter)).await
    }

    async fn update_slot(&self, id: Uuid, update: SlotUpdate) -> StoreResult<Slot> {
        self.guard(self.inner.update_slot(id, update)).await
    }

    async fn delete_slot(&self, id: Uuid, allow_booked: bool) -> StoreResult<()> {
        self.guard(self.inner.delete_slot(id, allow_booked)).await
    }

    async fn slots_before(&self, date: NaiveDate) -> StoreResult<Vec<Slot>> {
        self.guard(self.inner.slots_before(date)).await
    }

    async fn booked_slots(&self) -> StoreResult<Vec<Slot>> {
        self.guard(self.inner.booked_slots()).await
    }

    async fn release_slot_if_bound(&self, slot_id: Uuid, appointment_id: Uuid) -> StoreResult<bool> {
        self.guard(self.inner.release_slot_if_bound(slot_id, appointment_id)).await
    }

    async fn get_appointment(&self, id: Uuid) -> StoreResult<Appointment> {
        self.guard(self.inner.get_appointment(id)).await
    }

    async fn list_appointments(&self, filter: &AppointmentFilter) -> StoreResult<Vec<Appointment>> {
        self.guard(self.inner.list_appointments(filter)).await
    }

    async fn update_appointment_status(
        &self,
        id: Uuid,
        expected: AppointmentStatus,
        status: AppointmentStatus,
        updated_by: Option<Uuid>,
    ) -> StoreResult<Appointment> {
        self.guard(self.inner.update_appointment_status(id, expected, status, updated_by))
            .await
    }

    async fn book_slot(&self, slot_id: Uuid, appointment: Appointment) -> StoreResult<(Slot, Appointment)> {
        self.guard(self.inner.book_slot(slot_id, appointment)).await
    }

    async fn rebook(
        &self,
        appointment: Appointment,
        expected: AppointmentStatus,
        new_slot_id: Uuid,
    ) -> StoreResult<(Slot, Appointment)> {
        self.guard(self.inner.rebook(appointment, expected, new_slot_id)).await
    }

    async fn release_appointment_slot(&self, appointment_id: Uuid) -> StoreResult<Option<Slot>> {
        self.guard(self.inner.release_appointment_slot(appointment_id)).await
    }

    async fn remove_appointment(
        &self,
        appointment_id: Uuid,
        expected: AppointmentStatus,
    ) -> StoreResult<RemovedAppointment> {
        self.guard(self.inner.remove_appointment(appointment_id, expected)).await
    }
}

/// Store selected by configuration, with the configured call deadline.
///
/// The in-process store is wrapped in [`TimedStore`]. The Supabase store
/// applies the deadline to each HTTP request so its compensating writes are
/// never cut off midway.
pub fn build_store(config: &AppConfig) -> Arc<dyn SchedulingStore> {
    let timeout = Duration::from_millis(config.storage_timeout_ms);
    match config.storage_backend {
        StorageBackend::Memory => {
            let practitioners = config.practitioner_id.into_iter().collect();
            let inner = Arc::new(MemoryStore::with_practitioners(practitioners));
            Arc::new(TimedStore::new(inner, timeout))
        }
        StorageBackend::Supabase => Arc::new(SupabaseStore::new(Arc::new(SupabaseClient::new(config)))),
    }
}
