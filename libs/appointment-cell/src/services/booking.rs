use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_models::{
    Appointment, AppointmentChanges, AppointmentDetails, AppointmentFilter, AppointmentStatus, Slot, SlotFilter,
};
use shared_database::RemovedAppointment;
use slot_cell::SchedulingContext;

use crate::models::{
    AppointmentAction, AppointmentError, BookingOutcome, RemovalOutcome, SlotTarget, Transition,
};
use crate::services::lifecycle::AppointmentLifecycleService;

/// Books, moves and removes appointments.
///
/// Every write that touches both a slot and an appointment goes through a
/// single store call (`book_slot`, `rebook`, `remove_appointment`), which
/// either applies to both records or to neither.
pub struct AppointmentBookingService {
    ctx: Arc<SchedulingContext>,
    lifecycle: AppointmentLifecycleService,
}

impl AppointmentBookingService {
    pub fn new(ctx: Arc<SchedulingContext>) -> Self {
        Self {
            ctx,
            lifecycle: AppointmentLifecycleService::new(),
        }
    }

    // ==========================================================================
    // SLOT RESOLUTION
    // ==========================================================================

    async fn resolve_slot(&self, target: &SlotTarget, doctor_id: Option<Uuid>) -> Result<Slot, AppointmentError> {
        let slot = match target {
            SlotTarget::Slot(id) => self.ctx.store.get_slot(*id).await?,
            SlotTarget::At { date, time, location } => {
                let doctor_id = match doctor_id {
                    Some(id) => id,
                    None => self.ctx.practitioners.resolve().await?,
                };
                let filter = SlotFilter {
                    location: location.clone(),
                    doctor_id: Some(doctor_id),
                    ..SlotFilter::on(*date)
                };

                let mut matches: Vec<Slot> = self
                    .ctx
                    .store
                    .list_slots(&filter)
                    .await?
                    .into_iter()
                    .filter(|s| s.start_time == *time)
                    .collect();

                match matches.len() {
                    0 => return Err(AppointmentError::NoSlotAt { date: *date, time: *time }),
                    1 => matches.remove(0),
                    n => {
                        return Err(AppointmentError::ValidationError(format!(
                            "{} slots start at {} on {}; specify a location",
                            n,
                            time.format("%H:%M"),
                            date
                        )))
                    }
                }
            }
        };

        if self.ctx.clock.has_started(slot.date, slot.start_time) {
            return Err(AppointmentError::ValidationError(format!(
                "slot {} on {} at {} has already started",
                slot.id,
                slot.date,
                slot.start_time.format("%H:%M")
            )));
        }

        Ok(slot)
    }

    // ==========================================================================
    // BOOKING TRANSACTION
    // ==========================================================================

    /// Claim a slot for a new appointment. `requires_approval` starts it at
    /// `pending`; otherwise it is `confirmed` immediately. Either way the slot
    /// is held.
    #[instrument(skip(self, details))]
    pub async fn book(
        &self,
        target: SlotTarget,
        doctor_id: Option<Uuid>,
        patient_id: Uuid,
        requires_approval: bool,
        details: AppointmentDetails,
    ) -> Result<BookingOutcome, AppointmentError> {
        let slot = self.resolve_slot(&target, doctor_id).await?;
        if !slot.is_available {
            return Err(AppointmentError::SlotUnavailable(slot.id));
        }

        let status = if requires_approval {
            AppointmentStatus::Pending
        } else {
            AppointmentStatus::Confirmed
        };
        let now = Utc::now();

        // Slot-derived fields are filled in by the store from the claimed slot.
        let appointment = Appointment {
            id: Uuid::new_v4(),
            patient_id,
            doctor_id: slot.doctor_id,
            appointment_date: slot.date,
            appointment_time: slot.start_time,
            duration_minutes: slot.duration_minutes,
            service_type: details.service_type,
            status,
            priority: details.priority,
            reason: details.reason,
            symptoms: details.symptoms,
            vitals: None,
            diagnosis: None,
            prescription: None,
            payment: details.payment,
            location: slot.location.clone(),
            created_by: details.acting_user,
            updated_by: details.acting_user,
            created_at: now,
            updated_at: now,
        };

        let (slot, appointment) = self.ctx.store.book_slot(slot.id, appointment).await?;
        info!(
            "Booked appointment {} ({}) on slot {} {} {}",
            appointment.id,
            appointment.status,
            slot.id,
            slot.date,
            slot.start_time.format("%H:%M")
        );

        Ok(BookingOutcome { slot, appointment })
    }

    /// Delete the appointment and free its slot.
    #[instrument(skip(self))]
    pub async fn cancel(&self, appointment_id: Uuid, reason: Option<String>) -> Result<RemovalOutcome, AppointmentError> {
        let appointment = self.ctx.store.get_appointment(appointment_id).await?;
        self.expect_delete(appointment.status, AppointmentAction::Cancel)?;

        let removed = self
            .ctx
            .store
            .remove_appointment(appointment_id, appointment.status)
            .await?;
        let (appointment, released_slot) = Self::settle_removal(removed);
        if released_slot.is_none() {
            warn!("Cancelled appointment {} had no bound slot", appointment_id);
        }
        info!("Cancelled appointment {}", appointment_id);

        Ok(RemovalOutcome {
            appointment,
            released_slot,
            reason,
        })
    }

    /// Move an appointment onto another slot in place, back at `confirmed`.
    #[instrument(skip(self, changes))]
    pub async fn reschedule(
        &self,
        appointment_id: Uuid,
        target: SlotTarget,
        changes: AppointmentChanges,
    ) -> Result<BookingOutcome, AppointmentError> {
        let mut appointment = self.ctx.store.get_appointment(appointment_id).await?;
        let expected = appointment.status;
        let status = self.expect_status(expected, AppointmentAction::Reschedule)?;

        let slot = self.resolve_slot(&target, Some(appointment.doctor_id)).await?;
        if !slot.is_available && !slot.is_bound_to(appointment_id) {
            return Err(AppointmentError::SlotUnavailable(slot.id));
        }

        changes.apply_to(&mut appointment);
        appointment.status = status;

        let (slot, appointment) = self.ctx.store.rebook(appointment, expected, slot.id).await?;
        info!(
            "Rescheduled appointment {} to slot {} {} {}",
            appointment.id,
            slot.id,
            slot.date,
            slot.start_time.format("%H:%M")
        );

        Ok(BookingOutcome { slot, appointment })
    }

    /// The appointment is already deleted here, so a failed release is logged
    /// and left to orphan repair instead of failing the request.
    fn settle_removal(removed: RemovedAppointment) -> (Appointment, Option<Slot>) {
        let released = match removed.released {
            Ok(slot) => slot,
            Err(e) => {
                warn!(
                    "Slot of removed appointment {} was not released: {}",
                    removed.appointment.id, e
                );
                None
            }
        };
        (removed.appointment, released)
    }

    /// Clear the booking fields of the slot bound to this appointment.
    /// Idempotent; a missing binding is logged, not an error.
    pub async fn release(&self, appointment_id: Uuid) -> Result<Option<Slot>, AppointmentError> {
        let released = self.ctx.store.release_appointment_slot(appointment_id).await?;
        match &released {
            Some(slot) => info!("Released slot {} from appointment {}", slot.id, appointment_id),
            None => debug!("No slot bound to appointment {}", appointment_id),
        }
        Ok(released)
    }

    // ==========================================================================
    // STATUS CHANGES
    // ==========================================================================

    #[instrument(skip(self))]
    pub async fn set_status(
        &self,
        appointment_id: Uuid,
        status: AppointmentStatus,
        updated_by: Option<Uuid>,
    ) -> Result<Appointment, AppointmentError> {
        let current = self.ctx.store.get_appointment(appointment_id).await?;
        let next = self.expect_status(current.status, AppointmentAction::SetStatus(status))?;

        let updated = self
            .ctx
            .store
            .update_appointment_status(appointment_id, current.status, next, updated_by)
            .await?;
        info!("Appointment {} status {} -> {}", appointment_id, current.status, updated.status);
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn approve(&self, appointment_id: Uuid, approved_by: Option<Uuid>) -> Result<Appointment, AppointmentError> {
        let current = self.ctx.store.get_appointment(appointment_id).await?;
        let next = self.expect_status(current.status, AppointmentAction::Approve)?;

        let updated = self
            .ctx
            .store
            .update_appointment_status(appointment_id, current.status, next, approved_by)
            .await?;
        info!("Approved appointment {}", appointment_id);
        Ok(updated)
    }

    /// Reject a pending appointment: the row is deleted and the slot freed.
    #[instrument(skip(self, reason))]
    pub async fn reject(
        &self,
        appointment_id: Uuid,
        reason: String,
        rejected_by: Option<Uuid>,
    ) -> Result<RemovalOutcome, AppointmentError> {
        let reason = reason.trim().to_string();
        if reason.is_empty() {
            return Err(AppointmentError::ValidationError("a rejection reason is required".to_string()));
        }

        let current = self.ctx.store.get_appointment(appointment_id).await?;
        self.expect_delete(current.status, AppointmentAction::Reject)?;

        let removed = self
            .ctx
            .store
            .remove_appointment(appointment_id, current.status)
            .await?;
        let (appointment, released_slot) = Self::settle_removal(removed);
        info!(
            "Rejected appointment {} (by {:?}): {}",
            appointment_id, rejected_by, reason
        );

        Ok(RemovalOutcome {
            appointment,
            released_slot,
            reason: Some(reason),
        })
    }

    // ==========================================================================
    // QUERIES
    // ==========================================================================

    pub async fn get(&self, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        Ok(self.ctx.store.get_appointment(appointment_id).await?)
    }

    pub async fn list(&self, filter: AppointmentFilter) -> Result<Vec<Appointment>, AppointmentError> {
        if let (Some(from), Some(to)) = (filter.from_date, filter.to_date) {
            if to < from {
                return Err(AppointmentError::ValidationError(format!(
                    "range end {} is before start {}",
                    to, from
                )));
            }
        }
        Ok(self.ctx.store.list_appointments(&filter).await?)
    }

    // ==========================================================================
    // HELPERS
    // ==========================================================================

    fn expect_status(
        &self,
        current: AppointmentStatus,
        action: AppointmentAction,
    ) -> Result<AppointmentStatus, AppointmentError> {
        match self.lifecycle.transition(current, action)? {
            Transition::To(status) => Ok(status),
            Transition::Delete => Err(AppointmentError::InvalidTransition { status: current, action }),
        }
    }

    fn expect_delete(&self, current: AppointmentStatus, action: AppointmentAction) -> Result<(), AppointmentError> {
        match self.lifecycle.transition(current, action)? {
            Transition::Delete => Ok(()),
            Transition::To(_) => Err(AppointmentError::InvalidTransition { status: current, action }),
        }
    }
}
