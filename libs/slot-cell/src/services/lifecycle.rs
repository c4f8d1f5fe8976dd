use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use tracing::{debug, error, info, instrument, warn};

use shared_database::StoreError;
use shared_models::{AppointmentFilter, NewSlot, Slot, SlotFilter, SlotKey};

use crate::context::SchedulingContext;
use crate::error::SlotError;
use crate::models::{GenerationTarget, MaintenanceOperation, MaintenanceReport};

/// Longest explicit range a single generate call may cover.
pub const MAX_GENERATION_DAYS: i64 = 92;

/// Materializes slots from the catalog and reclaims past records.
///
/// Every operation is idempotent. Generation only touches today-or-later
/// dates and cleanup only strictly-past dates, so the two never contend with
/// each other or with a booking made for today.
pub struct SlotLifecycleService {
    ctx: Arc<SchedulingContext>,
}

impl SlotLifecycleService {
    pub fn new(ctx: Arc<SchedulingContext>) -> Self {
        Self { ctx }
    }

    // ==========================================================================
    // GENERATION
    // ==========================================================================

    pub async fn generate(&self, target: GenerationTarget) -> Result<MaintenanceReport, SlotError> {
        let dates = self.resolve_dates(target)?;
        self.generate_dates(MaintenanceOperation::GenerateSlots, &dates).await
    }

    /// Slots for today through today + `horizon_days` - 1.
    #[instrument(skip(self))]
    pub async fn ensure_rolling_window(&self, horizon_days: u32) -> Result<MaintenanceReport, SlotError> {
        let dates = self.ctx.clock.window(horizon_days);
        let report = self
            .generate_dates(MaintenanceOperation::EnsureRollingWindow, &dates)
            .await?;

        info!(
            "Rolling window of {} days ensured: {} created, {} already present",
            horizon_days, report.affected, report.skipped
        );
        Ok(report)
    }

    fn resolve_dates(&self, target: GenerationTarget) -> Result<Vec<NaiveDate>, SlotError> {
        let today = self.ctx.clock.today();

        match target {
            GenerationTarget::Date(date) => {
                if date < today {
                    return Err(SlotError::Validation(format!(
                        "cannot generate slots for past date {}",
                        date
                    )));
                }
                Ok(vec![date])
            }
            GenerationTarget::Range { from, to } => {
                if to < from {
                    return Err(SlotError::Validation(format!("range end {} is before start {}", to, from)));
                }
                if (to - from).num_days() >= MAX_GENERATION_DAYS {
                    return Err(SlotError::Validation(format!(
                        "range {}..{} exceeds {} days",
                        from, to, MAX_GENERATION_DAYS
                    )));
                }
                // Past days in the range are silently skipped.
                let first = from.max(today);
                Ok(first
                    .iter_days()
                    .take_while(|d| *d <= to)
                    .collect())
            }
            GenerationTarget::DaysAhead(days) => {
                if days as i64 > MAX_GENERATION_DAYS {
                    return Err(SlotError::Validation(format!(
                        "days_ahead {} exceeds {} days",
                        days, MAX_GENERATION_DAYS
                    )));
                }
                Ok(self.ctx.clock.window(days))
            }
        }
    }

    async fn generate_dates(
        &self,
        operation: MaintenanceOperation,
        dates: &[NaiveDate],
    ) -> Result<MaintenanceReport, SlotError> {
        let doctor_id = self.ctx.practitioners.resolve().await?;
        let mut report = MaintenanceReport::new(operation);

        for &date in dates {
            let open = self.ctx.catalog.open_on(date);
            if open.is_empty() {
                debug!("No location open on {}", date);
                continue;
            }

            let filter = SlotFilter {
                doctor_id: Some(doctor_id),
                ..SlotFilter::on(date)
            };
            let existing: HashSet<SlotKey> = match self.ctx.store.list_slots(&filter).await {
                Ok(slots) => slots.iter().map(|s| s.key()).collect(),
                Err(e) => {
                    error!("Failed to read existing slots for {}: {}", date, e);
                    report.fail(date, e);
                    continue;
                }
            };

            for (location, intervals) in open {
                for interval in intervals {
                    let new_slot = NewSlot {
                        doctor_id,
                        date,
                        start_time: interval.start,
                        end_time: interval.end,
                        location: location.to_string(),
                        notes: None,
                        created_by: None,
                    };
                    let key = new_slot.key();
                    if existing.contains(&key) {
                        report.skipped += 1;
                        continue;
                    }

                    match self.ctx.store.insert_slot(new_slot).await {
                        Ok(_) => report.affected += 1,
                        // Created concurrently since the read above.
                        Err(StoreError::DuplicateSlot(_)) => report.skipped += 1,
                        Err(e) => {
                            warn!("Failed to create slot {} {} {}: {}", date, interval, location, e);
                            report.fail(format!("{} {} {}", date, interval, location), e);
                        }
                    }
                }
            }
        }

        debug!("{:?}: {} created, {} skipped", operation, report.affected, report.skipped);
        Ok(report)
    }

    // ==========================================================================
    // CLEANUP
    // ==========================================================================

    /// Delete unbooked slots dated strictly before today. Booked ones are
    /// left for appointment cleanup to release first, unless their
    /// appointment is already gone, in which case they are freed and deleted.
    #[instrument(skip(self))]
    pub async fn cleanup_past_slots(&self) -> Result<MaintenanceReport, SlotError> {
        let today = self.ctx.clock.today();
        let mut report = MaintenanceReport::new(MaintenanceOperation::CleanupPastSlots);

        let past = self.ctx.store.slots_before(today).await?;
        if past.is_empty() {
            debug!("No past slots to clean up");
            return Ok(report);
        }

        for slot in past {
            if slot.is_booked {
                match self.release_if_orphaned(&slot).await {
                    Ok(true) => {}
                    Ok(false) => {
                        report.skipped += 1;
                        continue;
                    }
                    Err(e) => {
                        report.fail(slot.id, e);
                        continue;
                    }
                }
            }

            match self.ctx.store.delete_slot(slot.id, false).await {
                Ok(()) => report.affected += 1,
                Err(StoreError::SlotNotFound(_)) | Err(StoreError::SlotBooked(_)) => report.skipped += 1,
                Err(e) => {
                    warn!("Failed to delete past slot {}: {}", slot.id, e);
                    report.fail(slot.id, e);
                }
            }
        }

        info!("Deleted {} past slots ({} skipped)", report.affected, report.skipped);
        Ok(report)
    }

    /// Release the slot of, then delete, every appointment dated strictly
    /// before today.
    #[instrument(skip(self))]
    pub async fn cleanup_past_appointments(&self) -> Result<MaintenanceReport, SlotError> {
        let today = self.ctx.clock.today();
        let mut report = MaintenanceReport::new(MaintenanceOperation::CleanupPastAppointments);

        let past = self
            .ctx
            .store
            .list_appointments(&AppointmentFilter::before(today))
            .await?;
        if past.is_empty() {
            debug!("No past appointments to clean up");
            return Ok(report);
        }

        for appointment in past {
            match self
                .ctx
                .store
                .remove_appointment(appointment.id, appointment.status)
                .await
            {
                Ok(removed) => {
                    report.affected += 1;
                    match removed.released {
                        Ok(Some(_)) => {}
                        Ok(None) => debug!("Past appointment {} had no bound slot", appointment.id),
                        Err(e) => {
                            warn!("Appointment {} removed but its slot was not released: {}", appointment.id, e);
                            report.fail(appointment.id, e);
                        }
                    }
                }
                Err(StoreError::AppointmentNotFound(_)) | Err(StoreError::StaleAppointment { .. }) => {
                    report.skipped += 1
                }
                Err(e) => {
                    warn!("Failed to clean up appointment {}: {}", appointment.id, e);
                    report.fail(appointment.id, e);
                }
            }
        }

        info!("Removed {} past appointments", report.affected);
        Ok(report)
    }

    /// Appointment cleanup, orphan repair, then deletion of every past slot
    /// regardless of its booking flag.
    #[instrument(skip(self))]
    pub async fn force_cleanup(&self) -> Result<MaintenanceReport, SlotError> {
        let mut report = MaintenanceReport::new(MaintenanceOperation::ForceCleanup);
        report.absorb(self.cleanup_past_appointments().await?);
        report.absorb(self.repair_orphan_slots().await?);

        let today = self.ctx.clock.today();
        for slot in self.ctx.store.slots_before(today).await? {
            match self.ctx.store.delete_slot(slot.id, true).await {
                Ok(()) => report.affected += 1,
                Err(StoreError::SlotNotFound(_)) => report.skipped += 1,
                Err(e) => {
                    warn!("Force cleanup failed to delete slot {}: {}", slot.id, e);
                    report.fail(slot.id, e);
                }
            }
        }

        warn!(
            "Force cleanup removed {} records ({} failures)",
            report.affected,
            report.failures.len()
        );
        Ok(report)
    }

    /// Free `slot` when the appointment it is bound to no longer exists.
    /// Returns whether the slot is now free.
    async fn release_if_orphaned(&self, slot: &Slot) -> Result<bool, StoreError> {
        // A booked slot without a reference is left for orphan repair to report.
        let Some(appointment_id) = slot.appointment_id else {
            return Ok(false);
        };

        match self.ctx.store.get_appointment(appointment_id).await {
            Ok(_) => Ok(false),
            Err(StoreError::AppointmentNotFound(_)) => {
                let released = self.ctx.store.release_slot_if_bound(slot.id, appointment_id).await?;
                if released {
                    warn!("Released orphan past slot {} (appointment {} missing)", slot.id, appointment_id);
                }
                Ok(released)
            }
            Err(e) => Err(e),
        }
    }

    /// Release booked slots whose appointment no longer exists.
    #[instrument(skip(self))]
    pub async fn repair_orphan_slots(&self) -> Result<MaintenanceReport, SlotError> {
        let mut report = MaintenanceReport::new(MaintenanceOperation::RepairOrphanSlots);

        for slot in self.ctx.store.booked_slots().await? {
            let Some(appointment_id) = slot.appointment_id else {
                report.fail(slot.id, "booked slot without an appointment reference");
                continue;
            };

            match self.ctx.store.get_appointment(appointment_id).await {
                Ok(_) => {}
                Err(StoreError::AppointmentNotFound(_)) => {
                    match self.ctx.store.release_slot_if_bound(slot.id, appointment_id).await {
                        Ok(true) => {
                            warn!("Released orphan slot {} (appointment {} missing)", slot.id, appointment_id);
                            report.affected += 1;
                        }
                        Ok(false) => report.skipped += 1,
                        Err(e) => report.fail(slot.id, e),
                    }
                }
                Err(e) => report.fail(slot.id, e),
            }
        }

        if report.affected > 0 {
            info!("Repaired {} orphan slots", report.affected);
        }
        Ok(report)
    }

    /// Upper bound of dates the rolling window keeps materialized.
    pub fn window_end(&self, horizon_days: u32) -> NaiveDate {
        self.ctx.clock.today() + Duration::days(horizon_days.saturating_sub(1) as i64)
    }
}
