use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use shared_database::StoreError;
use shared_models::{NewSlot, Slot, SlotFilter, SlotUpdate};

use crate::context::SchedulingContext;
use crate::error::SlotError;

/// Slot queries and admin edits.
pub struct SlotService {
    ctx: Arc<SchedulingContext>,
}

impl SlotService {
    pub fn new(ctx: Arc<SchedulingContext>) -> Self {
        Self { ctx }
    }

    /// Every slot on `date`, ordered by start time then location.
    pub async fn list_slots(
        &self,
        date: NaiveDate,
        location: Option<String>,
        doctor_id: Option<Uuid>,
    ) -> Result<Vec<Slot>, SlotError> {
        let filter = SlotFilter {
            location,
            doctor_id,
            ..SlotFilter::on(date)
        };
        Ok(self.ctx.store.list_slots(&filter).await?)
    }

    /// Slots a patient could book right now: available, free (or held by a
    /// missing appointment), and not already started when `date` is today.
    pub async fn list_bookable_slots(&self, date: NaiveDate, location: Option<String>) -> Result<Vec<Slot>, SlotError> {
        if self.ctx.clock.is_past_date(date) {
            return Ok(Vec::new());
        }

        let doctor_id = self.ctx.practitioners.resolve().await?;
        let slots = self.list_slots(date, location, Some(doctor_id)).await?;

        let mut bookable = Vec::with_capacity(slots.len());
        for mut slot in slots {
            if !slot.is_available || self.ctx.clock.has_started(slot.date, slot.start_time) {
                continue;
            }
            if slot.is_booked {
                if !self.is_orphan(&slot).await? {
                    continue;
                }
                slot.release();
            }
            bookable.push(slot);
        }

        debug!("{} bookable slots on {}", bookable.len(), date);
        Ok(bookable)
    }

    async fn is_orphan(&self, slot: &Slot) -> Result<bool, SlotError> {
        let Some(appointment_id) = slot.appointment_id else {
            return Ok(true);
        };
        match self.ctx.store.get_appointment(appointment_id).await {
            Ok(_) => Ok(false),
            Err(StoreError::AppointmentNotFound(_)) => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_slot(&self, id: Uuid) -> Result<Slot, SlotError> {
        Ok(self.ctx.store.get_slot(id).await?)
    }

    // ==========================================================================
    // ADMIN
    // ==========================================================================

    #[instrument(skip(self, notes))]
    pub async fn create_slot(
        &self,
        date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
        location: String,
        notes: Option<String>,
        created_by: Option<Uuid>,
    ) -> Result<Slot, SlotError> {
        if self.ctx.clock.is_past_date(date) {
            return Err(SlotError::Validation(format!("cannot create a slot on past date {}", date)));
        }
        validate_times(start_time, end_time)?;
        let location = validate_location(&location)?;

        let doctor_id = self.ctx.practitioners.resolve().await?;
        let slot = self
            .ctx
            .store
            .insert_slot(NewSlot {
                doctor_id,
                date,
                start_time,
                end_time,
                location,
                notes,
                created_by,
            })
            .await?;

        info!("Created slot {} on {} at {}", slot.id, slot.date, slot.start_time.format("%H:%M"));
        Ok(slot)
    }

    /// Time and location edits are refused while the slot is booked.
    #[instrument(skip(self, update))]
    pub async fn edit_slot(&self, id: Uuid, mut update: SlotUpdate) -> Result<Slot, SlotError> {
        if update.start_time.is_some() || update.end_time.is_some() {
            let current = self.ctx.store.get_slot(id).await?;
            validate_times(
                update.start_time.unwrap_or(current.start_time),
                update.end_time.unwrap_or(current.end_time),
            )?;
        }
        if let Some(location) = update.location.take() {
            update.location = Some(validate_location(&location)?);
        }

        Ok(self.ctx.store.update_slot(id, update).await?)
    }

    /// Withdraw (`false`) or restore (`true`) a slot without deleting it.
    /// Withdrawing a booked slot leaves its booking in place.
    pub async fn set_availability(&self, id: Uuid, is_available: bool) -> Result<Slot, SlotError> {
        let slot = self
            .ctx
            .store
            .update_slot(id, SlotUpdate::availability(is_available))
            .await?;
        info!("Slot {} availability set to {}", id, is_available);
        Ok(slot)
    }

    pub async fn delete_slot(&self, id: Uuid) -> Result<(), SlotError> {
        self.ctx.store.delete_slot(id, false).await?;
        info!("Deleted slot {}", id);
        Ok(())
    }
}

fn validate_times(start: NaiveTime, end: NaiveTime) -> Result<(), SlotError> {
    if end <= start {
        return Err(SlotError::Validation(format!(
            "end time {} must be after start time {}",
            end.format("%H:%M"),
            start.format("%H:%M")
        )));
    }
    Ok(())
}

fn validate_location(location: &str) -> Result<String, SlotError> {
    let trimmed = location.trim();
    if trimmed.is_empty() {
        return Err(SlotError::Validation("location is required".to_string()));
    }
    Ok(trimmed.to_string())
}
