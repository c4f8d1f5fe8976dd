//! In-process store.
//!
//! One mutex owns every slot and appointment, so each trait method is a
//! serialized critical section: a booking's availability check and its write
//! can never interleave with another writer.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_models::{
    Appointment, AppointmentFilter, AppointmentStatus, NewSlot, Slot, SlotFilter, SlotKey, SlotUpdate,
};

use crate::store::{RemovedAppointment, SchedulingStore, StoreError, StoreResult};

#[derive(Default)]
struct MemoryState {
    slots: HashMap<Uuid, Slot>,
    slot_keys: HashMap<SlotKey, Uuid>,
    appointments: HashMap<Uuid, Appointment>,
}

impl MemoryState {
    fn slot_mut(&mut self, id: Uuid) -> StoreResult<&mut Slot> {
        self.slots.get_mut(&id).ok_or(StoreError::SlotNotFound(id))
    }

    /// A booked slot whose appointment row is gone counts as free.
    fn heal_if_orphan(&mut self, slot_id: Uuid) {
        let orphaned = self.slots.get(&slot_id).is_some_and(|slot| {
            slot.is_booked
                && slot
                    .appointment_id
                    .map_or(true, |id| !self.appointments.contains_key(&id))
        });

        if orphaned {
            if let Some(slot) = self.slots.get_mut(&slot_id) {
                warn!("Releasing orphan slot {} (appointment {:?} missing)", slot.id, slot.appointment_id);
                slot.release();
            }
        }
    }

    fn ensure_doctor_free(&self, slot: &Slot, ignore: Uuid) -> StoreResult<()> {
        let taken = self
            .appointments
            .values()
            .any(|a| a.id != ignore && a.occupies(slot.doctor_id, slot.date, slot.start_time));

        if taken {
            return Err(StoreError::DoctorConflict {
                doctor_id: slot.doctor_id,
                date: slot.date,
                time: slot.start_time,
            });
        }
        Ok(())
    }

    fn expect_status(&self, id: Uuid, expected: AppointmentStatus) -> StoreResult<()> {
        let appointment = self.appointments.get(&id).ok_or(StoreError::AppointmentNotFound(id))?;
        if appointment.status != expected {
            return Err(StoreError::StaleAppointment {
                id,
                actual: appointment.status,
            });
        }
        Ok(())
    }

    fn release_bound_slots(&mut self, appointment_id: Uuid) -> Option<Slot> {
        let mut released = None;
        for slot in self.slots.values_mut().filter(|s| s.appointment_id == Some(appointment_id)) {
            slot.release();
            released = Some(slot.clone());
        }
        released
    }
}

fn copy_slot_fields(appointment: &mut Appointment, slot: &Slot) {
    appointment.doctor_id = slot.doctor_id;
    appointment.appointment_date = slot.date;
    appointment.appointment_time = slot.start_time;
    appointment.duration_minutes = slot.duration_minutes;
    appointment.location = slot.location.clone();
}

fn sorted_slots(mut slots: Vec<Slot>) -> Vec<Slot> {
    slots.sort_by(|a, b| {
        (a.date, a.start_time, &a.location).cmp(&(b.date, b.start_time, &b.location))
    });
    slots
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    practitioners: Vec<Uuid>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_practitioners(practitioners: Vec<Uuid>) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            practitioners,
        }
    }

    /// Deletes an appointment row without touching its slot, the way an
    /// out-of-band writer would. Leaves an orphan behind.
    pub async fn purge_appointment_row(&self, appointment_id: Uuid) -> bool {
        self.state.lock().await.appointments.remove(&appointment_id).is_some()
    }

    pub async fn slot_count(&self) -> usize {
        self.state.lock().await.slots.len()
    }

    pub async fn appointment_count(&self) -> usize {
        self.state.lock().await.appointments.len()
    }
}

#[async_trait]
impl SchedulingStore for MemoryStore {
    async fn active_practitioners(&self) -> StoreResult<Vec<Uuid>> {
        Ok(self.practitioners.clone())
    }

    async fn insert_slot(&self, new_slot: NewSlot) -> StoreResult<Slot> {
        let mut state = self.state.lock().await;
        let key = new_slot.key();

        if state.slot_keys.contains_key(&key) {
            return Err(StoreError::DuplicateSlot(key));
        }

        let slot = new_slot.into_slot(Utc::now());
        state.slot_keys.insert(key, slot.id);
        state.slots.insert(slot.id, slot.clone());
        Ok(slot)
    }

    async fn get_slot(&self, id: Uuid) -> StoreResult<Slot> {
        let state = self.state.lock().await;
        state.slots.get(&id).cloned().ok_or(StoreError::SlotNotFound(id))
    }

    async fn find_slot(&self, key: &SlotKey) -> StoreResult<Option<Slot>> {
        let state = self.state.lock().await;
        Ok(state.slot_keys.get(key).and_then(|id| state.slots.get(id)).cloned())
    }

    async fn list_slots(&self, filter: &SlotFilter) -> StoreResult<Vec<Slot>> {
        let state = self.state.lock().await;
        let slots = state.slots.values().filter(|s| filter.matches(s)).cloned().collect();
        Ok(sorted_slots(slots))
    }

    async fn update_slot(&self, id: Uuid, update: SlotUpdate) -> StoreResult<Slot> {
        let mut state = self.state.lock().await;
        let current = state.slots.get(&id).cloned().ok_or(StoreError::SlotNotFound(id))?;

        if update.moves_slot() && current.is_booked {
            return Err(StoreError::SlotBooked(id));
        }

        let mut next = current.clone();
        if let Some(start) = update.start_time {
            next.start_time = start;
        }
        if let Some(end) = update.end_time {
            next.end_time = end;
        }
        if let Some(location) = update.location {
            next.location = location;
        }
        if let Some(is_available) = update.is_available {
            next.is_available = is_available;
        }
        if let Some(notes) = update.notes {
            next.notes = Some(notes);
        }
        next.duration_minutes = (next.end_time - next.start_time).num_minutes() as i32;

        let old_key = current.key();
        let new_key = next.key();
        if new_key != old_key {
            if state.slot_keys.contains_key(&new_key) {
                return Err(StoreError::DuplicateSlot(new_key));
            }
            state.slot_keys.remove(&old_key);
            state.slot_keys.insert(new_key, id);
        }

        state.slots.insert(id, next.clone());
        Ok(next)
    }

    async fn delete_slot(&self, id: Uuid, allow_booked: bool) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let slot = state.slots.get(&id).ok_or(StoreError::SlotNotFound(id))?;

        if slot.is_booked && !allow_booked {
            return Err(StoreError::SlotBooked(id));
        }

        let key = slot.key();
        state.slot_keys.remove(&key);
        state.slots.remove(&id);
        Ok(())
    }

    async fn slots_before(&self, date: NaiveDate) -> StoreResult<Vec<Slot>> {
        let state = self.state.lock().await;
        let slots = state.slots.values().filter(|s| s.date < date).cloned().collect();
        Ok(sorted_slots(slots))
    }

    async fn booked_slots(&self) -> StoreResult<Vec<Slot>> {
        let state = self.state.lock().await;
        let slots = state.slots.values().filter(|s| s.is_booked).cloned().collect();
        Ok(sorted_slots(slots))
    }

    async fn release_slot_if_bound(&self, slot_id: Uuid, appointment_id: Uuid) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        let slot = state.slot_mut(slot_id)?;

        if slot.appointment_id != Some(appointment_id) {
            return Ok(false);
        }
        slot.release();
        Ok(true)
    }

    async fn get_appointment(&self, id: Uuid) -> StoreResult<Appointment> {
        let state = self.state.lock().await;
        state
            .appointments
            .get(&id)
            .cloned()
            .ok_or(StoreError::AppointmentNotFound(id))
    }

    async fn list_appointments(&self, filter: &AppointmentFilter) -> StoreResult<Vec<Appointment>> {
        let state = self.state.lock().await;
        let mut appointments: Vec<Appointment> = state
            .appointments
            .values()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        appointments.sort_by_key(|a| (a.appointment_date, a.appointment_time, a.created_at));
        Ok(appointments)
    }

    async fn update_appointment_status(
        &self,
        id: Uuid,
        expected: AppointmentStatus,
        status: AppointmentStatus,
        updated_by: Option<Uuid>,
    ) -> StoreResult<Appointment> {
        let mut state = self.state.lock().await;
        let appointment = state
            .appointments
            .get_mut(&id)
            .ok_or(StoreError::AppointmentNotFound(id))?;

        if appointment.status != expected {
            return Err(StoreError::StaleAppointment {
                id,
                actual: appointment.status,
            });
        }

        appointment.status = status;
        appointment.updated_by = updated_by.or(appointment.updated_by);
        appointment.updated_at = Utc::now();
        Ok(appointment.clone())
    }

    async fn book_slot(&self, slot_id: Uuid, mut appointment: Appointment) -> StoreResult<(Slot, Appointment)> {
        let mut state = self.state.lock().await;

        state.heal_if_orphan(slot_id);
        let slot = state.slots.get(&slot_id).cloned().ok_or(StoreError::SlotNotFound(slot_id))?;

        if !slot.is_bookable() {
            return Err(StoreError::SlotUnavailable(slot_id));
        }
        state.ensure_doctor_free(&slot, appointment.id)?;

        copy_slot_fields(&mut appointment, &slot);
        state.appointments.insert(appointment.id, appointment.clone());

        let slot = state.slot_mut(slot_id)?;
        slot.bind(appointment.patient_id, appointment.id);
        let slot = slot.clone();

        debug!("Slot {} bound to appointment {}", slot.id, appointment.id);
        Ok((slot, appointment))
    }

    async fn rebook(
        &self,
        mut appointment: Appointment,
        expected: AppointmentStatus,
        new_slot_id: Uuid,
    ) -> StoreResult<(Slot, Appointment)> {
        let mut state = self.state.lock().await;
        state.expect_status(appointment.id, expected)?;

        state.heal_if_orphan(new_slot_id);
        let target = state
            .slots
            .get(&new_slot_id)
            .cloned()
            .ok_or(StoreError::SlotNotFound(new_slot_id))?;

        if !target.is_bound_to(appointment.id) && !target.is_bookable() {
            return Err(StoreError::SlotUnavailable(new_slot_id));
        }
        state.ensure_doctor_free(&target, appointment.id)?;

        state.release_bound_slots(appointment.id);

        copy_slot_fields(&mut appointment, &target);
        appointment.updated_at = Utc::now();
        state.appointments.insert(appointment.id, appointment.clone());

        let slot = state.slot_mut(new_slot_id)?;
        slot.bind(appointment.patient_id, appointment.id);
        Ok((slot.clone(), appointment))
    }

    async fn release_appointment_slot(&self, appointment_id: Uuid) -> StoreResult<Option<Slot>> {
        let mut state = self.state.lock().await;
        Ok(state.release_bound_slots(appointment_id))
    }

    async fn remove_appointment(
        &self,
        appointment_id: Uuid,
        expected: AppointmentStatus,
    ) -> StoreResult<RemovedAppointment> {
        let mut state = self.state.lock().await;
        state.expect_status(appointment_id, expected)?;
        let appointment = state
            .appointments
            .remove(&appointment_id)
            .ok_or(StoreError::AppointmentNotFound(appointment_id))?;

        let released = state.release_bound_slots(appointment_id);
        Ok(RemovedAppointment {
            appointment,
            released: Ok(released),
        })
    }
}
