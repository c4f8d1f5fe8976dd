//! PostgREST-backed store.
//!
//! PostgREST has no multi-statement transactions, so the booking transaction
//! is built from conditional single-row writes (`PATCH ... &is_booked=eq.false`)
//! plus compensating writes when a later step fails. The unique indexes in
//! `migrations/` back the slot tuple and doctor+date+time invariants.
//!
//! Each HTTP request carries its own deadline, and the multi-write operations
//! run on a spawned task: a caller that gives up cannot stop a write from
//! being followed by its compensation.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use shared_models::{
    Appointment, AppointmentFilter, AppointmentStatus, NewSlot, Slot, SlotFilter, SlotKey, SlotUpdate,
};

use crate::store::{RemovedAppointment, SchedulingStore, StoreError, StoreResult};
use crate::supabase::{SupabaseClient, SupabaseError};

const SLOTS: &str = "/rest/v1/slots";
const APPOINTMENTS: &str = "/rest/v1/appointments";
const PROFILES: &str = "/rest/v1/profiles";
const SLOT_ORDER: &str = "order=date.asc,start_time.asc,location.asc";
const APPOINTMENT_ORDER: &str = "order=appointment_date.asc,appointment_time.asc";
const OCCUPYING: &str = "status=in.(pending,scheduled,confirmed,in-progress)";

fn hhmm(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

fn backend(e: SupabaseError) -> StoreError {
    match e {
        SupabaseError::Timeout(ms) => StoreError::Timeout(ms),
        e => StoreError::Backend(e.to_string()),
    }
}

fn release_body() -> Value {
    json!({ "is_booked": false, "booked_by": null, "appointment": null })
}

#[derive(Deserialize)]
struct IdRow {
    id: Uuid,
}

#[derive(Clone)]
pub struct SupabaseStore {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseStore {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    /// Run `op` to completion on its own task, even if the caller is dropped.
    async fn detached<T, F, Fut>(&self, op: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(SupabaseStore) -> Fut,
        Fut: Future<Output = StoreResult<T>> + Send + 'static,
    {
        tokio::spawn(op(self.clone()))
            .await
            .map_err(|e| StoreError::Backend(format!("storage task failed: {}", e)))?
    }

    /// Explain why a write filtered on `id` and `status` matched no row.
    async fn stale_or_missing(&self, id: Uuid) -> StoreError {
        match self.get_appointment(id).await {
            Ok(current) => StoreError::StaleAppointment {
                id,
                actual: current.status,
            },
            Err(e) => e,
        }
    }

    async fn fetch<T: DeserializeOwned>(&self, path: &str) -> StoreResult<Vec<T>> {
        self.supabase
            .request::<Vec<T>>(Method::GET, path, None)
            .await
            .map_err(backend)
    }

    async fn write<T: DeserializeOwned>(&self, method: Method, path: &str, body: Option<Value>) -> Result<Vec<T>, SupabaseError> {
        self.supabase
            .request_with_headers::<Vec<T>>(method, path, body, Some(SupabaseClient::representation()))
            .await
    }

    fn slot_path(key: &SlotKey) -> String {
        format!(
            "{}?doctor_id=eq.{}&date=eq.{}&start_time=eq.{}&location=eq.{}",
            SLOTS,
            key.doctor_id,
            key.date,
            hhmm(key.start_time),
            urlencoding::encode(&key.location)
        )
    }

    async fn occupying_appointment(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
        ignore: Uuid,
    ) -> StoreResult<bool> {
        let path = format!(
            "{}?doctor_id=eq.{}&appointment_date=eq.{}&appointment_time=eq.{}&{}&id=neq.{}&select=id",
            APPOINTMENTS,
            doctor_id,
            date,
            hhmm(time),
            OCCUPYING,
            ignore
        );
        let rows: Vec<IdRow> = self.fetch(&path).await?;
        Ok(!rows.is_empty())
    }

    async fn appointment_exists(&self, id: Uuid) -> StoreResult<bool> {
        let rows: Vec<IdRow> = self.fetch(&format!("{}?id=eq.{}&select=id", APPOINTMENTS, id)).await?;
        Ok(!rows.is_empty())
    }

    /// Conditionally flip a free, available slot to booked.
    async fn claim(&self, slot_id: Uuid, patient_id: Uuid, appointment_id: Uuid) -> StoreResult<Option<Slot>> {
        let path = format!("{}?id=eq.{}&is_booked=eq.false&is_available=eq.true", SLOTS, slot_id);
        let body = json!({ "is_booked": true, "booked_by": patient_id, "appointment": appointment_id });
        let rows: Vec<Slot> = self.write(Method::PATCH, &path, Some(body)).await.map_err(backend)?;
        Ok(rows.into_iter().next())
    }

    /// Claim, healing the slot first when it is held by a missing appointment.
    async fn claim_or_heal(&self, slot_id: Uuid, patient_id: Uuid, appointment_id: Uuid) -> StoreResult<Slot> {
        if let Some(slot) = self.claim(slot_id, patient_id, appointment_id).await? {
            return Ok(slot);
        }

        let current = self.get_slot(slot_id).await?;
        if let (true, Some(holder)) = (current.is_booked, current.appointment_id) {
            if holder != appointment_id && !self.appointment_exists(holder).await? {
                warn!("Releasing orphan slot {} (appointment {} missing)", slot_id, holder);
                self.release_slot_if_bound(slot_id, holder).await?;
                if let Some(slot) = self.claim(slot_id, patient_id, appointment_id).await? {
                    return Ok(slot);
                }
            }
        }

        Err(StoreError::SlotUnavailable(slot_id))
    }

    async fn delete_appointment_row(&self, id: Uuid) -> Result<Vec<Appointment>, SupabaseError> {
        self.write(Method::DELETE, &format!("{}?id=eq.{}", APPOINTMENTS, id), None).await
    }
}

#[async_trait]
impl SchedulingStore for SupabaseStore {
    async fn active_practitioners(&self) -> StoreResult<Vec<Uuid>> {
        let path = format!("{}?role=in.(doctor,admin)&is_active=eq.true&select=id", PROFILES);
        let rows: Vec<IdRow> = self.fetch(&path).await?;
        Ok(rows.into_iter().map(|r| r.id).collect())
    }

    async fn insert_slot(&self, new_slot: NewSlot) -> StoreResult<Slot> {
        let key = new_slot.key();
        let body = json!({
            "doctor_id": new_slot.doctor_id,
            "date": new_slot.date,
            "start_time": hhmm(new_slot.start_time),
            "end_time": hhmm(new_slot.end_time),
            "duration_minutes": new_slot.duration_minutes(),
            "location": new_slot.location,
            "notes": new_slot.notes,
            "created_by": new_slot.created_by,
            "is_available": true,
            "is_booked": false,
        });

        match self.write::<Slot>(Method::POST, SLOTS, Some(body)).await {
            Ok(rows) => rows
                .into_iter()
                .next()
                .ok_or_else(|| StoreError::Backend("slot insert returned no row".to_string())),
            Err(SupabaseError::Conflict(_)) => Err(StoreError::DuplicateSlot(key)),
            Err(e) => Err(backend(e)),
        }
    }

    async fn get_slot(&self, id: Uuid) -> StoreResult<Slot> {
        let rows: Vec<Slot> = self.fetch(&format!("{}?id=eq.{}", SLOTS, id)).await?;
        rows.into_iter().next().ok_or(StoreError::SlotNotFound(id))
    }

    async fn find_slot(&self, key: &SlotKey) -> StoreResult<Option<Slot>> {
        let rows: Vec<Slot> = self.fetch(&Self::slot_path(key)).await?;
        Ok(rows.into_iter().next())
    }

    async fn list_slots(&self, filter: &SlotFilter) -> StoreResult<Vec<Slot>> {
        let mut query = Vec::new();
        if let Some(date) = filter.date {
            query.push(format!("date=eq.{}", date));
        }
        if let Some(location) = &filter.location {
            query.push(format!("location=eq.{}", urlencoding::encode(location)));
        }
        if let Some(doctor_id) = filter.doctor_id {
            query.push(format!("doctor_id=eq.{}", doctor_id));
        }
        query.push(SLOT_ORDER.to_string());

        self.fetch(&format!("{}?{}", SLOTS, query.join("&"))).await
    }

    async fn update_slot(&self, id: Uuid, update: SlotUpdate) -> StoreResult<Slot> {
        let current = self.get_slot(id).await?;
        let mut body = serde_json::Map::new();

        let start = update.start_time.unwrap_or(current.start_time);
        let end = update.end_time.unwrap_or(current.end_time);
        if update.start_time.is_some() || update.end_time.is_some() {
            body.insert("start_time".to_string(), json!(hhmm(start)));
            body.insert("end_time".to_string(), json!(hhmm(end)));
            body.insert("duration_minutes".to_string(), json!((end - start).num_minutes()));
        }
        if let Some(location) = &update.location {
            body.insert("location".to_string(), json!(location));
        }
        if let Some(is_available) = update.is_available {
            body.insert("is_available".to_string(), json!(is_available));
        }
        if let Some(notes) = &update.notes {
            body.insert("notes".to_string(), json!(notes));
        }

        // Time and location edits only apply while the slot is still unbooked.
        let path = if update.moves_slot() {
            format!("{}?id=eq.{}&is_booked=eq.false", SLOTS, id)
        } else {
            format!("{}?id=eq.{}", SLOTS, id)
        };

        match self.write::<Slot>(Method::PATCH, &path, Some(Value::Object(body))).await {
            Ok(rows) => match rows.into_iter().next() {
                Some(slot) => Ok(slot),
                None if update.moves_slot() => Err(StoreError::SlotBooked(id)),
                None => Err(StoreError::SlotNotFound(id)),
            },
            Err(SupabaseError::Conflict(_)) => Err(StoreError::DuplicateSlot(SlotKey {
                doctor_id: current.doctor_id,
                date: current.date,
                start_time: start,
                location: update.location.unwrap_or(current.location),
            })),
            Err(e) => Err(backend(e)),
        }
    }

    async fn delete_slot(&self, id: Uuid, allow_booked: bool) -> StoreResult<()> {
        let path = if allow_booked {
            format!("{}?id=eq.{}", SLOTS, id)
        } else {
            format!("{}?id=eq.{}&is_booked=eq.false", SLOTS, id)
        };

        let rows: Vec<Slot> = self.write(Method::DELETE, &path, None).await.map_err(backend)?;
        if rows.is_empty() {
            // Distinguish a missing slot from one that is held.
            let current = self.get_slot(id).await?;
            if current.is_booked {
                return Err(StoreError::SlotBooked(id));
            }
            return Err(StoreError::Backend(format!("slot {} was not deleted", id)));
        }
        Ok(())
    }

    async fn slots_before(&self, date: NaiveDate) -> StoreResult<Vec<Slot>> {
        self.fetch(&format!("{}?date=lt.{}&{}", SLOTS, date, SLOT_ORDER)).await
    }

    async fn booked_slots(&self) -> StoreResult<Vec<Slot>> {
        self.fetch(&format!("{}?is_booked=eq.true&{}", SLOTS, SLOT_ORDER)).await
    }

    async fn release_slot_if_bound(&self, slot_id: Uuid, appointment_id: Uuid) -> StoreResult<bool> {
        let path = format!("{}?id=eq.{}&appointment=eq.{}", SLOTS, slot_id, appointment_id);
        let rows: Vec<Slot> = self
            .write(Method::PATCH, &path, Some(release_body()))
            .await
            .map_err(backend)?;
        Ok(!rows.is_empty())
    }

    async fn get_appointment(&self, id: Uuid) -> StoreResult<Appointment> {
        let rows: Vec<Appointment> = self.fetch(&format!("{}?id=eq.{}", APPOINTMENTS, id)).await?;
        rows.into_iter().next().ok_or(StoreError::AppointmentNotFound(id))
    }

    async fn list_appointments(&self, filter: &AppointmentFilter) -> StoreResult<Vec<Appointment>> {
        let mut query = Vec::new();
        if let Some(patient_id) = filter.patient_id {
            query.push(format!("patient_id=eq.{}", patient_id));
        }
        if let Some(doctor_id) = filter.doctor_id {
            query.push(format!("doctor_id=eq.{}", doctor_id));
        }
        if let Some(status) = filter.status {
            query.push(format!("status=eq.{}", status));
        }
        if let Some(from) = filter.from_date {
            query.push(format!("appointment_date=gte.{}", from));
        }
        if let Some(to) = filter.to_date {
            query.push(format!("appointment_date=lte.{}", to));
        }
        query.push(APPOINTMENT_ORDER.to_string());

        self.fetch(&format!("{}?{}", APPOINTMENTS, query.join("&"))).await
    }

    async fn update_appointment_status(
        &self,
        id: Uuid,
        expected: AppointmentStatus,
        status: AppointmentStatus,
        updated_by: Option<Uuid>,
    ) -> StoreResult<Appointment> {
        let path = format!("{}?id=eq.{}&status=eq.{}", APPOINTMENTS, id, expected);
        let mut body = json!({ "status": status, "updated_at": chrono::Utc::now() });
        if let Some(user) = updated_by {
            body["updated_by"] = json!(user);
        }

        let rows: Vec<Appointment> = self.write(Method::PATCH, &path, Some(body)).await.map_err(backend)?;
        match rows.into_iter().next() {
            Some(appointment) => Ok(appointment),
            None => {
                let current = self.get_appointment(id).await?;
                Err(StoreError::StaleAppointment {
                    id,
                    actual: current.status,
                })
            }
        }
    }

    async fn book_slot(&self, slot_id: Uuid, appointment: Appointment) -> StoreResult<(Slot, Appointment)> {
        self.detached(move |store| async move { store.book_now(slot_id, appointment).await })
            .await
    }

    async fn rebook(
        &self,
        appointment: Appointment,
        expected: AppointmentStatus,
        new_slot_id: Uuid,
    ) -> StoreResult<(Slot, Appointment)> {
        self.detached(move |store| async move { store.rebook_now(appointment, expected, new_slot_id).await })
            .await
    }

    async fn release_appointment_slot(&self, appointment_id: Uuid) -> StoreResult<Option<Slot>> {
        let path = format!("{}?appointment=eq.{}", SLOTS, appointment_id);
        let rows: Vec<Slot> = self
            .write(Method::PATCH, &path, Some(release_body()))
            .await
            .map_err(backend)?;
        Ok(rows.into_iter().next())
    }

    async fn remove_appointment(
        &self,
        appointment_id: Uuid,
        expected: AppointmentStatus,
    ) -> StoreResult<RemovedAppointment> {
        self.detached(move |store| async move { store.remove_now(appointment_id, expected).await })
            .await
    }
}

impl SupabaseStore {
    async fn book_now(&self, slot_id: Uuid, mut appointment: Appointment) -> StoreResult<(Slot, Appointment)> {
        let slot = self.get_slot(slot_id).await?;
        if !slot.is_available {
            return Err(StoreError::SlotUnavailable(slot_id));
        }

        appointment.doctor_id = slot.doctor_id;
        appointment.appointment_date = slot.date;
        appointment.appointment_time = slot.start_time;
        appointment.duration_minutes = slot.duration_minutes;
        appointment.location = slot.location.clone();

        let conflict = StoreError::DoctorConflict {
            doctor_id: slot.doctor_id,
            date: slot.date,
            time: slot.start_time,
        };
        if self
            .occupying_appointment(slot.doctor_id, slot.date, slot.start_time, appointment.id)
            .await?
        {
            return Err(conflict);
        }

        // Step 1: appointment row. The partial unique index rejects a second
        // occupying appointment at the same doctor+date+time.
        let body = serde_json::to_value(&appointment).map_err(|e| StoreError::Backend(e.to_string()))?;
        let created: Appointment = match self.write::<Appointment>(Method::POST, APPOINTMENTS, Some(body)).await {
            Ok(rows) => rows
                .into_iter()
                .next()
                .ok_or_else(|| StoreError::Backend("appointment insert returned no row".to_string()))?,
            Err(SupabaseError::Conflict(_)) => return Err(conflict),
            Err(e) => return Err(backend(e)),
        };

        // Step 2: conditional claim; undo step 1 if the slot was taken meanwhile.
        match self.claim_or_heal(slot_id, created.patient_id, created.id).await {
            Ok(bound) => {
                debug!("Slot {} bound to appointment {}", bound.id, created.id);
                Ok((bound, created))
            }
            Err(claim_error) => {
                if let Err(e) = self.delete_appointment_row(created.id).await {
                    error!(
                        "Compensating delete of appointment {} failed after slot claim error: {}",
                        created.id, e
                    );
                }
                Err(claim_error)
            }
        }
    }

    async fn rebook_now(
        &self,
        mut appointment: Appointment,
        expected: AppointmentStatus,
        new_slot_id: Uuid,
    ) -> StoreResult<(Slot, Appointment)> {
        let previous = self.get_appointment(appointment.id).await?;
        if previous.status != expected {
            return Err(StoreError::StaleAppointment {
                id: previous.id,
                actual: previous.status,
            });
        }
        let target = self.get_slot(new_slot_id).await?;
        let conflict = StoreError::DoctorConflict {
            doctor_id: target.doctor_id,
            date: target.date,
            time: target.start_time,
        };

        if self
            .occupying_appointment(target.doctor_id, target.date, target.start_time, appointment.id)
            .await?
        {
            return Err(conflict);
        }

        let old_slots: Vec<Slot> = self
            .fetch(&format!("{}?appointment=eq.{}", SLOTS, appointment.id))
            .await?;

        let bound = if target.is_bound_to(appointment.id) {
            target.clone()
        } else {
            if !target.is_available {
                return Err(StoreError::SlotUnavailable(new_slot_id));
            }
            self.claim_or_heal(new_slot_id, appointment.patient_id, appointment.id).await?
        };

        appointment.doctor_id = target.doctor_id;
        appointment.appointment_date = target.date;
        appointment.appointment_time = target.start_time;
        appointment.duration_minutes = target.duration_minutes;
        appointment.location = target.location.clone();
        appointment.updated_at = chrono::Utc::now();

        let body = serde_json::to_value(&appointment).map_err(|e| StoreError::Backend(e.to_string()))?;
        let path = format!("{}?id=eq.{}&status=eq.{}", APPOINTMENTS, appointment.id, expected);
        let updated = match self.write::<Appointment>(Method::PATCH, &path, Some(body)).await {
            Ok(rows) => rows.into_iter().next(),
            Err(SupabaseError::Conflict(_)) => {
                // The occupying index caught a concurrent booking at the target time.
                self.compensate_claim(&bound, &target, appointment.id).await;
                return Err(conflict);
            }
            Err(e) => {
                self.compensate_claim(&bound, &target, appointment.id).await;
                return Err(backend(e));
            }
        };

        let Some(updated) = updated else {
            self.compensate_claim(&bound, &target, appointment.id).await;
            return Err(self.stale_or_missing(appointment.id).await);
        };

        for old in old_slots.iter().filter(|s| s.id != new_slot_id) {
            if let Err(e) = self.release_slot_if_bound(old.id, appointment.id).await {
                // Left booked for a missing binding; orphan repair will free it.
                warn!("Failed to release previous slot {} of appointment {}: {}", old.id, appointment.id, e);
            }
        }

        info!("Appointment {} moved to slot {}", updated.id, bound.id);
        Ok((bound, updated))
    }

    async fn remove_now(&self, appointment_id: Uuid, expected: AppointmentStatus) -> StoreResult<RemovedAppointment> {
        // Delete first: a failed release afterwards leaves a healable orphan,
        // whereas the reverse order could leave a live appointment on a free slot.
        let path = format!("{}?id=eq.{}&status=eq.{}", APPOINTMENTS, appointment_id, expected);
        let deleted: Vec<Appointment> = self.write(Method::DELETE, &path, None).await.map_err(backend)?;
        let Some(appointment) = deleted.into_iter().next() else {
            return Err(self.stale_or_missing(appointment_id).await);
        };

        let released = self.release_appointment_slot(appointment_id).await;
        if let Err(e) = &released {
            warn!("Appointment {} deleted but slot release failed: {}", appointment_id, e);
        }

        Ok(RemovedAppointment { appointment, released })
    }

    /// Undo a claim made during a failed reschedule.
    async fn compensate_claim(&self, bound: &Slot, target: &Slot, appointment_id: Uuid) {
        if target.is_bound_to(appointment_id) {
            return;
        }
        if let Err(e) = self.release_slot_if_bound(bound.id, appointment_id).await {
            error!("Compensating release of slot {} failed: {}", bound.id, e);
        }
    }
}
