#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use uuid::Uuid;

use shared_database::{MemoryStore, SchedulingStore};
use shared_models::{AppointmentDetails, AppointmentFilter, Slot, SlotFilter};
use shared_utils::test_utils::{clock_at, date, hm, new_slot, TestConfig};
use slot_cell::{LocationCatalog, SchedulingContext};

use appointment_cell::models::SlotTarget;

/// Thursday 2025-06-12, 07:00 clinic time.
pub fn today() -> NaiveDate {
    date(2025, 6, 12)
}

pub fn tomorrow() -> NaiveDate {
    date(2025, 6, 13)
}

pub struct Harness {
    pub doctor_id: Uuid,
    pub store: Arc<MemoryStore>,
    pub ctx: Arc<SchedulingContext>,
}

impl Harness {
    pub fn new() -> Self {
        Self::at(today(), hm(7, 0))
    }

    pub fn at(on: NaiveDate, at: NaiveTime) -> Self {
        let config = TestConfig::default();
        let store = Arc::new(MemoryStore::new());
        let ctx = SchedulingContext::new(
            config.to_arc(),
            store.clone() as Arc<dyn SchedulingStore>,
            clock_at(on, at),
            LocationCatalog::builtin(),
        );
        Self {
            doctor_id: config.practitioner_id,
            store,
            ctx: Arc::new(ctx),
        }
    }

    pub async fn slot(&self, on: NaiveDate, start: NaiveTime, location: &str) -> Slot {
        self.store
            .insert_slot(new_slot(self.doctor_id, on, start, 30, location))
            .await
            .expect("slot inserted")
    }

    pub async fn reload(&self, slot_id: Uuid) -> Slot {
        self.store.get_slot(slot_id).await.expect("slot exists")
    }

    /// Every booked slot points at a live appointment with matching fields,
    /// and every stored appointment is bound to exactly one slot.
    pub async fn assert_consistent(&self) {
        let slots = self.store.list_slots(&SlotFilter::default()).await.unwrap();
        let appointments = self.store.list_appointments(&AppointmentFilter::default()).await.unwrap();

        let mut bound: HashMap<Uuid, usize> = HashMap::new();
        for slot in &slots {
            assert!(slot.binding_is_consistent(), "slot {} has torn booking fields", slot.id);
            if let Some(appointment_id) = slot.appointment_id {
                *bound.entry(appointment_id).or_default() += 1;
                let appointment = appointments
                    .iter()
                    .find(|a| a.id == appointment_id)
                    .unwrap_or_else(|| panic!("slot {} points at missing appointment", slot.id));
                assert_eq!(appointment.appointment_date, slot.date);
                assert_eq!(appointment.appointment_time, slot.start_time);
                assert_eq!(appointment.doctor_id, slot.doctor_id);
                assert_eq!(appointment.location, slot.location);
                assert_eq!(Some(appointment.patient_id), slot.booked_by);
            }
        }

        for appointment in &appointments {
            assert_eq!(
                bound.get(&appointment.id).copied().unwrap_or(0),
                1,
                "appointment {} must hold exactly one slot",
                appointment.id
            );
        }
    }
}

pub fn at_slot(slot: &Slot) -> SlotTarget {
    SlotTarget::Slot(slot.id)
}

pub fn details(reason: &str) -> AppointmentDetails {
    AppointmentDetails {
        reason: Some(reason.to_string()),
        ..AppointmentDetails::default()
    }
}
