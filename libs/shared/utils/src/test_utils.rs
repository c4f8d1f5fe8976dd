//! Fixtures shared by the cells' integration tests.

use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveTime, Utc};
use uuid::Uuid;

use shared_config::{AppConfig, StorageBackend};
use shared_models::{
    Appointment, AppointmentPriority, AppointmentStatus, NewSlot, ServiceType,
};

use crate::clock::ClinicClock;

pub struct TestConfig {
    pub practitioner_id: Uuid,
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub storage_timeout_ms: u64,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            practitioner_id: Uuid::new_v4(),
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
            storage_timeout_ms: 2_000,
        }
    }
}

impl TestConfig {
    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            storage_backend: StorageBackend::Memory,
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            practitioner_id: Some(self.practitioner_id),
            storage_timeout_ms: self.storage_timeout_ms,
            enable_maintenance_scheduler: false,
            ..AppConfig::default()
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid test date")
}

pub fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).expect("valid test time")
}

/// IST clock frozen at the given civil date and time.
pub fn clock_at(on: NaiveDate, at: NaiveTime) -> ClinicClock {
    ClinicClock::ist().frozen_at_local(on, at)
}

pub fn new_slot(doctor_id: Uuid, on: NaiveDate, start: NaiveTime, minutes: i64, location: &str) -> NewSlot {
    NewSlot {
        doctor_id,
        date: on,
        start_time: start,
        end_time: start + Duration::minutes(minutes),
        location: location.to_string(),
        notes: None,
        created_by: None,
    }
}

/// An appointment ready to hand to `SchedulingStore::book_slot`. Slot-derived
/// fields are placeholders; the store overwrites them from the slot.
pub fn appointment_for(patient_id: Uuid, status: AppointmentStatus) -> Appointment {
    let now = Utc::now();
    Appointment {
        id: Uuid::new_v4(),
        patient_id,
        doctor_id: Uuid::nil(),
        appointment_date: NaiveDate::MIN,
        appointment_time: NaiveTime::MIN,
        duration_minutes: 0,
        service_type: ServiceType::Consultation,
        status,
        priority: AppointmentPriority::Normal,
        reason: None,
        symptoms: None,
        vitals: None,
        diagnosis: None,
        prescription: None,
        payment: None,
        location: String::new(),
        created_by: None,
        updated_by: None,
        created_at: now,
        updated_at: now,
    }
}
