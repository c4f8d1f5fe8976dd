#![allow(dead_code)]

use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use uuid::Uuid;

use shared_database::{MemoryStore, SchedulingStore};
use shared_utils::test_utils::{clock_at, TestConfig};
use slot_cell::{LocationCatalog, SchedulingContext};

/// Location "A": Monday to Saturday, 09:00-10:00 in 30 minute slots.
pub fn single_location_catalog() -> LocationCatalog {
    LocationCatalog::from_json_str(
        r#"{"locations":[{"code":"A","sessions":[{"days":[1,2,3,4,5,6],"from":"09:00","to":"10:00"}]}]}"#,
    )
    .expect("valid test catalog")
}

pub struct Harness {
    pub doctor_id: Uuid,
    pub store: Arc<MemoryStore>,
    pub ctx: Arc<SchedulingContext>,
}

impl Harness {
    pub fn new(catalog: LocationCatalog, on: NaiveDate, at: NaiveTime) -> Self {
        let config = TestConfig::default();
        let store = Arc::new(MemoryStore::new());
        let ctx = SchedulingContext::new(
            config.to_arc(),
            store.clone() as Arc<dyn SchedulingStore>,
            clock_at(on, at),
            catalog,
        );
        Self {
            doctor_id: config.practitioner_id,
            store,
            ctx: Arc::new(ctx),
        }
    }

    /// Same store and practitioner, clock moved to another instant.
    pub fn at(&self, on: NaiveDate, at: NaiveTime) -> Arc<SchedulingContext> {
        Arc::new(SchedulingContext::new(
            self.ctx.config.clone(),
            self.store.clone() as Arc<dyn SchedulingStore>,
            clock_at(on, at),
            (*self.ctx.catalog).clone(),
        ))
    }
}
