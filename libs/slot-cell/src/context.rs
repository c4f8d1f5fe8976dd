use std::sync::Arc;

use shared_config::AppConfig;
use shared_database::{build_store, SchedulingStore};
use shared_utils::ClinicClock;

use crate::catalog::LocationCatalog;
use crate::error::SlotError;
use crate::services::practitioner::PractitionerResolver;

/// Shared state behind the slot and appointment routes.
pub struct SchedulingContext {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn SchedulingStore>,
    pub clock: ClinicClock,
    pub catalog: Arc<LocationCatalog>,
    pub practitioners: Arc<PractitionerResolver>,
}

impl SchedulingContext {
    pub fn new(
        config: Arc<AppConfig>,
        store: Arc<dyn SchedulingStore>,
        clock: ClinicClock,
        catalog: LocationCatalog,
    ) -> Self {
        let practitioners = Arc::new(PractitionerResolver::new(config.practitioner_id, store.clone()));
        Self {
            config,
            store,
            clock,
            catalog: Arc::new(catalog),
            practitioners,
        }
    }

    /// Store, clock and catalog as selected by configuration.
    pub fn from_config(config: Arc<AppConfig>) -> Result<Self, SlotError> {
        let store = build_store(&config);
        let clock = ClinicClock::from_name(&config.clinic_timezone)?;
        let catalog = LocationCatalog::from_config(&config)?;
        Ok(Self::new(config, store, clock, catalog))
    }
}
