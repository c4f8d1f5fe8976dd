pub mod lifecycle;
pub mod practitioner;
pub mod scheduler;
pub mod slots;

pub use lifecycle::SlotLifecycleService;
pub use practitioner::PractitionerResolver;
pub use scheduler::{MaintenanceJob, MaintenanceScheduler};
pub use slots::SlotService;
