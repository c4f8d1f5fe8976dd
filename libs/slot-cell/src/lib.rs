pub mod catalog;
pub mod context;
pub mod error;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use catalog::{CatalogError, Interval, LocationCatalog};
pub use context::SchedulingContext;
pub use error::SlotError;
pub use models::*;
pub use services::*;
