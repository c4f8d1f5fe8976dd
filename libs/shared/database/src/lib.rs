pub mod memory;
pub mod postgrest;
pub mod store;
pub mod supabase;

pub use memory::MemoryStore;
pub use postgrest::SupabaseStore;
pub use store::{build_store, RemovedAppointment, SchedulingStore, StoreError, StoreResult, TimedStore};
