pub mod appointment;
pub mod error;
pub mod slot;
pub mod time_format;

pub use appointment::*;
pub use slot::*;
