pub mod clock;
pub mod test_utils;

pub use clock::{parse_flexible_date, parse_time_of_day, ClinicClock, ClockError};
