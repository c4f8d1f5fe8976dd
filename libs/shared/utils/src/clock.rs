//! Clinic civil time.
//!
//! Every "today", "start of day", past/future and day-of-week decision in the
//! scheduling code goes through [`ClinicClock`] so the host timezone never
//! influences which slots exist or which records are reclaimed.

use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
};
use chrono_tz::Tz;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClockError {
    #[error("malformed date '{0}': expected dd/mm/yyyy or an ISO date")]
    MalformedDate(String),

    #[error("malformed time '{0}': expected HH:MM")]
    MalformedTime(String),

    #[error("unknown timezone '{0}'")]
    UnknownTimezone(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClinicClock {
    tz: Tz,
    frozen: Option<DateTime<Utc>>,
}

impl Default for ClinicClock {
    fn default() -> Self {
        Self::ist()
    }
}

impl ClinicClock {
    /// India Standard Time, the clinic's fixed civil zone.
    pub fn ist() -> Self {
        Self {
            tz: chrono_tz::Asia::Kolkata,
            frozen: None,
        }
    }

    pub fn from_name(name: &str) -> Result<Self, ClockError> {
        let tz: Tz = name
            .parse()
            .map_err(|_| ClockError::UnknownTimezone(name.to_string()))?;
        Ok(Self { tz, frozen: None })
    }

    /// Pin "now" to a fixed instant. Used by tests and replayed maintenance.
    pub fn frozen_at(mut self, instant: DateTime<Utc>) -> Self {
        self.frozen = Some(instant);
        self
    }

    /// Pin "now" to a civil date and time in this clock's zone.
    pub fn frozen_at_local(self, date: NaiveDate, time: NaiveTime) -> Self {
        let instant = self.localize(date.and_time(time)).with_timezone(&Utc);
        self.frozen_at(instant)
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn now(&self) -> DateTime<Tz> {
        self.frozen.unwrap_or_else(Utc::now).with_timezone(&self.tz)
    }

    pub fn now_utc(&self) -> DateTime<Utc> {
        self.now().with_timezone(&Utc)
    }

    pub fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    pub fn start_of_day(&self, date: NaiveDate) -> DateTime<Tz> {
        self.localize(date.and_time(NaiveTime::MIN))
    }

    /// 0 = Sunday .. 6 = Saturday.
    pub fn day_of_week(date: NaiveDate) -> u8 {
        date.weekday().num_days_from_sunday() as u8
    }

    pub fn localize(&self, naive: NaiveDateTime) -> DateTime<Tz> {
        match self.tz.from_local_datetime(&naive) {
            LocalResult::Single(at) => at,
            LocalResult::Ambiguous(earliest, _) => earliest,
            // Nonexistent local time (DST gap); treat the wall clock as UTC offset-free.
            LocalResult::None => self.tz.from_utc_datetime(&naive),
        }
    }

    /// Strictly before the current civil day.
    pub fn is_past_date(&self, date: NaiveDate) -> bool {
        date < self.today()
    }

    pub fn has_started(&self, date: NaiveDate, time: NaiveTime) -> bool {
        self.localize(date.and_time(time)) <= self.now()
    }

    /// `days` consecutive civil dates starting today.
    pub fn window(&self, days: u32) -> Vec<NaiveDate> {
        let today = self.today();
        (0..days as i64).map(|offset| today + Duration::days(offset)).collect()
    }

    /// The next instant (strictly after now) at which the wall clock reads `time`.
    pub fn next_occurrence(&self, time: NaiveTime) -> DateTime<Tz> {
        let now = self.now();
        let today_at = self.localize(now.date_naive().and_time(time));
        if today_at > now {
            today_at
        } else {
            self.localize((now.date_naive() + Duration::days(1)).and_time(time))
        }
    }

    /// Like [`parse_flexible_date`], but full ISO instants are converted into
    /// the clinic zone before taking the calendar date.
    pub fn parse_date(&self, raw: &str) -> Result<NaiveDate, ClockError> {
        if let Ok(instant) = DateTime::parse_from_rfc3339(raw.trim()) {
            return Ok(instant.with_timezone(&self.tz).date_naive());
        }
        parse_flexible_date(raw)
    }
}

/// Accepts `dd/mm/yyyy` or `yyyy-mm-dd`. Never defaults on bad input.
pub fn parse_flexible_date(raw: &str) -> Result<NaiveDate, ClockError> {
    let trimmed = raw.trim();
    NaiveDate::parse_from_str(trimmed, "%d/%m/%Y")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%Y-%m-%d"))
        .map_err(|_| ClockError::MalformedDate(raw.to_string()))
}

pub fn parse_time_of_day(raw: &str) -> Result<NaiveTime, ClockError> {
    shared_models::time_format::parse(raw).ok_or_else(|| ClockError::MalformedTime(raw.to_string()))
}
