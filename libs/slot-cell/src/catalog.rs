//! Location schedule catalog.
//!
//! Static mapping from a clinic location code to the intervals it offers on
//! each day of the week (0 = Sunday). Changes to clinic hours are changes to
//! this table only; slot generation reads nothing else.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use chrono::{Duration, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use shared_config::AppConfig;
use shared_models::time_format;
use shared_utils::ClinicClock;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog file {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("invalid catalog JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("location '{0}' is defined more than once")]
    DuplicateLocation(String),

    #[error("location '{location}': day {day} is outside 0..=6")]
    InvalidDay { location: String, day: u8 },

    #[error("location '{location}': session {from}-{to} must start before it ends and fit at least one {slot_minutes} minute slot")]
    InvalidSession {
        location: String,
        from: NaiveTime,
        to: NaiveTime,
        slot_minutes: u32,
    },

    #[error("location '{location}' day {day}: {first} overlaps {second}")]
    Overlap {
        location: String,
        day: u8,
        first: Interval,
        second: Interval,
    },
}

/// A half-open `[start, end)` time-of-day interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Interval {
    #[serde(with = "time_format")]
    pub start: NaiveTime,
    #[serde(with = "time_format")]
    pub end: NaiveTime,
}

impl Interval {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    pub fn minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start.format("%H:%M"), self.end.format("%H:%M"))
    }
}

/// A block of opening hours, cut into fixed-length slots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub days: Vec<u8>,
    #[serde(with = "time_format")]
    pub from: NaiveTime,
    #[serde(with = "time_format")]
    pub to: NaiveTime,
    #[serde(default = "default_slot_minutes")]
    pub slot_minutes: u32,
}

fn default_slot_minutes() -> u32 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationSpec {
    pub code: String,
    #[serde(default)]
    pub name: Option<String>,
    pub sessions: Vec<Session>,
}

#[derive(Debug, Clone, Deserialize)]
struct CatalogFile {
    locations: Vec<LocationSpec>,
}

#[derive(Debug, Clone)]
pub struct LocationCatalog {
    // code -> [intervals; 7], indexed by day of week
    locations: BTreeMap<String, [Vec<Interval>; 7]>,
}

impl LocationCatalog {
    pub fn from_locations(specs: Vec<LocationSpec>) -> Result<Self, CatalogError> {
        let mut locations = BTreeMap::new();

        for spec in specs {
            if locations.contains_key(&spec.code) {
                return Err(CatalogError::DuplicateLocation(spec.code));
            }

            let mut week: [Vec<Interval>; 7] = Default::default();
            for session in &spec.sessions {
                let step = Duration::minutes(session.slot_minutes as i64);
                let (first_end, wrapped) = session.from.overflowing_add_signed(step);
                if session.slot_minutes == 0 || wrapped != 0 || first_end > session.to {
                    return Err(CatalogError::InvalidSession {
                        location: spec.code.clone(),
                        from: session.from,
                        to: session.to,
                        slot_minutes: session.slot_minutes,
                    });
                }

                for &day in &session.days {
                    let intervals = week.get_mut(day as usize).ok_or_else(|| CatalogError::InvalidDay {
                        location: spec.code.clone(),
                        day,
                    })?;

                    // Trailing remainder shorter than one slot is dropped.
                    let mut start = session.from;
                    loop {
                        let (end, wrapped) = start.overflowing_add_signed(step);
                        if wrapped != 0 || end > session.to {
                            break;
                        }
                        intervals.push(Interval::new(start, end));
                        start = end;
                    }
                }
            }

            for (day, intervals) in week.iter_mut().enumerate() {
                intervals.sort();
                if let Some(pair) = intervals.windows(2).find(|w| w[0].overlaps(&w[1])) {
                    return Err(CatalogError::Overlap {
                        location: spec.code.clone(),
                        day: day as u8,
                        first: pair[0],
                        second: pair[1],
                    });
                }
            }

            locations.insert(spec.code, week);
        }

        Ok(Self { locations })
    }

    pub fn from_json_str(raw: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_json::from_str(raw)?;
        Self::from_locations(file.locations)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| CatalogError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json_str(&raw)
    }

    /// `SLOT_CATALOG_PATH` when set, otherwise the built-in clinic hours.
    pub fn from_config(config: &AppConfig) -> Result<Self, CatalogError> {
        match &config.slot_catalog_path {
            Some(path) => {
                info!("Loading location catalog from {}", path);
                Self::load(path)
            }
            None => Ok(Self::builtin()),
        }
    }

    /// The clinic's standing hours.
    ///
    /// `MAIN` is open Monday to Saturday with a morning-only Saturday and is
    /// closed on Sunday. `OUTREACH` runs one afternoon a week, on Thursday.
    pub fn builtin() -> Self {
        let specs = vec![
            LocationSpec {
                code: "MAIN".to_string(),
                name: Some("Main clinic".to_string()),
                sessions: vec![
                    session(&[1, 2, 3, 4, 5], (10, 0), (13, 0)),
                    session(&[1, 2, 3, 4, 5], (17, 0), (20, 0)),
                    session(&[6], (10, 0), (13, 0)),
                ],
            },
            LocationSpec {
                code: "OUTREACH".to_string(),
                name: Some("Community outreach centre".to_string()),
                sessions: vec![session(&[4], (15, 0), (18, 0))],
            },
        ];

        // A malformed built-in table would be a programming error caught by
        // `builtin_catalog_is_valid`; fall back to an empty catalog.
        Self::from_locations(specs).unwrap_or_else(|e| {
            tracing::error!("Built-in location catalog is invalid: {}", e);
            Self {
                locations: BTreeMap::new(),
            }
        })
    }

    /// Ordered, non-overlapping intervals; empty when closed or unknown.
    pub fn time_slots_for(&self, location: &str, day_of_week: u8) -> &[Interval] {
        self.locations
            .get(location)
            .and_then(|week| week.get(day_of_week as usize))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn locations(&self) -> impl Iterator<Item = &str> {
        self.locations.keys().map(String::as_str)
    }

    pub fn contains(&self, location: &str) -> bool {
        self.locations.contains_key(location)
    }

    /// Locations open on `date`, each with its intervals for that day.
    pub fn open_on(&self, date: NaiveDate) -> Vec<(&str, &[Interval])> {
        let day = ClinicClock::day_of_week(date);
        self.locations()
            .map(|code| (code, self.time_slots_for(code, day)))
            .filter(|(_, intervals)| !intervals.is_empty())
            .collect()
    }

    /// Number of slots one practitioner gets on `date` across all locations.
    pub fn expected_slots(&self, date: NaiveDate) -> usize {
        self.open_on(date).iter().map(|(_, intervals)| intervals.len()).sum()
    }
}

fn session(days: &[u8], from: (u32, u32), to: (u32, u32)) -> Session {
    Session {
        days: days.to_vec(),
        from: NaiveTime::from_hms_opt(from.0, from.1, 0).unwrap_or(NaiveTime::MIN),
        to: NaiveTime::from_hms_opt(to.0, to.1, 0).unwrap_or(NaiveTime::MIN),
        slot_minutes: default_slot_minutes(),
    }
}
