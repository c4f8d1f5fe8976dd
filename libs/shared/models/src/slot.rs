use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::time_format;

// ==============================================================================
// SLOT ENTITY
// ==============================================================================

/// A single bookable (or historically booked) interval at one clinic location.
///
/// `is_booked` is true exactly when both `booked_by` and `appointment_id` are
/// set; every mutation goes through [`Slot::bind`] / [`Slot::release`] so the
/// three fields move together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    #[serde(with = "time_format")]
    pub start_time: NaiveTime,
    #[serde(with = "time_format")]
    pub end_time: NaiveTime,
    pub duration_minutes: i32,
    pub location: String,
    pub is_available: bool,
    pub is_booked: bool,
    pub booked_by: Option<Uuid>,
    #[serde(rename = "appointment")]
    pub appointment_id: Option<Uuid>,
    pub notes: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Slot {
    pub fn key(&self) -> SlotKey {
        SlotKey {
            doctor_id: self.doctor_id,
            date: self.date,
            start_time: self.start_time,
            location: self.location.clone(),
        }
    }

    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.start_time)
    }

    /// Open for a new booking: not withdrawn by an admin and not held.
    pub fn is_bookable(&self) -> bool {
        self.is_available && !self.is_booked
    }

    pub fn is_bound_to(&self, appointment_id: Uuid) -> bool {
        self.is_booked && self.appointment_id == Some(appointment_id)
    }

    pub fn binding_is_consistent(&self) -> bool {
        self.is_booked == (self.booked_by.is_some() && self.appointment_id.is_some())
    }

    pub fn bind(&mut self, patient_id: Uuid, appointment_id: Uuid) {
        self.is_booked = true;
        self.booked_by = Some(patient_id);
        self.appointment_id = Some(appointment_id);
    }

    pub fn release(&mut self) {
        self.is_booked = false;
        self.booked_by = None;
        self.appointment_id = None;
    }
}

/// Uniqueness tuple: no two slots share doctor, date, start and location.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotKey {
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    #[serde(with = "time_format")]
    pub start_time: NaiveTime,
    pub location: String,
}

// ==============================================================================
// SLOT WRITE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSlot {
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    #[serde(with = "time_format")]
    pub start_time: NaiveTime,
    #[serde(with = "time_format")]
    pub end_time: NaiveTime,
    pub location: String,
    pub notes: Option<String>,
    pub created_by: Option<Uuid>,
}

impl NewSlot {
    pub fn key(&self) -> SlotKey {
        SlotKey {
            doctor_id: self.doctor_id,
            date: self.date,
            start_time: self.start_time,
            location: self.location.clone(),
        }
    }

    pub fn duration_minutes(&self) -> i32 {
        (self.end_time - self.start_time).num_minutes() as i32
    }

    pub fn into_slot(self, created_at: DateTime<Utc>) -> Slot {
        let duration_minutes = self.duration_minutes();
        Slot {
            id: Uuid::new_v4(),
            doctor_id: self.doctor_id,
            date: self.date,
            start_time: self.start_time,
            end_time: self.end_time,
            duration_minutes,
            location: self.location,
            is_available: true,
            is_booked: false,
            booked_by: None,
            appointment_id: None,
            notes: self.notes,
            created_by: self.created_by,
            created_at,
        }
    }
}

/// Admin edit of a slot. Time and location changes are refused while booked.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlotUpdate {
    #[serde(default, with = "optional_time")]
    pub start_time: Option<NaiveTime>,
    #[serde(default, with = "optional_time")]
    pub end_time: Option<NaiveTime>,
    pub location: Option<String>,
    pub is_available: Option<bool>,
    pub notes: Option<String>,
}

impl SlotUpdate {
    pub fn moves_slot(&self) -> bool {
        self.start_time.is_some() || self.end_time.is_some() || self.location.is_some()
    }

    pub fn availability(is_available: bool) -> Self {
        Self {
            is_available: Some(is_available),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlotFilter {
    pub date: Option<NaiveDate>,
    pub location: Option<String>,
    pub doctor_id: Option<Uuid>,
}

impl SlotFilter {
    pub fn on(date: NaiveDate) -> Self {
        Self {
            date: Some(date),
            ..Self::default()
        }
    }

    pub fn matches(&self, slot: &Slot) -> bool {
        self.date.map_or(true, |d| slot.date == d)
            && self.location.as_deref().map_or(true, |l| slot.location == l)
            && self.doctor_id.map_or(true, |id| slot.doctor_id == id)
    }
}

mod optional_time {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(time: &Option<NaiveTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match time {
            Some(t) => serializer.serialize_str(&t.format(crate::time_format::HHMM).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            Some(raw) => crate::time_format::parse(&raw)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid time of day '{}'", raw))),
            None => Ok(None),
        }
    }
}
