use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A secondary appointment may fall at most this many days before the
/// primary appointment it is paired with.
pub const SECONDARY_LEAD_DAYS: i64 = 7;

/// Durable user intent for one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraints {
    /// Exclusive lower bound for a new appointment date
    pub min_date: NaiveDate,
    /// Inclusive upper bound, if any
    pub max_date: Option<NaiveDate>,
    /// Primary facility (consulate) identifier
    pub facility_id: Option<String>,
    /// Whether a secondary (ASC) appointment must be booked alongside
    pub need_secondary: bool,
    /// Secondary facility identifier
    pub secondary_facility_id: Option<String>,
    /// Identifier of the held appointment (schedule)
    pub schedule_id: Option<String>,
}

/// Outcome of checking one offered primary date against the constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateVerdict {
    BeforeMinimum,
    AfterMaximum,
    /// On or after the held appointment, so booking it is no improvement
    NotEarlier,
    Candidate,
}

impl Constraints {
    pub fn new(min_date: NaiveDate) -> Self {
        Self {
            min_date,
            max_date: None,
            facility_id: None,
            need_secondary: false,
            secondary_facility_id: None,
            schedule_id: None,
        }
    }

    /// Whether `date` lies inside `(min_date, max_date]`.
    pub fn in_window(&self, date: NaiveDate) -> bool {
        date > self.min_date && self.max_date.map_or(true, |max| date <= max)
    }

    pub fn classify(&self, date: NaiveDate, held_at: Option<NaiveDateTime>) -> DateVerdict {
        if self.max_date.is_some_and(|max| date > max) {
            DateVerdict::AfterMaximum
        } else if date <= self.min_date {
            DateVerdict::BeforeMinimum
        } else if held_at.is_some_and(|held| date >= held.date()) {
            DateVerdict::NotEarlier
        } else {
            DateVerdict::Candidate
        }
    }

    /// Dates worth trying, in the order they were given.
    pub fn candidates(&self, dates: &[NaiveDate], held_at: Option<NaiveDateTime>) -> Vec<NaiveDate> {
        dates
            .iter()
            .copied()
            .filter(|date| self.classify(*date, held_at) == DateVerdict::Candidate)
            .collect()
    }
}

/// The appointment currently on record for the account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeldAppointment {
    pub schedule_id: String,
    pub description: String,
    /// `None` while the account has no confirmed date yet
    pub scheduled_at: Option<NaiveDateTime>,
}

impl HeldAppointment {
    pub fn scheduled_date(&self) -> Option<NaiveDate> {
        self.scheduled_at.map(|at| at.date())
    }

    /// Human-readable date-time, `No date` when unscheduled.
    pub fn when(&self) -> String {
        self.scheduled_at
            .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "No date".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecondarySlot {
    pub date: NaiveDate,
    pub time: String,
}

/// A primary date/time under evaluation, with its secondary pairing if one
/// was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateSlot {
    pub date: NaiveDate,
    pub time: String,
    pub secondary: Option<SecondarySlot>,
}

impl std::fmt::Display for CandidateSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.date, self.time)?;
        if let Some(secondary) = &self.secondary {
            write!(f, " (ASC {} {})", secondary.date, secondary.time)?;
        }
        Ok(())
    }
}

/// Secondary-facility date to its open times.
///
/// Dates iterate in calendar order; an empty time list records that the date
/// was checked and had nothing open.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecondaryAvailability {
    dates: BTreeMap<NaiveDate, Vec<String>>,
}

impl SecondaryAvailability {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the times for `date`, sorted and without duplicates.
    pub fn insert(&mut self, date: NaiveDate, mut times: Vec<String>) {
        times.sort();
        times.dedup();
        self.dates.insert(date, times);
    }

    pub fn times(&self, date: NaiveDate) -> Option<&[String]> {
        self.dates.get(&date).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.dates.keys().copied()
    }

    /// Drop the dates outside `(min_date, max_date]`; returns how many went.
    pub fn retain_window(&mut self, constraints: &Constraints) -> usize {
        let before = self.dates.len();
        self.dates.retain(|date, _| constraints.in_window(*date));
        before - self.dates.len()
    }

    /// Earliest cached secondary slot usable with a primary appointment on
    /// `primary_date`: a date in `[primary_date - 7 days, primary_date)` with at
    /// least one open time. The earliest time of that date is chosen.
    pub fn lookup(&self, primary_date: NaiveDate) -> Option<SecondarySlot> {
        let earliest = primary_date - Duration::days(SECONDARY_LEAD_DAYS);
        self.dates
            .range(earliest..primary_date)
            .find_map(|(date, times)| {
                times.iter().min().map(|time| SecondarySlot {
                    date: *date,
                    time: time.clone(),
                })
            })
    }
}

impl FromIterator<(NaiveDate, Vec<String>)> for SecondaryAvailability {
    fn from_iter<I: IntoIterator<Item = (NaiveDate, Vec<String>)>>(iter: I) -> Self {
        let mut availability = Self::new();
        for (date, times) in iter {
            availability.insert(date, times);
        }
        availability
    }
}
