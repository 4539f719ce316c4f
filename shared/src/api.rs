use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Date format used by the scheduling service's JSON endpoints.
pub const API_DATE_FORMAT: &str = "%Y-%m-%d";

// ============================================================================
// Availability endpoints
// ============================================================================

/// One entry of a `days/{facility}.json` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailableDay {
    pub date: String,
    #[serde(default)]
    pub business_day: Option<bool>,
}

impl AvailableDay {
    /// Parse a days response into ascending, de-duplicated dates.
    pub fn parse_all(days: &[AvailableDay]) -> Result<Vec<NaiveDate>, chrono::ParseError> {
        let mut dates = days
            .iter()
            .map(|day| NaiveDate::parse_from_str(&day.date, API_DATE_FORMAT))
            .collect::<Result<Vec<_>, _>>()?;
        dates.sort();
        dates.dedup();
        Ok(dates)
    }
}

/// Body of a `times/{facility}.json` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AvailableTimes {
    #[serde(default)]
    pub available_times: Option<Vec<String>>,
    /// Generic business hours, sent when no specific times are known
    #[serde(default)]
    pub business_times: Option<Vec<String>>,
}

impl AvailableTimes {
    /// Specific times when there are any, otherwise the business hours.
    /// The two lists are never merged.
    pub fn into_times(self) -> Vec<String> {
        let mut times = match self.available_times {
            Some(times) if !times.is_empty() => times,
            _ => self.business_times.unwrap_or_default(),
        };
        times.sort();
        times.dedup();
        times
    }
}
