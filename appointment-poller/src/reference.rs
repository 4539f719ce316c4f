//! Static reference tables: country names and facility names.
//!
//! Loaded once at startup and handed to whichever component needs them.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::{PollerError, PollerResult};

pub const COUNTRIES_FILE: &str = "countries.json";
pub const FACILITIES_FILE: &str = "facilities.json";

#[derive(Debug, Clone, Default, Deserialize)]
struct FacilityTables {
    #[serde(default)]
    facilities: BTreeMap<String, String>,
    #[serde(default)]
    asc_facilities: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct ReferenceData {
    countries: BTreeMap<String, String>,
    facilities: BTreeMap<String, String>,
    asc_facilities: BTreeMap<String, String>,
}

impl ReferenceData {
    pub fn load(dir: &Path) -> PollerResult<Self> {
        let countries: BTreeMap<String, String> = read_json(&dir.join(COUNTRIES_FILE))?;
        let tables: FacilityTables = read_json(&dir.join(FACILITIES_FILE))?;

        tracing::debug!(
            "Loaded reference data: {} countries, {} facilities, {} ASC facilities",
            countries.len(),
            tables.facilities.len(),
            tables.asc_facilities.len()
        );

        Ok(Self {
            countries,
            facilities: tables.facilities,
            asc_facilities: tables.asc_facilities,
        })
    }

    pub fn from_tables(
        countries: impl IntoIterator<Item = (String, String)>,
        facilities: impl IntoIterator<Item = (String, String)>,
        asc_facilities: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        Self {
            countries: countries.into_iter().collect(),
            facilities: facilities.into_iter().collect(),
            asc_facilities: asc_facilities.into_iter().collect(),
        }
    }

    pub fn country_name(&self, code: &str) -> Option<&str> {
        self.countries.get(code).map(String::as_str)
    }

    pub fn country_codes(&self) -> Vec<&str> {
        self.countries.keys().map(String::as_str).collect()
    }

    pub fn facility_name(&self, id: &str) -> Option<&str> {
        self.facilities.get(id).map(String::as_str)
    }

    pub fn secondary_facility_name(&self, id: &str) -> Option<&str> {
        self.asc_facilities.get(id).map(String::as_str)
    }

    /// Facility name for display, falling back to the raw id.
    pub fn facility_label<'a>(&'a self, id: Option<&'a str>) -> &'a str {
        match id {
            Some(id) => self.facility_name(id).unwrap_or(id),
            None => "Not specified",
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> PollerResult<T> {
    let content = fs::read_to_string(path).map_err(|e| {
        PollerError::config(format!("Reference file {} unreadable: {}", path.display(), e))
    })?;
    Ok(serde_json::from_str(&content)?)
}
