use chrono::{Local, NaiveDate};
use clap::Parser;
use shared::Constraints;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{PollerError, PollerResult};
use crate::reference::ReferenceData;

pub const DEFAULT_BASE_URL: &str = "https://ais.usvisa-info.com";

/// Date format of `MIN_DATE` / `MAX_DATE` in the constraint file
pub const CONSTRAINT_DATE_FORMAT: &str = "%m.%d.%Y";

/// Placeholder written for unset values
const NONE_VALUE: &str = "None";

#[derive(Debug, Clone, Parser)]
#[command(name = "appointment-poller")]
#[command(about = "Watches for an earlier appointment slot and rebooks it")]
pub struct Cli {
    /// Constraint file with KEY=value lines (EMAIL, PASSWORD, COUNTRY, ...).
    ///
    /// Values the poller resolves on its own (schedule and facility ids)
    /// are written back to this file.
    #[arg(default_value = "config", env = "POLLER_CONFIG_FILE")]
    pub config_file: PathBuf,

    /// Where the secondary-facility (ASC) availability cache is kept
    #[arg(long, default_value = "asc_dates.json", env = "POLLER_CACHE_FILE")]
    pub cache_file: PathBuf,

    /// Directory holding countries.json and facilities.json
    #[arg(long, default_value = "data", env = "POLLER_DATA_DIR")]
    pub data_dir: PathBuf,

    /// Scheduling service base URL
    #[arg(long, default_value = DEFAULT_BASE_URL, env = "POLLER_BASE_URL")]
    pub base_url: String,

    /// Recipient of lifecycle notifications (defaults to the account email)
    #[arg(long, env = "NOTIFICATION_EMAIL")]
    pub notify_to: Option<String>,

    /// Also write logs to this file
    #[arg(long, env = "POLLER_LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

/// Credentials of the scheduling account.
#[derive(Clone)]
pub struct Account {
    pub email: String,
    pub password: String,
    /// Country code, e.g. `ca`
    pub country: String,
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("country", &self.country)
            .finish()
    }
}

/// The constraint file: account credentials plus booking constraints.
#[derive(Debug, Clone)]
pub struct ConstraintStore {
    path: PathBuf,
    pub account: Account,
    pub constraints: Constraints,
}

impl ConstraintStore {
    pub fn load(path: &Path, reference: &ReferenceData) -> PollerResult<Self> {
        Self::load_with_today(path, reference, Local::now().date_naive())
    }

    pub fn load_with_today(
        path: &Path,
        reference: &ReferenceData,
        today: NaiveDate,
    ) -> PollerResult<Self> {
        if !path.exists() {
            fs::write(path, "")?;
            tracing::warn!("Created new empty configuration file {}", path.display());
        }

        let values = read_entries(path)?;

        let email = required(&values, "EMAIL", "Email address")?;
        let password = required(&values, "PASSWORD", "Password")?;
        let country = required(&values, "COUNTRY", "Country code")?;
        if reference.country_name(&country).is_none() {
            return Err(PollerError::config(format!(
                "Invalid country code '{}'. Valid options are: {}",
                country,
                reference.country_codes().join(", ")
            )));
        }

        let min_date = match values.get("MIN_DATE") {
            Some(raw) => parse_date(raw).unwrap_or_else(|| {
                tracing::warn!("Invalid minimum date '{}', using current date", raw);
                today
            }),
            None => today,
        };

        let max_date = values.get("MAX_DATE").and_then(|raw| {
            let parsed = parse_date(raw);
            if parsed.is_none() {
                tracing::warn!("Invalid maximum date '{}', no maximum date will be used", raw);
            }
            parsed
        });

        if let Some(max) = max_date {
            if min_date >= max {
                return Err(PollerError::config(format!(
                    "Minimum date {} must be before maximum date {}",
                    min_date, max
                )));
            }
        }

        let facility_id = values.get("FACILITY_ID").cloned().filter(|id| {
            let known = reference.facility_name(id).is_some();
            if !known {
                tracing::warn!("Invalid facility ID {}, will auto-select from available facilities", id);
            }
            known
        });

        let secondary_facility_id = values.get("ASC_FACILITY_ID").cloned().filter(|id| {
            let known = reference.secondary_facility_name(id).is_some();
            if !known {
                tracing::warn!(
                    "Invalid ASC facility ID {}, will auto-select from available facilities",
                    id
                );
            }
            known
        });

        let need_secondary = values
            .get("NEED_ASC")
            .is_some_and(|raw| matches!(raw.to_ascii_lowercase().as_str(), "true" | "1" | "yes"));

        Ok(Self {
            path: path.to_path_buf(),
            account: Account {
                email,
                password,
                country,
            },
            constraints: Constraints {
                min_date,
                max_date,
                facility_id,
                need_secondary,
                secondary_facility_id,
                schedule_id: values.get("SCHEDULE_ID").cloned(),
            },
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record the schedule picked at startup. A schedule id that is already
    /// set is kept for the lifetime of the process.
    pub fn resolve_schedule_id(&mut self, schedule_id: &str) -> PollerResult<()> {
        if self.constraints.schedule_id.is_some() {
            return Ok(());
        }
        self.constraints.schedule_id = Some(schedule_id.to_string());
        self.save()
    }

    pub fn resolve_facility_id(&mut self, facility_id: &str) -> PollerResult<()> {
        self.constraints.facility_id = Some(facility_id.to_string());
        self.save()
    }

    pub fn resolve_secondary_facility_id(&mut self, facility_id: &str) -> PollerResult<()> {
        self.constraints.secondary_facility_id = Some(facility_id.to_string());
        self.save()
    }

    fn save(&self) -> PollerResult<()> {
        let c = &self.constraints;
        let optional = |value: &Option<String>| value.clone().unwrap_or_else(|| NONE_VALUE.into());
        let content = format!(
            "EMAIL={}\nPASSWORD={}\nCOUNTRY={}\nFACILITY_ID={}\nMIN_DATE={}\nMAX_DATE={}\nNEED_ASC={}\nASC_FACILITY_ID={}\nSCHEDULE_ID={}\n",
            quoted(&self.account.email),
            quoted(&self.account.password),
            self.account.country,
            optional(&c.facility_id),
            c.min_date.format(CONSTRAINT_DATE_FORMAT),
            c.max_date
                .map(|d| d.format(CONSTRAINT_DATE_FORMAT).to_string())
                .unwrap_or_else(|| NONE_VALUE.into()),
            c.need_secondary,
            optional(&c.secondary_facility_id),
            optional(&c.schedule_id),
        );
        fs::write(&self.path, content)?;
        tracing::debug!("Configuration saved to {}", self.path.display());
        Ok(())
    }
}

/// `KEY=value` entries read with dotenv's line parser, which handles quotes,
/// `export` prefixes and comments. Empty values and `None` count as unset.
fn read_entries(path: &Path) -> PollerResult<HashMap<String, String>> {
    let invalid = |e: dotenv::Error| {
        PollerError::config(format!("Invalid configuration file {}: {}", path.display(), e))
    };

    let mut values = HashMap::new();
    for entry in dotenv::from_path_iter(path).map_err(invalid)? {
        let (key, value) = entry.map_err(invalid)?;
        if !value.is_empty() && value != NONE_VALUE {
            values.insert(key, value);
        }
    }
    Ok(values)
}

/// Double-quote `value` unless dotenv reads it back verbatim without quotes.
fn quoted(value: &str) -> String {
    let plain = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "@._+-:/=,".contains(c));
    if plain {
        return value.to_string();
    }

    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if matches!(c, '\\' | '"' | '$') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

fn required(values: &HashMap<String, String>, key: &str, label: &str) -> PollerResult<String> {
    values
        .get(key)
        .cloned()
        .ok_or_else(|| PollerError::config(format!("{} ({}) is required in the configuration", label, key)))
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, CONSTRAINT_DATE_FORMAT).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference() -> ReferenceData {
        ReferenceData::from_tables(
            [("ca".to_string(), "Canada".to_string())],
            [("94".to_string(), "Toronto".to_string())],
            [("98".to_string(), "Toronto ASC".to_string())],
        )
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
    }

    fn write(dir: &tempfile::TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("config");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_full_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "EMAIL=me@example.com\nPASSWORD=p=ss\nCOUNTRY=ca\nFACILITY_ID=94\nMIN_DATE=02.01.2024\nMAX_DATE=06.30.2024\nNEED_ASC=True\nASC_FACILITY_ID=98\nSCHEDULE_ID=123\n",
        );

        let store = ConstraintStore::load_with_today(&path, &reference(), today()).unwrap();
        assert_eq!(store.account.email, "me@example.com");
        assert_eq!(store.account.password, "p=ss");
        let c = &store.constraints;
        assert_eq!(c.min_date, NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        assert_eq!(c.max_date, NaiveDate::from_ymd_opt(2024, 6, 30));
        assert_eq!(c.facility_id.as_deref(), Some("94"));
        assert!(c.need_secondary);
        assert_eq!(c.secondary_facility_id.as_deref(), Some("98"));
        assert_eq!(c.schedule_id.as_deref(), Some("123"));
    }

    #[test]
    fn test_quotes_comments_and_export() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "# account\nEMAIL=me@example.com\nPASSWORD=\"a b\"\nexport COUNTRY=ca\n\n  # window\nFACILITY_ID='94'  # Toronto\n",
        );

        let store = ConstraintStore::load_with_today(&path, &reference(), today()).unwrap();
        assert_eq!(store.account.password, "a b");
        assert_eq!(store.account.country, "ca");
        assert_eq!(store.constraints.facility_id.as_deref(), Some("94"));
    }

    #[test]
    fn test_unparseable_line_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "EMAIL=a@b.c\nPASSWORD=x\nCOUNTRY=ca\nnot a setting\n");
        let err = ConstraintStore::load_with_today(&path, &reference(), today()).unwrap_err();
        assert!(matches!(err, PollerError::Config(_)));
    }

    #[test]
    fn test_special_password_survives_write_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "EMAIL=a@b.c\nPASSWORD='p$ss \"word\\'\nCOUNTRY=ca\n",
        );

        let mut store = ConstraintStore::load_with_today(&path, &reference(), today()).unwrap();
        assert_eq!(store.account.password, "p$ss \"word\\");
        store.resolve_schedule_id("555").unwrap();

        let reloaded = ConstraintStore::load_with_today(&path, &reference(), today()).unwrap();
        assert_eq!(reloaded.account.password, "p$ss \"word\\");
        assert_eq!(reloaded.constraints.schedule_id.as_deref(), Some("555"));
    }

    #[test]
    fn test_defaults_and_none_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "EMAIL=me@example.com\nPASSWORD=secret\nCOUNTRY=ca\nFACILITY_ID=None\nMAX_DATE=None\nSCHEDULE_ID=\n",
        );

        let store = ConstraintStore::load_with_today(&path, &reference(), today()).unwrap();
        let c = &store.constraints;
        assert_eq!(c.min_date, today());
        assert_eq!(c.max_date, None);
        assert_eq!(c.facility_id, None);
        assert!(!c.need_secondary);
        assert_eq!(c.schedule_id, None);
    }

    #[test]
    fn test_missing_file_is_created_then_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");

        let err = ConstraintStore::load_with_today(&path, &reference(), today()).unwrap_err();
        assert!(matches!(err, PollerError::Config(ref msg) if msg.contains("EMAIL")));
        assert!(path.exists());
    }

    #[test]
    fn test_unknown_country_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "EMAIL=a@b.c\nPASSWORD=x\nCOUNTRY=zz\n");
        let err = ConstraintStore::load_with_today(&path, &reference(), today()).unwrap_err();
        assert!(matches!(err, PollerError::Config(ref msg) if msg.contains("zz")));
    }

    #[test]
    fn test_inverted_window_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "EMAIL=a@b.c\nPASSWORD=x\nCOUNTRY=ca\nMIN_DATE=06.30.2024\nMAX_DATE=06.30.2024\n",
        );
        let err = ConstraintStore::load_with_today(&path, &reference(), today()).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_bad_dates_fall_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "EMAIL=a@b.c\nPASSWORD=x\nCOUNTRY=ca\nMIN_DATE=2024-02-01\nMAX_DATE=someday\n",
        );
        let store = ConstraintStore::load_with_today(&path, &reference(), today()).unwrap();
        assert_eq!(store.constraints.min_date, today());
        assert_eq!(store.constraints.max_date, None);
    }

    #[test]
    fn test_unknown_facility_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "EMAIL=a@b.c\nPASSWORD=x\nCOUNTRY=ca\nFACILITY_ID=1\nASC_FACILITY_ID=2\n",
        );
        let store = ConstraintStore::load_with_today(&path, &reference(), today()).unwrap();
        assert_eq!(store.constraints.facility_id, None);
        assert_eq!(store.constraints.secondary_facility_id, None);
    }

    #[test]
    fn test_resolved_values_written_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "EMAIL=a@b.c\nPASSWORD=x\nCOUNTRY=ca\nMIN_DATE=02.01.2024\n");

        let mut store = ConstraintStore::load_with_today(&path, &reference(), today()).unwrap();
        store.resolve_schedule_id("555").unwrap();
        store.resolve_facility_id("94").unwrap();
        // schedule ids do not change once resolved
        store.resolve_schedule_id("777").unwrap();

        let saved = fs::read_to_string(&path).unwrap();
        assert!(saved.contains("SCHEDULE_ID=555\n"));
        assert!(saved.contains("FACILITY_ID=94\n"));
        assert!(saved.contains("MAX_DATE=None\n"));
        assert!(saved.contains("MIN_DATE=02.01.2024\n"));

        let reloaded = ConstraintStore::load_with_today(&path, &reference(), today()).unwrap();
        assert_eq!(reloaded.constraints, store.constraints);
    }
}
