//! Persisted secondary-facility (ASC) availability.
//!
//! Refreshing is best-effort: `refresh` reports what happened instead of
//! failing, and any outcome other than `Replaced` leaves the previous entries
//! in place.

use chrono::NaiveDate;
use shared::{Constraints, SecondaryAvailability, SecondarySlot};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::PollerResult;
use crate::portal::{AvailabilityFetcher, SessionCredentials, SessionManager};

/// Outcome of a refresh attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheRefresh {
    /// Replaced with this many in-window dates
    Replaced(usize),
    /// The service listed no dates inside the window
    NothingInWindow,
    /// The date query failed
    Failed,
}

#[derive(Debug)]
pub struct SecondaryCache {
    path: PathBuf,
    availability: SecondaryAvailability,
}

impl SecondaryCache {
    /// Load the cache file, keeping only dates inside the booking window. A
    /// missing or unreadable file starts empty.
    pub fn load(path: &Path, constraints: &Constraints) -> Self {
        let mut availability = match fs::read_to_string(path) {
            Ok(content) if content.trim().is_empty() => SecondaryAvailability::new(),
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring corrupt ASC cache {}: {}", path.display(), e);
                SecondaryAvailability::new()
            }),
            Err(_) => SecondaryAvailability::new(),
        };

        let dropped = availability.retain_window(constraints);
        if dropped > 0 {
            tracing::debug!("Dropped {} cached ASC date(s) outside the window", dropped);
        }
        tracing::debug!("Loaded {} cached ASC date(s)", availability.len());
        Self {
            path: path.to_path_buf(),
            availability,
        }
    }

    pub fn availability(&self) -> &SecondaryAvailability {
        &self.availability
    }

    pub fn lookup(&self, primary_date: NaiveDate) -> Option<SecondarySlot> {
        self.availability.lookup(primary_date)
    }

    pub fn persist(&self) -> PollerResult<()> {
        let content = serde_json::to_string_pretty(&self.availability)?;
        fs::write(&self.path, content)?;
        Ok(())
    }

    /// Re-query the secondary facility and replace the cache with the
    /// in-window dates if there are any. The file is written in every case.
    pub async fn refresh(
        &mut self,
        fetcher: &AvailabilityFetcher,
        session: &SessionManager,
        credentials: &mut SessionCredentials,
        constraints: &Constraints,
    ) -> CacheRefresh {
        let outcome = self.fetch(fetcher, session, credentials, constraints).await;

        match outcome {
            CacheRefresh::Replaced(count) => {
                tracing::info!("ASC cache refreshed with {} date(s)", count)
            }
            CacheRefresh::NothingInWindow => {
                tracing::info!("No ASC dates inside the window, keeping previous cache")
            }
            CacheRefresh::Failed => {}
        }

        if let Err(e) = self.persist() {
            tracing::warn!("Could not write ASC cache {}: {}", self.path.display(), e);
        }
        outcome
    }

    async fn fetch(
        &mut self,
        fetcher: &AvailabilityFetcher,
        session: &SessionManager,
        credentials: &mut SessionCredentials,
        constraints: &Constraints,
    ) -> CacheRefresh {
        let dates = match fetcher.secondary_dates(session, credentials, None, None).await {
            Ok(dates) => dates,
            Err(e) => {
                tracing::warn!("ASC date query failed, keeping previous cache: {}", e);
                return CacheRefresh::Failed;
            }
        };

        let in_window: Vec<NaiveDate> = dates
            .into_iter()
            .filter(|date| constraints.in_window(*date))
            .collect();
        if in_window.is_empty() {
            return CacheRefresh::NothingInWindow;
        }

        let mut fresh = SecondaryAvailability::new();
        for date in in_window {
            match fetcher
                .secondary_times(session, credentials, date, None, None)
                .await
            {
                Ok(times) => fresh.insert(date, times),
                Err(e) => tracing::warn!("ASC time query for {} failed: {}", date, e),
            }
        }

        if fresh.is_empty() {
            return CacheRefresh::Failed;
        }
        let count = fresh.len();
        self.availability = fresh;
        CacheRefresh::Replaced(count)
    }
}
