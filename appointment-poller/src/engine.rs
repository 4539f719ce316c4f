//! The polling loop: pacing, candidate matching, booking and verification.

use chrono::{Local, NaiveDate, NaiveDateTime};
use shared::{CandidateSlot, DateVerdict, HeldAppointment, SecondarySlot};
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheRefresh, SecondaryCache};
use crate::config::ConstraintStore;
use crate::error::{PollerError, PollerResult};
use crate::notifier::{self, AccountSummary, Notification, Notifier};
use crate::portal::availability::ScheduleTarget;
use crate::portal::pages::{self, FACILITY_SELECT_ID, SECONDARY_FACILITY_SELECT_ID};
use crate::portal::{account, booking, AvailabilityFetcher, SessionCredentials, SessionManager};
use crate::reference::ReferenceData;
use crate::scheduler::{sleep_or_cancel, Pacing};

/// Dates after the held appointment listed per cycle before eliding the rest
const MAX_LATER_DATES_LISTED: usize = 2;

/// Session state produced by `Engine::start` and threaded through cycles.
#[derive(Debug)]
pub struct Running {
    pub credentials: SessionCredentials,
    pub held: HeldAppointment,
    pub fetcher: AvailabilityFetcher,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The service listed no dates at all
    NoDates,
    /// Nothing was booked this cycle
    NoMatch,
    /// The held appointment moved to this one
    Booked(HeldAppointment),
    /// Shutdown was requested between slots
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SecondaryResolution {
    Resolved(SecondarySlot),
    NoDates,
    NoTimes,
}

pub struct Engine {
    store: ConstraintStore,
    reference: ReferenceData,
    session: SessionManager,
    cache: SecondaryCache,
    notifier: Box<dyn Notifier>,
    pacing: Pacing,
    recipient: String,
    shutdown: CancellationToken,
}

impl Engine {
    pub fn new(
        store: ConstraintStore,
        reference: ReferenceData,
        session: SessionManager,
        cache: SecondaryCache,
        notifier: Box<dyn Notifier>,
    ) -> Self {
        let recipient = store.account.email.clone();
        Self {
            store,
            reference,
            session,
            cache,
            notifier,
            pacing: Pacing::random(),
            recipient,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = recipient.into();
        self
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn store(&self) -> &ConstraintStore {
        &self.store
    }

    pub fn cache(&self) -> &SecondaryCache {
        &self.cache
    }

    /// Run until shutdown or a fatal error.
    ///
    /// A held appointment that is already on or before the minimum date ends
    /// the run cleanly. Other fatal errors are notified and returned.
    pub async fn run(mut self) -> PollerResult<()> {
        tracing::info!(
            "Polling every {} minute(s) from second {}, cool-down {} minutes",
            self.pacing.interval_minutes(),
            self.pacing.second_threshold,
            self.pacing.cooldown.as_secs() / 60
        );

        let mut running = match self.start().await {
            Ok(running) => running,
            Err(e) => return self.stop_on(e).await,
        };

        let notification = notifier::started(
            self.summary(),
            self.store.constraints.min_date,
            self.store.constraints.max_date,
            &self.recipient,
            Local::now().naive_local(),
        );
        self.notify(notification).await;

        let mut cooldown = false;
        let mut resync = false;
        let mut failures: u32 = 0;

        loop {
            if cooldown {
                tracing::info!(
                    "In cool-down mode. Waiting {} minutes...",
                    self.pacing.cooldown.as_secs() / 60
                );
                if !sleep_or_cancel(self.pacing.cooldown, &self.shutdown).await {
                    break;
                }
                cooldown = false;
            }

            if !sleep_or_cancel(self.pacing.interval, &self.shutdown).await {
                break;
            }
            let wait = self.pacing.until_open(Local::now().naive_local());
            if !wait.is_zero() {
                tracing::debug!("Waiting {}s for the next polling window", wait.as_secs());
                if !sleep_or_cancel(wait, &self.shutdown).await {
                    break;
                }
            }

            let result = if resync {
                self.resync(&mut running).await
            } else {
                Ok(())
            };
            let result = match result {
                Ok(()) => {
                    resync = false;
                    self.run_cycle(&mut running).await
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(CycleOutcome::NoDates) => {
                    failures = 0;
                    cooldown = true;
                }
                Ok(CycleOutcome::Interrupted) => break,
                Ok(_) => failures = 0,
                Err(e) if e.is_fatal() => return self.stop_on(e).await,
                Err(e) => {
                    failures += 1;
                    resync = true;
                    tracing::error!("Poll cycle failed ({} in a row): {}", failures, e);
                }
            }
        }

        tracing::info!("Shutdown requested, stopping");
        Ok(())
    }

    /// Log in, resolve the schedule and facilities and read the held
    /// appointment.
    pub async fn start(&mut self) -> PollerResult<Running> {
        let mut credentials = self.session.establish().await?;

        let applications = account::fetch_applications(&self.session, &mut credentials).await?;
        let schedule_id = match &self.store.constraints.schedule_id {
            Some(id) => id.clone(),
            None => {
                let first = applications.first().ok_or(PollerError::NoSchedule)?;
                tracing::info!(
                    "Auto-selected schedule {} - {}",
                    first.schedule_id,
                    first.description
                );
                first.schedule_id.clone()
            }
        };
        self.store.resolve_schedule_id(&schedule_id)?;

        let held = applications
            .into_iter()
            .find(|app| app.schedule_id == schedule_id)
            .ok_or_else(|| PollerError::UnknownSchedule(schedule_id.clone()))?;
        self.check_held(&held)?;

        let page = self
            .session
            .open_schedule(&schedule_id, &mut credentials)
            .await?;
        let facility_id = self.resolve_facility(&page)?;
        let secondary_facility_id = if self.store.constraints.need_secondary {
            Some(self.resolve_secondary_facility(&page)?)
        } else {
            self.store.constraints.secondary_facility_id.clone()
        };

        tracing::info!(
            "Current appointment date and time: {} ({})",
            held.when(),
            held.description
        );

        let fetcher = AvailabilityFetcher::new(ScheduleTarget {
            schedule_id,
            facility_id,
            secondary_facility_id,
        });
        if self.store.constraints.need_secondary {
            self.cache
                .refresh(
                    &fetcher,
                    &self.session,
                    &mut credentials,
                    &self.store.constraints,
                )
                .await;
        }

        Ok(Running {
            credentials,
            held,
            fetcher,
        })
    }

    /// One fetch-match-book pass.
    pub async fn run_cycle(&mut self, running: &mut Running) -> PollerResult<CycleOutcome> {
        tracing::info!("Checking for appointments...");
        let dates = running
            .fetcher
            .primary_dates(&self.session, &mut running.credentials)
            .await?;
        if dates.is_empty() {
            tracing::info!("No appointment dates available at any location");
            return Ok(CycleOutcome::NoDates);
        }
        self.report_dates(&dates, running.held.scheduled_at);

        let candidates = self
            .store
            .constraints
            .candidates(&dates, running.held.scheduled_at);
        let need_secondary = self.store.constraints.need_secondary;
        let mut outcome = CycleOutcome::NoMatch;
        let mut had_times = false;

        'dates: for date in candidates {
            if self.shutdown.is_cancelled() {
                outcome = CycleOutcome::Interrupted;
                break;
            }

            let times = running
                .fetcher
                .primary_times(&self.session, &mut running.credentials, date)
                .await?;
            if times.is_empty() {
                tracing::info!("No available time slots for {}", date);
                continue;
            }
            tracing::info!("Available times for {}: {}", date, times.join(", "));
            had_times = true;

            for time in times {
                if self.shutdown.is_cancelled() {
                    outcome = CycleOutcome::Interrupted;
                    break 'dates;
                }
                tracing::info!("Trying time slot {} {}", date, time);

                let secondary = if need_secondary {
                    match self.resolve_secondary(running, date, &time).await {
                        SecondaryResolution::Resolved(slot) => Some(slot),
                        SecondaryResolution::NoDates => {
                            tracing::info!("No ASC dates available for this time slot");
                            continue 'dates;
                        }
                        SecondaryResolution::NoTimes => {
                            tracing::info!("No ASC time slots available for this date");
                            continue;
                        }
                    }
                } else {
                    None
                };

                let slot = CandidateSlot {
                    date,
                    time,
                    secondary,
                };
                if let Some(held) = self.book_and_verify(running, &slot).await? {
                    outcome = CycleOutcome::Booked(held);
                    break 'dates;
                }
            }
        }

        if need_secondary && had_times && outcome != CycleOutcome::Interrupted {
            let refreshed = self
                .cache
                .refresh(
                    &running.fetcher,
                    &self.session,
                    &mut running.credentials,
                    &self.store.constraints,
                )
                .await;
            if refreshed == CacheRefresh::Failed {
                tracing::debug!("Continuing with the previous ASC cache");
            }
        }

        Ok(outcome)
    }

    /// Fresh login plus a re-read of the held appointment after a failed cycle.
    async fn resync(&mut self, running: &mut Running) -> PollerResult<()> {
        tracing::info!("Re-establishing session");
        running.credentials = self.session.establish().await?;
        let schedule_id = running.fetcher.target().schedule_id.clone();
        let held = account::fetch_held(&self.session, &mut running.credentials, &schedule_id).await?;
        self.check_held(&held)?;
        running.held = held;
        Ok(())
    }

    fn check_held(&self, held: &HeldAppointment) -> PollerResult<()> {
        let min_date = self.store.constraints.min_date;
        match held.scheduled_date() {
            Some(date) if date <= min_date => Err(PollerError::AppointmentBeforeMinimum {
                held: date,
                min_date,
            }),
            _ => Ok(()),
        }
    }

    fn resolve_facility(&mut self, page: &str) -> PollerResult<String> {
        if let Some(id) = &self.store.constraints.facility_id {
            tracing::info!(
                "Using configured facility: {} - {}",
                id,
                self.reference.facility_label(Some(id.as_str()))
            );
            return Ok(id.clone());
        }

        let options = pages::select_options(page, FACILITY_SELECT_ID);
        let (id, name) = pick_option(options, |id| self.reference.facility_name(id).is_some())
            .ok_or_else(|| PollerError::config("No facility is offered for this schedule"))?;
        tracing::info!("Auto-selected facility: {} - {}", id, name);
        self.store.resolve_facility_id(&id)?;
        Ok(id)
    }

    fn resolve_secondary_facility(&mut self, page: &str) -> PollerResult<String> {
        if let Some(id) = &self.store.constraints.secondary_facility_id {
            tracing::info!("Using configured ASC facility: {}", id);
            return Ok(id.clone());
        }

        let options = pages::select_options(page, SECONDARY_FACILITY_SELECT_ID);
        let (id, name) = pick_option(options, |id| {
            self.reference.secondary_facility_name(id).is_some()
        })
        .ok_or_else(|| PollerError::config("No ASC facility is offered for this schedule"))?;
        tracing::info!("Auto-selected ASC facility: {} - {}", id, name);
        self.store.resolve_secondary_facility_id(&id)?;
        Ok(id)
    }

    /// Cached pairing first, then a live query correlated to the primary slot.
    /// Query failures count as no pairing.
    async fn resolve_secondary(
        &self,
        running: &mut Running,
        date: NaiveDate,
        time: &str,
    ) -> SecondaryResolution {
        if let Some(slot) = self.cache.lookup(date) {
            tracing::debug!("Using cached ASC slot {} {}", slot.date, slot.time);
            return SecondaryResolution::Resolved(slot);
        }

        let earliest = date - chrono::Duration::days(shared::SECONDARY_LEAD_DAYS);
        let dates = match running
            .fetcher
            .secondary_dates(&self.session, &mut running.credentials, Some(date), Some(time))
            .await
        {
            Ok(dates) => dates,
            Err(e) => {
                tracing::warn!("ASC date query failed: {}", e);
                return SecondaryResolution::NoDates;
            }
        };
        let Some(secondary_date) = dates.into_iter().find(|d| *d >= earliest && *d < date) else {
            return SecondaryResolution::NoDates;
        };

        match running
            .fetcher
            .secondary_times(
                &self.session,
                &mut running.credentials,
                secondary_date,
                Some(date),
                Some(time),
            )
            .await
        {
            Ok(times) => match times.into_iter().next() {
                Some(time) => SecondaryResolution::Resolved(SecondarySlot {
                    date: secondary_date,
                    time,
                }),
                None => SecondaryResolution::NoTimes,
            },
            Err(e) => {
                tracing::warn!("ASC time query failed: {}", e);
                SecondaryResolution::NoTimes
            }
        }
    }

    /// Submit the booking, then re-read the held appointment. Only a present
    /// and changed date-time counts as booked; a failed submission is still
    /// verified.
    async fn book_and_verify(
        &self,
        running: &mut Running,
        slot: &CandidateSlot,
    ) -> PollerResult<Option<HeldAppointment>> {
        let before = running.held.scheduled_at;
        let target = running.fetcher.target();

        if let Err(e) =
            booking::submit_booking(&self.session, &mut running.credentials, target, slot).await
        {
            tracing::warn!("Booking request failed, verifying anyway: {}", e);
        }

        let after =
            account::fetch_held(&self.session, &mut running.credentials, &target.schedule_id)
                .await?;
        let Some(at) = after.scheduled_at else {
            tracing::warn!(
                "Held appointment shows no date after booking, keeping {}",
                running.held.when()
            );
            return Ok(None);
        };
        if Some(at) == before {
            tracing::info!("Booking not confirmed, appointment unchanged");
            running.held = after;
            return Ok(None);
        }

        running.held = after;
        tracing::info!("Appointment booked: {}", running.held.when());
        let notification =
            notifier::booked(self.summary(), at, &self.recipient, Local::now().naive_local());
        self.notify(notification).await;
        Ok(Some(running.held.clone()))
    }

    fn report_dates(&self, dates: &[NaiveDate], held_at: Option<NaiveDateTime>) {
        let mut lines = Vec::new();
        let mut later = 0usize;

        for date in dates {
            match self.store.constraints.classify(*date, held_at) {
                DateVerdict::AfterMaximum => lines.push(format!("  {} (after your max date)", date)),
                DateVerdict::BeforeMinimum => {
                    lines.push(format!("  {} (before your min date)", date))
                }
                DateVerdict::NotEarlier => {
                    if later == 0 {
                        let current = held_at
                            .map(|at| at.format("%Y-%m-%d").to_string())
                            .unwrap_or_default();
                        lines.push(format!(
                            "Following dates are after your current appointment ({}):",
                            current
                        ));
                    }
                    if later < MAX_LATER_DATES_LISTED {
                        lines.push(format!("  {}", date));
                    } else if later == MAX_LATER_DATES_LISTED {
                        lines.push("  ... and more dates available".to_string());
                    }
                    later += 1;
                }
                DateVerdict::Candidate => lines.push(format!("  {} (in range)", date)),
            }
        }

        tracing::info!("Available dates:\n{}", lines.join("\n"));
    }

    fn summary(&self) -> AccountSummary<'_> {
        let country = &self.store.account.country;
        AccountSummary {
            email: &self.store.account.email,
            country: self.reference.country_name(country).unwrap_or(country),
            facility: self
                .reference
                .facility_label(self.store.constraints.facility_id.as_deref()),
        }
    }

    async fn notify(&self, notification: Notification) {
        if let Err(e) = self.notifier.notify(&notification).await {
            tracing::warn!("Failed to send notification '{}': {}", notification.subject, e);
        }
    }

    async fn stop_on(&self, error: PollerError) -> PollerResult<()> {
        if let PollerError::AppointmentBeforeMinimum { held, min_date } = &error {
            tracing::warn!(
                "Current appointment {} is already on or before the minimum date {}, nothing to improve",
                held,
                min_date
            );
            return Ok(());
        }

        tracing::error!("Stopping: {}", error);
        let notification = notifier::failed(
            self.summary(),
            &error.to_string(),
            &self.recipient,
            Local::now().naive_local(),
        );
        self.notify(notification).await;
        Err(error)
    }
}

/// First option known to the reference table, else the first option.
fn pick_option(
    options: Vec<(String, String)>,
    known: impl Fn(&str) -> bool,
) -> Option<(String, String)> {
    let index = options
        .iter()
        .position(|(id, _)| known(id))
        .unwrap_or(0);
    options.into_iter().nth(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(ids: &[&str]) -> Vec<(String, String)> {
        ids.iter()
            .map(|id| (id.to_string(), format!("Facility {}", id)))
            .collect()
    }

    #[test]
    fn test_pick_option_prefers_known() {
        let picked = pick_option(options(&["1", "94", "95"]), |id| id == "94" || id == "95");
        assert_eq!(picked.map(|(id, _)| id), Some("94".to_string()));
    }

    #[test]
    fn test_pick_option_falls_back_to_first() {
        let picked = pick_option(options(&["7", "8"]), |_| false);
        assert_eq!(picked.map(|(id, _)| id), Some("7".to_string()));
        assert_eq!(pick_option(Vec::new(), |_| true), None);
    }
}
