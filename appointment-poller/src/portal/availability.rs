//! JSON availability queries for the primary and secondary facility.
//!
//! Every call is a single read through `SessionManager::ensure_fresh`, so a
//! 401 costs one re-login and one retry. Results are ascending and
//! deduplicated.

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use shared::api::API_DATE_FORMAT;
use shared::{AvailableDay, AvailableTimes};

use super::{ensure_success, PageKind, PortalRequest, SessionCredentials, SessionManager};
use crate::error::{PollerError, PollerResult};

/// The schedule and facilities the queries run against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleTarget {
    pub schedule_id: String,
    pub facility_id: String,
    pub secondary_facility_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AvailabilityFetcher {
    target: ScheduleTarget,
}

impl AvailabilityFetcher {
    pub fn new(target: ScheduleTarget) -> Self {
        Self { target }
    }

    pub fn target(&self) -> &ScheduleTarget {
        &self.target
    }

    pub async fn primary_dates(
        &self,
        session: &SessionManager,
        credentials: &mut SessionCredentials,
    ) -> PollerResult<Vec<NaiveDate>> {
        tracing::debug!("Fetching available dates");
        let request = self.request(session, "days", &self.target.facility_id);
        let days: Vec<AvailableDay> = self.read(session, credentials, request).await?;
        Ok(AvailableDay::parse_all(&days)?)
    }

    pub async fn primary_times(
        &self,
        session: &SessionManager,
        credentials: &mut SessionCredentials,
        date: NaiveDate,
    ) -> PollerResult<Vec<String>> {
        tracing::debug!("Fetching available times for {}", date);
        let request = self
            .request(session, "times", &self.target.facility_id)
            .query("date", date.format(API_DATE_FORMAT).to_string());
        let times: AvailableTimes = self.read(session, credentials, request).await?;
        Ok(times.into_times())
    }

    /// Secondary dates, optionally paired with a tentative primary slot.
    pub async fn secondary_dates(
        &self,
        session: &SessionManager,
        credentials: &mut SessionCredentials,
        for_date: Option<NaiveDate>,
        for_time: Option<&str>,
    ) -> PollerResult<Vec<NaiveDate>> {
        tracing::debug!("Fetching available ASC dates");
        let request = self.secondary_request(session, "days", for_date, for_time)?;
        let days: Vec<AvailableDay> = self.read(session, credentials, request).await?;
        Ok(AvailableDay::parse_all(&days)?)
    }

    pub async fn secondary_times(
        &self,
        session: &SessionManager,
        credentials: &mut SessionCredentials,
        secondary_date: NaiveDate,
        for_date: Option<NaiveDate>,
        for_time: Option<&str>,
    ) -> PollerResult<Vec<String>> {
        tracing::debug!("Fetching available ASC times for {}", secondary_date);
        let request = self
            .secondary_request(session, "times", for_date, for_time)?
            .query("date", secondary_date.format(API_DATE_FORMAT).to_string());
        let times: AvailableTimes = self.read(session, credentials, request).await?;
        Ok(times.into_times())
    }

    fn request(&self, session: &SessionManager, kind: &str, facility_id: &str) -> PortalRequest {
        let client = session.client();
        let path = format!("/appointment/{}/{}.json", kind, facility_id);
        PortalRequest::get(client.schedule_url(&self.target.schedule_id, &path), PageKind::Json)
            .query("appointments[expedite]", "false")
            .referer(client.schedule_url(&self.target.schedule_id, "/appointment"))
    }

    fn secondary_request(
        &self,
        session: &SessionManager,
        kind: &str,
        for_date: Option<NaiveDate>,
        for_time: Option<&str>,
    ) -> PollerResult<PortalRequest> {
        let facility_id = self
            .target
            .secondary_facility_id
            .as_deref()
            .ok_or_else(|| PollerError::config("ASC facility is not resolved"))?;

        Ok(self
            .request(session, kind, facility_id)
            .query("consulate_id", self.target.facility_id.clone())
            .query(
                "consulate_date",
                for_date
                    .map(|d| d.format(API_DATE_FORMAT).to_string())
                    .unwrap_or_default(),
            )
            .query("consulate_time", for_time.unwrap_or_default()))
    }

    async fn read<T: DeserializeOwned>(
        &self,
        session: &SessionManager,
        credentials: &mut SessionCredentials,
        request: PortalRequest,
    ) -> PollerResult<T> {
        let response = ensure_success(session.ensure_fresh(credentials, &request).await?)?;
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}
