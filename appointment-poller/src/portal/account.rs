//! Reads from the account overview page.

use shared::HeldAppointment;

use super::{ensure_success, pages, PageKind, PortalRequest, SessionCredentials, SessionManager};
use crate::error::{PollerError, PollerResult};

/// All applications on the account, in page order.
pub async fn fetch_applications(
    session: &SessionManager,
    credentials: &mut SessionCredentials,
) -> PollerResult<Vec<HeldAppointment>> {
    let client = session.client();
    let request = PortalRequest::get(client.url(""), PageKind::Document)
        .referer(client.url("/users/sign_in"));

    let response = ensure_success(session.ensure_fresh(credentials, &request).await?)?;
    let applications = pages::applications(&response.text().await?);
    if applications.is_empty() {
        return Err(PollerError::NoSchedule);
    }

    tracing::debug!("Found {} application(s) on the account", applications.len());
    Ok(applications)
}

/// The held appointment of `schedule_id`.
pub async fn fetch_held(
    session: &SessionManager,
    credentials: &mut SessionCredentials,
    schedule_id: &str,
) -> PollerResult<HeldAppointment> {
    fetch_applications(session, credentials)
        .await?
        .into_iter()
        .find(|app| app.schedule_id == schedule_id)
        .ok_or_else(|| PollerError::UnknownSchedule(schedule_id.to_string()))
}
