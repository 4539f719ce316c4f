//! The booking form submission.
//!
//! The response is never taken as proof of success; callers re-read the held
//! appointment afterwards.

use reqwest::StatusCode;
use shared::api::API_DATE_FORMAT;
use shared::CandidateSlot;

use super::availability::ScheduleTarget;
use super::{PageKind, PortalRequest, SessionCredentials, SessionManager};
use crate::error::PollerResult;

const TOKEN_FIELD: &str = "authenticity_token";

/// Form fields for booking `slot`, without the token field, which is filled
/// in at send time. Secondary fields are included only when the slot carries
/// a secondary pairing and a secondary facility is known.
pub fn booking_form(target: &ScheduleTarget, slot: &CandidateSlot) -> Vec<(String, String)> {
    let mut form = vec![
        ("confirmed_limit_message".to_string(), "1".to_string()),
        ("use_consulate_appointment_capacity".to_string(), "true".to_string()),
        (
            "appointments[consulate_appointment][facility_id]".to_string(),
            target.facility_id.clone(),
        ),
        (
            "appointments[consulate_appointment][date]".to_string(),
            slot.date.format(API_DATE_FORMAT).to_string(),
        ),
        ("appointments[consulate_appointment][time]".to_string(), slot.time.clone()),
    ];

    if let (Some(secondary), Some(facility_id)) = (&slot.secondary, &target.secondary_facility_id) {
        form.extend([
            ("appointments[asc_appointment][facility_id]".to_string(), facility_id.clone()),
            (
                "appointments[asc_appointment][date]".to_string(),
                secondary.date.format(API_DATE_FORMAT).to_string(),
            ),
            ("appointments[asc_appointment][time]".to_string(), secondary.time.clone()),
        ]);
    }

    form
}

/// POST the booking form and return the status the service answered with.
pub async fn submit_booking(
    session: &SessionManager,
    credentials: &mut SessionCredentials,
    target: &ScheduleTarget,
    slot: &CandidateSlot,
) -> PollerResult<StatusCode> {
    let client = session.client();
    let appointment_url = client.schedule_url(&target.schedule_id, "/appointment");
    let form = booking_form(target, slot);

    tracing::info!("Submitting booking for {}", slot);
    let request = PortalRequest::post_form(&appointment_url, PageKind::Navigation, form)
        .csrf_field(TOKEN_FIELD)
        .referer(&appointment_url);
    let response = session.ensure_fresh(credentials, &request).await?;

    let status = response.status();
    tracing::debug!("Booking request answered with {}", status);
    Ok(status)
}
