//! Scraping of the HTML pages the service renders: the anti-forgery meta
//! tag, the applications on the account overview and the facility selects
//! of the appointment form.

use chrono::NaiveDateTime;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use shared::HeldAppointment;
use std::sync::OnceLock;

use crate::error::{PollerError, PollerResult};

/// Element ids of the facility selects on the appointment page
pub const FACILITY_SELECT_ID: &str = "appointments_consulate_appointment_facility_id";
pub const SECONDARY_FACILITY_SELECT_ID: &str = "appointments_asc_appointment_facility_id";

/// e.g. `9 April, 2026, 08:00`
const APPOINTMENT_FORMAT: &str = "%d %B, %Y, %H:%M";

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("hard-coded selector")
}

fn compiled(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("hard-coded pattern"))
}

/// Visible text of an element with whitespace collapsed.
fn text_of(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Content of `<meta name="csrf-token">`.
pub fn csrf_token(html: &str) -> PollerResult<String> {
    let document = Html::parse_document(html);
    document
        .select(&selector(r#"meta[name="csrf-token"]"#))
        .find_map(|meta| meta.value().attr("content"))
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .ok_or_else(|| PollerError::malformed("anti-forgery token missing from page"))
}

/// Applications listed on the account overview, in page order.
pub fn applications(html: &str) -> Vec<HeldAppointment> {
    let document = Html::parse_document(html);
    document
        .select(&selector("div.application"))
        .filter_map(parse_application)
        .collect()
}

fn parse_application(application: ElementRef<'_>) -> Option<HeldAppointment> {
    static DIGITS: OnceLock<Regex> = OnceLock::new();
    static WHEN: OnceLock<Regex> = OnceLock::new();

    let href = application
        .select(&selector("a"))
        .next()?
        .value()
        .attr("href")?;
    let schedule_id = compiled(&DIGITS, r"\d+").find(href)?.as_str().to_string();

    let description = application
        .select(&selector("td"))
        .take(4)
        .map(text_of)
        .collect::<Vec<_>>()
        .join(" ");

    let scheduled_at = application
        .select(&selector("p.consular-appt"))
        .next()
        .and_then(|paragraph| {
            let text = text_of(paragraph);
            compiled(&WHEN, r"\d{1,2} \w+?, \d{4}, \d{1,2}:\d{1,2}")
                .find(&text)
                .and_then(|m| NaiveDateTime::parse_from_str(m.as_str(), APPOINTMENT_FORMAT).ok())
        });

    Some(HeldAppointment {
        schedule_id,
        description,
        scheduled_at,
    })
}

/// `(value, label)` of the non-empty options of the `<select id=...>`.
pub fn select_options(html: &str, element_id: &str) -> Vec<(String, String)> {
    let document = Html::parse_document(html);
    let Some(select) = document
        .select(&selector("select"))
        .find(|select| select.value().id() == Some(element_id))
    else {
        return Vec::new();
    };

    select
        .select(&selector("option"))
        .filter_map(|option| {
            let value = option.value().attr("value")?;
            (!value.is_empty()).then(|| (value.to_string(), text_of(option)))
        })
        .collect()
}
