//! Lifecycle notifications: composition of the start, booked and error
//! messages plus the delivery seam.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};

use crate::error::PollerResult;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub subject: String,
    pub html_body: String,
    pub recipient: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> PollerResult<()>;
}

/// Writes notifications to the log instead of delivering them.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> PollerResult<()> {
        tracing::info!(
            recipient = %notification.recipient,
            "Notification: {}",
            notification.subject
        );
        tracing::debug!("{}", notification.html_body);
        Ok(())
    }
}

/// Account facts every notification body carries.
#[derive(Debug, Clone, Copy)]
pub struct AccountSummary<'a> {
    pub email: &'a str,
    pub country: &'a str,
    pub facility: &'a str,
}

pub fn started(
    account: AccountSummary<'_>,
    min_date: NaiveDate,
    max_date: Option<NaiveDate>,
    recipient: &str,
    now: NaiveDateTime,
) -> Notification {
    let max_date = max_date
        .map(|d| d.to_string())
        .unwrap_or_else(|| "Not specified".to_string());
    let html_body = format!(
        "<h2>Appointment Poller Started</h2>\n{}{}{}{}",
        account_rows(&account),
        row("Min Date", &min_date.to_string()),
        row("Max Date", &max_date),
        row("Start Time", &now.format(TIMESTAMP_FORMAT).to_string()),
    );

    Notification {
        subject: format!("Appointment Poller Started - {}", account.email),
        html_body,
        recipient: recipient.to_string(),
    }
}

pub fn booked(
    account: AccountSummary<'_>,
    appointment: NaiveDateTime,
    recipient: &str,
    now: NaiveDateTime,
) -> Notification {
    let html_body = format!(
        "<h2>Appointment Successfully Booked</h2>\n{}{}{}{}",
        account_rows(&account),
        row("New Appointment Date", &appointment.format("%Y-%m-%d").to_string()),
        row("New Appointment Time", &appointment.format("%H:%M").to_string()),
        row("Booked At", &now.format(TIMESTAMP_FORMAT).to_string()),
    );

    Notification {
        subject: format!("Appointment Booked - {}", account.email),
        html_body,
        recipient: recipient.to_string(),
    }
}

pub fn failed(
    account: AccountSummary<'_>,
    error: &str,
    recipient: &str,
    now: NaiveDateTime,
) -> Notification {
    let html_body = format!(
        "<h2>Appointment Poller Error</h2>\n{}{}{}",
        account_rows(&account),
        row("Error", error),
        row("Time", &now.format(TIMESTAMP_FORMAT).to_string()),
    );

    Notification {
        subject: format!("Appointment Poller Error - {}", account.email),
        html_body,
        recipient: recipient.to_string(),
    }
}

fn account_rows(account: &AccountSummary<'_>) -> String {
    format!(
        "{}{}{}",
        row("Email", account.email),
        row("Country", account.country),
        row("Facility", account.facility)
    )
}

fn row(label: &str, value: &str) -> String {
    format!("<p><strong>{}:</strong> {}</p>\n", label, escape(value))
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> NaiveDateTime {
        NaiveDateTime::parse_from_str("2024-01-15 09:30:00", "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn account() -> AccountSummary<'static> {
        AccountSummary {
            email: "me@example.com",
            country: "Canada",
            facility: "Toronto",
        }
    }

    #[test]
    fn test_started_body() {
        let n = started(
            account(),
            NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            None,
            "ops@example.com",
            now(),
        );
        assert_eq!(n.subject, "Appointment Poller Started - me@example.com");
        assert_eq!(n.recipient, "ops@example.com");
        assert!(n.html_body.contains("<strong>Country:</strong> Canada"));
        assert!(n.html_body.contains("<strong>Facility:</strong> Toronto"));
        assert!(n.html_body.contains("<strong>Max Date:</strong> Not specified"));
        assert!(n.html_body.contains("2024-01-15 09:30:00"));
    }

    #[test]
    fn test_booked_body() {
        let appointment =
            NaiveDateTime::parse_from_str("2024-02-10 08:00", "%Y-%m-%d %H:%M").unwrap();
        let n = booked(account(), appointment, "me@example.com", now());
        assert!(n.html_body.contains("<strong>New Appointment Date:</strong> 2024-02-10"));
        assert!(n.html_body.contains("<strong>New Appointment Time:</strong> 08:00"));
    }

    #[test]
    fn test_error_is_escaped() {
        let n = failed(account(), "bad <html> & stuff", "me@example.com", now());
        assert!(n.html_body.contains("bad &lt;html&gt; &amp; stuff"));
    }

    #[tokio::test]
    async fn test_log_notifier() {
        let n = failed(account(), "boom", "me@example.com", now());
        LogNotifier.notify(&n).await.unwrap();
    }
}
