//! Error type for the appointment poller.
//!
//! Variants follow how the polling loop must react: configuration and
//! account-state errors end the process, everything else aborts only the
//! current poll cycle.

use chrono::NaiveDate;
use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PollerError {
    /// Missing or invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// The account lists no applications
    #[error("No appointment schedule found. Make sure the account has an active application")]
    NoSchedule,

    /// The configured schedule id is not among the account's applications
    #[error("Schedule {0} not found on the account")]
    UnknownSchedule(String),

    /// Held appointment is already on or before the minimum date
    #[error("Current appointment date {held} is not after the minimum date {min_date}")]
    AppointmentBeforeMinimum { held: NaiveDate, min_date: NaiveDate },

    /// Still rejected after one re-login
    #[error("Authentication rejected after re-login")]
    AuthRejected,

    /// Non-success HTTP status
    #[error("HTTP {status} from {url}")]
    Status { status: StatusCode, url: String },

    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// An expected element is missing from an HTML page
    #[error("Unexpected page content: {0}")]
    MalformedPage(String),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid date in response: {0}")]
    Date(#[from] chrono::ParseError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PollerError {
    pub fn config(message: impl Into<String>) -> Self {
        PollerError::Config(message.into())
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        PollerError::MalformedPage(message.into())
    }

    /// Whether the polling loop must stop instead of retrying next cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PollerError::Config(_)
                | PollerError::NoSchedule
                | PollerError::UnknownSchedule(_)
                | PollerError::AppointmentBeforeMinimum { .. }
        )
    }
}

pub type PollerResult<T> = Result<T, PollerError>;
