#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use appointment_poller::config::{Account, ConstraintStore};
use appointment_poller::notifier::{Notification, Notifier};
use appointment_poller::portal::{PortalClient, SessionManager};
use appointment_poller::reference::ReferenceData;
use appointment_poller::PollerResult;
use async_trait::async_trait;
use chrono::NaiveDate;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const ROOT: &str = "/en-ca/niv";
pub const SCHEDULE_ID: &str = "123";

/// Keeps every notification; clones share the same record.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    pub fn subjects(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|n| n.subject.clone())
            .collect()
    }

    /// Notifications whose subject starts with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.subjects()
            .iter()
            .filter(|subject| subject.starts_with(prefix))
            .count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> PollerResult<()> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

pub fn account() -> Account {
    Account {
        email: "me@example.com".into(),
        password: "secret".into(),
        country: "ca".into(),
    }
}

pub fn reference() -> ReferenceData {
    ReferenceData::from_tables(
        [("ca".to_string(), "Canada".to_string())],
        [
            ("94".to_string(), "Toronto".to_string()),
            ("95".to_string(), "Vancouver".to_string()),
        ],
        [("98".to_string(), "Toronto ASC".to_string())],
    )
}

pub fn session(server: &MockServer) -> SessionManager {
    let client = PortalClient::new(&server.uri(), "ca").unwrap();
    SessionManager::new(client, account())
}

pub fn schedule_path(suffix: &str) -> String {
    format!("{}/schedule/{}{}", ROOT, SCHEDULE_ID, suffix)
}

pub fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
}

/// Constraint file with the account lines plus `extra` lines.
pub fn write_config(dir: &tempfile::TempDir, extra: &str) -> PathBuf {
    let path = dir.path().join("config");
    fs::write(
        &path,
        format!("EMAIL=me@example.com\nPASSWORD=secret\nCOUNTRY=ca\n{}", extra),
    )
    .unwrap();
    path
}

pub fn load_store(path: &std::path::Path) -> ConstraintStore {
    ConstraintStore::load_with_today(path, &reference(), today()).unwrap()
}

fn page_with_token(token: &str, body: &str) -> String {
    format!(
        "<html><head><meta name=\"csrf-token\" content=\"{}\" /></head><body>{}</body></html>",
        token, body
    )
}

/// Account overview listing schedule 123, held at `when` (e.g. `1 May, 2024, 09:00`).
pub fn overview(when: Option<&str>) -> String {
    let appointment = when
        .map(|w| format!("<p class='consular-appt'><strong>Consular Appointment:</strong> {} Toronto local time</p>", w))
        .unwrap_or_default();
    page_with_token(
        "overview-token",
        &format!(
            "<div class='application attend_appointment card'>\
             <table><tr><td>JANE DOE</td><td>X1234567</td><td>B1/B2</td><td>Toronto</td></tr></table>\
             {}<a href=\"{}/schedule/{}/continue_actions\">Continue</a></div>",
            appointment, ROOT, SCHEDULE_ID
        ),
    )
}

pub fn appointment_page() -> String {
    page_with_token(
        "schedule-token",
        "<select id=\"appointments_consulate_appointment_facility_id\">\
         <option value=\"\"></option><option value=\"12\">Unknown</option>\
         <option value=\"94\">Toronto</option></select>\
         <select id=\"appointments_asc_appointment_facility_id\">\
         <option value=\"98\">Toronto ASC</option></select>",
    )
}

/// Sign-in page and credential POST.
pub async fn mount_login(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(format!("{}/users/sign_in", ROOT)))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "_yatri_session=anonymous; path=/; HttpOnly")
                .set_body_string(page_with_token("login-token", "<form></form>")),
        )
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path(format!("{}/users/sign_in", ROOT)))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "_yatri_session=authed; path=/; HttpOnly")
                .set_body_string("window.location = '/';"),
        )
        .mount(server)
        .await;
}

pub async fn mount_appointment_page(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(schedule_path("/appointment")))
        .respond_with(ResponseTemplate::new(200).set_body_string(appointment_page()))
        .mount(server)
        .await;
}

/// Number of requests the server saw for `method_name` on `url_path`.
pub async fn request_count(server: &MockServer, method_name: &str, url_path: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.method.as_str() == method_name && r.url.path() == url_path)
        .count()
}

/// Poll the server's request log until `count` matching requests arrived.
pub async fn wait_for_requests(
    server: &MockServer,
    method_name: &str,
    url_path: &str,
    count: usize,
) {
    for _ in 0..500 {
        if request_count(server, method_name, url_path).await >= count {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("{} {} was not requested {} time(s)", method_name, url_path, count);
}
