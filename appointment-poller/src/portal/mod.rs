//! HTTP surface of the scheduling service.
//!
//! `PortalClient` knows the URLs and header sets, `SessionManager` owns the
//! login exchange and re-authentication, and the remaining modules are the
//! individual reads and the booking transaction built on top of them.

pub mod account;
pub mod availability;
pub mod booking;
pub mod pages;
pub mod session;

pub use availability::AvailabilityFetcher;
pub use session::{SessionCredentials, SessionManager};

use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, COOKIE, ORIGIN, REFERER};
use reqwest::{Client, Method, Response};

use crate::error::{PollerError, PollerResult};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const CSRF_HEADER: &str = "X-CSRF-Token";
const DOCUMENT_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";
const JSON_ACCEPT: &str = "application/json, text/javascript, */*; q=0.01";
const SCRIPT_ACCEPT: &str = "*/*;q=0.5, text/javascript, application/javascript, \
     application/ecmascript, application/x-ecmascript";

/// Which browser-like header set a request carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    /// Plain page load
    Document,
    /// Page load triggered by a user click (adds `Sec-Fetch-User`)
    Navigation,
    /// XHR returning JSON
    Json,
    /// XHR form post answered with JavaScript (sign-in)
    Script,
}

/// A request description that can be sent again after re-authentication.
#[derive(Debug, Clone)]
pub struct PortalRequest {
    method: Method,
    url: String,
    kind: PageKind,
    query: Vec<(String, String)>,
    form: Option<Vec<(String, String)>>,
    /// Form field filled with the session's anti-forgery token on every send
    csrf_field: Option<String>,
    referer: Option<String>,
}

impl PortalRequest {
    pub fn get(url: impl Into<String>, kind: PageKind) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            kind,
            query: Vec::new(),
            form: None,
            csrf_field: None,
            referer: None,
        }
    }

    pub fn post_form(url: impl Into<String>, kind: PageKind, form: Vec<(String, String)>) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            kind,
            query: Vec::new(),
            form: Some(form),
            csrf_field: None,
            referer: None,
        }
    }

    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }

    pub fn csrf_field(mut self, name: &str) -> Self {
        self.csrf_field = Some(name.to_string());
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Form body as sent with `credentials`; the token field carries their
    /// current token.
    fn form_fields(
        &self,
        credentials: Option<&SessionCredentials>,
    ) -> Option<Vec<(String, String)>> {
        let mut form = self.form.clone()?;
        if let (Some(field), Some(credentials)) = (&self.csrf_field, credentials) {
            form.retain(|(key, _)| key != field);
            form.insert(0, (field.clone(), credentials.csrf_token().to_string()));
        }
        Some(form)
    }
}

#[derive(Debug, Clone)]
pub struct PortalClient {
    http: Client,
    origin: String,
    root: String,
}

impl PortalClient {
    /// `base_url` is the service origin; `country` selects the `/en-{country}/niv` tree.
    pub fn new(base_url: &str, country: &str) -> PollerResult<Self> {
        let http = Client::builder().user_agent(USER_AGENT).build()?;
        let origin = base_url.trim_end_matches('/').to_string();
        let root = format!("{}/en-{}/niv", origin, country);
        Ok(Self { http, origin, root })
    }

    /// Absolute URL of a path under the country tree (`""` is the account overview).
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.root, path)
    }

    pub fn schedule_url(&self, schedule_id: &str, path: &str) -> String {
        self.url(&format!("/schedule/{}{}", schedule_id, path))
    }

    pub(crate) async fn send(
        &self,
        request: &PortalRequest,
        credentials: Option<&SessionCredentials>,
    ) -> PollerResult<Response> {
        let mut builder = self
            .http
            .request(request.method.clone(), &request.url)
            .header(ACCEPT_LANGUAGE, "en-US,en;q=0.9");

        builder = match request.kind {
            PageKind::Document | PageKind::Navigation => builder
                .header(ACCEPT, DOCUMENT_ACCEPT)
                .header(CACHE_CONTROL, "no-cache")
                .header("Upgrade-Insecure-Requests", "1")
                .header("Sec-Fetch-Dest", "document")
                .header("Sec-Fetch-Mode", "navigate")
                .header("Sec-Fetch-Site", "same-origin"),
            PageKind::Json => builder
                .header(ACCEPT, JSON_ACCEPT)
                .header("X-Requested-With", "XMLHttpRequest"),
            PageKind::Script => builder
                .header(ACCEPT, SCRIPT_ACCEPT)
                .header("X-Requested-With", "XMLHttpRequest"),
        };
        if request.kind == PageKind::Navigation {
            builder = builder.header("Sec-Fetch-User", "?1");
        }

        if let Some(credentials) = credentials {
            if !credentials.cookie().is_empty() {
                builder = builder.header(COOKIE, credentials.cookie());
            }
            if !credentials.csrf_token().is_empty() {
                builder = builder.header(CSRF_HEADER, credentials.csrf_token());
            }
        }
        if let Some(referer) = &request.referer {
            builder = builder.header(REFERER, referer);
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(form) = request.form_fields(credentials) {
            builder = builder.header(ORIGIN, &self.origin).form(&form);
        }

        tracing::trace!("{} {}", request.method, request.url);
        Ok(builder.send().await?)
    }
}

/// Fail with `PollerError::Status` unless the response is 2xx.
pub fn ensure_success(response: Response) -> PollerResult<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(PollerError::Status {
            status,
            url: response.url().to_string(),
        })
    }
}
