//! Session lifecycle: login exchange, per-schedule anti-forgery token and
//! transparent re-authentication.
//!
//! Credentials are plain values returned by `establish()` and passed by
//! `&mut` into every call that may replace them.

use reqwest::header::{HeaderMap, SET_COOKIE};
use reqwest::{Response, StatusCode};

use super::{ensure_success, pages, PageKind, PortalClient, PortalRequest};
use crate::config::Account;
use crate::error::{PollerError, PollerResult};

/// Session cookie and anti-forgery token of one login.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SessionCredentials {
    cookie: String,
    csrf_token: String,
}

impl std::fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("cookie", &format_args!("<{} bytes>", self.cookie.len()))
            .field("csrf_token", &format_args!("<{} bytes>", self.csrf_token.len()))
            .finish()
    }
}

impl SessionCredentials {
    pub fn new(cookie: impl Into<String>, csrf_token: impl Into<String>) -> Self {
        Self {
            cookie: cookie.into(),
            csrf_token: csrf_token.into(),
        }
    }

    pub fn cookie(&self) -> &str {
        &self.cookie
    }

    pub fn csrf_token(&self) -> &str {
        &self.csrf_token
    }

    /// Merge `Set-Cookie` headers into the cookie string, replacing cookies
    /// of the same name.
    pub(crate) fn absorb_cookies(&mut self, headers: &HeaderMap) {
        let mut jar: Vec<(String, String)> = self
            .cookie
            .split(';')
            .filter_map(|pair| pair.trim().split_once('='))
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();

        let mut changed = false;
        for header in headers.get_all(SET_COOKIE) {
            let Ok(raw) = header.to_str() else { continue };
            let pair = raw.split(';').next().unwrap_or_default().trim();
            let Some((name, value)) = pair.split_once('=') else { continue };

            match jar.iter_mut().find(|(existing, _)| existing == name) {
                Some(entry) => entry.1 = value.to_string(),
                None => jar.push((name.to_string(), value.to_string())),
            }
            changed = true;
        }

        if changed {
            self.cookie = jar
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect::<Vec<_>>()
                .join("; ");
        }
    }
}

pub struct SessionManager {
    client: PortalClient,
    account: Account,
    schedule_id: Option<String>,
}

impl SessionManager {
    pub fn new(client: PortalClient, account: Account) -> Self {
        Self {
            client,
            account,
            schedule_id: None,
        }
    }

    pub fn client(&self) -> &PortalClient {
        &self.client
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn schedule_id(&self) -> Option<&str> {
        self.schedule_id.as_deref()
    }

    /// Log in from scratch. Once a schedule is bound, also load its
    /// appointment page so the returned token is valid for booking.
    pub async fn establish(&self) -> PollerResult<SessionCredentials> {
        let mut credentials = self.login().await?;
        if let Some(schedule_id) = &self.schedule_id {
            self.load_appointment_page(schedule_id, &mut credentials)
                .await?;
        }
        Ok(credentials)
    }

    /// Bind the schedule used for later re-logins and return its appointment
    /// page, whose cookie and token replace the current ones.
    pub async fn open_schedule(
        &mut self,
        schedule_id: &str,
        credentials: &mut SessionCredentials,
    ) -> PollerResult<String> {
        self.schedule_id = Some(schedule_id.to_string());
        self.load_appointment_page(schedule_id, credentials).await
    }

    /// Send `request`; on 401 log in again and retry exactly once.
    pub async fn ensure_fresh(
        &self,
        credentials: &mut SessionCredentials,
        request: &PortalRequest,
    ) -> PollerResult<Response> {
        let response = self.client.send(request, Some(&*credentials)).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            credentials.absorb_cookies(response.headers());
            return Ok(response);
        }

        tracing::warn!("Session expired - reconnecting...");
        *credentials = self.establish().await?;

        let response = self.client.send(request, Some(&*credentials)).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(PollerError::AuthRejected);
        }
        credentials.absorb_cookies(response.headers());
        Ok(response)
    }

    async fn login(&self) -> PollerResult<SessionCredentials> {
        let sign_in_url = self.client.url("/users/sign_in");

        tracing::info!("Signing into your account...");
        let page = PortalRequest::get(&sign_in_url, PageKind::Document).referer(&sign_in_url);
        let response = ensure_success(self.client.send(&page, None).await?)?;

        let mut credentials = SessionCredentials::default();
        credentials.absorb_cookies(response.headers());
        credentials.csrf_token = pages::csrf_token(&response.text().await?)?;

        tracing::info!("Verifying credentials...");
        let form = vec![
            ("user[email]".to_string(), self.account.email.clone()),
            ("user[password]".to_string(), self.account.password.clone()),
            ("policy_confirmed".to_string(), "1".to_string()),
            ("commit".to_string(), "Sign In".to_string()),
        ];
        let submit =
            PortalRequest::post_form(&sign_in_url, PageKind::Script, form).referer(&sign_in_url);
        let response = self.client.send(&submit, Some(&credentials)).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(PollerError::AuthRejected);
        }
        let response = ensure_success(response)?;
        credentials.absorb_cookies(response.headers());

        tracing::debug!("Signed in as {}", self.account.email);
        Ok(credentials)
    }

    async fn load_appointment_page(
        &self,
        schedule_id: &str,
        credentials: &mut SessionCredentials,
    ) -> PollerResult<String> {
        tracing::info!("Initializing secure session...");
        let request = PortalRequest::get(
            self.client.schedule_url(schedule_id, "/appointment"),
            PageKind::Navigation,
        )
        .referer(self.client.schedule_url(schedule_id, "/continue_actions"));

        let response = ensure_success(self.client.send(&request, Some(&*credentials)).await?)?;
        credentials.absorb_cookies(response.headers());

        let html = response.text().await?;
        credentials.csrf_token = pages::csrf_token(&html)?;
        Ok(html)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_absorb_cookies_merges_by_name() {
        let mut credentials = SessionCredentials::new("_session=old; locale=en", "t");

        let mut headers = HeaderMap::new();
        headers.append(
            SET_COOKIE,
            HeaderValue::from_static("_session=new; path=/; HttpOnly"),
        );
        headers.append(SET_COOKIE, HeaderValue::from_static("extra=1; Secure"));
        credentials.absorb_cookies(&headers);

        assert_eq!(credentials.cookie(), "_session=new; locale=en; extra=1");
        assert_eq!(credentials.csrf_token(), "t");
    }

    #[test]
    fn test_absorb_without_set_cookie_keeps_cookie() {
        let mut credentials = SessionCredentials::new("_session=abc", "t");
        credentials.absorb_cookies(&HeaderMap::new());
        assert_eq!(credentials.cookie(), "_session=abc");
    }

    #[test]
    fn test_debug_hides_secrets() {
        let credentials = SessionCredentials::new("_session=abc", "token");
        let rendered = format!("{:?}", credentials);
        assert!(!rendered.contains("abc"));
        assert!(!rendered.contains("token"));
    }
}
