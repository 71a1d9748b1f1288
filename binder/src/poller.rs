//! Paged drain fetch from the control plane.
//!
//! `GET /v2/syslog_drain_urls?batch_size=B` with HTTP Basic auth, following
//! `next_id` until a response omits it. A mid-sequence failure returns the
//! pages accumulated so far together with the error, so publication can
//! proceed best-effort.

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Application id -> drain urls.
pub type AppDrains = HashMap<String, Vec<String>>;

#[derive(Debug, Error)]
pub enum PollError {
    #[error("control plane request: {0}")]
    Http(#[from] reqwest::Error),
    #[error("control plane returned {0}")]
    Status(StatusCode),
    #[error("control plane url: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, Deserialize)]
struct Page {
    results: AppDrains,
    /// Either `null` or missing entirely on the last page.
    #[serde(default)]
    next_id: Option<u64>,
}

/// The fetched mapping plus the error that cut the paging short, if any.
pub struct PollOutcome {
    pub drains: AppDrains,
    pub error: Option<PollError>,
}

pub struct Poller {
    client: Client,
    base: Url,
    username: String,
    password: String,
    batch_size: usize,
}

impl Poller {
    pub fn new(
        address: &str,
        username: impl Into<String>,
        password: impl Into<String>,
        batch_size: usize,
        skip_cert_verify: bool,
        timeout: Duration,
    ) -> Result<Self, PollError> {
        let client = Client::builder()
            .danger_accept_invalid_certs(skip_cert_verify)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base: Url::parse(address)?,
            username: username.into(),
            password: password.into(),
            batch_size,
        })
    }

    pub async fn poll(&self) -> PollOutcome {
        let mut drains = AppDrains::new();
        let mut next_id = None;
        loop {
            match self.fetch_page(next_id).await {
                Ok(page) => {
                    drains.extend(page.results);
                    match page.next_id {
                        Some(id) => next_id = Some(id),
                        None => return PollOutcome {
                            drains,
                            error: None,
                        },
                    }
                }
                Err(error) => {
                    return PollOutcome {
                        drains,
                        error: Some(error),
                    }
                }
            }
        }
    }

    async fn fetch_page(&self, next_id: Option<u64>) -> Result<Page, PollError> {
        let mut url = self.base.join("/v2/syslog_drain_urls")?;
        url.query_pairs_mut()
            .append_pair("batch_size", &self.batch_size.to_string());
        if let Some(id) = next_id {
            url.query_pairs_mut().append_pair("next_id", &id.to_string());
        }
        let response = self
            .client
            .get(url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(PollError::Status(response.status()));
        }
        Ok(response.json().await?)
    }
}


#[cfg(test)]
mod tests {
    use super::fake_control_plane as fake;
    use super::*;

    fn poller(address: &str, batch_size: usize) -> Poller {
        Poller::new(address, "user", "pass", batch_size, false, DEFAULT_TIMEOUT).unwrap()
    }

    #[tokio::test]
    async fn sends_basic_auth_and_the_batch_size() {
        let (address, observed) = fake::start(0).await;
        poller(&address, 2).poll().await;

        let observed = observed.lock().unwrap();
        // base64("user:pass")
        assert_eq!(observed.auth.as_deref(), Some("Basic dXNlcjpwYXNz"));
        assert_eq!(observed.batch_size.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn pages_through_ten_apps_with_batch_size_two() {
        let (address, observed) = fake::start(0).await;
        let outcome = poller(&address, 2).poll().await;

        assert!(outcome.error.is_none());
        assert_eq!(observed.lock().unwrap().requests, 6);
        assert_eq!(outcome.drains.len(), 10);
        for (app, urls) in fake::app_drains() {
            assert_eq!(outcome.drains.get(&app), Some(&urls));
        }
    }

    #[tokio::test]
    async fn pages_through_ten_apps_with_batch_size_three() {
        let (address, observed) = fake::start(0).await;
        let outcome = poller(&address, 3).poll().await;

        assert!(outcome.error.is_none());
        assert_eq!(observed.lock().unwrap().requests, 5);
        assert_eq!(outcome.drains.len(), 10);
    }

    #[tokio::test]
    async fn a_mid_sequence_failure_returns_the_partial_mapping() {
        let (address, observed) = fake::start(4).await;
        let outcome = poller(&address, 2).poll().await;

        assert!(matches!(
            outcome.error,
            Some(PollError::Status(StatusCode::BAD_REQUEST))
        ));
        assert_eq!(observed.lock().unwrap().requests, 4);
        assert_eq!(outcome.drains.len(), 8);
        for (app, urls) in fake::app_drains().into_iter().take(8) {
            assert_eq!(outcome.drains.get(&app), Some(&urls));
        }
        for (app, _) in fake::app_drains().into_iter().skip(8) {
            assert!(!outcome.drains.contains_key(&app));
        }
    }

    #[tokio::test]
    async fn times_out_against_an_unresponsive_control_plane() {
        // Bound but never accepted: the connection attempt must time out.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = format!("http://{}", listener.local_addr().unwrap());

        let poller = Poller::new(
            &address,
            "user",
            "pass",
            2,
            false,
            Duration::from_millis(50),
        )
        .unwrap();
        let outcome = poller.poll().await;
        assert!(matches!(outcome.error, Some(PollError::Http(_))));
    }
}
