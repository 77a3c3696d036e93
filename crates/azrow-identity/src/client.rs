//! HTTP helper for login endpoints.
//!
//! Unauthenticated GET/form-POST with rate-limit retries and standard error
//! extraction. Bearer calls go through [`crate::request::RequestConfig`].

use std::time::Duration;

use log::{debug, warn};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;

use crate::types::{IdentityConfig, IdentityError, IdentityErrorKind, IdentityResult};

/// Maximum retries for transient / rate-limit errors.
const MAX_RETRIES: u32 = 3;
/// Base delay between retries (doubled each attempt).
const BASE_DELAY_MS: u64 = 500;

#[derive(Clone)]
pub struct IdentityHttp {
    http: Client,
}

impl Default for IdentityHttp {
    fn default() -> Self {
        Self::new(&IdentityConfig::default())
    }
}

impl IdentityHttp {
    pub fn new(config: &IdentityConfig) -> Self {
        Self {
            http: Client::builder()
                .timeout(Duration::from_secs(config.request_timeout_secs))
                .build()
                .unwrap_or_default(),
        }
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> IdentityResult<T> {
        debug!("GET {}", url);
        self.send("GET", url, || self.http.get(url)).await
    }

    pub async fn post_form<T: DeserializeOwned>(
        &self,
        url: &str,
        form: &[(&str, &str)],
    ) -> IdentityResult<T> {
        debug!("POST {}", url);
        self.send("POST", url, || self.http.post(url).form(form)).await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        verb: &str,
        url: &str,
        build: impl Fn() -> RequestBuilder,
    ) -> IdentityResult<T> {
        for attempt in 0..=MAX_RETRIES {
            let resp = build()
                .send()
                .await
                .map_err(|e| IdentityError::new(IdentityErrorKind::Network, format!("{e}")))?;

            let status = resp.status();
            if status.is_success() {
                return resp.json::<T>().await.map_err(|e| {
                    IdentityError::new(IdentityErrorKind::Parse, format!("JSON parse: {e}"))
                });
            }

            if should_retry(status.as_u16()) && attempt < MAX_RETRIES {
                let delay = BASE_DELAY_MS * 2u64.pow(attempt);
                warn!("{} {} → {} – retrying in {}ms", verb, url, status, delay);
                tokio::time::sleep(Duration::from_millis(delay)).await;
                continue;
            }

            let body = resp.text().await.unwrap_or_default();
            return Err(IdentityError::from_status(status.as_u16(), &body));
        }

        Err(IdentityError::new(
            IdentityErrorKind::Network,
            "Max retries exceeded",
        ))
    }
}

fn should_retry(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

// ─── Tests ──────────────────────────────────────────────────────────
