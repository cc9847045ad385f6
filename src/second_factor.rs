//! The external second-factor authentication contract the proxy session
//! calls into once the upstream has accepted a first-factor bind.
//!
//! Any transport failure or timeout is a refusal: the session never treats
//! an unreachable second-factor service as "allow".

use std::time::Duration;

use async_trait::async_trait;
use log::warn;
use serde::{Deserialize, Serialize};

/// `authenticate(login)` is the entire contract the proxy session relies on.
#[async_trait]
pub trait SecondFactorClient: Send + Sync {
    async fn authenticate(&self, login: &str) -> bool;
}

#[derive(Serialize)]
struct AuthenticateRequest<'a> {
    login: &'a str,
}

#[derive(Deserialize)]
struct AuthenticateResponse {
    allow: bool,
}

/// Calls `POST {base_url}/authenticate` with `{"login": "..."}` and expects
/// `{"allow": true}` back on success.
pub struct HttpSecondFactorClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSecondFactorClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> HttpSecondFactorClient {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to build second-factor HTTP client");
        HttpSecondFactorClient { client, base_url: base_url.into() }
    }
}

#[async_trait]
impl SecondFactorClient for HttpSecondFactorClient {
    async fn authenticate(&self, login: &str) -> bool {
        let url = format!("{}/authenticate", self.base_url);
        let result = self
            .client
            .post(&url)
            .json(&AuthenticateRequest { login })
            .send()
            .await;

        let response = match result {
            Ok(r) => r,
            Err(e) => {
                warn!("second-factor request for {} failed: {}", login, e);
                return false;
            }
        };

        if !response.status().is_success() {
            warn!("second-factor service returned {} for {}", response.status(), login);
            return false;
        }

        match response.json::<AuthenticateResponse>().await {
            Ok(body) => body.allow,
            Err(e) => {
                warn!("second-factor response for {} was malformed: {}", login, e);
                false
            }
        }
    }
}

/// Deterministic test doubles, also useful for a proxy deployment that wants
/// to force-allow or force-deny without standing up a real second factor.
pub struct AlwaysAllow;

#[async_trait]
impl SecondFactorClient for AlwaysAllow {
    async fn authenticate(&self, _login: &str) -> bool {
        true
    }
}

pub struct AlwaysDeny;

#[async_trait]
impl SecondFactorClient for AlwaysDeny {
    async fn authenticate(&self, _login: &str) -> bool {
        false
    }
}
