//! HTTP collaborator.
//!
//! The core only needs blocking `get(params)` / `post(params)` returning the
//! raw body. Sessions, retries, timeouts and cancellation belong to the
//! implementation, not to the callers.

use std::collections::BTreeMap;

/// Query parameters of one API request.
pub type Params = BTreeMap<String, String>;

pub trait HttpClient: Send + Sync {
    fn get(&self, params: &Params) -> anyhow::Result<String>;
    fn post(&self, params: &Params) -> anyhow::Result<String>;
}

#[cfg(feature = "http")]
pub use self::blocking::ApiClient;

#[cfg(feature = "http")]
mod blocking {
    use super::{HttpClient, Params};
    use crate::config::Config;
    use anyhow::Context;
    use std::time::Duration;
    use tracing::debug;

    /// Blocking reqwest client bound to one API endpoint.
    #[derive(Clone)]
    pub struct ApiClient {
        http: reqwest::blocking::Client,
        endpoint: String,
    }

    impl ApiClient {
        pub fn new(endpoint: &str, config: &Config) -> anyhow::Result<Self> {
            let http = reqwest::blocking::Client::builder()
                .user_agent(config.user_agent.clone())
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()
                .context("Failed to build HTTP client")?;
            Ok(ApiClient {
                http,
                endpoint: endpoint.to_string(),
            })
        }

        pub fn endpoint(&self) -> &str {
            &self.endpoint
        }
    }

    impl HttpClient for ApiClient {
        fn get(&self, params: &Params) -> anyhow::Result<String> {
            debug!(endpoint = self.endpoint.as_str(), ?params, "GET");
            let resp = self
                .http
                .get(&self.endpoint)
                .query(params)
                .send()
                .with_context(|| format!("GET {} failed", self.endpoint))?;
            let status = resp.status();
            if !status.is_success() {
                anyhow::bail!("GET {} returned HTTP {}", self.endpoint, status);
            }
            resp.text().context("Failed to read response body")
        }

        fn post(&self, params: &Params) -> anyhow::Result<String> {
            debug!(endpoint = self.endpoint.as_str(), ?params, "POST");
            let resp = self
                .http
                .post(&self.endpoint)
                .form(params)
                .send()
                .with_context(|| format!("POST {} failed", self.endpoint))?;
            let status = resp.status();
            if !status.is_success() {
                anyhow::bail!("POST {} returned HTTP {}", self.endpoint, status);
            }
            resp.text().context("Failed to read response body")
        }
    }
}
