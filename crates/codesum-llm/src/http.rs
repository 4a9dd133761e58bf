//! Shared HTTP client construction for consistent timeout and TLS configuration.

use std::time::Duration;

/// Create the HTTP client shared by the OpenAI-style backends.
///
/// 30s connect timeout, 120s request timeout, rustls TLS, `codesum/{version}`
/// user-agent, redirect limit 10.
#[must_use]
pub(crate) fn default_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .timeout(Duration::from_secs(120))
        .user_agent(concat!("codesum/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("custom HTTP client construction failed, using defaults: {e}");
            reqwest::Client::new()
        })
}
