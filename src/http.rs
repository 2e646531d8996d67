//! HTTP client with rate limiting for the Odesli API.
//!
//! This module provides a wrapper around `reqwest::Client` that adds:
//! * Request rate limiting to respect the public API quota
//! * Consistent timeouts and headers
//!
//! # Rate Limiting
//!
//! The unauthenticated Odesli API allows 10 calls per minute. Requests that
//! would exceed the limit are delayed rather than rejected, so a burst of
//! deep links never turns into a burst of `429 Too Many Requests`.
//!
//! # Example
//!
//! ```rust
//! use music_link_handler::http::Client;
//!
//! let client = Client::new(&config)?;
//! let request = client.get(url);
//! let response = client.execute(request).await?;
//! ```

use std::{future::Future, num::NonZeroU32, time::Duration};

use futures_util::{FutureExt, TryFutureExt};
use governor::{DefaultDirectRateLimiter, Quota};
use reqwest::{
    header::{HeaderValue, ACCEPT_LANGUAGE},
    Method, Url,
};

use crate::{config::Config, error::Result};

/// HTTP client with built-in rate limiting.
pub struct Client {
    inner: reqwest::Client,

    /// Rate limiter for API quota compliance.
    rate_limiter: DefaultDirectRateLimiter,
}

impl Client {
    /// Rolling window over which the API counts calls.
    const RATE_LIMIT_INTERVAL: Duration = Duration::from_secs(60);

    /// Maximum allowed API calls per interval.
    const RATE_LIMIT_CALLS_PER_INTERVAL: u8 = 10;

    /// Duration to keep idle connections alive.
    const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Duration to wait for the connection to be established.
    const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Duration to wait for individual network reads.
    ///
    /// Resolving a link may make the API query every platform it knows
    /// about, which can take several seconds for content it has not seen
    /// before.
    const READ_TIMEOUT: Duration = Duration::from_secs(30);

    /// Creates a new rate limited client.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be created.
    ///
    /// # Panics
    ///
    /// Panics if rate limit parameters are zero.
    pub fn new(config: &Config) -> Result<Self> {
        // Not having `Accept-Language` set is non-fatal.
        let mut headers = reqwest::header::HeaderMap::new();
        if let Ok(lang) = HeaderValue::from_str(&config.app_lang) {
            headers.insert(ACCEPT_LANGUAGE, lang);
        }

        let http_client = reqwest::Client::builder()
            .tcp_keepalive(Self::KEEPALIVE_TIMEOUT)
            .connect_timeout(Self::CONNECT_TIMEOUT)
            .read_timeout(Self::READ_TIMEOUT)
            .default_headers(headers)
            .user_agent(&config.user_agent);

        let replenish_interval =
            Self::RATE_LIMIT_INTERVAL / u32::from(Self::RATE_LIMIT_CALLS_PER_INTERVAL);
        let quota = Quota::with_period(replenish_interval)
            .expect("quota time interval is zero")
            .allow_burst(
                NonZeroU32::new(Self::RATE_LIMIT_CALLS_PER_INTERVAL.into())
                    .expect("calls per interval is zero"),
            );

        Ok(Self {
            inner: http_client.build()?,
            rate_limiter: governor::RateLimiter::direct(quota),
        })
    }

    /// Builds a GET request without a body.
    #[must_use]
    pub fn get(&self, url: Url) -> reqwest::Request {
        reqwest::Request::new(Method::GET, url)
    }

    /// Executes a request with rate limiting.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// * Request execution fails
    /// * Network error occurs
    pub fn execute(
        &self,
        request: reqwest::Request,
    ) -> impl Future<Output = Result<reqwest::Response>> + '_ {
        // No need to await with jitter because the level of concurrency is low.
        let throttle = self.rate_limiter.until_ready();
        throttle.then(|()| self.inner.execute(request).map_err(Into::into))
    }
}
