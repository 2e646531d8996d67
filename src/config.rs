//! Runtime configuration.
//!
//! [`Config`] carries everything the resolution flow needs to know about its
//! environment: the application identity used for the `User-Agent`, the
//! resolution endpoint and the timings of the redirect screen.

use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub app_name: String,
    pub app_version: String,
    pub app_lang: String,

    pub user_agent: String,

    /// Endpoint of the Odesli links API.
    pub api_url: Url,

    /// ISO 3166-1 alpha-2 country code to resolve links for.
    ///
    /// When unset, the API guesses the country from the request origin.
    pub user_country: Option<String>,

    /// Time to let the external app switch complete before returning to the
    /// main screen.
    pub open_delay: Duration,

    /// Number of countdown ticks shown on the error screen.
    pub countdown_ticks: u8,

    /// Interval between countdown ticks.
    pub countdown_interval: Duration,
}

impl Config {
    /// The public Odesli links endpoint.
    pub const DEFAULT_API_URL: &'static str = "https://api.song.link/v1-alpha.1/links";

    const DEFAULT_OPEN_DELAY: Duration = Duration::from_millis(1500);
    const DEFAULT_COUNTDOWN_TICKS: u8 = 5;
    const DEFAULT_COUNTDOWN_INTERVAL: Duration = Duration::from_secs(1);

    /// Creates a configuration with the default endpoint and timings.
    ///
    /// # Errors
    ///
    /// Will return `Err` if no valid `User-Agent` can be built from the
    /// package metadata or the operating system name and version.
    pub fn new() -> Result<Self> {
        let app_name = env!("CARGO_PKG_NAME").to_owned();
        let app_version = env!("CARGO_PKG_VERSION").to_owned();
        let app_lang = "en".to_owned();

        // Additional `User-Agent` string checks on top of `reqwest::HeaderValue`.
        let illegal_chars = |chr| chr == '/' || chr == ';';
        if app_name.is_empty()
            || app_name.contains(illegal_chars)
            || app_version.is_empty()
            || app_version.contains(illegal_chars)
            || app_lang.chars().count() != 2
            || app_lang.contains(illegal_chars)
        {
            return Err(Error::internal(format!(
                "application name, version and/or language invalid (\"{app_name}\"; \"{app_version}\"; \"{app_lang}\")"
            )));
        }

        let os_name = match std::env::consts::OS {
            "macos" => "osx",
            other => other,
        };
        let os_version = sysinfo::System::os_version().unwrap_or_else(|| String::from("0"));
        if os_name.is_empty()
            || os_name.contains(illegal_chars)
            || os_version.is_empty()
            || os_version.contains(illegal_chars)
        {
            return Err(Error::internal(format!(
                "os name and/or version invalid (\"{os_name}\"; \"{os_version}\")"
            )));
        }

        let user_agent =
            format!("{app_name}/{app_version} (Rust; {os_name}/{os_version}; Desktop; {app_lang})");
        trace!("user agent: {user_agent}");

        Ok(Self {
            app_name,
            app_version,
            app_lang,

            user_agent,

            api_url: Url::parse(Self::DEFAULT_API_URL)?,
            user_country: None,

            open_delay: Self::DEFAULT_OPEN_DELAY,
            countdown_ticks: Self::DEFAULT_COUNTDOWN_TICKS,
            countdown_interval: Self::DEFAULT_COUNTDOWN_INTERVAL,
        })
    }

    /// Points the resolver at a different endpoint.
    ///
    /// # Errors
    ///
    /// Will return `Err` if `api_url` is not an absolute URL.
    pub fn with_api_url(mut self, api_url: &str) -> Result<Self> {
        self.api_url = Url::parse(api_url)?;
        Ok(self)
    }

    /// Sets the country links are resolved for.
    ///
    /// # Errors
    ///
    /// Will return `Err` if `country` is not a two-letter code.
    pub fn with_user_country(mut self, country: &str) -> Result<Self> {
        if country.len() != 2 || !country.chars().all(|chr| chr.is_ascii_alphabetic()) {
            return Err(Error::invalid_argument(format!(
                "country should be a two-letter code but is \"{country}\""
            )));
        }

        self.user_country = Some(country.to_ascii_uppercase());
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::new().unwrap();
        assert_eq!(config.api_url.as_str(), Config::DEFAULT_API_URL);
        assert_eq!(config.countdown_ticks, 5);
        assert_eq!(config.countdown_interval, Duration::from_secs(1));
        assert!(config.user_agent.starts_with("music-link-handler/"));
    }

    #[test]
    fn country_is_validated() {
        let config = Config::new().unwrap().with_user_country("nl").unwrap();
        assert_eq!(config.user_country.as_deref(), Some("NL"));

        assert!(Config::new().unwrap().with_user_country("NLD").is_err());
        assert!(Config::new().unwrap().with_user_country("1a").is_err());
    }

    #[test]
    fn api_url_must_be_absolute() {
        assert!(Config::new().unwrap().with_api_url("/links").is_err());
    }
}
