//! Resolution of Odesli links to platform links.
//!
//! The Odesli API answers a universal link with the matching link on every
//! platform it knows about:
//!
//! ```json
//! {
//!     "entityUniqueId": "SPOTIFY_SONG::0Jcij1eWd5bDMU5iPbxe2i",
//!     "pageUrl": "https://song.link/s/0Jcij1eWd5bDMU5iPbxe2i",
//!     "linksByPlatform": {
//!         "spotify": { "url": "https://open.spotify.com/track/0Jcij1eWd5bDMU5iPbxe2i" },
//!         "appleMusic": { "url": "https://geo.music.apple.com/us/album/_/1443109064?i=1443109359" }
//!     }
//! }
//! ```
//!
//! # Matching
//!
//! A platform is matched against `linksByPlatform` in two tiers:
//!
//! 1. Its [aliases](crate::platform::PlatformDescriptor::aliases), in order.
//!    The first one present wins, so a native app link is preferred over a
//!    web link when both are available.
//! 2. Failing that, the first key in response order whose lowercase form
//!    contains the platform key. The API's key naming drifts over time and
//!    this keeps such drift from breaking redirects.
//!
//! # Loop suppression
//!
//! The last successful resolution is remembered. Resolving the exact same
//! link again returns the remembered destination without an API call.

use std::sync::Arc;

use reqwest::{
    header::{HeaderValue, ACCEPT},
    StatusCode,
};
use serde::Deserialize;
use serde_with::serde_as;
use thiserror::Error;
use url::Url;

use crate::{
    breadcrumbs::Breadcrumbs,
    config::Config,
    http::Client as HttpClient,
    link::CandidateLink,
    platform,
    storage::{Key, Storage},
};

#[derive(Error, Debug)]
pub enum Error {
    #[error("link API returned {status}")]
    Status { status: StatusCode },

    #[error("link API request failed: {0}")]
    Transport(#[source] crate::error::Error),

    #[error("no {platform} link for this content")]
    NotFound { platform: String },
}

impl Error {
    /// Whether this is a failure to talk to the API, as opposed to the API
    /// not knowing the content on the requested platform.
    #[must_use]
    pub fn is_api_error(&self) -> bool {
        matches!(self, Self::Status { .. } | Self::Transport(_))
    }
}

impl From<crate::error::Error> for Error {
    fn from(e: crate::error::Error) -> Self {
        Self::Transport(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Response of the Odesli links endpoint.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    #[serde(default)]
    pub entity_unique_id: Option<String>,

    #[serde(default)]
    pub page_url: Option<String>,

    /// Links keyed by platform alias, in response order.
    #[serde_as(as = "serde_with::Map<_, _>")]
    pub links_by_platform: Vec<(String, PlatformLink)>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformLink {
    pub url: String,

    #[serde(default)]
    pub entity_unique_id: Option<String>,

    #[serde(default)]
    pub native_app_uri_mobile: Option<String>,

    #[serde(default)]
    pub native_app_uri_desktop: Option<String>,
}

impl Response {
    fn link(&self, alias: &str) -> Option<&PlatformLink> {
        self.links_by_platform
            .iter()
            .find(|(key, _)| key == alias)
            .map(|(_, link)| link)
    }

    /// Finds the link for the platform with `platform_key`.
    ///
    /// Unknown platform keys have no aliases and only go through the
    /// substring fallback.
    #[must_use]
    pub fn url_for(&self, platform_key: &str) -> Option<&str> {
        let aliases = platform::lookup(platform_key).map_or(&[][..], |platform| platform.aliases);
        if let Some(link) = aliases.iter().find_map(|alias| self.link(alias)) {
            return Some(&link.url);
        }

        let needle = platform_key.to_lowercase();
        self.links_by_platform
            .iter()
            .find(|(key, _)| key.to_lowercase().contains(&needle))
            .map(|(key, link)| {
                debug!("matched {platform_key} by fallback on {key}");
                link.url.as_str()
            })
    }
}

pub struct Resolver {
    http_client: HttpClient,
    api_url: Url,
    user_country: Option<String>,
    storage: Arc<dyn Storage>,
    breadcrumbs: Breadcrumbs,
}

impl Resolver {
    /// Creates a resolver querying the endpoint in `config`.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the HTTP client cannot be created.
    pub fn new(config: &Config, storage: Arc<dyn Storage>) -> crate::error::Result<Self> {
        Ok(Self {
            http_client: HttpClient::new(config)?,
            api_url: config.api_url.clone(),
            user_country: config.user_country.clone(),
            breadcrumbs: Breadcrumbs::new(Arc::clone(&storage)),
            storage,
        })
    }

    /// Resolves `candidate` to its link on the platform with `platform_key`.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the API cannot be reached, does not answer with
    /// success, answers with something else than a links response, or has no
    /// link for the platform.
    pub async fn resolve(&self, candidate: &CandidateLink, platform_key: &str) -> Result<String> {
        if let Some(destination) = self.cached(candidate).await {
            debug!("{candidate} was just resolved to {destination}");
            return Ok(destination);
        }

        let result = self.fetch(candidate).await.and_then(|response| {
            response
                .url_for(platform_key)
                .map(ToOwned::to_owned)
                .ok_or_else(|| Error::NotFound {
                    platform: platform::lookup(platform_key)
                        .map_or_else(|| platform_key.to_owned(), |p| p.name.to_owned()),
                })
        });

        match result {
            Ok(destination) => {
                info!("resolved {candidate} to {destination}");
                self.remember(candidate, &destination).await;
                Ok(destination)
            }
            Err(e) => {
                error!("could not resolve {candidate}: {e}");
                self.breadcrumbs
                    .record(Key::LastApiError, &e.to_string())
                    .await;
                Err(e)
            }
        }
    }

    async fn fetch(&self, candidate: &CandidateLink) -> Result<Response> {
        let mut url = self.api_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("url", candidate.decoded());
            if let Some(ref country) = self.user_country {
                query.append_pair("userCountry", country);
            }
        }

        let mut request = self.http_client.get(url);
        request
            .headers_mut()
            .insert(ACCEPT, HeaderValue::from_static("application/json"));

        let response = self.http_client.execute(request).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status { status });
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::Transport(e.into()))?;
        trace!("links: {body}");
        self.breadcrumbs.record(Key::LastApiResponse, &body).await;

        serde_json::from_str(&body).map_err(|e| Error::Transport(e.into()))
    }

    /// Returns the remembered destination if `candidate` is the link that
    /// was resolved last.
    pub async fn cached(&self, candidate: &CandidateLink) -> Option<String> {
        let source = self.read(Key::LastResolutionSource).await?;
        if source != candidate.decoded() {
            return None;
        }

        self.read(Key::LastRedirectDestination).await
    }

    /// Forgets the last resolution unless it was for `candidate`.
    pub async fn forget_other_than(&self, candidate: &CandidateLink) {
        match self.read(Key::LastResolutionSource).await {
            Some(source) if source != candidate.decoded() => {
                debug!("forgetting resolution of {source}");
                self.forget().await;
            }
            _ => {}
        }
    }

    /// Forgets the last resolution.
    pub async fn forget(&self) {
        let keys = [Key::LastResolutionSource, Key::LastRedirectDestination];
        if let Err(e) = self.storage.multi_remove(&keys).await {
            warn!("could not forget last resolution: {e}");
        }
    }

    async fn remember(&self, candidate: &CandidateLink, destination: &str) {
        for (key, value) in [
            (Key::LastRedirectDestination, destination),
            (Key::LastResolutionSource, candidate.decoded()),
        ] {
            if let Err(e) = self.storage.set(key, value).await {
                warn!("could not remember {key}: {e}");
            }
        }
    }

    async fn read(&self, key: Key) -> Option<String> {
        self.storage.get(key).await.unwrap_or_else(|e| {
            warn!("could not read {key}: {e}");
            None
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use mockito::{Matcher, Server, ServerGuard};

    use super::*;
    use crate::storage::MemoryStorage;

    pub(crate) const CANDIDATE: &str = "https://song.link/s/abc123";

    pub(crate) fn resolver(server: &ServerGuard, storage: Arc<dyn Storage>) -> Resolver {
        let config = Config::new()
            .unwrap()
            .with_api_url(&format!("{}/v1-alpha.1/links", server.url()))
            .unwrap();
        Resolver::new(&config, storage).unwrap()
    }

    /// Mocks the links endpoint for [`CANDIDATE`]. Still needs to be created.
    pub(crate) fn mock_links(server: &mut ServerGuard, body: &str) -> mockito::Mock {
        server
            .mock("GET", "/v1-alpha.1/links")
            .match_query(Matcher::UrlEncoded("url".into(), CANDIDATE.into()))
            .match_header("accept", "application/json")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
    }

    fn response(json: &str) -> Response {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn primary_alias_wins() {
        let response = response(
            r#"{"linksByPlatform": {"spotifyWeb": {"url": "B"}, "spotify": {"url": "A"}}}"#,
        );
        assert_eq!(response.url_for("spotify"), Some("A"));
    }

    #[test]
    fn secondary_alias_when_primary_is_missing() {
        let response = response(
            r#"{"linksByPlatform": {"appleMusicWeb": {"url": "https://music.apple.com/xyz"}}}"#,
        );
        assert_eq!(
            response.url_for("apple_music"),
            Some("https://music.apple.com/xyz")
        );
    }

    #[test]
    fn falls_back_to_case_insensitive_substring() {
        let response = response(r#"{"linksByPlatform": {"Spotify_App": {"url": "C"}}}"#);
        assert_eq!(response.url_for("spotify"), Some("C"));
    }

    #[test]
    fn fallback_takes_first_key_in_response_order() {
        let response = response(
            r#"{"linksByPlatform": {"newDeezerApp": {"url": "D1"}, "deezerLegacy": {"url": "D2"}}}"#,
        );
        assert_eq!(response.url_for("deezer"), Some("D1"));
    }

    #[test]
    fn no_match() {
        let response = response(r#"{"linksByPlatform": {"tidal": {"url": "T"}}}"#);
        assert_eq!(response.url_for("spotify"), None);
        assert_eq!(response.url_for("napster"), None);
    }

    #[tokio::test]
    async fn resolves_and_records() {
        let mut server = Server::new_async().await;
        let body = r#"{"linksByPlatform": {"spotify": {"url": "https://open.spotify.com/track/1"}}}"#;
        let mock = mock_links(&mut server, body).create_async().await;

        let storage = Arc::new(MemoryStorage::new());
        let resolver = resolver(&server, storage.clone());
        let candidate = CandidateLink::new(CANDIDATE);

        let destination = resolver.resolve(&candidate, "spotify").await.unwrap();
        assert_eq!(destination, "https://open.spotify.com/track/1");
        mock.assert_async().await;

        assert_eq!(
            storage.get(Key::LastApiResponse).await.unwrap().as_deref(),
            Some(body)
        );
        assert_eq!(
            storage.get(Key::LastResolutionSource).await.unwrap().as_deref(),
            Some(CANDIDATE)
        );
        assert_eq!(
            storage.get(Key::LastRedirectDestination).await.unwrap().as_deref(),
            Some("https://open.spotify.com/track/1")
        );
    }

    #[tokio::test]
    async fn second_resolution_is_served_from_cache() {
        let mut server = Server::new_async().await;
        let mock = mock_links(
            &mut server,
            r#"{"linksByPlatform": {"spotify": {"url": "A"}}}"#,
        )
        .expect(1)
        .create_async()
        .await;

        let resolver = resolver(&server, Arc::new(MemoryStorage::new()));
        let candidate = CandidateLink::new(CANDIDATE);

        assert_eq!(resolver.resolve(&candidate, "spotify").await.unwrap(), "A");
        assert_eq!(resolver.resolve(&candidate, "spotify").await.unwrap(), "A");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn not_found_is_distinct_from_api_errors() {
        let mut server = Server::new_async().await;
        let _mock = mock_links(
            &mut server,
            r#"{"linksByPlatform": {"tidal": {"url": "T"}}}"#,
        )
        .create_async()
        .await;

        let storage = Arc::new(MemoryStorage::new());
        let resolver = resolver(&server, storage.clone());

        let err = resolver
            .resolve(&CandidateLink::new(CANDIDATE), "spotify")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { ref platform } if platform == "Spotify"));
        assert!(!err.is_api_error());
        assert_eq!(
            storage.get(Key::LastApiError).await.unwrap().as_deref(),
            Some("no Spotify link for this content")
        );
        assert_eq!(storage.get(Key::LastResolutionSource).await.unwrap(), None);
    }

    #[tokio::test]
    async fn non_success_status_is_an_api_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/v1-alpha.1/links")
            .match_query(Matcher::Any)
            .with_status(429)
            .create_async()
            .await;

        let storage = Arc::new(MemoryStorage::new());
        let resolver = resolver(&server, storage.clone());

        let err = resolver
            .resolve(&CandidateLink::new(CANDIDATE), "spotify")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Status { status } if status == StatusCode::TOO_MANY_REQUESTS
        ));
        assert!(err.is_api_error());
        assert!(storage.get(Key::LastApiError).await.unwrap().is_some());
        assert_eq!(storage.get(Key::LastApiResponse).await.unwrap(), None);
    }

    #[tokio::test]
    async fn malformed_body_is_an_api_error() {
        let mut server = Server::new_async().await;
        let _mock = mock_links(&mut server, "<html>maintenance</html>")
            .create_async()
            .await;

        let storage = Arc::new(MemoryStorage::new());
        let resolver = resolver(&server, storage.clone());

        let err = resolver
            .resolve(&CandidateLink::new(CANDIDATE), "spotify")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));

        // The raw body is kept for diagnosis even though it did not parse.
        assert_eq!(
            storage.get(Key::LastApiResponse).await.unwrap().as_deref(),
            Some("<html>maintenance</html>")
        );
    }

    #[tokio::test]
    async fn unreachable_api_is_an_api_error() {
        let config = Config::new()
            .unwrap()
            .with_api_url("http://127.0.0.1:9/links")
            .unwrap();
        let resolver = Resolver::new(&config, Arc::new(MemoryStorage::new())).unwrap();

        let err = resolver
            .resolve(&CandidateLink::new(CANDIDATE), "spotify")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test]
    async fn passes_user_country() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/v1-alpha.1/links")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("url".into(), CANDIDATE.into()),
                Matcher::UrlEncoded("userCountry".into(), "NL".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"linksByPlatform": {"deezer": {"url": "D"}}}"#)
            .create_async()
            .await;

        let config = Config::new()
            .unwrap()
            .with_api_url(&format!("{}/v1-alpha.1/links", server.url()))
            .unwrap()
            .with_user_country("nl")
            .unwrap();
        let resolver = Resolver::new(&config, Arc::new(MemoryStorage::new())).unwrap();

        let destination = resolver
            .resolve(&CandidateLink::new(CANDIDATE), "deezer")
            .await
            .unwrap();
        assert_eq!(destination, "D");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn forgets_only_other_candidates() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .set(Key::LastResolutionSource, CANDIDATE)
            .await
            .unwrap();
        storage
            .set(Key::LastRedirectDestination, "A")
            .await
            .unwrap();

        let server = Server::new_async().await;
        let resolver = resolver(&server, storage.clone());

        resolver
            .forget_other_than(&CandidateLink::new(CANDIDATE))
            .await;
        assert_eq!(
            resolver.cached(&CandidateLink::new(CANDIDATE)).await.as_deref(),
            Some("A")
        );

        resolver
            .forget_other_than(&CandidateLink::new("https://album.link/i/1"))
            .await;
        assert_eq!(resolver.cached(&CandidateLink::new(CANDIDATE)).await, None);
        assert_eq!(storage.get(Key::LastRedirectDestination).await.unwrap(), None);
    }
}
