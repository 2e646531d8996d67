//! Recognition of Odesli universal links.
//!
//! Odesli publishes its universal links under a handful of aggregator
//! domains. A URL is recognized when its host contains one of them anywhere,
//! so subdomains and regional variants (`www.song.link`, `eu.album.link`)
//! are recognized too.

use std::{borrow::Cow, fmt};

use percent_encoding::percent_decode_str;
use url::Url;

/// Domains Odesli serves universal links from.
pub const ODESLI_DOMAINS: [&str; 8] = [
    "song.link",
    "album.link",
    "artist.link",
    "playlist.link",
    "music.link",
    "pods.link",
    "mylink.page",
    "odesli.co",
];

/// Returns whether `url` is an Odesli universal link.
///
/// Strings that do not parse as URLs, or parse without a host, are not
/// recognized.
#[must_use]
pub fn is_recognized(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        debug!("not a url: {url}");
        return false;
    };

    let recognized = parsed
        .host_str()
        .is_some_and(|host| ODESLI_DOMAINS.iter().any(|domain| host.contains(domain)));
    debug!("{url} recognized: {recognized}");

    recognized
}

/// A link received from the operating system.
///
/// Deep links may arrive percent-encoded when they are passed through as a
/// query parameter. The decoded form is what gets resolved, and is what
/// identifies the candidate for deduplication.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CandidateLink {
    raw: String,
    decoded: String,
}

impl CandidateLink {
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();

        // Fall back to the raw form when decoding yields invalid UTF-8.
        let decoded = match percent_decode_str(&raw).decode_utf8() {
            Ok(Cow::Borrowed(_)) | Err(_) => raw.clone(),
            Ok(Cow::Owned(decoded)) => decoded,
        };

        Self { raw, decoded }
    }

    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn decoded(&self) -> &str {
        &self.decoded
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.decoded.trim().is_empty()
    }

    #[must_use]
    pub fn is_recognized(&self) -> bool {
        is_recognized(&self.decoded)
    }
}

impl fmt::Display for CandidateLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.decoded)
    }
}
