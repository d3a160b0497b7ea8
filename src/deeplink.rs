//! Deep-link parsing and wake-up link construction
//!
//! Incoming links (`app://open?inviteCode=XYZ&channelId=9`, universal links)
//! are decoded into [`InstallParams`]. Malformed URLs are decoded leniently:
//! whatever follows the first `?` is still read as a query string, so a
//! partially broken link keeps every parameter that can be decoded.
//!
//! [`LinkBuilder`] produces the links a landing page uses to wake the app.

use crate::models::{InstallParams, RECOGNIZED_KEYS};
use reqwest::Url;
use std::collections::HashSet;
use std::time::Duration;
use tracing::debug;

/// Base used to decode query strings of links that do not parse as URLs.
const FALLBACK_BASE: &str = "deeplink://fallback/";

/// Delay before a landing page falls back from the scheme URL to the
/// universal link.
pub const UNIVERSAL_LINK_DELAY: Duration = Duration::from_millis(500);

/// A live deep link and its decoded query parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeepLinkEvent {
    pub url: String,
    pub params: InstallParams,
}

impl DeepLinkEvent {
    pub fn parse(url: impl Into<String>) -> Self {
        let url = url.into();
        let params = decode_query(&url);
        Self { url, params }
    }

    pub fn has_params(&self) -> bool {
        !self.params.is_empty()
    }
}

/// Decode the query parameters of `raw`.
///
/// The first occurrence of a repeated key wins; pairs with an empty key are
/// skipped. Unrecognized keys are kept as-is.
pub fn decode_query(raw: &str) -> InstallParams {
    match Url::parse(raw) {
        Ok(url) => collect_pairs(&url),
        Err(e) => {
            debug!(url = raw, error = %e, "Malformed deep link, decoding query leniently");
            decode_lenient(raw)
        }
    }
}

fn decode_lenient(raw: &str) -> InstallParams {
    let query = match raw.split_once('?') {
        Some((_, query)) => query,
        None => return InstallParams::new(),
    };
    let query = query.split_once('#').map(|(q, _)| q).unwrap_or(query);

    match Url::parse(FALLBACK_BASE) {
        Ok(mut base) => {
            base.set_query(Some(query));
            collect_pairs(&base)
        }
        Err(_) => InstallParams::new(),
    }
}

fn collect_pairs(url: &Url) -> InstallParams {
    let mut seen = HashSet::new();
    url.query_pairs()
        .filter(|(key, _)| !key.is_empty())
        .filter(|(key, _)| seen.insert(key.to_string()))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect()
}

/// Recognized parameters of a landing-page URL, each defaulting to `""`.
///
/// This is the shape a landing page records with the backend, so the
/// deferred match later returns all four keys.
pub fn landing_params(url: &str) -> InstallParams {
    let decoded = decode_query(url);
    RECOGNIZED_KEYS
        .iter()
        .map(|key| (*key, decoded.get(key).unwrap_or_default().to_string()))
        .collect()
}

/// Builds the URLs a landing page opens to hand parameters to the app.
#[derive(Debug, Clone, Default)]
pub struct LinkBuilder {
    /// e.g. `myapp://`
    pub app_scheme: Option<String>,
    /// e.g. `https://link.example.com`
    pub universal_link: Option<String>,
}

impl LinkBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_app_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.app_scheme = Some(scheme.into());
        self
    }

    pub fn with_universal_link(mut self, link: impl Into<String>) -> Self {
        self.universal_link = Some(link.into());
        self
    }

    /// `{app_scheme}open?{query}`
    pub fn scheme_url(&self, params: &InstallParams) -> Option<String> {
        let scheme = self.app_scheme.as_deref()?;
        Some(format!("{}open?{}", scheme, encode_query(params)))
    }

    /// `{universal_link}/open?{query}`
    pub fn universal_url(&self, params: &InstallParams) -> Option<String> {
        let link = self.universal_link.as_deref()?.trim_end_matches('/');
        Some(format!("{}/open?{}", link, encode_query(params)))
    }

    /// Links in the order a landing page tries them. The universal link is
    /// opened [`UNIVERSAL_LINK_DELAY`] after the scheme URL.
    pub fn wakeup_urls(&self, params: &InstallParams) -> Vec<String> {
        self.scheme_url(params)
            .into_iter()
            .chain(self.universal_url(params))
            .collect()
    }
}

/// `application/x-www-form-urlencoded` query: recognized keys first in
/// their fixed order, then the rest sorted by key.
pub fn encode_query(params: &InstallParams) -> String {
    let mut entries: Vec<(&str, &str)> = RECOGNIZED_KEYS
        .iter()
        .filter_map(|key| params.get(key).map(|value| (*key, value)))
        .collect();
    entries.extend(
        params
            .sorted()
            .into_iter()
            .filter(|(key, _)| !RECOGNIZED_KEYS.contains(key)),
    );

    let mut url = match Url::parse(FALLBACK_BASE) {
        Ok(url) => url,
        Err(_) => return String::new(),
    };
    url.query_pairs_mut().extend_pairs(entries);
    url.query().unwrap_or_default().to_string()
}
