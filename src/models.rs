//! Attribution data model
//!
//! Fingerprints, install parameters and the reconciled events handed to the
//! host application.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A single signal value: string, number, bool, null or nested object.
pub type SignalValue = serde_json::Value;

/// Query/param key carrying an invite code.
pub const INVITE_CODE: &str = "inviteCode";
/// Query/param key carrying the marketing channel.
pub const CHANNEL_ID: &str = "channelId";
/// Query/param key carrying the inviting user.
pub const USER_ID: &str = "userId";
/// Free-form payload.
pub const CUSTOM: &str = "custom";

/// Parameter keys the core knows by name. Any other key is passed through.
pub const RECOGNIZED_KEYS: [&str; 4] = [INVITE_CODE, CHANNEL_ID, USER_ID, CUSTOM];

/// Unordered device/environment signals keyed by signal name.
///
/// Key order carries no meaning; see [`crate::fingerprint::canonicalize`]
/// for the order-independent serialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint {
    signals: HashMap<String, SignalValue>,
}

impl Fingerprint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<SignalValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<SignalValue>) {
        self.signals.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&SignalValue> {
        self.signals.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.signals.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &SignalValue)> {
        self.signals.iter()
    }

    /// Keys whose value is `null` (signals the collector could not read).
    pub fn gaps(&self) -> Vec<&str> {
        let mut gaps: Vec<&str> = self
            .signals
            .iter()
            .filter(|(_, v)| v.is_null())
            .map(|(k, _)| k.as_str())
            .collect();
        gaps.sort_unstable();
        gaps
    }

    /// The `platform` signal, if it is a string.
    pub fn platform(&self) -> Option<&str> {
        self.signals.get("platform").and_then(|v| v.as_str())
    }
}

impl<K, V> FromIterator<(K, V)> for Fingerprint
where
    K: Into<String>,
    V: Into<SignalValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            signals: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Stable identifier derived from a canonicalized [`Fingerprint`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FingerprintId(String);

impl FingerprintId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FingerprintId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Attribution parameters (`inviteCode`, `channelId`, `userId`, `custom`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstallParams {
    values: HashMap<String, String>,
}

impl InstallParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn invite_code(&self) -> Option<&str> {
        self.get(INVITE_CODE)
    }

    pub fn channel_id(&self) -> Option<&str> {
        self.get(CHANNEL_ID)
    }

    pub fn user_id(&self) -> Option<&str> {
        self.get(USER_ID)
    }

    pub fn custom(&self) -> Option<&str> {
        self.get(CUSTOM)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.values.iter()
    }

    /// Entries sorted by key, for stable output.
    pub fn sorted(&self) -> Vec<(&str, &str)> {
        let mut entries: Vec<(&str, &str)> = self
            .values
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        entries.sort_unstable();
        entries
    }
}

impl From<HashMap<String, String>> for InstallParams {
    fn from(values: HashMap<String, String>) -> Self {
        Self { values }
    }
}

impl<K, V> FromIterator<(K, V)> for InstallParams
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Outcome of the deferred match, produced once per install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributionResult {
    Matched(InstallParams),
    NotMatched,
}

impl AttributionResult {
    pub fn is_matched(&self) -> bool {
        matches!(self, AttributionResult::Matched(_))
    }

    pub fn params(&self) -> Option<&InstallParams> {
        match self {
            AttributionResult::Matched(params) => Some(params),
            AttributionResult::NotMatched => None,
        }
    }
}

/// Event-type discriminator carried by every delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// Deferred match resolved with parameters.
    ParamsReceived,
    /// Live deep link opened the app.
    DeepLinkReceived,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ParamsReceived => "PARAMS_RECEIVED",
            EventKind::DeepLinkReceived => "DEEP_LINK_RECEIVED",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters the core has decided to deliver for one triggering event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciledParams {
    /// Unique per triggering event.
    pub event_id: Uuid,
    pub kind: EventKind,
    pub params: InstallParams,
    /// The deep link URL, for `DEEP_LINK_RECEIVED` events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ReconciledParams {
    pub fn deferred(params: InstallParams) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            kind: EventKind::ParamsReceived,
            params,
            source_url: None,
            created_at: Utc::now(),
        }
    }

    pub fn deep_link(params: InstallParams, url: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            kind: EventKind::DeepLinkReceived,
            params,
            source_url: Some(url.into()),
            created_at: Utc::now(),
        }
    }
}
