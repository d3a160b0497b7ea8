//! Signal collection
//!
//! Platform bindings read what their OS exposes and hand the values to a
//! [`StaticCollector`]; the collector guarantees the platform's full key set
//! is present, recording unavailable signals as `null`.

use crate::models::{Fingerprint, SignalValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use sysinfo::System;
use tracing::debug;

pub const PLATFORM_KEY: &str = "platform";
pub const USER_AGENT_KEY: &str = "userAgent";
pub const OS_VERSION_KEY: &str = "osVersion";
pub const DEVICE_MODEL_KEY: &str = "deviceModel";

const ANDROID_KEYS: &[&str] = &[
    "userAgent",
    "platform",
    "osVersion",
    "deviceModel",
    "deviceBrand",
    "deviceManufacturer",
    "screenWidth",
    "screenHeight",
    "screenDensity",
    "screenDensityDpi",
    "timezone",
    "timezoneOffset",
    "language",
];

const IOS_KEYS: &[&str] = &[
    "userAgent",
    "platform",
    "osVersion",
    "deviceModel",
    "deviceName",
    "screenWidth",
    "screenHeight",
    "screenScale",
    "timezone",
    "timezoneOffset",
    "language",
];

const WEB_KEYS: &[&str] = &[
    "userAgent",
    "language",
    "platform",
    "screenWidth",
    "screenHeight",
    "screenColorDepth",
    "pixelRatio",
    "timezone",
    "timezoneOffset",
    "canvasFingerprint",
    "webglFingerprint",
    "fonts",
    "cookieEnabled",
    "doNotTrack",
];

const DESKTOP_KEYS: &[&str] = &[
    "platform",
    "osVersion",
    "deviceModel",
    "kernelVersion",
    "hostName",
    "arch",
    "totalMemory",
    "screenWidth",
    "screenHeight",
    "timezone",
    "timezoneOffset",
    "language",
];

/// Gathers platform signals into a [`Fingerprint`].
///
/// Implementations only read ambient state and never fail: a signal that
/// cannot be read is present with a `null` value.
pub trait SignalCollector: Send + Sync {
    fn collect(&self) -> Fingerprint;
}

/// Platform a fingerprint was collected on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Android,
    Ios,
    Web,
    Desktop,
}

impl Platform {
    /// Value recorded under `platform` when the binding does not supply one.
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Android => "Android",
            Platform::Ios => "iOS",
            Platform::Web => "Web",
            Platform::Desktop => "Desktop",
        }
    }

    /// The fixed set of signal keys every fingerprint of this platform carries.
    pub fn signal_keys(&self) -> &'static [&'static str] {
        match self {
            Platform::Android => ANDROID_KEYS,
            Platform::Ios => IOS_KEYS,
            Platform::Web => WEB_KEYS,
            Platform::Desktop => DESKTOP_KEYS,
        }
    }

    fn is_mobile(&self) -> bool {
        matches!(self, Platform::Android | Platform::Ios)
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "android" => Ok(Platform::Android),
            "ios" => Ok(Platform::Ios),
            "web" => Ok(Platform::Web),
            "desktop" => Ok(Platform::Desktop),
            other => anyhow::bail!("unknown platform '{}'", other),
        }
    }
}

/// Collector over values supplied by a platform binding.
#[derive(Debug, Clone)]
pub struct StaticCollector {
    platform: Platform,
    signals: HashMap<String, SignalValue>,
}

impl StaticCollector {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            signals: HashMap::new(),
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn with_signal(mut self, key: impl Into<String>, value: impl Into<SignalValue>) -> Self {
        self.set_signal(key, value);
        self
    }

    /// Records `value` when present; `None` leaves the key to be filled as a gap.
    pub fn with_optional<V: Into<SignalValue>>(
        mut self,
        key: impl Into<String>,
        value: Option<V>,
    ) -> Self {
        if let Some(value) = value {
            self.set_signal(key, value);
        }
        self
    }

    pub fn set_signal(&mut self, key: impl Into<String>, value: impl Into<SignalValue>) {
        self.signals.insert(key.into(), value.into());
    }

    /// `"<Platform>/<osVersion> <deviceModel>"`, the mobile SDK user agent.
    fn synthesized_user_agent(&self) -> Option<String> {
        let os_version = self.signals.get(OS_VERSION_KEY)?.as_str()?;
        let model = self.signals.get(DEVICE_MODEL_KEY)?.as_str()?;
        Some(format!("{}/{} {}", self.platform.as_str(), os_version, model))
    }
}

impl SignalCollector for StaticCollector {
    fn collect(&self) -> Fingerprint {
        let mut fingerprint = Fingerprint::new();

        for key in self.platform.signal_keys() {
            let value = match self.signals.get(*key) {
                Some(value) => value.clone(),
                None if *key == PLATFORM_KEY => self.platform.as_str().into(),
                None if *key == USER_AGENT_KEY && self.platform.is_mobile() => self
                    .synthesized_user_agent()
                    .map(SignalValue::from)
                    .unwrap_or(SignalValue::Null),
                None => {
                    debug!(platform = %self.platform, signal = *key, "Signal unavailable, recording null");
                    SignalValue::Null
                }
            };
            fingerprint.set(*key, value);
        }

        // Probe results outside the platform key set are passed through opaquely
        for (key, value) in &self.signals {
            if !fingerprint.contains_key(key) {
                fingerprint.set(key.clone(), value.clone());
            }
        }

        fingerprint
    }
}

/// Collector for the machine the process runs on (CLI, desktop apps).
#[derive(Debug, Clone, Copy, Default)]
pub struct HostCollector;

impl HostCollector {
    pub fn new() -> Self {
        Self
    }
}

impl SignalCollector for HostCollector {
    fn collect(&self) -> Fingerprint {
        let mut sys = System::new();
        sys.refresh_memory();

        let offset_minutes = chrono::Local::now().offset().local_minus_utc() / 60;

        // Headless hosts have no screen geometry; those keys become gaps
        StaticCollector::new(Platform::Desktop)
            .with_signal(PLATFORM_KEY, std::env::consts::OS)
            .with_optional(OS_VERSION_KEY, System::long_os_version())
            .with_optional(DEVICE_MODEL_KEY, System::name())
            .with_optional("kernelVersion", System::kernel_version())
            .with_optional("hostName", System::host_name())
            .with_signal("arch", std::env::consts::ARCH)
            .with_signal("totalMemory", sys.total_memory())
            .with_signal("timezoneOffset", offset_minutes)
            .with_optional("timezone", std::env::var("TZ").ok().filter(|tz| !tz.is_empty()))
            .with_optional("language", language_from_env())
            .collect()
    }
}

/// ISO language code from the POSIX locale variables (`en_US.UTF-8` -> `en`).
fn language_from_env() -> Option<String> {
    ["LC_ALL", "LC_MESSAGES", "LANG"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|value| !value.is_empty())
        .and_then(|locale| parse_language(&locale))
}

fn parse_language(locale: &str) -> Option<String> {
    let lang = locale
        .split(|c: char| c == '_' || c == '.' || c == '@' || c == '-')
        .next()
        .unwrap_or_default();
    match lang {
        "" | "C" | "POSIX" => None,
        lang => Some(lang.to_ascii_lowercase()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::fingerprint_id;

    #[test]
    fn test_missing_signals_recorded_as_null() {
        let fp = StaticCollector::new(Platform::Android)
            .with_signal("osVersion", "13")
            .collect();

        assert_eq!(fp.len(), ANDROID_KEYS.len());
        for key in ANDROID_KEYS {
            assert!(fp.contains_key(key), "missing key {}", key);
        }
        assert!(fp.get("screenWidth").unwrap().is_null());
        assert!(fp.gaps().contains(&"deviceModel"));
    }

    #[test]
    fn test_key_set_is_fixed_per_platform() {
        let sparse = StaticCollector::new(Platform::Ios).collect();
        let full = StaticCollector::new(Platform::Ios)
            .with_signal("osVersion", "17.2")
            .with_signal("deviceModel", "iPhone")
            .with_signal("screenWidth", 1170)
            .collect();

        let mut sparse_keys: Vec<_> = sparse.iter().map(|(k, _)| k.clone()).collect();
        let mut full_keys: Vec<_> = full.iter().map(|(k, _)| k.clone()).collect();
        sparse_keys.sort();
        full_keys.sort();
        assert_eq!(sparse_keys, full_keys);
    }

    #[test]
    fn test_platform_and_user_agent_defaults() {
        let fp = StaticCollector::new(Platform::Android)
            .with_signal("osVersion", "13")
            .with_signal("deviceModel", "Pixel7")
            .collect();

        assert_eq!(fp.platform(), Some("Android"));
        assert_eq!(fp.get("userAgent").unwrap(), "Android/13 Pixel7");
    }

    #[test]
    fn test_web_platform_value_is_kept() {
        let fp = StaticCollector::new(Platform::Web)
            .with_signal("platform", "MacIntel")
            .collect();
        assert_eq!(fp.platform(), Some("MacIntel"));
        assert!(fp.get("userAgent").unwrap().is_null());
    }

    #[test]
    fn test_extra_probe_signals_pass_through() {
        let fp = StaticCollector::new(Platform::Web)
            .with_signal("audioFingerprint", "a1b2")
            .collect();
        assert_eq!(fp.len(), WEB_KEYS.len() + 1);
        assert_eq!(fp.get("audioFingerprint").unwrap(), "a1b2");
    }

    #[test]
    fn test_collect_is_reproducible() {
        let collector = StaticCollector::new(Platform::Android)
            .with_signal("osVersion", "13")
            .with_signal("deviceModel", "Pixel7")
            .with_signal("screenDensity", 2.625);
        assert_eq!(
            fingerprint_id(&collector.collect()),
            fingerprint_id(&collector.collect())
        );
    }

    #[test]
    fn test_host_collector_has_desktop_key_set() {
        let fp = HostCollector::new().collect();
        for key in DESKTOP_KEYS {
            assert!(fp.contains_key(key), "missing key {}", key);
        }
        assert_eq!(fp.platform(), Some(std::env::consts::OS));
    }

    #[test]
    fn test_parse_language() {
        assert_eq!(parse_language("en_US.UTF-8").as_deref(), Some("en"));
        assert_eq!(parse_language("zh-CN").as_deref(), Some("zh"));
        assert_eq!(parse_language("C.UTF-8"), None);
        assert_eq!(parse_language("POSIX"), None);
    }

    #[test]
    fn test_platform_from_str() {
        assert_eq!("iOS".parse::<Platform>().unwrap(), Platform::Ios);
        assert_eq!("ANDROID".parse::<Platform>().unwrap(), Platform::Android);
        assert!("symbian".parse::<Platform>().is_err());
    }
}
