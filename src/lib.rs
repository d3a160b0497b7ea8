//! Deferred deep-link attribution
//!
//! Carries invitation/channel parameters from a landing page to a freshly
//! installed app. The app collects a device fingerprint, derives a stable
//! identifier from it, and asks the attribution backend whether that device
//! recently clicked a link. Parameters arriving later through live deep links
//! are delivered through the same [`notifier::Notifier`].

pub mod attribution;
pub mod config;
pub mod context;
pub mod deeplink;
pub mod fingerprint;
pub mod models;
pub mod notifier;
pub mod reconciler;
pub mod store;

pub use attribution::{AttributionBackend, AttributionError, HttpAttributionClient};
pub use config::AttributionConfig;
pub use context::AttributionContext;
pub use deeplink::{DeepLinkEvent, LinkBuilder};
pub use fingerprint::{fingerprint_id, HostCollector, Platform, SignalCollector, StaticCollector};
pub use models::{
    AttributionResult, EventKind, Fingerprint, FingerprintId, InstallParams, ReconciledParams,
};
pub use notifier::{Notifier, ParamsListener};
pub use reconciler::{DeferredState, Reconciler};
