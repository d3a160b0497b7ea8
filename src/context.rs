//! Explicit attribution context
//!
//! Owns the validated configuration and the shared HTTP client. Everything
//! that needs the backend receives it from here rather than from a global.

use crate::attribution::{AttributionBackend, HttpAttributionClient};
use crate::config::AttributionConfig;
use crate::fingerprint::SignalCollector;
use crate::notifier::Notifier;
use crate::reconciler::Reconciler;
use anyhow::Result;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct AttributionContext {
    config: AttributionConfig,
    client: Arc<HttpAttributionClient>,
}

impl AttributionContext {
    pub fn new(config: AttributionConfig) -> Result<Self> {
        config.validate()?;
        let client = Arc::new(HttpAttributionClient::new(&config)?);
        info!(
            base_url = %client.base_url(),
            timeout_ms = config.request_timeout.as_millis() as u64,
            "Attribution context ready"
        );
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &AttributionConfig {
        &self.config
    }

    pub fn client(&self) -> &Arc<HttpAttributionClient> {
        &self.client
    }

    /// Reconciler backed by this context's client.
    pub fn reconciler(
        &self,
        collector: Arc<dyn SignalCollector>,
        notifier: Arc<Notifier>,
    ) -> Reconciler {
        let backend: Arc<dyn AttributionBackend> = self.client.clone();
        Reconciler::new(backend, collector, notifier).with_save_on_match(self.config.save_on_match)
    }
}
