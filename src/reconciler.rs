//! Reconciliation of deferred matches and live deep links
//!
//! Two independent channels feed the [`Notifier`]:
//!
//! ```text
//! deferred:  Idle -> AwaitingDeferredResult -> DeferredMatched   (delivers once)
//!                                           -> DeferredUnmatched (delivers nothing)
//! deep link: DeepLinkPending -> DeepLinkDelivered                (once per event)
//! ```
//!
//! The deferred channel is single-shot per process: the first resolve runs
//! collect -> canonicalize -> fetch -> deliver, concurrent resolves await the
//! same in-flight attempt, and later ones get the cached result. The deep-link
//! channel never terminates and does not look at the deferred state.
//! Overlapping keys across channels are not merged; that is host policy.

use crate::attribution::AttributionBackend;
use crate::deeplink::DeepLinkEvent;
use crate::fingerprint::{fingerprint_id, SignalCollector};
use crate::models::{AttributionResult, InstallParams, ReconciledParams};
use crate::notifier::Notifier;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// State of the deferred channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredState {
    Idle,
    AwaitingDeferredResult,
    DeferredMatched,
    DeferredUnmatched,
}

impl DeferredState {
    /// No further deferred transitions can happen.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeferredState::DeferredMatched | DeferredState::DeferredUnmatched
        )
    }
}

pub struct Reconciler {
    backend: Arc<dyn AttributionBackend>,
    collector: Arc<dyn SignalCollector>,
    notifier: Arc<Notifier>,
    deferred: OnceCell<AttributionResult>,
    state: RwLock<DeferredState>,
    deep_links_delivered: AtomicU64,
    save_on_match: bool,
}

impl Reconciler {
    pub fn new(
        backend: Arc<dyn AttributionBackend>,
        collector: Arc<dyn SignalCollector>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            backend,
            collector,
            notifier,
            deferred: OnceCell::new(),
            state: RwLock::new(DeferredState::Idle),
            deep_links_delivered: AtomicU64::new(0),
            save_on_match: false,
        }
    }

    /// Send a tracking record back after a deferred match.
    pub fn with_save_on_match(mut self, enabled: bool) -> Self {
        self.save_on_match = enabled;
        self
    }

    pub fn state(&self) -> DeferredState {
        *self.state.read()
    }

    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.notifier
    }

    /// The deferred result, once resolved.
    pub fn cached_result(&self) -> Option<&AttributionResult> {
        self.deferred.get()
    }

    pub fn deep_links_delivered(&self) -> u64 {
        self.deep_links_delivered.load(Ordering::Relaxed)
    }

    /// Resolve the deferred channel, at most once per reconciler.
    ///
    /// Backend errors resolve to `NotMatched`; this never fails.
    pub async fn resolve_deferred(&self) -> AttributionResult {
        self.deferred
            .get_or_init(|| self.run_deferred())
            .await
            .clone()
    }

    /// Resolve the deferred channel on the tokio runtime (cold start entry).
    pub fn start(self: &Arc<Self>) -> JoinHandle<AttributionResult> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.resolve_deferred().await })
    }

    async fn run_deferred(&self) -> AttributionResult {
        *self.state.write() = DeferredState::AwaitingDeferredResult;

        let fingerprint = self.collector.collect();
        let fingerprint_id = fingerprint_id(&fingerprint);
        info!(%fingerprint_id, signals = fingerprint.len(), "Resolving deferred install params");

        let result = match self.backend.fetch_install_params(&fingerprint).await {
            Ok(result) => result,
            Err(e) => {
                warn!(%fingerprint_id, error = %e, "Deferred attribution failed, treating as no match");
                AttributionResult::NotMatched
            }
        };

        // No await past this point: the delivery below must not be re-run by
        // a second initializer if this future is dropped
        match &result {
            AttributionResult::Matched(params) => {
                *self.state.write() = DeferredState::DeferredMatched;
                let event = ReconciledParams::deferred(params.clone());
                info!(
                    %fingerprint_id,
                    event_id = %event.event_id,
                    params = params.len(),
                    "Deferred install params matched"
                );
                self.notifier.deliver(&event);

                if self.save_on_match {
                    let backend = Arc::clone(&self.backend);
                    let params = params.clone();
                    tokio::spawn(async move {
                        backend.save_tracking_record(&fingerprint, &params).await;
                    });
                }
            }
            AttributionResult::NotMatched => {
                *self.state.write() = DeferredState::DeferredUnmatched;
                info!(%fingerprint_id, "No deferred install params");
            }
        }

        result
    }

    /// Handle a live deep link URL.
    ///
    /// Returns the delivered params, or `None` when the link carries no
    /// decodable parameter.
    pub fn handle_deep_link(&self, url: &str) -> Option<ReconciledParams> {
        self.handle_deep_link_event(DeepLinkEvent::parse(url))
    }

    /// Deliver one deep-link event. Taking the event by value means a given
    /// event can only be delivered once.
    pub fn handle_deep_link_event(&self, event: DeepLinkEvent) -> Option<ReconciledParams> {
        if !event.has_params() {
            debug!(url = %event.url, "Deep link carries no params, nothing to deliver");
            return None;
        }

        let reconciled = ReconciledParams::deep_link(event.params, event.url);
        info!(
            event_id = %reconciled.event_id,
            params = reconciled.params.len(),
            deferred_state = ?self.state(),
            "Deep link received"
        );
        self.notifier.deliver(&reconciled);
        self.deep_links_delivered.fetch_add(1, Ordering::Relaxed);
        Some(reconciled)
    }

    /// Best-effort tracking record for `params` with a freshly collected
    /// fingerprint.
    pub async fn save_tracking_record(&self, params: &InstallParams) -> bool {
        let fingerprint = self.collector.collect();
        self.backend.save_tracking_record(&fingerprint, params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribution::AttributionError;
    use crate::fingerprint::{Platform, StaticCollector};
    use crate::models::{EventKind, Fingerprint};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    enum Reply {
        Matched(InstallParams),
        NotMatched,
        Timeout,
        BadBody,
    }

    struct FakeBackend {
        reply: Reply,
        delay: Duration,
        fetches: AtomicUsize,
        saves: AtomicUsize,
    }

    impl FakeBackend {
        fn new(reply: Reply) -> Arc<Self> {
            Arc::new(Self {
                reply,
                delay: Duration::ZERO,
                fetches: AtomicUsize::new(0),
                saves: AtomicUsize::new(0),
            })
        }

        fn slow(reply: Reply, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                reply,
                delay,
                fetches: AtomicUsize::new(0),
                saves: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl AttributionBackend for FakeBackend {
        async fn fetch_install_params(
            &self,
            _fingerprint: &Fingerprint,
        ) -> Result<AttributionResult, AttributionError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            match &self.reply {
                Reply::Matched(params) => Ok(AttributionResult::Matched(params.clone())),
                Reply::NotMatched => Ok(AttributionResult::NotMatched),
                Reply::Timeout => Err(AttributionError::Network {
                    message: "operation timed out".to_string(),
                    timed_out: true,
                }),
                Reply::BadBody => Err(AttributionError::protocol("invalid body")),
            }
        }

        async fn save_tracking_record(
            &self,
            _fingerprint: &Fingerprint,
            _params: &InstallParams,
        ) -> bool {
            self.saves.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    fn collector() -> Arc<StaticCollector> {
        Arc::new(
            StaticCollector::new(Platform::Android)
                .with_signal("osVersion", "13")
                .with_signal("deviceModel", "Pixel7"),
        )
    }

    fn recording_notifier() -> (Arc<Notifier>, Arc<Mutex<Vec<ReconciledParams>>>) {
        let notifier = Arc::new(Notifier::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        notifier.register(move |event: &ReconciledParams| -> anyhow::Result<()> {
            sink.lock().push(event.clone());
            Ok(())
        });
        (notifier, seen)
    }

    fn abc123() -> InstallParams {
        InstallParams::new().with("inviteCode", "ABC123")
    }

    #[tokio::test]
    async fn test_matched_delivers_once() {
        let backend = FakeBackend::new(Reply::Matched(abc123()));
        let (notifier, seen) = recording_notifier();
        let reconciler = Reconciler::new(backend.clone(), collector(), notifier);

        assert_eq!(reconciler.state(), DeferredState::Idle);
        let first = reconciler.resolve_deferred().await;
        let second = reconciler.resolve_deferred().await;

        assert_eq!(first, AttributionResult::Matched(abc123()));
        assert_eq!(first, second);
        assert_eq!(backend.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(reconciler.state(), DeferredState::DeferredMatched);
        assert!(reconciler.state().is_terminal());

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].kind, EventKind::ParamsReceived);
        assert_eq!(seen[0].params, abc123());
    }

    #[tokio::test]
    async fn test_unmatched_and_errors_deliver_nothing() {
        for reply in [Reply::NotMatched, Reply::Timeout, Reply::BadBody] {
            let backend = FakeBackend::new(reply);
            let (notifier, seen) = recording_notifier();
            let reconciler = Reconciler::new(backend.clone(), collector(), notifier);

            assert_eq!(
                reconciler.resolve_deferred().await,
                AttributionResult::NotMatched
            );
            assert_eq!(reconciler.state(), DeferredState::DeferredUnmatched);
            assert_eq!(reconciler.cached_result(), Some(&AttributionResult::NotMatched));
            assert!(seen.lock().is_empty());
        }
    }

    #[tokio::test]
    async fn test_concurrent_resolves_coalesce() {
        let backend = FakeBackend::slow(Reply::Matched(abc123()), Duration::from_millis(50));
        let (notifier, seen) = recording_notifier();
        let reconciler = Arc::new(Reconciler::new(backend.clone(), collector(), notifier));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let reconciler = reconciler.clone();
            tasks.spawn(async move { reconciler.resolve_deferred().await });
        }
        tasks.spawn({
            let handle = reconciler.start();
            async move { handle.await.unwrap() }
        });

        while let Some(result) = tasks.join_next().await {
            assert_eq!(result.unwrap(), AttributionResult::Matched(abc123()));
        }
        assert_eq!(backend.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_deep_link_delivered_regardless_of_deferred_state() {
        let backend = FakeBackend::slow(Reply::NotMatched, Duration::from_millis(50));
        let (notifier, seen) = recording_notifier();
        let reconciler = Arc::new(Reconciler::new(backend, collector(), notifier));

        // before the deferred fetch starts
        let before = reconciler
            .handle_deep_link("app://open?inviteCode=XYZ&channelId=9")
            .unwrap();

        // while it is in flight
        let pending = reconciler.start();
        tokio::task::yield_now().await;
        let during = reconciler.handle_deep_link("app://open?userId=7").unwrap();

        // after it resolved
        pending.await.unwrap();
        let after = reconciler.handle_deep_link("app://open?inviteCode=XYZ&channelId=9").unwrap();

        assert_eq!(
            before.params,
            InstallParams::new().with("inviteCode", "XYZ").with("channelId", "9")
        );
        assert_eq!(during.params.user_id(), Some("7"));
        assert_eq!(after.params, before.params);
        assert_ne!(after.event_id, before.event_id);

        let seen = seen.lock();
        assert_eq!(seen.len(), 3);
        assert!(seen.iter().all(|e| e.kind == EventKind::DeepLinkReceived));
        assert_eq!(reconciler.deep_links_delivered(), 3);
    }

    #[tokio::test]
    async fn test_both_channels_deliver_without_dedup() {
        let backend = FakeBackend::new(Reply::Matched(abc123()));
        let (notifier, seen) = recording_notifier();
        let reconciler = Reconciler::new(backend, collector(), notifier);

        reconciler.resolve_deferred().await;
        reconciler.handle_deep_link("app://open?inviteCode=ABC123");

        let kinds: Vec<EventKind> = seen.lock().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::ParamsReceived, EventKind::DeepLinkReceived]);
    }

    #[tokio::test]
    async fn test_deep_link_without_params_is_not_delivered() {
        let backend = FakeBackend::new(Reply::NotMatched);
        let (notifier, seen) = recording_notifier();
        let reconciler = Reconciler::new(backend, collector(), notifier);

        assert!(reconciler.handle_deep_link("app://open").is_none());
        assert!(seen.lock().is_empty());
        assert_eq!(reconciler.state(), DeferredState::Idle);
    }

    #[tokio::test]
    async fn test_save_on_match_sends_record() {
        let backend = FakeBackend::new(Reply::Matched(abc123()));
        let (notifier, _seen) = recording_notifier();
        let reconciler =
            Reconciler::new(backend.clone(), collector(), notifier).with_save_on_match(true);

        reconciler.resolve_deferred().await;
        for _ in 0..50 {
            if backend.saves.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(backend.saves.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failing_listener_does_not_affect_resolution() {
        let backend = FakeBackend::new(Reply::Matched(abc123()));
        let notifier = Arc::new(Notifier::new());
        notifier.register(|_: &ReconciledParams| -> anyhow::Result<()> {
            anyhow::bail!("host handler crashed")
        });
        let reconciler = Reconciler::new(backend, collector(), notifier);

        assert!(reconciler.resolve_deferred().await.is_matched());
        assert_eq!(reconciler.state(), DeferredState::DeferredMatched);
    }
}
