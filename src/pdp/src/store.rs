//! Policy store with atomic hot swap
//!
//! The store serves one immutable [`PolicyTree`] at a time. A load parses and
//! validates the candidate document without touching the served tree and
//! only then publishes it with a single pointer swap, so readers observe
//! either the previous tree or the new one. Every decision captures the
//! current snapshot once and evaluates entirely against it.

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace, warn};

use crate::config::EngineConfig;
use crate::engine::{Decision, EngineMetrics, MetricsCollector};
use crate::error::{EvalError, Result};
use crate::parser::parse_with;
use crate::policy::PolicyTree;
use crate::request::Request;
use crate::session::{AttributeResolver, EvaluationSession};

/// A published tree and when it was published
#[derive(Debug)]
pub struct PolicySnapshot {
    /// Increases by one with every successful load, starting at 1
    pub generation: u64,
    pub tree: PolicyTree,
    pub loaded_at: DateTime<Utc>,
}

pub struct PolicyStore {
    current: ArcSwapOption<PolicySnapshot>,
    /// Last published generation; held while publishing
    generation: Mutex<u64>,
    config: EngineConfig,
    resolver: Option<Arc<dyn AttributeResolver>>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl PolicyStore {
    /// Create an empty store
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_valid_config(config))
    }

    fn with_valid_config(config: EngineConfig) -> Self {
        let metrics = config
            .enable_metrics
            .then(|| Arc::new(MetricsCollector::new()));
        Self {
            current: ArcSwapOption::empty(),
            generation: Mutex::new(0),
            config,
            resolver: None,
            metrics,
        }
    }

    /// Resolver consulted for attributes missing from requests
    pub fn with_resolver(mut self, resolver: Arc<dyn AttributeResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Parse, validate and publish a policy document
    ///
    /// Returns the new generation. On error the served tree is unchanged.
    pub async fn load(&self, document: &[u8]) -> Result<u64> {
        let tree = match parse_with(document, &self.config) {
            Ok(tree) => tree,
            Err(e) => {
                warn!(error = %e, "Rejected policy document");
                self.record_load(false);
                return Err(e.into());
            }
        };

        let node_count = tree.node_count();
        let generation = {
            let mut last = self.generation.lock();
            *last += 1;
            self.current.store(Some(Arc::new(PolicySnapshot {
                generation: *last,
                tree,
                loaded_at: Utc::now(),
            })));
            *last
        };

        info!(generation, node_count, "Published policy tree");
        self.record_load(true);
        Ok(generation)
    }

    /// Read a policy document from disk and load it
    pub async fn load_file(&self, path: impl AsRef<Path>) -> Result<u64> {
        let path = path.as_ref();
        let document = match tokio::fs::read(path).await {
            Ok(document) => document,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read policy document");
                self.record_load(false);
                return Err(e.into());
            }
        };
        self.load(&document).await
    }

    /// Currently served snapshot, if any document was loaded
    pub fn snapshot(&self) -> Option<Arc<PolicySnapshot>> {
        self.current.load_full()
    }

    /// Decide a request against the current tree
    ///
    /// Indeterminate when nothing has been loaded yet.
    pub async fn current_decision(&self, request: Request) -> Decision {
        self.decide(self.session(request)).await
    }

    /// Like [`current_decision`](Self::current_decision), abandoning
    /// resolver calls once `cancellation` fires
    pub async fn decide_with(&self, request: Request, cancellation: CancellationToken) -> Decision {
        self.decide(self.session(request).with_cancellation(cancellation)).await
    }

    /// Snapshot of the store's counters when metrics are enabled
    pub fn metrics(&self) -> Option<EngineMetrics> {
        self.metrics.as_ref().map(|collector| collector.get_metrics())
    }

    fn session(&self, request: Request) -> EvaluationSession {
        let session = EvaluationSession::new(request);
        match &self.resolver {
            Some(resolver) => session.with_resolver(Arc::clone(resolver)),
            None => session,
        }
    }

    async fn decide(&self, session: EvaluationSession) -> Decision {
        let start = Instant::now();

        let decision = match self.snapshot() {
            Some(snapshot) => snapshot.tree.evaluate(&session).await,
            None => Decision::indeterminate(&EvalError::NoPolicy, Vec::new()),
        };

        trace!(
            attributes = session.request().len(),
            effect = %decision.effect,
            "Decided request"
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_decision(decision.effect, start.elapsed());
        }
        decision
    }

    fn record_load(&self, succeeded: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.record_load(succeeded);
        }
    }
}

impl Default for PolicyStore {
    fn default() -> Self {
        Self::with_valid_config(EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Effect;
    use crate::error::{ErrorKind, PdpError};
    use tracing_test::traced_test;

    const PERMIT_ALL: &str = r#"{"attributes": {},
        "policies": {"id": "root", "alg": "FirstApplicableEffect",
                     "rules": [{"effect": "Permit"}]}}"#;

    #[tokio::test]
    async fn test_empty_store_is_indeterminate() {
        let store = PolicyStore::default();
        let decision = store.current_decision(Request::new()).await;

        assert_eq!(decision.effect, Effect::Indeterminate);
        assert_eq!(decision.reason.unwrap().kind, ErrorKind::NoPolicy);
        assert!(store.snapshot().is_none());
    }

    #[tokio::test]
    async fn test_load_publishes_generations() {
        let store = PolicyStore::default();

        assert_eq!(store.load(PERMIT_ALL.as_bytes()).await.unwrap(), 1);
        assert_eq!(store.load(PERMIT_ALL.as_bytes()).await.unwrap(), 2);

        let snapshot = store.snapshot().unwrap();
        assert_eq!(snapshot.generation, 2);
        assert_eq!(snapshot.tree.node_count(), 2);
        assert!(store.current_decision(Request::new()).await.is_permit());
    }

    #[tokio::test]
    async fn test_failed_load_keeps_current_tree() {
        let store = PolicyStore::default();
        store.load(PERMIT_ALL.as_bytes()).await.unwrap();

        let err = store.load(br#"{"policies": {"bogus": 1}}"#).await.unwrap_err();
        assert!(matches!(err, PdpError::Parse(_)));

        assert_eq!(store.snapshot().unwrap().generation, 1);
        assert!(store.current_decision(Request::new()).await.is_permit());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_load_outcomes_logged() {
        let store = PolicyStore::default();
        store.load(PERMIT_ALL.as_bytes()).await.unwrap();
        let _ = store.load(b"[]").await;

        assert!(logs_contain("Published policy tree"));
        assert!(logs_contain("Rejected policy document"));
    }

    #[tokio::test]
    async fn test_metrics_counted() {
        let store = PolicyStore::default();
        store.load(PERMIT_ALL.as_bytes()).await.unwrap();
        let _ = store.load(b"not json").await;
        store.current_decision(Request::new()).await;

        let metrics = store.metrics().unwrap();
        assert_eq!(metrics.loads_succeeded, 1);
        assert_eq!(metrics.loads_failed, 1);
        assert_eq!(metrics.permit_decisions, 1);
    }

    #[tokio::test]
    async fn test_metrics_disabled() {
        let config = EngineConfig {
            enable_metrics: false,
            ..EngineConfig::default()
        };
        let store = PolicyStore::new(config).unwrap();
        assert!(store.metrics().is_none());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = EngineConfig {
            max_depth: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(PolicyStore::new(config), Err(PdpError::InvalidConfig(_))));
    }
}
