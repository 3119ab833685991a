//! Policy store tests: hot swap under load, atomic failures, resolution

use async_trait::async_trait;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};
use tokio_util::sync::CancellationToken;
use verdict_pdp::{
    AttributeResolver, AttributeType, AttributeValue, Effect, ErrorKind, PdpError, PolicyStore,
    Request, ResolveError,
};

fn generation_doc(effect: &str, tag: &str) -> String {
    format!(
        r#"{{"attributes": {{"generation": "string"}},
            "policies": {{"id": "root", "alg": "FirstApplicableEffect", "rules": [
                {{"effect": "{effect}", "obligations": [
                    {{"generation": {{"val": {{"type": "string", "content": "{tag}"}}}}}}
                ]}}
            ]}}}}"#
    )
}

const RESOLVED_DOC: &str = r#"{
    "attributes": {"clearance": "integer"},
    "policies": {"alg": "DenyOverrides", "rules": [
        {"effect": "Permit",
         "target": [{"greater": [
             {"attr": "clearance"}, {"val": {"type": "integer", "content": 0}}
         ]}],
         "condition": {"less": [
             {"attr": "clearance"}, {"val": {"type": "integer", "content": 10}}
         ]}}
    ]}
}"#;

struct ClearanceResolver {
    calls: AtomicUsize,
    delay: Duration,
}

impl ClearanceResolver {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
        })
    }
}

#[async_trait]
impl AttributeResolver for ClearanceResolver {
    async fn resolve(
        &self,
        id: &str,
        _expected: AttributeType,
        _request: &Request,
    ) -> Result<Option<AttributeValue>, ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        sleep(self.delay).await;
        match id {
            "clearance" => Ok(Some(AttributeValue::Integer(5))),
            _ => Ok(None),
        }
    }
}

// ============================================================================
// HOT SWAP
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reload_and_decide() {
    let store = Arc::new(PolicyStore::default());
    let permit_doc = generation_doc("Permit", "a");
    let deny_doc = generation_doc("Deny", "b");
    store.load(permit_doc.as_bytes()).await.unwrap();

    let mut handles = Vec::new();

    for i in 0..4 {
        let store = Arc::clone(&store);
        let doc = if i % 2 == 0 { deny_doc.clone() } else { permit_doc.clone() };
        handles.push(tokio::spawn(async move {
            for _ in 0..50 {
                store.load(doc.as_bytes()).await.unwrap();
                tokio::task::yield_now().await;
            }
        }));
    }

    for _ in 0..8 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            for _ in 0..200 {
                let decision = store.current_decision(Request::new()).await;
                let tag = decision.obligation("generation").and_then(|v| v.as_str());
                match decision.effect {
                    Effect::Permit => assert_eq!(tag, Some("a")),
                    Effect::Deny => assert_eq!(tag, Some("b")),
                    other => panic!("unexpected effect {other}"),
                }
                assert_eq!(decision.obligations.len(), 1);
            }
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(store.snapshot().unwrap().generation, 201);
    let metrics = store.metrics().unwrap();
    assert_eq!(metrics.loads_succeeded, 201);
    assert_eq!(metrics.total_decisions, 1600);
}

#[tokio::test]
async fn test_failed_load_is_atomic() {
    let store = PolicyStore::default();
    store.load(generation_doc("Permit", "a").as_bytes()).await.unwrap();
    let before = store.snapshot().unwrap();

    // valid prefix, then an unknown algorithm deep inside
    let broken = r#"{"attributes": {"generation": "string"},
        "policies": {"id": "root", "alg": "DenyOverrides", "policies": [
            {"id": "ok", "alg": "DenyOverrides", "rules": [{"effect": "Deny"}]},
            {"id": "bad", "alg": "Lottery", "rules": []}
        ]}}"#;
    let err = store.load(broken.as_bytes()).await.unwrap_err();
    assert!(matches!(err, PdpError::Parse(ref e) if e.is_type()));

    let after = store.snapshot().unwrap();
    assert!(Arc::ptr_eq(&before, &after));
    assert!(store.current_decision(Request::new()).await.is_permit());
}

#[tokio::test]
async fn test_load_file() {
    let store = PolicyStore::default();

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(generation_doc("Deny", "b").as_bytes()).unwrap();

    assert_eq!(store.load_file(file.path()).await.unwrap(), 1);
    assert!(store.current_decision(Request::new()).await.is_deny());

    let missing = file.path().with_extension("missing");
    let err = store.load_file(&missing).await.unwrap_err();
    assert!(matches!(err, PdpError::Io(_)));
    assert_eq!(store.snapshot().unwrap().generation, 1);
}

// ============================================================================
// RESOLUTION AND CANCELLATION
// ============================================================================

#[tokio::test]
async fn test_resolver_called_once_per_request() {
    let resolver = ClearanceResolver::new(Duration::ZERO);
    let store = PolicyStore::default().with_resolver(resolver.clone());
    store.load(RESOLVED_DOC.as_bytes()).await.unwrap();

    // target and condition both read the attribute
    assert!(store.current_decision(Request::new()).await.is_permit());
    assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);

    // nothing carries over to the next request
    assert!(store.current_decision(Request::new()).await.is_permit());
    assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);

    // request values take precedence over the resolver
    let decision = store
        .current_decision(Request::new().with_attribute("clearance", 50i64))
        .await;
    assert_eq!(decision.effect, Effect::NotApplicable);
    assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_cancelled_resolution_is_indeterminate() {
    let resolver = ClearanceResolver::new(Duration::from_secs(30));
    let store = PolicyStore::default().with_resolver(resolver.clone());
    store.load(RESOLVED_DOC.as_bytes()).await.unwrap();

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let decision = timeout(Duration::from_secs(5), store.decide_with(Request::new(), token))
        .await
        .expect("cancellation should end the evaluation");

    assert_eq!(decision.effect, Effect::Indeterminate);
    assert_eq!(decision.reason.unwrap().kind, ErrorKind::Cancelled);
    assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_already_cancelled_skips_resolver() {
    let resolver = ClearanceResolver::new(Duration::ZERO);
    let store = PolicyStore::default().with_resolver(resolver.clone());
    store.load(RESOLVED_DOC.as_bytes()).await.unwrap();

    let token = CancellationToken::new();
    token.cancel();

    let decision = store.decide_with(Request::new(), token).await;
    assert_eq!(decision.reason.unwrap().kind, ErrorKind::Cancelled);
    assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
}

const PERMIT_UNLESS_BLOCKED: &str = r#"{
    "attributes": {"blocked": "boolean"},
    "policies": {"id": "root", "alg": "PermitUnlessDeny", "rules": [
        {"id": "block", "effect": "Deny", "condition": {"attr": "blocked"}}
    ]}
}"#;

const MAPPED_WITH_ERROR_CHILD: &str = r#"{
    "attributes": {"tenant": "string"},
    "policies": {"id": "root",
        "alg": {"id": "Mapper", "map": {"attr": "tenant"}, "error": "open"},
        "rules": [
            {"id": "open", "effect": "Permit"},
            {"id": "closed", "effect": "Deny"}
        ]}
}"#;

#[tokio::test]
async fn test_permit_unless_deny_does_not_absorb_cancellation() {
    let resolver = ClearanceResolver::new(Duration::from_secs(30));
    let store = PolicyStore::default().with_resolver(resolver.clone());
    store.load(PERMIT_UNLESS_BLOCKED.as_bytes()).await.unwrap();

    // an unresolvable attribute is swallowed by the algorithm
    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });
    let decision = timeout(Duration::from_secs(5), store.decide_with(Request::new(), token))
        .await
        .expect("cancellation should end the evaluation");
    assert_eq!(decision.effect, Effect::Indeterminate);
    assert_eq!(decision.reason.unwrap().kind, ErrorKind::Cancelled);

    let token = CancellationToken::new();
    token.cancel();
    let decision = store.decide_with(Request::new(), token).await;
    assert!(!decision.is_permit());
    assert_eq!(decision.reason.unwrap().kind, ErrorKind::Cancelled);
}

#[tokio::test]
async fn test_mapper_error_child_does_not_catch_cancellation() {
    let resolver = ClearanceResolver::new(Duration::ZERO);
    let store = PolicyStore::default().with_resolver(resolver.clone());
    store.load(MAPPED_WITH_ERROR_CHILD.as_bytes()).await.unwrap();

    // without cancellation the unresolved selector falls back to "open"
    assert!(store.current_decision(Request::new()).await.is_permit());

    let token = CancellationToken::new();
    token.cancel();
    let decision = store.decide_with(Request::new(), token).await;
    assert_eq!(decision.effect, Effect::Indeterminate);
    let reason = decision.reason.unwrap();
    assert_eq!(reason.kind, ErrorKind::Cancelled);
    assert_eq!(reason.path, vec!["root"]);
}

#[tokio::test]
async fn test_cancellation_after_firm_decision_is_indeterminate() {
    let store = PolicyStore::default();
    store.load(generation_doc("Permit", "a").as_bytes()).await.unwrap();

    let token = CancellationToken::new();
    token.cancel();
    let decision = store.decide_with(Request::new(), token).await;
    assert_eq!(decision.effect, Effect::Indeterminate);
    assert!(decision.obligations.is_empty());
}
