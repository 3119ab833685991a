//! Per-request evaluation state
//!
//! An [`EvaluationSession`] owns the request being decided, an optional
//! [`AttributeResolver`] for attributes the request does not carry and an
//! optional cancellation signal. Resolver answers (including "not found" and
//! failures) are memoized for the lifetime of the session, so the resolver is
//! called at most once per attribute id. Nothing is shared between sessions.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::attribute::{AttributeType, AttributeValue};
use crate::error::{EvalError, ResolveError};
use crate::expr::AttributeDesignator;
use crate::request::Request;

/// External source of attribute values (policy information point)
///
/// Returns `Ok(None)` when the attribute is known to be unavailable.
#[async_trait]
pub trait AttributeResolver: Send + Sync {
    async fn resolve(
        &self,
        id: &str,
        expected: AttributeType,
        request: &Request,
    ) -> Result<Option<AttributeValue>, ResolveError>;
}

#[derive(Debug, Clone)]
enum Resolved {
    Found(AttributeValue),
    NotFound,
    Failed(String),
}

pub struct EvaluationSession {
    request: Request,
    resolver: Option<Arc<dyn AttributeResolver>>,
    cancellation: Option<CancellationToken>,
    resolved: Mutex<HashMap<String, Resolved>>,
}

impl EvaluationSession {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            resolver: None,
            cancellation: None,
            resolved: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn AttributeResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.as_ref().is_some_and(|t| t.is_cancelled())
    }

    fn check_cancelled(&self) -> Result<(), EvalError> {
        if self.is_cancelled() {
            return Err(EvalError::Cancelled);
        }
        Ok(())
    }

    /// Resolve a designator against the request, then the resolver
    pub async fn resolve(
        &self,
        designator: &AttributeDesignator,
    ) -> Result<AttributeValue, EvalError> {
        let unavailable = |message: String| EvalError::Resolution {
            id: designator.id.clone(),
            expected: designator.ty,
            message,
        };

        if let Some(value) = self.request.get(&designator.id) {
            if value.attribute_type() == designator.ty {
                return Ok(value.clone());
            }
            return Err(unavailable(format!(
                "request carries a value of type {}",
                value.attribute_type()
            )));
        }

        let cached = self.resolved.lock().get(&designator.id).cloned();
        let resolved = match cached {
            Some(resolved) => resolved,
            None => {
                let resolved = self.call_resolver(designator).await?;
                self.resolved
                    .lock()
                    .insert(designator.id.clone(), resolved.clone());
                resolved
            }
        };

        match resolved {
            Resolved::Found(value) => Ok(value),
            Resolved::NotFound => Err(unavailable("not present in request".to_string())),
            Resolved::Failed(message) => Err(unavailable(message)),
        }
    }

    async fn call_resolver(&self, designator: &AttributeDesignator) -> Result<Resolved, EvalError> {
        let Some(resolver) = &self.resolver else {
            return Ok(Resolved::NotFound);
        };

        self.check_cancelled()?;

        let lookup = resolver.resolve(&designator.id, designator.ty, &self.request);
        let result = match &self.cancellation {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => return Err(EvalError::Cancelled),
                    result = lookup => result,
                }
            }
            None => lookup.await,
        };

        self.check_cancelled()?;

        Ok(match result {
            Ok(Some(value)) if value.attribute_type() == designator.ty => Resolved::Found(value),
            Ok(Some(value)) => Resolved::Failed(format!(
                "resolver returned a value of type {}",
                value.attribute_type()
            )),
            Ok(None) => Resolved::NotFound,
            Err(e) => {
                debug!(attribute = %designator.id, error = %e, "Attribute resolver failed");
                Resolved::Failed(e.to_string())
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingResolver {
        calls: AtomicUsize,
        answer: Option<AttributeValue>,
    }

    #[async_trait]
    impl AttributeResolver for CountingResolver {
        async fn resolve(
            &self,
            _id: &str,
            _expected: AttributeType,
            _request: &Request,
        ) -> Result<Option<AttributeValue>, ResolveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.answer.clone())
        }
    }

    #[tokio::test]
    async fn test_request_value_wins() {
        let session = EvaluationSession::new(Request::new().with_attribute("user", "alice"));
        let value = session
            .resolve(&AttributeDesignator::new("user", AttributeType::String))
            .await
            .unwrap();
        assert_eq!(value, AttributeValue::from("alice"));
    }

    #[tokio::test]
    async fn test_type_mismatch_is_resolution_error() {
        let session = EvaluationSession::new(Request::new().with_attribute("level", "high"));
        let err = session
            .resolve(&AttributeDesignator::new("level", AttributeType::Integer))
            .await
            .unwrap_err();
        assert!(matches!(err, EvalError::Resolution { .. }));
    }

    #[tokio::test]
    async fn test_resolver_called_once_including_not_found() {
        let resolver = Arc::new(CountingResolver {
            calls: AtomicUsize::new(0),
            answer: None,
        });
        let session = EvaluationSession::new(Request::new()).with_resolver(resolver.clone());
        let designator = AttributeDesignator::new("missing", AttributeType::String);

        assert!(session.resolve(&designator).await.is_err());
        assert!(session.resolve(&designator).await.is_err());
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resolver_wrong_type_is_rejected() {
        let resolver = Arc::new(CountingResolver {
            calls: AtomicUsize::new(0),
            answer: Some(AttributeValue::from(7_i64)),
        });
        let session = EvaluationSession::new(Request::new()).with_resolver(resolver);
        let err = session
            .resolve(&AttributeDesignator::new("x", AttributeType::String))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("integer"));
    }

    #[tokio::test]
    async fn test_cancelled_before_call() {
        let resolver = Arc::new(CountingResolver {
            calls: AtomicUsize::new(0),
            answer: Some(AttributeValue::from("v")),
        });
        let token = CancellationToken::new();
        token.cancel();

        let session = EvaluationSession::new(Request::new())
            .with_resolver(resolver.clone())
            .with_cancellation(token);
        let err = session
            .resolve(&AttributeDesignator::new("x", AttributeType::String))
            .await
            .unwrap_err();

        assert_eq!(err, EvalError::Cancelled);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
    }
}
