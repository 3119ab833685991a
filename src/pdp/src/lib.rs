//! # Verdict Policy Decision Point
//!
//! Evaluates typed attribute requests against hierarchical policy documents
//! and returns Permit, Deny, NotApplicable or Indeterminate together with the
//! obligations of the winning branch.
//!
//! ## Features
//!
//! - **Typed attributes**: booleans, strings, integers, floats, addresses,
//!   networks, domain names and their sets and lists
//! - **Single-pass parser** with case-insensitive tags and located errors
//! - **Combining algorithms** including selector-driven mappers
//! - **Hot-swappable store**: failed loads never disturb the served tree
//! - **Async attribute resolution** with per-request memoization and
//!   cancellation
//!
//! ## Example
//!
//! ```rust
//! use verdict_pdp::{PolicyStore, Request};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PolicyStore::default();
//!     store
//!         .load(br#"{
//!             "attributes": {"role": "string"},
//!             "policies": {"alg": "FirstApplicableEffect", "rules": [
//!                 {"effect": "Permit", "condition": {"equal": [
//!                     {"attr": "role"},
//!                     {"val": {"type": "string", "content": "admin"}}
//!                 ]}}
//!             ]}
//!         }"#)
//!         .await?;
//!
//!     let decision = store
//!         .current_decision(Request::new().with_attribute("role", "admin"))
//!         .await;
//!
//!     if decision.is_permit() {
//!         println!("Access granted!");
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod attribute;
pub mod config;
pub mod engine;
pub mod error;
pub mod expr;
pub mod parser;
pub mod policy;
pub mod request;
pub mod session;
pub mod store;

// Re-export commonly used types
pub use attribute::{AttributeType, AttributeValue, DomainName, Element, ElementType};
pub use config::EngineConfig;
pub use engine::{
    Decision, Effect, EngineMetrics, IndeterminateReason, MetricsCollector, ObligationValue,
};
pub use error::{ErrorKind, EvalError, ParseError, PdpError, ResolveError, Result};
pub use expr::{AttributeDesignator, Expression, Function, Target};
pub use parser::{parse, parse_with};
pub use policy::{
    AlgorithmKind, CombiningAlgorithm, MissingChild, PolicyEffect, PolicyNode, PolicyTree,
};
pub use request::Request;
pub use session::{AttributeResolver, EvaluationSession};
pub use store::{PolicySnapshot, PolicyStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
