//! Policy decision and enforcement for feature licenses.
//!
//! Two cooperating pieces:
//!
//! - the **PDP** (policy decision point) evaluates declarative Rego rules
//!   against a decision input (the caller's verified claims plus the
//!   requested operation) and a data store (license scopes, feature
//!   settings)
//! - the **PEP** (policy enforcement point) intercepts typed function
//!   calls, marshals them into a canonical decision message, consults the
//!   PDP, and gates both invocation and return
//!
//! Around them sit the [`PolicyContext`] (module registry, compilation
//! cache, parent/child override semantics), pluggable module sources
//! ([`PolicyRetrievalPoint`]) and the hierarchical [`DecisionStore`].
//!
//! The rule language itself is a collaborator: compilation and evaluation
//! delegate to the `regorus` Rego engine, and its diagnostics surface as
//! [`PolicyError::Compile`] / [`PolicyError::Eval`]. A policy deny is never
//! an error - callers check [`Decision::allowed`].

pub mod context;
pub mod error;
pub mod pdp;
pub mod pep;
pub mod prp;
pub mod store;

pub use context::{Compilation, Eval, PolicyContext, QueryOutcome};
pub use error::{PolicyError, PolicyResult};
pub use pdp::{Decision, DecisionKind, DecisionMessage, DecisionPoint};
pub use pep::{
    enforce0, enforce1, enforce2, enforce3, enforce4, CallOutcome, EnforcedFn, EnforcementPoint,
    InvocationToken, Registration, ReturnSpec, ReturnToken, ReturnValues, ValueKind, Wrapper,
};
pub use prp::{DirectoryPrp, EmbeddedPrp, PolicyRetrievalPoint, PrpChange, PrpChangeCallback};
pub use store::{DecisionStore, DecisionStoreBuilder};
