//! Policy decision point: canonical decision messages and their evaluation.
//!
//! A decision message is what the enforcement point submits:
//!
//! ```json
//! {
//!   "type": "invoke",
//!   "method": ["path", "to", "method-name"],
//!   "sc": { "aud": "...", "scope": "simulator regulate" },
//!   "body": { "name": "my-param", "dir": "inbound" }
//! }
//! ```
//!
//! `sc` is the security context - the caller's verified token claims.
//! Return messages additionally carry an `invoke` member referencing the
//! invoke evaluation they follow.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::context::{Compilation, Eval};
use crate::error::{PolicyError, PolicyResult};
use crate::store::DecisionStore;

/// Which side of a call a decision message describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DecisionKind {
    /// A function is about to be invoked.
    #[serde(rename = "invoke")]
    Invoke,
    /// A function returned and its results are about to propagate.
    #[serde(rename = "return")]
    Return,
}

/// Canonical input document for one policy decision.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionMessage {
    /// Message kind, serialized as `type`.
    #[serde(rename = "type")]
    pub kind: DecisionKind,
    /// Structured operation identifier (the method path segments).
    pub method: Vec<String>,
    /// Security context: the caller's verified claims. Omitted when empty.
    #[serde(skip_serializing_if = "Value::is_null")]
    pub sc: Value,
    /// Named arguments (invoke) or named results (return). Omitted when
    /// empty.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub body: Map<String, Value>,
    /// Back-reference to the invoke decision, present on return messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoke: Option<Value>,
}

impl DecisionMessage {
    /// Invoke-side message.
    pub fn invoke(method: Vec<String>, sc: Value, body: Map<String, Value>) -> Self {
        Self {
            kind: DecisionKind::Invoke,
            method,
            sc,
            body,
            invoke: None,
        }
    }

    /// Return-side message carrying the invoke decision it follows.
    pub fn ret(
        method: Vec<String>,
        sc: Value,
        body: Map<String, Value>,
        invoke_decision: &Decision,
    ) -> Self {
        Self {
            kind: DecisionKind::Return,
            method,
            sc,
            body,
            invoke: Some(serde_json::json!({
                "allowed": invoke_decision.allowed,
                "value": invoke_decision.value,
            })),
        }
    }
}

/// Outcome of one policy decision. Deny is data, not an error.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// True when the evaluated query came back `true`.
    pub allowed: bool,
    /// The raw evaluated value; `null` when the query was undefined.
    pub value: Value,
    /// The query that produced this decision.
    pub query: String,
}

impl Decision {
    /// Human-readable reason for a deny, for logs and caller reporting.
    pub fn deny_reason(&self) -> String {
        format!("query {} evaluated to {}", self.query, self.value)
    }
}

/// Evaluates decision messages against one compiled policy and data store.
#[derive(Debug, Clone)]
pub struct DecisionPoint {
    compilation: Compilation,
    store: Option<DecisionStore>,
    query: String,
}

impl DecisionPoint {
    /// Decision point evaluating `query` inside `compilation`.
    pub fn new(compilation: Compilation, query: impl Into<String>) -> Self {
        Self {
            compilation,
            store: None,
            query: query.into(),
        }
    }

    /// Attach the data store decisions read from, chainable.
    pub fn with_store(mut self, store: DecisionStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Evaluate one decision message.
    pub fn evaluate(&self, message: &DecisionMessage) -> PolicyResult<Decision> {
        let input = serde_json::to_value(message)
            .map_err(|e| PolicyError::Eval(format!("decision message marshaling failed: {e}")))?;

        let mut eval = Eval::new()
            .policy(self.compilation.clone())
            .input(input)
            .query(self.query.clone());
        if let Some(store) = &self.store {
            eval = eval.store(store.clone());
        }

        let outcomes = eval.eval(None)?;
        let outcome = outcomes
            .into_iter()
            .next()
            .ok_or_else(|| PolicyError::Eval("evaluation produced no outcome".to_string()))?;

        let decision = Decision {
            allowed: outcome.value == Value::Bool(true),
            value: outcome.value,
            query: outcome.query,
        };
        if decision.allowed {
            debug!(query = %decision.query, "policy decision: allow");
        } else {
            warn!(query = %decision.query, value = %decision.value, "policy decision: deny");
        }
        Ok(decision)
    }
}
