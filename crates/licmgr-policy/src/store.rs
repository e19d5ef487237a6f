//! In-memory decision store: the `data` root policies evaluate against.
//!
//! A builder accumulates JSON subtrees keyed by `/`-separated mount paths;
//! `build()` merges them into a single document in one pass. Policies then
//! address a mount as `data.<mount>...`, e.g. `data.a.license.scope`.

use serde_json::{Map, Value};
use tracing::warn;

use crate::error::PolicyError;

/// Builder for a [`DecisionStore`]. Fluent; the first error latches, later
/// calls are no-ops and `build()` yields `None` until `clear_error()`.
#[derive(Debug, Default)]
pub struct DecisionStoreBuilder {
    mounts: Vec<(String, Value)>,
    last_error: Option<PolicyError>,
}

impl DecisionStoreBuilder {
    /// Empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Last latched error, if any.
    pub fn error(&self) -> Option<&PolicyError> {
        self.last_error.as_ref()
    }

    /// Clear the latched error, chainable.
    pub fn clear_error(&mut self) -> &mut Self {
        self.last_error = None;
        self
    }

    fn latch(&mut self, error: PolicyError) {
        warn!(category = error.category(), %error, "decision store builder latched error");
        if self.last_error.is_none() {
            self.last_error = Some(error);
        }
    }

    /// Mount a JSON document at `path` (`/`-separated). A repeated mount
    /// path latches an error.
    pub fn add(&mut self, path: impl Into<String>, data: Value) -> &mut Self {
        if self.last_error.is_some() {
            return self;
        }
        let path = path.into();
        if self.mounts.iter().any(|(existing, _)| *existing == path) {
            self.latch(PolicyError::Store(format!(
                "data already mounted at path {path:?}"
            )));
            return self;
        }
        self.mounts.push((path, data));
        self
    }

    /// Mount a JSON text document at `path`.
    pub fn add_json(&mut self, path: impl Into<String>, json: &str) -> &mut Self {
        if self.last_error.is_some() {
            return self;
        }
        match serde_json::from_str(json) {
            Ok(value) => self.add(path, value),
            Err(e) => {
                self.latch(PolicyError::Store(format!("mount is not valid JSON: {e}")));
                self
            }
        }
    }

    /// Merge all mounts into a store in a single pass. `None` when latched
    /// or when a mount collides inside the tree (the commit failure
    /// latches).
    pub fn build(&mut self) -> Option<DecisionStore> {
        if self.last_error.is_some() {
            return None;
        }

        let mut root = Map::new();
        for (path, data) in &self.mounts {
            if let Err(error) = merge_at(&mut root, path, data.clone()) {
                self.latch(error);
                return None;
            }
        }
        Some(DecisionStore {
            root: Value::Object(root),
        })
    }
}

/// Insert `data` under the `/`-separated `path` inside `root`.
fn merge_at(root: &mut Map<String, Value>, path: &str, data: Value) -> Result<(), PolicyError> {
    let mut segments = path.split('/').filter(|s| !s.is_empty()).peekable();
    if segments.peek().is_none() {
        return Err(PolicyError::Store("empty mount path".to_string()));
    }

    let mut node = root;
    loop {
        let segment = segments.next().expect("peeked non-empty");
        if segments.peek().is_none() {
            if node.contains_key(segment) {
                return Err(PolicyError::Store(format!(
                    "mount path {path:?} collides with existing data"
                )));
            }
            node.insert(segment.to_string(), data);
            return Ok(());
        }

        let child = node
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        node = match child.as_object_mut() {
            Some(object) => object,
            None => {
                return Err(PolicyError::Store(format!(
                    "mount path {path:?} crosses a non-object node"
                )))
            }
        };
    }
}

/// Immutable merged data document.
#[derive(Debug, Clone)]
pub struct DecisionStore {
    root: Value,
}

impl DecisionStore {
    /// The merged `data` document.
    pub fn as_json(&self) -> &Value {
        &self.root
    }
}
