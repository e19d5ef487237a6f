//! Policy context: module registry, compilation cache and sub-contexts.
//!
//! Contexts form a tree through an immutable parent pointer. Module lookup
//! cascades up the parents; compilation lookup does not, so a child may
//! shadow a parent's compilation by re-using its cache name. The first
//! error latches per context and every subsequent fluent call is a no-op
//! until `clear_error()`.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{PolicyError, PolicyResult};
use crate::prp::PolicyRetrievalPoint;
use crate::store::DecisionStore;

/// A named, cached set of compiled policy modules.
///
/// Cheap to clone and share; `policy(name)` hands out the same underlying
/// compilation on every call.
#[derive(Debug, Clone)]
pub struct Compilation {
    inner: Arc<CompiledModules>,
}

#[derive(Debug)]
struct CompiledModules {
    name: String,
    modules: BTreeMap<String, String>,
}

impl Compilation {
    /// Compile `modules` into a named compilation.
    ///
    /// The sources are parsed and compiled eagerly so diagnostics surface
    /// here, not at evaluation time.
    pub fn compile(name: impl Into<String>, modules: BTreeMap<String, String>) -> PolicyResult<Self> {
        let name = name.into();
        let mut engine = regorus::Engine::new();
        for (module_name, source) in &modules {
            engine
                .add_policy(module_name.clone(), source.clone())
                .map_err(|e| PolicyError::Compile(format!("module {module_name}: {e}")))?;
        }
        debug!(compilation = %name, modules = modules.len(), "compiled module set");
        Ok(Self {
            inner: Arc::new(CompiledModules { name, modules }),
        })
    }

    /// The cache name this compilation was stored under.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The module sources that make up this compilation.
    pub fn modules(&self) -> &BTreeMap<String, String> {
        &self.inner.modules
    }

    /// True when both handles refer to the same cached compilation.
    pub fn same_as(&self, other: &Compilation) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Fresh engine loaded with this compilation's modules.
    ///
    /// Compilation already validated the sources, so failures here are
    /// engine-internal and mapped to [`PolicyError::Compile`].
    pub(crate) fn engine(&self) -> PolicyResult<regorus::Engine> {
        let mut engine = regorus::Engine::new();
        for (module_name, source) in &self.inner.modules {
            engine
                .add_policy(module_name.clone(), source.clone())
                .map_err(|e| PolicyError::Compile(format!("module {module_name}: {e}")))?;
        }
        Ok(engine)
    }
}

/// Result of one query inside an evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutcome {
    /// The query text as submitted, e.g. `data.example.allow_create`.
    pub query: String,
    /// The evaluated value; `null` when the query was undefined.
    pub value: serde_json::Value,
}

/// One policy evaluation: a compilation, an optional data store, an input
/// document and one or more queries.
#[derive(Debug, Default, Clone)]
pub struct Eval {
    compilation: Option<Compilation>,
    store: Option<DecisionStore>,
    input: Option<serde_json::Value>,
    queries: Vec<String>,
}

impl Eval {
    /// Empty evaluation; configure it with the chainable setters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `compilation` for this evaluation, chainable.
    pub fn policy(mut self, compilation: Compilation) -> Self {
        self.compilation = Some(compilation);
        self
    }

    /// Evaluate against `store` as the `data` root, chainable.
    pub fn store(mut self, store: DecisionStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the `input` document, chainable.
    pub fn input(mut self, input: serde_json::Value) -> Self {
        self.input = Some(input);
        self
    }

    /// Set the `input` document from JSON text.
    pub fn input_json(self, json: &str) -> PolicyResult<Self> {
        let value = serde_json::from_str(json)
            .map_err(|e| PolicyError::Eval(format!("input is not valid JSON: {e}")))?;
        Ok(self.input(value))
    }

    /// Add a query, chainable. Queries evaluate in insertion order.
    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.queries.push(query.into());
        self
    }

    /// Run the evaluation synchronously.
    ///
    /// Cancellation is honoured at the granularity the engine supports:
    /// checked on entry, after which evaluation runs to completion.
    pub fn eval(&self, cancel: Option<&CancellationToken>) -> PolicyResult<Vec<QueryOutcome>> {
        if let Some(cancel) = cancel {
            if cancel.is_cancelled() {
                return Err(PolicyError::Cancelled("policy evaluation".to_string()));
            }
        }
        let compilation = self
            .compilation
            .as_ref()
            .ok_or_else(|| PolicyError::Configuration("evaluation has no policy".to_string()))?;
        if self.queries.is_empty() {
            return Err(PolicyError::Configuration(
                "evaluation has no query".to_string(),
            ));
        }

        let mut engine = compilation.engine()?;

        if let Some(store) = &self.store {
            let data = regorus::Value::from_json_str(&store.as_json().to_string())
                .map_err(|e| PolicyError::Store(format!("store rejected by engine: {e}")))?;
            engine
                .add_data(data)
                .map_err(|e| PolicyError::Store(format!("store rejected by engine: {e}")))?;
        }

        if let Some(input) = &self.input {
            let input = regorus::Value::from_json_str(&input.to_string())
                .map_err(|e| PolicyError::Eval(format!("input rejected by engine: {e}")))?;
            engine.set_input(input);
        }

        let mut outcomes = Vec::with_capacity(self.queries.len());
        for query in &self.queries {
            let results = engine
                .eval_query(query.clone(), false)
                .map_err(|e| PolicyError::Eval(format!("query {query}: {e}")))?;
            let value = results
                .result
                .first()
                .and_then(|r| r.expressions.first())
                .map(|expression| {
                    serde_json::to_value(&expression.value).map_err(|e| {
                        PolicyError::Eval(format!("result marshaling failed: {e}"))
                    })
                })
                .transpose()?
                .unwrap_or(serde_json::Value::Null);
            outcomes.push(QueryOutcome {
                query: query.clone(),
                value,
            });
        }
        Ok(outcomes)
    }
}

/// Registry of policy modules and named compilations, with parent-chain
/// override semantics.
pub struct PolicyContext {
    parent: Option<Arc<PolicyContext>>,
    modules: RwLock<HashMap<String, String>>,
    compiled: RwLock<HashMap<String, Compilation>>,
    prps: RwLock<Vec<Arc<dyn PolicyRetrievalPoint>>>,
    last_error: RwLock<Option<PolicyError>>,
}

impl PolicyContext {
    /// Fresh root context.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            parent: None,
            modules: RwLock::new(HashMap::new()),
            compiled: RwLock::new(HashMap::new()),
            prps: RwLock::new(Vec::new()),
            last_error: RwLock::new(None),
        })
    }

    /// Last latched error, if any.
    pub fn error(&self) -> Option<PolicyError> {
        self.last_error.read().expect("error lock").clone()
    }

    /// Clear the latched error, chainable.
    pub fn clear_error(&self) -> &Self {
        *self.last_error.write().expect("error lock") = None;
        self
    }

    fn latched(&self) -> bool {
        self.last_error.read().expect("error lock").is_some()
    }

    fn latch(&self, error: PolicyError) {
        warn!(category = error.category(), %error, "policy context latched error");
        let mut slot = self.last_error.write().expect("error lock");
        if slot.is_none() {
            *slot = Some(error);
        }
    }

    /// The parent context; `None` at the root.
    pub fn parent(&self) -> Option<&Arc<PolicyContext>> {
        self.parent.as_ref()
    }

    /// Child context with fresh module and compilation maps. Module lookup
    /// falls back to this context; compilation lookup does not.
    ///
    /// When latched, the current context is returned unchanged.
    pub fn create_sub_context(self: &Arc<Self>) -> Arc<PolicyContext> {
        if self.latched() {
            return Arc::clone(self);
        }
        Arc::new(PolicyContext {
            parent: Some(Arc::clone(self)),
            modules: RwLock::new(HashMap::new()),
            compiled: RwLock::new(HashMap::new()),
            prps: RwLock::new(Vec::new()),
            last_error: RwLock::new(None),
        })
    }

    /// Register a single named module, chainable. A repeated name latches.
    pub fn register_module(&self, name: impl Into<String>, source: impl Into<String>) -> &Self {
        if self.latched() {
            return self;
        }
        let name = name.into();
        let mut modules = self.modules.write().expect("modules lock");
        if modules.contains_key(&name) {
            drop(modules);
            self.latch(PolicyError::Configuration(format!(
                "module {name} already registered"
            )));
            return self;
        }
        modules.insert(name, source.into());
        self
    }

    /// Register a batch of modules, chainable. Duplicates latch but the
    /// remaining entries still register.
    pub fn register_modules(&self, batch: BTreeMap<String, String>) -> &Self {
        if self.latched() {
            return self;
        }
        let mut duplicate: Option<String> = None;
        {
            let mut modules = self.modules.write().expect("modules lock");
            for (name, source) in batch {
                if modules.contains_key(&name) {
                    duplicate.get_or_insert(name);
                } else {
                    modules.insert(name, source);
                }
            }
        }
        if let Some(name) = duplicate {
            self.latch(PolicyError::Configuration(format!(
                "module {name} already registered"
            )));
        }
        self
    }

    /// Register retrieval points and initialize each, chainable. The
    /// change callbacks are wired by the PRP itself.
    pub async fn register_prps(
        &self,
        cancel: &CancellationToken,
        prps: Vec<Arc<dyn PolicyRetrievalPoint>>,
    ) -> &Self {
        if self.latched() {
            return self;
        }
        for prp in prps {
            if let Err(error) = prp.initialize(cancel, None).await {
                self.latch(error);
                return self;
            }
            self.prps.write().expect("prps lock").push(prp);
        }
        self
    }

    /// Pull every module the registered PRPs offer into this context,
    /// chainable. PRP modules never override an explicit registration and
    /// never latch on overlap.
    pub async fn load_prp_modules(&self, cancel: &CancellationToken, force: bool) -> &Self {
        if self.latched() {
            return self;
        }
        let prps: Vec<_> = self.prps.read().expect("prps lock").clone();
        for prp in prps {
            match prp.all_modules(cancel, force).await {
                Ok(batch) => {
                    let mut modules = self.modules.write().expect("modules lock");
                    for (name, source) in batch {
                        modules.entry(name).or_insert(source);
                    }
                }
                Err(error) => {
                    self.latch(error);
                    return self;
                }
            }
        }
        self
    }

    /// Resolve a module in this context, then up the parent chain.
    fn resolve_module(&self, name: &str) -> Option<String> {
        if let Some(source) = self.modules.read().expect("modules lock").get(name) {
            return Some(source.clone());
        }
        self.parent
            .as_ref()
            .and_then(|parent| parent.resolve_module(name))
    }

    /// Compile the named modules into a cached compilation, chainable.
    ///
    /// Resolution is argument order, each name searched locally first and
    /// then up the parent chain. An unresolved name, a re-used cache name
    /// or a compile diagnostic latches.
    pub fn compile_module_set(&self, cache_name: &str, module_names: &[&str]) -> &Self {
        if self.latched() {
            return self;
        }
        if self
            .compiled
            .read()
            .expect("compiled lock")
            .contains_key(cache_name)
        {
            self.latch(PolicyError::Configuration(format!(
                "compiled policy {cache_name} already present"
            )));
            return self;
        }

        let mut modules = BTreeMap::new();
        for name in module_names {
            match self.resolve_module(name) {
                Some(source) => {
                    modules.insert((*name).to_string(), source);
                }
                None => {
                    self.latch(PolicyError::Configuration(format!(
                        "could not find module {name} while compiling"
                    )));
                    return self;
                }
            }
        }

        match Compilation::compile(cache_name, modules) {
            Ok(compilation) => {
                info!(compilation = cache_name, "cached compiled policy");
                self.compiled
                    .write()
                    .expect("compiled lock")
                    .insert(cache_name.to_string(), compilation);
            }
            Err(error) => self.latch(error),
        }
        self
    }

    /// The compilation cached under `cache_name`, or `None` with a latched
    /// error. Parents are deliberately not consulted - a child context
    /// shadows by compiling under the same name.
    pub fn policy(&self, cache_name: &str) -> Option<Compilation> {
        if self.latched() {
            return None;
        }
        let compilation = self
            .compiled
            .read()
            .expect("compiled lock")
            .get(cache_name)
            .cloned();
        if compilation.is_none() {
            self.latch(PolicyError::Configuration(format!(
                "compiled policy {cache_name} does not exist"
            )));
        }
        compilation
    }

    /// Evaluator factory. The returned [`Eval`] is configured with the
    /// chainable setters and run with [`Eval::eval`].
    pub fn new_eval(&self) -> Eval {
        Eval::new()
    }
}

impl std::fmt::Debug for PolicyContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyContext")
            .field("modules", &self.modules.read().expect("modules lock").len())
            .field(
                "compilations",
                &self.compiled.read().expect("compiled lock").len(),
            )
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}
