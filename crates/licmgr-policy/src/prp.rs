//! Policy retrieval points: pluggable sources of policy modules.
//!
//! A PRP supplies module text to a [`crate::PolicyContext`]. Sources range
//! from an embedded map over filesystem directories to remote stores; this
//! module ships the embedded and filesystem implementations, remote PRPs
//! implement the trait in their own crate. A PRP that can mutate MUST fire
//! its change callback on every add, remove and replace it observes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{PolicyError, PolicyResult};

/// Kind of change a mutable PRP observed in its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrpChange {
    /// A module appeared in the source.
    ModuleAdded,
    /// A module disappeared from the source.
    ModuleRemoved,
    /// A module's text changed.
    ModuleReplaced,
}

/// Callback invoked with the module name and the change kind.
pub type PrpChangeCallback = Arc<dyn Fn(&str, PrpChange) + Send + Sync>;

/// A source of policy modules.
#[async_trait]
pub trait PolicyRetrievalPoint: Send + Sync {
    /// Whether one instance may be shared by several contexts. Typically
    /// true for static sources loaded at creation.
    fn is_shareable(&self) -> bool;

    /// Whether the module set may change after `initialize`.
    fn can_mutate(&self) -> bool;

    /// Whether modules come from a remote data source rather than embedded
    /// or filesystem data.
    fn has_remote_data_source(&self) -> bool;

    /// One-time setup. Must not have been called before. Implementations
    /// that mutate retain `on_change` and fire it for every later change.
    async fn initialize(
        &self,
        cancel: &CancellationToken,
        on_change: Option<PrpChangeCallback>,
    ) -> PolicyResult<()>;

    /// Names of all modules in this PRP's domain. With `force`, sources
    /// that load dynamically re-scan before answering.
    async fn module_names(&self, cancel: &CancellationToken, force: bool)
        -> PolicyResult<Vec<String>>;

    /// A module by name, try-loading it when the source supports dynamic
    /// loading. `None` when the module cannot be found.
    async fn module(&self, cancel: &CancellationToken, name: &str) -> PolicyResult<Option<String>>;

    /// Unload the named modules, where supported. Only meaningful on PRPs
    /// that can mutate.
    async fn evict_modules(&self, names: &[String]);

    /// All modules this PRP manages. With `force` a full re-scan is done,
    /// which may be expensive on large sources.
    async fn all_modules(
        &self,
        cancel: &CancellationToken,
        force: bool,
    ) -> PolicyResult<BTreeMap<String, String>>;

    /// Cooperative tick for PRPs that cannot run background work. Mutation
    /// detection happens here.
    async fn process(&self, cancel: &CancellationToken) -> PolicyResult<()>;
}

/// PRP over a fixed, embedded module map.
#[derive(Debug, Clone, Default)]
pub struct EmbeddedPrp {
    modules: BTreeMap<String, String>,
}

impl EmbeddedPrp {
    /// PRP serving exactly `modules`.
    pub fn new(modules: BTreeMap<String, String>) -> Self {
        Self { modules }
    }
}

#[async_trait]
impl PolicyRetrievalPoint for EmbeddedPrp {
    fn is_shareable(&self) -> bool {
        true
    }

    fn can_mutate(&self) -> bool {
        false
    }

    fn has_remote_data_source(&self) -> bool {
        false
    }

    async fn initialize(
        &self,
        _cancel: &CancellationToken,
        _on_change: Option<PrpChangeCallback>,
    ) -> PolicyResult<()> {
        debug!(modules = self.modules.len(), "embedded PRP initialized");
        Ok(())
    }

    async fn module_names(
        &self,
        _cancel: &CancellationToken,
        _force: bool,
    ) -> PolicyResult<Vec<String>> {
        Ok(self.modules.keys().cloned().collect())
    }

    async fn module(
        &self,
        _cancel: &CancellationToken,
        name: &str,
    ) -> PolicyResult<Option<String>> {
        Ok(self.modules.get(name).cloned())
    }

    async fn evict_modules(&self, _names: &[String]) {}

    async fn all_modules(
        &self,
        _cancel: &CancellationToken,
        _force: bool,
    ) -> PolicyResult<BTreeMap<String, String>> {
        Ok(self.modules.clone())
    }

    async fn process(&self, _cancel: &CancellationToken) -> PolicyResult<()> {
        Ok(())
    }
}

/// PRP over `*.rego` files in one directory. Module names are file stems.
///
/// The directory may change underneath us; [`PolicyRetrievalPoint::process`]
/// re-scans, updates the loaded set and fires the change callback for every
/// difference.
pub struct DirectoryPrp {
    dir: PathBuf,
    loaded: RwLock<BTreeMap<String, String>>,
    on_change: RwLock<Option<PrpChangeCallback>>,
}

impl DirectoryPrp {
    /// PRP scanning `dir` for `*.rego` modules.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            loaded: RwLock::new(BTreeMap::new()),
            on_change: RwLock::new(None),
        }
    }

    async fn scan(&self, cancel: &CancellationToken) -> PolicyResult<BTreeMap<String, String>> {
        if cancel.is_cancelled() {
            return Err(PolicyError::Cancelled("policy directory scan".to_string()));
        }
        let mut found = BTreeMap::new();
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| PolicyError::Configuration(format!("policy directory unreadable: {e}")))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PolicyError::Configuration(format!("policy directory unreadable: {e}")))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("rego") {
                continue;
            }
            let Some(name) = module_name(&path) else {
                continue;
            };
            let source = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| PolicyError::Configuration(format!("module unreadable: {e}")))?;
            found.insert(name, source);
        }
        Ok(found)
    }
}

fn module_name(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_owned)
}

#[async_trait]
impl PolicyRetrievalPoint for DirectoryPrp {
    fn is_shareable(&self) -> bool {
        false
    }

    fn can_mutate(&self) -> bool {
        true
    }

    fn has_remote_data_source(&self) -> bool {
        false
    }

    async fn initialize(
        &self,
        cancel: &CancellationToken,
        on_change: Option<PrpChangeCallback>,
    ) -> PolicyResult<()> {
        *self.on_change.write().await = on_change;
        let found = self.scan(cancel).await?;
        info!(dir = %self.dir.display(), modules = found.len(), "directory PRP initialized");
        *self.loaded.write().await = found;
        Ok(())
    }

    async fn module_names(
        &self,
        cancel: &CancellationToken,
        force: bool,
    ) -> PolicyResult<Vec<String>> {
        if force {
            self.process(cancel).await?;
        }
        Ok(self.loaded.read().await.keys().cloned().collect())
    }

    async fn module(&self, cancel: &CancellationToken, name: &str) -> PolicyResult<Option<String>> {
        if let Some(source) = self.loaded.read().await.get(name) {
            return Ok(Some(source.clone()));
        }
        // Not loaded yet: try the file directly.
        if cancel.is_cancelled() {
            return Err(PolicyError::Cancelled("module load".to_string()));
        }
        let path = self.dir.join(format!("{name}.rego"));
        match tokio::fs::read_to_string(&path).await {
            Ok(source) => {
                self.loaded
                    .write()
                    .await
                    .insert(name.to_string(), source.clone());
                Ok(Some(source))
            }
            Err(_) => Ok(None),
        }
    }

    async fn evict_modules(&self, names: &[String]) {
        let mut loaded = self.loaded.write().await;
        for name in names {
            loaded.remove(name);
        }
    }

    async fn all_modules(
        &self,
        cancel: &CancellationToken,
        force: bool,
    ) -> PolicyResult<BTreeMap<String, String>> {
        if force {
            self.process(cancel).await?;
        }
        Ok(self.loaded.read().await.clone())
    }

    async fn process(&self, cancel: &CancellationToken) -> PolicyResult<()> {
        let found = self.scan(cancel).await?;
        let mut loaded = self.loaded.write().await;
        let callback = self.on_change.read().await.clone();

        let notify = |name: &str, change: PrpChange| {
            if let Some(callback) = &callback {
                callback(name, change);
            }
        };

        for (name, source) in &found {
            match loaded.get(name) {
                None => notify(name, PrpChange::ModuleAdded),
                Some(previous) if previous != source => {
                    notify(name, PrpChange::ModuleReplaced);
                }
                Some(_) => {}
            }
        }
        for name in loaded.keys() {
            if !found.contains_key(name) {
                notify(name, PrpChange::ModuleRemoved);
            }
        }

        *loaded = found;
        Ok(())
    }
}

impl std::fmt::Debug for DirectoryPrp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryPrp").field("dir", &self.dir).finish()
    }
}
