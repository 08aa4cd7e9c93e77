//! The store: registration, caching, and the per-tick reload pump.
//!
//! All state lives on an explicit instance so independent stores can coexist
//! (and tests never share globals). Work only ever happens inside the
//! caller's `tick` invocation; there is no background thread and no timer.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Settings;
use crate::debug_event;
use crate::error::{ReloadError, Result};
use crate::loader::{LoadContext, Loader, LoaderSet};
use crate::logging::LogFormat;
use crate::resolve::ModulePathResolver;
use crate::signature::{self, SignatureSource};
use crate::value::{self, Value};
use crate::watch::{
    CheckState, DirWatchSet, NotifyBackend, PoolKind, ResetHandle, WatchBackend, WatchEntry,
    WatchPools, invoke_loader, reload_if_changed,
};

/// Loader used by `monitor` registrations: a no-op that invokes the user
/// callback as a side effect of the signature change.
struct MonitorLoader {
    on_change: Box<dyn Fn(&Path) + Send + Sync>,
}

impl Loader for MonitorLoader {
    fn load(&self, path: &Path, _ctx: &LoadContext) -> Result<Option<Value>> {
        (self.on_change)(path);
        Ok(Some(value::unit()))
    }
}

/// Hot-reload store for live resources and modules.
///
/// Resources are keyed by path, modules by name (resolved through the
/// configured path templates). Registered entries are re-checked across
/// `tick` calls so that every watched file is visited roughly once per
/// checking interval, with native directory watches short-circuiting the
/// polling where the platform provides them.
pub struct Store {
    root: PathBuf,
    allow_external: bool,
    loaders: LoaderSet,
    resolver: ModulePathResolver,
    source: Box<dyn SignatureSource>,
    pools: WatchPools,
    state: CheckState,
    reset: ResetHandle,
    native: DirWatchSet,
    log_format: LogFormat,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("root", &self.root)
            .field("allow_external", &self.allow_external)
            .finish_non_exhaustive()
    }
}

impl Store {
    /// A store over the current directory with default settings.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    pub fn with_settings(settings: Settings) -> Result<Self> {
        Self::builder().settings(settings).build()
    }

    pub fn builder() -> StoreBuilder {
        StoreBuilder::new()
    }

    /// The canonicalized root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Total watched entries across both pools.
    pub fn watched_count(&self) -> usize {
        self.pools.len()
    }

    // ---- resources ------------------------------------------------------

    /// Load a resource through the loader chain, or return the cached value
    /// if the path is already registered.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<Value> {
        let abs = self.resource_path(path.as_ref())?;
        self.load_abs(abs)
    }

    /// Bind `loader` to this exact path (highest chain precedence), then
    /// load. Equivalent to `set_path_loader` for one path followed by
    /// `load`.
    pub fn load_with(&mut self, path: impl AsRef<Path>, loader: Arc<dyn Loader>) -> Result<Value> {
        let abs = self.resource_path(path.as_ref())?;
        self.loaders
            .set_paths(std::slice::from_ref(&abs), Some(loader))?;
        self.load_abs(abs)
    }

    fn load_abs(&mut self, abs: PathBuf) -> Result<Value> {
        let id = abs.display().to_string();
        if let Some(entry) = self.pools.resources.get(&id) {
            return Ok(entry.value.clone());
        }
        let ctx = LoadContext::new(self.reset.clone());
        let fresh = invoke_loader(&abs, None, PoolKind::Resource, &self.loaders, &ctx)?;
        self.register_resource(id, fresh.clone(), abs, None);
        Ok(fresh)
    }

    /// Drop a resource. Idempotent: returns whether anything was removed.
    pub fn unload(&mut self, path: impl AsRef<Path>) -> bool {
        let Ok(abs) = self.resource_path(path.as_ref()) else {
            return false;
        };
        let id = abs.display().to_string();
        match self.pools.resources.shift_remove(&id) {
            Some(entry) => {
                if let Some(dir) = entry.native_dir {
                    self.native.detach(&dir);
                }
                true
            }
            None => false,
        }
    }

    /// Register a resource with a caller-supplied value, invoking no loader.
    /// A no-op if the path is already registered.
    pub fn preload(&mut self, path: impl AsRef<Path>, value: Value) -> Result<()> {
        let abs = self.resource_path(path.as_ref())?;
        let id = abs.display().to_string();
        if self.pools.resources.contains_key(&id) {
            return Ok(());
        }
        self.register_resource(id, value, abs, None);
        Ok(())
    }

    /// `preload`, additionally binding `loader` to the exact path for later
    /// reloads.
    pub fn preload_with(
        &mut self,
        path: impl AsRef<Path>,
        value: Value,
        loader: Arc<dyn Loader>,
    ) -> Result<()> {
        let abs = self.resource_path(path.as_ref())?;
        self.loaders
            .set_paths(std::slice::from_ref(&abs), Some(loader))?;
        let id = abs.display().to_string();
        if self.pools.resources.contains_key(&id) {
            return Ok(());
        }
        self.register_resource(id, value, abs, None);
        Ok(())
    }

    pub fn has_loaded(&self, path: impl AsRef<Path>) -> bool {
        self.resource_path(path.as_ref())
            .map(|abs| {
                self.pools
                    .resources
                    .contains_key(&abs.display().to_string())
            })
            .unwrap_or(false)
    }

    /// Watch a path for changes without caching anything: `on_change` runs
    /// whenever the file's signature moves. Extra user data rides in the
    /// closure capture.
    pub fn monitor(
        &mut self,
        path: impl AsRef<Path>,
        on_change: impl Fn(&Path) + Send + Sync + 'static,
    ) -> Result<()> {
        let abs = self.resource_path(path.as_ref())?;
        let id = abs.display().to_string();
        if self.pools.resources.contains_key(&id) {
            return Ok(());
        }
        let loader: Arc<dyn Loader> = Arc::new(MonitorLoader {
            on_change: Box::new(on_change),
        });
        self.register_resource(id, value::unit(), abs, Some(loader));
        Ok(())
    }

    fn register_resource(
        &mut self,
        id: String,
        value: Value,
        abs: PathBuf,
        own_loader: Option<Arc<dyn Loader>>,
    ) {
        let mut entry = WatchEntry::new(id.clone(), value, abs);
        entry.signature = self.source.signature_of(&entry.source_path).ok();
        entry.own_loader = own_loader;
        entry.native_dir = self.native.attach(&entry.source_path);
        self.pools.resources.insert(id, entry);
    }

    // ---- modules --------------------------------------------------------

    /// Load a module by name through the path templates, or return the
    /// cached value if the name is already registered.
    pub fn require(&mut self, name: &str) -> Result<Value> {
        if let Some(entry) = self.pools.modules.get(name) {
            return Ok(entry.value.clone());
        }
        let path = self.resolver.resolve(name)?;
        let ctx = LoadContext::new(self.reset.clone());
        let fresh = invoke_loader(&path, None, PoolKind::Module, &self.loaders, &ctx)?;
        self.register_module(name.to_string(), fresh.clone(), path);
        Ok(fresh)
    }

    /// Drop a module and its cached path resolution. Idempotent.
    pub fn unrequire(&mut self, name: &str) -> bool {
        match self.pools.modules.shift_remove(name) {
            Some(entry) => {
                if let Some(dir) = entry.native_dir {
                    self.native.detach(&dir);
                }
                self.resolver.forget(name);
                true
            }
            None => false,
        }
    }

    /// Register a module with a caller-supplied value, invoking no loader.
    /// The name must still resolve to a file (that file is what gets
    /// watched). A no-op if the name is already registered.
    pub fn prerequire(&mut self, name: &str, value: Value) -> Result<()> {
        if self.pools.modules.contains_key(name) {
            return Ok(());
        }
        let path = self.resolver.resolve(name)?;
        self.register_module(name.to_string(), value, path);
        Ok(())
    }

    pub fn has_required(&self, name: &str) -> bool {
        self.pools.modules.contains_key(name)
    }

    fn register_module(&mut self, name: String, value: Value, path: PathBuf) {
        let mut entry = WatchEntry::new(name.clone(), value, path);
        entry.signature = self.source.signature_of(&entry.source_path).ok();
        entry.native_dir = self.native.attach(&entry.source_path);
        self.pools.modules.insert(name, entry);
    }

    // ---- loader tables --------------------------------------------------

    /// Bind one loader to several extensions in one call; `None` unsets.
    pub fn set_loader(&mut self, extensions: &[&str], loader: Option<Arc<dyn Loader>>) -> Result<()> {
        self.loaders.set_extensions(extensions, loader)
    }

    pub fn loader_for(&self, extension: &str) -> Option<Arc<dyn Loader>> {
        self.loaders.extension(extension)
    }

    pub fn clear_loaders(&mut self) {
        self.loaders.clear_extensions();
    }

    /// Bind one loader to several exact paths in one call; `None` unsets.
    pub fn set_path_loader(&mut self, paths: &[&str], loader: Option<Arc<dyn Loader>>) -> Result<()> {
        if paths.is_empty() {
            return Err(ReloadError::InvalidArgument {
                reason: "no paths given".to_string(),
            });
        }
        let mut normalized = Vec::with_capacity(paths.len());
        for path in paths {
            normalized.push(self.resource_path(Path::new(path))?);
        }
        self.loaders.set_paths(&normalized, loader)
    }

    pub fn path_loader(&self, path: impl AsRef<Path>) -> Option<Arc<dyn Loader>> {
        let abs = self.resource_path(path.as_ref()).ok()?;
        self.loaders.path(&abs)
    }

    pub fn clear_path_loaders(&mut self) {
        self.loaders.clear_paths();
    }

    pub fn set_default_loader(&mut self, loader: Option<Arc<dyn Loader>>) {
        self.loaders.set_default(loader);
    }

    pub fn default_loader(&self) -> Option<Arc<dyn Loader>> {
        self.loaders.default_loader()
    }

    /// Make the chain fail with `NoLoaderAvailable` for any path not
    /// covered by a path or extension binding.
    pub fn disable_default_loader(&mut self) {
        self.loaders.disable_default();
    }

    // ---- scheduling -----------------------------------------------------

    /// Advance the scheduler by `delta` seconds of host time.
    ///
    /// Polls the native watch layer first, services entries its directories
    /// signalled, then walks the amortized round-robin cursor. Honors the
    /// reset handle after every single-path check.
    pub fn tick(&mut self, delta: f64) {
        self.poll_native();

        let ctx = LoadContext::new(self.reset.clone());

        // Native signals are serviced ahead of the round-robin so a burst of
        // edits in a watched directory is not left waiting on cursor luck.
        let total = self.pools.len();
        for index in 0..total {
            let Some((kind, entry)) = self.pools.get_index_mut(index) else {
                continue;
            };
            if !entry.pending_native {
                continue;
            }
            entry.pending_native = false;
            reload_if_changed(entry, kind, &self.loaders, self.source.as_mut(), &ctx);
            if self.reset.take() {
                self.state.reset();
                return;
            }
        }

        let count = self.pools.len();
        let plan = self.state.plan(delta, count);
        for _ in 0..plan.due {
            let index = self.state.next_index(plan.slice, count);
            if let Some((kind, entry)) = self.pools.get_index_mut(index) {
                // Natively covered and quiet: the directory signal decides
                // when a stat is worth making.
                if entry.native_dir.is_none() || entry.pending_native {
                    entry.pending_native = false;
                    reload_if_changed(entry, kind, &self.loaders, self.source.as_mut(), &ctx);
                }
            }
            if self.reset.take() {
                self.state.reset();
                return;
            }
        }
        self.state.finish(plan, count);
    }

    fn poll_native(&mut self) {
        match self.native.poll() {
            Ok(dirs) => {
                if dirs.is_empty() {
                    return;
                }
                for entry in self.pools.iter_mut() {
                    if let Some(dir) = &entry.native_dir
                        && dirs.contains(dir)
                    {
                        entry.pending_native = true;
                    }
                }
            }
            Err(e) => {
                debug_event!("native", "backend failed, falling back to polling", "{e}");
                self.native.teardown();
                for entry in self.pools.iter_mut() {
                    entry.native_dir = None;
                    entry.pending_native = false;
                }
            }
        }
    }

    /// Time budget (seconds) to check every watched path exactly once.
    pub fn set_checking_interval(&mut self, seconds: f64) -> Result<()> {
        if !seconds.is_finite() || seconds <= 0.0 {
            return Err(ReloadError::InvalidArgument {
                reason: format!("checking interval must be positive, got {seconds}"),
            });
        }
        self.state.set_interval(seconds);
        Ok(())
    }

    pub fn checking_interval(&self) -> f64 {
        self.state.interval()
    }

    /// Zero the accumulated time and the round-robin cursor.
    pub fn reset_checking_state(&mut self) {
        self.state.reset();
    }

    /// Handle for requesting a reset from inside a loader running mid-tick.
    pub fn reset_handle(&self) -> ResetHandle {
        self.reset.clone()
    }

    // ---- policy / logging / teardown ------------------------------------

    /// Permit or reject absolute paths outside the store root.
    pub fn allow_external_paths(&mut self, allow: bool) {
        self.allow_external = allow;
    }

    pub fn is_allowing_external_paths(&self) -> bool {
        self.allow_external
    }

    /// Template for `log`: `%m` message, `%d` date, `%t` time, `%%` percent.
    pub fn set_log_format(&mut self, template: &str) -> Result<()> {
        self.log_format = LogFormat::parse(template)?;
        Ok(())
    }

    pub fn log_format(&self) -> &str {
        self.log_format.template()
    }

    /// Emit a message through the configured template.
    pub fn log(&self, message: &str) {
        tracing::info!("{}", self.log_format.render(message));
    }

    /// Release every native registration exactly once. Watched entries stay
    /// registered and fall back to portable polling. Safe with zero
    /// watchers; callable repeatedly.
    pub fn cleanup(&mut self) {
        self.native.release_all();
        for entry in self.pools.iter_mut() {
            entry.native_dir = None;
            entry.pending_native = false;
        }
    }

    // ---- internal -------------------------------------------------------

    fn resource_path(&self, path: &Path) -> Result<PathBuf> {
        if path.is_absolute() {
            if !self.allow_external && !path.starts_with(&self.root) {
                return Err(ReloadError::InvalidArgument {
                    reason: format!("absolute path outside the store root: {}", path.display()),
                });
            }
            Ok(path.to_path_buf())
        } else {
            Ok(self.root.join(path))
        }
    }
}

/// Builder for a [`Store`], with seams for tests and embedders: a custom
/// signature source and a custom watch backend.
pub struct StoreBuilder {
    settings: Settings,
    source: Option<Box<dyn SignatureSource>>,
    backend: Option<Box<dyn WatchBackend>>,
}

impl StoreBuilder {
    pub fn new() -> Self {
        Self {
            settings: Settings::default(),
            source: None,
            backend: None,
        }
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.settings.root = root.into();
        self
    }

    pub fn checking_interval(mut self, seconds: f64) -> Self {
        self.settings.checking_interval = seconds;
        self
    }

    pub fn module_templates(mut self, templates: Vec<String>) -> Self {
        self.settings.module_templates = templates;
        self
    }

    /// Replace the auto-detected signature strategy.
    pub fn signature_source(mut self, source: impl SignatureSource + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Replace the platform watch backend.
    pub fn backend(mut self, backend: impl WatchBackend + 'static) -> Self {
        self.backend = Some(Box::new(backend));
        self
    }

    pub fn build(self) -> Result<Store> {
        let settings = self.settings;

        if !settings.checking_interval.is_finite() || settings.checking_interval <= 0.0 {
            return Err(ReloadError::InvalidArgument {
                reason: format!(
                    "checking interval must be positive, got {}",
                    settings.checking_interval
                ),
            });
        }
        let log_format = LogFormat::parse(&settings.log_format)?;
        let root = settings
            .root
            .canonicalize()
            .map_err(|e| ReloadError::Unreadable {
                path: settings.root.clone(),
                source: e,
            })?;

        let native = match self.backend {
            Some(backend) => DirWatchSet::new(backend),
            None if settings.native_watch => match NotifyBackend::new() {
                Ok(backend) => DirWatchSet::new(Box::new(backend)),
                Err(e) => {
                    debug_event!("native", "backend unavailable", "{e}");
                    DirWatchSet::disabled()
                }
            },
            None => DirWatchSet::disabled(),
        };

        let resolver = ModulePathResolver::new(root.clone(), settings.module_templates.clone());

        Ok(Store {
            root,
            allow_external: settings.allow_external_paths,
            loaders: LoaderSet::new(),
            resolver,
            source: self.source.unwrap_or_else(signature::detect),
            pools: WatchPools::default(),
            state: CheckState::new(settings.checking_interval),
            reset: ResetHandle::default(),
            native,
            log_format,
        })
    }
}

impl Default for StoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watch::NullBackend;
    use std::fs;
    use tempfile::TempDir;

    fn store_over(dir: &TempDir) -> Store {
        Store::builder()
            .root(dir.path())
            .backend(NullBackend)
            .build()
            .unwrap()
    }

    #[test]
    fn test_external_paths_rejected_by_default() {
        let dir = TempDir::new().unwrap();
        let mut store = store_over(&dir);

        let err = store.load("/etc/hostname").unwrap_err();
        assert!(matches!(err, ReloadError::InvalidArgument { .. }));
        assert!(!store.is_allowing_external_paths());

        store.allow_external_paths(true);
        assert!(store.is_allowing_external_paths());
        // Now only readability decides.
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("x.bin"), b"x").unwrap();
        assert!(
            store
                .load(outside.path().canonicalize().unwrap().join("x.bin"))
                .is_ok()
        );
    }

    #[test]
    fn test_invalid_interval_rejected() {
        let dir = TempDir::new().unwrap();
        let mut store = store_over(&dir);
        assert!(store.set_checking_interval(0.0).is_err());
        assert!(store.set_checking_interval(-1.0).is_err());
        assert!(store.set_checking_interval(f64::NAN).is_err());
        assert!(store.set_checking_interval(0.5).is_ok());
        assert_eq!(store.checking_interval(), 0.5);
    }

    #[test]
    fn test_builder_rejects_bad_settings() {
        let dir = TempDir::new().unwrap();
        let mut settings = Settings::default();
        settings.root = dir.path().to_path_buf();
        settings.checking_interval = 0.0;
        assert!(Store::with_settings(settings.clone()).is_err());

        settings.checking_interval = 1.0;
        settings.log_format = "%q".to_string();
        assert!(Store::with_settings(settings).is_err());
    }

    #[test]
    fn test_missing_root_is_unreadable() {
        let dir = TempDir::new().unwrap();
        let gone = dir.path().join("nope");
        let err = Store::builder().root(gone).build().unwrap_err();
        assert!(matches!(err, ReloadError::Unreadable { .. }));
    }

    #[test]
    fn test_cleanup_with_zero_watchers() {
        let dir = TempDir::new().unwrap();
        let mut store = store_over(&dir);
        store.cleanup();
        store.cleanup();
        assert_eq!(store.watched_count(), 0);
    }

    #[test]
    fn test_log_format_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut store = store_over(&dir);
        assert_eq!(store.log_format(), "%d %t %m");
        store.set_log_format("[hot] %m").unwrap();
        assert_eq!(store.log_format(), "[hot] %m");
        assert!(store.set_log_format("%z").is_err());
        // A rejected template leaves the previous one in place.
        assert_eq!(store.log_format(), "[hot] %m");
    }
}
