//! Loader capability trait and the precedence chain that selects one.
//!
//! A loader turns a file path into a cached artifact. Which loader runs for
//! a given path is decided by the chain in [`LoaderSet::resolve`], highest
//! precedence first:
//!
//! ```text
//! exact-path binding -> extension binding -> default loader -> raw bytes
//! ```
//!
//! Disabling the default loader cuts the chain after the extension step, so
//! unmatched paths fail instead of silently loading bytes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{ReloadError, Result};
use crate::value::Value;
use crate::watch::ResetHandle;

/// Context handed to every loader invocation.
///
/// Carries the scheduler's reset handle so a loader running mid-tick can ask
/// for the remaining checks of that tick to be abandoned (for example after
/// it mutated the set of watched files).
pub struct LoadContext {
    reset: ResetHandle,
}

impl LoadContext {
    pub(crate) fn new(reset: ResetHandle) -> Self {
        Self { reset }
    }

    /// A clonable handle onto the scheduler's reset flag.
    pub fn reset_handle(&self) -> ResetHandle {
        self.reset.clone()
    }

    /// Abort the in-progress tick's remaining checks and zero the cursor.
    pub fn request_reset(&self) {
        self.reset.request();
    }
}

/// Turns a path into an artifact.
///
/// `Ok(None)` means "loaded, intentionally nothing" - legal for module
/// loaders (the store substitutes the unit sentinel), an error for resource
/// loaders.
pub trait Loader: Send + Sync {
    fn load(&self, path: &Path, ctx: &LoadContext) -> Result<Option<Value>>;
}

impl std::fmt::Debug for dyn Loader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Loader")
    }
}

impl<F> Loader for F
where
    F: Fn(&Path, &LoadContext) -> Result<Option<Value>> + Send + Sync,
{
    fn load(&self, path: &Path, ctx: &LoadContext) -> Result<Option<Value>> {
        self(path, ctx)
    }
}

/// The built-in fallback loader: the file's raw bytes as `Arc<Vec<u8>>`.
#[derive(Debug, Default)]
pub struct RawBytes;

impl Loader for RawBytes {
    fn load(&self, path: &Path, _ctx: &LoadContext) -> Result<Option<Value>> {
        let bytes = std::fs::read(path).map_err(|e| ReloadError::Unreadable {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(Some(Arc::new(bytes)))
    }
}

/// The three loader tables plus the built-in fallback.
pub struct LoaderSet {
    by_path: HashMap<PathBuf, Arc<dyn Loader>>,
    by_ext: HashMap<String, Arc<dyn Loader>>,
    default: Option<Arc<dyn Loader>>,
    default_disabled: bool,
    raw: Arc<dyn Loader>,
}

impl LoaderSet {
    pub fn new() -> Self {
        Self {
            by_path: HashMap::new(),
            by_ext: HashMap::new(),
            default: None,
            default_disabled: false,
            raw: Arc::new(RawBytes),
        }
    }

    /// Walk the precedence chain for `path`.
    pub fn resolve(&self, path: &Path) -> Result<Arc<dyn Loader>> {
        if let Some(loader) = self.by_path.get(path) {
            return Ok(loader.clone());
        }
        if let Some(ext) = path.extension().and_then(|e| e.to_str())
            && let Some(loader) = self.by_ext.get(&ext.to_ascii_lowercase())
        {
            return Ok(loader.clone());
        }
        if let Some(loader) = &self.default {
            return Ok(loader.clone());
        }
        if self.default_disabled {
            return Err(ReloadError::NoLoaderAvailable {
                path: path.to_path_buf(),
            });
        }
        Ok(self.raw.clone())
    }

    /// Bind one loader to several extensions in one call, or unset them
    /// with `None`. Keys are validated before any of them is applied.
    pub fn set_extensions(&mut self, exts: &[&str], loader: Option<Arc<dyn Loader>>) -> Result<()> {
        let keys = Self::ext_keys(exts)?;
        for key in keys {
            match &loader {
                Some(l) => {
                    self.by_ext.insert(key, l.clone());
                }
                None => {
                    self.by_ext.remove(&key);
                }
            }
        }
        Ok(())
    }

    pub fn extension(&self, ext: &str) -> Option<Arc<dyn Loader>> {
        let key = ext.trim_start_matches('.').to_ascii_lowercase();
        self.by_ext.get(&key).cloned()
    }

    pub fn clear_extensions(&mut self) {
        self.by_ext.clear();
    }

    /// Bind one loader to several exact paths in one call, or unset them
    /// with `None`. Paths must already be normalized by the caller.
    pub fn set_paths(&mut self, paths: &[PathBuf], loader: Option<Arc<dyn Loader>>) -> Result<()> {
        if paths.is_empty() {
            return Err(ReloadError::InvalidArgument {
                reason: "no paths given".to_string(),
            });
        }
        for path in paths {
            match &loader {
                Some(l) => {
                    self.by_path.insert(path.clone(), l.clone());
                }
                None => {
                    self.by_path.remove(path);
                }
            }
        }
        Ok(())
    }

    pub fn path(&self, path: &Path) -> Option<Arc<dyn Loader>> {
        self.by_path.get(path).cloned()
    }

    pub fn clear_paths(&mut self) {
        self.by_path.clear();
    }

    /// Set or unset the process-wide default loader. Unsetting restores the
    /// raw-bytes fallback (and clears a previous disable).
    pub fn set_default(&mut self, loader: Option<Arc<dyn Loader>>) {
        self.default = loader;
        self.default_disabled = false;
    }

    pub fn default_loader(&self) -> Option<Arc<dyn Loader>> {
        self.default.clone()
    }

    /// Make resolution fail for any path not covered by a path or extension
    /// binding.
    pub fn disable_default(&mut self) {
        self.default = None;
        self.default_disabled = true;
    }

    fn ext_keys(exts: &[&str]) -> Result<Vec<String>> {
        if exts.is_empty() {
            return Err(ReloadError::InvalidArgument {
                reason: "no extensions given".to_string(),
            });
        }
        let mut keys = Vec::with_capacity(exts.len());
        for ext in exts {
            let key = ext.trim_start_matches('.').to_ascii_lowercase();
            if key.is_empty() {
                return Err(ReloadError::InvalidArgument {
                    reason: format!("empty extension in bind call: '{ext}'"),
                });
            }
            keys.push(key);
        }
        Ok(keys)
    }
}

impl Default for LoaderSet {
    fn default() -> Self {
        Self::new()
    }
}
