//! Module-name to file-path resolution.
//!
//! Uses `Path` APIs instead of string concatenation where it matters so the
//! resolved paths behave across operating systems. The mapping from a module
//! name to its path is assumed immutable once resolved; renaming a module on
//! disk requires `unrequire` followed by a fresh `require`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{ReloadError, Result};

/// Resolves module names like `game.player` against an ordered list of path
/// templates, each containing one `?` marker.
///
/// Both outcomes are cached per name: hits so repeated requires are cheap,
/// misses so a missing module does not re-scan every template on each call.
pub struct ModulePathResolver {
    root: PathBuf,
    templates: Vec<String>,
    cache: HashMap<String, Option<PathBuf>>,
}

impl ModulePathResolver {
    pub fn new(root: impl Into<PathBuf>, templates: Vec<String>) -> Self {
        Self {
            root: root.into(),
            templates,
            cache: HashMap::new(),
        }
    }

    /// Map a module name to the first template path that names an existing
    /// file under the root.
    pub fn resolve(&mut self, name: &str) -> Result<PathBuf> {
        if let Some(cached) = self.cache.get(name) {
            return match cached {
                Some(path) => Ok(path.clone()),
                None => Err(self.not_found(name)),
            };
        }

        let slug = name.replace('.', "/");
        for template in &self.templates {
            let candidate = self.root.join(template.replace('?', &slug));
            if candidate.is_file() {
                self.cache.insert(name.to_string(), Some(candidate.clone()));
                return Ok(candidate);
            }
        }

        self.cache.insert(name.to_string(), None);
        Err(self.not_found(name))
    }

    /// Drop a name's cached resolution so the next `resolve` re-scans.
    ///
    /// Called on `unrequire`; a rename-then-require cycle depends on it.
    pub fn forget(&mut self, name: &str) {
        self.cache.remove(name);
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn not_found(&self, name: &str) -> ReloadError {
        ReloadError::ModuleNotFound {
            name: name.to_string(),
            tried: self.templates.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn resolver_over(dir: &TempDir) -> ModulePathResolver {
        ModulePathResolver::new(
            dir.path(),
            vec!["?.lua".to_string(), "?/init.lua".to_string()],
        )
    }

    #[test]
    fn test_resolve_flat_module() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("player.lua"), b"return {}").unwrap();

        let mut resolver = resolver_over(&dir);
        let path = resolver.resolve("player").unwrap();
        assert_eq!(path, dir.path().join("player.lua"));
    }

    #[test]
    fn test_namespace_separators_become_directories() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("game/enemies")).unwrap();
        fs::write(dir.path().join("game/enemies/slime.lua"), b"return {}").unwrap();

        let mut resolver = resolver_over(&dir);
        let path = resolver.resolve("game.enemies.slime").unwrap();
        assert_eq!(path, dir.path().join("game/enemies/slime.lua"));
    }

    #[test]
    fn test_template_order_wins() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("hud")).unwrap();
        fs::write(dir.path().join("hud.lua"), b"return 1").unwrap();
        fs::write(dir.path().join("hud/init.lua"), b"return 2").unwrap();

        let mut resolver = resolver_over(&dir);
        // First template (?.lua) matches before ?/init.lua.
        assert_eq!(resolver.resolve("hud").unwrap(), dir.path().join("hud.lua"));
    }

    #[test]
    fn test_not_found_is_cached() {
        let dir = TempDir::new().unwrap();
        let mut resolver = resolver_over(&dir);

        let err = resolver.resolve("ghost").unwrap_err();
        assert!(matches!(err, ReloadError::ModuleNotFound { tried: 2, .. }));

        // Creating the file afterwards does not help: the miss is cached.
        fs::write(dir.path().join("ghost.lua"), b"return {}").unwrap();
        assert!(resolver.resolve("ghost").is_err());

        // Until the name is forgotten.
        resolver.forget("ghost");
        assert!(resolver.resolve("ghost").is_ok());
    }

    #[test]
    fn test_hit_is_cached() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("ui.lua"), b"return {}").unwrap();

        let mut resolver = resolver_over(&dir);
        let first = resolver.resolve("ui").unwrap();

        // Deleting the file does not invalidate the cached mapping.
        fs::remove_file(dir.path().join("ui.lua")).unwrap();
        assert_eq!(resolver.resolve("ui").unwrap(), first);
    }
}
