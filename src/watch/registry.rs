//! Watch entry records and the two ordered pools that hold them.

use std::path::PathBuf;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::loader::Loader;
use crate::signature::Signature;
use crate::value::Value;

/// Which pool an entry lives in; decides the "loader produced nothing"
/// semantics during reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PoolKind {
    Module,
    Resource,
}

/// One watched module or resource.
pub(crate) struct WatchEntry {
    /// Key within the owning pool; stable for the entry's lifetime.
    pub id: String,
    /// Current cached artifact; replaced atomically on successful reload.
    pub value: Value,
    /// Concrete file backing the entry.
    pub source_path: PathBuf,
    /// Last observed modification signature.
    pub signature: Option<Signature>,
    /// Directory key of the native watch covering the parent directory;
    /// `None` means portable polling only.
    pub native_dir: Option<PathBuf>,
    /// Set by the native layer when the covering directory signalled.
    pub pending_native: bool,
    /// Entry-scoped loader (used by monitor registrations); sits above the
    /// table-driven chain so clearing loader tables cannot repurpose it.
    pub own_loader: Option<Arc<dyn Loader>>,
}

impl WatchEntry {
    pub fn new(id: String, value: Value, source_path: PathBuf) -> Self {
        Self {
            id,
            value,
            source_path,
            signature: None,
            native_dir: None,
            pending_native: false,
            own_loader: None,
        }
    }
}

/// The module pool and the resource pool, indexed as one logical sequence
/// [modules..., resources...] for the scheduler's cursor.
#[derive(Default)]
pub(crate) struct WatchPools {
    pub modules: IndexMap<String, WatchEntry>,
    pub resources: IndexMap<String, WatchEntry>,
}

impl WatchPools {
    pub fn len(&self) -> usize {
        self.modules.len() + self.resources.len()
    }

    /// Index into the combined sequence.
    pub fn get_index_mut(&mut self, index: usize) -> Option<(PoolKind, &mut WatchEntry)> {
        let module_count = self.modules.len();
        if index < module_count {
            self.modules
                .get_index_mut(index)
                .map(|(_, entry)| (PoolKind::Module, entry))
        } else {
            self.resources
                .get_index_mut(index - module_count)
                .map(|(_, entry)| (PoolKind::Resource, entry))
        }
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut WatchEntry> {
        self.modules
            .values_mut()
            .chain(self.resources.values_mut())
    }
}
