//! Failure-isolated reload of a single watch entry.
//!
//! A background reload must never destabilize the host loop: loader panics
//! and loader errors are both caught here, logged distinctly, and leave the
//! previously cached value untouched. The entry's signature advances either
//! way, so a file that fails to load is not retried every tick; it is
//! retried only the next time its signature changes again.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::sync::Arc;

use crate::error::{ReloadError, Result};
use crate::loader::{LoadContext, Loader, LoaderSet};
use crate::signature::SignatureSource;
use crate::value::{self, Value};
use crate::{debug_event, log_event};

use super::registry::{PoolKind, WatchEntry};

/// What a single-entry check did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReloadOutcome {
    /// Signature unchanged; nothing happened.
    Unchanged,
    /// Signature changed and the loader produced a fresh value.
    Reloaded,
    /// Signature changed but the loader failed; old value retained.
    Failed,
    /// The path could not be stat'd; treated as "unknown, don't reload".
    Unknown,
}

/// Invoke the loader chain for `path` under failure isolation.
///
/// The entry-scoped loader (when present) outranks the table-driven chain.
/// Panics become [`ReloadError::LoaderFailed`] with a panic-flavored reason
/// so the two failure modes stay distinguishable in logs.
pub(crate) fn invoke_loader(
    path: &Path,
    own_loader: Option<&Arc<dyn Loader>>,
    kind: PoolKind,
    loaders: &LoaderSet,
    ctx: &LoadContext,
) -> Result<Value> {
    let loader = match own_loader {
        Some(loader) => loader.clone(),
        None => loaders.resolve(path)?,
    };

    let outcome = catch_unwind(AssertUnwindSafe(|| loader.load(path, ctx)));
    match outcome {
        Ok(Ok(Some(value))) => Ok(value),
        Ok(Ok(None)) => match kind {
            PoolKind::Module => Ok(value::unit()),
            PoolKind::Resource => Err(ReloadError::LoaderReturnedNothing {
                path: path.to_path_buf(),
            }),
        },
        Ok(Err(e)) => Err(e),
        Err(payload) => Err(ReloadError::LoaderFailed {
            path: path.to_path_buf(),
            reason: format!("panic: {}", panic_message(payload.as_ref())),
        }),
    }
}

/// Check one entry against the oracle and reload it if its signature moved.
pub(crate) fn reload_if_changed(
    entry: &mut WatchEntry,
    kind: PoolKind,
    loaders: &LoaderSet,
    source: &mut dyn SignatureSource,
    ctx: &LoadContext,
) -> ReloadOutcome {
    let current = match source.signature_of(&entry.source_path) {
        Ok(signature) => signature,
        Err(e) => {
            debug_event!(
                "reload",
                "signature unavailable",
                "{}: {e}",
                entry.source_path.display()
            );
            return ReloadOutcome::Unknown;
        }
    };

    if entry.signature == Some(current) {
        return ReloadOutcome::Unchanged;
    }

    let result = invoke_loader(
        &entry.source_path,
        entry.own_loader.as_ref(),
        kind,
        loaders,
        ctx,
    );
    entry.signature = Some(current);

    match result {
        Ok(fresh) => {
            entry.value = fresh;
            log_event!("reload", "reloaded", "{}", entry.id);
            ReloadOutcome::Reloaded
        }
        Err(e) => {
            tracing::warn!("[reload] keeping previous value for {}: {e}", entry.id);
            ReloadOutcome::Failed
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "opaque panic payload"
    }
}
