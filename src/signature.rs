//! Modification detection: "what is the current change-signature of this path".
//!
//! Two strategies, selected once at store construction:
//! - [`MtimeSource`] when the filesystem reports usable modification times.
//! - [`HeuristicSource`] when only the byte size is observable; a synthetic
//!   clock reading is minted whenever the size changes. A same-size content
//!   edit is invisible to this strategy. That is an accepted, documented
//!   limitation of the heuristic, not something to patch around.
//!
//! The scheduler only ever compares signatures for equality; it never
//! inspects their structure.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{ReloadError, Result};

/// An opaque, equality-comparable token for a file's observed modification
/// state at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signature {
    /// Authoritative last-modified timestamp.
    Modified(SystemTime),
    /// Byte size plus the synthetic clock reading minted when that size was
    /// first observed.
    Heuristic { size: u64, stamp: u64 },
}

/// Strategy for producing signatures.
///
/// Fails with [`ReloadError::Unreadable`] if the path cannot be stat'd,
/// which also makes a just-deleted file deterministically "unknown, don't
/// reload" rather than a spurious change.
pub trait SignatureSource: Send {
    fn signature_of(&mut self, path: &Path) -> Result<Signature>;
}

fn stat(path: &Path) -> Result<fs::Metadata> {
    fs::metadata(path).map_err(|e| ReloadError::Unreadable {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Authoritative strategy: the filesystem's own last-modified time.
#[derive(Debug, Default)]
pub struct MtimeSource;

impl SignatureSource for MtimeSource {
    fn signature_of(&mut self, path: &Path) -> Result<Signature> {
        let modified = stat(path)?.modified().map_err(|e| ReloadError::Unreadable {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(Signature::Modified(modified))
    }
}

/// Injected clock for [`HeuristicSource`]; returns milliseconds.
pub type Clock = Box<dyn FnMut() -> u64 + Send>;

fn wall_clock_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Fallback strategy for filesystems where only the byte size is reliable.
///
/// Remembers `(size, stamp)` per path. A differing (or first-seen) size
/// mints a new stamp from the clock; an unchanged size returns the
/// remembered signature.
pub struct HeuristicSource {
    seen: HashMap<PathBuf, (u64, u64)>,
    clock: Clock,
}

impl HeuristicSource {
    pub fn new() -> Self {
        Self::with_clock(Box::new(wall_clock_ms))
    }

    /// Use a caller-provided clock; tests inject a deterministic one.
    pub fn with_clock(clock: Clock) -> Self {
        Self {
            seen: HashMap::new(),
            clock,
        }
    }
}

impl Default for HeuristicSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SignatureSource for HeuristicSource {
    fn signature_of(&mut self, path: &Path) -> Result<Signature> {
        let size = stat(path)?.len();
        if let Some(&(seen_size, stamp)) = self.seen.get(path)
            && seen_size == size
        {
            return Ok(Signature::Heuristic { size, stamp });
        }
        let stamp = (self.clock)();
        self.seen.insert(path.to_path_buf(), (size, stamp));
        Ok(Signature::Heuristic { size, stamp })
    }
}

/// Pick the best available strategy for the hosting filesystem.
///
/// Probes whether metadata modification times are usable; falls back to the
/// size heuristic where they are not.
pub fn detect() -> Box<dyn SignatureSource> {
    match fs::metadata(".").and_then(|m| m.modified()) {
        Ok(_) => Box::new(MtimeSource),
        Err(_) => Box::new(HeuristicSource::new()),
    }
}
