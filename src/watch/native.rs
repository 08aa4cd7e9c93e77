//! Native directory-watch plumbing.
//!
//! One OS change-notification registration per distinct parent directory
//! that has at least one watcher, reference-counted and released the moment
//! the count reaches zero. The directory signal does not say *which* file
//! changed; it only tells the scheduler when a stat is worth the trouble, so
//! a signalled entry still goes through signature comparison before any
//! reload happens. Native support is a performance optimization, never a
//! correctness requirement: any unrecoverable backend failure tears the set
//! down and every entry silently falls back to portable polling.

use std::fmt;
use std::path::{Path, PathBuf};

use crossbeam_channel::{Receiver, TryRecvError, unbounded};
use indexmap::IndexMap;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::debug_event;

/// Why a backend call failed. Only ever logged at debug level.
#[derive(Debug)]
pub struct BackendError(pub String);

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Platform seam for directory change notification.
///
/// Two implementations ship with the crate: [`NotifyBackend`] over the OS
/// notification APIs, and [`NullBackend`] for platforms or hosts where
/// native watching is unavailable. The scheduler is fully correct, just
/// less efficient, with only the stub.
pub trait WatchBackend: Send {
    /// Register interest in a directory. `Err` means native watching is not
    /// available for it and the caller should poll instead.
    fn register(&mut self, dir: &Path) -> Result<(), BackendError>;

    /// Release a directory registration. Infallible by contract: a handle
    /// that cannot be released cleanly is already gone.
    fn unregister(&mut self, dir: &Path);

    /// Drain paths signalled since the last call. Non-blocking. `Err` means
    /// the backend died and the whole set must fall back to polling.
    fn drain(&mut self) -> Result<Vec<PathBuf>, BackendError>;
}

/// Real backend over `notify`'s recommended per-platform watcher.
///
/// Events arrive on an internal channel and are drained non-blockingly each
/// tick; nothing runs outside the caller's `tick` invocation.
pub struct NotifyBackend {
    watcher: RecommendedWatcher,
    rx: Receiver<notify::Result<Event>>,
}

impl NotifyBackend {
    pub fn new() -> Result<Self, BackendError> {
        let (tx, rx) = unbounded();
        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.send(res);
        })
        .map_err(|e| BackendError(e.to_string()))?;
        Ok(Self { watcher, rx })
    }
}

impl WatchBackend for NotifyBackend {
    fn register(&mut self, dir: &Path) -> Result<(), BackendError> {
        self.watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|e| BackendError(e.to_string()))
    }

    fn unregister(&mut self, dir: &Path) {
        let _ = self.watcher.unwatch(dir);
    }

    fn drain(&mut self) -> Result<Vec<PathBuf>, BackendError> {
        let mut paths = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(Ok(event)) => {
                    // Write and size changes only; removals surface through
                    // the oracle as unreadable paths.
                    if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                        paths.extend(event.paths);
                    }
                }
                Ok(Err(e)) => return Err(BackendError(e.to_string())),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    return Err(BackendError("event channel disconnected".to_string()));
                }
            }
        }
        Ok(paths)
    }
}

/// The always-unavailable stub: registration is refused, so every entry
/// stays on portable polling.
#[derive(Debug, Default)]
pub struct NullBackend;

impl WatchBackend for NullBackend {
    fn register(&mut self, _dir: &Path) -> Result<(), BackendError> {
        Err(BackendError("native watching unavailable".to_string()))
    }

    fn unregister(&mut self, _dir: &Path) {}

    fn drain(&mut self) -> Result<Vec<PathBuf>, BackendError> {
        Ok(Vec::new())
    }
}

/// One ref-counted directory registration.
#[derive(Debug)]
pub(crate) struct DirWatch {
    pub watcher_count: usize,
}

/// The set of live directory watches over one backend.
pub(crate) struct DirWatchSet {
    backend: Option<Box<dyn WatchBackend>>,
    dirs: IndexMap<PathBuf, DirWatch>,
}

impl DirWatchSet {
    pub fn new(backend: Box<dyn WatchBackend>) -> Self {
        Self {
            backend: Some(backend),
            dirs: IndexMap::new(),
        }
    }

    /// A set with no backend at all; every attach is refused.
    pub fn disabled() -> Self {
        Self {
            backend: None,
            dirs: IndexMap::new(),
        }
    }

    /// Attach a file to the watch covering its parent directory, creating
    /// the registration on first use. Returns the directory key, or `None`
    /// when the file must fall back to portable polling.
    pub fn attach(&mut self, file: &Path) -> Option<PathBuf> {
        let backend = self.backend.as_mut()?;

        let parent = file.parent()?;
        let dir = if parent.as_os_str().is_empty() {
            PathBuf::from(".")
        } else {
            parent.to_path_buf()
        };

        if let Some(watch) = self.dirs.get_mut(&dir) {
            watch.watcher_count += 1;
            return Some(dir);
        }

        match backend.register(&dir) {
            Ok(()) => {
                debug_event!("native", "watching", "{}", dir.display());
                self.dirs.insert(dir.clone(), DirWatch { watcher_count: 1 });
                Some(dir)
            }
            Err(e) => {
                debug_event!("native", "register refused", "{}: {e}", dir.display());
                None
            }
        }
    }

    /// Drop one reference to a directory watch; the registration is
    /// released exactly once, when the count reaches zero.
    pub fn detach(&mut self, dir: &Path) {
        let Some(watch) = self.dirs.get_mut(dir) else {
            return;
        };
        watch.watcher_count -= 1;
        if watch.watcher_count == 0 {
            self.dirs.shift_remove(dir);
            if let Some(backend) = self.backend.as_mut() {
                backend.unregister(dir);
            }
            debug_event!("native", "released", "{}", dir.display());
        }
    }

    /// Drain the backend and map signalled paths onto watched directories.
    /// `Err` means the backend died; the caller tears the set down.
    pub fn poll(&mut self) -> Result<Vec<PathBuf>, BackendError> {
        let Some(backend) = self.backend.as_mut() else {
            return Ok(Vec::new());
        };
        let paths = backend.drain()?;
        if paths.is_empty() {
            return Ok(Vec::new());
        }

        let mut signalled = Vec::new();
        for path in paths {
            let dir = if self.dirs.contains_key(&path) {
                path
            } else {
                match path.parent() {
                    Some(parent) => parent.to_path_buf(),
                    None => continue,
                }
            };
            if self.dirs.contains_key(&dir) && !signalled.contains(&dir) {
                signalled.push(dir);
            }
        }
        Ok(signalled)
    }

    /// Release every registration, keeping the backend for later reuse.
    /// Safe with zero watches; callable repeatedly.
    pub fn release_all(&mut self) {
        if let Some(backend) = self.backend.as_mut() {
            for dir in self.dirs.keys() {
                backend.unregister(dir);
            }
        }
        self.dirs.clear();
    }

    /// Release everything and drop the backend; used after a fatal backend
    /// error. Attaches are refused from here on.
    pub fn teardown(&mut self) {
        self.release_all();
        self.backend = None;
    }

    #[cfg(test)]
    pub fn is_active(&self) -> bool {
        self.backend.is_some()
    }

    #[cfg(test)]
    pub fn dir_count(&self) -> usize {
        self.dirs.len()
    }

    #[cfg(test)]
    pub fn watcher_count(&self, dir: &Path) -> usize {
        self.dirs.get(dir).map_or(0, |w| w.watcher_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records register/unregister calls and replays queued events.
    #[derive(Default)]
    struct RecordingBackend {
        registered: Arc<Mutex<Vec<PathBuf>>>,
        unregistered: Arc<Mutex<Vec<PathBuf>>>,
        queued: Arc<Mutex<Vec<PathBuf>>>,
        dead: bool,
    }

    impl WatchBackend for RecordingBackend {
        fn register(&mut self, dir: &Path) -> Result<(), BackendError> {
            self.registered.lock().unwrap().push(dir.to_path_buf());
            Ok(())
        }

        fn unregister(&mut self, dir: &Path) {
            self.unregistered.lock().unwrap().push(dir.to_path_buf());
        }

        fn drain(&mut self) -> Result<Vec<PathBuf>, BackendError> {
            if self.dead {
                return Err(BackendError("dead".to_string()));
            }
            Ok(std::mem::take(&mut *self.queued.lock().unwrap()))
        }
    }

    #[test]
    fn test_refcount_one_registration_per_directory() {
        let backend = RecordingBackend::default();
        let registered = backend.registered.clone();

        let mut set = DirWatchSet::new(Box::new(backend));
        let dir_a = set.attach(Path::new("/assets/a.png")).unwrap();
        let dir_b = set.attach(Path::new("/assets/b.png")).unwrap();
        assert_eq!(dir_a, dir_b);
        assert_eq!(registered.lock().unwrap().len(), 1);
        assert_eq!(set.watcher_count(Path::new("/assets")), 2);
    }

    #[test]
    fn test_release_exactly_once_at_zero() {
        let backend = RecordingBackend::default();
        let unregistered = backend.unregistered.clone();

        let mut set = DirWatchSet::new(Box::new(backend));
        let dir = set.attach(Path::new("/assets/a.png")).unwrap();
        set.attach(Path::new("/assets/b.png")).unwrap();

        set.detach(&dir);
        assert!(unregistered.lock().unwrap().is_empty());
        set.detach(&dir);
        assert_eq!(
            unregistered.lock().unwrap().as_slice(),
            &[PathBuf::from("/assets")]
        );
        assert_eq!(set.dir_count(), 0);
    }

    #[test]
    fn test_poll_maps_file_events_to_directories() {
        let backend = RecordingBackend::default();
        let queued = backend.queued.clone();

        let mut set = DirWatchSet::new(Box::new(backend));
        set.attach(Path::new("/assets/a.png")).unwrap();

        queued
            .lock()
            .unwrap()
            .push(PathBuf::from("/assets/whatever.txt"));
        queued.lock().unwrap().push(PathBuf::from("/elsewhere/x"));

        let signalled = set.poll().unwrap();
        assert_eq!(signalled, vec![PathBuf::from("/assets")]);
    }

    #[test]
    fn test_dead_backend_surfaces_for_teardown() {
        let mut backend = RecordingBackend::default();
        backend.dead = true;
        let mut set = DirWatchSet::new(Box::new(backend));
        set.attach(Path::new("/assets/a.png")).unwrap();

        assert!(set.poll().is_err());
        set.teardown();
        assert!(!set.is_active());
        assert!(set.attach(Path::new("/assets/a.png")).is_none());
        // Polling a torn-down set is a quiet no-op.
        assert!(set.poll().unwrap().is_empty());
    }

    #[test]
    fn test_release_all_is_idempotent() {
        let backend = RecordingBackend::default();
        let unregistered = backend.unregistered.clone();

        let mut set = DirWatchSet::new(Box::new(backend));
        set.attach(Path::new("/assets/a.png")).unwrap();
        set.release_all();
        set.release_all();
        assert_eq!(unregistered.lock().unwrap().len(), 1);
        assert!(set.is_active());
    }

    #[test]
    fn test_null_backend_refuses_everything() {
        let mut set = DirWatchSet::new(Box::new(NullBackend));
        assert!(set.attach(Path::new("/assets/a.png")).is_none());
        assert_eq!(set.dir_count(), 0);
        assert!(set.poll().unwrap().is_empty());
    }

    #[test]
    fn test_disabled_set_refuses_everything() {
        let mut set = DirWatchSet::disabled();
        assert!(set.attach(Path::new("/assets/a.png")).is_none());
        assert!(set.poll().unwrap().is_empty());
        set.release_all();
    }
}
