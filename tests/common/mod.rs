//! Shared fixtures: a scriptable signature oracle and counting loaders.
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rekindle::watch::{BackendError, WatchBackend};
use rekindle::{LoadContext, Loader, ReloadError, Result, Signature, SignatureSource, Value};

/// Deterministic oracle keyed by file name.
///
/// Tests "edit" a file by bumping its version and "delete" it by removing
/// the entry; query counts expose exactly how often the scheduler consulted
/// the oracle for each path.
#[derive(Clone, Default)]
pub struct FakeSignatures {
    versions: Arc<Mutex<HashMap<String, u64>>>,
    queries: Arc<Mutex<HashMap<String, u64>>>,
}

fn name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl FakeSignatures {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a file at the given version.
    pub fn set(&self, name: &str, version: u64) {
        self.versions
            .lock()
            .unwrap()
            .insert(name.to_string(), version);
    }

    /// Simulate an edit: bump the scripted version.
    pub fn bump(&self, name: &str) {
        let mut versions = self.versions.lock().unwrap();
        *versions.entry(name.to_string()).or_insert(0) += 1;
    }

    /// Simulate deletion: the oracle reports the path unreadable.
    pub fn remove(&self, name: &str) {
        self.versions.lock().unwrap().remove(name);
    }

    /// How many times the scheduler asked about this file.
    pub fn query_count(&self, name: &str) -> u64 {
        self.queries.lock().unwrap().get(name).copied().unwrap_or(0)
    }
}

impl SignatureSource for FakeSignatures {
    fn signature_of(&mut self, path: &Path) -> Result<Signature> {
        let name = name_of(path);
        *self.queries.lock().unwrap().entry(name.clone()).or_insert(0) += 1;
        match self.versions.lock().unwrap().get(&name) {
            Some(&version) => Ok(Signature::Heuristic {
                size: 0,
                stamp: version,
            }),
            None => Err(ReloadError::Unreadable {
                path: path.to_path_buf(),
                source: std::io::Error::other("not scripted"),
            }),
        }
    }
}

/// A loader that counts invocations and yields a tagged string.
pub fn counting_loader(tag: &str) -> (Arc<dyn Loader>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let tag = tag.to_string();
    let loader: Arc<dyn Loader> = Arc::new(
        move |_path: &Path, _ctx: &LoadContext| -> Result<Option<Value>> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Some(Arc::new(tag.clone())))
        },
    );
    (loader, calls)
}

/// A loader that succeeds until `fail_after` invocations have happened,
/// then errors on every call.
pub fn flaky_loader(fail_after: usize) -> (Arc<dyn Loader>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let loader: Arc<dyn Loader> = Arc::new(
        move |path: &Path, _ctx: &LoadContext| -> Result<Option<Value>> {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if n > fail_after {
                Err(ReloadError::LoaderFailed {
                    path: path.to_path_buf(),
                    reason: format!("scripted failure on call {n}"),
                })
            } else {
                Ok(Some(Arc::new(n)))
            }
        },
    );
    (loader, calls)
}

pub fn as_string(value: &Value) -> String {
    rekindle::value::downcast::<String>(value)
        .cloned()
        .expect("value holds a String")
}

/// Scriptable watch backend: registrations are recorded, events are queued
/// by the test, and the whole thing can be flipped dead.
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    pub registered: Arc<Mutex<Vec<PathBuf>>>,
    pub unregistered: Arc<Mutex<Vec<PathBuf>>>,
    pub events: Arc<Mutex<Vec<PathBuf>>>,
    pub dead: Arc<Mutex<bool>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a "something changed at this path" event.
    pub fn signal(&self, path: impl Into<PathBuf>) {
        self.events.lock().unwrap().push(path.into());
    }

    pub fn kill(&self) {
        *self.dead.lock().unwrap() = true;
    }
}

impl WatchBackend for ScriptedBackend {
    fn register(&mut self, dir: &Path) -> std::result::Result<(), BackendError> {
        self.registered.lock().unwrap().push(dir.to_path_buf());
        Ok(())
    }

    fn unregister(&mut self, dir: &Path) {
        self.unregistered.lock().unwrap().push(dir.to_path_buf());
    }

    fn drain(&mut self) -> std::result::Result<Vec<PathBuf>, BackendError> {
        if *self.dead.lock().unwrap() {
            return Err(BackendError("scripted death".to_string()));
        }
        Ok(std::mem::take(&mut *self.events.lock().unwrap()))
    }
}
