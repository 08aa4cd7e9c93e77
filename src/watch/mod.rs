//! The watch-and-reload subsystem.
//!
//! # Architecture
//!
//! ```text
//! Store::tick(dt)
//!   - DirWatchSet polled first (non-blocking)
//!   |     signalled dirs -> entries marked pending_native
//!   - pending entries checked immediately
//!   - CheckState spreads the rest round-robin across the interval
//!         |
//!    +---------+----------+
//!    |         |          |
//! registry  scheduler  reload
//! (pools)   (cursor)   (isolated executor)
//! ```
//!
//! Entries covered by a live directory watch skip portable stat calls
//! entirely; the native signal decides when a check is worth making, and the
//! signature comparison still decides whether to reload.

mod native;
mod registry;
mod reload;
mod scheduler;

pub use native::{BackendError, NotifyBackend, NullBackend, WatchBackend};
pub use scheduler::ResetHandle;

pub(crate) use native::DirWatchSet;
pub(crate) use registry::{PoolKind, WatchEntry, WatchPools};
pub(crate) use reload::{invoke_loader, reload_if_changed};
pub(crate) use scheduler::CheckState;
