//! Error types for load, reload, and scheduling operations.

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by explicit store operations.
///
/// Scheduler-driven background reloads never propagate these; they are
/// logged and the previously cached value is retained.
#[derive(Error, Debug)]
pub enum ReloadError {
    #[error("no path template matches module '{name}' ({tried} templates tried)")]
    ModuleNotFound { name: String, tried: usize },

    #[error("no loader available for {path} (default loader disabled)")]
    NoLoaderAvailable { path: PathBuf },

    #[error("cannot read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("loader failed for {path}: {reason}")]
    LoaderFailed { path: PathBuf, reason: String },

    #[error("loader produced no value for {path}")]
    LoaderReturnedNothing { path: PathBuf },

    #[error("unrecognized log format directive '{directive}'")]
    InvalidLogFormat { directive: String },

    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },
}

pub type Result<T> = std::result::Result<T, ReloadError>;
