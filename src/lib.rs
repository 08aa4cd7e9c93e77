pub mod config;
pub mod error;
pub mod loader;
pub mod logging;
pub mod resolve;
pub mod signature;
pub mod store;
pub mod value;
pub mod watch;

pub use config::{LoggingConfig, Settings};
pub use error::{ReloadError, Result};
pub use loader::{LoadContext, Loader, LoaderSet, RawBytes};
pub use logging::LogFormat;
pub use resolve::ModulePathResolver;
pub use signature::{HeuristicSource, MtimeSource, Signature, SignatureSource};
pub use store::{Store, StoreBuilder};
pub use value::Value;
pub use watch::{BackendError, NotifyBackend, NullBackend, ResetHandle, WatchBackend};
