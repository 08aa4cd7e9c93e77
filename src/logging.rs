//! Unified logging for debug output, plus the user-facing log template.
//!
//! Provides compact timestamped logging with per-module level configuration.
//! Supports `RUST_LOG` environment variable for runtime overrides.
//!
//! # Configuration
//!
//! ```toml
//! [logging]
//! default = "warn"  # quiet by default
//!
//! [logging.modules]
//! store = "debug"   # enable store debug logs
//! ```
//!
//! # Environment Variable
//!
//! `RUST_LOG` takes precedence over config:
//! ```bash
//! RUST_LOG=debug my-host
//! RUST_LOG=store=debug,native=trace my-host
//! ```

use std::sync::Once;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;
use crate::error::{ReloadError, Result};

static INIT: Once = Once::new();

/// Compact time format: HH:MM:SS.mmm
struct CompactTime;

impl FormatTime for CompactTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%H:%M:%S%.3f"))
    }
}

/// Initialize logging with configuration.
///
/// Call once at startup. Safe to call multiple times (only first call takes effect).
///
/// Log levels control visibility:
/// - `error` - errors only (quietest)
/// - `warn` - errors + warnings (default, quiet operation)
/// - `info` - normal operation logs, including reload events
/// - `debug` - detailed debugging
/// - `trace` - everything
///
/// The `RUST_LOG` environment variable takes precedence over config settings.
pub fn init_with_config(config: &LoggingConfig) {
    INIT.call_once(|| {
        // RUST_LOG env var takes precedence over config
        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            // Build filter string from config
            let mut filter_str = config.default.clone();
            for (module, level) in &config.modules {
                filter_str.push_str(&format!(",{module}={level}"));
            }
            EnvFilter::new(&filter_str)
        };

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true) // Show target for filtering visibility
            .with_timer(CompactTime)
            .with_level(true)
            .with_filter(filter);

        tracing_subscriber::registry().with(fmt_layer).init();
    });
}

/// Initialize logging with default configuration.
///
/// Uses `LoggingConfig::default()` which sets `default = "warn"` for quiet
/// operation. Use `RUST_LOG=debug` for verbose output.
pub fn init() {
    init_with_config(&LoggingConfig::default());
}

/// Log an event with component context.
///
/// # Examples
/// ```ignore
/// log_event!("reload", "reloaded", "{}", path.display());
/// log_event!("native", "watching");
/// ```
#[macro_export]
macro_rules! log_event {
    ($component:expr, $event:expr) => {
        tracing::info!("[{}] {}", $component, $event)
    };
    ($component:expr, $event:expr, $($arg:tt)*) => {
        tracing::info!("[{}] {}: {}", $component, $event, format!($($arg)*))
    };
}

/// Debug-only event logging.
///
/// # Examples
/// ```ignore
/// debug_event!("native", "backend down, polling fallback");
/// ```
#[macro_export]
macro_rules! debug_event {
    ($component:expr, $event:expr) => {
        tracing::debug!("[{}] {}", $component, $event)
    };
    ($component:expr, $event:expr, $($arg:tt)*) => {
        tracing::debug!("[{}] {}: {}", $component, $event, format!($($arg)*))
    };
}

/// One parsed piece of a log template.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Message,
    Date,
    Time,
}

/// User-configurable template for messages emitted through `Store::log`.
///
/// Recognized directives: `%m` message, `%d` date (YYYY-MM-DD), `%t` time
/// (HH:MM:SS), `%%` literal percent. Anything else after a `%` is a
/// configuration error, caught at parse time rather than on every emit.
#[derive(Debug, Clone)]
pub struct LogFormat {
    template: String,
    segments: Vec<Segment>,
}

impl LogFormat {
    /// Parse a template, rejecting unknown directives.
    pub fn parse(template: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars();

        while let Some(c) = chars.next() {
            if c != '%' {
                literal.push(c);
                continue;
            }
            let directive = chars.next().ok_or_else(|| ReloadError::InvalidLogFormat {
                directive: "% at end of template".to_string(),
            })?;
            match directive {
                '%' => literal.push('%'),
                'm' | 'd' | 't' => {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(match directive {
                        'm' => Segment::Message,
                        'd' => Segment::Date,
                        _ => Segment::Time,
                    });
                }
                other => {
                    return Err(ReloadError::InvalidLogFormat {
                        directive: format!("%{other}"),
                    });
                }
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            template: template.to_string(),
            segments,
        })
    }

    /// The template string this format was parsed from.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Render a message through the template using the current local time.
    pub fn render(&self, message: &str) -> String {
        let now = chrono::Local::now();
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => out.push_str(s),
                Segment::Message => out.push_str(message),
                Segment::Date => out.push_str(&now.format("%Y-%m-%d").to_string()),
                Segment::Time => out.push_str(&now.format("%H:%M:%S").to_string()),
            }
        }
        out
    }
}

impl Default for LogFormat {
    fn default() -> Self {
        Self {
            template: "%d %t %m".to_string(),
            segments: vec![
                Segment::Date,
                Segment::Literal(" ".to_string()),
                Segment::Time,
                Segment::Literal(" ".to_string()),
                Segment::Message,
            ],
        }
    }
}
