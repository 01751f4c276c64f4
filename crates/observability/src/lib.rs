//! Tracing and logging (shared setup).

/// Initialize process-wide observability with defaults (`RUST_LOG`, JSON).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Initialize process-wide observability from explicit settings.
pub fn init_with(settings: &LogSettings) {
    tracing::init_with(settings);
}

/// Tracing configuration (filters, layers).
pub mod tracing;

pub use tracing::{LogFormat, LogSettings, ParseLogFormatError};
