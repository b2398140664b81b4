//! Logging facade shared by the sheetquery crates
//!
//! Output is controlled by the SHEETQ_LOG environment variable:
//! - SHEETQ_LOG=off (default) - no logs
//! - SHEETQ_LOG=error | warn - problems only
//! - SHEETQ_LOG=info - queries, invalidations, index creation
//! - SHEETQ_LOG=debug - cache traffic, compiled SQL, raw-path decisions

use std::sync::Once;

// Re-export emit so the macros resolve in dependent crates
pub use emit;

/// Environment variable read by [`init_diagnostics`]
pub const LOG_ENV: &str = "SHEETQ_LOG";

static INIT: Once = Once::new();

/// Map a SHEETQ_LOG value to a minimum level. `None` means logging stays off.
fn parse_level(value: &str) -> Option<emit::Level> {
    match value.trim().to_ascii_lowercase().as_str() {
        "off" | "" => None,
        "debug" => Some(emit::Level::Debug),
        "info" => Some(emit::Level::Info),
        "warn" => Some(emit::Level::Warn),
        "error" => Some(emit::Level::Error),
        _ => Some(emit::Level::Info),
    }
}

/// Initialize diagnostics from SHEETQ_LOG.
///
/// Safe to call more than once; only the first call configures emit.
pub fn init_diagnostics() {
    INIT.call_once(|| {
        let value = std::env::var(LOG_ENV).unwrap_or_else(|_| "off".to_string());
        let Some(level) = parse_level(&value) else {
            return;
        };

        let rt = emit::setup()
            .emit_to(emit_term::stderr())
            .emit_when(emit::level::min_filter(level))
            .init();

        // The runtime lives for the rest of the process
        std::mem::forget(rt);
    });
}

/// Routine operations: queries served, invalidations, indexes created
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::emit::info!($($arg)*)
    };
}

/// Detailed diagnostics: cache hits and misses, generated SQL
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::emit::debug!($($arg)*)
    };
}

/// Degraded but recoverable conditions
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::emit::warn!($($arg)*)
    };
}

/// Failures that abort the current request
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::emit::error!($($arg)*)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("off"), None);
        assert_eq!(parse_level(""), None);
        assert_eq!(parse_level("DEBUG"), Some(emit::Level::Debug));
        assert_eq!(parse_level("warn"), Some(emit::Level::Warn));
        // Unknown values fall back to info
        assert_eq!(parse_level("verbose"), Some(emit::Level::Info));
    }

    #[test]
    fn test_init_is_idempotent() {
        init_diagnostics();
        init_diagnostics();
    }
}
