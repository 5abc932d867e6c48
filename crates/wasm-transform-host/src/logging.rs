//! Logging host function implementation.
//!
//! Guest log lines are:
//! 1. Emitted via `tracing`, tagged with the module identifier
//! 2. Buffered in the [`GuestContext`] for the caller's transform report

use tracing::{debug, error, info, warn};
use wasm_transform_core::{GuestContext, LogLevel};

/// Host implementation of the guest logging capability.
pub struct LoggingHost;

impl LoggingHost {
    /// Log a message at the specified level.
    pub fn log(ctx: &mut GuestContext, level: LogLevel, message: String) {
        let module = ctx.module_id();
        match level {
            LogLevel::Debug => debug!(module, guest_log = true, "{}", message),
            LogLevel::Info => info!(module, guest_log = true, "{}", message),
            LogLevel::Warn => warn!(module, guest_log = true, "{}", message),
            LogLevel::Error => error!(module, guest_log = true, "{}", message),
        }

        if !ctx.log(level, message) && ctx.dropped_logs() == 1 {
            warn!(module = ctx.module_id(), "Guest log buffer full; dropping lines");
        }
    }
}

/// Convert a numeric log level to [`LogLevel`].
///
/// Unknown values default to [`LogLevel::Info`].
pub fn level_from_i32(level: i32) -> LogLevel {
    match level {
        0 => LogLevel::Debug,
        2 => LogLevel::Warn,
        3 => LogLevel::Error,
        _ => LogLevel::Info,
    }
}
