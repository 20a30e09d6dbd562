//! Logging macros gated on a module-level `ENABLE_LOGS` flag.
//!
//! Chatty loops (the delivery ticker, the foreground poller, the background
//! host) define the flag so they can be silenced without touching `RUST_LOG`:
//!
//! ```ignore
//! const ENABLE_LOGS: bool = true;
//! use crate::{log_info, log_warn, log_error};
//!
//! log_info!("poll found {} due call(s)", count);
//! ```

#[doc(hidden)]
#[macro_export]
macro_rules! log_gated {
    ($level:expr, $($arg:tt)*) => {
        if ENABLE_LOGS {
            log::log!($level, $($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::log_gated!(log::Level::Info, $($arg)*)
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::log_gated!(log::Level::Warn, $($arg)*)
    };
}

/// Errors stay behind the flag too; a disabled module is fully silent.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::log_gated!(log::Level::Error, $($arg)*)
    };
}
