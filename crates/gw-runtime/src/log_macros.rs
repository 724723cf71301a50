/// Domain-aware logging macros.
///
/// Each macro injects a `domain` field automatically so callers never need to
/// remember the string literal. Domains in use: `sys`, `conn`, `pipe`, `bus`,
/// `res`, `conf`.
///
/// # Usage
///
/// ```ignore
/// use crate::log_macros::*;
///
/// gw_info!(sys, adapters = 3, sinks = 2, "gateway bootstrap complete");
/// gw_warn!(pipe, error = %e, "action pipeline error");
/// gw_debug!(conn, peer = %peer, "sidecar connected");
/// ```
///
/// The macros accept any tracing-compatible field syntax after the domain
/// identifier. The domain identifier is **not** a string — it is a bare
/// identifier that the macro converts to a `&str` literal.

// ---------------------------------------------------------------------------
// Core macro — dispatches to the matching tracing level macro.
// ---------------------------------------------------------------------------

/// Internal helper. Do not call directly; use `gw_error!` … `gw_trace!`.
#[doc(hidden)]
macro_rules! gw_log {
    // With fields and message
    ($level:ident, $domain:ident, $($field:tt)*) => {
        tracing::$level!(domain = stringify!($domain), $($field)*)
    };
}

// ---------------------------------------------------------------------------
// Public per-level macros
// ---------------------------------------------------------------------------

/// Log at ERROR level with an automatic `domain` field.
///
/// ```ignore
/// gw_error!(pipe, error = %e, "alert sink write failed");
/// ```
macro_rules! gw_error {
    ($domain:ident, $($rest:tt)*) => {
        gw_log!(error, $domain, $($rest)*)
    };
}

/// Log at WARN level with an automatic `domain` field.
///
/// ```ignore
/// gw_warn!(pipe, error = %e, timeout = ?dur, "adapter reconnect");
/// ```
macro_rules! gw_warn {
    ($domain:ident, $($rest:tt)*) => {
        gw_log!(warn, $domain, $($rest)*)
    };
}

/// Log at INFO level with an automatic `domain` field.
///
/// ```ignore
/// gw_info!(sys, listen = %addr, "gateway started");
/// ```
macro_rules! gw_info {
    ($domain:ident, $($rest:tt)*) => {
        gw_log!(info, $domain, $($rest)*)
    };
}

/// Log at DEBUG level with an automatic `domain` field.
///
/// ```ignore
/// gw_debug!(conn, peer = %peer, "accepted connection");
/// ```
macro_rules! gw_debug {
    ($domain:ident, $($rest:tt)*) => {
        gw_log!(debug, $domain, $($rest)*)
    };
}

/// Log at TRACE level with an automatic `domain` field.
///
/// ```ignore
/// gw_trace!(bus, subscriber = name, dropped = n, "admission result");
/// ```
#[allow(unused_macros)]
macro_rules! gw_trace {
    ($domain:ident, $($rest:tt)*) => {
        gw_log!(trace, $domain, $($rest)*)
    };
}
