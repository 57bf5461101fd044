//! Internal logging macros over `tracing`, emitted under the `chain_watcher` target.
//!
//! Every level macro accepts plain `tracing` arguments or a leading `watcher: <name>,` which
//! becomes the `watcher = %name` field carried by all per-watcher events:
//!
//! ```ignore
//! warn!(watcher: name, generation = 3, "Subscription stream ended unexpectedly");
//! ```
//!
//! Without the `tracing` feature the macros only evaluate their field expressions.

#[cfg(feature = "tracing")]
#[doc(hidden)]
#[macro_export]
macro_rules! __watch_log {
    ($level:ident, watcher: $watcher:expr, $($arg:tt)+) => {
        tracing::$level!(target: "chain_watcher", watcher = %$watcher, $($arg)+)
    };
    ($level:ident, $($arg:tt)+) => {
        tracing::$level!(target: "chain_watcher", $($arg)+)
    };
}

#[cfg(not(feature = "tracing"))]
#[doc(hidden)]
#[macro_export]
macro_rules! __watch_log {
    ($level:ident, watcher: $watcher:expr, $($arg:tt)+) => {
        { let _ = &$watcher; $crate::__watch_consume!($($arg)+); }
    };
    ($level:ident, $($arg:tt)+) => {
        $crate::__watch_consume!($($arg)+)
    };
}

#[allow(unused_macros)]
macro_rules! error {
    ($($arg:tt)+) => { $crate::__watch_log!(error, $($arg)+) };
}

#[allow(unused_macros)]
macro_rules! warn {
    ($($arg:tt)+) => { $crate::__watch_log!(warn, $($arg)+) };
}

#[allow(unused_macros)]
macro_rules! info {
    ($($arg:tt)+) => { $crate::__watch_log!(info, $($arg)+) };
}

#[allow(unused_macros)]
macro_rules! debug {
    ($($arg:tt)+) => { $crate::__watch_log!(debug, $($arg)+) };
}

#[allow(unused_macros)]
macro_rules! trace {
    ($($arg:tt)+) => { $crate::__watch_log!(trace, $($arg)+) };
}

#[cfg(not(feature = "tracing"))]
#[doc(hidden)]
#[macro_export]
macro_rules! __watch_consume {
    ($field:ident = % $value:expr, $($rest:tt)*) => {
        { let _ = &$value; $crate::__watch_consume!($($rest)*); }
    };
    ($field:ident = ? $value:expr, $($rest:tt)*) => {
        { let _ = &$value; $crate::__watch_consume!($($rest)*); }
    };
    ($field:ident = $value:expr, $($rest:tt)*) => {
        { let _ = &$value; $crate::__watch_consume!($($rest)*); }
    };
    ($lit:literal, $($arg:expr),+ $(,)?) => {
        { $( let _ = &$arg; )+ }
    };
    ($lit:literal $($rest:tt)*) => {
        $crate::__watch_consume!($($rest)*)
    };
    () => {};
}
