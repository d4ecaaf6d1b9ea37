//! Logging shims.
//!
//! Messages go to `defmt` or `log` depending on the enabled feature, and
//! compile away when neither is enabled. Format strings must stay within the
//! subset both backends accept (`{}`, `{:?}`, `{:#x}`).
#![allow(unused_macros)]

macro_rules! log_with {
    ($level:ident, $s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "defmt")]
            ::defmt::$level!($s $(, $x)*);
            #[cfg(feature = "log")]
            ::log::$level!($s $(, $x)*);
            #[cfg(not(any(feature = "defmt", feature = "log")))]
            let _ = ($( & $x ),*);
        }
    };
}

macro_rules! trace {
    ($($t:tt)*) => { log_with!(trace, $($t)*) };
}

macro_rules! debug {
    ($($t:tt)*) => { log_with!(debug, $($t)*) };
}

macro_rules! info {
    ($($t:tt)*) => { log_with!(info, $($t)*) };
}

macro_rules! warn {
    ($($t:tt)*) => { log_with!(warn, $($t)*) };
}

macro_rules! error {
    ($($t:tt)*) => { log_with!(error, $($t)*) };
}

/// Emit a message through a [`Context`](crate::context::Context) if its
/// verbosity admits the given [`LogLevel`](crate::context::LogLevel).
macro_rules! log_at {
    ($ctx:expr, Error, $($t:tt)*) => {
        if $ctx.logs($crate::context::LogLevel::Error) { error!($($t)*) }
    };
    ($ctx:expr, Warning, $($t:tt)*) => {
        if $ctx.logs($crate::context::LogLevel::Warning) { warn!($($t)*) }
    };
    ($ctx:expr, Normal, $($t:tt)*) => {
        if $ctx.logs($crate::context::LogLevel::Normal) { info!($($t)*) }
    };
    ($ctx:expr, Info, $($t:tt)*) => {
        if $ctx.logs($crate::context::LogLevel::Info) { info!($($t)*) }
    };
    ($ctx:expr, Debug, $($t:tt)*) => {
        if $ctx.logs($crate::context::LogLevel::Debug) { debug!($($t)*) }
    };
    ($ctx:expr, Payload, $($t:tt)*) => {
        if $ctx.logs($crate::context::LogLevel::Payload) { trace!($($t)*) }
    };
}
