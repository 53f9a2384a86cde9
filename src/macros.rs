//! Drop-in instrumentation macros
//!
//! Each macro stands in for the raw primitive call and records the call
//! site via `file!()`/`line!()`. Lock-style macros also use the handle
//! expression itself, stringified, as the label.
//!
//! Handle expressions must dereference to the backend's handle type (an
//! `Arc`, a `Box` or a reference), since handles are identified by address
//! and must not move while profiled.
//!
//! ```
//! use lockprof::backend::LockHandle;
//! use lockprof::{lock, unlock, Diagnostics};
//! use std::sync::Arc;
//!
//! let diag = Arc::new(Diagnostics::with_config(Default::default()));
//! let world = Arc::new(LockHandle::new());
//!
//! lock!(diag, world);
//! unlock!(diag, world);
//!
//! assert_eq!(diag.totals().lock_count, 1);
//! ```

/// Instrumented replacement for locking a mutex handle
#[macro_export]
macro_rules! lock {
    ($diag:expr, $mutex:expr) => {
        $diag.on_lock(
            ::core::option::Option::Some(&*$mutex),
            stringify!($mutex),
            $crate::CallSite::new(file!(), line!()),
        )
    };
}

/// Instrumented replacement for unlocking a mutex handle
#[macro_export]
macro_rules! unlock {
    ($diag:expr, $mutex:expr) => {
        $diag.on_unlock(
            ::core::option::Option::Some(&*$mutex),
            stringify!($mutex),
            $crate::CallSite::new(file!(), line!()),
        )
    };
}

/// Instrumented replacement for sleeping `ms` milliseconds
#[macro_export]
macro_rules! delay {
    ($diag:expr, $ms:expr) => {
        $diag.on_delay($ms)
    };
}

/// Instrumented replacement for waiting on a condition variable
#[macro_export]
macro_rules! cond_wait {
    ($diag:expr, $cond:expr, $mutex:expr) => {
        $diag.on_cond_wait(
            ::core::option::Option::Some(&*$cond),
            ::core::option::Option::Some(&*$mutex),
            stringify!($mutex),
            $crate::CallSite::new(file!(), line!()),
        )
    };
}

/// Instrumented replacement for spawning a thread; `$diag` must be an `Arc<Diagnostics>`
#[macro_export]
macro_rules! create_thread {
    ($diag:expr, $entry:expr) => {
        $diag.on_thread_create($entry, $crate::CallSite::new(file!(), line!()))
    };
}
