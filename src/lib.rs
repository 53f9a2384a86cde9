//! lockprof - Lock profiling and synchronization diagnostics
//!
//! This library sits between a multi-threaded program and its mutexes,
//! condition variables, sleeps and thread spawns. Every call is timed and
//! attributed to its call site and thread, self-relocks and unlocks of
//! unheld mutexes are reported, and at shutdown a lock report is written
//! that groups the measurements four ways (per site and mutex, per mutex,
//! per site, and by loosely related "unique" sites).

pub mod aggregate;
pub mod backend;
pub mod call_site;
pub mod cli;
pub mod clock;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod holds;
mod macros;
pub mod registry;
pub mod report;
pub mod scenarios;

pub use call_site::{CallSite, MutexId};
pub use diagnostics::{Diagnostics, Violation};
pub use error::{ConfigError, ProfilerError};
