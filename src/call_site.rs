//! Provenance types: where a primitive was called from, and which mutex it touched

use serde::Serialize;
use std::borrow::Cow;
use std::fmt;
use std::panic::Location;

/// Source location of an instrumented primitive call
///
/// Uses `Cow<'static, str>` so call sites produced by `file!()` never allocate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CallSite {
    pub file: Cow<'static, str>,
    pub line: u32,
}

impl CallSite {
    /// Origin recorded for the first thread when nobody registered it explicitly
    pub const MAIN: CallSite = CallSite {
        file: Cow::Borrowed("main"),
        line: 0,
    };

    pub fn new(file: impl Into<Cow<'static, str>>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }

    /// Call site of the caller of the enclosing `#[track_caller]` function
    #[track_caller]
    pub fn caller() -> Self {
        Location::caller().into()
    }
}

impl From<&'static Location<'static>> for CallSite {
    fn from(location: &'static Location<'static>) -> Self {
        Self::new(location.file(), location.line())
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Identity of a mutex handle (its address)
///
/// Handles must not move while they are being profiled; keep them behind an
/// `Arc`, a `Box` or a `static`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct MutexId(usize);

impl MutexId {
    pub fn of<M>(handle: &M) -> Self {
        Self(handle as *const M as usize)
    }

    pub fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> usize {
        self.0
    }
}

impl fmt::Display for MutexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_site_compares_by_value() {
        let a = CallSite::new("f.rs", 10);
        let b = CallSite::new(String::from("f.rs"), 10);
        assert_eq!(a, b);
        assert_ne!(a, CallSite::new("f.rs", 11));
    }

    #[test]
    fn test_call_site_caller_points_here() {
        let site = CallSite::caller();
        assert!(site.file.ends_with("call_site.rs"));
        assert!(site.line > 0);
    }

    #[test]
    fn test_main_sentinel() {
        assert_eq!(CallSite::MAIN.to_string(), "main:0");
    }

    #[test]
    fn test_mutex_id_is_address() {
        let a = 1u8;
        let b = 2u8;
        assert_eq!(MutexId::of(&a), MutexId::of(&a));
        assert_ne!(MutexId::of(&a), MutexId::of(&b));
    }
}
