//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers keep process IDs, thread IDs and loader handles
//! from being mixed up once they leave the raw `DlEvent` record.

use std::fmt;

/// Process ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pid(pub u32);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Thread ID
///
/// The kernel's per-thread pid. Used only to pair enter and return records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tid(pub u32);

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque library handle returned by `dlopen`, or any address rendered as hex
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address(pub u64);

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl Address {
    /// Parse the `0x`-prefixed hex rendering produced by [`Display`](fmt::Display)
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let hex = s.trim().strip_prefix("0x")?;
        u64::from_str_radix(hex, 16).ok().map(Address)
    }
}

/// Calling thread, the key enter and return records are paired on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadKey {
    pub pid: Pid,
    pub tid: Tid,
}
