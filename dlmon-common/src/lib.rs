//! # Shared Data Structures (eBPF ↔ Userspace)
//!
//! Defines the record and constants shared between the kernel-side uprobes and
//! the userspace consumer. All types use `#[repr(C)]` for consistent memory
//! layout across the kernel/userspace boundary.
//!
//! ## Probe Pairs
//!
//! Each dynamic-linking call is observed twice, once on entry and once on
//! return, so every call produces two [`DlEvent`] records:
//!
//! | Call      | Enter record                    | Return record            |
//! |-----------|---------------------------------|--------------------------|
//! | `dlopen`  | requested path, flags           | handle (0 on failure)    |
//! | `dlclose` | handle, path if known           | *(none emitted)*         |
//! | `dlsym`   | handle, symbol, path if known   | resolved symbol address  |
//!
//! The [`correlation`] module holds the logic that bridges these records and
//! is shared verbatim by the eBPF programs and the host-side tests.

#![no_std]

#[cfg(test)]
extern crate std;

pub mod correlation;

pub use correlation::{CorrelationMaps, HandleKey};

// ============================================================================
// Event Kinds and Phases
// ============================================================================

/// `dlopen` call (explicit library load)
pub const EVENT_LOAD: u32 = 1;

/// `dlclose` call (library unload)
pub const EVENT_UNLOAD: u32 = 2;

/// `dlsym` call (symbol resolution)
pub const EVENT_SYMBOL: u32 = 3;

/// Record emitted from a uprobe (function entry)
pub const PHASE_ENTER: u32 = 0;

/// Record emitted from a uretprobe (function return)
pub const PHASE_RETURN: u32 = 1;

// ============================================================================
// Capacities
// ============================================================================

/// Kernel task name length (`TASK_COMM_LEN`)
pub const COMM_LEN: usize = 16;

/// Library path capacity; longer paths are silently truncated
pub const PATH_LEN: usize = 128;

/// Symbol name capacity; longer names are silently truncated
pub const SYMBOL_LEN: usize = 64;

/// Maximum number of in-flight `dlopen` calls (one slot per calling thread)
pub const MAX_PENDING_LOADS: u32 = 1024;

/// Maximum number of live handles tracked across all monitored processes
pub const MAX_LIVE_HANDLES: u32 = 8192;

/// `FILTER` map slot holding the target process name (empty = all processes)
pub const FILTER_TARGET: u32 = 0;

/// `FILTER` map slot holding the monitor's own process name
pub const FILTER_MONITOR: u32 = 1;

/// Kernel task name, NUL-terminated unless exactly 16 bytes long
pub type Comm = [u8; COMM_LEN];

/// Library path buffer, NUL-terminated unless full
pub type LibPath = [u8; PATH_LEN];

// ============================================================================
// Shared Data Structures
// ============================================================================

/// Event sent from eBPF to userspace via ring buffer
///
/// One record is written per probe invocation. Records are reserved directly
/// in the ring buffer and zeroed before being filled, so any field a probe
/// does not set reads as 0 / empty string.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct DlEvent {
    /// `bpf_ktime_get_ns()` at probe time (`CLOCK_MONOTONIC`)
    pub timestamp_ns: u64,

    /// Library handle returned by `dlopen` or passed to `dlclose`/`dlsym`
    ///
    /// Always 0 on a load-enter record.
    pub lib_addr: u64,

    /// Address returned by `dlsym` (symbol-return records only)
    pub symbol_addr: u64,

    /// Process ID (TGID in kernel terms)
    pub pid: u32,

    /// Thread ID of the calling thread
    pub tid: u32,

    /// Real user ID of the calling process
    pub uid: u32,

    /// One of `EVENT_LOAD`, `EVENT_UNLOAD`, `EVENT_SYMBOL`
    pub kind: u32,

    /// `PHASE_ENTER` or `PHASE_RETURN`
    pub phase: u32,

    /// `dlopen` mode bitmask (load-enter records only)
    pub flags: i32,

    /// Reserved for the call's result code. Never populated.
    pub result: i32,

    /// Padding for 8-byte alignment
    #[allow(clippy::pub_underscore_fields)]
    pub _padding: [u8; 4],

    /// Calling task name
    pub comm: Comm,

    /// Library path (requested path on load, correlated path otherwise)
    pub lib_path: LibPath,

    /// Requested symbol name (symbol-enter records only)
    pub symbol: [u8; SYMBOL_LEN],
}

impl DlEvent {
    /// All-zero record
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            timestamp_ns: 0,
            lib_addr: 0,
            symbol_addr: 0,
            pid: 0,
            tid: 0,
            uid: 0,
            kind: 0,
            phase: PHASE_ENTER,
            flags: 0,
            result: 0,
            _padding: [0; 4],
            comm: [0; COMM_LEN],
            lib_path: [0; PATH_LEN],
            symbol: [0; SYMBOL_LEN],
        }
    }

    /// Key identifying the calling thread, laid out like `bpf_get_current_pid_tgid()`
    #[must_use]
    pub const fn thread_key(&self) -> u64 {
        ((self.pid as u64) << 32) | self.tid as u64
    }

    /// Whether this record came from a return probe
    #[must_use]
    pub const fn is_return(&self) -> bool {
        self.phase == PHASE_RETURN
    }
}

// ============================================================================
// Process Filter
// ============================================================================

/// Bytes of a NUL-terminated buffer, up to (not including) the first NUL
#[must_use]
pub fn c_str_bytes(buf: &[u8]) -> &[u8] {
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    &buf[..len]
}

/// Exact comparison of two NUL-terminated task names
#[must_use]
pub fn comm_eq(a: &Comm, b: &Comm) -> bool {
    for (x, y) in a.iter().zip(b.iter()) {
        if x != y {
            return false;
        }
        if *x == 0 {
            return true;
        }
    }
    true
}

/// Decide whether the current task should be instrumented
///
/// - The monitor never traces itself.
/// - With no target configured (missing or empty), every other task is traced.
/// - Otherwise only a task whose name matches the target exactly is traced.
#[must_use]
pub fn is_target(comm: &Comm, target: Option<&Comm>, monitor: Option<&Comm>) -> bool {
    if let Some(monitor) = monitor {
        if monitor[0] != 0 && comm_eq(comm, monitor) {
            return false;
        }
    }

    match target {
        Some(target) if target[0] != 0 => comm_eq(comm, target),
        _ => true,
    }
}

/// Copy a name into a fixed-size, NUL-padded task name buffer
///
/// Names longer than 15 bytes are truncated the way the kernel truncates
/// `task_struct::comm`.
#[must_use]
pub fn comm_from_bytes(name: &[u8]) -> Comm {
    let mut comm = [0u8; COMM_LEN];
    let len = name.len().min(COMM_LEN - 1);
    comm[..len].copy_from_slice(&name[..len]);
    comm
}

#[cfg(feature = "user")]
use aya::Pod;

// Pod ensures the record can be transmitted as plain bytes through BPF maps
#[cfg(feature = "user")]
#[allow(unsafe_code)]
unsafe impl Pod for DlEvent {}

#[cfg(feature = "user")]
#[allow(unsafe_code)]
unsafe impl Pod for HandleKey {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comm_eq_exact() {
        assert!(comm_eq(&comm_from_bytes(b"math_test"), &comm_from_bytes(b"math_test")));
        assert!(!comm_eq(&comm_from_bytes(b"math_test"), &comm_from_bytes(b"math")));
        assert!(!comm_eq(&comm_from_bytes(b"math"), &comm_from_bytes(b"math_test")));
    }

    #[test]
    fn test_is_target_excludes_monitor() {
        let me = comm_from_bytes(b"dlmon");
        assert!(!is_target(&me, None, Some(&me)));
        assert!(!is_target(&me, Some(&me), Some(&me)));
    }

    #[test]
    fn test_is_target_without_filter_matches_everything_else() {
        let me = comm_from_bytes(b"dlmon");
        let empty = [0u8; COMM_LEN];
        assert!(is_target(&comm_from_bytes(b"bash"), None, Some(&me)));
        assert!(is_target(&comm_from_bytes(b"bash"), Some(&empty), Some(&me)));
        assert!(is_target(&comm_from_bytes(b"bash"), None, None));
    }

    #[test]
    fn test_is_target_with_filter() {
        let target = comm_from_bytes(b"math_test");
        assert!(is_target(&comm_from_bytes(b"math_test"), Some(&target), None));
        assert!(!is_target(&comm_from_bytes(b"math_tes"), Some(&target), None));
        assert!(!is_target(&comm_from_bytes(b"math_test2"), Some(&target), None));
    }

    #[test]
    fn test_comm_truncates_like_kernel() {
        let comm = comm_from_bytes(b"a-very-long-process-name");
        assert_eq!(c_str_bytes(&comm), b"a-very-long-pro");
        assert_eq!(comm[COMM_LEN - 1], 0);
    }

    #[test]
    fn test_thread_key_layout() {
        let mut event = DlEvent::zeroed();
        event.pid = 0x10;
        event.tid = 0x20;
        assert_eq!(event.thread_key(), 0x0000_0010_0000_0020);
    }
}
