//! Enter/return and handle/path correlation
//!
//! The dynamic loader API never hands the same context to a call and its
//! return, and `dlclose`/`dlsym` only ever see an opaque handle. Two tables
//! bridge those gaps:
//!
//! - **pending loads**: calling thread → requested path, written on
//!   `dlopen` entry and consumed on its return
//! - **live handles**: `(tgid, handle)` → path, written on a successful
//!   `dlopen` return, read by `dlsym`, removed by `dlclose`
//!
//! Both tables are scoped so that concurrent loads on different threads and
//! equal handle values in different processes never collide.
//!
//! The functions below expect a record whose header (timestamp, pid, tid,
//! uid, comm) is already filled in and whose remaining fields are zero.

use crate::{
    DlEvent, LibPath, EVENT_LOAD, EVENT_SYMBOL, EVENT_UNLOAD, PHASE_ENTER, PHASE_RETURN,
};

/// Key of the live-handle table
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandleKey {
    /// Owning process (TGID)
    pub tgid: u32,

    /// Padding for 8-byte alignment
    #[allow(clippy::pub_underscore_fields)]
    pub _padding: u32,

    /// Opaque handle returned by `dlopen`
    pub handle: u64,
}

impl HandleKey {
    #[must_use]
    pub const fn new(tgid: u32, handle: u64) -> Self {
        Self { tgid, _padding: 0, handle }
    }
}

/// Storage backing the correlation tables
///
/// Implemented over BPF hash maps in the kernel program and over plain
/// collections in tests. Every operation is best-effort: a full table simply
/// drops the write, and lookups write into `out` only on a hit.
pub trait CorrelationMaps {
    /// Remember the path requested by `thread`, replacing any previous one
    fn stash_pending(&self, thread: u64, path: &LibPath);

    /// Move the path requested by `thread` into `out`, clearing the slot
    fn take_pending(&self, thread: u64, out: &mut LibPath) -> bool;

    /// Associate a live handle with its path
    fn bind_handle(&self, key: &HandleKey, path: &LibPath);

    /// Copy the path of a live handle into `out`, leaving the entry in place
    fn lookup_handle(&self, key: &HandleKey, out: &mut LibPath) -> bool;

    /// Move the path of a live handle into `out` and forget the handle
    fn unbind_handle(&self, key: &HandleKey, out: &mut LibPath) -> bool;
}

/// `dlopen` entry: `event.lib_path` already holds the requested path
pub fn on_load_enter<M: CorrelationMaps>(maps: &M, event: &mut DlEvent, flags: i32) {
    event.kind = EVENT_LOAD;
    event.phase = PHASE_ENTER;
    event.flags = flags;
    event.lib_addr = 0;
    maps.stash_pending(event.thread_key(), &event.lib_path);
}

/// `dlopen` return
///
/// The pending slot is always cleared. The path is copied into the record
/// even when the load failed so the consumer can report what was requested;
/// only a non-null handle is bound.
pub fn on_load_return<M: CorrelationMaps>(maps: &M, event: &mut DlEvent, handle: u64) {
    event.kind = EVENT_LOAD;
    event.phase = PHASE_RETURN;
    event.lib_addr = handle;

    if maps.take_pending(event.thread_key(), &mut event.lib_path) && handle != 0 {
        maps.bind_handle(&HandleKey::new(event.pid, handle), &event.lib_path);
    }
}

/// `dlclose` entry: resolves and forgets the handle
///
/// An unknown handle leaves `lib_path` empty.
pub fn on_unload_enter<M: CorrelationMaps>(maps: &M, event: &mut DlEvent, handle: u64) {
    event.kind = EVENT_UNLOAD;
    event.phase = PHASE_ENTER;
    event.lib_addr = handle;
    maps.unbind_handle(&HandleKey::new(event.pid, handle), &mut event.lib_path);
}

/// `dlsym` entry: `event.symbol` already holds the requested name
pub fn on_symbol_enter<M: CorrelationMaps>(maps: &M, event: &mut DlEvent, handle: u64) {
    event.kind = EVENT_SYMBOL;
    event.phase = PHASE_ENTER;
    event.lib_addr = handle;
    maps.lookup_handle(&HandleKey::new(event.pid, handle), &mut event.lib_path);
}

/// `dlsym` return: carries only the resolved address
pub fn on_symbol_return(event: &mut DlEvent, address: u64) {
    event.kind = EVENT_SYMBOL;
    event.phase = PHASE_RETURN;
    event.symbol_addr = address;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{c_str_bytes, PATH_LEN};
    use core::cell::RefCell;
    use std::collections::HashMap;

    #[derive(Default)]
    struct TestMaps {
        pending: RefCell<HashMap<u64, LibPath>>,
        handles: RefCell<HashMap<HandleKey, LibPath>>,
    }

    impl CorrelationMaps for TestMaps {
        fn stash_pending(&self, thread: u64, path: &LibPath) {
            self.pending.borrow_mut().insert(thread, *path);
        }

        fn take_pending(&self, thread: u64, out: &mut LibPath) -> bool {
            self.pending.borrow_mut().remove(&thread).map(|p| *out = p).is_some()
        }

        fn bind_handle(&self, key: &HandleKey, path: &LibPath) {
            self.handles.borrow_mut().insert(*key, *path);
        }

        fn lookup_handle(&self, key: &HandleKey, out: &mut LibPath) -> bool {
            self.handles.borrow().get(key).map(|p| *out = *p).is_some()
        }

        fn unbind_handle(&self, key: &HandleKey, out: &mut LibPath) -> bool {
            self.handles.borrow_mut().remove(key).map(|p| *out = p).is_some()
        }
    }

    fn record(pid: u32, tid: u32) -> DlEvent {
        let mut event = DlEvent::zeroed();
        event.pid = pid;
        event.tid = tid;
        event
    }

    fn with_path(mut event: DlEvent, path: &[u8]) -> DlEvent {
        let mut buf = [0u8; PATH_LEN];
        buf[..path.len()].copy_from_slice(path);
        event.lib_path = buf;
        event
    }

    #[test]
    fn test_load_then_unload_reports_same_path() {
        let maps = TestMaps::default();

        let mut enter = with_path(record(100, 100), b"libm.so.6");
        on_load_enter(&maps, &mut enter, 1);
        assert_eq!(enter.lib_addr, 0);

        let mut ret = record(100, 100);
        on_load_return(&maps, &mut ret, 0xdead);
        assert_eq!(c_str_bytes(&ret.lib_path), b"libm.so.6");
        assert!(maps.pending.borrow().is_empty());

        let mut unload = record(100, 100);
        on_unload_enter(&maps, &mut unload, 0xdead);
        assert_eq!(c_str_bytes(&unload.lib_path), c_str_bytes(&ret.lib_path));
        assert!(maps.handles.borrow().is_empty());
    }

    #[test]
    fn test_failed_load_clears_slot_without_binding() {
        let maps = TestMaps::default();

        let mut enter = with_path(record(1, 2), b"libmissing.so");
        on_load_enter(&maps, &mut enter, 2);

        let mut ret = record(1, 2);
        on_load_return(&maps, &mut ret, 0);
        assert_eq!(c_str_bytes(&ret.lib_path), b"libmissing.so");
        assert!(maps.pending.borrow().is_empty());
        assert!(maps.handles.borrow().is_empty());
    }

    #[test]
    fn test_concurrent_loads_on_different_threads_do_not_collide() {
        let maps = TestMaps::default();

        let mut a = with_path(record(1, 10), b"liba.so");
        let mut b = with_path(record(1, 11), b"libb.so");
        on_load_enter(&maps, &mut a, 1);
        on_load_enter(&maps, &mut b, 1);

        let mut ret_a = record(1, 10);
        let mut ret_b = record(1, 11);
        on_load_return(&maps, &mut ret_b, 0xb);
        on_load_return(&maps, &mut ret_a, 0xa);

        assert_eq!(c_str_bytes(&ret_a.lib_path), b"liba.so");
        assert_eq!(c_str_bytes(&ret_b.lib_path), b"libb.so");
    }

    #[test]
    fn test_symbol_lookup_is_not_destructive_and_scoped_by_process() {
        let maps = TestMaps::default();
        maps.bind_handle(&HandleKey::new(7, 0x1000), &with_path(record(0, 0), b"libz.so").lib_path);

        let mut sym = record(7, 7);
        on_symbol_enter(&maps, &mut sym, 0x1000);
        assert_eq!(c_str_bytes(&sym.lib_path), b"libz.so");
        assert_eq!(maps.handles.borrow().len(), 1);

        let mut other = record(8, 8);
        on_symbol_enter(&maps, &mut other, 0x1000);
        assert!(c_str_bytes(&other.lib_path).is_empty());
    }

    #[test]
    fn test_unload_of_unknown_handle_leaves_path_empty() {
        let maps = TestMaps::default();
        let mut unload = record(3, 3);
        on_unload_enter(&maps, &mut unload, 0x42);
        assert!(c_str_bytes(&unload.lib_path).is_empty());
        assert_eq!(unload.lib_addr, 0x42);
    }

    #[test]
    fn test_tables_advance_when_every_record_is_discarded() {
        let maps = TestMaps::default();

        // None of these records reaches userspace
        let mut enter = with_path(record(5, 6), b"libdrop.so");
        on_load_enter(&maps, &mut enter, 1);
        assert_eq!(maps.pending.borrow().len(), 1);

        let mut ret = record(5, 6);
        on_load_return(&maps, &mut ret, 0x5000);
        assert!(maps.pending.borrow().is_empty());
        assert_eq!(maps.handles.borrow().len(), 1);

        let mut unload = record(5, 6);
        on_unload_enter(&maps, &mut unload, 0x5000);
        assert_eq!(c_str_bytes(&unload.lib_path), b"libdrop.so");
        assert!(maps.handles.borrow().is_empty());
    }

    #[test]
    fn test_symbol_return_carries_only_address() {
        let mut ret = record(3, 3);
        on_symbol_return(&mut ret, 0x7f00_0000_1234);
        assert_eq!(ret.kind, EVENT_SYMBOL);
        assert!(ret.is_return());
        assert_eq!(ret.symbol_addr, 0x7f00_0000_1234);
        assert_eq!(ret.lib_addr, 0);
    }
}
