//! # eBPF Kernel-Side Instrumentation
//!
//! Uprobes on the dynamic loader API, running inline with every traced call.
//!
//! ## Programs
//!
//! | Program          | Hook                 | Emits                         |
//! |------------------|----------------------|-------------------------------|
//! | `dlopen_enter`   | uprobe `dlopen`      | load, requested path + flags  |
//! | `dlopen_return`  | uretprobe `dlopen`   | load, handle                  |
//! | `dlclose_enter`  | uprobe `dlclose`     | unload, handle + path         |
//! | `dlclose_return` | uretprobe `dlclose`  | nothing                       |
//! | `dlsym_enter`    | uprobe `dlsym`       | symbol, name + library path   |
//! | `dlsym_return`   | uretprobe `dlsym`    | symbol, resolved address      |
//!
//! ## Maps (Shared with Userspace)
//!
//! - `EVENTS` - Ring buffer (256KB) carrying `DlEvent` records
//! - `DROPPED` - Per-CPU count of records lost to a full ring buffer
//! - `SCRATCH` - Per-CPU staging slot a record is built in before it is copied out
//! - `FILTER` - Target process name (slot 0) and monitor name (slot 1)
//! - `PENDING_LOADS` - Calling thread → path requested by an in-flight `dlopen`
//! - `LIVE_HANDLES` - `(tgid, handle)` → library path
//!
//! Probes never block and never fail the traced call: every lookup and string
//! read is best-effort and degrades to an emptier record. Correlation tables
//! are updated before the record is offered to `EVENTS`, so a full ring buffer
//! loses the record but never the bookkeeping.
//!
//! ## Build
//!
//! ```bash
//! cargo xtask build-ebpf
//! ```

#![no_std]
#![no_main]
#![allow(unused_unsafe)]

use aya_ebpf::{
    helpers::{
        bpf_get_current_comm, bpf_get_current_pid_tgid, bpf_get_current_uid_gid,
        bpf_ktime_get_ns, bpf_probe_read_user_str_bytes,
    },
    macros::{map, uprobe, uretprobe},
    maps::{Array, HashMap, PerCpuArray, RingBuf},
    programs::{ProbeContext, RetProbeContext},
    EbpfContext,
};
use aya_log_ebpf::warn;
use dlmon_common::{
    correlation::{
        on_load_enter, on_load_return, on_symbol_enter, on_symbol_return, on_unload_enter,
    },
    is_target, Comm, CorrelationMaps, DlEvent, HandleKey, LibPath, FILTER_MONITOR, FILTER_TARGET,
    MAX_LIVE_HANDLES, MAX_PENDING_LOADS,
};

// ============================================================================
// eBPF Maps
// ============================================================================

/// Ring buffer for sending records to userspace
///
/// Producers never block: when no space is left the record is dropped and
/// `DROPPED` is incremented instead.
#[map]
static EVENTS: RingBuf = RingBuf::with_byte_size(256 * 1024, 0);

/// Records lost because `EVENTS` was full
#[map]
static DROPPED: PerCpuArray<u64> = PerCpuArray::with_max_entries(1, 0);

/// Staging slot for the record under construction (too large for the BPF stack)
#[map]
static SCRATCH: PerCpuArray<DlEvent> = PerCpuArray::with_max_entries(1, 0);

/// Process filter, written once by userspace before any probe is attached
#[map]
static FILTER: Array<Comm> = Array::with_max_entries(2, 0);

/// Map: `pid_tgid` of the calling thread → path passed to `dlopen`
#[map]
static PENDING_LOADS: HashMap<u64, LibPath> = HashMap::with_max_entries(MAX_PENDING_LOADS, 0);

/// Map: `(tgid, handle)` → library path
#[map]
static LIVE_HANDLES: HashMap<HandleKey, LibPath> =
    HashMap::with_max_entries(MAX_LIVE_HANDLES, 0);

/// Correlation tables backed by the BPF hash maps above
struct KernelMaps;

impl CorrelationMaps for KernelMaps {
    fn stash_pending(&self, thread: u64, path: &LibPath) {
        let _ = PENDING_LOADS.insert(&thread, path, 0);
    }

    fn take_pending(&self, thread: u64, out: &mut LibPath) -> bool {
        match unsafe { PENDING_LOADS.get(&thread) } {
            Some(path) => {
                *out = *path;
                let _ = PENDING_LOADS.remove(&thread);
                true
            }
            None => false,
        }
    }

    fn bind_handle(&self, key: &HandleKey, path: &LibPath) {
        let _ = LIVE_HANDLES.insert(key, path, 0);
    }

    fn lookup_handle(&self, key: &HandleKey, out: &mut LibPath) -> bool {
        match unsafe { LIVE_HANDLES.get(key) } {
            Some(path) => {
                *out = *path;
                true
            }
            None => false,
        }
    }

    fn unbind_handle(&self, key: &HandleKey, out: &mut LibPath) -> bool {
        match unsafe { LIVE_HANDLES.get(key) } {
            Some(path) => {
                *out = *path;
                let _ = LIVE_HANDLES.remove(key);
                true
            }
            None => false,
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn current_is_target() -> bool {
    let Ok(comm) = bpf_get_current_comm() else {
        return false;
    };
    let target = FILTER.get(FILTER_TARGET);
    let monitor = FILTER.get(FILTER_MONITOR);
    is_target(&comm, target, monitor)
}

/// Zero this CPU's staging record and fill in the common header
#[inline(always)]
fn begin_record() -> Option<&'static mut DlEvent> {
    let event = SCRATCH.get_ptr_mut(0)?;
    unsafe {
        core::ptr::write_bytes(event, 0, 1);

        let pid_tgid = bpf_get_current_pid_tgid();
        (*event).timestamp_ns = bpf_ktime_get_ns();
        (*event).pid = (pid_tgid >> 32) as u32;
        (*event).tid = pid_tgid as u32;
        (*event).uid = bpf_get_current_uid_gid() as u32;
        if let Ok(comm) = bpf_get_current_comm() {
            (*event).comm = comm;
        }

        Some(&mut *event)
    }
}

/// Copy a finished record into `EVENTS`; on a full ring buffer the drop is counted
#[inline(always)]
fn submit_record<C: EbpfContext>(ctx: &C, event: &DlEvent) {
    if EVENTS.output(event, 0).is_ok() {
        return;
    }
    if let Some(dropped) = DROPPED.get_ptr_mut(0) {
        unsafe { *dropped += 1 };
    }
    warn!(ctx, "ring buffer full, dropping dl event");
}

// ============================================================================
// dlopen
// ============================================================================

#[uprobe]
pub fn dlopen_enter(ctx: ProbeContext) -> u32 {
    match try_dlopen_enter(&ctx) {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

fn try_dlopen_enter(ctx: &ProbeContext) -> Result<(), i64> {
    if !current_is_target() {
        return Ok(());
    }

    let filename: *const u8 = ctx.arg(0).ok_or(1i64)?;
    let flags: i32 = ctx.arg(1).unwrap_or(0);

    let event = begin_record().ok_or(1i64)?;

    // dlopen(NULL) opens the main program; the read faults and leaves the path empty
    let _ = unsafe { bpf_probe_read_user_str_bytes(filename, &mut event.lib_path) };
    on_load_enter(&KernelMaps, event, flags);

    submit_record(ctx, event);
    Ok(())
}

#[uretprobe]
pub fn dlopen_return(ctx: RetProbeContext) -> u32 {
    match try_dlopen_return(&ctx) {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

fn try_dlopen_return(ctx: &RetProbeContext) -> Result<(), i64> {
    if !current_is_target() {
        return Ok(());
    }

    let handle: u64 = ctx.ret().unwrap_or(0);

    let event = begin_record().ok_or(1i64)?;
    on_load_return(&KernelMaps, event, handle);

    submit_record(ctx, event);
    Ok(())
}

// ============================================================================
// dlclose
// ============================================================================

#[uprobe]
pub fn dlclose_enter(ctx: ProbeContext) -> u32 {
    match try_dlclose_enter(&ctx) {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

fn try_dlclose_enter(ctx: &ProbeContext) -> Result<(), i64> {
    if !current_is_target() {
        return Ok(());
    }

    let handle: u64 = ctx.arg(0).ok_or(1i64)?;

    let event = begin_record().ok_or(1i64)?;
    on_unload_enter(&KernelMaps, event, handle);

    submit_record(ctx, event);
    Ok(())
}

/// The unload was already reported on entry; emitting here would duplicate it.
/// The return code is not captured.
#[uretprobe]
pub fn dlclose_return(_ctx: RetProbeContext) -> u32 {
    0
}

// ============================================================================
// dlsym
// ============================================================================

#[uprobe]
pub fn dlsym_enter(ctx: ProbeContext) -> u32 {
    match try_dlsym_enter(&ctx) {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

fn try_dlsym_enter(ctx: &ProbeContext) -> Result<(), i64> {
    if !current_is_target() {
        return Ok(());
    }

    let handle: u64 = ctx.arg(0).ok_or(1i64)?;
    let symbol: *const u8 = ctx.arg(1).ok_or(1i64)?;

    let event = begin_record().ok_or(1i64)?;

    let _ = unsafe { bpf_probe_read_user_str_bytes(symbol, &mut event.symbol) };
    on_symbol_enter(&KernelMaps, event, handle);

    submit_record(ctx, event);
    Ok(())
}

#[uretprobe]
pub fn dlsym_return(ctx: RetProbeContext) -> u32 {
    match try_dlsym_return(&ctx) {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

fn try_dlsym_return(ctx: &RetProbeContext) -> Result<(), i64> {
    if !current_is_target() {
        return Ok(());
    }

    let address: u64 = ctx.ret().unwrap_or(0);

    let event = begin_record().ok_or(1i64)?;
    on_symbol_return(event, address);

    submit_record(ctx, event);
    Ok(())
}

#[cfg(all(not(test), target_os = "none"))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    unsafe { core::hint::unreachable_unchecked() }
}
