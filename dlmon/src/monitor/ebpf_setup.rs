//! # eBPF Program Loading and Attachment
//!
//! Loads compiled eBPF bytecode, configures the process filter and attaches
//! the dynamic-linking probes.
//!
//! ## Functions
//!
//! - [`load_ebpf_program()`] - Load eBPF bytecode from embedded binary
//! - [`configure_filter()`] - Write target and monitor names into `FILTER`
//! - [`attach_dl_probes()`] - Attach the six `dlopen`/`dlclose`/`dlsym` probes
//!
//! ## Attachment Points
//!
//! | Program          | Kind       | Symbol    |
//! |------------------|------------|-----------|
//! | `dlopen_enter`   | uprobe     | `dlopen`  |
//! | `dlopen_return`  | uretprobe  | `dlopen`  |
//! | `dlclose_enter`  | uprobe     | `dlclose` |
//! | `dlclose_return` | uretprobe  | `dlclose` |
//! | `dlsym_enter`    | uprobe     | `dlsym`   |
//! | `dlsym_return`   | uretprobe  | `dlsym`   |
//!
//! Probes are attached system-wide (no pid); the kernel side filters by
//! process name.

use anyhow::{Context, Result};
use aya::{include_bytes_aligned, maps::Array, programs::UProbe, Ebpf};
use aya_log::EbpfLogger;
use dlmon_common::{comm_from_bytes, Comm, COMM_LEN, FILTER_MONITOR, FILTER_TARGET};
use log::{info, warn};

use crate::domain::MonitorError;

/// Probe program name and the library symbol it instruments
pub const DL_PROBES: [(&str, &str); 6] = [
    ("dlopen_enter", "dlopen"),
    ("dlopen_return", "dlopen"),
    ("dlclose_enter", "dlclose"),
    ("dlclose_return", "dlclose"),
    ("dlsym_enter", "dlsym"),
    ("dlsym_return", "dlsym"),
];

/// Load the eBPF program binary
///
/// Always uses the release build because debug builds pull in formatting
/// code that's incompatible with BPF.
///
/// # Errors
/// Returns an error if the eBPF program binary cannot be loaded
pub fn load_ebpf_program() -> Result<Ebpf, MonitorError> {
    let bpf =
        Ebpf::load(include_bytes_aligned!("../../../target/bpfel-unknown-none/release/dlmon"))?;
    Ok(bpf)
}

/// Initialize eBPF logger
pub fn init_ebpf_logger(bpf: &mut Ebpf) {
    if let Err(e) = EbpfLogger::init(bpf) {
        warn!("Failed to initialize eBPF logger: {e}");
    }
}

/// Encode a process name for the kernel filter
///
/// Kernel task names hold at most 15 bytes, so a longer target could never
/// match and is rejected instead of silently truncated.
///
/// # Errors
/// Returns [`MonitorError::TargetNameTooLong`] for names over 15 bytes
pub fn encode_target(name: &str) -> Result<Comm, MonitorError> {
    if name.len() >= COMM_LEN {
        return Err(MonitorError::TargetNameTooLong(name.to_string()));
    }
    Ok(comm_from_bytes(name.as_bytes()))
}

/// Name of the monitor's own task, as the kernel reports it
///
/// # Errors
/// Returns an error if /proc/self/comm cannot be read
pub fn own_comm() -> Result<Comm> {
    let comm = std::fs::read_to_string("/proc/self/comm")
        .context("Failed to read /proc/self/comm")?;
    Ok(comm_from_bytes(comm.trim_end_matches('\n').as_bytes()))
}

/// Write the process filter into the `FILTER` map
///
/// Must run before [`attach_dl_probes()`] so no record escapes the filter.
///
/// # Errors
/// Returns an error if the target is too long or map access fails
pub fn configure_filter(
    bpf: &mut Ebpf,
    target: Option<&str>,
    monitor: &Comm,
) -> Result<(), MonitorError> {
    let target = match target {
        Some(name) if !name.is_empty() => encode_target(name)?,
        _ => [0u8; COMM_LEN],
    };

    let mut filter: Array<_, Comm> =
        Array::try_from(bpf.map_mut("FILTER").ok_or(MonitorError::MapNotFound("FILTER"))?)?;
    filter.set(FILTER_TARGET, target, 0)?;
    filter.set(FILTER_MONITOR, *monitor, 0)?;

    info!("✓ Configured process filter");
    Ok(())
}

/// Load and attach every probe in [`DL_PROBES`] to `libc_target`
///
/// `libc_target` is a library name or path; aya resolves bare names through
/// the loader cache.
///
/// # Errors
/// Returns an error if any program is missing or fails to load or attach
pub fn attach_dl_probes(bpf: &mut Ebpf, libc_target: &str) -> Result<(), MonitorError> {
    for (probe, symbol) in DL_PROBES {
        let program: &mut UProbe =
            bpf.program_mut(probe).ok_or(MonitorError::ProgramNotFound(probe))?.try_into()?;
        program.load()?;
        program.attach(Some(symbol), 0, libc_target, None).map_err(|e| {
            MonitorError::ProbeAttachFailed {
                probe: probe.to_string(),
                symbol: symbol.to_string(),
                target: libc_target.to_string(),
                error: e.to_string(),
            }
        })?;
        info!("✓ Attached {probe} to {symbol}");
    }

    Ok(())
}
