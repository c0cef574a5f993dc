//! Pre-flight checks for dlmon
//!
//! Validates system requirements before attempting to load eBPF programs.
//! Provides clear, actionable error messages when requirements aren't met.

#![allow(unsafe_code)] // geteuid() requires unsafe

use anyhow::{bail, Context, Result};

/// Minimum kernel version required for the BPF ring buffer
const MIN_KERNEL_VERSION: (u32, u32) = (5, 8);

/// Run all pre-flight checks before eBPF loading
///
/// # Errors
/// Returns an error describing the first unmet requirement
pub fn run_preflight_checks() -> Result<()> {
    check_privileges()?;
    check_kernel_version()?;
    check_self_comm()?;
    Ok(())
}

/// Check if running with sufficient privileges for eBPF
fn check_privileges() -> Result<()> {
    if unsafe { libc::geteuid() } == 0 {
        return Ok(());
    }

    // CAP_BPF + CAP_PERFMON would do, but checking capabilities needs more
    // than libc offers; require root
    bail!(
        "Permission denied: dlmon requires root privileges to load eBPF programs.\n\n\
         Run with: sudo dlmon ..."
    );
}

/// Parse "major.minor" out of a kernel release such as "6.1.0-arch1-1"
fn parse_kernel_release(release: &str) -> Option<(u32, u32)> {
    let mut parts = release.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor: String = parts.next()?.chars().take_while(char::is_ascii_digit).collect();
    Some((major, minor.parse().ok()?))
}

/// Check if the kernel version is sufficient for eBPF features
fn check_kernel_version() -> Result<()> {
    let version_str = std::fs::read_to_string("/proc/version")
        .context("Failed to read kernel version from /proc/version")?;

    // "Linux version 5.15.0-generic ..."
    let release = version_str.split_whitespace().nth(2).unwrap_or("unknown");

    let Some((major, minor)) = parse_kernel_release(release) else {
        // Can't parse, assume it's fine
        return Ok(());
    };

    if (major, minor) < MIN_KERNEL_VERSION {
        bail!(
            "Kernel version {major}.{minor} is too old.\n\n\
             dlmon requires Linux {}.{} or newer for eBPF ring buffer support.\n\
             Current kernel: {release}",
            MIN_KERNEL_VERSION.0,
            MIN_KERNEL_VERSION.1,
        );
    }

    Ok(())
}

/// The monitor excludes itself by task name
fn check_self_comm() -> Result<()> {
    let comm = std::fs::read_to_string("/proc/self/comm").context(
        "Cannot read /proc/self/comm\n\n\
         dlmon needs its own task name to avoid tracing itself.\n\
         Is /proc mounted?",
    )?;
    if comm.trim().is_empty() {
        bail!("/proc/self/comm is empty");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kernel_release() {
        assert_eq!(parse_kernel_release("5.15.0-generic"), Some((5, 15)));
        assert_eq!(parse_kernel_release("6.1.0-arch1-1"), Some((6, 1)));
        assert_eq!(parse_kernel_release("5.8"), Some((5, 8)));
        assert_eq!(parse_kernel_release("4.19-rc1"), Some((4, 19)));
        assert_eq!(parse_kernel_release("six.1"), None);
        assert_eq!(parse_kernel_release("unknown"), None);
    }

    #[test]
    fn test_old_kernel_compares_below_minimum() {
        assert!(parse_kernel_release("5.4.0").unwrap() < MIN_KERNEL_VERSION);
        assert!(parse_kernel_release("5.10.0").unwrap() >= MIN_KERNEL_VERSION);
    }

    #[test]
    fn test_self_comm_readable() {
        assert!(check_self_comm().is_ok());
    }
}
