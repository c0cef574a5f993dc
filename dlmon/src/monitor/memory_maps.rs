//! Memory mapping utilities for process address space analysis
//!
//! This module parses /proc/pid/maps to find where the dynamic loader of a
//! traced process actually mapped a library from, which turns a bare soname
//! such as `libm.so.6` into the file the loader picked.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::Pid;

/// Backing file of one line of /proc/pid/maps
///
/// Format: "start-end perms offset dev inode pathname". Anonymous and pseudo
/// mappings (`[heap]`, `[vdso]`, ...) and malformed lines yield `None`.
#[must_use]
pub fn parse_maps_line(line: &str) -> Option<PathBuf> {
    let range = line.split_whitespace().next()?;
    let (start, end) = range.split_once('-')?;
    u64::from_str_radix(start, 16).ok()?;
    u64::from_str_radix(end, 16).ok()?;

    // No field before the pathname contains a slash
    let path_start = line.find('/')?;
    let path = line[path_start..].trim_end().trim_end_matches(" (deleted)");

    Some(PathBuf::from(path))
}

/// Backing files of every file-backed mapping of a process, in address order
///
/// # Errors
/// Returns an error if /proc/pid/maps cannot be read
pub fn read_file_mappings(pid: Pid) -> Result<Vec<PathBuf>> {
    let maps_path = format!("/proc/{pid}/maps");
    let maps = fs::read_to_string(&maps_path).context(format!("Failed to read {maps_path}"))?;
    Ok(maps.lines().filter_map(parse_maps_line).collect())
}

/// Whether a mapped file is the library a `dlopen` caller asked for by name
///
/// `libm.so.6` matches `/usr/lib/libm.so.6`; `libfoo.so` also matches the
/// versioned `/usr/lib/libfoo.so.1` it usually symlinks to.
#[must_use]
pub fn mapping_matches(mapped: &Path, requested: &str) -> bool {
    let Some(name) = mapped.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name == requested || name.strip_prefix(requested).is_some_and(|rest| rest.starts_with('.'))
}

/// Find the file a library requested by bare name was mapped from
///
/// # Errors
/// Returns an error if /proc/pid/maps cannot be read or no mapping matches
pub fn find_mapped_library(pid: Pid, requested: &str) -> Result<PathBuf> {
    select_library(&read_file_mappings(pid)?, requested)
        .with_context(|| format!("{requested} is not mapped in process {pid}"))
}

/// Exact file-name matches win over versioned ones
fn select_library(mappings: &[PathBuf], requested: &str) -> Option<PathBuf> {
    let exact = mappings
        .iter()
        .find(|path| path.file_name().and_then(|n| n.to_str()) == Some(requested));

    exact.or_else(|| mappings.iter().find(|path| mapping_matches(path, requested))).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAPS: &str = "\
55d4c3a00000-55d4c3a01000 r--p 00000000 08:01 1311 /usr/bin/math_test
7f0000000000-7f0000010000 r--p 00000000 08:01 2048 /usr/lib/x86_64-linux-gnu/libm.so.6
7f0000010000-7f0000090000 r-xp 00010000 08:01 2048 /usr/lib/x86_64-linux-gnu/libm.so.6
7f00000a0000-7f00000a1000 r--p 00000000 08:01 4096 /opt/app/libfoo.so.1.2 (deleted)
7ffd00000000-7ffd00021000 rw-p 00000000 00:00 0                          [stack]
7ffd00100000-7ffd00102000 r-xp 00000000 00:00 0                          [vdso]";

    fn mappings() -> Vec<PathBuf> {
        MAPS.lines().filter_map(parse_maps_line).collect()
    }

    #[test]
    fn test_parse_maps_line_skips_pseudo_mappings() {
        let parsed = mappings();
        assert_eq!(parsed.len(), 4);
        assert_eq!(parsed[1], PathBuf::from("/usr/lib/x86_64-linux-gnu/libm.so.6"));
        assert_eq!(parsed[3], PathBuf::from("/opt/app/libfoo.so.1.2"));
    }

    #[test]
    fn test_parse_maps_line_rejects_lines_without_range() {
        assert_eq!(parse_maps_line("not-hex r--p 0 08:01 1 /usr/lib/libm.so.6"), None);
        assert_eq!(parse_maps_line("/usr/lib/libm.so.6"), None);
    }

    #[test]
    fn test_select_library_by_soname() {
        assert_eq!(
            select_library(&mappings(), "libm.so.6"),
            Some(PathBuf::from("/usr/lib/x86_64-linux-gnu/libm.so.6"))
        );
    }

    #[test]
    fn test_select_library_by_unversioned_name() {
        assert_eq!(select_library(&mappings(), "libfoo.so"), Some(PathBuf::from("/opt/app/libfoo.so.1.2")));
        assert_eq!(select_library(&mappings(), "libfo"), None);
        assert_eq!(select_library(&mappings(), "libz.so.1"), None);
    }

    #[test]
    fn test_read_own_mappings() {
        let pid = Pid(std::process::id());
        let parsed = read_file_mappings(pid).expect("own maps are readable");
        assert!(!parsed.is_empty());
    }
}
