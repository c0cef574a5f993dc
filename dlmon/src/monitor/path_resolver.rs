//! Best-effort canonical library paths
//!
//! `dlopen` callers pass whatever the loader accepts: bare sonames, relative
//! paths, symlinks. The path reported for a load is re-resolved through the
//! traced process's own loader mappings, then symlinks are resolved. Any
//! failure falls back to the string the caller passed.
//!
//! Results are cached per `(pid, requested)` so every event about the same
//! library in the same process reports the same path, even after the library
//! has been unmapped again.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use super::memory_maps::find_mapped_library;
use crate::domain::Pid;

/// Cache entries kept before the cache is reset
const MAX_CACHED_PATHS: usize = 16 * 1024;

pub struct PathResolver {
    enabled: bool,
    cache: HashMap<(Pid, String), String>,
}

impl PathResolver {
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self { enabled, cache: HashMap::new() }
    }

    /// Resolve a path; only successful resolutions are remembered
    pub fn resolve(&mut self, pid: Pid, requested: &str) -> String {
        self.lookup(pid, requested, false)
    }

    /// Resolve the path of a library that was just loaded successfully
    ///
    /// The result is remembered even when it is the fallback, so a later
    /// unload reports exactly what the load reported.
    pub fn resolve_loaded(&mut self, pid: Pid, requested: &str) -> String {
        self.lookup(pid, requested, true)
    }

    fn lookup(&mut self, pid: Pid, requested: &str, remember_fallback: bool) -> String {
        if !self.enabled || requested.is_empty() {
            return requested.to_string();
        }

        let key = (pid, requested.to_string());
        if let Some(hit) = self.cache.get(&key) {
            return hit.clone();
        }

        let resolved = canonicalize_for(pid, requested);
        let remember = resolved.is_some() || remember_fallback;
        let path = resolved.unwrap_or_else(|| requested.to_string());

        if remember {
            if self.cache.len() >= MAX_CACHED_PATHS {
                debug!("path cache full, resetting");
                self.cache.clear();
            }
            self.cache.insert(key, path.clone());
        }

        path
    }
}

/// Canonical path of `requested` as seen by process `pid`
fn canonicalize_for(pid: Pid, requested: &str) -> Option<String> {
    let candidate: PathBuf = if Path::new(requested).is_absolute() {
        PathBuf::from(requested)
    } else if requested.contains('/') {
        // Relative to the caller's working directory, not ours
        PathBuf::from(format!("/proc/{pid}/cwd")).join(requested)
    } else {
        match find_mapped_library(pid, requested) {
            Ok(path) => path,
            Err(e) => {
                debug!("{e:#}");
                return None;
            }
        }
    };

    fs::canonicalize(&candidate).ok().map(|p| p.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn own_pid() -> Pid {
        Pid(std::process::id())
    }

    #[test]
    fn test_disabled_returns_input() {
        let mut resolver = PathResolver::new(false);
        assert_eq!(resolver.resolve(own_pid(), "libm.so.6"), "libm.so.6");
    }

    #[test]
    fn test_empty_stays_empty() {
        let mut resolver = PathResolver::new(true);
        assert_eq!(resolver.resolve(own_pid(), ""), "");
    }

    #[test]
    fn test_unknown_library_falls_back_to_input() {
        let mut resolver = PathResolver::new(true);
        let name = "libdefinitely-not-mapped-anywhere.so.9";
        assert_eq!(resolver.resolve(own_pid(), name), name);
        assert!(resolver.cache.is_empty());
    }

    #[test]
    fn test_loaded_fallback_is_remembered() {
        let mut resolver = PathResolver::new(true);
        let name = "libdefinitely-not-mapped-anywhere.so.9";
        assert_eq!(resolver.resolve_loaded(own_pid(), name), name);
        assert_eq!(resolver.cache.len(), 1);
    }

    #[test]
    fn test_absolute_path_is_canonicalized() {
        let mut resolver = PathResolver::new(true);
        assert_eq!(resolver.resolve(own_pid(), "/proc/../proc"), "/proc");
    }

    #[test]
    fn test_cached_result_is_stable() {
        let mut resolver = PathResolver::new(true);
        let first = resolver.resolve_loaded(Pid(u32::MAX), "libm.so.6");
        let second = resolver.resolve(Pid(u32::MAX), "libm.so.6");
        assert_eq!(first, second);
    }
}
