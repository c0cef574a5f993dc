//! CLI argument definitions

use clap::Parser;

use crate::monitor::ClockMode;

#[derive(Parser, Debug)]
#[command(
    name = "dlmon",
    version,
    about = "Trace dlopen, dlsym and dlclose calls system-wide",
    after_help = "\
EXAMPLES:
    sudo dlmon                               Monitor every process except dlmon
    sudo dlmon math_test                     Monitor processes named math_test
    sudo dlmon --libc /usr/lib/libc.so.6     Probe a specific C library
    sudo dlmon --summary my-app 2>counts     Print per-type counts on exit"
)]
pub struct Args {
    /// Exact process name to monitor (kernel task name, at most 15 bytes)
    #[arg(value_name = "PROCESS")]
    pub process: Option<String>,

    /// Library providing dlopen/dlclose/dlsym
    #[arg(long, value_name = "PATH", default_value = "libc")]
    pub libc: String,

    /// Sample the realtime/monotonic clock offset once at startup
    #[arg(long)]
    pub fixed_clock: bool,

    /// Report library paths exactly as requested, without canonicalizing
    #[arg(long)]
    pub no_resolve: bool,

    /// Re-parse the output stream and print per-type counts to stderr on exit
    #[arg(long)]
    pub summary: bool,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    #[must_use]
    pub fn clock_mode(&self) -> ClockMode {
        if self.fixed_clock {
            ClockMode::Fixed
        } else {
            ClockMode::PerEvent
        }
    }

    /// Target name, with an empty argument meaning "no filter"
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        self.process.as_deref().filter(|p| !p.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["dlmon"]);
        assert_eq!(args.target(), None);
        assert_eq!(args.libc, "libc");
        assert_eq!(args.clock_mode(), ClockMode::PerEvent);
        assert!(!args.no_resolve && !args.summary && !args.quiet);
    }

    #[test]
    fn test_all_options() {
        let args = Args::parse_from([
            "dlmon",
            "--libc",
            "/usr/lib/libc.so.6",
            "--fixed-clock",
            "--no-resolve",
            "--summary",
            "-q",
            "math_test",
        ]);
        assert_eq!(args.target(), Some("math_test"));
        assert_eq!(args.libc, "/usr/lib/libc.so.6");
        assert_eq!(args.clock_mode(), ClockMode::Fixed);
        assert!(args.no_resolve && args.summary && args.quiet);
    }

    #[test]
    fn test_empty_process_means_all() {
        let args = Args::parse_from(["dlmon", ""]);
        assert_eq!(args.target(), None);
    }
}
