//! Line-oriented text protocol shared by the renderer and the parsers
//!
//! ```text
//! [2024-01-01 10:00:00.000000] event: load
//! process: math_test
//! pid: 1234
//! path: /usr/lib/libm.so.6
//! base: 0x7f0000
//! flags: RTLD_LAZY
//!
//! ```
//!
//! One block per event. A block starts at a line beginning with `[` and runs
//! until the next such line; every block ends with a blank line.

/// First byte of a header line
pub const HEADER_MARKER: char = '[';

/// Separates the timestamp from the event type in a header line
pub const TYPE_SEPARATOR: &str = "] event:";

/// Placeholder for a value the probes could not observe
pub const UNKNOWN: &str = "<unknown>";

/// Event type labels
pub const LABEL_LOAD: &str = "load";
pub const LABEL_UNLOAD: &str = "unload";
pub const LABEL_SYMBOL: &str = "symbol";

/// Detail keys
pub const KEY_PROCESS: &str = "process";
pub const KEY_PID: &str = "pid";
pub const KEY_PATH: &str = "path";
pub const KEY_BASE: &str = "base";
pub const KEY_FLAGS: &str = "flags";
pub const KEY_HANDLE: &str = "handle";
pub const KEY_SYMBOL: &str = "symbol";
pub const KEY_LIBRARY: &str = "library";
pub const KEY_ADDRESS: &str = "address";
