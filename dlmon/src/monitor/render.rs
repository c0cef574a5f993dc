//! Correlated link events and their text rendering

use std::borrow::Cow;
use std::fmt::Write as _;
use std::io::{self, Write};

use crate::domain::{Address, Pid};
use crate::protocol::{
    KEY_ADDRESS, KEY_BASE, KEY_FLAGS, KEY_HANDLE, KEY_LIBRARY, KEY_PATH, KEY_PID, KEY_PROCESS,
    KEY_SYMBOL, LABEL_LOAD, LABEL_SYMBOL, LABEL_UNLOAD, UNKNOWN,
};

/// One logical dynamic-linking event, after enter/return pairing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEvent {
    /// Rendered wall-clock time of the enter record
    pub timestamp: String,
    pub process: String,
    pub pid: Pid,
    pub kind: LinkKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkKind {
    Load {
        /// Canonical path, or [`UNKNOWN`]
        path: String,
        /// Handle returned by `dlopen`; `None` if the return was never seen
        base: Option<Address>,
        /// Decoded flags, or [`UNKNOWN`] if the enter was never seen
        flags: String,
    },
    Unload {
        path: String,
        handle: Address,
    },
    Symbol {
        symbol: String,
        library: String,
        /// Address returned by `dlsym`; `None` if the return was never seen
        address: Option<Address>,
    },
}

impl LinkKind {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            LinkKind::Load { .. } => LABEL_LOAD,
            LinkKind::Unload { .. } => LABEL_UNLOAD,
            LinkKind::Symbol { .. } => LABEL_SYMBOL,
        }
    }
}

fn or_unknown(address: Option<Address>) -> String {
    address.map_or_else(|| UNKNOWN.to_string(), |a| a.to_string())
}

/// Escape control characters so a value always stays on its own line
///
/// Paths, symbols and process names come from the traced program; a raw
/// newline in one of them would otherwise start a new line or block.
#[must_use]
pub fn escape_value(value: &str) -> Cow<'_, str> {
    if !value.chars().any(char::is_control) {
        return Cow::Borrowed(value);
    }

    let mut escaped = String::with_capacity(value.len() + 8);
    for c in value.chars() {
        if c.is_control() {
            escaped.extend(c.escape_default());
        } else {
            escaped.push(c);
        }
    }
    Cow::Owned(escaped)
}

/// Render one event as a complete, blank-line terminated block
#[must_use]
pub fn render_block(event: &LinkEvent) -> String {
    let mut block = String::with_capacity(160);

    // Writing into a String cannot fail
    let _ = writeln!(block, "[{}] event: {}", event.timestamp, event.kind.label());
    let _ = writeln!(block, "{KEY_PROCESS}: {}", escape_value(&event.process));
    let _ = writeln!(block, "{KEY_PID}: {}", event.pid);

    match &event.kind {
        LinkKind::Load { path, base, flags } => {
            let _ = writeln!(block, "{KEY_PATH}: {}", escape_value(path));
            let _ = writeln!(block, "{KEY_BASE}: {}", or_unknown(*base));
            let _ = writeln!(block, "{KEY_FLAGS}: {flags}");
        }
        LinkKind::Unload { path, handle } => {
            let _ = writeln!(block, "{KEY_PATH}: {}", escape_value(path));
            let _ = writeln!(block, "{KEY_HANDLE}: {handle}");
        }
        LinkKind::Symbol { symbol, library, address } => {
            let _ = writeln!(block, "{KEY_SYMBOL}: {}", escape_value(symbol));
            let _ = writeln!(block, "{KEY_LIBRARY}: {}", escape_value(library));
            let _ = writeln!(block, "{KEY_ADDRESS}: {}", or_unknown(*address));
        }
    }

    block.push('\n');
    block
}

/// Write one event block to `out`
///
/// # Errors
/// Returns any error from the underlying writer
pub fn write_block<W: Write>(out: &mut W, event: &LinkEvent) -> io::Result<()> {
    out.write_all(render_block(event).as_bytes())
}
