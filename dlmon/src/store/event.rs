//! Structured events parsed back from text blocks

use std::fmt;

use crate::domain::{Address, ParseError};
use crate::monitor::flags::split_flags;
use crate::protocol::{
    KEY_ADDRESS, KEY_BASE, KEY_FLAGS, KEY_HANDLE, KEY_LIBRARY, KEY_PATH, KEY_PID, KEY_PROCESS,
    KEY_SYMBOL, LABEL_LOAD, LABEL_SYMBOL, LABEL_UNLOAD, UNKNOWN,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    Load,
    Unload,
    Symbol,
    /// Any other label, kept verbatim
    Other(String),
}

impl EventType {
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        match label {
            LABEL_LOAD => EventType::Load,
            LABEL_UNLOAD => EventType::Unload,
            LABEL_SYMBOL => EventType::Symbol,
            other => EventType::Other(other.to_string()),
        }
    }

    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            EventType::Load => LABEL_LOAD,
            EventType::Unload => LABEL_UNLOAD,
            EventType::Symbol => LABEL_SYMBOL,
            EventType::Other(label) => label,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Detail lines in first-seen order; a repeated key overwrites in place
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Details(Vec<(String, String)>);

impl Details {
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let (key, value) = (key.into(), value.into());
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Header timestamp exactly as written; sorts chronologically as text
    pub timestamp: String,
    pub event_type: EventType,
    pub details: Details,
}

/// Split a header line into timestamp and type label
///
/// The timestamp ends at the first `]` that is followed by `event:`.
fn parse_header(line: &str) -> Option<(&str, &str)> {
    let inner = line.strip_prefix('[')?;
    inner.match_indices(']').find_map(|(pos, _)| {
        let rest = inner[pos + 1..].trim_start().strip_prefix("event:")?;
        Some((&inner[..pos], rest.trim()))
    })
}

/// Parse one block of the text protocol
///
/// Blank lines are skipped. Detail lines split at their first colon, both
/// halves trimmed; lines without a colon are ignored.
///
/// # Errors
/// Returns a [`ParseError`] if the block is empty, the header is malformed,
/// or the timestamp is empty
pub fn parse_block(text: &str) -> Result<Event, ParseError> {
    let mut lines = text.lines().map(|l| l.trim_end_matches('\r')).filter(|l| !l.trim().is_empty());

    let header = lines.next().ok_or(ParseError::EmptyBlock)?;
    let (timestamp, label) =
        parse_header(header.trim_start()).ok_or_else(|| ParseError::BadHeader(header.to_string()))?;
    if timestamp.is_empty() {
        return Err(ParseError::EmptyTimestamp);
    }

    let mut details = Details::default();
    for line in lines {
        if let Some((key, value)) = line.split_once(':') {
            details.insert(key.trim(), value.trim());
        }
    }

    Ok(Event { timestamp: timestamp.to_string(), event_type: EventType::from_label(label), details })
}

// ============================================================================
// Typed view
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadDetails {
    pub process: String,
    pub pid: u32,
    /// `None` when reported as `<unknown>`
    pub path: Option<String>,
    /// Returned handle; `Some(0)` for a failed load
    pub base: Option<u64>,
    pub flags: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnloadDetails {
    pub process: String,
    pub pid: u32,
    pub path: Option<String>,
    pub handle: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolDetails {
    pub process: String,
    pub pid: u32,
    pub symbol: Option<String>,
    pub library: Option<String>,
    pub address: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    Load(LoadDetails),
    Unload(UnloadDetails),
    Symbol(SymbolDetails),
}

impl Event {
    /// Strongly typed view of a known event
    ///
    /// `None` for other labels and for events without a numeric pid.
    #[must_use]
    pub fn payload(&self) -> Option<EventPayload> {
        let process = self.details.get(KEY_PROCESS).unwrap_or(UNKNOWN).to_string();
        let pid = self.details.get(KEY_PID)?.parse().ok()?;

        let payload = match self.event_type {
            EventType::Load => EventPayload::Load(LoadDetails {
                process,
                pid,
                path: self.known(KEY_PATH),
                base: self.address(KEY_BASE),
                flags: self.known(KEY_FLAGS).map(|f| split_flags(&f)),
            }),
            EventType::Unload => EventPayload::Unload(UnloadDetails {
                process,
                pid,
                path: self.known(KEY_PATH),
                handle: self.address(KEY_HANDLE),
            }),
            EventType::Symbol => EventPayload::Symbol(SymbolDetails {
                process,
                pid,
                symbol: self.known(KEY_SYMBOL),
                library: self.known(KEY_LIBRARY),
                address: self.address(KEY_ADDRESS),
            }),
            EventType::Other(_) => return None,
        };
        Some(payload)
    }

    fn known(&self, key: &str) -> Option<String> {
        self.details.get(key).filter(|v| *v != UNKNOWN && !v.is_empty()).map(str::to_string)
    }

    fn address(&self, key: &str) -> Option<u64> {
        self.details.get(key).and_then(Address::parse).map(|a| a.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOAD_BLOCK: &str = "[2024-01-01 10:00:00.000000] event: load\nprocess: math_test\npid: 1234\npath: /usr/lib/libm.so.6\nbase: 0x7f0000\nflags: RTLD_LAZY\n";

    #[test]
    fn test_parse_load_block() {
        let event = parse_block(LOAD_BLOCK).unwrap();
        assert_eq!(event.timestamp, "2024-01-01 10:00:00.000000");
        assert_eq!(event.event_type, EventType::Load);

        let details: Vec<_> = event.details.iter().collect();
        assert_eq!(
            details,
            vec![
                ("process", "math_test"),
                ("pid", "1234"),
                ("path", "/usr/lib/libm.so.6"),
                ("base", "0x7f0000"),
                ("flags", "RTLD_LAZY"),
            ]
        );
    }

    #[test]
    fn test_value_keeps_later_colons() {
        let event = parse_block("[t] event: symbol\nsymbol: ns::func\nnot a detail\n").unwrap();
        assert_eq!(event.details.get("symbol"), Some("ns::func"));
        assert_eq!(event.details.len(), 1);
    }

    #[test]
    fn test_repeated_key_overwrites_in_place() {
        let event = parse_block("[t] event: load\na: 1\nb: 2\na: 3\n").unwrap();
        let details: Vec<_> = event.details.iter().collect();
        assert_eq!(details, vec![("a", "3"), ("b", "2")]);
    }

    #[test]
    fn test_other_label_is_kept() {
        let event = parse_block("[t] event:  custom thing \n").unwrap();
        assert_eq!(event.event_type, EventType::Other("custom thing".to_string()));
        assert!(event.payload().is_none());
    }

    #[test]
    fn test_timestamp_may_contain_brackets() {
        let event = parse_block("[a] b] event: load\n").unwrap();
        assert_eq!(event.timestamp, "a] b");
    }

    #[test]
    fn test_header_errors() {
        assert_eq!(parse_block("\n\n"), Err(ParseError::EmptyBlock));
        assert!(matches!(parse_block("hello\n"), Err(ParseError::BadHeader(_))));
        assert!(matches!(parse_block("[t] load\n"), Err(ParseError::BadHeader(_))));
        assert_eq!(parse_block("[] event: load\n"), Err(ParseError::EmptyTimestamp));
    }

    #[test]
    fn test_load_payload() {
        let event = parse_block(LOAD_BLOCK).unwrap();
        assert_eq!(
            event.payload(),
            Some(EventPayload::Load(LoadDetails {
                process: "math_test".to_string(),
                pid: 1234,
                path: Some("/usr/lib/libm.so.6".to_string()),
                base: Some(0x7f_0000),
                flags: Some(vec!["RTLD_LAZY".to_string()]),
            }))
        );
    }

    #[test]
    fn test_unknown_values_become_none() {
        let event = parse_block(
            "[t] event: unload\nprocess: x\npid: 7\npath: <unknown>\nhandle: 0xbeef\n",
        )
        .unwrap();
        let Some(EventPayload::Unload(unload)) = event.payload() else {
            panic!("expected unload payload");
        };
        assert_eq!(unload.path, None);
        assert_eq!(unload.handle, Some(0xbeef));
    }

    #[test]
    fn test_payload_requires_pid() {
        let event = parse_block("[t] event: symbol\nsymbol: cos\n").unwrap();
        assert!(event.payload().is_none());
    }
}
