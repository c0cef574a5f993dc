//! # Event Processing
//!
//! Consumes raw [`DlEvent`] records from the ring buffer and turns each
//! enter/return pair into one [`LinkEvent`].
//!
//! ## Pairing
//!
//! | Kind      | Enter            | Return                   | Emitted on      |
//! |-----------|------------------|--------------------------|-----------------|
//! | `load`    | path, flags      | handle                   | return          |
//! | `symbol`  | symbol, library  | resolved address         | return          |
//! | `unload`  | handle, path     | *(not produced)*         | enter           |
//!
//! Pending enters are kept per `(pid, tid, kind)` as a stack, so a library
//! constructor that calls `dlopen` from inside `dlopen` pairs correctly.
//! A return with nothing pending (its enter was dropped) is emitted on its
//! own with `<unknown>` in place of what only the enter carried. Enters that
//! never see a return are emitted the same way when evicted or flushed.

use std::collections::HashMap;

use dlmon_common::{c_str_bytes, DlEvent, EVENT_LOAD, EVENT_SYMBOL, EVENT_UNLOAD};
use log::{debug, warn};

use super::clock::{ClockReconciler, ClockSource};
use super::flags::decode_flags;
use super::path_resolver::PathResolver;
use super::render::{LinkEvent, LinkKind};
use crate::domain::{Address, Pid, ThreadKey, Tid};
use crate::protocol::UNKNOWN;

/// Enters awaiting their return, across all threads
pub const MAX_PENDING_CALLS: usize = 4096;

type PendingKey = (ThreadKey, u32);

struct PendingCall {
    seq: u64,
    /// Rendered when the enter was consumed
    timestamp: String,
    record: DlEvent,
}

/// Counters reported at shutdown
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorStats {
    pub records: u64,
    pub emitted: u64,
    pub orphan_returns: u64,
    pub unanswered_enters: u64,
    pub unknown_kinds: u64,
}

/// Encapsulates pairing state and the decoding dependencies
pub struct EventProcessor<C: ClockSource> {
    clock: ClockReconciler<C>,
    resolver: PathResolver,
    pending: HashMap<PendingKey, Vec<PendingCall>>,
    pending_len: usize,
    next_seq: u64,
    pub stats: ProcessorStats,
}

fn text_or_unknown(buf: &[u8]) -> String {
    let bytes = c_str_bytes(buf);
    if bytes.is_empty() {
        UNKNOWN.to_string()
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    }
}

fn thread_of(record: &DlEvent) -> ThreadKey {
    ThreadKey { pid: Pid(record.pid), tid: Tid(record.tid) }
}

impl<C: ClockSource> EventProcessor<C> {
    #[must_use]
    pub fn new(clock: ClockReconciler<C>, resolver: PathResolver) -> Self {
        Self {
            clock,
            resolver,
            pending: HashMap::new(),
            pending_len: 0,
            next_seq: 0,
            stats: ProcessorStats::default(),
        }
    }

    /// Number of enters still waiting for their return
    #[must_use]
    pub fn pending_calls(&self) -> usize {
        self.pending_len
    }

    /// Process a single record, appending any completed events to `out`
    pub fn process_record(&mut self, record: &DlEvent, out: &mut Vec<LinkEvent>) {
        self.stats.records += 1;

        match (record.kind, record.is_return()) {
            (EVENT_UNLOAD, false) => {
                let timestamp = self.clock.format(record.timestamp_ns);
                let event = self.unload_event(timestamp, record);
                self.emit(event, out);
            }
            (EVENT_UNLOAD, true) => {
                debug!("ignoring unload return record from pid {}", record.pid);
            }
            (EVENT_LOAD | EVENT_SYMBOL, false) => {
                self.push_pending(record, out);
            }
            (EVENT_LOAD | EVENT_SYMBOL, true) => {
                let event = match self.pop_pending(record) {
                    Some(enter) => self.paired_event(enter, record),
                    None => {
                        self.stats.orphan_returns += 1;
                        let timestamp = self.clock.format(record.timestamp_ns);
                        self.orphan_return_event(timestamp, record)
                    }
                };
                self.emit(event, out);
            }
            (kind, _) => {
                self.stats.unknown_kinds += 1;
                warn!("Unknown event kind: {kind}");
            }
        }
    }

    /// Emit every enter still waiting for a return, oldest first
    pub fn flush_pending(&mut self) -> Vec<LinkEvent> {
        let mut calls: Vec<PendingCall> = self.pending.drain().flat_map(|(_, stack)| stack).collect();
        calls.sort_by_key(|call| call.seq);
        self.pending_len = 0;

        let mut out = Vec::with_capacity(calls.len());
        for call in calls {
            self.stats.unanswered_enters += 1;
            let event = self.unanswered_event(call);
            self.emit(event, &mut out);
        }
        out
    }

    fn emit(&mut self, event: LinkEvent, out: &mut Vec<LinkEvent>) {
        self.stats.emitted += 1;
        out.push(event);
    }

    fn push_pending(&mut self, record: &DlEvent, out: &mut Vec<LinkEvent>) {
        if self.pending_len >= MAX_PENDING_CALLS {
            if let Some(oldest) = self.evict_oldest() {
                self.stats.unanswered_enters += 1;
                let event = self.unanswered_event(oldest);
                self.emit(event, out);
            }
        }

        let call = PendingCall {
            seq: self.next_seq,
            timestamp: self.clock.format(record.timestamp_ns),
            record: *record,
        };
        self.next_seq += 1;
        self.pending_len += 1;
        self.pending.entry((thread_of(record), record.kind)).or_default().push(call);
    }

    fn pop_pending(&mut self, record: &DlEvent) -> Option<PendingCall> {
        let key = (thread_of(record), record.kind);
        let stack = self.pending.get_mut(&key)?;
        let call = stack.pop();
        if stack.is_empty() {
            self.pending.remove(&key);
        }
        if call.is_some() {
            self.pending_len -= 1;
        }
        call
    }

    fn evict_oldest(&mut self) -> Option<PendingCall> {
        let key = self
            .pending
            .iter()
            .filter_map(|(key, stack)| stack.first().map(|call| (call.seq, *key)))
            .min_by_key(|(seq, _)| *seq)
            .map(|(_, key)| key)?;

        let stack = self.pending.get_mut(&key)?;
        let call = stack.remove(0);
        if stack.is_empty() {
            self.pending.remove(&key);
        }
        self.pending_len -= 1;
        debug!("pending table full, evicting enter from pid {}", call.record.pid);
        Some(call)
    }

    /// Library path as reported for `pid`; empty becomes `<unknown>`
    fn library_path(&mut self, pid: Pid, raw: &[u8], loaded: bool) -> String {
        let requested = String::from_utf8_lossy(c_str_bytes(raw)).into_owned();
        if requested.is_empty() {
            return UNKNOWN.to_string();
        }
        if loaded {
            self.resolver.resolve_loaded(pid, &requested)
        } else {
            self.resolver.resolve(pid, &requested)
        }
    }

    fn paired_event(&mut self, enter: PendingCall, ret: &DlEvent) -> LinkEvent {
        let pid = Pid(enter.record.pid);
        let process = text_or_unknown(&enter.record.comm);

        let kind = if enter.record.kind == EVENT_LOAD {
            // The enter's path survives even if the kernel lost the pending slot
            let raw = if c_str_bytes(&enter.record.lib_path).is_empty() {
                &ret.lib_path
            } else {
                &enter.record.lib_path
            };
            LinkKind::Load {
                path: self.library_path(pid, raw, ret.lib_addr != 0),
                base: Some(Address(ret.lib_addr)),
                flags: decode_flags(enter.record.flags),
            }
        } else {
            LinkKind::Symbol {
                symbol: text_or_unknown(&enter.record.symbol),
                library: self.library_path(pid, &enter.record.lib_path, false),
                address: Some(Address(ret.symbol_addr)),
            }
        };

        LinkEvent { timestamp: enter.timestamp, process, pid, kind }
    }

    fn orphan_return_event(&mut self, timestamp: String, ret: &DlEvent) -> LinkEvent {
        let pid = Pid(ret.pid);

        let kind = if ret.kind == EVENT_LOAD {
            LinkKind::Load {
                path: self.library_path(pid, &ret.lib_path, ret.lib_addr != 0),
                base: Some(Address(ret.lib_addr)),
                flags: UNKNOWN.to_string(),
            }
        } else {
            LinkKind::Symbol {
                symbol: UNKNOWN.to_string(),
                library: UNKNOWN.to_string(),
                address: Some(Address(ret.symbol_addr)),
            }
        };

        LinkEvent { timestamp, process: text_or_unknown(&ret.comm), pid, kind }
    }

    fn unanswered_event(&mut self, call: PendingCall) -> LinkEvent {
        let enter = &call.record;
        let pid = Pid(enter.pid);

        let kind = if enter.kind == EVENT_LOAD {
            LinkKind::Load {
                path: self.library_path(pid, &enter.lib_path, false),
                base: None,
                flags: decode_flags(enter.flags),
            }
        } else {
            LinkKind::Symbol {
                symbol: text_or_unknown(&enter.symbol),
                library: self.library_path(pid, &enter.lib_path, false),
                address: None,
            }
        };

        LinkEvent { timestamp: call.timestamp, process: text_or_unknown(&enter.comm), pid, kind }
    }

    fn unload_event(&mut self, timestamp: String, enter: &DlEvent) -> LinkEvent {
        let pid = Pid(enter.pid);
        LinkEvent {
            timestamp,
            process: text_or_unknown(&enter.comm),
            pid,
            kind: LinkKind::Unload {
                path: self.library_path(pid, &enter.lib_path, false),
                handle: Address(enter.lib_addr),
            },
        }
    }
}
