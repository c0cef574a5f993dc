//! # dlmon - eBPF-based Dynamic Linking Monitor
//!
//! dlmon watches `dlopen`, `dlsym` and `dlclose` calls in every process on
//! the host (or in processes with one exact name) and reports each call as a
//! block of plain text. The same crate also reads that text back into
//! structured events.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  Monitored processes (libc)                     │
//! │               dlopen / dlsym / dlclose calls                    │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ uprobes + uretprobes
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   eBPF Programs (Kernel)                        │
//! │  • process filter (FILTER)                                      │
//! │  • per-thread pending loads, per-process live handles           │
//! │  • one DlEvent per probe into the EVENTS ring buffer            │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ ring buffer records
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      dlmon (This Crate)                         │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │   Monitor    │──▶│    Event     │──▶│    Render    │──▶ stdout│
//! │  │ (eBPF, ring) │   │  Processor   │   │   (blocks)   │         │
//! │  └──────────────┘   └──────────────┘   └──────────────┘         │
//! │                                                                 │
//! │  text ──▶ ┌──────────────┐   ┌──────────────┐                   │
//! │           │   Framing    │──▶│    Store     │                   │
//! │           └──────────────┘   └──────────────┘                   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`monitor`]: eBPF loading and attachment, ring buffer consumption,
//!   enter/return pairing, clock reconciliation, flag decoding, canonical
//!   paths and block rendering
//! - [`protocol`]: labels, keys and markers of the text format
//! - [`framing`]: splits an arbitrarily chunked byte stream into blocks
//! - [`store`]: parses blocks into [`store::Event`]s and keeps them in an
//!   append-only log with subscribers
//! - [`summary`]: framing + store wired together for `--summary`
//! - [`cli`]: command-line arguments
//! - [`preflight`]: privilege and kernel checks
//! - [`domain`]: newtypes and error enums
//!
//! ## Typical Usage
//!
//! ```bash
//! # Every process except dlmon itself
//! sudo ./dlmon
//!
//! # Only processes named math_test
//! sudo ./dlmon math_test
//! ```

pub mod cli;
pub mod domain;
pub mod framing;
pub mod monitor;
pub mod preflight;
pub mod protocol;
pub mod store;
pub mod summary;
