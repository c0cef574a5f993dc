//! Monitor core modules
//!
//! Everything between the kernel probes and the text stream:
//! - eBPF program loading, filter setup and probe attachment
//! - Ring buffer consumption and loss reporting
//! - Enter/return pairing and clock reconciliation
//! - Flag decoding and canonical library paths
//! - Block rendering

pub mod clock;
pub mod diagnostics;
pub mod ebpf_setup;
pub mod event_processor;
pub mod flags;
pub mod memory_maps;
pub mod path_resolver;
pub mod render;
pub mod ring_reader;

// Re-export common types
pub use clock::{ClockMode, ClockReconciler, ClockSource, SystemClock};
pub use diagnostics::LossTracker;
pub use ebpf_setup::{attach_dl_probes, configure_filter, init_ebpf_logger, load_ebpf_program, own_comm};
pub use event_processor::{EventProcessor, ProcessorStats};
pub use flags::decode_flags;
pub use path_resolver::PathResolver;
pub use render::{render_block, write_block, LinkEvent, LinkKind};
pub use ring_reader::{RingReader, POLL_TIMEOUT};
