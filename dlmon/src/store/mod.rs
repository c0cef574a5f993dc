//! Event record parsing and storage
//!
//! Turns framed text blocks back into structured events and keeps them in an
//! append-only, observable log.

pub mod event;
pub mod event_store;

pub use event::{
    parse_block, Details, Event, EventPayload, EventType, LoadDetails, SymbolDetails,
    UnloadDetails,
};
pub use event_store::{EventStore, SubscriptionId};
