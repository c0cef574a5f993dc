//! Ring buffer consumer
//!
//! Waits for the `EVENTS` ring buffer to become readable, bounded by a
//! timeout so the caller gets a chance to report losses and flush output
//! even when nothing happens.

use std::io;
use std::time::Duration;

use aya::maps::{MapData, RingBuf};
use aya::Ebpf;
use dlmon_common::DlEvent;
use log::warn;
use tokio::io::unix::AsyncFd;

use crate::domain::MonitorError;

/// How long one wait for records may block
pub const POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Copy a raw ring buffer record into a [`DlEvent`]
///
/// Returns `None` for records shorter than a `DlEvent`.
#[must_use]
pub fn decode_record(bytes: &[u8]) -> Option<DlEvent> {
    if bytes.len() < std::mem::size_of::<DlEvent>() {
        return None;
    }
    // SAFETY: length checked above; DlEvent is repr(C) plain data, valid for any bit pattern
    #[allow(unsafe_code)]
    let event = unsafe { std::ptr::read_unaligned(bytes.as_ptr().cast::<DlEvent>()) };
    Some(event)
}

pub struct RingReader {
    ring: AsyncFd<RingBuf<MapData>>,
    malformed: u64,
}

impl RingReader {
    /// Take ownership of the `EVENTS` map and register it with the reactor
    ///
    /// # Errors
    /// Returns an error if the map is missing, has the wrong type, or its
    /// descriptor cannot be registered
    pub fn new(bpf: &mut Ebpf) -> Result<Self, MonitorError> {
        let map = bpf.take_map("EVENTS").ok_or(MonitorError::MapNotFound("EVENTS"))?;
        let ring = AsyncFd::new(RingBuf::try_from(map)?)?;
        Ok(Self { ring, malformed: 0 })
    }

    /// Records dropped because they were too short to decode
    #[must_use]
    pub fn malformed(&self) -> u64 {
        self.malformed
    }

    /// Wait up to `timeout` for records and hand every available one to
    /// `on_record`; returns the number of records consumed
    ///
    /// Interrupted waits count as timeouts.
    ///
    /// # Errors
    /// Returns [`MonitorError::PollFailed`] if readiness polling fails
    pub async fn poll<F>(&mut self, timeout: Duration, mut on_record: F) -> Result<usize, MonitorError>
    where
        F: FnMut(&DlEvent),
    {
        let mut guard = match tokio::time::timeout(timeout, self.ring.readable_mut()).await {
            Err(_elapsed) => return Ok(0),
            Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => return Ok(0),
            Ok(Err(e)) => return Err(MonitorError::PollFailed(e)),
            Ok(Ok(guard)) => guard,
        };

        let mut consumed = 0;
        let ring = guard.get_inner_mut();
        while let Some(item) = ring.next() {
            match decode_record(&item) {
                Some(event) => {
                    consumed += 1;
                    on_record(&event);
                }
                None => {
                    self.malformed += 1;
                    warn!("Received incomplete event ({} bytes)", item.len());
                }
            }
        }
        guard.clear_ready();

        Ok(consumed)
    }
}
