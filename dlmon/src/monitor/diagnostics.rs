use aya::maps::{MapData, PerCpuArray};
use aya::Ebpf;
use log::warn;

use crate::domain::MonitorError;

/// Tracks records the kernel could not reserve in the ring buffer
///
/// The `DROPPED` map holds one counter per CPU. Only the growth since the
/// last check is reported; lost records are never reconstructed.
pub struct LossTracker {
    dropped: PerCpuArray<MapData, u64>,
    reported: u64,
}

impl LossTracker {
    /// Take ownership of the `DROPPED` map
    ///
    /// # Errors
    /// Returns an error if the map is missing or has the wrong type
    pub fn new(bpf: &mut Ebpf) -> Result<Self, MonitorError> {
        let map = bpf.take_map("DROPPED").ok_or(MonitorError::MapNotFound("DROPPED"))?;
        Ok(Self { dropped: PerCpuArray::try_from(map)?, reported: 0 })
    }

    /// Total records dropped so far, summed across CPUs
    ///
    /// # Errors
    /// Returns an error if the map cannot be read
    pub fn total(&self) -> Result<u64, MonitorError> {
        let per_cpu = self.dropped.get(&0, 0)?;
        Ok(per_cpu.iter().copied().fold(0u64, u64::saturating_add))
    }

    /// Log newly dropped records, returning how many there were
    pub fn report(&mut self) -> u64 {
        let total = match self.total() {
            Ok(total) => total,
            Err(e) => {
                warn!("Failed to read DROPPED counters: {e}");
                return 0;
            }
        };

        let delta = new_losses(self.reported, total);
        if delta > 0 {
            warn!("ring buffer full: {delta} records lost ({total} total)");
        }
        self.reported = total;
        delta
    }

    #[must_use]
    pub fn reported(&self) -> u64 {
        self.reported
    }
}

/// Growth of a monotonic counter; never negative
#[must_use]
pub fn new_losses(reported: u64, total: u64) -> u64 {
    total.saturating_sub(reported)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_losses() {
        assert_eq!(new_losses(0, 0), 0);
        assert_eq!(new_losses(3, 10), 7);
        assert_eq!(new_losses(10, 10), 0);
        assert_eq!(new_losses(10, 3), 0);
    }
}
