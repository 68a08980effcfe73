//! Store data and memory accounting for a guest session.

use wasmtime::{ResourceLimiter, Store};
use wasmtime_wasi::preview1::WasiP1Ctx;

/// Resource limiter that tracks guest memory growth and optionally caps it.
///
/// A denied growth is not an error: the guest simply sees `memory.grow`
/// return -1 and reacts on its own (usually with a `MemoryError`).
#[derive(Debug)]
pub struct MemoryTracker {
    /// Maximum memory in bytes, if capped.
    max_memory: Option<u64>,
    /// Peak memory allocation (highest ever granted).
    peak_memory: u64,
    /// Maximum table elements.
    max_table_elements: u64,
    /// Whether any growth was denied.
    limit_hit: bool,
}

impl MemoryTracker {
    /// Create a tracker with an optional memory cap in bytes.
    pub fn new(max_memory: Option<u64>) -> Self {
        Self {
            max_memory,
            peak_memory: 0,
            max_table_elements: 1_000_000,
            limit_hit: false,
        }
    }

    /// Whether a growth request was denied.
    pub fn limit_hit(&self) -> bool {
        self.limit_hit
    }

    /// Largest linear memory size granted so far, in bytes.
    pub fn peak_memory(&self) -> u64 {
        self.peak_memory
    }

    /// The configured cap.
    pub fn max_memory(&self) -> Option<u64> {
        self.max_memory
    }
}

impl ResourceLimiter for MemoryTracker {
    fn memory_growing(
        &mut self,
        _current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> anyhow::Result<bool> {
        let desired_bytes = desired as u64;

        if self.max_memory.is_some_and(|max| desired_bytes > max) {
            self.limit_hit = true;
            return Ok(false);
        }

        self.peak_memory = self.peak_memory.max(desired_bytes);
        Ok(true)
    }

    fn table_growing(
        &mut self,
        _current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> anyhow::Result<bool> {
        if desired as u64 > self.max_table_elements {
            self.limit_hit = true;
            return Ok(false);
        }
        Ok(true)
    }
}

/// Data owned by a session's store.
pub struct StoreData {
    /// Memory accounting.
    pub limiter: MemoryTracker,
    /// WASI Preview 1 context presented to the guest.
    pub wasi: WasiP1Ctx,
}

impl StoreData {
    /// Create store data with the given memory cap and WASI context.
    pub fn new(max_memory: Option<u64>, wasi: WasiP1Ctx) -> Self {
        Self {
            limiter: MemoryTracker::new(max_memory),
            wasi,
        }
    }
}

/// Extension trait for Store to configure resource limiting.
pub trait StoreLimiterExt {
    /// Route memory and table growth through the store's [`MemoryTracker`].
    fn configure_limiter(&mut self);
}

impl StoreLimiterExt for Store<StoreData> {
    fn configure_limiter(&mut self) {
        self.limiter(|data| &mut data.limiter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uncapped_tracks_peak() {
        let mut tracker = MemoryTracker::new(None);

        assert!(tracker.memory_growing(0, 128 * 1024, None).unwrap());
        assert!(tracker.memory_growing(128 * 1024, 64 * 1024 * 1024, None).unwrap());
        assert_eq!(tracker.peak_memory(), 64 * 1024 * 1024);
        assert!(!tracker.limit_hit());
    }

    #[test]
    fn test_cap_denies_growth() {
        let mut tracker = MemoryTracker::new(Some(1024 * 1024));

        assert!(tracker.memory_growing(0, 512 * 1024, None).unwrap());
        assert!(!tracker.memory_growing(512 * 1024, 2 * 1024 * 1024, None).unwrap());
        assert!(tracker.limit_hit());
        assert_eq!(tracker.peak_memory(), 512 * 1024);
    }
}
