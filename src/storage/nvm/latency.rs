//! Simulated persistent-memory write latency.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Cost charged for each store-then-persist-barrier on the NVM device.
///
/// The ring buffer calls [`LatencyModel::persist_barrier`] after every write
/// that would need a cache-line flush and fence on real hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LatencyModel {
    /// No delay. Used by tests.
    #[default]
    None,
    /// Busy-wait for the given duration, like a CPU stalled on a fence.
    Spin(Duration),
    /// Sleep for the given duration; coarse, but leaves the core free.
    Sleep(Duration),
}

impl LatencyModel {
    /// Default simulated store latency.
    pub const DEFAULT_NVM_DELAY: Duration = Duration::from_nanos(400);

    /// Latency model used when none is configured explicitly.
    #[must_use]
    pub const fn nvm_default() -> Self {
        LatencyModel::Spin(Self::DEFAULT_NVM_DELAY)
    }

    /// Charges one persist barrier.
    #[inline]
    pub fn persist_barrier(&self) {
        match *self {
            LatencyModel::None => {}
            LatencyModel::Spin(delay) => {
                let start = Instant::now();
                while start.elapsed() < delay {
                    std::hint::spin_loop();
                }
            }
            LatencyModel::Sleep(delay) => std::thread::sleep(delay),
        }
    }
}
