use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timing of a bounded hardware poll.
///
/// The special wakeup and the stop-quiesce procedures both wait for a status
/// bit by reading a register, sleeping `interval_us` between reads, for at most
/// `limit` reads. Reaching the limit is not an error: the caller carries on with
/// the last observed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Delay between two reads, in microseconds.
    pub interval_us: u64,
    /// Maximum number of reads before giving up.
    pub limit: u32,
}

impl PollConfig {
    /// The delay between two reads.
    pub fn interval(&self) -> Duration {
        Duration::from_micros(self.interval_us)
    }
}

impl Default for PollConfig {
    // 100 x 1ms, kept in sync with the firmware's direct-control procedures.
    fn default() -> Self {
        Self {
            interval_us: 1000,
            limit: 100,
        }
    }
}
