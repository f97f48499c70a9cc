//! Transfer progress aggregation
//!
//! Collapses raw byte counts from the transport into a monotonic percentage.

use crate::models::TransferPercent;

/// Per-attempt progress aggregator
#[derive(Debug, Default)]
pub struct ProgressAggregator {
    last: TransferPercent,
}

impl ProgressAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in a cumulative byte count
    ///
    /// Never returns less than the previous call. A zero total carries no
    /// information and returns the last value.
    pub fn on_transfer_progress(&mut self, bytes_sent: u64, bytes_total: u64) -> TransferPercent {
        if bytes_total == 0 {
            return self.last;
        }

        let sent = bytes_sent.min(bytes_total) as u128;
        let total = bytes_total as u128;
        // round(sent / total * 100) in integer arithmetic
        let percent = ((sent * 200 + total) / (total * 2)) as u8;

        let percent = TransferPercent::new(percent);
        if percent > self.last {
            self.last = percent;
        }
        self.last
    }

    pub fn last(&self) -> TransferPercent {
        self.last
    }

    pub fn reset(&mut self) {
        self.last = TransferPercent::ZERO;
    }
}
