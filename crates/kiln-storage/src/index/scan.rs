//! Range scan operators and state.

use kiln_common::{KilnError, Result};

/// Comparison operator for scan bounds.
///
/// `start_scan` accepts `GT`/`GTE` for the low bound and `LT`/`LTE` for the
/// high bound; anything else is rejected with `BadOpcodes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOp {
    /// Less than.
    LT,
    /// Less than or equal.
    LTE,
    /// Greater than or equal.
    GTE,
    /// Greater than.
    GT,
}

/// A validated scan range.
///
/// Construction guarantees `low_op` is `GT` or `GTE`, `high_op` is `LT` or
/// `LTE`, and `low <= high`.
#[derive(Debug, Clone, Copy)]
pub struct ScanRange {
    pub low: i32,
    pub low_op: ScanOp,
    pub high: i32,
    pub high_op: ScanOp,
}

impl ScanRange {
    /// Validates operators and bounds.
    pub fn new(low: i32, low_op: ScanOp, high: i32, high_op: ScanOp) -> Result<ScanRange> {
        if !matches!(low_op, ScanOp::GT | ScanOp::GTE) {
            return Err(KilnError::BadOpcodes);
        }
        if !matches!(high_op, ScanOp::LT | ScanOp::LTE) {
            return Err(KilnError::BadOpcodes);
        }
        if low > high {
            return Err(KilnError::BadScanrange);
        }
        Ok(ScanRange {
            low,
            low_op,
            high,
            high_op,
        })
    }

    /// Returns true if `key` satisfies the low predicate.
    pub fn satisfies_low(&self, key: i32) -> bool {
        match self.low_op {
            ScanOp::GT => key > self.low,
            _ => key >= self.low, // GTE by construction
        }
    }

    /// Probe-time check: true if `key` is so large that neither it nor any
    /// later key can fall inside the range.
    pub fn past_high(&self, key: i32) -> bool {
        match self.high_op {
            ScanOp::LT => key > self.high,
            _ => key >= self.high, // LTE by construction
        }
    }

    /// Yield-time check: true if `key` lies beyond the high bound.
    pub fn exceeds_high(&self, key: i32) -> bool {
        match self.high_op {
            ScanOp::LT => key >= self.high,
            _ => key > self.high, // LTE by construction
        }
    }
}

/// The scan state machine.
///
/// `Positioned` owns the single pinned leaf the active scan keeps in the
/// buffer pool; `Completed` means the range is exhausted and nothing is
/// pinned. Transitions outside this diagram are rejected by the index:
///
/// ```text
/// Idle --start_scan--> Positioned --scan_next--> Positioned | Completed
/// Positioned --end_scan--> Idle      Completed --end_scan--> Idle
/// ```
#[derive(Debug, Clone, Copy)]
pub(crate) enum ScanState {
    /// No scan active.
    Idle,
    /// Positioned on the next entry to yield; `leaf` is pinned.
    Positioned {
        /// Page number of the pinned current leaf.
        leaf: u32,
        /// Index of the next entry to yield within the leaf.
        next_entry: usize,
        /// The validated range being scanned.
        range: ScanRange,
    },
    /// The range is exhausted; the next `scan_next` reports completion.
    Completed,
}
