//! Bulk insert outcome.

use std::fmt;
use std::time::Duration;

/// Totals of a completed bulk insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkInsertResult {
    pub rows_inserted: u64,
    pub batches_executed: usize,
    pub elapsed: Duration,
}

impl BulkInsertResult {
    /// The result of a call with no input rows.
    pub const EMPTY: BulkInsertResult = BulkInsertResult {
        rows_inserted: 0,
        batches_executed: 0,
        elapsed: Duration::ZERO,
    };

    pub fn new(rows_inserted: u64, batches_executed: usize, elapsed: Duration) -> Self {
        Self {
            rows_inserted,
            batches_executed,
            elapsed,
        }
    }

    /// Rows per second, or 0 when no time elapsed.
    pub fn rows_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.rows_inserted as f64 / secs
        } else {
            0.0
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows_inserted == 0 && self.batches_executed == 0
    }
}

impl Default for BulkInsertResult {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Display for BulkInsertResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} rows in {} batches ({} ms, {:.0} rows/s)",
            self.rows_inserted,
            self.batches_executed,
            self.elapsed.as_millis(),
            self.rows_per_second()
        )
    }
}
