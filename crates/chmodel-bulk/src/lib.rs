//! Bulk insert for chmodel.
//!
//! - [`PropertyCache`] memoizes per-model column metadata
//! - [`ValuesBuilder`] and [`JsonLinesBuilder`] turn a batch of rows into one INSERT
//! - [`BulkInserter`] splits input into batches and runs them sequentially,
//!   in parallel over forked connections, or from a stream

pub mod builder;
pub mod cache;
pub mod gate;
pub mod inserter;
pub mod json_lines;
pub mod options;
pub mod result;

pub use builder::{BatchBuilder, InsertFormat, ValuesBuilder};
pub use cache::{EntityPropertyInfo, PropertyCache};
pub use gate::{AdmissionGate, GatePermit};
pub use inserter::BulkInserter;
pub use json_lines::{JsonLinesBuilder, to_json};
pub use options::{BulkInsertOptions, DEFAULT_BATCH_SIZE, ProgressCallback};
pub use result::BulkInsertResult;
