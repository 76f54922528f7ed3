//! Bulk insert options.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chmodel_core::{Error, Result, SettingValue, Settings};

use crate::builder::InsertFormat;

/// Default number of rows per batch.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Called after each successful batch with the cumulative row count.
pub type ProgressCallback = Arc<dyn Fn(u64) + Send + Sync>;

/// Per-call bulk insert configuration.
///
/// Built fresh per call, optionally adjusted through
/// [`configure`](BulkInsertOptions::configure), then read-only for the
/// duration of the insert.
#[derive(Clone)]
pub struct BulkInsertOptions {
    /// Rows per batch (must be > 0)
    pub batch_size: usize,
    pub format: InsertFormat,
    /// Add `async_insert = 1`
    pub use_async_insert: bool,
    /// With async insert, wait for the server to flush before returning
    pub wait_for_async_insert: bool,
    /// 1 runs batches sequentially on the caller's connection
    pub max_degree_of_parallelism: usize,
    /// `max_insert_threads` server hint
    pub max_insert_threads: Option<u32>,
    /// Free-form settings, rendered in insertion order
    pub settings: Settings,
    /// Command timeout applied to every batch
    pub timeout: Option<Duration>,
    pub on_batch_completed: Option<ProgressCallback>,
}

impl Default for BulkInsertOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            format: InsertFormat::Values,
            use_async_insert: false,
            wait_for_async_insert: true,
            max_degree_of_parallelism: 1,
            max_insert_threads: None,
            settings: Settings::new(),
            timeout: None,
            on_batch_completed: None,
        }
    }
}

impl fmt::Debug for BulkInsertOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BulkInsertOptions")
            .field("batch_size", &self.batch_size)
            .field("format", &self.format)
            .field("use_async_insert", &self.use_async_insert)
            .field("wait_for_async_insert", &self.wait_for_async_insert)
            .field("max_degree_of_parallelism", &self.max_degree_of_parallelism)
            .field("max_insert_threads", &self.max_insert_threads)
            .field("settings", &self.settings)
            .field("timeout", &self.timeout)
            .field("on_batch_completed", &self.on_batch_completed.is_some())
            .finish()
    }
}

impl BulkInsertOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set rows per batch.
    pub fn batch_size(mut self, rows: usize) -> Self {
        self.batch_size = rows;
        self
    }

    pub fn format(mut self, format: InsertFormat) -> Self {
        self.format = format;
        self
    }

    /// Enable async insert, optionally waiting for the server-side flush.
    pub fn async_insert(mut self, wait: bool) -> Self {
        self.use_async_insert = true;
        self.wait_for_async_insert = wait;
        self
    }

    /// Run up to `n` batches concurrently on forked connections.
    pub fn parallelism(mut self, n: usize) -> Self {
        self.max_degree_of_parallelism = n;
        self
    }

    pub fn max_insert_threads(mut self, threads: u32) -> Self {
        self.max_insert_threads = Some(threads);
        self
    }

    /// Add a free-form setting.
    pub fn setting(mut self, key: impl Into<String>, value: impl Into<SettingValue>) -> Self {
        self.settings.set(key, value);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the per-batch progress callback.
    pub fn on_batch_completed<F>(mut self, callback: F) -> Self
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        self.on_batch_completed = Some(Arc::new(callback));
        self
    }

    /// Apply a caller-supplied adjustment.
    pub fn configure(mut self, f: impl FnOnce(&mut Self)) -> Self {
        f(&mut self);
        self
    }

    /// Reject configurations that can never run.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::config("batch size must be greater than zero"));
        }
        if self.max_degree_of_parallelism == 0 {
            return Err(Error::config(
                "max degree of parallelism must be at least 1",
            ));
        }
        self.settings.validate_keys()
    }

    /// Free-form settings plus the settings derived from option flags.
    ///
    /// Derived settings replace user settings with the same key.
    pub fn effective_settings(&self) -> Settings {
        let mut settings = self.settings.clone();
        if self.use_async_insert {
            settings.set("async_insert", 1);
            settings.set("wait_for_async_insert", i32::from(self.wait_for_async_insert));
        }
        if let Some(threads) = self.max_insert_threads {
            settings.set("max_insert_threads", threads);
        }
        settings
    }

    pub fn is_parallel(&self) -> bool {
        self.max_degree_of_parallelism > 1
    }
}
