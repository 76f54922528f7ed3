//! Batching and bulk insert orchestration.
//!
//! Every batch is a separate INSERT statement. There is no atomicity across
//! batches: when batch `k` fails, batches before it stay committed and the
//! returned [`BatchError`] reports how many rows that was.

use std::time::Instant;

use asupersync::{Cx, Outcome};
use chmodel_core::error::BatchError;
use chmodel_core::{Command, Connection, Error, Model, Settings};
use futures::stream::{FuturesUnordered, Stream, StreamExt};

use crate::cache::{EntityPropertyInfo, PropertyCache};
use crate::gate::AdmissionGate;
use crate::options::{BulkInsertOptions, DEFAULT_BATCH_SIZE};
use crate::result::BulkInsertResult;

/// Running totals of committed batches.
#[derive(Debug, Default)]
struct Progress {
    rows: u64,
    batches: usize,
}

impl Progress {
    fn commit(&mut self, rows: usize, options: &BulkInsertOptions) {
        self.rows += rows as u64;
        self.batches += 1;
        if let Some(callback) = &options.on_batch_completed {
            callback(self.rows);
        }
    }

    fn finish(self, started: Instant) -> BulkInsertResult {
        BulkInsertResult::new(self.rows, self.batches, started.elapsed())
    }
}

fn batch_failure(index: usize, rows: usize, committed: u64, source: Error) -> Error {
    Error::Batch(BatchError {
        batch_index: index,
        batch_rows: rows,
        rows_committed: committed,
        source: Box::new(source),
    })
}

/// Open `conn` if needed, run `command`, then close what was opened here.
///
/// The close runs on every path once the open succeeded. A failed execute
/// wins over a failed close.
async fn run_batch<C: Connection>(cx: &Cx, conn: &mut C, command: &Command) -> Outcome<(), Error> {
    let opened_here = !conn.is_open();
    if opened_here {
        match conn.open(cx).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
    }

    let executed = conn.execute(cx, command).await;

    let closed = if opened_here {
        conn.close(cx).await
    } else {
        Outcome::Ok(())
    };

    match executed {
        Outcome::Ok(_) => closed,
        Outcome::Err(e) => {
            if let Outcome::Err(close_err) = closed {
                tracing::warn!(error = %close_err, "Closing connection after failed batch also failed");
            }
            Outcome::Err(e)
        }
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

/// Inserts model rows in batches over a [`Connection`].
///
/// ```ignore
/// let result = BulkInserter::new(&mut conn)
///     .configure(|o| o.batch_size = 5_000)
///     .insert_all(&cx, &events)
///     .await;
/// ```
pub struct BulkInserter<'c, C: Connection> {
    conn: &'c mut C,
    options: BulkInsertOptions,
    cache: &'c PropertyCache,
}

impl<'c, C: Connection> BulkInserter<'c, C> {
    /// Inserter with default options and the process-wide property cache.
    pub fn new(conn: &'c mut C) -> Self {
        Self {
            conn,
            options: BulkInsertOptions::default(),
            cache: PropertyCache::global(),
        }
    }

    /// Replace the options.
    pub fn options(mut self, options: BulkInsertOptions) -> Self {
        self.options = options;
        self
    }

    /// Adjust the current options in place.
    pub fn configure(mut self, f: impl FnOnce(&mut BulkInsertOptions)) -> Self {
        f(&mut self.options);
        self
    }

    /// Use a specific property cache instead of the global one.
    pub fn with_cache(mut self, cache: &'c PropertyCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn current_options(&self) -> &BulkInsertOptions {
        &self.options
    }

    /// Insert every row of `rows`.
    ///
    /// Empty input returns [`BulkInsertResult::EMPTY`] without touching the
    /// connection. With `max_degree_of_parallelism > 1` batches run on
    /// forked connections and progress callbacks arrive in completion order.
    #[tracing::instrument(level = "debug", skip(self, cx, rows), fields(table = T::TABLE_NAME, rows = rows.len()))]
    pub async fn insert_all<T: Model>(&mut self, cx: &Cx, rows: &[T]) -> Outcome<BulkInsertResult, Error> {
        if let Err(e) = self.options.validate() {
            return Outcome::Err(e);
        }
        if rows.is_empty() {
            return Outcome::Ok(BulkInsertResult::EMPTY);
        }

        let info = self.cache.get::<T>();
        if info.is_empty() {
            tracing::warn!(table = T::TABLE_NAME, "Model maps no columns, nothing to insert");
            return Outcome::Ok(BulkInsertResult::EMPTY);
        }

        let settings = self.options.effective_settings();
        let started = Instant::now();
        tracing::info!(
            table = info.table_name(),
            rows = rows.len(),
            batch_size = self.options.batch_size,
            parallelism = self.options.max_degree_of_parallelism,
            format = ?self.options.format,
            "Starting bulk insert"
        );

        let outcome = if self.options.is_parallel() {
            self.run_parallel(cx, rows, &info, &settings).await
        } else {
            self.run_sequential(cx, rows, &info, &settings).await
        };

        match outcome {
            Outcome::Ok(progress) => {
                let result = progress.finish(started);
                tracing::info!(
                    table = info.table_name(),
                    rows = result.rows_inserted,
                    batches = result.batches_executed,
                    elapsed_ms = result.elapsed.as_millis() as u64,
                    "Bulk insert complete"
                );
                Outcome::Ok(result)
            }
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Insert rows from any iterator, materialized once.
    pub async fn insert_iter<T, I>(&mut self, cx: &Cx, rows: I) -> Outcome<BulkInsertResult, Error>
    where
        T: Model,
        I: IntoIterator<Item = T>,
    {
        let rows: Vec<T> = rows.into_iter().collect();
        self.insert_all(cx, &rows).await
    }

    /// Insert rows pulled from a stream, holding at most one batch in memory.
    ///
    /// A full buffer is flushed before the next element is requested; the
    /// remainder is flushed when the stream ends. Cancellation is checked
    /// before every element and reported as `Outcome::Cancelled`, even when
    /// buffered rows are dropped. Streaming always runs sequentially on the
    /// inserter's connection.
    #[tracing::instrument(level = "debug", skip(self, cx, source), fields(table = T::TABLE_NAME))]
    pub async fn insert_streaming<T, S>(&mut self, cx: &Cx, mut source: S) -> Outcome<BulkInsertResult, Error>
    where
        T: Model,
        S: Stream<Item = T> + Unpin,
    {
        if let Err(e) = self.options.validate() {
            return Outcome::Err(e);
        }

        let info = self.cache.get::<T>();
        if info.is_empty() {
            tracing::warn!(table = T::TABLE_NAME, "Model maps no columns, nothing to insert");
            return Outcome::Ok(BulkInsertResult::EMPTY);
        }

        let settings = self.options.effective_settings();
        let batch_size = self.options.batch_size;
        let started = Instant::now();
        let mut progress = Progress::default();
        let mut buffer: Vec<T> = Vec::with_capacity(batch_size.min(DEFAULT_BATCH_SIZE));

        tracing::info!(
            table = info.table_name(),
            batch_size,
            format = ?self.options.format,
            "Starting streaming insert"
        );

        loop {
            if let Some(reason) = cx.cancel_reason() {
                if !buffer.is_empty() {
                    tracing::warn!(
                        table = info.table_name(),
                        buffered = buffer.len(),
                        committed = progress.rows,
                        "Streaming insert cancelled with unflushed rows"
                    );
                }
                return Outcome::Cancelled(reason);
            }

            let Some(row) = source.next().await else {
                break;
            };
            buffer.push(row);

            if buffer.len() >= batch_size {
                match self.flush(cx, &buffer, &info, &settings, &mut progress).await {
                    Outcome::Ok(()) => buffer.clear(),
                    Outcome::Err(e) => return Outcome::Err(e),
                    Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                    Outcome::Panicked(p) => return Outcome::Panicked(p),
                }
            }
        }

        if !buffer.is_empty() {
            match self.flush(cx, &buffer, &info, &settings, &mut progress).await {
                Outcome::Ok(()) => {}
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }

        if progress.batches == 0 {
            tracing::debug!(table = info.table_name(), "Stream produced no rows");
            return Outcome::Ok(BulkInsertResult::EMPTY);
        }

        let result = progress.finish(started);
        tracing::info!(
            table = info.table_name(),
            rows = result.rows_inserted,
            batches = result.batches_executed,
            elapsed_ms = result.elapsed.as_millis() as u64,
            "Streaming insert complete"
        );
        Outcome::Ok(result)
    }

    async fn run_sequential<T>(
        &mut self,
        cx: &Cx,
        rows: &[T],
        info: &EntityPropertyInfo<T>,
        settings: &Settings,
    ) -> Outcome<Progress, Error> {
        let mut progress = Progress::default();
        for chunk in rows.chunks(self.options.batch_size) {
            if let Some(reason) = cx.cancel_reason() {
                tracing::debug!(committed = progress.rows, "Bulk insert cancelled between batches");
                return Outcome::Cancelled(reason);
            }
            match self.flush(cx, chunk, info, settings, &mut progress).await {
                Outcome::Ok(()) => {}
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }
        Outcome::Ok(progress)
    }

    /// Build, execute and commit one batch on the inserter's connection.
    async fn flush<T>(
        &mut self,
        cx: &Cx,
        chunk: &[T],
        info: &EntityPropertyInfo<T>,
        settings: &Settings,
        progress: &mut Progress,
    ) -> Outcome<(), Error> {
        let index = progress.batches;
        let sql = match self.options.format.build(chunk, info, settings) {
            Ok(sql) => sql,
            Err(e) => return Outcome::Err(batch_failure(index, chunk.len(), progress.rows, e)),
        };
        if sql.is_empty() {
            return Outcome::Ok(());
        }

        tracing::debug!(batch = index, rows = chunk.len(), "Executing batch");
        tracing::trace!(sql = %sql, "INSERT");
        let command = self.conn.create_command(&sql).timeout(self.options.timeout);

        match run_batch(cx, self.conn, &command).await {
            Outcome::Ok(()) => {
                progress.commit(chunk.len(), &self.options);
                Outcome::Ok(())
            }
            Outcome::Err(e) => Outcome::Err(batch_failure(index, chunk.len(), progress.rows, e)),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Fan batches out over forked connections, at most `parallelism` open
    /// at once.
    ///
    /// Once a batch fails or cancellation is observed no new batch starts;
    /// batches already running are drained and the first failure returned.
    async fn run_parallel<T>(
        &mut self,
        cx: &Cx,
        rows: &[T],
        info: &EntityPropertyInfo<T>,
        settings: &Settings,
    ) -> Outcome<Progress, Error> {
        let Some(connection_string) = self.conn.connection_string() else {
            return Outcome::Err(Error::config(
                "parallel bulk insert requires a connection that exposes a connection string",
            ));
        };

        let gate = AdmissionGate::new(self.options.max_degree_of_parallelism);
        let mut pending = rows.chunks(self.options.batch_size).enumerate();
        let mut in_flight = FuturesUnordered::new();
        let mut progress = Progress::default();
        let mut stop: Option<Outcome<Progress, Error>> = None;

        loop {
            while stop.is_none() {
                if let Some(reason) = cx.cancel_reason() {
                    stop = Some(Outcome::Cancelled(reason));
                    break;
                }
                let Some(permit) = gate.try_acquire() else {
                    break;
                };
                let Some((index, chunk)) = pending.next() else {
                    break;
                };

                let sql = match self.options.format.build(chunk, info, settings) {
                    Ok(sql) if sql.is_empty() => continue,
                    Ok(sql) => sql,
                    Err(e) => {
                        stop = Some(Outcome::Err(batch_failure(index, chunk.len(), progress.rows, e)));
                        break;
                    }
                };
                let mut conn = match self.conn.fork(&connection_string) {
                    Ok(conn) => conn,
                    Err(e) if e.is_config_error() => {
                        stop = Some(Outcome::Err(e));
                        break;
                    }
                    Err(e) => {
                        stop = Some(Outcome::Err(batch_failure(index, chunk.len(), progress.rows, e)));
                        break;
                    }
                };
                let command = conn.create_command(&sql).timeout(self.options.timeout);
                let batch_rows = chunk.len();

                tracing::debug!(batch = index, rows = batch_rows, in_flight = gate.in_flight(), "Dispatching batch");
                tracing::trace!(sql = %sql, "INSERT");

                in_flight.push(async move {
                    let _permit = permit;
                    let outcome = run_batch(cx, &mut conn, &command).await;
                    (index, batch_rows, outcome)
                });
            }

            let Some((index, batch_rows, outcome)) = in_flight.next().await else {
                break;
            };
            match outcome {
                Outcome::Ok(()) => progress.commit(batch_rows, &self.options),
                Outcome::Err(e) => {
                    if stop.is_none() {
                        tracing::debug!(batch = index, error = %e, "Parallel batch failed");
                        stop = Some(Outcome::Err(batch_failure(index, batch_rows, progress.rows, e)));
                    } else {
                        tracing::warn!(batch = index, error = %e, "Parallel batch failed after an earlier failure");
                    }
                }
                Outcome::Cancelled(r) => {
                    if stop.is_none() {
                        stop = Some(Outcome::Cancelled(r));
                    }
                }
                Outcome::Panicked(p) => {
                    if stop.is_none() {
                        stop = Some(Outcome::Panicked(p));
                    }
                }
            }
        }

        match stop {
            Some(outcome) => outcome,
            None => Outcome::Ok(progress),
        }
    }
}

#[cfg(test)]
#[allow(clippy::manual_async_fn)]
mod tests {
    use super::*;
    use crate::builder::InsertFormat;
    use asupersync::runtime::RuntimeBuilder;
    use chmodel_core::error::{QueryError, QueryErrorKind};
    use chmodel_core::{PropertyMapping, Row};
    use std::future::Future;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Default)]
    struct MockState {
        executed: Vec<String>,
        opens: usize,
        closes: usize,
        fail_on_call: Option<usize>,
        refuse_fork: bool,
    }

    #[derive(Debug)]
    struct MockConnection {
        state: Arc<Mutex<MockState>>,
        open: bool,
        connection_string: Option<String>,
    }

    impl MockConnection {
        fn new(state: Arc<Mutex<MockState>>) -> Self {
            Self {
                state,
                open: false,
                connection_string: None,
            }
        }
    }

    impl Connection for MockConnection {
        fn open(&mut self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
            self.open = true;
            self.state.lock().expect("lock poisoned").opens += 1;
            async { Outcome::Ok(()) }
        }

        fn close(&mut self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
            if self.open {
                self.open = false;
                self.state.lock().expect("lock poisoned").closes += 1;
            }
            async { Outcome::Ok(()) }
        }

        fn is_open(&self) -> bool {
            self.open
        }

        fn execute(&self, _cx: &Cx, command: &Command) -> impl Future<Output = Outcome<u64, Error>> + Send {
            let mut guard = self.state.lock().expect("lock poisoned");
            let call = guard.executed.len();
            guard.executed.push(command.text().to_string());
            let fail = guard.fail_on_call == Some(call);
            async move {
                if fail {
                    Outcome::Err(Error::Query(QueryError {
                        kind: QueryErrorKind::BadLiteral,
                        sql: None,
                        code: Some(27),
                        message: "Cannot parse input".to_string(),
                        source: None,
                    }))
                } else {
                    Outcome::Ok(0)
                }
            }
        }

        fn query(&self, _cx: &Cx, _command: &Command) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
            async { Outcome::Ok(Vec::new()) }
        }

        fn connection_string(&self) -> Option<String> {
            self.connection_string.clone()
        }

        fn fork(&self, connection_string: &str) -> chmodel_core::Result<Self> {
            if self.state.lock().expect("lock poisoned").refuse_fork {
                return Err(Error::config("mock connections cannot be forked"));
            }
            Ok(Self {
                state: Arc::clone(&self.state),
                open: false,
                connection_string: Some(connection_string.to_string()),
            })
        }
    }

    struct Metric {
        id: u32,
    }

    impl Model for Metric {
        const TABLE_NAME: &'static str = "Metrics";

        fn properties() -> Vec<PropertyMapping<Self>> {
            vec![PropertyMapping::new("Id", |m: &Metric| m.id)]
        }
    }

    fn metrics(n: u32) -> Vec<Metric> {
        (0..n).map(|id| Metric { id }).collect()
    }

    fn unwrap_outcome<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> T {
        match outcome {
            Outcome::Ok(v) => v,
            other => std::panic::panic_any(format!("unexpected outcome: {other:?}")),
        }
    }

    #[test]
    fn test_sequential_batches_open_and_close_each_time() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let state = Arc::new(Mutex::new(MockState::default()));
        let mut conn = MockConnection::new(Arc::clone(&state));
        let cache = PropertyCache::new();

        rt.block_on(async {
            let result = unwrap_outcome(
                BulkInserter::new(&mut conn)
                    .with_cache(&cache)
                    .configure(|o| o.batch_size = 2)
                    .insert_all(&cx, &metrics(5))
                    .await,
            );
            assert_eq!(result.rows_inserted, 5);
            assert_eq!(result.batches_executed, 3);
        });

        let guard = state.lock().unwrap();
        assert_eq!(
            guard.executed,
            vec![
                "INSERT INTO \"Metrics\" (\"Id\") VALUES (0), (1)",
                "INSERT INTO \"Metrics\" (\"Id\") VALUES (2), (3)",
                "INSERT INTO \"Metrics\" (\"Id\") VALUES (4)",
            ]
        );
        assert_eq!(guard.opens, 3);
        assert_eq!(guard.closes, 3);
        assert!(!conn.is_open());
    }

    #[test]
    fn test_failed_batch_reports_index_and_committed_rows() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let state = Arc::new(Mutex::new(MockState {
            fail_on_call: Some(1),
            ..MockState::default()
        }));
        let mut conn = MockConnection::new(Arc::clone(&state));

        let outcome = rt.block_on(async {
            BulkInserter::new(&mut conn)
                .configure(|o| o.batch_size = 2)
                .insert_all(&cx, &metrics(6))
                .await
        });

        match outcome {
            Outcome::Err(Error::Batch(e)) => {
                assert_eq!(e.batch_index, 1);
                assert_eq!(e.batch_rows, 2);
                assert_eq!(e.rows_committed, 2);
                assert!(matches!(*e.source, Error::Query(_)));
            }
            other => panic!("expected batch error, got {other:?}"),
        }
        let guard = state.lock().unwrap();
        assert_eq!(guard.executed.len(), 2);
        assert_eq!(guard.opens, guard.closes);
    }

    #[test]
    fn test_json_lines_format_is_used() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let state = Arc::new(Mutex::new(MockState::default()));
        let mut conn = MockConnection::new(Arc::clone(&state));

        rt.block_on(async {
            unwrap_outcome(
                BulkInserter::new(&mut conn)
                    .options(BulkInsertOptions::new().format(InsertFormat::JsonLines))
                    .insert_all(&cx, &metrics(2))
                    .await,
            );
        });

        let guard = state.lock().unwrap();
        assert_eq!(
            guard.executed,
            vec!["INSERT INTO \"Metrics\" (\"Id\") FORMAT JSONEachRow\n{\"Id\":0}\n{\"Id\":1}"]
        );
    }

    #[test]
    fn test_parallel_forks_connections() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let state = Arc::new(Mutex::new(MockState::default()));
        let mut conn = MockConnection::new(Arc::clone(&state));
        conn.connection_string = Some("Host=localhost".to_string());

        rt.block_on(async {
            let result = unwrap_outcome(
                BulkInserter::new(&mut conn)
                    .configure(|o| {
                        o.batch_size = 3;
                        o.max_degree_of_parallelism = 2;
                    })
                    .insert_all(&cx, &metrics(10))
                    .await,
            );
            assert_eq!(result.rows_inserted, 10);
            assert_eq!(result.batches_executed, 4);
        });

        let guard = state.lock().unwrap();
        assert_eq!(guard.executed.len(), 4);
        assert_eq!(guard.opens, 4);
        assert_eq!(guard.closes, 4);
        assert!(!conn.is_open());
    }

    #[test]
    fn test_unforkable_connection_is_a_config_error() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let state = Arc::new(Mutex::new(MockState {
            refuse_fork: true,
            ..MockState::default()
        }));
        let mut conn = MockConnection::new(Arc::clone(&state));
        conn.connection_string = Some("Host=localhost".to_string());

        let outcome = rt.block_on(async {
            BulkInserter::new(&mut conn)
                .configure(|o| {
                    o.batch_size = 2;
                    o.max_degree_of_parallelism = 2;
                })
                .insert_all(&cx, &metrics(6))
                .await
        });

        match outcome {
            Outcome::Err(e) => {
                assert!(e.is_config_error());
                assert_eq!(e.batch_index(), None);
            }
            other => panic!("expected config error, got {other:?}"),
        }
        let guard = state.lock().unwrap();
        assert!(guard.executed.is_empty());
        assert_eq!(guard.opens, 0);
    }

    #[test]
    fn test_invalid_options_fail_before_io() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let state = Arc::new(Mutex::new(MockState::default()));
        let mut conn = MockConnection::new(Arc::clone(&state));

        let outcome = rt.block_on(async {
            BulkInserter::new(&mut conn)
                .configure(|o| o.batch_size = 0)
                .insert_all(&cx, &metrics(3))
                .await
        });
        assert!(matches!(outcome, Outcome::Err(ref e) if e.is_config_error()));
        assert_eq!(state.lock().unwrap().opens, 0);
    }
}
