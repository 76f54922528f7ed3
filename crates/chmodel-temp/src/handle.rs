//! Handle to one ephemeral table.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use asupersync::sync::Mutex;
use asupersync::{Cx, Outcome};
use chmodel_bulk::{BatchBuilder, EntityPropertyInfo, ValuesBuilder};
use chmodel_core::error::{ConnectionError, ConnectionErrorKind, SchemaError, SchemaErrorKind, TypeError};
use chmodel_core::{Command, Connection, Error, Row, Settings, Value};
use chmodel_query::{CompiledQuery, Select, SourceQuery};

use crate::resolver::ParameterResolver;

/// Alias of the subquery in an insert-from-query.
pub const SOURCE_ALIAS: &str = "__source";

pub(crate) fn lock_error(table: &str) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Disconnected,
        message: format!("failed to acquire the connection of temp table {}", table),
        source: None,
    })
}

/// Something a [`TempTableScope`](crate::TempTableScope) can tear down.
pub trait ScopedDisposable: Send + Sync {
    fn table_name(&self) -> &str;

    fn is_disposed(&self) -> bool;

    /// Drop the table and release its connection. Idempotent.
    fn dispose<'a>(&'a self, cx: &'a Cx) -> Pin<Box<dyn Future<Output = Outcome<(), Error>> + Send + 'a>>;
}

/// Table state shared by a handle and the scope tracking it.
pub(crate) struct TableLease<C> {
    name: String,
    quoted_name: String,
    conn: Mutex<C>,
    disposed: AtomicBool,
}

impl<C: Connection> TableLease<C> {
    pub(crate) fn new(name: String, quoted_name: String, conn: C) -> Self {
        Self {
            name,
            quoted_name,
            conn: Mutex::new(conn),
            disposed: AtomicBool::new(false),
        }
    }

    fn ensure_usable(&self) -> Result<(), Error> {
        if self.disposed.load(Ordering::Acquire) {
            Err(Error::disposed(&self.name))
        } else {
            Ok(())
        }
    }

    async fn execute(&self, cx: &Cx, sql: &str) -> Outcome<u64, Error> {
        if let Err(e) = self.ensure_usable() {
            return Outcome::Err(e);
        }
        let conn = match self.conn.lock(cx).await {
            Ok(guard) => guard,
            Err(_) => return Outcome::Err(lock_error(&self.name)),
        };
        tracing::trace!(table = %self.name, sql = %sql, "Temp table statement");
        let command = conn.create_command(sql);
        conn.execute(cx, &command).await
    }

    async fn query(&self, cx: &Cx, command: &Command) -> Outcome<Vec<Row>, Error> {
        if let Err(e) = self.ensure_usable() {
            return Outcome::Err(e);
        }
        let conn = match self.conn.lock(cx).await {
            Ok(guard) => guard,
            Err(_) => return Outcome::Err(lock_error(&self.name)),
        };
        tracing::trace!(table = %self.name, sql = %command.text(), "Temp table query");
        conn.query(cx, command).await
    }

    /// `DROP TABLE IF EXISTS`, then close the connection whatever the drop
    /// returned.
    ///
    /// The lease is marked disposed only while holding the connection, so a
    /// call that is cancelled or cannot lock leaves it usable for a retry.
    async fn dispose_table(&self, cx: &Cx) -> Outcome<(), Error> {
        if self.disposed.load(Ordering::Acquire) {
            return Outcome::Ok(());
        }
        if let Some(reason) = cx.cancel_reason() {
            tracing::debug!(table = %self.name, "Temp table dispose cancelled before DROP");
            return Outcome::Cancelled(reason);
        }
        let mut conn = match self.conn.lock(cx).await {
            Ok(guard) => guard,
            Err(_) => return Outcome::Err(lock_error(&self.name)),
        };
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Outcome::Ok(());
        }

        let sql = format!("DROP TABLE IF EXISTS {}", self.quoted_name);
        tracing::debug!(table = %self.name, "Dropping temp table");
        let command = conn.create_command(&sql);
        let dropped = conn.execute(cx, &command).await;
        let closed = conn.close(cx).await;

        match dropped {
            Outcome::Ok(_) => closed,
            Outcome::Err(e) => {
                if let Outcome::Err(close_err) = closed {
                    tracing::warn!(table = %self.name, error = %close_err, "Closing temp table connection failed");
                }
                Outcome::Err(Error::Schema(SchemaError {
                    kind: SchemaErrorKind::Drop,
                    table: self.name.clone(),
                    message: "DROP TABLE failed".to_string(),
                    source: Some(Box::new(e)),
                }))
            }
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }
}

impl<C: Connection> ScopedDisposable for TableLease<C> {
    fn table_name(&self) -> &str {
        &self.name
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn dispose<'a>(&'a self, cx: &'a Cx) -> Pin<Box<dyn Future<Output = Outcome<(), Error>> + Send + 'a>> {
        Box::pin(self.dispose_table(cx))
    }
}

impl<C> Drop for TableLease<C> {
    fn drop(&mut self) {
        if !*self.disposed.get_mut() {
            tracing::warn!(
                table = %self.name,
                "Temp table handle dropped without dispose; the table stays until the server removes it"
            );
        }
    }
}

/// A live ephemeral table holding rows shaped like `T`.
///
/// The handle keeps one open connection for its whole life. Every operation
/// after [`dispose`](TempTableHandle::dispose) fails with
/// [`Error::Disposed`]; disposing twice is fine.
pub struct TempTableHandle<T, C: Connection> {
    lease: Arc<TableLease<C>>,
    info: Arc<EntityPropertyInfo<T>>,
}

impl<T, C: Connection> Clone for TempTableHandle<T, C> {
    fn clone(&self) -> Self {
        Self {
            lease: Arc::clone(&self.lease),
            info: Arc::clone(&self.info),
        }
    }
}

impl<T, C: Connection> std::fmt::Debug for TempTableHandle<T, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TempTableHandle")
            .field("name", &self.lease.name)
            .field("disposed", &self.lease.disposed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl<T, C: Connection + 'static> TempTableHandle<T, C> {
    pub(crate) fn new(lease: TableLease<C>, info: EntityPropertyInfo<T>) -> Self {
        Self {
            lease: Arc::new(lease),
            info: Arc::new(info),
        }
    }

    /// The scope-facing side of this handle.
    pub(crate) fn disposable(&self) -> Arc<dyn ScopedDisposable> {
        Arc::clone(&self.lease) as Arc<dyn ScopedDisposable>
    }

    /// Unquoted table name.
    pub fn name(&self) -> &str {
        &self.lease.name
    }

    pub fn quoted_name(&self) -> &str {
        &self.lease.quoted_name
    }

    pub fn is_disposed(&self) -> bool {
        self.lease.disposed.load(Ordering::Acquire)
    }

    /// Column metadata bound to this table's name.
    pub fn info(&self) -> &EntityPropertyInfo<T> {
        &self.info
    }

    /// `SELECT * FROM <table>`, ready for further composition.
    pub fn query(&self) -> Result<Select<T>, Error> {
        self.lease.ensure_usable()?;
        Ok(Select::from_source(self.lease.quoted_name.clone()))
    }

    /// Insert rows with a single `VALUES` statement. Empty input is a no-op.
    #[tracing::instrument(level = "debug", skip(self, cx, rows), fields(table = %self.lease.name, rows = rows.len()))]
    pub async fn insert(&self, cx: &Cx, rows: &[T]) -> Outcome<u64, Error> {
        if let Err(e) = self.lease.ensure_usable() {
            return Outcome::Err(e);
        }
        if rows.is_empty() {
            return Outcome::Ok(0);
        }
        let sql = match ValuesBuilder.build(rows, &self.info, &Settings::new()) {
            Ok(sql) => sql,
            Err(e) => return Outcome::Err(e),
        };
        match self.lease.execute(cx, &sql).await {
            Outcome::Ok(_) => Outcome::Ok(rows.len() as u64),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// The statement [`insert_from_query`](Self::insert_from_query) runs.
    pub fn insert_from_query_sql<Q: SourceQuery + ?Sized>(&self, source: &Q) -> Result<String, Error> {
        let resolved = ParameterResolver::resolve(source)?;
        let columns = self.info.column_list();
        Ok(format!(
            "INSERT INTO {} ({}) SELECT {} FROM ({}) AS \"{}\"",
            self.lease.quoted_name, columns, columns, resolved.sql, SOURCE_ALIAS
        ))
    }

    /// Copy the result of `source` into this table on the server.
    ///
    /// Placeholders in the source are inlined as literals first. The outer
    /// projection lists this table's columns, so the subquery may return
    /// them in any order.
    #[tracing::instrument(level = "debug", skip(self, cx, source), fields(table = %self.lease.name))]
    pub async fn insert_from_query<Q: SourceQuery + ?Sized>(&self, cx: &Cx, source: &Q) -> Outcome<u64, Error> {
        if let Err(e) = self.lease.ensure_usable() {
            return Outcome::Err(e);
        }
        let sql = match self.insert_from_query_sql(source) {
            Ok(sql) => sql,
            Err(e) => return Outcome::Err(e),
        };
        self.lease.execute(cx, &sql).await
    }

    /// Run a composed query on this handle's connection.
    pub async fn fetch(&self, cx: &Cx, select: &Select<T>) -> Outcome<Vec<Row>, Error> {
        let CompiledQuery { sql, parameters } = select.compile();
        let command = Command::read(sql).parameters(parameters);
        self.lease.query(cx, &command).await
    }

    /// Number of rows in the table.
    pub async fn count(&self, cx: &Cx) -> Outcome<u64, Error> {
        let command = Command::read(format!("SELECT count() FROM {}", self.lease.quoted_name));
        let rows = match self.lease.query(cx, &command).await {
            Outcome::Ok(rows) => rows,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        let value = rows.first().and_then(|row| row.get(0));
        match value.and_then(Value::as_u64) {
            Some(n) => Outcome::Ok(n),
            None => Outcome::Err(Error::Type(TypeError {
                expected: "UInt64",
                actual: value.map_or_else(|| "no rows".to_string(), |v| v.type_name().to_string()),
                column: Some("count()".to_string()),
            })),
        }
    }

    /// Drop the table and release the connection. Idempotent.
    ///
    /// The connection is closed even when the DROP fails.
    #[tracing::instrument(level = "debug", skip(self, cx), fields(table = %self.lease.name))]
    pub async fn dispose(&self, cx: &Cx) -> Outcome<(), Error> {
        self.lease.dispose_table(cx).await
    }
}
