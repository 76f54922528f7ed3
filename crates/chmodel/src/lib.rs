//! chmodel - bulk data movement and ephemeral tables for ClickHouse.
//!
//! chmodel maps Rust structs to ClickHouse tables and moves rows in bulk:
//!
//! - Batched `INSERT ... VALUES` or `FORMAT JSONEachRow` statements
//! - Sequential, parallel (one forked connection per batch) and streaming inserts
//! - Ephemeral tables that can be queried like mapped tables and are dropped on dispose
//! - Inlining of query parameters so a composed query can feed an ephemeral table
//!
//! # Quick Start
//!
//! ```ignore
//! use chmodel::prelude::*;
//!
//! struct Event {
//!     id: u64,
//!     name: String,
//! }
//!
//! impl Model for Event {
//!     const TABLE_NAME: &'static str = "Events";
//!
//!     fn properties() -> Vec<PropertyMapping<Self>> {
//!         vec![
//!             PropertyMapping::new("Id", |e: &Event| e.id),
//!             PropertyMapping::new("Name", |e: &Event| e.name.clone()),
//!         ]
//!     }
//! }
//!
//! async fn load(cx: &Cx, conn: &mut impl Connection, events: &[Event]) -> Outcome<BulkInsertResult, Error> {
//!     conn.bulk_inserter()
//!         .configure(|o| {
//!             o.batch_size = 50_000;
//!             o.use_async_insert = true;
//!         })
//!         .insert_all(cx, events)
//!         .await
//! }
//! ```
//!
//! Batches are independent statements. When one fails, earlier batches stay
//! committed; the returned [`BatchError`] says which batch failed and how
//! many rows were already written.

pub use chmodel_core::error::{
    BatchError, ConfigError, ConnectionError, ConnectionErrorKind, DisposedError, ParameterError,
    QueryError, QueryErrorKind, SchemaError, SchemaErrorKind, TypeError,
};
pub use chmodel_core::{
    ChType, ColumnInfo, Command, CommandIntent, Connection, ConnectionConfig, ConnectionFactory,
    Cx, Error, Model, NestedField, NestedMapping, Outcome, PropertyMapping, Result, Row,
    SettingValue, Settings, TypeInfo, Value, escape_string, quote_ident, render_literal,
    render_settings, sanitize_identifier, short_type_name,
};

pub use chmodel_query::{
    BinaryOp, CompiledQuery, Expr, NullsOrder, OrderBy, OrderDirection, Select, SourceQuery,
    SqlQuery,
};

pub use chmodel_bulk::{
    AdmissionGate, BatchBuilder, BulkInsertOptions, BulkInsertResult, BulkInserter,
    DEFAULT_BATCH_SIZE, EntityPropertyInfo, InsertFormat, JsonLinesBuilder, ProgressCallback,
    PropertyCache, ValuesBuilder,
};

pub use chmodel_temp::{
    ParameterResolver, ResolvedQuery, ScopeDisposeReport, ScopedDisposable, TempTableHandle,
    TempTableManager, TempTableScope,
};

/// Bulk insert entry point on any connection.
pub trait BulkInsertExt: Connection {
    /// An inserter over this connection with default options.
    fn bulk_inserter(&mut self) -> BulkInserter<'_, Self> {
        BulkInserter::new(self)
    }
}

impl<C: Connection> BulkInsertExt for C {}

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        BulkInsertExt,
        BulkInsertOptions,
        BulkInsertResult,
        BulkInserter,
        ChType,
        Connection,
        ConnectionConfig,
        Cx,
        Error,
        Expr,
        InsertFormat,
        Model,
        NestedMapping,
        OrderBy,
        Outcome,
        PropertyMapping,
        Result,
        Row,
        Select,
        SqlQuery,
        TempTableHandle,
        TempTableManager,
        TempTableScope,
        Value,
    };
}
