//! Core types and traits for chmodel.
//!
//! - `Value` and `ChType` for dynamically typed values and their ClickHouse types
//! - `render_literal` / `render_settings` for inlining values into SQL text
//! - `Model` and `PropertyMapping` for struct-to-table metadata
//! - `Connection` trait for drivers
//! - `Outcome` and `Cx` re-exported from asupersync for cancel-correct operations

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

pub mod connection;
pub mod error;
pub mod identifiers;
pub mod literal;
pub mod model;
pub mod row;
pub mod settings;
pub mod types;
pub mod value;

pub use connection::{Command, CommandIntent, Connection, ConnectionConfig, ConnectionFactory};
pub use error::{
    BatchError, ConfigError, ConnectionError, ConnectionErrorKind, DisposedError, Error,
    ParameterError, QueryError, QueryErrorKind, Result, SchemaError, SchemaErrorKind, TypeError,
};
pub use identifiers::{is_valid_setting_name, quote_ident, sanitize_identifier, short_type_name};
pub use literal::{escape_string, render_literal, render_settings};
pub use model::{Model, NestedMapping, PropertyMapping};
pub use row::{ColumnInfo, Row};
pub use settings::{SettingValue, Settings};
pub use types::{ChType, NestedField, TypeInfo};
pub use value::Value;
