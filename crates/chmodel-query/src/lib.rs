//! Composable ClickHouse SELECT queries for chmodel.
//!
//! `chmodel-query` renders queries with ClickHouse's named `{name:Type}`
//! placeholders. A compiled query carries the values for those
//! placeholders alongside its SQL text; the temp-table layer uses both when
//! it embeds a query as a subquery.

pub mod clause;
pub mod expr;
pub mod select;
pub mod source;

pub use clause::{NullsOrder, OrderBy, OrderDirection};
pub use expr::{BinaryOp, Expr, LITERAL_PARAM_BASE, ParamCollector};
pub use select::{CompiledQuery, Select};
pub use source::{SourceQuery, SqlQuery};
