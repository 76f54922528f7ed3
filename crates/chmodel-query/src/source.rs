//! Queries usable as the source of a server-side copy.

use chmodel_core::Value;

use crate::expr::Expr;

/// A composed query that can be embedded as a subquery.
///
/// The SQL text may contain `{name:Type}` placeholders. Consumers resolve
/// them from the live parameter context when one is available, and fall
/// back to the values reachable from [`expressions`](SourceQuery::expressions).
pub trait SourceQuery {
    /// SQL text, possibly containing placeholders.
    fn sql(&self) -> String;

    /// Resolved placeholder name to value map from compilation, if any.
    fn parameter_context(&self) -> Option<Vec<(String, Value)>>;

    /// Expression trees holding the query's captured values.
    fn expressions(&self) -> Vec<&Expr>;
}

/// Raw SQL text plus the values it captures.
///
/// ```ignore
/// let source = SqlQuery::new(r#"SELECT * FROM "Users" WHERE "Age" >= {min_age:UInt8}"#)
///     .capture("min_age", 21u8);
/// ```
#[derive(Debug, Clone, Default)]
pub struct SqlQuery {
    sql: String,
    captures: Vec<Expr>,
    context: Option<Vec<(String, Value)>>,
}

impl SqlQuery {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            captures: Vec::new(),
            context: None,
        }
    }

    /// Record a captured value under `name`.
    pub fn capture(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.captures.push(Expr::param(name, value));
        self
    }

    /// Record an unnamed captured value.
    pub fn capture_literal(mut self, value: impl Into<Value>) -> Self {
        self.captures.push(Expr::lit(value));
        self
    }

    /// Bind a resolved parameter, as a driver would after compilation.
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context
            .get_or_insert_with(Vec::new)
            .push((name.into(), value.into()));
        self
    }
}

impl SourceQuery for SqlQuery {
    fn sql(&self) -> String {
        self.sql.clone()
    }

    fn parameter_context(&self) -> Option<Vec<(String, Value)>> {
        self.context.clone()
    }

    fn expressions(&self) -> Vec<&Expr> {
        self.captures.iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_query_captures() {
        let q = SqlQuery::new("SELECT 1").capture("limit", 5u32).capture_literal("x");
        assert_eq!(q.sql(), "SELECT 1");
        assert!(q.parameter_context().is_none());
        assert_eq!(q.expressions().len(), 2);
    }

    #[test]
    fn test_sql_query_bind_sets_context() {
        let q = SqlQuery::new("SELECT {a:UInt8}").bind("a", 1u8);
        assert_eq!(
            q.parameter_context(),
            Some(vec![("a".to_string(), Value::UInt8(1))])
        );
    }
}
