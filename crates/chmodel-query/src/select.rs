//! SELECT query builder.

use std::marker::PhantomData;

use asupersync::{Cx, Outcome};
use chmodel_core::{Command, Connection, Error, Model, Row, Value, quote_ident};

use crate::clause::OrderBy;
use crate::expr::{Expr, ParamCollector};
use crate::source::SourceQuery;

/// SQL text plus the values of its `{name:Type}` placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub parameters: Vec<(String, Value)>,
}

/// A composable SELECT over rows of `M`.
///
/// The source is usually `M`'s own table, but can be any table name, which
/// is how ephemeral tables expose themselves as ordinary queries.
#[derive(Debug)]
pub struct Select<M> {
    source: String,
    columns: Vec<String>,
    filter: Option<Expr>,
    order_by: Vec<OrderBy>,
    limit: Option<u64>,
    offset: Option<u64>,
    _marker: PhantomData<fn() -> M>,
}

impl<M> Clone for Select<M> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            columns: self.columns.clone(),
            filter: self.filter.clone(),
            order_by: self.order_by.clone(),
            limit: self.limit,
            offset: self.offset,
            _marker: PhantomData,
        }
    }
}

impl<M: Model> Select<M> {
    /// Select from the model's own table.
    pub fn new() -> Self {
        Self::from_table(M::TABLE_NAME)
    }
}

impl<M: Model> Default for Select<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Select<M> {
    /// Select from the named table.
    pub fn from_table(table: &str) -> Self {
        Self::from_source(quote_ident(table))
    }

    /// Select from an already rendered source (quoted name or subquery).
    pub fn from_source(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            columns: Vec::new(),
            filter: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
            _marker: PhantomData,
        }
    }

    /// Project specific columns instead of `*`.
    pub fn columns(mut self, cols: &[&str]) -> Self {
        self.columns = cols.iter().map(|&c| c.to_string()).collect();
        self
    }

    /// Add a WHERE condition, ANDed with any existing one.
    pub fn filter(mut self, expr: Expr) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    /// Add ORDER BY clause.
    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    /// Set LIMIT.
    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    /// Set OFFSET.
    pub fn offset(mut self, n: u64) -> Self {
        self.offset = Some(n);
        self
    }

    /// The rendered FROM source.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The WHERE expression, if any.
    pub fn filter_expr(&self) -> Option<&Expr> {
        self.filter.as_ref()
    }

    /// Render SQL and collect placeholder values.
    pub fn compile(&self) -> CompiledQuery {
        let mut params = ParamCollector::new();

        let projection = if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let mut sql = format!("SELECT {} FROM {}", projection, self.source);

        if let Some(filter) = &self.filter {
            sql.push_str(" WHERE ");
            sql.push_str(&filter.build(&mut params));
        }

        if !self.order_by.is_empty() {
            let orders: Vec<String> = self.order_by.iter().map(OrderBy::to_sql).collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&orders.join(", "));
        }

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }

        CompiledQuery {
            sql,
            parameters: params.into_params(),
        }
    }

    /// Render SQL only.
    pub fn to_sql(&self) -> String {
        self.compile().sql
    }

    /// Execute the query and return all rows.
    #[tracing::instrument(level = "debug", skip(self, cx, conn), fields(source = %self.source))]
    pub async fn all<C: Connection>(&self, cx: &Cx, conn: &C) -> Outcome<Vec<Row>, Error> {
        let CompiledQuery { sql, parameters } = self.compile();
        tracing::trace!(sql = %sql, params = parameters.len(), "SELECT");
        let command = Command::read(sql).parameters(parameters);
        conn.query(cx, &command).await
    }
}

impl<M> SourceQuery for Select<M> {
    fn sql(&self) -> String {
        self.compile().sql
    }

    fn parameter_context(&self) -> Option<Vec<(String, Value)>> {
        Some(self.compile().parameters)
    }

    fn expressions(&self) -> Vec<&Expr> {
        self.filter.iter().collect()
    }
}
