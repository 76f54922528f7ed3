//! SQL expressions for query building.
//!
//! Values never appear inline in the generated SQL. Each literal becomes a
//! ClickHouse `{name:Type}` placeholder and its value is collected into the
//! query's parameter list.

use chmodel_core::{ChType, Value, quote_ident};

/// A SQL expression that can be used in WHERE, ORDER BY and projections.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Column reference with optional table qualifier
    Column {
        /// Optional table name or alias
        table: Option<String>,
        /// Column name
        name: String,
    },

    /// Literal value, bound as `{p_<k>:<Type>}`
    Literal(Value),

    /// Named captured value, bound as `{<name>_<k>:<Type>}`
    Param { name: String, value: Value },

    /// Binary operation (e.g., a = b, a > b)
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },

    /// Logical NOT
    Not(Box<Expr>),

    /// Function call (e.g., count(), lower(name))
    Function { name: String, args: Vec<Expr> },

    /// IN expression
    In {
        expr: Box<Expr>,
        values: Vec<Expr>,
        negated: bool,
    },

    /// BETWEEN expression
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },

    /// IS NULL / IS NOT NULL
    IsNull { expr: Box<Expr>, negated: bool },

    /// LIKE / ILIKE pattern
    Like {
        expr: Box<Expr>,
        pattern: Box<Expr>,
        negated: bool,
        case_insensitive: bool,
    },

    /// Raw SQL fragment (escape hatch)
    Raw(String),
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    /// Get the SQL representation of this operator.
    pub const fn as_str(self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        }
    }

    const fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

/// Collects bound parameters while an expression tree is rendered.
///
/// `k` counts every bound value across the whole query, so placeholder
/// names are unique even when the same capture name repeats.
#[derive(Debug, Default)]
pub struct ParamCollector {
    params: Vec<(String, Value)>,
}

impl ParamCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a value and return its placeholder text.
    pub fn bind(&mut self, base: &str, value: &Value) -> String {
        let name = format!("{}_{}", base, self.params.len());
        let ty = ChType::for_value(value);
        let placeholder = format!("{{{}:{}}}", name, ty.store_name());
        self.params.push((name, value.clone()));
        placeholder
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn into_params(self) -> Vec<(String, Value)> {
        self.params
    }
}

/// Base name used for unnamed literals.
pub const LITERAL_PARAM_BASE: &str = "p";

impl Expr {
    // ==================== Constructors ====================

    /// Create a column reference expression.
    pub fn col(name: impl Into<String>) -> Self {
        Expr::Column {
            table: None,
            name: name.into(),
        }
    }

    /// Create a qualified column reference (table.column).
    pub fn qualified(table: impl Into<String>, column: impl Into<String>) -> Self {
        Expr::Column {
            table: Some(table.into()),
            name: column.into(),
        }
    }

    /// Create a literal value expression.
    pub fn lit(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    /// Create a named captured value.
    pub fn param(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Expr::Param {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Create a raw SQL expression (escape hatch).
    pub fn raw(sql: impl Into<String>) -> Self {
        Expr::Raw(sql.into())
    }

    /// Create a function call.
    pub fn func(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Function {
            name: name.into(),
            args,
        }
    }

    fn binary(self, op: BinaryOp, other: impl Into<Expr>) -> Self {
        Expr::Binary {
            left: Box::new(self),
            op,
            right: Box::new(other.into()),
        }
    }

    // ==================== Comparison Operators ====================

    pub fn eq(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Eq, other)
    }

    pub fn ne(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Ne, other)
    }

    pub fn lt(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Lt, other)
    }

    pub fn le(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Le, other)
    }

    pub fn gt(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Gt, other)
    }

    pub fn ge(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Ge, other)
    }

    // ==================== Arithmetic ====================

    pub fn add(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Add, other)
    }

    pub fn sub(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Sub, other)
    }

    pub fn mul(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Mul, other)
    }

    pub fn div(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Div, other)
    }

    // ==================== Logical Operators ====================

    pub fn and(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::And, other)
    }

    pub fn or(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Or, other)
    }

    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }

    // ==================== Predicates ====================

    pub fn is_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: false,
        }
    }

    pub fn is_not_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: true,
        }
    }

    pub fn in_list(self, values: Vec<impl Into<Expr>>) -> Self {
        Expr::In {
            expr: Box::new(self),
            values: values.into_iter().map(Into::into).collect(),
            negated: false,
        }
    }

    pub fn not_in_list(self, values: Vec<impl Into<Expr>>) -> Self {
        Expr::In {
            expr: Box::new(self),
            values: values.into_iter().map(Into::into).collect(),
            negated: true,
        }
    }

    pub fn between(self, low: impl Into<Expr>, high: impl Into<Expr>) -> Self {
        Expr::Between {
            expr: Box::new(self),
            low: Box::new(low.into()),
            high: Box::new(high.into()),
            negated: false,
        }
    }

    pub fn like(self, pattern: impl Into<Expr>) -> Self {
        Expr::Like {
            expr: Box::new(self),
            pattern: Box::new(pattern.into()),
            negated: false,
            case_insensitive: false,
        }
    }

    pub fn ilike(self, pattern: impl Into<Expr>) -> Self {
        Expr::Like {
            expr: Box::new(self),
            pattern: Box::new(pattern.into()),
            negated: false,
            case_insensitive: true,
        }
    }

    // ==================== Rendering ====================

    /// Render this expression, binding its values into `params`.
    pub fn build(&self, params: &mut ParamCollector) -> String {
        match self {
            Expr::Column { table, name } => match table {
                Some(t) => format!("{}.{}", quote_ident(t), quote_ident(name)),
                None => quote_ident(name),
            },
            Expr::Literal(Value::Null) | Expr::Param { value: Value::Null, .. } => {
                "NULL".to_string()
            }
            Expr::Literal(value) => params.bind(LITERAL_PARAM_BASE, value),
            Expr::Param { name, value } => params.bind(name, value),
            Expr::Binary { left, op, right } => {
                let left_sql = left.build_operand(params, *op);
                let right_sql = right.build_operand(params, *op);
                format!("{} {} {}", left_sql, op.as_str(), right_sql)
            }
            Expr::Not(expr) => format!("NOT ({})", expr.build(params)),
            Expr::Function { name, args } => {
                let args: Vec<String> = args.iter().map(|a| a.build(params)).collect();
                format!("{}({})", name, args.join(", "))
            }
            Expr::In {
                expr,
                values,
                negated,
            } => {
                let expr_sql = expr.build(params);
                let values: Vec<String> = values.iter().map(|v| v.build(params)).collect();
                let op = if *negated { "NOT IN" } else { "IN" };
                format!("{} {} ({})", expr_sql, op, values.join(", "))
            }
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let expr_sql = expr.build(params);
                let low_sql = low.build(params);
                let high_sql = high.build(params);
                let op = if *negated { "NOT BETWEEN" } else { "BETWEEN" };
                format!("{} {} {} AND {}", expr_sql, op, low_sql, high_sql)
            }
            Expr::IsNull { expr, negated } => {
                let op = if *negated { "IS NOT NULL" } else { "IS NULL" };
                format!("{} {}", expr.build(params), op)
            }
            Expr::Like {
                expr,
                pattern,
                negated,
                case_insensitive,
            } => {
                let expr_sql = expr.build(params);
                let pattern_sql = pattern.build(params);
                let op = match (*negated, *case_insensitive) {
                    (false, false) => "LIKE",
                    (true, false) => "NOT LIKE",
                    (false, true) => "ILIKE",
                    (true, true) => "NOT ILIKE",
                };
                format!("{} {} {}", expr_sql, op, pattern_sql)
            }
            Expr::Raw(sql) => sql.clone(),
        }
    }

    /// Parenthesize nested logical operations under a different operator.
    fn build_operand(&self, params: &mut ParamCollector, parent: BinaryOp) -> String {
        let sql = self.build(params);
        match self {
            Expr::Binary { op, .. } if op.is_logical() && *op != parent => format!("({})", sql),
            _ => sql,
        }
    }

    /// Visit every bound value in render order.
    ///
    /// The callback receives the capture name (`None` for plain literals)
    /// and the value. Null values are skipped since they render inline.
    pub fn visit_values<'a>(&'a self, f: &mut impl FnMut(Option<&'a str>, &'a Value)) {
        match self {
            Expr::Column { .. } | Expr::Raw(_) => {}
            Expr::Literal(value) => {
                if !value.is_null() {
                    f(None, value);
                }
            }
            Expr::Param { name, value } => {
                if !value.is_null() {
                    f(Some(name), value);
                }
            }
            Expr::Binary { left, right, .. } => {
                left.visit_values(f);
                right.visit_values(f);
            }
            Expr::Not(expr) | Expr::IsNull { expr, .. } => expr.visit_values(f),
            Expr::Function { args, .. } => {
                for arg in args {
                    arg.visit_values(f);
                }
            }
            Expr::In { expr, values, .. } => {
                expr.visit_values(f);
                for v in values {
                    v.visit_values(f);
                }
            }
            Expr::Between {
                expr, low, high, ..
            } => {
                expr.visit_values(f);
                low.visit_values(f);
                high.visit_values(f);
            }
            Expr::Like { expr, pattern, .. } => {
                expr.visit_values(f);
                pattern.visit_values(f);
            }
        }
    }
}

impl From<Value> for Expr {
    fn from(v: Value) -> Self {
        Expr::Literal(v)
    }
}

impl From<&str> for Expr {
    fn from(s: &str) -> Self {
        Expr::Literal(Value::Text(s.to_string()))
    }
}

impl From<String> for Expr {
    fn from(s: String) -> Self {
        Expr::Literal(Value::Text(s))
    }
}

impl From<i32> for Expr {
    fn from(n: i32) -> Self {
        Expr::Literal(Value::Int32(n))
    }
}

impl From<i64> for Expr {
    fn from(n: i64) -> Self {
        Expr::Literal(Value::Int64(n))
    }
}

impl From<u32> for Expr {
    fn from(n: u32) -> Self {
        Expr::Literal(Value::UInt32(n))
    }
}

impl From<u64> for Expr {
    fn from(n: u64) -> Self {
        Expr::Literal(Value::UInt64(n))
    }
}

impl From<bool> for Expr {
    fn from(b: bool) -> Self {
        Expr::Literal(Value::Bool(b))
    }
}

impl From<f64> for Expr {
    fn from(n: f64) -> Self {
        Expr::Literal(Value::Float64(n))
    }
}
