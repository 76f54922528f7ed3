//! ClickHouse column types and scalar literal rendering.

use std::fmt::Write as _;

use crate::literal::{escape_string, render_literal};
use crate::value::Value;

/// ClickHouse column types understood by chmodel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChType {
    Bool,

    // Integer types
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Int8,
    Int16,
    Int32,
    Int64,

    // Floating point
    Float32,
    Float64,

    // Fixed precision
    Decimal { precision: u8, scale: u8 },

    // String types
    String,
    FixedString(u32),

    Uuid,

    // Date/time types
    Date,
    Date32,
    DateTime,
    /// Sub-second precision in decimal digits (0-9)
    DateTime64(u8),

    // Wrappers
    Nullable(Box<ChType>),
    LowCardinality(Box<ChType>),
    Array(Box<ChType>),

    /// Repeated group stored as one array per field
    Nested(Vec<NestedField>),

    /// Any type name chmodel does not model explicitly
    Custom(String),
}

/// One field of a `Nested(...)` column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NestedField {
    pub name: String,
    pub ty: ChType,
}

impl NestedField {
    pub fn new(name: impl Into<String>, ty: ChType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

impl ChType {
    /// The type name as written in DDL.
    pub fn store_name(&self) -> String {
        match self {
            ChType::Bool => "Bool".to_string(),
            ChType::UInt8 => "UInt8".to_string(),
            ChType::UInt16 => "UInt16".to_string(),
            ChType::UInt32 => "UInt32".to_string(),
            ChType::UInt64 => "UInt64".to_string(),
            ChType::Int8 => "Int8".to_string(),
            ChType::Int16 => "Int16".to_string(),
            ChType::Int32 => "Int32".to_string(),
            ChType::Int64 => "Int64".to_string(),
            ChType::Float32 => "Float32".to_string(),
            ChType::Float64 => "Float64".to_string(),
            ChType::Decimal { precision, scale } => format!("Decimal({}, {})", precision, scale),
            ChType::String => "String".to_string(),
            ChType::FixedString(n) => format!("FixedString({})", n),
            ChType::Uuid => "UUID".to_string(),
            ChType::Date => "Date".to_string(),
            ChType::Date32 => "Date32".to_string(),
            ChType::DateTime => "DateTime".to_string(),
            ChType::DateTime64(p) => format!("DateTime64({})", p),
            ChType::Nullable(inner) => format!("Nullable({})", inner.store_name()),
            ChType::LowCardinality(inner) => format!("LowCardinality({})", inner.store_name()),
            ChType::Array(inner) => format!("Array({})", inner.store_name()),
            ChType::Nested(fields) => {
                let inner: Vec<String> = fields
                    .iter()
                    .map(|f| format!("{} {}", f.name, f.ty.store_name()))
                    .collect();
                format!("Nested({})", inner.join(", "))
            }
            ChType::Custom(name) => name.clone(),
        }
    }

    /// Is this a nested (repeated-group) type?
    pub fn is_nested(&self) -> bool {
        matches!(self, ChType::Nested(_))
    }

    /// Fields of a nested type, or an empty slice.
    pub fn nested_fields(&self) -> &[NestedField] {
        match self {
            ChType::Nested(fields) => fields,
            _ => &[],
        }
    }

    /// Strip `Nullable` and `LowCardinality` wrappers.
    pub fn base(&self) -> &ChType {
        match self {
            ChType::Nullable(inner) | ChType::LowCardinality(inner) => inner.base(),
            other => other,
        }
    }

    /// Check if this type is numeric.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self.base(),
            ChType::UInt8
                | ChType::UInt16
                | ChType::UInt32
                | ChType::UInt64
                | ChType::Int8
                | ChType::Int16
                | ChType::Int32
                | ChType::Int64
                | ChType::Float32
                | ChType::Float64
                | ChType::Decimal { .. }
        )
    }

    /// Natural column type of a runtime value.
    pub fn for_value(value: &Value) -> ChType {
        match value {
            Value::Null => ChType::Nullable(Box::new(ChType::String)),
            Value::Bool(_) => ChType::Bool,
            Value::Int8(_) => ChType::Int8,
            Value::Int16(_) => ChType::Int16,
            Value::Int32(_) => ChType::Int32,
            Value::Int64(_) => ChType::Int64,
            Value::UInt8(_) => ChType::UInt8,
            Value::UInt16(_) => ChType::UInt16,
            Value::UInt32(_) => ChType::UInt32,
            Value::UInt64(_) => ChType::UInt64,
            Value::Float32(_) => ChType::Float32,
            Value::Float64(_) => ChType::Float64,
            Value::Decimal(s) => {
                let scale = s.split_once('.').map_or(0, |(_, frac)| frac.len());
                ChType::Decimal {
                    precision: 38,
                    scale: scale.min(38) as u8,
                }
            }
            Value::Text(_) | Value::Bytes(_) | Value::Json(_) => ChType::String,
            Value::Date(_) => ChType::Date,
            Value::Timestamp(_) => ChType::DateTime64(6),
            Value::Uuid(_) => ChType::Uuid,
            Value::Array(items) => {
                let inner = items
                    .iter()
                    .find(|v| !v.is_null())
                    .map_or(ChType::String, ChType::for_value);
                ChType::Array(Box::new(inner))
            }
            Value::Nested(_) => ChType::Custom("Nested".to_string()),
        }
    }

    /// Parse a ClickHouse type name such as `Nullable(DateTime64(3, 'UTC'))`.
    ///
    /// Names chmodel does not model come back as [`ChType::Custom`].
    pub fn parse(name: &str) -> ChType {
        let name = name.trim();
        if let Some((head, args)) = split_call(name) {
            return match head {
                "Nullable" => ChType::Nullable(Box::new(ChType::parse(args))),
                "LowCardinality" => ChType::LowCardinality(Box::new(ChType::parse(args))),
                "Array" => ChType::Array(Box::new(ChType::parse(args))),
                "FixedString" => args
                    .trim()
                    .parse()
                    .map_or_else(|_| ChType::Custom(name.to_string()), ChType::FixedString),
                "DateTime" => ChType::DateTime,
                "DateTime64" => {
                    let precision = args.split(',').next().unwrap_or("").trim();
                    precision
                        .parse()
                        .map_or_else(|_| ChType::Custom(name.to_string()), ChType::DateTime64)
                }
                "Decimal" => {
                    let mut parts = args.split(',').map(str::trim);
                    match (
                        parts.next().and_then(|p| p.parse().ok()),
                        parts.next().and_then(|s| s.parse().ok()),
                    ) {
                        (Some(precision), Some(scale)) => ChType::Decimal { precision, scale },
                        _ => ChType::Custom(name.to_string()),
                    }
                }
                _ => ChType::Custom(name.to_string()),
            };
        }
        match name {
            "Bool" | "Boolean" => ChType::Bool,
            "UInt8" => ChType::UInt8,
            "UInt16" => ChType::UInt16,
            "UInt32" => ChType::UInt32,
            "UInt64" => ChType::UInt64,
            "Int8" => ChType::Int8,
            "Int16" => ChType::Int16,
            "Int32" => ChType::Int32,
            "Int64" => ChType::Int64,
            "Float32" => ChType::Float32,
            "Float64" => ChType::Float64,
            "String" => ChType::String,
            "UUID" => ChType::Uuid,
            "Date" => ChType::Date,
            "Date32" => ChType::Date32,
            "DateTime" => ChType::DateTime,
            "DateTime64" => ChType::DateTime64(3),
            other => ChType::Custom(other.to_string()),
        }
    }

    /// Render a value as a SQL literal of this type.
    ///
    /// Null renders as `NULL` and nested values as parallel arrays, see
    /// [`render_literal`].
    pub fn literal(&self, value: &Value) -> String {
        let ty = self.base();
        match value {
            Value::Null | Value::Nested(_) => render_literal(value, self),
            Value::Bool(b) => {
                let text = match (matches!(ty, ChType::Bool), *b) {
                    (true, true) => "true",
                    (true, false) => "false",
                    (false, true) => "1",
                    (false, false) => "0",
                };
                text.to_string()
            }
            Value::Int8(v) => v.to_string(),
            Value::Int16(v) => v.to_string(),
            Value::Int32(v) => v.to_string(),
            Value::Int64(v) => v.to_string(),
            Value::UInt8(v) => v.to_string(),
            Value::UInt16(v) => v.to_string(),
            Value::UInt32(v) => v.to_string(),
            Value::UInt64(v) => v.to_string(),
            Value::Float32(v) => format_float(f64::from(*v)),
            Value::Float64(v) => format_float(*v),
            Value::Decimal(s) => {
                if is_decimal_text(s) {
                    s.clone()
                } else {
                    quote(s)
                }
            }
            Value::Text(s) => quote(s),
            Value::Bytes(bytes) => {
                let mut out = String::with_capacity(bytes.len() * 4 + 2);
                out.push('\'');
                for b in bytes {
                    let _ = write!(out, "\\x{:02X}", b);
                }
                out.push('\'');
                out
            }
            Value::Date(days) => match ty {
                ChType::DateTime | ChType::DateTime64(_) => {
                    let micros = i64::from(*days) * 86_400 * 1_000_000;
                    format!("'{}'", format_timestamp(micros, datetime_precision(ty)))
                }
                _ => format!("'{}'", format_date(i64::from(*days))),
            },
            Value::Timestamp(micros) => match ty {
                ChType::Date | ChType::Date32 => {
                    let days = micros.div_euclid(86_400 * 1_000_000);
                    format!("'{}'", format_date(days))
                }
                _ => format!("'{}'", format_timestamp(*micros, datetime_precision(ty))),
            },
            Value::Uuid(bytes) => format!("'{}'", format_uuid(bytes)),
            Value::Json(json) => quote(&json.to_string()),
            Value::Array(items) => {
                let rendered: Vec<String> = items
                    .iter()
                    .map(|item| match ty {
                        ChType::Array(inner) => inner.literal(item),
                        _ => ChType::for_value(item).literal(item),
                    })
                    .collect();
                format!("[{}]", rendered.join(", "))
            }
        }
    }
}

impl std::fmt::Display for ChType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.store_name())
    }
}

/// Split `Head(args)` into its head and the text between the outer parentheses.
fn split_call(name: &str) -> Option<(&str, &str)> {
    let open = name.find('(')?;
    let args = name[open + 1..].strip_suffix(')')?;
    Some((name[..open].trim(), args))
}

fn quote(s: &str) -> String {
    format!("'{}'", escape_string(s))
}

fn is_decimal_text(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    let mut parts = digits.splitn(2, '.');
    let int_ok = parts
        .next()
        .is_some_and(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()));
    let frac_ok = parts
        .next()
        .is_none_or(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()));
    int_ok && frac_ok
}

fn format_float(v: f64) -> String {
    if v.is_nan() {
        "nan".to_string()
    } else if v.is_infinite() {
        String::from(if v > 0.0 { "inf" } else { "-inf" })
    } else {
        v.to_string()
    }
}

fn datetime_precision(ty: &ChType) -> u8 {
    match ty {
        ChType::DateTime => 0,
        ChType::DateTime64(p) => *p,
        _ => 6,
    }
}

/// Convert days since the Unix epoch to a civil (year, month, day).
///
/// Howard Hinnant's `civil_from_days`.
pub fn days_to_ymd(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}

/// Format days since epoch as `YYYY-MM-DD`.
pub fn format_date(days: i64) -> String {
    let (y, m, d) = days_to_ymd(days);
    format!("{:04}-{:02}-{:02}", y, m, d)
}

/// Format microseconds since epoch as `YYYY-MM-DD hh:mm:ss[.fff]` with
/// `precision` fractional digits.
pub fn format_timestamp(micros: i64, precision: u8) -> String {
    let secs = micros.div_euclid(1_000_000);
    let frac = micros.rem_euclid(1_000_000);
    let days = secs.div_euclid(86_400);
    let sod = secs.rem_euclid(86_400);
    let mut out = format!(
        "{} {:02}:{:02}:{:02}",
        format_date(days),
        sod / 3600,
        (sod % 3600) / 60,
        sod % 60
    );
    if precision > 0 {
        let micros_text = format!("{:06}", frac);
        out.push('.');
        let p = usize::from(precision);
        if p <= 6 {
            out.push_str(&micros_text[..p]);
        } else {
            out.push_str(&micros_text);
            out.push_str(&"0".repeat(p - 6));
        }
    }
    out
}

/// Format 16 bytes as a lowercase hyphenated UUID.
pub fn format_uuid(bytes: &[u8; 16]) -> String {
    let mut out = String::with_capacity(36);
    for (i, b) in bytes.iter().enumerate() {
        if matches!(i, 4 | 6 | 8 | 10) {
            out.push('-');
        }
        let _ = write!(out, "{:02x}", b);
    }
    out
}

/// Trait for Rust types with a natural ClickHouse column type.
pub trait TypeInfo {
    /// The ClickHouse type for this Rust type.
    fn ch_type() -> ChType;
}

macro_rules! impl_type_info {
    ($($rust:ty => $ch:expr),* $(,)?) => {
        $(
            impl TypeInfo for $rust {
                fn ch_type() -> ChType {
                    $ch
                }
            }
        )*
    };
}

impl_type_info! {
    bool => ChType::Bool,
    i8 => ChType::Int8,
    i16 => ChType::Int16,
    i32 => ChType::Int32,
    i64 => ChType::Int64,
    u8 => ChType::UInt8,
    u16 => ChType::UInt16,
    u32 => ChType::UInt32,
    u64 => ChType::UInt64,
    f32 => ChType::Float32,
    f64 => ChType::Float64,
    String => ChType::String,
    &str => ChType::String,
    [u8; 16] => ChType::Uuid,
}

impl<T: TypeInfo> TypeInfo for Option<T> {
    fn ch_type() -> ChType {
        ChType::Nullable(Box::new(T::ch_type()))
    }
}

impl TypeInfo for Vec<String> {
    fn ch_type() -> ChType {
        ChType::Array(Box::new(ChType::String))
    }
}

impl TypeInfo for Vec<i64> {
    fn ch_type() -> ChType {
        ChType::Array(Box::new(ChType::Int64))
    }
}

impl TypeInfo for Vec<u64> {
    fn ch_type() -> ChType {
        ChType::Array(Box::new(ChType::UInt64))
    }
}

impl TypeInfo for Vec<f64> {
    fn ch_type() -> ChType {
        ChType::Array(Box::new(ChType::Float64))
    }
}
