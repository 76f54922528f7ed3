//! JSONEachRow batch builder.

use chmodel_core::types::{format_date, format_timestamp, format_uuid};
use chmodel_core::{ChType, Result, Settings, Value};
use serde_json::Value as Json;

use crate::builder::{BatchBuilder, insert_head};
use crate::cache::EntityPropertyInfo;

/// Builds `INSERT ... FORMAT JSONEachRow` followed by one JSON object per
/// row, newline separated.
///
/// Keys are the unquoted stored column names in column-list order, so a
/// nested property contributes one `Name.Field` array per field. Keys are
/// written by hand so their order never depends on map ordering.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLinesBuilder;

impl BatchBuilder for JsonLinesBuilder {
    fn build<T>(
        &self,
        rows: &[T],
        info: &EntityPropertyInfo<T>,
        settings: &Settings,
    ) -> Result<String> {
        if rows.is_empty() {
            return Ok(String::new());
        }

        let mut sql = insert_head(info, settings)?;
        sql.push_str(" FORMAT JSONEachRow");
        for row in rows {
            sql.push('\n');
            write_record(&mut sql, row, info)?;
        }
        Ok(sql)
    }
}

fn write_record<T>(out: &mut String, row: &T, info: &EntityPropertyInfo<T>) -> Result<()> {
    out.push('{');
    let mut first = true;
    let mut push_field = |out: &mut String, key: &str, value: &Json| -> Result<()> {
        if !first {
            out.push(',');
        }
        first = false;
        out.push_str(&serde_json::to_string(key)?);
        out.push(':');
        out.push_str(&serde_json::to_string(value)?);
        Ok(())
    };

    for property in info.properties() {
        let value = property.value(row);
        match (property.ty().base(), &value) {
            (ChType::Nested(fields), Value::Nested(elements)) => {
                for (i, field) in fields.iter().enumerate() {
                    let items: Vec<Json> = elements
                        .iter()
                        .flatten()
                        .map(|e| to_json(e.get(i).unwrap_or(&Value::Null), &field.ty))
                        .collect();
                    let key = format!("{}.{}", property.column(), field.name);
                    push_field(out, &key, &Json::Array(items))?;
                }
            }
            (ChType::Nested(fields), _) => {
                for field in fields {
                    let key = format!("{}.{}", property.column(), field.name);
                    push_field(out, &key, &Json::Array(Vec::new()))?;
                }
            }
            _ => push_field(out, property.column(), &to_json(&value, property.ty()))?,
        }
    }
    out.push('}');
    Ok(())
}

/// Structured JSON representation of a value for a column of type `ty`.
pub fn to_json(value: &Value, ty: &ChType) -> Json {
    let ty = ty.base();
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => {
            if matches!(ty, ChType::Bool) {
                Json::Bool(*b)
            } else {
                Json::from(u8::from(*b))
            }
        }
        Value::Int8(v) => Json::from(*v),
        Value::Int16(v) => Json::from(*v),
        Value::Int32(v) => Json::from(*v),
        Value::Int64(v) => Json::from(*v),
        Value::UInt8(v) => Json::from(*v),
        Value::UInt16(v) => Json::from(*v),
        Value::UInt32(v) => Json::from(*v),
        Value::UInt64(v) => Json::from(*v),
        Value::Float32(v) => float_json(f64::from(*v)),
        Value::Float64(v) => float_json(*v),
        Value::Decimal(s) => Json::String(s.clone()),
        Value::Text(s) => Json::String(s.clone()),
        Value::Bytes(b) => Json::String(String::from_utf8_lossy(b).into_owned()),
        Value::Date(days) => match ty {
            ChType::DateTime | ChType::DateTime64(_) => {
                let micros = i64::from(*days) * 86_400 * 1_000_000;
                Json::String(format_timestamp(micros, precision_of(ty)))
            }
            _ => Json::String(format_date(i64::from(*days))),
        },
        Value::Timestamp(micros) => match ty {
            ChType::Date | ChType::Date32 => {
                Json::String(format_date(micros.div_euclid(86_400 * 1_000_000)))
            }
            _ => Json::String(format_timestamp(*micros, precision_of(ty))),
        },
        Value::Uuid(bytes) => Json::String(format_uuid(bytes)),
        Value::Json(j) => Json::String(j.to_string()),
        Value::Array(items) => {
            let inner = match ty {
                ChType::Array(inner) => inner.as_ref().clone(),
                _ => ChType::String,
            };
            Json::Array(items.iter().map(|v| to_json(v, &inner)).collect())
        }
        Value::Nested(elements) => Json::Array(
            elements
                .iter()
                .flatten()
                .map(|e| Json::Array(e.iter().map(|v| to_json(v, &ChType::for_value(v))).collect()))
                .collect(),
        ),
    }
}

fn float_json(v: f64) -> Json {
    serde_json::Number::from_f64(v).map_or_else(
        || {
            let text = if v.is_nan() {
                "nan"
            } else if v > 0.0 {
                "inf"
            } else {
                "-inf"
            };
            Json::String(text.to_string())
        },
        Json::Number,
    )
}

fn precision_of(ty: &ChType) -> u8 {
    match ty {
        ChType::DateTime => 0,
        ChType::DateTime64(p) => *p,
        _ => 6,
    }
}
