//! SQL literal rendering.
//!
//! Everything chmodel inlines into generated SQL text passes through
//! [`render_literal`] or [`render_settings`].

use crate::settings::{SettingValue, Settings};
use crate::types::{ChType, NestedField};
use crate::value::Value;

/// Render a value as SQL literal text for a column of type `ty`.
///
/// - `NULL` for null values, whatever the declared type.
/// - For nested values, one bracketed array per field in field order,
///   joined with `", "`. Null elements are skipped entirely, so every
///   field array has one entry per non-null element.
/// - Everything else is delegated to [`ChType::literal`].
pub fn render_literal(value: &Value, ty: &ChType) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Nested(elements) => render_nested(elements, ty.base().nested_fields()),
        other => ty.literal(other),
    }
}

fn render_nested(elements: &[Option<Vec<Value>>], fields: &[NestedField]) -> String {
    let present: Vec<&Vec<Value>> = elements.iter().flatten().collect();
    let field_count = if fields.is_empty() {
        present.first().map_or(0, |e| e.len())
    } else {
        fields.len()
    };

    let arrays: Vec<String> = (0..field_count)
        .map(|i| {
            let items: Vec<String> = present
                .iter()
                .map(|element| {
                    let value = element.get(i).unwrap_or(&Value::Null);
                    match fields.get(i) {
                        Some(field) => render_literal(value, &field.ty),
                        None => render_literal(value, &ChType::for_value(value)),
                    }
                })
                .collect();
            format!("[{}]", items.join(", "))
        })
        .collect();
    arrays.join(", ")
}

/// Escape a string for use inside single quotes.
///
/// Backslash and single quote are backslash-escaped.
pub fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            c => out.push(c),
        }
    }
    out
}

/// Render a `SETTINGS k1 = v1, k2 = v2` clause, or an empty string.
///
/// Strings are quoted and escaped, booleans become `1`/`0`, everything
/// else uses its default text form. Order is the settings' insertion order.
pub fn render_settings(settings: &Settings) -> String {
    if settings.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = settings
        .iter()
        .map(|(key, value)| format!("{} = {}", key, render_setting_value(value)))
        .collect();
    format!("SETTINGS {}", parts.join(", "))
}

fn render_setting_value(value: &SettingValue) -> String {
    match value {
        SettingValue::Text(s) => format!("'{}'", escape_string(s)),
        SettingValue::Bool(b) => String::from(if *b { "1" } else { "0" }),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id_name_type() -> ChType {
        ChType::Nested(vec![
            NestedField::new("ID", ChType::UInt32),
            NestedField::new("Name", ChType::String),
        ])
    }

    fn element(id: u32, name: &str) -> Option<Vec<Value>> {
        Some(vec![Value::UInt32(id), Value::Text(name.to_string())])
    }

    #[test]
    fn test_null_is_bare_token() {
        assert_eq!(render_literal(&Value::Null, &ChType::String), "NULL");
        assert_eq!(render_literal(&Value::Null, &ChType::UInt64), "NULL");
        assert_eq!(render_literal(&Value::Null, &id_name_type()), "NULL");
    }

    #[test]
    fn test_nested_parallel_arrays() {
        let v = Value::Nested(vec![element(1, "a"), element(2, "b")]);
        assert_eq!(render_literal(&v, &id_name_type()), "[1, 2], ['a', 'b']");
    }

    #[test]
    fn test_nested_skips_null_elements() {
        let v = Value::Nested(vec![element(1, "a"), None, element(3, "c")]);
        assert_eq!(render_literal(&v, &id_name_type()), "[1, 3], ['a', 'c']");
    }

    #[test]
    fn test_nested_empty_list() {
        let v = Value::Nested(vec![]);
        assert_eq!(render_literal(&v, &id_name_type()), "[], []");
    }

    #[test]
    fn test_nested_null_field_value() {
        let v = Value::Nested(vec![Some(vec![Value::UInt32(1), Value::Null])]);
        assert_eq!(render_literal(&v, &id_name_type()), "[1], [NULL]");
    }

    #[test]
    fn test_escape_round_trip() {
        let original = r"O'Brien \ co";
        let escaped = escape_string(original);
        assert_eq!(escaped, r"O\'Brien \\ co");
        // Undo the escaping the way a SQL lexer would.
        let mut parsed = String::new();
        let mut chars = escaped.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                parsed.extend(chars.next());
            } else {
                parsed.push(c);
            }
        }
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_render_settings() {
        let s = Settings::new()
            .with("async_insert", true)
            .with("max_insert_threads", 4u32)
            .with("insert_deduplication_token", "it's");
        assert_eq!(
            render_settings(&s),
            "SETTINGS async_insert = 1, max_insert_threads = 4, insert_deduplication_token = 'it\\'s'"
        );
        assert_eq!(render_settings(&Settings::new()), "");
    }
}
