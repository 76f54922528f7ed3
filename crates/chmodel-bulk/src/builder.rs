//! Batch SQL builders.
//!
//! A builder turns one batch of rows into a single INSERT command. Both
//! builders return an empty string for an empty batch; callers never send
//! empty command text.

use chmodel_core::{Result, Settings, render_settings};
use serde::{Deserialize, Serialize};

use crate::cache::EntityPropertyInfo;
use crate::json_lines::JsonLinesBuilder;

/// Wire format of a bulk insert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InsertFormat {
    /// `INSERT ... VALUES (..), (..)` with inline literals
    #[default]
    Values,
    /// `INSERT ... FORMAT JSONEachRow` with one JSON object per line
    JsonLines,
}

impl InsertFormat {
    /// Build a batch with the builder for this format.
    pub fn build<T>(
        self,
        rows: &[T],
        info: &EntityPropertyInfo<T>,
        settings: &Settings,
    ) -> Result<String> {
        match self {
            InsertFormat::Values => ValuesBuilder.build(rows, info, settings),
            InsertFormat::JsonLines => JsonLinesBuilder.build(rows, info, settings),
        }
    }
}

/// Turns a batch of rows into INSERT command text.
pub trait BatchBuilder {
    fn build<T>(
        &self,
        rows: &[T],
        info: &EntityPropertyInfo<T>,
        settings: &Settings,
    ) -> Result<String>;
}

/// `INSERT INTO <table> (<columns>)` followed by the settings clause, if any.
///
/// ClickHouse requires SETTINGS before the data part of an INSERT. Setting
/// names that cannot be inlined are rejected.
pub(crate) fn insert_head<T>(info: &EntityPropertyInfo<T>, settings: &Settings) -> Result<String> {
    settings.validate_keys()?;
    let mut sql = format!(
        "INSERT INTO {} ({})",
        info.quoted_table_name(),
        info.column_list()
    );
    let clause = render_settings(settings);
    if !clause.is_empty() {
        sql.push(' ');
        sql.push_str(&clause);
    }
    Ok(sql)
}

/// Builds `INSERT ... VALUES` with one parenthesized literal tuple per row.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValuesBuilder;

impl BatchBuilder for ValuesBuilder {
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
        sql.push_str(" VALUES ");
        for (i, row) in rows.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push('(');
            for (j, property) in info.properties().iter().enumerate() {
                if j > 0 {
                    sql.push_str(", ");
                }
                sql.push_str(&property.render(row));
            }
            sql.push(')');
        }
        Ok(sql)
    }
}
