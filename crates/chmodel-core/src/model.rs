//! Model metadata.
//!
//! A [`Model`] describes how a Rust struct maps to a ClickHouse table: the
//! table name and an ordered list of [`PropertyMapping`]s, each carrying a
//! column name, a [`ChType`] and a value accessor built once.

use std::fmt;
use std::sync::Arc;

use crate::identifiers::quote_ident;
use crate::literal::render_literal;
use crate::types::{ChType, NestedField, TypeInfo};
use crate::value::Value;

/// A struct mapped to a ClickHouse table.
///
/// ```ignore
/// impl Model for Event {
///     const TABLE_NAME: &'static str = "Events";
///
///     fn properties() -> Vec<PropertyMapping<Self>> {
///         vec![
///             PropertyMapping::new("Id", |e: &Event| e.id),
///             PropertyMapping::new("Name", |e: &Event| e.name.clone()),
///         ]
///     }
/// }
/// ```
pub trait Model: Sized + Send + Sync + 'static {
    /// The name of the database table.
    const TABLE_NAME: &'static str;

    /// Persisted properties in column order.
    fn properties() -> Vec<PropertyMapping<Self>>;
}

type Accessor<T> = Arc<dyn Fn(&T) -> Value + Send + Sync>;

/// One persisted property of a model.
pub struct PropertyMapping<T> {
    column: String,
    quoted_column: String,
    ty: ChType,
    accessor: Accessor<T>,
}

impl<T> Clone for PropertyMapping<T> {
    fn clone(&self) -> Self {
        Self {
            column: self.column.clone(),
            quoted_column: self.quoted_column.clone(),
            ty: self.ty.clone(),
            accessor: Arc::clone(&self.accessor),
        }
    }
}

impl<T> fmt::Debug for PropertyMapping<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyMapping")
            .field("column", &self.column)
            .field("ty", &self.ty)
            .finish_non_exhaustive()
    }
}

impl<T: 'static> PropertyMapping<T> {
    /// Map a column whose type follows from the accessor's return type.
    pub fn new<V, F>(column: impl Into<String>, accessor: F) -> Self
    where
        V: TypeInfo + Into<Value>,
        F: Fn(&T) -> V + Send + Sync + 'static,
    {
        Self::with_type(column, V::ch_type(), move |t: &T| accessor(t).into())
    }

    /// Map a column with an explicit ClickHouse type.
    pub fn with_type<F>(column: impl Into<String>, ty: ChType, accessor: F) -> Self
    where
        F: Fn(&T) -> Value + Send + Sync + 'static,
    {
        let column = column.into();
        Self {
            quoted_column: quote_ident(&column),
            column,
            ty,
            accessor: Arc::new(accessor),
        }
    }

    /// Map a repeated group of records stored as parallel arrays.
    pub fn nested<E: 'static>(column: impl Into<String>, mapping: NestedMapping<T, E>) -> Self {
        let NestedMapping { elements, fields } = mapping;
        let ty = ChType::Nested(
            fields
                .iter()
                .map(|f| NestedField::new(f.name.clone(), f.ty.clone()))
                .collect(),
        );
        let getters: Vec<Arc<dyn Fn(&E) -> Value + Send + Sync>> =
            fields.into_iter().map(|f| f.getter).collect();
        Self::with_type(column, ty, move |t: &T| {
            Value::Nested(
                elements(t)
                    .into_iter()
                    .map(|element| element.map(|e| getters.iter().map(|get| get(e)).collect()))
                    .collect(),
            )
        })
    }
}

impl<T> PropertyMapping<T> {
    /// Unquoted column name.
    pub fn column(&self) -> &str {
        &self.column
    }

    /// Identifier-quoted column name.
    pub fn quoted_column(&self) -> &str {
        &self.quoted_column
    }

    pub fn ty(&self) -> &ChType {
        &self.ty
    }

    pub fn is_nested(&self) -> bool {
        self.ty.is_nested()
    }

    /// Extract this property's value from an instance.
    pub fn value(&self, instance: &T) -> Value {
        (self.accessor)(instance)
    }

    /// Render this property of `instance` as literal text.
    ///
    /// A nested property renders one bracketed array per field.
    pub fn render(&self, instance: &T) -> String {
        render_literal(&self.value(instance), &self.ty)
    }

    /// Names of the stored columns this property writes.
    ///
    /// One name for a scalar property; `Column.Field` per field for a
    /// nested one.
    pub fn store_columns(&self) -> Vec<String> {
        match &self.ty {
            ChType::Nested(fields) => fields
                .iter()
                .map(|f| format!("{}.{}", self.column, f.name))
                .collect(),
            _ => vec![self.column.clone()],
        }
    }

    /// Number of literal slots this property occupies in a VALUES tuple.
    pub fn slot_count(&self) -> usize {
        match &self.ty {
            ChType::Nested(fields) => fields.len(),
            _ => 1,
        }
    }
}

type ElementsFn<T, E> = Arc<dyn for<'a> Fn(&'a T) -> Vec<Option<&'a E>> + Send + Sync>;

struct NestedFieldMapping<E> {
    name: String,
    ty: ChType,
    getter: Arc<dyn Fn(&E) -> Value + Send + Sync>,
}

/// Builder for a nested (repeated-group) property.
///
/// ```ignore
/// PropertyMapping::nested(
///     "Tags",
///     NestedMapping::new(|e: &Event| e.tags.as_slice())
///         .field("ID", |t: &Tag| t.id)
///         .field("Name", |t: &Tag| t.name.clone()),
/// )
/// ```
pub struct NestedMapping<T, E> {
    elements: ElementsFn<T, E>,
    fields: Vec<NestedFieldMapping<E>>,
}

fn erase_elements<T, E, F>(f: F) -> ElementsFn<T, E>
where
    F: for<'a> Fn(&'a T) -> Vec<Option<&'a E>> + Send + Sync + 'static,
{
    Arc::new(f)
}

impl<T: 'static, E: 'static> NestedMapping<T, E> {
    /// Elements without nulls.
    pub fn new<F>(elements: F) -> Self
    where
        F: Fn(&T) -> &[E] + Send + Sync + 'static,
    {
        Self {
            elements: erase_elements(move |t: &T| elements(t).iter().map(Some).collect()),
            fields: Vec::new(),
        }
    }

    /// Elements that may be null.
    ///
    /// Null elements are skipped when rendering, so field arrays only
    /// hold entries for present elements.
    pub fn nullable<F>(elements: F) -> Self
    where
        F: Fn(&T) -> &[Option<E>] + Send + Sync + 'static,
    {
        Self {
            elements: erase_elements(move |t: &T| {
                elements(t).iter().map(Option::as_ref).collect()
            }),
            fields: Vec::new(),
        }
    }

    /// Add a field whose type follows from the getter's return type.
    pub fn field<V, F>(self, name: impl Into<String>, getter: F) -> Self
    where
        V: TypeInfo + Into<Value>,
        F: Fn(&E) -> V + Send + Sync + 'static,
    {
        self.field_with_type(name, V::ch_type(), move |e: &E| getter(e).into())
    }

    /// Add a field with an explicit ClickHouse type.
    pub fn field_with_type<F>(mut self, name: impl Into<String>, ty: ChType, getter: F) -> Self
    where
        F: Fn(&E) -> Value + Send + Sync + 'static,
    {
        self.fields.push(NestedFieldMapping {
            name: name.into(),
            ty,
            getter: Arc::new(getter),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tag {
        id: u32,
        name: String,
    }

    struct Event {
        id: u64,
        label: Option<String>,
        tags: Vec<Option<Tag>>,
    }

    fn tags_mapping() -> PropertyMapping<Event> {
        PropertyMapping::nested(
            "Tags",
            NestedMapping::nullable(|e: &Event| e.tags.as_slice())
                .field("ID", |t: &Tag| t.id)
                .field("Name", |t: &Tag| t.name.clone()),
        )
    }

    fn sample() -> Event {
        Event {
            id: 42,
            label: None,
            tags: vec![
                Some(Tag {
                    id: 1,
                    name: "a".into(),
                }),
                None,
                Some(Tag {
                    id: 2,
                    name: "b".into(),
                }),
            ],
        }
    }

    #[test]
    fn test_scalar_mapping_infers_type() {
        let id = PropertyMapping::new("Id", |e: &Event| e.id);
        assert_eq!(id.ty(), &ChType::UInt64);
        assert_eq!(id.quoted_column(), "\"Id\"");
        assert_eq!(id.value(&sample()), Value::UInt64(42));
        assert_eq!(id.store_columns(), vec!["Id".to_string()]);
        assert_eq!(id.slot_count(), 1);
    }

    #[test]
    fn test_nullable_scalar_renders_null() {
        let label = PropertyMapping::new("Label", |e: &Event| e.label.clone());
        assert_eq!(label.ty().store_name(), "Nullable(String)");
        assert_eq!(label.render(&sample()), "NULL");
    }

    #[test]
    fn test_nested_mapping() {
        let tags = tags_mapping();
        assert!(tags.is_nested());
        assert_eq!(tags.ty().store_name(), "Nested(ID UInt32, Name String)");
        assert_eq!(
            tags.store_columns(),
            vec!["Tags.ID".to_string(), "Tags.Name".to_string()]
        );
        assert_eq!(tags.slot_count(), 2);
        assert_eq!(tags.render(&sample()), "[1, 2], ['a', 'b']");
    }

    #[test]
    fn test_nested_value_keeps_null_elements() {
        let value = tags_mapping().value(&sample());
        match value {
            Value::Nested(elements) => {
                assert_eq!(elements.len(), 3);
                assert!(elements[1].is_none());
            }
            other => panic!("expected nested value, got {other:?}"),
        }
    }
}
