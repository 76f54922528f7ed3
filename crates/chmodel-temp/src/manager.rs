//! Creation of ephemeral tables.

use asupersync::{Cx, Outcome};
use chmodel_bulk::{EntityPropertyInfo, PropertyCache};
use chmodel_core::error::{SchemaError, SchemaErrorKind};
use chmodel_core::{Connection, ConnectionFactory, Error, Model, quote_ident, short_type_name};
use chmodel_query::SourceQuery;

use crate::handle::{TableLease, TempTableHandle};
use crate::scope::TempTableScope;

/// Engine used for ephemeral tables unless configured otherwise.
pub const DEFAULT_ENGINE: &str = "Memory";

/// A fresh `tmp_<Type>_<16 hex digits>` name.
pub fn generate_table_name<T>() -> String {
    format!("tmp_{}_{:016x}", short_type_name::<T>(), rand::random::<u64>())
}

/// `CREATE TABLE` statement mirroring `info`'s columns.
///
/// A nested property becomes one `Nested(...)` column.
pub fn create_table_sql<T>(quoted_name: &str, info: &EntityPropertyInfo<T>, engine: &str) -> String {
    let columns: Vec<String> = info
        .properties()
        .iter()
        .map(|p| format!("{} {}", p.quoted_column(), p.ty().store_name()))
        .collect();
    format!(
        "CREATE TABLE {} ({}) ENGINE = {}",
        quoted_name,
        columns.join(", "),
        engine
    )
}

/// Creates ephemeral tables, each on its own connection from `F`.
#[derive(Debug)]
pub struct TempTableManager<F> {
    factory: F,
    engine: String,
}

impl<F> TempTableManager<F>
where
    F: ConnectionFactory,
    F::Conn: 'static,
{
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            engine: DEFAULT_ENGINE.to_string(),
        }
    }

    /// Use another table engine, e.g. `Log`.
    pub fn engine(mut self, engine: impl Into<String>) -> Self {
        self.engine = engine.into();
        self
    }

    pub fn engine_name(&self) -> &str {
        &self.engine
    }

    /// A scope that drops every table it creates, newest first.
    pub fn scope(&self) -> TempTableScope<'_, F> {
        TempTableScope::new(self)
    }

    /// Create an empty table shaped like `T`.
    ///
    /// Without `name` a unique one is generated. The returned handle owns
    /// an open connection; if the DDL fails that connection is closed
    /// before the error is returned.
    #[tracing::instrument(level = "debug", skip(self, cx), fields(model = T::TABLE_NAME))]
    pub async fn create<T: Model>(&self, cx: &Cx, name: Option<&str>) -> Outcome<TempTableHandle<T, F::Conn>, Error> {
        let name = name.map_or_else(generate_table_name::<T>, str::to_string);
        let quoted_name = quote_ident(&name);

        let info = PropertyCache::global().get::<T>();
        if info.is_empty() {
            return Outcome::Err(Error::Schema(SchemaError {
                kind: SchemaErrorKind::NoColumns,
                table: name,
                message: format!("model {} maps no columns", T::TABLE_NAME),
                source: None,
            }));
        }
        let info = info.with_table(&name);

        let mut conn = match self.factory.create() {
            Ok(conn) => conn,
            Err(e) => return Outcome::Err(e),
        };
        match conn.open(cx).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }

        let ddl = create_table_sql(&quoted_name, &info, &self.engine);
        tracing::debug!(table = %name, engine = %self.engine, "Creating temp table");
        tracing::trace!(sql = %ddl, "CREATE TABLE");

        let command = conn.create_command(&ddl);
        let created = conn.execute(cx, &command).await;
        if !matches!(created, Outcome::Ok(_)) {
            if let Outcome::Err(close_err) = conn.close(cx).await {
                tracing::warn!(table = %name, error = %close_err, "Closing connection after failed CREATE TABLE failed");
            }
        }
        match created {
            Outcome::Ok(_) => {}
            Outcome::Err(e) => {
                return Outcome::Err(Error::Schema(SchemaError {
                    kind: SchemaErrorKind::Create,
                    table: name,
                    message: "CREATE TABLE failed".to_string(),
                    source: Some(Box::new(e)),
                }));
            }
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }

        Outcome::Ok(TempTableHandle::new(
            TableLease::new(name, quoted_name, conn),
            info,
        ))
    }

    /// Create a table and fill it from `source` on the server.
    ///
    /// If filling fails the table is dropped again before the error is
    /// returned, so a failed call leaves nothing behind.
    #[tracing::instrument(level = "debug", skip(self, cx, source), fields(model = T::TABLE_NAME))]
    pub async fn create_from_query<T, Q>(
        &self,
        cx: &Cx,
        source: &Q,
        name: Option<&str>,
    ) -> Outcome<TempTableHandle<T, F::Conn>, Error>
    where
        T: Model,
        Q: SourceQuery + ?Sized,
    {
        let handle = match self.create::<T>(cx, name).await {
            Outcome::Ok(handle) => handle,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        let populated = handle.insert_from_query(cx, source).await;
        if matches!(populated, Outcome::Ok(_)) {
            return Outcome::Ok(handle);
        }

        if let Outcome::Err(e) = handle.dispose(cx).await {
            tracing::warn!(table = %handle.name(), error = %e, "Dropping temp table after failed populate failed");
        }
        match populated {
            Outcome::Ok(_) => Outcome::Ok(handle),
            Outcome::Err(e) => Outcome::Err(Error::Schema(SchemaError {
                kind: SchemaErrorKind::Populate,
                table: handle.name().to_string(),
                message: "populating temp table from query failed".to_string(),
                source: Some(Box::new(e)),
            })),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chmodel_core::{NestedMapping, PropertyMapping};

    struct Tag {
        id: u32,
    }

    struct Event {
        id: u64,
        name: Option<String>,
        tags: Vec<Tag>,
    }

    impl Model for Event {
        const TABLE_NAME: &'static str = "Events";

        fn properties() -> Vec<PropertyMapping<Self>> {
            vec![
                PropertyMapping::new("Id", |e: &Event| e.id),
                PropertyMapping::new("Name", |e: &Event| e.name.clone()),
                PropertyMapping::nested(
                    "Tags",
                    NestedMapping::new(|e: &Event| e.tags.as_slice()).field("ID", |t: &Tag| t.id),
                ),
            ]
        }
    }

    #[test]
    fn test_generated_name_shape() {
        let name = generate_table_name::<Event>();
        let suffix = name.strip_prefix("tmp_Event_").unwrap();
        assert_eq!(suffix.len(), 16);
        assert!(suffix.bytes().all(|b| b.is_ascii_hexdigit()));
        assert_ne!(name, generate_table_name::<Event>());
    }

    #[test]
    fn test_create_table_sql() {
        let info = EntityPropertyInfo::<Event>::build().with_table("tmp_x");
        assert_eq!(
            create_table_sql("\"tmp_x\"", &info, DEFAULT_ENGINE),
            "CREATE TABLE \"tmp_x\" (\"Id\" UInt64, \"Name\" Nullable(String), \"Tags\" Nested(ID UInt32)) ENGINE = Memory"
        );
        let sample = Event {
            id: 1,
            name: None,
            tags: vec![Tag { id: 5 }],
        };
        assert_eq!(info.properties()[2].render(&sample), "[5]");
    }
}
