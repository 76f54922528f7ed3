//! Ephemeral ClickHouse tables.
//!
//! [`TempTableManager`] creates uniquely named tables shaped like a model.
//! Each [`TempTableHandle`] keeps its own connection, can be queried like a
//! regular table, filled with rows or from another query, and is dropped by
//! `dispose`. A [`TempTableScope`] drops all of its tables, newest first.
//!
//! ```ignore
//! let manager = TempTableManager::new(|| HttpConnection::connect(&config));
//! let mut scope = manager.scope();
//! let active = unwrap(scope.create_from_query::<User, _>(&cx, &active_users, None).await);
//! let rows = unwrap(active.fetch(&cx, &active.query()?.limit(10)).await);
//! scope.dispose(&cx).await;
//! ```

pub mod handle;
pub mod manager;
pub mod resolver;
pub mod scope;

pub use handle::{SOURCE_ALIAS, ScopedDisposable, TempTableHandle};
pub use manager::{DEFAULT_ENGINE, TempTableManager, create_table_sql, generate_table_name};
pub use resolver::{ParameterResolver, ResolvedQuery};
pub use scope::{ScopeDisposeReport, TempTableScope};
