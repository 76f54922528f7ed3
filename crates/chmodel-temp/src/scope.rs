//! Scoped teardown of several ephemeral tables.

use std::sync::Arc;

use asupersync::{Cx, Outcome};
use chmodel_core::{Connection, ConnectionFactory, Error, Model};
use chmodel_query::SourceQuery;

use crate::handle::{ScopedDisposable, TempTableHandle};
use crate::manager::TempTableManager;

/// What a scope teardown did.
#[derive(Debug, Default)]
pub struct ScopeDisposeReport {
    /// Tables dropped, in drop order
    pub dropped: Vec<String>,
    /// Tables whose teardown failed
    pub failures: Vec<(String, Error)>,
}

impl ScopeDisposeReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Tracks tables and drops them in reverse creation order.
///
/// Teardown keeps going past failures; every failure ends up in the
/// [`ScopeDisposeReport`]. Handles may be of any model and connection type.
pub struct TempTableScope<'m, F> {
    manager: &'m TempTableManager<F>,
    tracked: Vec<Arc<dyn ScopedDisposable>>,
}

impl<'m, F> TempTableScope<'m, F>
where
    F: ConnectionFactory,
    F::Conn: 'static,
{
    pub(crate) fn new(manager: &'m TempTableManager<F>) -> Self {
        Self {
            manager,
            tracked: Vec::new(),
        }
    }

    /// Create a table through the manager and track it.
    pub async fn create<T: Model>(&mut self, cx: &Cx, name: Option<&str>) -> Outcome<TempTableHandle<T, F::Conn>, Error> {
        let outcome = self.manager.create::<T>(cx, name).await;
        if let Outcome::Ok(handle) = &outcome {
            self.track(handle);
        }
        outcome
    }

    /// Create and populate a table through the manager and track it.
    pub async fn create_from_query<T, Q>(
        &mut self,
        cx: &Cx,
        source: &Q,
        name: Option<&str>,
    ) -> Outcome<TempTableHandle<T, F::Conn>, Error>
    where
        T: Model,
        Q: SourceQuery + ?Sized,
    {
        let outcome = self.manager.create_from_query::<T, Q>(cx, source, name).await;
        if let Outcome::Ok(handle) = &outcome {
            self.track(handle);
        }
        outcome
    }

    /// Track a handle created elsewhere.
    pub fn track<T, C: Connection + 'static>(&mut self, handle: &TempTableHandle<T, C>) {
        self.tracked.push(handle.disposable());
    }

    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    /// Tracked table names in creation order.
    pub fn table_names(&self) -> Vec<&str> {
        self.tracked.iter().map(|t| t.table_name()).collect()
    }

    /// Dispose every tracked table, newest first.
    ///
    /// Tables already disposed through their handle are skipped. A table
    /// whose teardown never reached the DROP (for example on cancellation)
    /// stays tracked, so a later `dispose` retries it.
    #[tracing::instrument(level = "debug", skip(self, cx), fields(tables = self.tracked.len()))]
    pub async fn dispose(&mut self, cx: &Cx) -> ScopeDisposeReport {
        let mut report = ScopeDisposeReport::default();
        let mut retained = Vec::new();
        while let Some(table) = self.tracked.pop() {
            if table.is_disposed() {
                continue;
            }
            let name = table.table_name().to_string();
            let failure = match table.dispose(cx).await {
                Outcome::Ok(()) => None,
                Outcome::Err(e) => Some(e),
                Outcome::Cancelled(_) => Some(Error::Cancelled),
                Outcome::Panicked(_) => Some(Error::Custom(format!("dispose of {} panicked", name))),
            };
            match failure {
                None => report.dropped.push(name),
                Some(e) => {
                    tracing::warn!(table = %name, error = %e, "Temp table teardown failed, continuing");
                    report.failures.push((name, e));
                    if !table.is_disposed() {
                        retained.push(table);
                    }
                }
            }
        }
        retained.reverse();
        self.tracked = retained;
        tracing::debug!(
            dropped = report.dropped.len(),
            failed = report.failures.len(),
            "Temp table scope disposed"
        );
        report
    }
}

impl<F> Drop for TempTableScope<'_, F> {
    fn drop(&mut self) {
        let pending = self.tracked.iter().filter(|t| !t.is_disposed()).count();
        if pending > 0 {
            tracing::warn!(pending, "Temp table scope dropped without dispose");
        }
    }
}
