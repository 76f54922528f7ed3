mod common;

use std::sync::{Arc, Mutex};

use asupersync::runtime::RuntimeBuilder;
use chmodel::prelude::*;
use chmodel::{SchemaError, SchemaErrorKind};
use common::{Event, MockConnection, MockState, Metric, event, unwrap_outcome};

fn manager(
    state: &Arc<Mutex<MockState>>,
) -> TempTableManager<impl Fn() -> chmodel::Result<MockConnection> + Send + Sync> {
    let state = Arc::clone(state);
    TempTableManager::new(move || Ok(MockConnection::new(Arc::clone(&state))))
}

const EVENT_COLUMNS: &str = "\"Id\", \"Name\", \"Score\", \"Tags.ID\", \"Tags.Name\"";

#[test]
fn create_issues_ddl_and_exposes_a_composable_query() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let state = MockState::shared();
    let manager = manager(&state);

    rt.block_on(async {
        let handle = unwrap_outcome(manager.create::<Event>(&cx, None).await);
        assert!(handle.name().starts_with("tmp_Event_"));
        assert_eq!(handle.quoted_name(), format!("\"{}\"", handle.name()));

        {
            let guard = state.lock().unwrap();
            assert_eq!(
                guard.executed,
                vec![format!(
                    "CREATE TABLE {} (\"Id\" UInt64, \"Name\" String, \"Score\" Nullable(Float64), \
                     \"Tags\" Nested(ID UInt32, Name String)) ENGINE = Memory",
                    handle.quoted_name()
                )]
            );
            assert_eq!(guard.open_now, 1);
        }

        let query = handle
            .query()
            .unwrap()
            .filter(Expr::col("Id").gt(Expr::lit(5u64)))
            .order_by(OrderBy::desc("Id"));
        assert_eq!(
            query.to_sql(),
            format!(
                "SELECT * FROM {} WHERE \"Id\" > {{p_0:UInt64}} ORDER BY \"Id\" DESC",
                handle.quoted_name()
            )
        );

        unwrap_outcome(handle.dispose(&cx).await);
        let guard = state.lock().unwrap();
        assert_eq!(
            guard.executed.last().unwrap(),
            &format!("DROP TABLE IF EXISTS {}", handle.quoted_name())
        );
        assert_eq!(guard.closes, 1);
        assert_eq!(guard.open_now, 0);
    });
}

#[test]
fn insert_and_insert_from_query_target_the_temp_table() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let state = MockState::shared();
    let manager = manager(&state);

    rt.block_on(async {
        let handle = unwrap_outcome(manager.create::<Event>(&cx, Some("staging_events")).await);

        assert_eq!(unwrap_outcome(handle.insert(&cx, &[]).await), 0);
        assert_eq!(unwrap_outcome(handle.insert(&cx, &[event(1)]).await), 1);

        let source = Select::<Event>::new()
            .filter(Expr::col("Id").ge(Expr::param("min_id", 10u64)))
            .filter(Expr::col("Name").ne("it's"));
        unwrap_outcome(handle.insert_from_query(&cx, &source).await);

        let guard = state.lock().unwrap();
        assert_eq!(guard.executed.len(), 3);
        assert_eq!(
            guard.executed[1],
            format!("INSERT INTO \"staging_events\" ({EVENT_COLUMNS}) VALUES (1, 'e1', NULL, [], [])")
        );
        assert_eq!(
            guard.executed[2],
            format!(
                "INSERT INTO \"staging_events\" ({EVENT_COLUMNS}) SELECT {EVENT_COLUMNS} FROM \
                 (SELECT * FROM \"Events\" WHERE \"Id\" >= 10 AND \"Name\" != 'it\\'s') AS \"__source\""
            )
        );
        drop(guard);

        unwrap_outcome(handle.dispose(&cx).await);
    });
}

#[test]
fn disposed_handle_rejects_every_operation() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let state = MockState::shared();
    let manager = manager(&state);

    rt.block_on(async {
        let handle = unwrap_outcome(manager.create::<Metric>(&cx, Some("m")).await);
        unwrap_outcome(handle.dispose(&cx).await);
        unwrap_outcome(handle.dispose(&cx).await);
        assert!(handle.is_disposed());

        assert!(handle.query().err().is_some_and(|e| e.is_disposed()));
        match handle.insert(&cx, &[Metric { id: 1 }]).await {
            Outcome::Err(e) => assert!(e.is_disposed()),
            other => panic!("expected disposed error, got {other:?}"),
        }
        match handle.insert_from_query(&cx, &SqlQuery::new("SELECT 1 AS \"Id\"")).await {
            Outcome::Err(e) => assert!(e.is_disposed()),
            other => panic!("expected disposed error, got {other:?}"),
        }
        match handle.count(&cx).await {
            Outcome::Err(e) => assert!(e.is_disposed()),
            other => panic!("expected disposed error, got {other:?}"),
        }
    });

    let guard = state.lock().unwrap();
    let drops = guard
        .executed
        .iter()
        .filter(|sql| sql.starts_with("DROP TABLE"))
        .count();
    assert_eq!(drops, 1);
    assert_eq!(guard.closes, 1);
    assert_eq!(guard.open_now, 0);
}

#[test]
fn scope_drops_tables_in_reverse_creation_order() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let state = MockState::shared();
    let manager = manager(&state);

    rt.block_on(async {
        let mut scope = manager.scope();
        unwrap_outcome(scope.create::<Metric>(&cx, Some("a")).await);
        unwrap_outcome(scope.create::<Event>(&cx, Some("b")).await);
        unwrap_outcome(scope.create::<Metric>(&cx, Some("c")).await);
        assert_eq!(scope.table_names(), vec!["a", "b", "c"]);

        let report = scope.dispose(&cx).await;
        assert!(report.is_clean());
        assert_eq!(report.dropped, vec!["c", "b", "a"]);
        assert!(scope.is_empty());
    });

    let guard = state.lock().unwrap();
    let drops: Vec<&str> = guard
        .executed
        .iter()
        .filter(|sql| sql.starts_with("DROP TABLE"))
        .map(String::as_str)
        .collect();
    assert_eq!(
        drops,
        vec![
            "DROP TABLE IF EXISTS \"c\"",
            "DROP TABLE IF EXISTS \"b\"",
            "DROP TABLE IF EXISTS \"a\"",
        ]
    );
    assert_eq!(guard.open_now, 0);
}

#[test]
fn scope_teardown_continues_past_failures() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let state = MockState::shared();
    state.lock().unwrap().fail_on = Some("DROP TABLE IF EXISTS \"b\"".to_string());
    let manager = manager(&state);

    rt.block_on(async {
        let mut scope = manager.scope();
        for name in ["a", "b", "c"] {
            unwrap_outcome(scope.create::<Metric>(&cx, Some(name)).await);
        }

        let report = scope.dispose(&cx).await;
        assert_eq!(report.dropped, vec!["c", "a"]);
        assert_eq!(report.failures.len(), 1);
        let (table, error) = &report.failures[0];
        assert_eq!(table, "b");
        assert!(matches!(
            error,
            Error::Schema(SchemaError {
                kind: SchemaErrorKind::Drop,
                ..
            })
        ));
    });

    let guard = state.lock().unwrap();
    assert_eq!(guard.closes, 3);
    assert_eq!(guard.open_now, 0);
}

#[test]
fn scope_skips_tables_already_disposed_by_their_handle() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let state = MockState::shared();
    let manager = manager(&state);

    rt.block_on(async {
        let mut scope = manager.scope();
        let outside = unwrap_outcome(manager.create::<Metric>(&cx, Some("outside")).await);
        scope.track(&outside);
        let inner = unwrap_outcome(scope.create::<Metric>(&cx, Some("inner")).await);
        unwrap_outcome(inner.dispose(&cx).await);

        let report = scope.dispose(&cx).await;
        assert_eq!(report.dropped, vec!["outside"]);
        assert!(outside.is_disposed());
    });

    assert_eq!(state.lock().unwrap().open_now, 0);
}

#[test]
fn failed_populate_drops_the_new_table() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let state = MockState::shared();
    let manager = manager(&state);

    let source =
        SqlQuery::new("SELECT * FROM \"Metrics\" WHERE \"Id\" = {missing:UInt64}").capture("other", 1u64);

    let outcome = rt.block_on(async {
        manager
            .create_from_query::<Metric, _>(&cx, &source, Some("copy"))
            .await
    });

    match outcome {
        Outcome::Err(Error::Schema(SchemaError {
            kind: SchemaErrorKind::Populate,
            table,
            source: Some(inner),
            ..
        })) => {
            assert_eq!(table, "copy");
            match *inner {
                Error::Parameter(p) => {
                    assert_eq!(p.placeholder, "missing");
                    assert_eq!(p.available, vec!["__other", "__other_0", "other", "other_0"]);
                }
                other => panic!("expected parameter error, got {other:?}"),
            }
        }
        other => panic!("expected populate error, got {other:?}"),
    }

    let guard = state.lock().unwrap();
    assert_eq!(guard.executed.len(), 2);
    assert!(guard.executed[0].starts_with("CREATE TABLE \"copy\""));
    assert_eq!(guard.executed[1], "DROP TABLE IF EXISTS \"copy\"");
    assert_eq!(guard.open_now, 0);
}

#[test]
fn server_side_populate_failure_also_drops_the_table() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let state = MockState::shared();
    state.lock().unwrap().fail_on = Some("INSERT INTO".to_string());
    let manager = manager(&state);

    let source = SqlQuery::new("SELECT \"Id\" FROM \"Metrics\" WHERE \"Id\" > {floor:UInt64}").bind("floor", 3u64);

    let outcome = rt.block_on(async {
        manager
            .create_from_query::<Metric, _>(&cx, &source, Some("copy"))
            .await
    });
    assert!(matches!(
        outcome,
        Outcome::Err(Error::Schema(SchemaError {
            kind: SchemaErrorKind::Populate,
            ..
        }))
    ));

    let guard = state.lock().unwrap();
    assert_eq!(
        guard.executed[1],
        "INSERT INTO \"copy\" (\"Id\") SELECT \"Id\" FROM (SELECT \"Id\" FROM \"Metrics\" WHERE \"Id\" > 3) AS \"__source\""
    );
    assert_eq!(guard.executed[2], "DROP TABLE IF EXISTS \"copy\"");
    assert_eq!(guard.open_now, 0);
}

#[test]
fn failed_create_closes_its_connection() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let state = MockState::shared();
    state.lock().unwrap().fail_on = Some("CREATE TABLE".to_string());
    let manager = manager(&state);

    let outcome = rt.block_on(async { manager.create::<Metric>(&cx, None).await });
    assert!(matches!(
        outcome,
        Outcome::Err(Error::Schema(SchemaError {
            kind: SchemaErrorKind::Create,
            ..
        }))
    ));

    let guard = state.lock().unwrap();
    assert_eq!(guard.opens, 1);
    assert_eq!(guard.closes, 1);
}

#[test]
fn fetch_and_count_run_on_the_handle_connection() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let state = MockState::shared();
    state.lock().unwrap().rows = vec![Row::new(vec!["count()".to_string()], vec![Value::UInt64(3)])];
    let manager = manager(&state);

    rt.block_on(async {
        let handle = unwrap_outcome(manager.create::<Metric>(&cx, Some("m")).await);
        assert_eq!(unwrap_outcome(handle.count(&cx).await), 3);

        let rows = unwrap_outcome(handle.fetch(&cx, &handle.query().unwrap().limit(2)).await);
        assert_eq!(rows.len(), 1);

        unwrap_outcome(handle.dispose(&cx).await);
    });

    let guard = state.lock().unwrap();
    assert_eq!(
        guard.queried,
        vec![
            "SELECT count() FROM \"m\"".to_string(),
            "SELECT * FROM \"m\" LIMIT 2".to_string(),
        ]
    );
    assert_eq!(guard.opens, 1);
}
