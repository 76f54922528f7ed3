//! Recording connection shared by the integration tests.

#![allow(dead_code, clippy::manual_async_fn)]

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use chmodel::prelude::*;
use chmodel::{Command, ConnectionError, ConnectionErrorKind, QueryError, QueryErrorKind};

pub fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

#[derive(Debug, Default)]
pub struct MockState {
    /// Every executed statement, in execution order
    pub executed: Vec<String>,
    /// Every query text, in order
    pub queried: Vec<String>,
    pub opens: usize,
    pub closes: usize,
    pub open_now: usize,
    pub peak_open: usize,
    /// Statements containing this text fail
    pub fail_on: Option<String>,
    /// Rows returned by every query
    pub rows: Vec<Row>,
    /// Suspend once inside execute so concurrent batches interleave
    pub yield_on_execute: bool,
}

impl MockState {
    pub fn shared() -> Arc<Mutex<MockState>> {
        Arc::new(Mutex::new(MockState::default()))
    }
}

struct YieldOnce(bool);

impl Future for YieldOnce {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, task: &mut Context<'_>) -> Poll<()> {
        if self.0 {
            Poll::Ready(())
        } else {
            self.0 = true;
            task.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

fn server_error(sql: &str) -> Error {
    Error::Query(QueryError {
        kind: QueryErrorKind::Database,
        sql: Some(sql.to_string()),
        code: Some(60),
        message: "scripted failure".to_string(),
        source: None,
    })
}

#[derive(Debug)]
pub struct MockConnection {
    pub state: Arc<Mutex<MockState>>,
    pub open: bool,
    pub connection_string: Option<String>,
}

impl MockConnection {
    pub fn new(state: Arc<Mutex<MockState>>) -> Self {
        Self {
            state,
            open: false,
            connection_string: None,
        }
    }

    pub fn with_connection_string(state: Arc<Mutex<MockState>>) -> Self {
        Self {
            connection_string: Some(
                ConnectionConfig::new("localhost")
                    .database("test")
                    .to_connection_string(),
            ),
            ..Self::new(state)
        }
    }
}

impl Connection for MockConnection {
    fn open(&mut self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        if !self.open {
            self.open = true;
            let mut guard = self.state.lock().expect("lock poisoned");
            guard.opens += 1;
            guard.open_now += 1;
            guard.peak_open = guard.peak_open.max(guard.open_now);
        }
        async { Outcome::Ok(()) }
    }

    fn close(&mut self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        if self.open {
            self.open = false;
            let mut guard = self.state.lock().expect("lock poisoned");
            guard.closes += 1;
            guard.open_now -= 1;
        }
        async { Outcome::Ok(()) }
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn execute(&self, _cx: &Cx, command: &Command) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let state = Arc::clone(&self.state);
        let sql = command.text().to_string();
        let is_open = self.open;
        async move {
            let should_yield = state.lock().expect("lock poisoned").yield_on_execute;
            if should_yield {
                YieldOnce(false).await;
            }
            let mut guard = state.lock().expect("lock poisoned");
            if !is_open {
                return Outcome::Err(Error::Connection(ConnectionError {
                    kind: ConnectionErrorKind::NotOpen,
                    message: "connection is not open".to_string(),
                    source: None,
                }));
            }
            let fail = guard.fail_on.as_deref().is_some_and(|needle| sql.contains(needle));
            guard.executed.push(sql.clone());
            if fail {
                Outcome::Err(server_error(&sql))
            } else {
                Outcome::Ok(0)
            }
        }
    }

    fn query(&self, _cx: &Cx, command: &Command) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        let state = Arc::clone(&self.state);
        let sql = command.text().to_string();
        async move {
            let mut guard = state.lock().expect("lock poisoned");
            guard.queried.push(sql);
            Outcome::Ok(guard.rows.clone())
        }
    }

    fn connection_string(&self) -> Option<String> {
        self.connection_string.clone()
    }

    fn fork(&self, connection_string: &str) -> chmodel::Result<Self> {
        ConnectionConfig::parse(connection_string)?;
        Ok(Self {
            state: Arc::clone(&self.state),
            open: false,
            connection_string: Some(connection_string.to_string()),
        })
    }
}

pub struct Tag {
    pub id: u32,
    pub name: String,
}

pub struct Event {
    pub id: u64,
    pub name: String,
    pub score: Option<f64>,
    pub tags: Vec<Option<Tag>>,
}

impl Model for Event {
    const TABLE_NAME: &'static str = "Events";

    fn properties() -> Vec<PropertyMapping<Self>> {
        vec![
            PropertyMapping::new("Id", |e: &Event| e.id),
            PropertyMapping::new("Name", |e: &Event| e.name.clone()),
            PropertyMapping::new("Score", |e: &Event| e.score),
            PropertyMapping::nested(
                "Tags",
                NestedMapping::nullable(|e: &Event| e.tags.as_slice())
                    .field("ID", |t: &Tag| t.id)
                    .field("Name", |t: &Tag| t.name.clone()),
            ),
        ]
    }
}

pub fn event(id: u64) -> Event {
    Event {
        id,
        name: format!("e{id}"),
        score: None,
        tags: Vec::new(),
    }
}

pub struct Metric {
    pub id: u64,
}

impl Model for Metric {
    const TABLE_NAME: &'static str = "Metrics";

    fn properties() -> Vec<PropertyMapping<Self>> {
        vec![PropertyMapping::new("Id", |m: &Metric| m.id)]
    }
}

pub fn metrics(n: u64) -> Vec<Metric> {
    (0..n).map(|id| Metric { id }).collect()
}
