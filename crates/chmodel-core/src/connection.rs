//! Connection abstraction.
//!
//! chmodel does not ship a network driver. Drivers implement [`Connection`];
//! the bulk and temp-table layers only ever open, execute and close through
//! it. All operations take a `Cx` context for cancellation.

use std::future::Future;
use std::time::Duration;

use asupersync::{Cx, Outcome};

use crate::error::{ConfigError, Error, Result};
use crate::row::Row;
use crate::value::Value;

/// Whether a command reads or writes.
///
/// Routing layers that pick a replica per call use this instead of
/// ambient state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandIntent {
    Read,
    #[default]
    Write,
}

/// A raw command ready to execute.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    text: String,
    timeout: Option<Duration>,
    intent: CommandIntent,
    /// Values for `{name:Type}` placeholders in `text`
    parameters: Vec<(String, Value)>,
}

impl Command {
    /// Create a write command.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            timeout: None,
            intent: CommandIntent::Write,
            parameters: Vec::new(),
        }
    }

    /// Create a read command.
    pub fn read(text: impl Into<String>) -> Self {
        Self::new(text).intent(CommandIntent::Read)
    }

    /// Set the command timeout.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn intent(mut self, intent: CommandIntent) -> Self {
        self.intent = intent;
        self
    }

    /// Attach server-side parameter values.
    pub fn parameters(mut self, parameters: Vec<(String, Value)>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn command_intent(&self) -> CommandIntent {
        self.intent
    }

    pub fn command_parameters(&self) -> &[(String, Value)] {
        &self.parameters
    }
}

/// A logical connection to a ClickHouse server.
///
/// A connection is used by one operation at a time. Parallel bulk inserts
/// call [`fork`](Connection::fork) to obtain independent connections.
pub trait Connection: Send + Sync + Sized {
    /// Open the connection.
    fn open(&mut self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Close the connection. Closing a closed connection is a no-op.
    fn close(&mut self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Is the connection currently open?
    fn is_open(&self) -> bool;

    /// Create a command for the given SQL text.
    fn create_command(&self, sql: &str) -> Command {
        Command::new(sql)
    }

    /// Execute a statement that returns no rows; returns rows written when
    /// the server reports it.
    fn execute(&self, cx: &Cx, command: &Command) -> impl Future<Output = Outcome<u64, Error>> + Send;

    /// Execute a query and return all rows.
    fn query(&self, cx: &Cx, command: &Command)
    -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send;

    /// The connection string this connection was built from, if any.
    fn connection_string(&self) -> Option<String> {
        None
    }

    /// Create an independent, unopened connection from a connection string.
    fn fork(&self, connection_string: &str) -> Result<Self> {
        let _ = connection_string;
        Err(Error::config(
            "this connection type cannot be cloned from a connection string",
        ))
    }
}

/// Produces fresh, unopened connections.
pub trait ConnectionFactory: Send + Sync {
    type Conn: Connection;

    fn create(&self) -> Result<Self::Conn>;
}

impl<C, F> ConnectionFactory for F
where
    C: Connection,
    F: Fn() -> Result<C> + Send + Sync,
{
    type Conn = C;

    fn create(&self) -> Result<C> {
        self()
    }
}

/// Configuration for ClickHouse connections.
///
/// Parses and renders the `Key=Value;...` connection string form, which is
/// what [`Connection::fork`] receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    /// `http` or `https`
    pub protocol: String,
    pub database: String,
    pub username: String,
    pub password: Option<String>,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Query timeout in milliseconds
    pub query_timeout_ms: u64,
    /// Client name reported to the server
    pub client_name: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8123,
            protocol: "http".to_string(),
            database: "default".to_string(),
            username: "default".to_string(),
            password: None,
            connect_timeout_ms: 30_000,
            query_timeout_ms: 30_000,
            client_name: None,
        }
    }
}

impl ConnectionConfig {
    /// Create a config for the given host with default settings.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = Some(password.into());
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = ms;
        self
    }

    /// Set the query timeout.
    pub fn query_timeout(mut self, ms: u64) -> Self {
        self.query_timeout_ms = ms;
        self
    }

    pub fn client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = Some(name.into());
        self
    }

    /// Base URL of the HTTP interface.
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }

    /// Parse a `Key=Value;...` connection string. Keys are case-insensitive.
    ///
    /// `Timeout` is in seconds and sets the query timeout.
    pub fn parse(connection_string: &str) -> Result<Self> {
        let mut config = Self::default();
        for part in connection_string.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (key, value) = part.split_once('=').ok_or_else(|| {
                Error::config(format!("malformed connection string segment '{}'", part))
            })?;
            let value = value.trim();
            match key.trim().to_ascii_lowercase().as_str() {
                "host" => config.host = value.to_string(),
                "port" => config.port = parse_number(key, value)?,
                "protocol" => config.protocol = value.to_ascii_lowercase(),
                "database" => config.database = value.to_string(),
                "username" | "user" => config.username = value.to_string(),
                "password" => config.password = Some(value.to_string()),
                "timeout" => {
                    let secs: u64 = parse_number(key, value)?;
                    config.query_timeout_ms = secs * 1000;
                }
                "clientname" => config.client_name = Some(value.to_string()),
                other => {
                    return Err(Error::config(format!(
                        "unknown connection string key '{}'",
                        other
                    )));
                }
            }
        }
        if config.host.is_empty() {
            return Err(Error::config("connection string has an empty Host"));
        }
        Ok(config)
    }

    /// Render the `Key=Value;...` form accepted by [`ConnectionConfig::parse`].
    pub fn to_connection_string(&self) -> String {
        let mut parts = vec![
            format!("Host={}", self.host),
            format!("Port={}", self.port),
            format!("Protocol={}", self.protocol),
            format!("Database={}", self.database),
            format!("Username={}", self.username),
        ];
        if let Some(password) = &self.password {
            parts.push(format!("Password={}", password));
        }
        parts.push(format!("Timeout={}", self.query_timeout_ms / 1000));
        if let Some(name) = &self.client_name {
            parts.push(format!("ClientName={}", name));
        }
        parts.join(";")
    }
}

fn parse_number<N: std::str::FromStr>(key: &str, value: &str) -> Result<N>
where
    N::Err: std::error::Error + Send + Sync + 'static,
{
    value.parse().map_err(|e| {
        Error::Config(ConfigError {
            message: format!("invalid value '{}' for connection string key '{}'", value, key),
            source: Some(Box::new(e)),
        })
    })
}
