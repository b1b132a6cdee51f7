//! Database session and transaction guard
//!
//! One `Session` owns the single PostgreSQL connection used by an
//! invocation. The connection is opened lazily on first use; commands that
//! need to cooperate inside one transaction borrow the same session, so the
//! caller's transaction envelops everything a nested command does.

use postgres::error::{DbError, ErrorPosition, SqlState};
use postgres::{Client, NoTls};
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, warn};

/// Connection parameters for a session, as supplied on the command line.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub host: String,
    pub address: IpAddr,
    pub port: u16,
    pub username: String,
    /// Defaults to `username` when unset.
    pub database: Option<String>,
    pub password: Option<String>,
    pub client_encoding: Option<String>,
    pub connect_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            address: IpAddr::from([127, 0, 0, 1]),
            port: 5432,
            username: whoami::username(),
            database: None,
            password: None,
            client_encoding: None,
            connect_timeout: Duration::from_secs(8),
        }
    }
}

impl ConnectOptions {
    pub fn database(&self) -> &str {
        self.database.as_deref().unwrap_or(&self.username)
    }
}

/// A captured server error report for one statement.
#[derive(Debug, Clone)]
pub struct ServerError {
    pub code: SqlState,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
    pub context: Option<String>,
    /// 1-based byte position into the statement text, when the server
    /// supplied one.
    pub position: Option<usize>,
}

impl From<&DbError> for ServerError {
    fn from(e: &DbError) -> Self {
        let position = match e.position() {
            Some(ErrorPosition::Original(p)) => Some(*p as usize),
            _ => None,
        };
        Self {
            code: e.code().clone(),
            message: e.message().to_string(),
            detail: e.detail().map(str::to_string),
            hint: e.hint().map(str::to_string),
            context: e.where_().map(str::to_string),
            position,
        }
    }
}

/// Outcome of pushing one SQL statement through the driver.
#[derive(Debug)]
pub enum StatementOutcome {
    Ok,
    /// The server processed the statement and reported an error.
    Server(ServerError),
}

/// The minimal execution surface the fixed-point executor needs. `Session`
/// is the production implementation; tests substitute scripted fakes.
pub trait StatementRunner {
    /// Execute a single SQL statement. Server reports come back as
    /// `StatementOutcome::Server`; transport-level failures are `Err`.
    fn execute(&mut self, sql: &str) -> Result<StatementOutcome, postgres::Error>;
}

/// The connection plus its transaction state.
pub struct Session {
    options: ConnectOptions,
    client: Option<Client>,
    in_transaction: bool,
}

impl Session {
    pub fn new(options: ConnectOptions) -> Self {
        Self {
            options,
            client: None,
            in_transaction: false,
        }
    }

    /// Open the connection if it is not open yet.
    pub fn connect(&mut self) -> Result<(), postgres::Error> {
        self.client().map(|_| ())
    }

    fn client(&mut self) -> Result<&mut Client, postgres::Error> {
        if self.client.is_none() {
            let opts = &self.options;
            debug!(
                host = %opts.host,
                port = opts.port,
                database = %opts.database(),
                "connecting"
            );
            let mut config = postgres::Config::new();
            config
                .host(&opts.host)
                .hostaddr(opts.address)
                .port(opts.port)
                .user(&opts.username)
                .dbname(opts.database())
                .connect_timeout(opts.connect_timeout);
            if let Some(password) = &opts.password {
                config.password(password);
            }
            let mut client = config.connect(NoTls)?;
            if let Some(encoding) = &self.options.client_encoding {
                client.batch_execute(&format!(
                    "set client_encoding to {}",
                    quote_identifier(encoding)
                ))?;
            }
            self.client = Some(client);
        }
        Ok(self.client.as_mut().expect("connection just opened"))
    }

    /// Execute a statement, discarding any result rows.
    pub fn perform(&mut self, sql: &str) -> Result<(), postgres::Error> {
        self.client()?.batch_execute(sql)
    }

    /// Open the outer transaction unless the session is already inside one.
    pub fn begin(&mut self) -> Result<(), postgres::Error> {
        if !self.in_transaction {
            self.perform("begin")?;
            self.in_transaction = true;
        }
        Ok(())
    }

    /// Commit the outer transaction if one is open.
    pub fn commit(&mut self) -> Result<(), postgres::Error> {
        if self.in_transaction {
            self.perform("commit")?;
            self.in_transaction = false;
        }
        Ok(())
    }

    /// Roll back the outer transaction if one is open.
    pub fn rollback(&mut self) -> Result<(), postgres::Error> {
        if self.in_transaction {
            self.perform("rollback")?;
            self.in_transaction = false;
        }
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }
}

impl StatementRunner for Session {
    fn execute(&mut self, sql: &str) -> Result<StatementOutcome, postgres::Error> {
        match self.perform(sql) {
            Ok(()) => Ok(StatementOutcome::Ok),
            Err(e) => match e.as_db_error() {
                Some(db_error) => Ok(StatementOutcome::Server(ServerError::from(db_error))),
                None => Err(e),
            },
        }
    }
}

/// Scoped transaction wrapper: `begin` on entry, best-effort `rollback` on
/// drop unless `commit` was called.
pub struct TxGuard<'a> {
    session: &'a mut Session,
    committed: bool,
}

impl<'a> TxGuard<'a> {
    pub fn begin(session: &'a mut Session) -> Result<Self, postgres::Error> {
        session.begin()?;
        Ok(Self {
            session,
            committed: false,
        })
    }

    /// The guarded session, for issuing statements inside the transaction.
    pub fn session(&mut self) -> &mut Session {
        self.session
    }

    pub fn commit(mut self) -> Result<(), postgres::Error> {
        self.session.commit()?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for TxGuard<'_> {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(e) = self.session.rollback() {
                warn!("rollback on exit failed: {e}");
            }
        }
    }
}

/// Quote a string as a SQL identifier, doubling embedded quotes.
fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
