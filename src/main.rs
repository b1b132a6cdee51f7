//! pgspa CLI
//!
//! Entry point for the command-line tool.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use pgspa::{executor, project, report};
use pgspa::{ConnectOptions, Reported, Resolver, Session, SqlBatch, TxGuard};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "pgspa")]
#[command(about = "The SQL programming assistant for PostgreSQL", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the .pgspa project marker directory
    Init,

    /// Print the tool version
    Version,

    /// Resolve references and apply their SQL in a single transaction
    Exec(ExecArgs),
}

#[derive(Args, Debug)]
struct ExecArgs {
    /// References to resolve, relative to the project root
    #[arg(required = true, value_name = "REFERENCE")]
    references: Vec<String>,

    /// Host name of the PostgreSQL server
    #[arg(long, default_value = "localhost")]
    host: String,

    /// IP address of the PostgreSQL server
    #[arg(long, default_value = "127.0.0.1")]
    address: IpAddr,

    /// Port number of the PostgreSQL server
    #[arg(long, default_value_t = 5432)]
    port: u16,

    /// User name to operate as (current OS user by default)
    #[arg(long)]
    username: Option<String>,

    /// Database to operate on (value of --username by default)
    #[arg(long)]
    database: Option<String>,

    /// Password (beware, it may appear in the system logs!)
    #[arg(long)]
    password: Option<String>,

    /// Client encoding to set after connecting
    #[arg(long = "client_encoding")]
    client_encoding: Option<String>,

    /// Connect timeout in seconds
    #[arg(long = "connect_timeout", default_value_t = 8)]
    connect_timeout: u64,
}

impl ExecArgs {
    fn connect_options(&self) -> ConnectOptions {
        let username = self
            .username
            .clone()
            .unwrap_or_else(whoami::username);
        ConnectOptions {
            host: self.host.clone(),
            address: self.address,
            port: self.port,
            username,
            database: self.database.clone(),
            password: self.password.clone(),
            client_encoding: self.client_encoding.clone(),
            connect_timeout: Duration::from_secs(self.connect_timeout),
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            use clap::error::ErrorKind;
            let _ = err.print();
            return match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(1),
            };
        }
    };

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            // Diagnostics for reported errors are already on stderr.
            if err.is::<Reported>() {
                return ExitCode::from(1);
            }
            eprintln!("pgspa: {err:#}");
            ExitCode::from(exit_code(&err))
        }
    }
}

/// Known failure kinds exit with 1; anything unrecognized exits with 2.
fn exit_code(err: &anyhow::Error) -> u8 {
    let known = err.is::<project::ProjectError>()
        || err.is::<pgspa::config::ConfigError>()
        || err.is::<pgspa::resolve::ResolveError>()
        || err.is::<pgspa::batch::LoadError>()
        || err.is::<executor::ExecuteError>()
        || err.is::<postgres::Error>()
        || err.is::<std::io::Error>();
    if known {
        1
    } else {
        2
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Init => run_init(),
        Command::Version => run_version(),
        Command::Exec(args) => run_exec(&args),
    }
}

fn run_init() -> Result<()> {
    project::init(Path::new("."))?;
    Ok(())
}

fn run_version() -> Result<()> {
    println!(
        "{}.{}",
        env!("CARGO_PKG_VERSION_MAJOR"),
        env!("CARGO_PKG_VERSION_MINOR")
    );
    Ok(())
}

fn run_exec(args: &ExecArgs) -> Result<()> {
    let root = project::find_root()?;
    let resolver = Resolver::new(&root);

    // Resolve and load everything up front so that reference and file
    // problems never touch the server.
    let mut workload: Vec<(&str, Vec<SqlBatch>)> = Vec::new();
    for reference in &args.references {
        let paths = resolver.resolve(Path::new(reference))?;
        let batches = load_batches(&paths)?;
        workload.push((reference.as_str(), batches));
    }

    let mut session = Session::new(args.connect_options());
    session.connect().context("cannot connect to the server")?;

    let mut tx = TxGuard::begin(&mut session)?;
    for (reference, batches) in &workload {
        let count = apply_reference(tx.session(), batches)?;
        println!("The reference \"{reference}\". Executed queries count = {count}.");
    }
    tx.commit()?;
    Ok(())
}

fn load_batches(paths: &[PathBuf]) -> Result<Vec<SqlBatch>> {
    let mut batches = Vec::with_capacity(paths.len());
    for path in paths {
        batches.push(SqlBatch::from_file(path)?);
    }
    Ok(batches)
}

/// Run one reference's batches to fixed point, reporting every statement
/// still failing when the loop stops.
fn apply_reference(session: &mut Session, batches: &[SqlBatch]) -> Result<usize> {
    let execution = match executor::apply(session, batches) {
        Ok(execution) => execution,
        Err(executor::ExecuteError::Internal { sql, error }) => {
            report::emit_internal(&sql, &error);
            return Err(Reported.into());
        }
        Err(executor::ExecuteError::Db(e)) => return Err(e.into()),
    };

    if !execution.is_complete() {
        for failure in &execution.failures {
            report::emit(&batches[failure.batch], failure.statement, &failure.error);
        }
        return Err(Reported.into());
    }
    Ok(execution.total)
}
