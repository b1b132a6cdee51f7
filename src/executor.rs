//! Fixed-point statement executor
//!
//! Applies every non-empty statement of every batch inside the already-open
//! transaction, tolerating two classes of ordering problems: objects that
//! already exist (treated as success) and objects that are not defined yet
//! (retried on the next iteration, once more statements have been applied).
//! Each failed statement is rolled back to a reusable savepoint, so a
//! deferred failure leaves no state behind. The loop ends when a full pass
//! completes nothing new, which bounds it to at most one iteration per
//! non-empty statement.

use crate::batch::SqlBatch;
use crate::session::{ServerError, StatementOutcome, StatementRunner};
use postgres::error::SqlState;
use thiserror::Error;
use tracing::debug;

/// The single reusable savepoint. Only one level is ever needed because a
/// statement either commits its work into the outer transaction or is rolled
/// back entirely.
const SAVEPOINT: &str = "savepoint p1";
const ROLLBACK_TO_SAVEPOINT: &str = "rollback to savepoint p1";

/// Already-exists SQLSTATEs: the statement's object is in place, so the
/// statement counts as done.
const DUPLICATE_CODES: [SqlState; 4] = [
    SqlState::DUPLICATE_TABLE,
    SqlState::DUPLICATE_FUNCTION,
    SqlState::DUPLICATE_OBJECT,
    SqlState::DUPLICATE_SCHEMA,
];

/// Not-yet-defined SQLSTATEs: the statement may succeed on a later
/// iteration, after its dependencies have been applied.
const DEFERRABLE_CODES: [SqlState; 5] = [
    SqlState::UNDEFINED_TABLE,
    SqlState::UNDEFINED_FUNCTION,
    SqlState::UNDEFINED_OBJECT,
    SqlState::INVALID_SCHEMA_NAME,
    SqlState::DEPENDENT_OBJECTS_STILL_EXIST,
];

#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error(transparent)]
    Db(#[from] postgres::Error),

    /// An internal bookkeeping command (savepoint handling) failed on the
    /// server. The offending SQL is carried for diagnostics.
    #[error("internal command \"{sql}\" failed: {}", error.message)]
    Internal { sql: String, error: ServerError },
}

/// A statement that was still failing when the fixed point was reached,
/// with the most recent server error it produced.
#[derive(Debug)]
pub struct StatementFailure {
    pub batch: usize,
    pub statement: usize,
    pub error: ServerError,
}

/// The outcome of running a set of batches to fixed point.
#[derive(Debug)]
pub struct Execution {
    /// Statements completed, including absorbed duplicates.
    pub executed: usize,
    /// Total non-empty statements across all batches.
    pub total: usize,
    pub failures: Vec<StatementFailure>,
}

impl Execution {
    pub fn is_complete(&self) -> bool {
        self.executed == self.total
    }
}

#[derive(Debug)]
enum Status {
    Untried,
    Done,
    Pending(ServerError),
}

impl Status {
    fn is_done(&self) -> bool {
        matches!(self, Status::Done)
    }
}

enum ErrorClass {
    Duplicate,
    Deferrable,
    Fatal,
}

fn classify(code: &SqlState) -> ErrorClass {
    if DUPLICATE_CODES.contains(code) {
        ErrorClass::Duplicate
    } else if DEFERRABLE_CODES.contains(code) {
        ErrorClass::Deferrable
    } else {
        ErrorClass::Fatal
    }
}

/// Run every batch to fixed point. The caller must have the outer
/// transaction open; the reusable savepoint is declared on entry.
pub fn apply<R: StatementRunner>(
    runner: &mut R,
    batches: &[SqlBatch],
) -> Result<Execution, ExecuteError> {
    let total: usize = batches.iter().map(SqlBatch::non_empty_count).sum();
    let mut statuses: Vec<Vec<Status>> = batches
        .iter()
        .map(|b| b.statements().iter().map(|_| Status::Untried).collect())
        .collect();

    perform(runner, SAVEPOINT)?;

    let mut executed = 0;
    let mut iteration = 0;
    let mut fatal = false;
    loop {
        iteration += 1;
        let mut completions = 0;

        'pass: for (i, batch) in batches.iter().enumerate() {
            for (j, statement) in batch.statements().iter().enumerate() {
                if statuses[i][j].is_done() {
                    continue;
                }
                if statement.is_empty() {
                    statuses[i][j] = Status::Done;
                    continue;
                }
                match runner.execute(statement.text())? {
                    StatementOutcome::Ok => {
                        // Re-establish the savepoint before anything else,
                        // so the statement's effects are inside the new
                        // savepoint window.
                        perform(runner, SAVEPOINT)?;
                        statuses[i][j] = Status::Done;
                        completions += 1;
                    }
                    StatementOutcome::Server(error) => {
                        perform(runner, ROLLBACK_TO_SAVEPOINT)?;
                        match classify(&error.code) {
                            ErrorClass::Duplicate => {
                                statuses[i][j] = Status::Done;
                                completions += 1;
                            }
                            ErrorClass::Deferrable => {
                                statuses[i][j] = Status::Pending(error);
                            }
                            ErrorClass::Fatal => {
                                statuses[i][j] = Status::Pending(error);
                                fatal = true;
                                break 'pass;
                            }
                        }
                    }
                }
            }
        }

        executed += completions;
        debug!(iteration, completions, executed, total, "executor pass");
        if fatal || completions == 0 {
            break;
        }
    }

    let mut failures = Vec::new();
    for (i, batch_statuses) in statuses.iter().enumerate() {
        for (j, status) in batch_statuses.iter().enumerate() {
            if let Status::Pending(error) = status {
                failures.push(StatementFailure {
                    batch: i,
                    statement: j,
                    error: error.clone(),
                });
            }
        }
    }

    Ok(Execution {
        executed,
        total,
        failures,
    })
}

/// Issue an internal bookkeeping command; a server error here is not part
/// of the statement state machine and aborts the run.
fn perform<R: StatementRunner>(runner: &mut R, sql: &str) -> Result<(), ExecuteError> {
    match runner.execute(sql)? {
        StatementOutcome::Ok => Ok(()),
        StatementOutcome::Server(error) => Err(ExecuteError::Internal {
            sql: sql.to_string(),
            error,
        }),
    }
}
