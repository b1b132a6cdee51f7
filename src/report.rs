//! GNU-style error reporting
//!
//! Failing statements are reported to standard error as
//! `path:line:column:Error: brief` lines (the format Emacs' compilation
//! mode understands), with any server-provided detail, hint and context on
//! indented continuation lines. Internal bookkeeping commands have no
//! source file; their diagnostics carry the statement text instead.

use crate::batch::SqlBatch;
use crate::session::ServerError;
use std::fmt::Write as _;
use std::path::Path;
use thiserror::Error;

/// Sentinel error meaning "diagnostics were already written to standard
/// error"; the top-level handler exits with status 1 without printing
/// anything further.
#[derive(Debug, Error)]
#[error("diagnostics already reported")]
pub struct Reported;

/// Format the diagnostic for statement `index` of `batch` failing with
/// `error`.
pub fn render(batch: &SqlBatch, index: usize, error: &ServerError) -> String {
    let statement = &batch.statements()[index];
    let mut out = String::new();

    match batch.path() {
        Some(path) => {
            // The statement offset already points at the first token, so a
            // missing server position falls back to the statement start.
            let position = match error.position {
                Some(p) => statement.offset() + p.saturating_sub(1),
                None => statement.offset(),
            };
            let (line, column) = line_column(batch.source(), position);
            let _ = writeln!(
                out,
                "{}:{}:{}:Error: {}",
                absolute(path).display(),
                line,
                column,
                error.message
            );
        }
        None => {
            let position = error.position.map(|p| p.saturating_sub(1)).unwrap_or(0);
            let (line, column) = line_column(statement.text(), position);
            let _ = writeln!(
                out,
                "pgspa internal query (see below):{}:{}:Error: {}:\n{}",
                line,
                column,
                error.message,
                statement.text()
            );
        }
    }

    if let Some(detail) = &error.detail {
        let _ = writeln!(out, "  Detail: {detail}");
    }
    if let Some(hint) = &error.hint {
        let _ = writeln!(out, "  Hint: {hint}");
    }
    if let Some(context) = &error.context {
        let _ = writeln!(out, "  Context: {context}");
    }
    out
}

/// Write the diagnostic for one failing statement to standard error.
pub fn emit(batch: &SqlBatch, index: usize, error: &ServerError) {
    eprint!("{}", render(batch, index, error));
}

/// Report a failing internal command through the pathless-batch route.
pub fn emit_internal(sql: &str, error: &ServerError) {
    let batch = SqlBatch::internal(sql);
    emit(&batch, 0, error);
}

/// Translate an absolute byte position into 1-based line and column
/// numbers. `\n` is the only line separator; every other byte, including
/// `\r`, occupies a column.
fn line_column(text: &str, position: usize) -> (usize, usize) {
    let clamped = position.min(text.len());
    let mut line = 0;
    let mut column = 0;
    for &b in &text.as_bytes()[..clamped] {
        column += 1;
        if b == b'\n' {
            line += 1;
            column = 0;
        }
    }
    (line + 1, column + 1)
}

fn absolute(path: &Path) -> std::path::PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
