//! SQL batch model
//!
//! Reads a source file, splits it into individual SQL statements with the
//! pg_query parser, and keeps the absolute byte offset of each statement so
//! diagnostics can point back into the file.

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("syntax error in {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// One SQL statement within a batch.
#[derive(Debug, Clone)]
pub struct Statement {
    text: String,
    offset: usize,
    empty: bool,
}

impl Statement {
    /// The statement's source text, starting at its first token. This is
    /// exactly what gets sent to the server, so server-reported positions
    /// index into it directly.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Absolute byte offset of the statement's first token within the
    /// batch source.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Whether the statement holds no executable command (comments or
    /// whitespace only). Empty statements are never sent to the server.
    pub fn is_empty(&self) -> bool {
        self.empty
    }
}

/// The parsed statement list of one source file, or of one internal command
/// when no file is involved.
#[derive(Debug, Clone)]
pub struct SqlBatch {
    path: Option<PathBuf>,
    source: String,
    statements: Vec<Statement>,
}

impl SqlBatch {
    /// Read and split the SQL file at `path`.
    pub fn from_file(path: &Path) -> Result<Self, LoadError> {
        let source = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let statements = split_statements(&source).map_err(|e| LoadError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(Self {
            path: Some(path.to_path_buf()),
            source,
            statements,
        })
    }

    /// Build a pathless batch around a single pre-made internal command.
    /// Used only for diagnostics about the tool's own bookkeeping SQL.
    pub fn internal(sql: &str) -> Self {
        let empty = sql.trim().is_empty();
        Self {
            path: None,
            source: sql.to_string(),
            statements: vec![Statement {
                text: sql.to_string(),
                offset: 0,
                empty,
            }],
        }
    }

    /// The source file this batch was read from; `None` for internal
    /// batches.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The complete source text the statements were split from.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    /// The number of statements that would actually be executed.
    pub fn non_empty_count(&self) -> usize {
        self.statements.iter().filter(|s| !s.is_empty()).count()
    }
}

/// Split a SQL source string into statements with absolute offsets.
///
/// pg_query reports each statement's location and length in bytes. The
/// location may include leading whitespace left over after the previous
/// statement's semicolon; it is skipped so that `offset` lands on the first
/// token and line/column diagnostics are accurate.
fn split_statements(source: &str) -> Result<Vec<Statement>, pg_query::Error> {
    let result = pg_query::parse(source)?;

    let mut statements = Vec::new();
    for raw_stmt in &result.protobuf.stmts {
        let start_offset = raw_stmt.stmt_location as usize;
        let end_offset = if raw_stmt.stmt_len > 0 {
            start_offset + raw_stmt.stmt_len as usize
        } else {
            source.len()
        };
        let token_start = source[start_offset..end_offset]
            .find(|c: char| !c.is_whitespace())
            .map(|i| start_offset + i)
            .unwrap_or(start_offset);

        let text = source.get(token_start..end_offset).unwrap_or("").to_string();
        let has_node = raw_stmt.stmt.as_ref().and_then(|s| s.node.as_ref()).is_some();
        let empty = is_empty_statement(has_node, &text);

        statements.push(Statement {
            text,
            offset: token_start,
            empty,
        });
    }
    Ok(statements)
}

/// A statement with no parse node (the raw parser's null statement between
/// doubled semicolons) or with no token text executes nothing.
fn is_empty_statement(has_node: bool, text: &str) -> bool {
    !has_node || text.trim().is_empty()
}
