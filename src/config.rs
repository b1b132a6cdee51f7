//! Per-directory policy file parsing
//!
//! A directory inside a project may contain a regular file named `.pgspa`
//! holding flat `key=value` entries that control how the reference resolver
//! treats the directory. The only recognized key is `explicit`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{message} ({path}, line {line})")]
    Syntax {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("unknown parameter \"{name}\" specified in \"{path}\"")]
    UnknownParameter { path: PathBuf, name: String },

    #[error("invalid value \"{value}\" of the boolean parameter \"{name}\" in \"{path}\"")]
    InvalidBoolean {
        path: PathBuf,
        name: String,
        value: String,
    },
}

/// Resolver policy for one directory.
///
/// `explicit` forbids the directory's contents from being pulled in
/// implicitly while expanding a parent reference; naming the directory
/// directly remains allowed.
#[derive(Debug, Clone, Default)]
pub struct DirectoryPolicy {
    pub explicit: bool,
}

impl DirectoryPolicy {
    /// Load the policy file at `path`. Unknown keys are rejected.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let entries = parse_file(path)?;
        let mut policy = Self::default();
        for (name, value) in &entries {
            match name.as_str() {
                "explicit" => {
                    policy.explicit = parse_boolean(path, name, value)?;
                }
                _ => {
                    return Err(ConfigError::UnknownParameter {
                        path: path.to_path_buf(),
                        name: name.clone(),
                    });
                }
            }
        }
        Ok(policy)
    }
}

/// Parse a `key=value` file into a map, skipping blank lines and lines whose
/// first non-space character is `#`.
fn parse_file(path: &Path) -> Result<BTreeMap<String, String>, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut entries = BTreeMap::new();
    for (index, line) in contents.lines().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let (name, value) = parse_entry(line).map_err(|message| ConfigError::Syntax {
            path: path.to_path_buf(),
            line: index + 1,
            message,
        })?;
        entries.insert(name, value);
    }
    Ok(entries)
}

/// Parse one `name = value` entry. The value may be a bare token or a
/// single-quoted string with `\'` escaping an embedded quote; any other
/// backslash sequence is kept verbatim.
fn parse_entry(line: &str) -> Result<(String, String), String> {
    let bytes = line.as_bytes();
    let mut pos = position_of_non_space(bytes, 0);

    let name_start = pos;
    if pos >= bytes.len() || !bytes[pos].is_ascii_alphabetic() {
        return Err("invalid parameter name".to_string());
    }
    while pos < bytes.len() && is_identifier_byte(bytes[pos]) {
        pos += 1;
    }
    let name = line[name_start..pos].to_string();

    if pos < bytes.len() && !bytes[pos].is_ascii_whitespace() && bytes[pos] != b'=' {
        return Err("invalid parameter name".to_string());
    }

    pos = position_of_non_space(bytes, pos);
    if pos >= bytes.len() || bytes[pos] != b'=' {
        return Err("no value assignment".to_string());
    }
    pos = position_of_non_space(bytes, pos + 1);
    if pos >= bytes.len() {
        // Nothing after the assignment: the value is empty.
        return Ok((name, String::new()));
    }

    let (value, rest) = unquoted_value(line, pos)?;
    let tail = position_of_non_space(bytes, rest);
    if tail < bytes.len() {
        return Err("junk in the config entry".to_string());
    }
    Ok((name, value))
}

/// Read a value starting at `pos`: a quoted string if the first character is
/// a single quote, otherwise a run of non-space characters. Returns the value
/// and the position just past it.
fn unquoted_value(line: &str, pos: usize) -> Result<(String, usize), String> {
    let bytes = line.as_bytes();
    if bytes[pos] != b'\'' {
        let mut end = pos;
        while end < bytes.len() && !bytes[end].is_ascii_whitespace() {
            end += 1;
        }
        return Ok((line[pos..end].to_string(), end));
    }

    let mut value = String::new();
    let mut escaped = false;
    let mut i = pos + 1;
    for ch in line[pos + 1..].chars() {
        if escaped {
            if ch != '\'' {
                value.push('\\');
            }
            value.push(ch);
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == '\'' {
            return Ok((value, i + 1));
        } else {
            value.push(ch);
        }
        i += ch.len_utf8();
    }
    Err("no trailing quote found".to_string())
}

fn parse_boolean(path: &Path, name: &str, value: &str) -> Result<bool, ConfigError> {
    match value {
        "y" | "yes" | "t" | "true" | "1" => Ok(true),
        "n" | "no" | "f" | "false" | "0" => Ok(false),
        _ => Err(ConfigError::InvalidBoolean {
            path: path.to_path_buf(),
            name: name.to_string(),
            value: value.to_string(),
        }),
    }
}

fn is_identifier_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn position_of_non_space(bytes: &[u8], mut pos: usize) -> usize {
    while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
        pos += 1;
    }
    pos
}
