//! Schema script loading.
//!
//! The script is a plain list of DDL statements. Lines starting with `--` and
//! blank lines are dropped, the remainder is split on `;`. A `;` inside a
//! string literal is not supported.

use std::path::Path;

use crate::error::{Error, Result};

/// Schema bundled with the crate.
pub const EMBEDDED_SCHEMA: &str = include_str!("../schema.sql");

/// Read a schema script, falling back to the embedded one.
pub fn load_script(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| Error::Schema(format!("cannot read {}: {}", path.display(), e))),
        None => Ok(EMBEDDED_SCHEMA.to_string()),
    }
}

/// Split a script into executable statements.
pub fn split_statements(script: &str) -> Vec<String> {
    let mut sql = String::new();
    for line in script.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("--") {
            continue;
        }
        sql.push_str(line);
        sql.push('\n');
    }

    sql.split(';')
        .map(str::trim)
        .filter(|stmt| !stmt.is_empty())
        .map(str::to_string)
        .collect()
}
