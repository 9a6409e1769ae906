//! SQL text utilities for the statement profiler
//!
//! Everything in this crate is pure and synchronous:
//! - placeholder substitution so driver-level statements become parsable SQL
//! - literal normalization for comparing structurally identical statements
//! - table and filter-column extraction on top of `sqlparser`
//! - statement classification and index definition parsing

pub mod classify;
pub mod index_def;
pub mod placeholder;
pub mod tables;

pub use classify::StatementKind;
pub use index_def::parse_index_columns;
pub use placeholder::{
    normalize, rewrite_markers, substitute_placeholders, BindMarker, CANONICAL_TOKEN, DUMMY_LITERAL,
};
pub use tables::{extract_tables, filter_columns, try_extract_tables};

use sqlparser::ast::Statement;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use thiserror::Error;

/// Errors raised while parsing SQL text
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SqlError {
    #[error("Failed to parse SQL: {0}")]
    Parse(String),

    #[error("Empty statement")]
    Empty,
}

/// Parse one SQL string after substituting its bind markers.
pub(crate) fn parse(sql: &str) -> Result<Vec<Statement>, SqlError> {
    let cleaned = substitute_placeholders(sql);
    if cleaned.trim().is_empty() {
        return Err(SqlError::Empty);
    }

    let statements = Parser::parse_sql(&GenericDialect {}, &cleaned)
        .map_err(|e| SqlError::Parse(e.to_string()))?;

    if statements.is_empty() {
        return Err(SqlError::Empty);
    }

    Ok(statements)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rejects_blank_input() {
        assert_eq!(parse("   "), Err(SqlError::Empty));
    }

    #[test]
    fn test_parse_accepts_placeholders() {
        let statements = parse("SELECT * FROM film WHERE film_id = %s").unwrap();
        assert_eq!(statements.len(), 1);
    }
}
