//! Statement classification by leading keyword

/// Broad kind of a SQL statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// SELECT or a WITH query
    Read,
    /// INSERT, UPDATE, DELETE, MERGE
    Write,
    /// CREATE, ALTER, DROP, TRUNCATE
    Ddl,
    /// Transaction control, SET, anything else
    Other,
}

impl StatementKind {
    /// Classify a statement by its first keyword.
    pub fn of(sql: &str) -> Self {
        match leading_keyword(sql).as_str() {
            "SELECT" | "WITH" | "VALUES" | "TABLE" => StatementKind::Read,
            "INSERT" | "UPDATE" | "DELETE" | "MERGE" | "REPLACE" | "UPSERT" => StatementKind::Write,
            "CREATE" | "ALTER" | "DROP" | "TRUNCATE" | "RENAME" | "COMMENT" => StatementKind::Ddl,
            _ => StatementKind::Other,
        }
    }

    pub fn is_read(self) -> bool {
        self == StatementKind::Read
    }
}

/// First keyword of a statement, uppercased, skipping leading whitespace,
/// parentheses and line comments.
fn leading_keyword(sql: &str) -> String {
    let mut rest = sql;
    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == '(');
        if let Some(stripped) = rest.strip_prefix("--") {
            rest = stripped.split_once('\n').map(|(_, tail)| tail).unwrap_or("");
            continue;
        }
        break;
    }

    rest.chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classifies_reads() {
        assert_eq!(StatementKind::of("select 1"), StatementKind::Read);
        assert_eq!(
            StatementKind::of("  (SELECT * FROM film) UNION (SELECT * FROM film)"),
            StatementKind::Read
        );
        assert_eq!(
            StatementKind::of("-- listing\nWITH x AS (SELECT 1) SELECT * FROM x"),
            StatementKind::Read
        );
    }

    #[test]
    fn test_classifies_writes_and_ddl() {
        assert_eq!(
            StatementKind::of("INSERT INTO rental VALUES (1)"),
            StatementKind::Write
        );
        assert_eq!(StatementKind::of("delete from rental"), StatementKind::Write);
        assert_eq!(
            StatementKind::of("CREATE INDEX ON film(title)"),
            StatementKind::Ddl
        );
        assert_eq!(StatementKind::of("BEGIN"), StatementKind::Other);
        assert!(!StatementKind::of("SAVEPOINT s1").is_read());
    }
}
