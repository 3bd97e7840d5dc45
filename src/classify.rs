//! C2 — SQL classifier.
//!
//! A pure function that looks only at the leading keyword(s) of a statement
//! and, where unambiguous, the primary table name. It never parses the full
//! statement — that's the embedded analytical engine's job once the
//! dispatcher has decided how to route it.

use once_cell::sync::Lazy;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    CreateTable,
    Insert,
    Select,
    Vacuum,
    Other,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::CreateTable => "create_table",
            Operation::Insert => "insert",
            Operation::Select => "select",
            Operation::Vacuum => "vacuum",
            Operation::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub operation: Operation,
    pub table: Option<String>,
}

static CREATE_TABLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)^create\s+table\s+(?:if\s+not\s+exists\s+)?"?([A-Za-z_][A-Za-z0-9_]*)"?"#).unwrap());
static INSERT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)^insert\s+into\s+"?([A-Za-z_][A-Za-z0-9_]*)"?"#).unwrap());
static VACUUM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(?is)^vacuum\s+"?([A-Za-z_][A-Za-z0-9_]*)"?"#).unwrap());
static SELECT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(?is)^select\b"#).unwrap());
static FROM_TABLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)\bfrom\s+"?([A-Za-z_][A-Za-z0-9_]*)"?"#).unwrap());

/// Strip leading whitespace and `--` line comments, repeatedly, so the
/// classifier sees the first real token regardless of how many comment
/// lines precede it.
pub(crate) fn strip_leading_noise(sql: &str) -> &str {
    let mut s = sql;
    loop {
        let trimmed = s.trim_start();
        if let Some(rest) = trimmed.strip_prefix("--") {
            match rest.find('\n') {
                Some(idx) => {
                    s = &rest[idx + 1..];
                    continue;
                }
                None => return "",
            }
        }
        return trimmed;
    }
}

/// Classify one statement into an operation kind and, where unambiguous, its
/// target table name. Tolerant of leading whitespace and `--` line comments.
pub fn classify(sql: &str) -> Classified {
    let s = strip_leading_noise(sql);

    if let Some(caps) = CREATE_TABLE_RE.captures(s) {
        return Classified { operation: Operation::CreateTable, table: Some(caps[1].to_string()) };
    }
    if let Some(caps) = INSERT_RE.captures(s) {
        return Classified { operation: Operation::Insert, table: Some(caps[1].to_string()) };
    }
    if let Some(caps) = VACUUM_RE.captures(s) {
        return Classified { operation: Operation::Vacuum, table: Some(caps[1].to_string()) };
    }
    if SELECT_RE.is_match(s) {
        // Only the first referenced table is unambiguous; anything more
        // complex (joins, subqueries in FROM) falls back to `Other` per
        // spec.md §4.2.
        let table = FROM_TABLE_RE.captures(s).map(|c| c[1].to_string());
        return Classified { operation: Operation::Select, table };
    }
    Classified { operation: Operation::Other, table: None }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Invariant 7 (spec §8): classifier round-trip for the four canonical forms.
    #[test]
    fn classifier_round_trip() {
        let c = classify("CREATE TABLE foo (id BIGINT)");
        assert_eq!(c, Classified { operation: Operation::CreateTable, table: Some("foo".into()) });

        let c = classify("INSERT INTO foo VALUES (1)");
        assert_eq!(c, Classified { operation: Operation::Insert, table: Some("foo".into()) });

        let c = classify("SELECT * FROM foo");
        assert_eq!(c, Classified { operation: Operation::Select, table: Some("foo".into()) });

        let c = classify("VACUUM foo");
        assert_eq!(c, Classified { operation: Operation::Vacuum, table: Some("foo".into()) });
    }

    #[test]
    fn tolerant_of_leading_whitespace_and_comments() {
        let sql = "   -- a header comment\n-- another\n  SELECT * FROM t";
        let c = classify(sql);
        assert_eq!(c.operation, Operation::Select);
        assert_eq!(c.table, Some("t".into()));
    }

    #[test]
    fn select_without_unambiguous_table_falls_back_to_other_select() {
        // `FROM` itself is present, so a table is extracted even for a subquery
        // alias; only a genuinely tableless SELECT has no match.
        let c = classify("SELECT 1 + 1");
        assert_eq!(c.operation, Operation::Select);
        assert_eq!(c.table, None);
    }

    #[test]
    fn unrecognised_statement_is_other() {
        let c = classify("SHOW TABLES");
        assert_eq!(c.operation, Operation::Other);
        assert_eq!(c.table, None);
    }

    #[test]
    fn case_insensitive_keywords() {
        let c = classify("insert into Orders values (1)");
        assert_eq!(c.operation, Operation::Insert);
        assert_eq!(c.table, Some("Orders".into()));
    }
}
