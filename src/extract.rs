//! SQL-to-table dependency extraction.
//!
//! Purely lexical and conservative, explicitly not a SQL parser:
//! - Comments and string-literal bodies are stripped first so keywords
//!   inside them cannot be misread as table references
//! - CTE names are excluded (a CTE is not a base table)
//! - References after FROM / JOIN / UPDATE / INTO are collected,
//!   lower-cased, optionally quoted
//! - No reference found means "unknown": callers must treat the whole
//!   database as potentially affected
//!
//! A wrong under-approximation would leave readers stale; a false positive
//! only costs an extra re-read. The heuristic therefore always errs toward
//! the wildcard.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// The set of tables a statement reads or writes.
///
/// `All` is the `"*"` wildcard: extraction could not determine specific
/// tables, so every reader must assume its data may have changed. Keeping
/// the wildcard as a first-class variant forces callers to handle it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableSet {
    /// Assume every table may be affected.
    All,
    /// Exactly these tables (canonical lower-case names).
    Named(BTreeSet<String>),
}

impl TableSet {
    /// Build a named set from an iterator of table names, lower-casing
    /// each for the canonical comparison key.
    pub fn named<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        TableSet::Named(
            names
                .into_iter()
                .map(|n| n.as_ref().to_lowercase())
                .collect(),
        )
    }

    /// Whether a change to `other` is relevant to a dependency on `self`.
    /// The wildcard on either side always intersects.
    pub fn intersects(&self, other: &TableSet) -> bool {
        match (self, other) {
            (TableSet::All, _) | (_, TableSet::All) => true,
            (TableSet::Named(a), TableSet::Named(b)) => !a.is_disjoint(b),
        }
    }

    /// Fold `other` into `self`. Any wildcard makes the union a wildcard.
    pub fn merge(&mut self, other: TableSet) {
        match (&mut *self, other) {
            (TableSet::All, _) => {}
            (_, TableSet::All) => *self = TableSet::All,
            (TableSet::Named(a), TableSet::Named(b)) => a.extend(b),
        }
    }

    /// Wire form for the peer broadcast message: `["*"]` for the wildcard,
    /// otherwise the sorted table names.
    pub fn to_wire(&self) -> Vec<String> {
        match self {
            TableSet::All => vec!["*".to_string()],
            TableSet::Named(names) => names.iter().cloned().collect(),
        }
    }

    /// Parse the wire form back; any `"*"` entry means the wildcard.
    pub fn from_wire(names: &[String]) -> Self {
        if names.iter().any(|n| n == "*") {
            TableSet::All
        } else {
            TableSet::named(names)
        }
    }
}

// CTE introduction: `name AS (`. Only meaningful in a statement that has a
// WITH clause; checked before use.
static CTE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:"([^"]+)"|`([^`]+)`|([a-zA-Z_][a-zA-Z0-9_]*))\s*(?:\([^)]*\))?\s+as\s*\("#)
        .unwrap()
});
static HAS_WITH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^\s*with\b").unwrap());
// Table reference after a clause keyword, optionally quoted, optionally
// schema-qualified.
static TABLE_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)\b(?:from|join|update|into)\s+(?:"([^"]+)"|`([^`]+)`|\[([^\]]+)\]|([a-zA-Z_][a-zA-Z0-9_.]*))"#,
    )
    .unwrap()
});

/// Extract the set of base tables referenced by a SQL statement.
///
/// Returns [`TableSet::All`] when no table reference could be found
/// (e.g. `PRAGMA`, or quoting the heuristic cannot see through).
pub fn extract_tables(sql: &str) -> TableSet {
    let stripped = strip_noise(sql);

    let cte_names: BTreeSet<String> = if HAS_WITH.is_match(&stripped) {
        CTE_NAME
            .captures_iter(&stripped)
            .filter_map(|cap| {
                cap.get(1)
                    .or_else(|| cap.get(2))
                    .or_else(|| cap.get(3))
                    .map(|m| m.as_str().to_lowercase())
            })
            .collect()
    } else {
        BTreeSet::new()
    };

    let mut tables = BTreeSet::new();
    for cap in TABLE_REF.captures_iter(&stripped) {
        let Some(raw) = cap
            .get(1)
            .or_else(|| cap.get(2))
            .or_else(|| cap.get(3))
            .or_else(|| cap.get(4))
        else {
            continue;
        };
        // Keep only the final segment of a schema-qualified name.
        let name = raw
            .as_str()
            .rsplit('.')
            .next()
            .unwrap_or(raw.as_str())
            .to_lowercase();
        if name.is_empty() || cte_names.contains(&name) {
            continue;
        }
        tables.insert(name);
    }

    if tables.is_empty() {
        TableSet::All
    } else {
        TableSet::Named(tables)
    }
}

/// Replace comments and string-literal bodies so their contents cannot be
/// mistaken for table references.
///
/// A single pass over the text, so a comment marker inside a string literal
/// (or a quote inside a comment) never swallows the code that follows it.
fn strip_noise(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                // String literal; '' is the escaped quote.
                while let Some(c) = chars.next() {
                    if c == '\'' {
                        if chars.peek() == Some(&'\'') {
                            chars.next();
                        } else {
                            break;
                        }
                    }
                }
                out.push_str("''");
            }
            '-' if chars.peek() == Some(&'-') => {
                // Line comment, through end of line.
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
                out.push(' ');
            }
            '/' if chars.peek() == Some(&'*') => {
                // Block comment; unterminated runs to end of input.
                chars.next();
                let mut prev = '\0';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }
    out
}
