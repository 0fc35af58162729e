use super::types::Classification;
use regex::Regex;
use std::sync::LazyLock;

static LEADING_SQL_KEYWORD: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(SELECT|INSERT|UPDATE|DELETE|WITH|CREATE|DROP|ALTER)\b").ok()
});

/// Lexical guess at whether `raw_query` already is SQL.
///
/// Only the leading keyword is inspected; misclassification is surfaced later
/// by the executor.
pub fn classify(raw_query: &str) -> Classification {
    let is_sql = LEADING_SQL_KEYWORD
        .as_ref()
        .is_some_and(|re| re.is_match(raw_query));
    if is_sql {
        Classification::Sql(raw_query.to_owned())
    } else {
        Classification::NaturalLanguage
    }
}
