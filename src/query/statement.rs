//! Single-statement SQL handling on top of `sqlparser`.

use crate::dataset::SchemaDescriptor;
use serde::Serialize;
use sqlparser::ast::{
    Expr, Query, SelectItem, SetExpr, Statement, TableFactor, Visit as _, Visitor,
    visit_expressions,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::ops::ControlFlow;

/// One SQL statement plus the table it targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlStatement {
    sql: String,
    table_name: String,
}

impl SqlStatement {
    /// Parse `text`, keeping exactly one statement.
    ///
    /// A single statement is kept verbatim; with several, only the first is
    /// kept (re-rendered from the AST) and a warning is logged.
    ///
    /// # Errors
    ///
    /// Returns the parser diagnostic, or a message when `text` holds no
    /// statement at all.
    pub fn parse(text: &str, table_name: &str) -> Result<(Self, Statement), String> {
        let mut statements =
            Parser::parse_sql(&GenericDialect {}, text).map_err(|e| e.to_string())?;
        let count = statements.len();
        if count == 0 {
            return Err("no SQL statement found".to_owned());
        }
        let first = statements.swap_remove(0);

        let sql = if count == 1 {
            text.to_owned()
        } else {
            tracing::warn!(statements = count, "Multiple SQL statements supplied, keeping the first");
            first.to_string()
        };

        Ok((
            Self {
                sql,
                table_name: table_name.to_owned(),
            },
            first,
        ))
    }

    /// Carry user-supplied SQL forward.
    ///
    /// Text that does not parse is kept as-is so the engine's own diagnostic
    /// reaches the caller.
    pub fn from_user(raw: &str, table_name: &str) -> Self {
        Self::parse(raw, table_name)
            .map(|(statement, _)| statement)
            .unwrap_or_else(|_| Self {
                sql: raw.to_owned(),
                table_name: table_name.to_owned(),
            })
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }
}

impl std::fmt::Display for SqlStatement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.sql)
    }
}

fn collect_aliases(body: &SetExpr, aliases: &mut Vec<String>) {
    match body {
        SetExpr::Select(select) => {
            for item in &select.projection {
                if let SelectItem::ExprWithAlias { alias, .. } = item {
                    aliases.push(alias.value.clone());
                }
            }
        }
        SetExpr::SetOperation { left, right, .. } => {
            collect_aliases(left, aliases);
            collect_aliases(right, aliases);
        }
        _ => {}
    }
}

fn contains(names: &[String], name: &str) -> bool {
    names.iter().any(|n| n.eq_ignore_ascii_case(name))
}

/// Names a query may legitimately refer to, gathered while its relations
/// are checked.
#[derive(Default)]
struct Scope {
    ctes: Vec<String>,
    /// Projection aliases from every level, derived tables included.
    aliases: Vec<String>,
    /// Table names and table aliases usable as qualifiers.
    qualifiers: Vec<String>,
}

struct RelationCheck<'a> {
    table_name: &'a str,
    scope: Scope,
}

impl Visitor for RelationCheck<'_> {
    type Break = String;

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<String> {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.scope.ctes.push(cte.alias.name.value.clone());
            }
        }
        collect_aliases(&query.body, &mut self.scope.aliases);
        ControlFlow::Continue(())
    }

    fn pre_visit_table_factor(&mut self, factor: &TableFactor) -> ControlFlow<String> {
        match factor {
            TableFactor::Table {
                name,
                alias,
                args: None,
                ..
            } => {
                let relation = name.0.last().map_or("", |ident| ident.value.as_str());
                if !relation.eq_ignore_ascii_case(self.table_name)
                    && !contains(&self.scope.ctes, relation)
                {
                    return ControlFlow::Break(format!(
                        "query reads from unknown table `{name}`, only `{}` is available",
                        self.table_name
                    ));
                }
                self.scope.qualifiers.push(relation.to_owned());
                if let Some(alias) = alias {
                    self.scope.qualifiers.push(alias.name.value.clone());
                }
                ControlFlow::Continue(())
            }
            TableFactor::Table { name, .. } => {
                ControlFlow::Break(format!("table function `{name}` is not allowed"))
            }
            TableFactor::Derived { alias, .. } => {
                if let Some(alias) = alias {
                    self.scope.qualifiers.push(alias.name.value.clone());
                }
                ControlFlow::Continue(())
            }
            TableFactor::NestedJoin { .. } => ControlFlow::Continue(()),
            other => ControlFlow::Break(format!("unsupported table source `{other}`")),
        }
    }
}

fn scan_relations(statement: &Statement, table_name: &str) -> Result<Scope, String> {
    if !matches!(statement, Statement::Query(_)) {
        return Err(format!("expected a SELECT query, got: {statement}"));
    }
    let mut check = RelationCheck {
        table_name,
        scope: Scope::default(),
    };
    match statement.visit(&mut check) {
        ControlFlow::Break(message) => Err(message),
        ControlFlow::Continue(()) => Ok(check.scope),
    }
}

/// Check that `statement` is a read query whose every table source is
/// `table_name` or one of its own CTEs. Table functions such as
/// `read_csv(...)` and any other table are refused.
///
/// # Errors
///
/// Returns a message naming the first offending table source.
pub fn check_relations(statement: &Statement, table_name: &str) -> Result<(), String> {
    scan_relations(statement, table_name).map(|_| ())
}

/// Check that a generated statement is a read query over `table_name`
/// (or its own CTEs) and only names columns of `schema` or its own aliases.
///
/// In a qualified name such as `d.title` or `location.lat`, a leading part
/// that is a table alias or a schema column vouches for the rest.
///
/// # Errors
///
/// Returns a message naming the first offending relation or identifier.
pub fn check_references(
    statement: &Statement,
    table_name: &str,
    schema: &SchemaDescriptor,
) -> Result<(), String> {
    let scope = scan_relations(statement, table_name)?;
    let known = |name: &str| schema.find(name).is_some() || contains(&scope.aliases, name);

    let identifiers = visit_expressions(statement, |expr| {
        let unknown = match expr {
            Expr::Identifier(ident) => (!known(&ident.value)).then_some(ident),
            Expr::CompoundIdentifier(parts) => match parts.split_last() {
                Some((last, leading)) => {
                    let qualified = leading.iter().any(|part| {
                        schema.find(&part.value).is_some()
                            || contains(&scope.qualifiers, &part.value)
                    });
                    (!qualified && !known(&last.value)).then_some(last)
                }
                None => None,
            },
            _ => None,
        };
        match unknown {
            Some(ident) => {
                ControlFlow::Break(format!("query references unknown column `{}`", ident.value))
            }
            None => ControlFlow::Continue(()),
        }
    });
    if let ControlFlow::Break(message) = identifiers {
        return Err(message);
    }

    Ok(())
}
