//! Table and column extraction
//!
//! Table extraction walks every relation the parser sees (FROM, JOIN,
//! subqueries, DML targets) and keeps the bare table name, dropping any
//! schema or database qualifier. Names bound by a top-level CTE are not
//! tables and are skipped.

use std::collections::BTreeSet;
use std::ops::ControlFlow;

use sqlparser::ast::{
    visit_expressions, visit_relations, Expr, ObjectName, ObjectNamePart, Query, SetExpr,
    Statement, Visit,
};
use tracing::debug;

use crate::{parse, SqlError};

/// Tables referenced by a statement.
///
/// Never fails: a statement that cannot be parsed yields an empty set so a
/// malformed query never interrupts the caller.
pub fn extract_tables(sql: &str) -> BTreeSet<String> {
    match try_extract_tables(sql) {
        Ok(tables) => tables,
        Err(e) => {
            debug!("Table extraction skipped: {}", e);
            BTreeSet::new()
        }
    }
}

/// Tables referenced by a statement, surfacing parse errors.
pub fn try_extract_tables(sql: &str) -> Result<BTreeSet<String>, SqlError> {
    let statements = parse(sql)?;

    let mut cte_names = BTreeSet::new();
    for statement in &statements {
        if let Statement::Query(query) = statement {
            if let Some(with) = &query.with {
                for cte in &with.cte_tables {
                    cte_names.insert(cte.alias.name.value.clone());
                }
            }
        }
    }

    let mut tables = BTreeSet::new();
    let _ = visit_relations(&statements, |relation: &ObjectName| {
        if let Some(name) = bare_name(relation) {
            if !cte_names.contains(&name) {
                tables.insert(name);
            }
        }
        ControlFlow::<()>::Continue(())
    });

    Ok(tables)
}

/// Columns referenced by WHERE, JOIN, ORDER BY and GROUP BY clauses of a
/// query. Qualifiers are dropped (`f.film_id` becomes `film_id`).
pub fn filter_columns(sql: &str) -> Result<BTreeSet<String>, SqlError> {
    let statements = parse(sql)?;

    let mut columns = BTreeSet::new();
    for statement in &statements {
        if let Statement::Query(query) = statement {
            collect_query_columns(query, &mut columns);
        }
    }

    Ok(columns)
}

fn bare_name(name: &ObjectName) -> Option<String> {
    name.0
        .last()
        .and_then(ObjectNamePart::as_ident)
        .map(|ident| ident.value.clone())
}

fn collect_query_columns(query: &Query, out: &mut BTreeSet<String>) {
    collect_identifiers(&query.order_by, out);
    collect_set_expr_columns(&query.body, out);
}

fn collect_set_expr_columns(body: &SetExpr, out: &mut BTreeSet<String>) {
    match body {
        SetExpr::Select(select) => {
            collect_identifiers(&select.selection, out);
            collect_identifiers(&select.group_by, out);
            for table in &select.from {
                for join in &table.joins {
                    collect_identifiers(&join.join_operator, out);
                }
            }
        }
        SetExpr::Query(query) => collect_query_columns(query, out),
        SetExpr::SetOperation { left, right, .. } => {
            collect_set_expr_columns(left, out);
            collect_set_expr_columns(right, out);
        }
        _ => {}
    }
}

fn collect_identifiers<V: Visit>(node: &V, out: &mut BTreeSet<String>) {
    let _ = visit_expressions(node, |expr: &Expr| {
        match expr {
            Expr::Identifier(ident) => {
                out.insert(ident.value.clone());
            }
            Expr::CompoundIdentifier(parts) => {
                if let Some(last) = parts.last() {
                    out.insert(last.value.clone());
                }
            }
            _ => {}
        }
        ControlFlow::<()>::Continue(())
    });
}
