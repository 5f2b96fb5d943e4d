//! Statement splitting and classification.

use serde::Serialize;
use sqlparser::ast::{Query, SetExpr, Statement};
use sqlparser::dialect::RedshiftSqlDialect;
use sqlparser::parser::Parser;
use tracing::debug;

/// Closed set of statement kinds the guard distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatementKind {
    /// Read-only query (`SELECT`, `WITH ... SELECT`, set operations, `VALUES`).
    Select,
    /// Data-modifying DML (`INSERT`, `UPDATE`, `DELETE`, `MERGE`, `COPY`).
    Mutating,
    /// Structural change (`CREATE`, `ALTER`, `DROP`, `TRUNCATE`, `GRANT`,
    /// `REVOKE`, `SELECT ... INTO`).
    Ddl,
    /// Anything else: `SHOW`, `EXPLAIN`, `SET`, transaction control, ...
    Other,
    /// The parser rejected the text.
    Unparseable,
}

impl StatementKind {
    pub fn is_read_only(self) -> bool {
        self == StatementKind::Select
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StatementKind::Select => "SELECT",
            StatementKind::Mutating => "MUTATING",
            StatementKind::Ddl => "DDL",
            StatementKind::Other => "OTHER",
            StatementKind::Unparseable => "UNPARSEABLE",
        }
    }
}

impl std::fmt::Display for StatementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One statement of a batch, rendered back to SQL, with its kind.
#[derive(Debug, Clone, Serialize)]
pub struct ClassifiedStatement {
    pub kind: StatementKind,
    pub text: String,
}

/// The classified statements of one SQL batch, in order.
#[derive(Debug, Clone, Serialize)]
pub struct StatementBatch {
    statements: Vec<ClassifiedStatement>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_error: Option<String>,
}

impl StatementBatch {
    pub fn statements(&self) -> &[ClassifiedStatement] {
        &self.statements
    }

    pub fn kinds(&self) -> Vec<StatementKind> {
        self.statements.iter().map(|s| s.kind).collect()
    }

    pub fn parse_error(&self) -> Option<&str> {
        self.parse_error.as_deref()
    }

    /// True only when the batch holds at least one statement and every
    /// statement is read-only.
    pub fn is_executable(&self) -> bool {
        !self.statements.is_empty() && self.statements.iter().all(|s| s.kind.is_read_only())
    }

    /// The first statement that blocks execution, if any.
    pub fn first_rejected(&self) -> Option<&ClassifiedStatement> {
        self.statements.iter().find(|s| !s.kind.is_read_only())
    }
}

/// Split `sql` into statements and classify each one.
///
/// A parse failure yields a single `Unparseable` entry covering the whole
/// text; a batch that contains no statements at all (only whitespace or
/// comments) yields an empty statement list.
pub fn classify_batch(sql: &str) -> StatementBatch {
    match Parser::parse_sql(&RedshiftSqlDialect {}, sql) {
        Ok(parsed) => {
            let statements = parsed
                .iter()
                .map(|stmt| ClassifiedStatement {
                    kind: classify_statement(stmt),
                    text: stmt.to_string(),
                })
                .collect::<Vec<_>>();
            debug!(
                statements = statements.len(),
                kinds = ?statements.iter().map(|s| s.kind).collect::<Vec<_>>(),
                "Classified SQL batch"
            );
            StatementBatch {
                statements,
                parse_error: None,
            }
        }
        Err(e) => {
            debug!(error = %e, "SQL batch did not parse");
            StatementBatch {
                statements: vec![ClassifiedStatement {
                    kind: StatementKind::Unparseable,
                    text: sql.to_string(),
                }],
                parse_error: Some(e.to_string()),
            }
        }
    }
}

fn classify_statement(stmt: &Statement) -> StatementKind {
    match stmt {
        Statement::Query(query) => classify_query(query),

        Statement::Insert { .. }
        | Statement::Update { .. }
        | Statement::Delete { .. }
        | Statement::Merge { .. }
        | Statement::Copy { .. } => StatementKind::Mutating,

        Statement::CreateTable { .. }
        | Statement::CreateView { .. }
        | Statement::CreateIndex { .. }
        | Statement::CreateSchema { .. }
        | Statement::CreateDatabase { .. }
        | Statement::AlterTable { .. }
        | Statement::Drop { .. }
        | Statement::Truncate { .. }
        | Statement::Grant { .. }
        | Statement::Revoke { .. } => StatementKind::Ddl,

        _ => StatementKind::Other,
    }
}

fn classify_query(query: &Query) -> StatementKind {
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            let kind = classify_query(&cte.query);
            if !kind.is_read_only() {
                return kind;
            }
        }
    }
    classify_set_expr(&query.body)
}

fn classify_set_expr(expr: &SetExpr) -> StatementKind {
    match expr {
        // SELECT ... INTO creates a table.
        SetExpr::Select(select) if select.into.is_some() => StatementKind::Ddl,
        SetExpr::Select(_) => StatementKind::Select,
        SetExpr::Query(query) => classify_query(query),
        SetExpr::SetOperation { left, right, .. } => {
            let left = classify_set_expr(left);
            if !left.is_read_only() {
                return left;
            }
            classify_set_expr(right)
        }
        SetExpr::Values(_) | SetExpr::Table(_) => StatementKind::Select,
        SetExpr::Insert(_) | SetExpr::Update(_) => StatementKind::Mutating,
        #[allow(unreachable_patterns)]
        _ => StatementKind::Other,
    }
}
