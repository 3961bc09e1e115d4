use chrono::NaiveDate;
use sqlparser::ast::{
    self, AssignmentTarget, BinaryOperator, Expr, ObjectNamePart, SelectItem, SetExpr, Statement,
    TableFactor, TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::model::*;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    CreateBooking {
        request: CreateRequest,
        returning: bool,
    },
    ExtendBooking {
        request: ExtendRequest,
        returning: bool,
    },
    SelectBookings {
        guest_name: Option<String>,
        unit_id: Option<String>,
    },
    SelectAvailability {
        unit_id: String,
        guest_name: String,
        check_in: Day,
        nights: u32,
    },
    /// A `SELECT` with no `FROM`, such as a pool's `SELECT 1`.
    Health,
}

/// Columns a statement answers with. Decided from the statement's kind, its
/// table and RETURNING alone, so it is known before parameters are bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    Empty,
    Bookings,
    Availability,
    Health,
}

fn parse_single(sql: &str) -> Result<Statement, SqlError> {
    let dialect = PostgreSqlDialect {};
    let mut stmts =
        Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    match stmts.len() {
        0 => Err(SqlError::Empty),
        1 => Ok(stmts.remove(0)),
        n => Err(SqlError::Unsupported(format!(
            "one statement per query, got {n}"
        ))),
    }
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    match parse_single(sql)? {
        Statement::Insert(insert) => parse_insert(&insert),
        Statement::Update {
            table,
            assignments,
            selection,
            returning,
            ..
        } => parse_update(&table, &assignments, selection.as_ref(), returning.is_some()),
        Statement::Query(query) => parse_select(&query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

pub fn result_shape(sql: &str) -> Result<ResultShape, SqlError> {
    let returning = |yes: bool| {
        if yes {
            ResultShape::Bookings
        } else {
            ResultShape::Empty
        }
    };
    match parse_single(sql)? {
        Statement::Insert(insert) => {
            expect_bookings(insert_table_name(&insert)?)?;
            Ok(returning(insert.returning.is_some()))
        }
        Statement::Update {
            table, returning: r, ..
        } => {
            expect_bookings(table_factor_name(&table.relation)?)?;
            Ok(returning(r.is_some()))
        }
        Statement::Query(query) => match select_table(select_body(&query)?)?.as_deref() {
            None => Ok(ResultShape::Health),
            Some("bookings") => Ok(ResultShape::Bookings),
            Some("availability") => Ok(ResultShape::Availability),
            Some(other) => Err(SqlError::UnknownTable(other.to_string())),
        },
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn expect_bookings(table: String) -> Result<(), SqlError> {
    if table == "bookings" {
        Ok(())
    } else {
        Err(SqlError::UnknownTable(table))
    }
}

const INSERT_COLUMNS: [&str; 4] = ["guest_name", "unit_id", "check_in", "nights"];

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    expect_bookings(insert_table_name(insert)?)?;
    let values = extract_insert_values(insert)?;

    // Explicit column lists may come in any order; without one, values are positional.
    let ordered: Vec<&Expr> = if insert.columns.is_empty() {
        if values.len() != INSERT_COLUMNS.len() {
            return Err(SqlError::WrongArity("bookings", INSERT_COLUMNS.len(), values.len()));
        }
        values.iter().collect()
    } else {
        if insert.columns.len() != values.len() {
            return Err(SqlError::WrongArity("bookings", insert.columns.len(), values.len()));
        }
        let names: Vec<String> = insert.columns.iter().map(|c| c.value.to_lowercase()).collect();
        if let Some(unknown) = names.iter().find(|n| !INSERT_COLUMNS.contains(&n.as_str())) {
            return Err(SqlError::UnknownColumn(unknown.clone()));
        }
        INSERT_COLUMNS
            .iter()
            .map(|col| {
                names
                    .iter()
                    .position(|n| n == col)
                    .map(|i| &values[i])
                    .ok_or(SqlError::MissingColumn(*col))
            })
            .collect::<Result<_, _>>()?
    };

    Ok(Command::CreateBooking {
        request: CreateRequest {
            guest_name: parse_string(ordered[0])?,
            unit_id: parse_string(ordered[1])?,
            check_in: parse_date(ordered[2])?,
            nights: parse_u32(ordered[3])?,
        },
        returning: insert.returning.is_some(),
    })
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: Option<&Expr>,
    returning: bool,
) -> Result<Command, SqlError> {
    expect_bookings(table_factor_name(&table.relation)?)?;

    let [assignment] = assignments else {
        return Err(SqlError::Unsupported(
            "UPDATE bookings must set exactly `nights = nights + N`".into(),
        ));
    };
    let target = match &assignment.target {
        AssignmentTarget::ColumnName(name) => object_name_last(name),
        _ => None,
    };
    if target.as_deref() != Some("nights") {
        return Err(SqlError::Unsupported(
            "UPDATE bookings can only change nights".into(),
        ));
    }
    let additional_nights = parse_nights_increment(&assignment.value)?;

    let mut filters = Filters::default();
    if let Some(selection) = selection {
        filters.collect(selection)?;
    }
    filters.only_identities()?;

    Ok(Command::ExtendBooking {
        request: ExtendRequest {
            guest_name: filters.guest_name.ok_or(SqlError::MissingFilter("guest_name"))?,
            unit_id: filters.unit_id.ok_or(SqlError::MissingFilter("unit_id"))?,
            additional_nights,
        },
        returning,
    })
}

/// Accepts `nights + N` or `N + nights`.
fn parse_nights_increment(expr: &Expr) -> Result<u32, SqlError> {
    let bad = || SqlError::Unsupported("expected `nights = nights + N`".into());
    match unwrap_expr(expr) {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::Plus,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some("nights") {
                parse_u32(right)
            } else if expr_column_name(right).as_deref() == Some("nights") {
                parse_u32(left)
            } else {
                Err(bad())
            }
        }
        _ => Err(bad()),
    }
}

fn select_body(query: &ast::Query) -> Result<&ast::Select, SqlError> {
    match query.body.as_ref() {
        SetExpr::Select(s) => Ok(s),
        _ => Err(SqlError::Unsupported("non-SELECT query".into())),
    }
}

/// `None` for a `SELECT` without `FROM`.
fn select_table(select: &ast::Select) -> Result<Option<String>, SqlError> {
    match select.from.as_slice() {
        [] => Ok(None),
        [from] if from.joins.is_empty() => table_factor_name(&from.relation).map(Some),
        _ => Err(SqlError::Unsupported("SELECT from more than one table".into())),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = select_body(query)?;
    let Some(table) = select_table(select)? else {
        return Ok(Command::Health);
    };
    if !matches!(select.projection.as_slice(), [SelectItem::Wildcard(_)]) {
        return Err(SqlError::Unsupported(format!("SELECT list for {table} must be *")));
    }

    let mut filters = Filters::default();
    if let Some(selection) = &select.selection {
        filters.collect(selection)?;
    }

    match table.as_str() {
        "bookings" => {
            filters.only_identities()?;
            Ok(Command::SelectBookings {
                guest_name: filters.guest_name,
                unit_id: filters.unit_id,
            })
        }
        "availability" => Ok(Command::SelectAvailability {
            unit_id: filters.unit_id.ok_or(SqlError::MissingFilter("unit_id"))?,
            guest_name: filters.guest_name.ok_or(SqlError::MissingFilter("guest_name"))?,
            check_in: filters.check_in.ok_or(SqlError::MissingFilter("check_in"))?,
            nights: filters.nights.ok_or(SqlError::MissingFilter("nights"))?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Equality filters from a WHERE clause of `col = value` terms joined by AND.
#[derive(Default)]
struct Filters {
    guest_name: Option<String>,
    unit_id: Option<String>,
    check_in: Option<Day>,
    nights: Option<u32>,
}

impl Filters {
    fn collect(&mut self, expr: &Expr) -> Result<(), SqlError> {
        match unwrap_expr(expr) {
            Expr::BinaryOp {
                left,
                op: BinaryOperator::And,
                right,
            } => {
                self.collect(left)?;
                self.collect(right)
            }
            Expr::BinaryOp {
                left,
                op: BinaryOperator::Eq,
                right,
            } => {
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
                match col.as_str() {
                    "guest_name" => self.guest_name = Some(parse_string(right)?),
                    "unit_id" => self.unit_id = Some(parse_string(right)?),
                    "check_in" => self.check_in = Some(parse_date(right)?),
                    "nights" => self.nights = Some(parse_u32(right)?),
                    _ => return Err(SqlError::UnknownColumn(col)),
                }
                Ok(())
            }
            other => Err(SqlError::Unsupported(format!("WHERE {other}"))),
        }
    }

    /// Statements on `bookings` address rows by guest and unit only.
    fn only_identities(&self) -> Result<(), SqlError> {
        if self.check_in.is_some() || self.nights.is_some() {
            return Err(SqlError::Unsupported(
                "bookings can only be filtered by guest_name and unit_id".into(),
            ));
        }
        Ok(())
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<&[Expr], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row),
            _ => Err(SqlError::Unsupported("one booking per INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

/// Strip parentheses and casts such as `'2026-10-17'::date`.
fn unwrap_expr(expr: &Expr) -> &Expr {
    match expr {
        Expr::Nested(inner) | Expr::Cast { expr: inner, .. } => unwrap_expr(inner),
        _ => expr,
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match unwrap_expr(expr) {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match unwrap_expr(expr) {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

/// Identity columns are compared as text, so numeric literals are accepted
/// as their textual form (`unit_id = 1` means unit "1").
fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_date(expr: &Expr) -> Result<Day, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => NaiveDate::parse_from_str(s, DATE_FORMAT)
            .map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}"))),
        Some(value) => Err(SqlError::Parse(format!("expected date string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let text = match extract_value(expr) {
        Some(Value::Number(s, _) | Value::SingleQuotedString(s)) => s,
        Some(value) => return Err(SqlError::Parse(format!("expected number, got {value}"))),
        None => return Err(SqlError::Parse(format!("expected number, got {expr}"))),
    };
    text.trim()
        .parse()
        .map_err(|_| SqlError::Parse(format!("{text} is not a non-negative 32-bit integer")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    WrongArity(&'static str, usize, usize),
    MissingColumn(&'static str),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(col) => write!(f, "missing column: {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
