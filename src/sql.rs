use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use thiserror::Error;
use ulid::Ulid;

use crate::engine::LedgerError;
use crate::model::*;
use crate::seatmap::{parse_seat_list, SeatId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    Succeeded,
    Declined,
}

/// Parsed command from SQL input.
///
/// Columns are positional, in the order shown in each table's INSERT:
/// `events (id, title, seats_per_row, tiers)`, `bookings (event_id, tier, seats)`,
/// `payments (booking_id, token, outcome)`.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertEvent {
        event: Event,
    },
    DeleteEvent {
        id: EventId,
    },
    SelectEvents,
    InsertBooking {
        event_id: EventId,
        tier: String,
        seats: Vec<SeatId>,
    },
    DeleteBooking {
        id: BookingId,
    },
    SelectBookings {
        event_id: Option<EventId>,
    },
    InsertPayment {
        booking_id: BookingId,
        token: String,
        outcome: PaymentOutcome,
    },
    SelectAvailability {
        event_id: EventId,
    },
    SelectSeats {
        event_id: EventId,
    },
    SelectOccupancy {
        event_id: EventId,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(first) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match first {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Insert,
    Delete,
    Select,
}

/// Kind and target table of a statement, without evaluating any values, so it also
/// works on prepared statements that still carry `$N` placeholders.
pub fn statement_target(sql: &str) -> Result<(StatementKind, String), SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    match stmts.first() {
        None => Err(SqlError::Empty),
        Some(Statement::Insert(insert)) => Ok((StatementKind::Insert, insert_table_name(insert)?)),
        Some(Statement::Delete(delete)) => Ok((StatementKind::Delete, delete_table_name(delete)?)),
        Some(Statement::Query(query)) => match query.body.as_ref() {
            SetExpr::Select(select) => {
                let from = select
                    .from
                    .first()
                    .ok_or_else(|| SqlError::Parse("SELECT without FROM".into()))?;
                Ok((StatementKind::Select, table_factor_name(&from.relation)?))
            }
            _ => Err(SqlError::Unsupported("non-SELECT query".into())),
        },
        Some(other) => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "events" => {
            if values.len() < 4 {
                return Err(SqlError::WrongArity("events", 4, values.len()));
            }
            let tiers_json = parse_string_expr(&values[3])?;
            let tiers: Vec<TicketTier> = serde_json::from_str(&tiers_json)
                .map_err(|e| SqlError::Parse(format!("bad tiers JSON: {e}")))?;
            let mut event = Event::new(parse_string_expr(&values[0])?, parse_string_expr(&values[1])?, tiers);
            if let Some(seats_per_row) = parse_u16_or_null(&values[2])? {
                event.seats_per_row = seats_per_row;
            }
            Ok(Command::InsertEvent { event })
        }
        "bookings" => {
            if values.len() < 3 {
                return Err(SqlError::WrongArity("bookings", 3, values.len()));
            }
            Ok(Command::InsertBooking {
                event_id: parse_string_expr(&values[0])?,
                tier: parse_string_expr(&values[1])?,
                seats: parse_seat_list(&parse_string_expr(&values[2])?)?,
            })
        }
        "payments" => {
            if values.len() < 2 {
                return Err(SqlError::WrongArity("payments", 2, values.len()));
            }
            let outcome = match values.get(2) {
                Some(expr) => parse_outcome(expr)?,
                None => PaymentOutcome::Succeeded,
            };
            Ok(Command::InsertPayment {
                booking_id: parse_ulid_expr(&values[0])?,
                token: parse_string_expr(&values[1])?,
                outcome,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    check_filters(delete.selection.as_ref(), &["id"])?;
    let id = extract_eq_filter(delete.selection.as_ref(), "id").ok_or(SqlError::MissingFilter("id"))?;

    match table.as_str() {
        "events" => Ok(Command::DeleteEvent {
            id: parse_string_expr(id)?,
        }),
        "bookings" => Ok(Command::DeleteBooking {
            id: parse_ulid_expr(id)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;
    let filterable: &[&str] = if table == "events" { &[] } else { &["event_id"] };
    check_filters(select.selection.as_ref(), filterable)?;
    let event_id = extract_eq_filter(select.selection.as_ref(), "event_id")
        .map(parse_string_expr)
        .transpose()?;
    let require_event = |event_id: Option<EventId>| event_id.ok_or(SqlError::MissingFilter("event_id"));

    match table.as_str() {
        "events" => Ok(Command::SelectEvents),
        "bookings" => Ok(Command::SelectBookings { event_id }),
        "availability" => Ok(Command::SelectAvailability {
            event_id: require_event(event_id)?,
        }),
        "seats" => Ok(Command::SelectSeats {
            event_id: require_event(event_id)?,
        }),
        "occupancy" => Ok(Command::SelectOccupancy {
            event_id: require_event(event_id)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Every predicate must be `column = <expr>` on one of `allowed`, joined by ANDs.
/// Anything else is refused.
fn check_filters(selection: Option<&Expr>, allowed: &[&str]) -> Result<(), SqlError> {
    let Some(expr) = selection else {
        return Ok(());
    };
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            check_filters(Some(left.as_ref()), allowed)?;
            check_filters(Some(right.as_ref()), allowed)
        }
        Expr::Nested(inner) => check_filters(Some(inner.as_ref()), allowed),
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            ..
        } if expr_column_name(left).is_some_and(|c| allowed.contains(&c.as_str())) => Ok(()),
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

/// Find `column = <expr>` anywhere in a chain of ANDs.
fn extract_eq_filter<'a>(selection: Option<&'a Expr>, column: &str) -> Option<&'a Expr> {
    match selection? {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => extract_eq_filter(Some(left.as_ref()), column)
            .or_else(|| extract_eq_filter(Some(right.as_ref()), column)),
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some(column) => Some(right.as_ref()),
        Expr::Nested(inner) => extract_eq_filter(Some(inner.as_ref()), column),
        _ => None,
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

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
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

/// First row of `VALUES`. One booking or payment per statement.
fn extract_insert_values(insert: &ast::Insert) -> Result<&[Expr], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_string_expr(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(Value::Number(s, _)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string_expr(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
}

fn parse_u16_or_null(expr: &Expr) -> Result<Option<u16>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::Number(s, _)) | Some(Value::SingleQuotedString(s)) => s
            .parse()
            .map(Some)
            .map_err(|e| SqlError::Parse(format!("bad u16 {s}: {e}"))),
        Some(value) => Err(SqlError::Parse(format!("expected number or NULL, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_outcome(expr: &Expr) -> Result<PaymentOutcome, SqlError> {
    let s = parse_string_expr(expr)?;
    match s.to_lowercase().as_str() {
        "succeeded" | "success" | "paid" => Ok(PaymentOutcome::Succeeded),
        "declined" | "failed" => Ok(PaymentOutcome::Declined),
        _ => Err(SqlError::Parse(format!("bad payment outcome: {s}"))),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("{0}: expected {1} values, got {2}")]
    WrongArity(&'static str, usize, usize),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
    /// A well-formed statement carrying an invalid seat list.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}
