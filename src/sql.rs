use chrono::NaiveDate;
use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::engine::grid::{parse_date, parse_hhmm};
use crate::model::*;

/// Parsed command from SQL input. INSERT values are positional in the
/// documented column order; the column list itself is not consulted.
#[derive(Debug, PartialEq)]
pub enum Command {
    /// `SELECT * FROM availability WHERE date = 'YYYY-MM-DD' AND (duration = N | services = 'a,b')`
    SelectAvailability {
        date: NaiveDate,
        duration: Option<i64>,
        services: Option<Vec<String>>,
    },
    /// `(id, date, time, services, customer_name, customer_phone)`
    InsertAppointment {
        id: Ulid,
        date: NaiveDate,
        time: Minute,
        services: Vec<String>,
        customer_name: String,
        customer_phone: String,
    },
    DeleteAppointment {
        id: Ulid,
    },
    SelectAppointments {
        start: Option<Ms>,
        end: Option<Ms>,
    },
    /// `(day_of_week, start_time, end_time, is_active, lunch_start, lunch_end)`
    InsertWorkingHours(WorkingHours),
    SelectWorkingHours,
    /// `(id, start, end, reason)`
    InsertBlockedTime {
        id: Ulid,
        start: Ms,
        end: Ms,
        reason: String,
    },
    DeleteBlockedTime {
        id: Ulid,
    },
    SelectBlockedTimes {
        start: Option<Ms>,
        end: Option<Ms>,
    },
    SelectServices,
    /// `SELECT * FROM customers [WHERE search = '...']`
    SelectCustomers {
        search: Option<String>,
    },
    SelectStats,
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "appointments" => {
            if values.len() < 6 {
                return Err(SqlError::WrongArity("appointments", 6, values.len()));
            }
            Ok(Command::InsertAppointment {
                id: parse_ulid(&values[0])?,
                date: parse_date_expr(&values[1])?,
                time: parse_time_expr(&values[2])?,
                services: split_services(&parse_string(&values[3])?),
                customer_name: parse_string(&values[4])?,
                customer_phone: parse_string(&values[5])?,
            })
        }
        "working_hours" => {
            if values.len() < 4 {
                return Err(SqlError::WrongArity("working_hours", 4, values.len()));
            }
            let day = parse_i64(&values[0])?;
            let day_of_week = u8::try_from(day)
                .map_err(|_| SqlError::InvalidValue(format!("day_of_week {day} out of range")))?;
            let optional_time = |idx: usize| -> Result<Option<Minute>, SqlError> {
                match values.get(idx) {
                    Some(expr) => parse_string_or_null(expr)?
                        .map(|s| parse_hhmm(&s).map_err(|e| SqlError::InvalidValue(e.to_string())))
                        .transpose(),
                    None => Ok(None),
                }
            };
            Ok(Command::InsertWorkingHours(WorkingHours {
                day_of_week,
                start_time: parse_time_expr(&values[1])?,
                end_time: parse_time_expr(&values[2])?,
                is_active: parse_bool(&values[3])?,
                lunch_start: optional_time(4)?,
                lunch_end: optional_time(5)?,
            }))
        }
        "blocked_times" => {
            if values.len() < 3 {
                return Err(SqlError::WrongArity("blocked_times", 3, values.len()));
            }
            let reason = match values.get(3) {
                Some(expr) => parse_string_or_null(expr)?.unwrap_or_default(),
                None => String::new(),
            };
            Ok(Command::InsertBlockedTime {
                id: parse_ulid(&values[0])?,
                start: parse_i64(&values[1])?,
                end: parse_i64(&values[2])?,
                reason,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "appointments" => Ok(Command::DeleteAppointment { id }),
        "blocked_times" => Ok(Command::DeleteBlockedTime { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Equality and range predicates collected from a WHERE clause.
#[derive(Default)]
struct Filters {
    date: Option<NaiveDate>,
    duration: Option<i64>,
    services: Option<Vec<String>>,
    start: Option<Ms>,
    end: Option<Ms>,
    search: Option<String>,
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

    let mut filters = Filters::default();
    if let Some(selection) = &select.selection {
        collect_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        "availability" => {
            let date = filters.date.ok_or(SqlError::MissingFilter("date"))?;
            if filters.duration.is_none() && filters.services.is_none() {
                return Err(SqlError::MissingFilter("duration"));
            }
            Ok(Command::SelectAvailability {
                date,
                duration: filters.duration,
                services: filters.services,
            })
        }
        "appointments" => Ok(Command::SelectAppointments {
            start: filters.start,
            end: filters.end,
        }),
        "blocked_times" => Ok(Command::SelectBlockedTimes {
            start: filters.start,
            end: filters.end,
        }),
        "working_hours" => Ok(Command::SelectWorkingHours),
        "services" => Ok(Command::SelectServices),
        "customers" => Ok(Command::SelectCustomers { search: filters.search }),
        "stats" => Ok(Command::SelectStats),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn collect_filters(expr: &Expr, filters: &mut Filters) -> Result<(), SqlError> {
    let Expr::BinaryOp { left, op, right } = expr else {
        return Ok(());
    };
    let col = expr_column_name(left);
    match (op, col.as_deref()) {
        (ast::BinaryOperator::And, _) => {
            collect_filters(left, filters)?;
            collect_filters(right, filters)?;
        }
        (ast::BinaryOperator::Eq, Some("date")) => filters.date = Some(parse_date_expr(right)?),
        (ast::BinaryOperator::Eq, Some("duration")) => filters.duration = Some(parse_i64(right)?),
        (ast::BinaryOperator::Eq, Some("services")) => {
            filters.services = Some(split_services(&parse_string(right)?));
        }
        (ast::BinaryOperator::Eq, Some("search")) => filters.search = Some(parse_string(right)?),
        (ast::BinaryOperator::GtEq, Some("start")) => filters.start = Some(parse_i64(right)?),
        (ast::BinaryOperator::LtEq, Some("end")) => filters.end = Some(parse_i64(right)?),
        _ => {}
    }
    Ok(())
}

/// `'haircut, beard-trim'` → `["haircut", "beard-trim"]`.
fn split_services(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
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

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    match selection {
        Some(Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        }) if expr_column_name(left).as_deref() == Some("id") => parse_ulid(right),
        _ => Err(SqlError::MissingFilter("id")),
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

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => {
            Ulid::from_string(s).map_err(|e| SqlError::InvalidValue(format!("bad ULID: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected ULID string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_i64(expr)?);
    }
    match extract_value(expr) {
        Some(Value::Number(s, _)) | Some(Value::SingleQuotedString(s)) => s
            .trim()
            .parse()
            .map_err(|e| SqlError::InvalidValue(format!("bad integer {s:?}: {e}"))),
        Some(value) => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_string(expr).map(Some),
    }
}

fn parse_date_expr(expr: &Expr) -> Result<NaiveDate, SqlError> {
    parse_date(&parse_string(expr)?).map_err(|e| SqlError::InvalidValue(e.to_string()))
}

fn parse_time_expr(expr: &Expr) -> Result<Minute, SqlError> {
    parse_hhmm(&parse_string(expr)?).map_err(|e| SqlError::InvalidValue(e.to_string()))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(SqlError::InvalidValue(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        Some(value) => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
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
    #[error("invalid value: {0}")]
    InvalidValue(String),
}
