use std::collections::HashMap;

use chrono::NaiveDate;
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertMember {
        user_id: Ulid,
        location_id: Ulid,
        role: Role,
    },
    DeleteMember {
        user_id: Ulid,
        location_id: Ulid,
    },
    InsertAmenity {
        amenity: Amenity,
    },
    UpdateAmenity {
        id: Ulid,
        patch: AmenityPatch,
    },
    DeleteAmenity {
        id: Ulid,
    },
    InsertSchedule {
        entry: WeeklySchedule,
    },
    DeleteSchedule {
        amenity_id: Ulid,
        day_of_week: u8,
    },
    InsertReservation {
        request: ReservationRequest,
        returning: bool,
    },
    UpdateReservation {
        id: Ulid,
        change: StatusChange,
    },
    SelectAvailability {
        amenity_id: Ulid,
        date: NaiveDate,
    },
    SelectSlots {
        amenity_id: Ulid,
        date: NaiveDate,
    },
    SelectReservations {
        filter: ReservationFilter,
    },
    SelectAmenities {
        location_id: Option<Ulid>,
    },
    SelectSchedules {
        amenity_id: Ulid,
    },
    Listen {
        channel: String,
    },
    Unlisten {
        channel: String,
    },
    UnlistenAll,
}

/// `UPDATE reservations SET status = ...` decoded into a lifecycle action.
#[derive(Debug, PartialEq)]
pub enum StatusChange {
    Approve { by: Ulid },
    Reject { by: Ulid, reason: Option<String> },
    Cancel { by: Ulid },
}

#[derive(Debug, PartialEq)]
pub enum ReservationFilter {
    Id(Ulid),
    Amenity {
        amenity_id: Ulid,
        date: Option<NaiveDate>,
    },
    User(Ulid),
}

/// `sql` minus a leading ASCII keyword, matched case-insensitively.
fn strip_keyword<'a>(sql: &'a str, keyword: &str) -> Option<&'a str> {
    sql.get(..keyword.len())
        .filter(|head| head.eq_ignore_ascii_case(keyword))
        .map(|_| &sql[keyword.len()..])
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    if let Some(rest) = strip_keyword(trimmed, "LISTEN ") {
        return Ok(Command::Listen { channel: unquote(rest.trim()) });
    }
    if let Some(rest) = strip_keyword(trimmed, "UNLISTEN ") {
        let rest = rest.trim();
        if rest == "*" {
            return Ok(Command::UnlistenAll);
        }
        return Ok(Command::Unlisten { channel: unquote(rest) });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn unquote(s: &str) -> String {
    s.trim_matches('"').to_string()
}

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = insert_row(insert)?;

    match table.as_str() {
        "members" => Ok(Command::InsertMember {
            user_id: require(&values, "user_id", parse_ulid_expr)?,
            location_id: require(&values, "location_id", parse_ulid_expr)?,
            role: match values.get("role") {
                Some(expr) => parse_role(expr)?,
                None => Role::Resident,
            },
        }),
        "amenities" => {
            let id = require(&values, "id", parse_ulid_expr)?;
            let location_id = require(&values, "location_id", parse_ulid_expr)?;
            let name = require(&values, "name", parse_string_expr)?;
            let mut amenity = Amenity::new(id, location_id, name);
            amenity_patch(&values)?.apply(&mut amenity);
            Ok(Command::InsertAmenity { amenity })
        }
        "schedules" => Ok(Command::InsertSchedule {
            entry: WeeklySchedule {
                amenity_id: require(&values, "amenity_id", parse_ulid_expr)?,
                day_of_week: require(&values, "day_of_week", parse_u8)?,
                window: Span {
                    start: require(&values, "start_time", parse_time_expr)?,
                    end: require(&values, "end_time", parse_time_expr)?,
                },
                block_duration_minutes: optional(&values, "block_duration_minutes", parse_u32)?.unwrap_or(60),
            },
        }),
        "reservations" => {
            let date = match values.get("reservation_date").or_else(|| values.get("date")) {
                Some(expr) => parse_date_expr(expr)?,
                None => return Err(SqlError::MissingColumn("reservation_date")),
            };
            let request = ReservationRequest {
                id: optional(&values, "id", parse_ulid_expr)?,
                amenity_id: require(&values, "amenity_id", parse_ulid_expr)?,
                user_id: require(&values, "user_id", parse_ulid_expr)?,
                date,
                start: require(&values, "start_time", parse_time_expr)?,
                end: require(&values, "end_time", parse_time_expr)?,
                attendees: optional(&values, "attendees", parse_u32)?.unwrap_or(1),
                purpose: nullable(&values, "purpose", parse_string_expr)?,
                notes: nullable(&values, "notes", parse_string_expr)?,
            };
            Ok(Command::InsertReservation {
                request,
                returning: insert.returning.is_some(),
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Amenity columns shared by INSERT and UPDATE.
fn amenity_patch(values: &HashMap<String, Expr>) -> Result<AmenityPatch, SqlError> {
    let category = match values.get("category") {
        Some(expr) => {
            let s = parse_string_expr(expr)?;
            Some(AmenityCategory::parse(&s).ok_or_else(|| SqlError::Parse(format!("unknown category: {s}")))?)
        }
        None => None,
    };
    let available_hours = match (values.get("available_from"), values.get("available_until")) {
        (None, None) => None,
        (Some(from), Some(until)) => match (parse_time_or_null(from)?, parse_time_or_null(until)?) {
            (None, None) => Some(None),
            (Some(start), Some(end)) => {
                let span = Span::try_new(start, end)
                    .ok_or_else(|| SqlError::Parse("available_from must be before available_until".into()))?;
                Some(Some(span))
            }
            _ => return Err(SqlError::Parse("available_from and available_until are set together".into())),
        },
        _ => return Err(SqlError::Parse("available_from and available_until are set together".into())),
    };

    Ok(AmenityPatch {
        name: optional(values, "name", parse_string_expr)?,
        category,
        capacity: optional(values, "capacity", parse_u32)?,
        is_paid: optional(values, "is_paid", parse_bool)?,
        hourly_rate_cents: optional(values, "hourly_rate_cents", parse_u64)?,
        min_duration_hours: values.get("min_duration_hours").map(|e| parse_u32_or_null(e)).transpose()?,
        max_duration_hours: values.get("max_duration_hours").map(|e| parse_u32_or_null(e)).transpose()?,
        advance_booking_days: optional(values, "advance_booking_days", parse_u32)?,
        requires_approval: optional(values, "requires_approval", parse_bool)?,
        is_24_hours: optional(values, "is_24_hours", parse_bool)?,
        available_hours,
        block_duration_minutes: optional(values, "block_duration_minutes", parse_u32)?,
        is_active: optional(values, "is_active", parse_bool)?,
    })
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    let mut values = HashMap::new();
    for assignment in assignments {
        let column = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            AssignmentTarget::Tuple(_) => None,
        }
        .ok_or_else(|| SqlError::Unsupported("tuple assignment".into()))?;
        values.insert(column, assignment.value.clone());
    }
    let filters = where_filters(selection)?;
    let id = require_filter(&filters, "id", parse_ulid_expr)?;

    match table.as_str() {
        "amenities" => {
            let patch = amenity_patch(&values)?;
            if patch.is_empty() {
                return Err(SqlError::Parse("nothing to update".into()));
            }
            Ok(Command::UpdateAmenity { id, patch })
        }
        "reservations" => {
            let status = require(&values, "status", parse_string_expr)?;
            let status = ReservationStatus::parse(&status)
                .ok_or_else(|| SqlError::Parse(format!("unknown status: {status}")))?;
            let change = match status {
                ReservationStatus::Approved => StatusChange::Approve {
                    by: require(&values, "approved_by", parse_ulid_expr)?,
                },
                ReservationStatus::Rejected => StatusChange::Reject {
                    by: require(&values, "rejected_by", parse_ulid_expr)?,
                    reason: nullable(&values, "rejection_reason", parse_string_expr)?,
                },
                ReservationStatus::Cancelled => StatusChange::Cancel {
                    by: require(&values, "cancelled_by", parse_ulid_expr)?,
                },
                ReservationStatus::Pending => {
                    return Err(SqlError::Unsupported("reservations never return to pending".into()));
                }
            };
            Ok(Command::UpdateReservation { id, change })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = where_filters(&delete.selection)?;

    match table.as_str() {
        "amenities" => Ok(Command::DeleteAmenity {
            id: require_filter(&filters, "id", parse_ulid_expr)?,
        }),
        "members" => Ok(Command::DeleteMember {
            user_id: require_filter(&filters, "user_id", parse_ulid_expr)?,
            location_id: require_filter(&filters, "location_id", parse_ulid_expr)?,
        }),
        "schedules" => Ok(Command::DeleteSchedule {
            amenity_id: require_filter(&filters, "amenity_id", parse_ulid_expr)?,
            day_of_week: require_filter(&filters, "day_of_week", parse_u8)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;
    let filters = where_filters(&select.selection)?;

    match table.as_str() {
        "availability" => Ok(Command::SelectAvailability {
            amenity_id: require_filter(&filters, "amenity_id", parse_ulid_expr)?,
            date: filter_date(&filters)?.ok_or(SqlError::MissingFilter("reservation_date"))?,
        }),
        "slots" => Ok(Command::SelectSlots {
            amenity_id: require_filter(&filters, "amenity_id", parse_ulid_expr)?,
            date: filter_date(&filters)?.ok_or(SqlError::MissingFilter("reservation_date"))?,
        }),
        "reservations" => {
            let filter = if let Some(expr) = filters.get("id") {
                ReservationFilter::Id(parse_ulid_expr(expr)?)
            } else if let Some(expr) = filters.get("amenity_id") {
                ReservationFilter::Amenity {
                    amenity_id: parse_ulid_expr(expr)?,
                    date: filter_date(&filters)?,
                }
            } else if let Some(expr) = filters.get("user_id") {
                ReservationFilter::User(parse_ulid_expr(expr)?)
            } else {
                return Err(SqlError::MissingFilter("id, amenity_id or user_id"));
            };
            Ok(Command::SelectReservations { filter })
        }
        "amenities" => Ok(Command::SelectAmenities {
            location_id: filters.get("location_id").map(parse_ulid_expr).transpose()?,
        }),
        "schedules" => Ok(Command::SelectSchedules {
            amenity_id: require_filter(&filters, "amenity_id", parse_ulid_expr)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn filter_date(filters: &HashMap<String, Expr>) -> Result<Option<NaiveDate>, SqlError> {
    filters
        .get("reservation_date")
        .or_else(|| filters.get("date"))
        .map(parse_date_expr)
        .transpose()
}

/// Collect `column = value` conjuncts of a WHERE clause.
fn where_filters(selection: &Option<Expr>) -> Result<HashMap<String, Expr>, SqlError> {
    let mut filters = HashMap::new();
    if let Some(expr) = selection {
        collect_eq_filters(expr, &mut filters)?;
    }
    Ok(filters)
}

fn collect_eq_filters(expr: &Expr, filters: &mut HashMap<String, Expr>) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                collect_eq_filters(left, filters)?;
                collect_eq_filters(right, filters)?;
            }
            ast::BinaryOperator::Eq => {
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
                filters.insert(col, (**right).clone());
            }
            _ => return Err(SqlError::Unsupported(format!("operator {op}"))),
        },
        Expr::Nested(inner) => collect_eq_filters(inner, filters)?,
        _ => return Err(SqlError::Unsupported(format!("filter {expr}"))),
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────

fn require<T>(
    values: &HashMap<String, Expr>,
    column: &'static str,
    parse: impl Fn(&Expr) -> Result<T, SqlError>,
) -> Result<T, SqlError> {
    values.get(column).map(parse).ok_or(SqlError::MissingColumn(column))?
}

fn require_filter<T>(
    filters: &HashMap<String, Expr>,
    column: &'static str,
    parse: impl Fn(&Expr) -> Result<T, SqlError>,
) -> Result<T, SqlError> {
    filters.get(column).map(parse).ok_or(SqlError::MissingFilter(column))?
}

fn optional<T>(
    values: &HashMap<String, Expr>,
    column: &str,
    parse: impl Fn(&Expr) -> Result<T, SqlError>,
) -> Result<Option<T>, SqlError> {
    values.get(column).map(parse).transpose()
}

/// Like `optional`, but an explicit NULL also yields `None`.
fn nullable<T>(
    values: &HashMap<String, Expr>,
    column: &str,
    parse: impl Fn(&Expr) -> Result<T, SqlError>,
) -> Result<Option<T>, SqlError> {
    match values.get(column) {
        Some(expr) if is_null(expr) => Ok(None),
        Some(expr) => parse(expr).map(Some),
        None => Ok(None),
    }
}

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
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
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

/// The single VALUES row keyed by the INSERT's column list.
fn insert_row(insert: &ast::Insert) -> Result<HashMap<String, Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    let rows = match body.body.as_ref() {
        SetExpr::Values(values) => &values.rows,
        _ => return Err(SqlError::Parse("expected VALUES".into())),
    };
    let row = match rows.as_slice() {
        [row] => row,
        [] => return Err(SqlError::Parse("empty VALUES".into())),
        _ => return Err(SqlError::Unsupported("multi-row INSERT".into())),
    };
    if insert.columns.is_empty() {
        return Err(SqlError::Parse("INSERT needs an explicit column list".into()));
    }
    if insert.columns.len() != row.len() {
        return Err(SqlError::WrongArity(insert.columns.len(), row.len()));
    }
    Ok(insert
        .columns
        .iter()
        .map(|c| c.value.to_lowercase())
        .zip(row.iter().cloned())
        .collect())
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

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn parse_string_expr(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string_expr(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
}

fn parse_date_expr(expr: &Expr) -> Result<NaiveDate, SqlError> {
    parse_date(&parse_string_expr(expr)?).map_err(SqlError::Parse)
}

fn parse_time_expr(expr: &Expr) -> Result<Minutes, SqlError> {
    parse_time(&parse_string_expr(expr)?).map_err(SqlError::Parse)
}

fn parse_time_or_null(expr: &Expr) -> Result<Option<Minutes>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_time_expr(expr).map(Some)
}

fn parse_role(expr: &Expr) -> Result<Role, SqlError> {
    let s = parse_string_expr(expr)?;
    Role::parse(&s).ok_or_else(|| SqlError::Parse(format!("unknown role: {s}")))
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer {s}: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

fn parse_u8(expr: &Expr) -> Result<u8, SqlError> {
    let v = parse_i64_expr(expr)?;
    u8::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of range")))
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_u64(expr: &Expr) -> Result<u64, SqlError> {
    let v = parse_i64_expr(expr)?;
    u64::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u64 range")))
}

fn parse_u32_or_null(expr: &Expr) -> Result<Option<u32>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_u32(expr).map(Some)
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    /// Column list length vs. VALUES length.
    WrongArity(usize, usize),
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
            SqlError::WrongArity(expected, got) => {
                write!(f, "expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(col) => write!(f, "missing column: {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
