use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, TableWithJoins, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::limits::MAX_PAYMENT_TOKEN_LEN;
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertProperty(NewProperty),
    UpdateProperty {
        id: Ulid,
        changes: PropertyChanges,
    },
    DeleteProperty {
        id: Ulid,
    },
    SelectProperty {
        id: Ulid,
    },
    InsertReservation {
        reservation: NewReservation,
        payment_token: String,
    },
    UpdateReservation {
        id: Ulid,
        reservation_from: Option<Ms>,
        reservation_to: Option<Ms>,
    },
    DeleteReservation {
        id: Ulid,
    },
    SelectReservation {
        id: Ulid,
    },
    /// Cascade for a user removed upstream.
    DeleteUser {
        id: Ulid,
    },
}

/// Positional order of `INSERT INTO properties VALUES (...)`; the first five
/// are required.
const PROPERTY_COLUMNS: [&str; 13] = [
    "id",
    "name",
    "price_per_night",
    "available_from",
    "available_to",
    "available",
    "cancellation_policy",
    "latitude",
    "longitude",
    "deposit",
    "cancellation_fee_per_night",
    "description",
    "address",
];

const RESERVATION_COLUMNS: [&str; 5] = [
    "id",
    "property_id",
    "reservation_from",
    "reservation_to",
    "payment_token",
];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            from,
            selection,
            ..
        } => {
            if from.is_some() {
                return Err(SqlError::Unsupported("UPDATE ... FROM".into()));
            }
            parse_update(table, assignments, selection)
        }
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "properties" => {
            let columns = name_values(insert, values, "properties", &PROPERTY_COLUMNS, 5)?;
            Ok(Command::InsertProperty(parse_new_property(&columns)?))
        }
        "reservations" => {
            let columns = name_values(insert, values, "reservations", &RESERVATION_COLUMNS, 5)?;
            let (mut id, mut property_id, mut from, mut to, mut token) =
                (None, None, None, None, None);
            for (column, value) in &columns {
                match column.as_str() {
                    "id" => id = Some(parse_ulid_expr(value)?),
                    "property_id" => property_id = Some(parse_ulid_expr(value)?),
                    "reservation_from" => from = Some(parse_timestamp_expr(value)?),
                    "reservation_to" => to = Some(parse_timestamp_expr(value)?),
                    "payment_token" => token = Some(parse_string_expr(value)?),
                    other => return Err(SqlError::UnknownColumn(other.to_string())),
                }
            }
            let payment_token = required(token, "payment_token")?;
            if payment_token.is_empty() || payment_token.len() > MAX_PAYMENT_TOKEN_LEN {
                return Err(SqlError::Parse("payment_token must be 1-255 bytes".into()));
            }
            Ok(Command::InsertReservation {
                reservation: NewReservation {
                    id: required(id, "id")?,
                    property_id: required(property_id, "property_id")?,
                    reservation_from: required(from, "reservation_from")?,
                    reservation_to: required(to, "reservation_to")?,
                },
                payment_token,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Pair each VALUES entry with its column: the explicit column list when
/// given, otherwise `positional` in order.
fn name_values(
    insert: &ast::Insert,
    values: Vec<Expr>,
    table: &'static str,
    positional: &[&str],
    required: usize,
) -> Result<Vec<(String, Expr)>, SqlError> {
    if insert.columns.is_empty() {
        if values.len() < required || values.len() > positional.len() {
            let expected = if values.len() < required {
                required
            } else {
                positional.len()
            };
            return Err(SqlError::WrongArity(table, expected, values.len()));
        }
        return Ok(positional
            .iter()
            .map(|c| c.to_string())
            .zip(values)
            .collect());
    }
    if insert.columns.len() != values.len() {
        return Err(SqlError::WrongArity(
            table,
            insert.columns.len(),
            values.len(),
        ));
    }
    Ok(insert
        .columns
        .iter()
        .map(|ident| ident.value.to_lowercase())
        .zip(values)
        .collect())
}

fn required<T>(value: Option<T>, column: &'static str) -> Result<T, SqlError> {
    value.ok_or(SqlError::MissingColumn(column))
}

fn parse_new_property(columns: &[(String, Expr)]) -> Result<NewProperty, SqlError> {
    let (mut id, mut name, mut price, mut from, mut to) = (None, None, None, None, None);
    let (mut latitude, mut longitude) = (None, None);
    let mut rest = PropertyChanges::default();
    for (column, value) in columns {
        match column.as_str() {
            "id" => id = Some(parse_ulid_expr(value)?),
            "name" => name = Some(parse_string_expr(value)?),
            "price_per_night" => price = Some(parse_decimal_expr(value)?),
            "available_from" => from = Some(parse_timestamp_expr(value)?),
            "available_to" => to = Some(parse_timestamp_expr(value)?),
            "available" => rest.available = parse_bool_or_null(value)?,
            "cancellation_policy" => rest.cancellation_policy = parse_policy_or_null(value)?,
            "latitude" => latitude = Some(parse_f64_expr(value)?),
            "longitude" => longitude = Some(parse_f64_expr(value)?),
            "deposit" => rest.deposit = parse_decimal_or_null(value)?,
            "cancellation_fee_per_night" => {
                rest.cancellation_fee_per_night = parse_decimal_or_null(value)?
            }
            "description" => rest.description = parse_string_or_null(value)?,
            "address" => rest.address = parse_string_or_null(value)?,
            other => return Err(SqlError::UnknownColumn(other.to_string())),
        }
    }

    let mut new = NewProperty::new(
        required(id, "id")?,
        required(name, "name")?,
        required(price, "price_per_night")?,
        Span::new(
            required(from, "available_from")?,
            required(to, "available_to")?,
        ),
    );
    new.available = rest.available;
    new.location = location_pair(latitude, longitude)?.unwrap_or_default();
    if let Some(policy) = rest.cancellation_policy {
        new.cancellation_policy = policy;
    }
    if let Some(deposit) = rest.deposit {
        new.deposit = deposit;
    }
    if let Some(fee) = rest.cancellation_fee_per_night {
        new.cancellation_fee_per_night = fee;
    }
    if let Some(description) = rest.description {
        new.description = description;
    }
    if let Some(address) = rest.address {
        new.address = address;
    }
    Ok(new)
}

fn location_pair(
    latitude: Option<f64>,
    longitude: Option<f64>,
) -> Result<Option<Location>, SqlError> {
    match (latitude, longitude) {
        (Some(latitude), Some(longitude)) => Ok(Some(Location {
            latitude,
            longitude,
        })),
        (None, None) => Ok(None),
        _ => Err(SqlError::Parse(
            "latitude and longitude must be set together".into(),
        )),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "properties" => Ok(Command::DeleteProperty { id }),
        "reservations" => Ok(Command::DeleteReservation { id }),
        "users" => Ok(Command::DeleteUser { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;
    let id = extract_where_id(&select.selection)?;

    match table.as_str() {
        "properties" => Ok(Command::SelectProperty { id }),
        "reservations" => Ok(Command::SelectReservation { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    table: &TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    if !table.joins.is_empty() {
        return Err(SqlError::Unsupported("UPDATE with JOIN".into()));
    }
    let table = table_factor_name(&table.relation)?;
    let id = extract_where_id(selection)?;

    let mut columns = Vec::with_capacity(assignments.len());
    for assignment in assignments {
        let column = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name)
                .ok_or_else(|| SqlError::Parse("empty column name".into()))?,
            AssignmentTarget::Tuple(_) => {
                return Err(SqlError::Unsupported("tuple assignment".into()));
            }
        };
        columns.push((column, assignment.value.clone()));
    }
    if columns.is_empty() {
        return Err(SqlError::Parse("UPDATE without assignments".into()));
    }

    match table.as_str() {
        "properties" => parse_property_changes(id, &columns),
        "reservations" => {
            let (mut reservation_from, mut reservation_to) = (None, None);
            for (column, value) in &columns {
                match column.as_str() {
                    "reservation_from" => reservation_from = Some(parse_timestamp_expr(value)?),
                    "reservation_to" => reservation_to = Some(parse_timestamp_expr(value)?),
                    other => return Err(SqlError::UnknownColumn(other.to_string())),
                }
            }
            Ok(Command::UpdateReservation {
                id,
                reservation_from,
                reservation_to,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_property_changes(id: Ulid, assignments: &[(String, Expr)]) -> Result<Command, SqlError> {
    let mut changes = PropertyChanges::default();
    let (mut latitude, mut longitude) = (None, None);
    for (column, value) in assignments {
        match column.as_str() {
            "name" => changes.name = Some(parse_string_expr(value)?),
            "description" => changes.description = Some(parse_string_expr(value)?),
            "address" => changes.address = Some(parse_string_expr(value)?),
            "price_per_night" => changes.price_per_night = Some(parse_decimal_expr(value)?),
            "deposit" => changes.deposit = Some(parse_decimal_expr(value)?),
            "cancellation_fee_per_night" => {
                changes.cancellation_fee_per_night = Some(parse_decimal_expr(value)?)
            }
            "available_from" => changes.available_from = Some(parse_timestamp_expr(value)?),
            "available_to" => changes.available_to = Some(parse_timestamp_expr(value)?),
            "available" => changes.available = parse_bool_or_null(value)?,
            "cancellation_policy" => changes.cancellation_policy = parse_policy_or_null(value)?,
            "latitude" => latitude = Some(parse_f64_expr(value)?),
            "longitude" => longitude = Some(parse_f64_expr(value)?),
            other => return Err(SqlError::UnknownColumn(other.to_string())),
        }
    }
    changes.location = location_pair(latitude, longitude)?;
    Ok(Command::UpdateProperty { id, changes })
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
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid_expr(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
        Expr::Nested(inner) => extract_where_id(&Some(inner.as_ref().clone())),
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

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

/// Peel a leading minus sign: `(negated, inner)`.
fn unary_minus(expr: &Expr) -> (bool, &Expr) {
    match expr {
        Expr::UnaryOp {
            op: ast::UnaryOperator::Minus,
            expr,
        } => (true, expr),
        other => (false, other),
    }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_string_expr(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_decimal_expr(expr: &Expr) -> Result<Decimal, SqlError> {
    let (negated, inner) = unary_minus(expr);
    let d = match extract_value(inner) {
        Some(Value::Number(s, _)) | Some(Value::SingleQuotedString(s)) => Decimal::from_str(s)
            .map_err(|e| SqlError::Parse(format!("bad decimal {s:?}: {e}")))?,
        Some(value) => return Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        None => return Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    };
    Ok(if negated { -d } else { d })
}

fn parse_f64_expr(expr: &Expr) -> Result<f64, SqlError> {
    let (negated, inner) = unary_minus(expr);
    let v: f64 = match extract_value(inner) {
        Some(Value::Number(s, _)) | Some(Value::SingleQuotedString(s)) => s
            .parse()
            .map_err(|e| SqlError::Parse(format!("bad float {s:?}: {e}")))?,
        Some(value) => return Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        None => return Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    };
    Ok(if negated { -v } else { v })
}

/// Unix milliseconds, or an RFC 3339 / `YYYY-MM-DD[ HH:MM:SS]` string read as UTC.
fn parse_timestamp_expr(expr: &Expr) -> Result<Ms, SqlError> {
    let (negated, inner) = unary_minus(expr);
    match extract_value(inner) {
        Some(Value::Number(s, _)) => {
            let ms: i64 = s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad timestamp {s:?}: {e}")))?;
            Ok(if negated { -ms } else { ms })
        }
        Some(Value::SingleQuotedString(s)) if !negated => parse_timestamp_str(s),
        Some(value) => Err(SqlError::Parse(format!("expected timestamp, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

pub fn parse_timestamp_str(s: &str) -> Result<Ms, SqlError> {
    let s = s.trim();
    if let Ok(ms) = s.parse::<i64>() {
        return Ok(ms);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp_millis());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(dt.and_utc().timestamp_millis());
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        && let Some(dt) = date.and_hms_opt(0, 0, 0)
    {
        return Ok(dt.and_utc().timestamp_millis());
    }
    Err(SqlError::Parse(format!("bad timestamp: {s:?}")))
}

fn parse_bool_or_null(expr: &Expr) -> Result<Option<bool>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(Some(*b)),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(Some(true)),
            "false" | "f" | "0" => Ok(Some(false)),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(Some(n != "0")),
        Some(value) => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_decimal_or_null(expr: &Expr) -> Result<Option<Decimal>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_decimal_expr(expr).map(Some)
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_string_expr(expr).map(Some)
}

fn parse_policy_or_null(expr: &Expr) -> Result<Option<CancellationPolicy>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    let s = parse_string_expr(expr)?;
    CancellationPolicy::parse(&s)
        .map(Some)
        .ok_or_else(|| SqlError::Parse(format!("unknown cancellation policy: {s}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
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

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const PID: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    #[test]
    fn parse_insert_property_minimal() {
        let sql = format!(
            "INSERT INTO properties (id, name, price_per_night, available_from, available_to) \
             VALUES ('{ID}', 'Sea view', 100.00, '2024-06-01', '2024-06-30')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertProperty(p) => {
                assert_eq!(p.id.to_string(), ID);
                assert_eq!(p.name, "Sea view");
                assert_eq!(p.price_per_night, dec!(100.00));
                assert_eq!(p.window.start, 1_717_200_000_000);
                assert_eq!(p.window.end, 1_717_200_000_000 + 29 * DAY_MS);
                assert_eq!(p.available, None);
                assert_eq!(p.cancellation_policy, CancellationPolicy::Free);
                assert_eq!(p.location, Location::default());
            }
            other => panic!("expected InsertProperty, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_property_full() {
        let sql = format!(
            "INSERT INTO properties VALUES ('{ID}', 'Loft', '79.90', 0, 86400000, false, 'paid', 59.3293, -18.0686)"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertProperty(p) => {
                assert_eq!(p.price_per_night, dec!(79.90));
                assert_eq!(p.window, Span::new(0, DAY_MS));
                assert_eq!(p.available, Some(false));
                assert_eq!(p.cancellation_policy, CancellationPolicy::Paid);
                assert_eq!(p.location.latitude, 59.3293);
                assert_eq!(p.location.longitude, -18.0686);
            }
            other => panic!("expected InsertProperty, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_property_too_few_values() {
        let sql = format!("INSERT INTO properties VALUES ('{ID}', 'Loft', 10)");
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::WrongArity("properties", 5, 3))
        ));
    }

    #[test]
    fn parse_insert_reservation() {
        let sql = format!(
            "INSERT INTO reservations (id, property_id, reservation_from, reservation_to, payment_token) \
             VALUES ('{ID}', '{PID}', '2024-06-05T00:00:00Z', '2024-06-10 00:00:00', 'tok_visa')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertReservation {
                reservation,
                payment_token,
            } => {
                assert_eq!(reservation.id.to_string(), ID);
                assert_eq!(reservation.property_id.to_string(), PID);
                assert_eq!(
                    reservation.reservation_to - reservation.reservation_from,
                    5 * DAY_MS
                );
                assert_eq!(payment_token, "tok_visa");
            }
            other => panic!("expected InsertReservation, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_reservation_requires_token() {
        let sql = format!("INSERT INTO reservations VALUES ('{ID}', '{PID}', 0, 1)");
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::WrongArity("reservations", 5, 4))
        ));
        let sql = format!("INSERT INTO reservations VALUES ('{ID}', '{PID}', 0, 1, '')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_update_reservation() {
        let sql = format!(
            "UPDATE reservations SET reservation_from = 1000, reservation_to = '2024-06-10' WHERE id = '{ID}';"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::UpdateReservation {
                id: Ulid::from_string(ID).unwrap(),
                reservation_from: Some(1000),
                reservation_to: Some(1_717_977_600_000),
            }
        );
    }

    #[test]
    fn parse_update_reservation_single_column() {
        let sql = format!("update reservations set reservation_to = 5000 where id = '{ID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::UpdateReservation {
                id: Ulid::from_string(ID).unwrap(),
                reservation_from: None,
                reservation_to: Some(5000),
            }
        );
    }

    #[test]
    fn parse_update_property() {
        let sql = format!(
            "UPDATE properties SET name = 'Where, = is quoted', price_per_night = 120.50, \
             available = false, latitude = 1.5, longitude = 2.5 WHERE id = '{ID}'"
        );
        match parse_sql(&sql).unwrap() {
            Command::UpdateProperty { id, changes } => {
                assert_eq!(id.to_string(), ID);
                assert_eq!(changes.name.as_deref(), Some("Where, = is quoted"));
                assert_eq!(changes.price_per_night, Some(dec!(120.50)));
                assert_eq!(changes.available, Some(false));
                assert_eq!(
                    changes.location,
                    Some(Location {
                        latitude: 1.5,
                        longitude: 2.5
                    })
                );
                assert_eq!(changes.available_from, None);
            }
            other => panic!("expected UpdateProperty, got {other:?}"),
        }
    }

    #[test]
    fn parse_update_unknown_column() {
        let sql = format!("UPDATE reservations SET reserved = true WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownColumn(c)) if c == "reserved"));
    }

    #[test]
    fn parse_update_requires_where_id() {
        let sql = "UPDATE properties SET name = 'x'";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("id"))));
    }

    #[test]
    fn parse_update_half_location_rejected() {
        let sql = format!("UPDATE properties SET latitude = 1.0 WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_deletes() {
        let id = Ulid::from_string(ID).unwrap();
        assert_eq!(
            parse_sql(&format!("DELETE FROM properties WHERE id = '{ID}'")).unwrap(),
            Command::DeleteProperty { id }
        );
        assert_eq!(
            parse_sql(&format!("DELETE FROM reservations WHERE id = '{ID}'")).unwrap(),
            Command::DeleteReservation { id }
        );
        assert_eq!(
            parse_sql(&format!("DELETE FROM users WHERE id = '{ID}'")).unwrap(),
            Command::DeleteUser { id }
        );
    }

    #[test]
    fn parse_selects() {
        let id = Ulid::from_string(ID).unwrap();
        assert_eq!(
            parse_sql(&format!("SELECT * FROM properties WHERE id = '{ID}'")).unwrap(),
            Command::SelectProperty { id }
        );
        assert_eq!(
            parse_sql(&format!("SELECT * FROM reservations WHERE id = '{ID}'")).unwrap(),
            Command::SelectReservation { id }
        );
    }

    #[test]
    fn parse_select_without_id_errors() {
        assert!(matches!(
            parse_sql("SELECT * FROM properties"),
            Err(SqlError::MissingFilter("id"))
        ));
    }

    #[test]
    fn timestamp_formats() {
        assert_eq!(parse_timestamp_str("86400000").unwrap(), DAY_MS);
        assert_eq!(parse_timestamp_str("1970-01-02").unwrap(), DAY_MS);
        assert_eq!(parse_timestamp_str("1970-01-02 00:00:00").unwrap(), DAY_MS);
        assert_eq!(parse_timestamp_str("1970-01-02T02:00:00+02:00").unwrap(), DAY_MS);
        assert!(parse_timestamp_str("next tuesday").is_err());
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO bookings VALUES ('{ID}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }

    #[test]
    fn parse_update_schema_qualified_table() {
        let sql = format!(
            "UPDATE public.reservations SET reservation_to = '2024-01-10' WHERE id = '{ID}'"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::UpdateReservation {
                id: Ulid::from_string(ID).unwrap(),
                reservation_from: None,
                reservation_to: Some(1_704_844_800_000),
            }
        );
    }

    #[test]
    fn parse_update_keywords_inside_literals() {
        let sql = format!(
            "UPDATE \"properties\" SET name = 'Stay WHERE the SET sun', \
             description = 'Rooms; quiet' WHERE id = '{ID}'"
        );
        match parse_sql(&sql).unwrap() {
            Command::UpdateProperty { id, changes } => {
                assert_eq!(id.to_string(), ID);
                assert_eq!(changes.name.as_deref(), Some("Stay WHERE the SET sun"));
                assert_eq!(changes.description.as_deref(), Some("Rooms; quiet"));
            }
            other => panic!("expected UpdateProperty, got {other:?}"),
        }
    }

    #[test]
    fn parse_update_listing_terms() {
        let sql = format!(
            "UPDATE properties SET deposit = 50.00, cancellation_fee_per_night = 2.50, \
             address = '1 Main St' WHERE id = '{ID}'"
        );
        match parse_sql(&sql).unwrap() {
            Command::UpdateProperty { changes, .. } => {
                assert_eq!(changes.deposit, Some(dec!(50.00)));
                assert_eq!(changes.cancellation_fee_per_night, Some(dec!(2.50)));
                assert_eq!(changes.address.as_deref(), Some("1 Main St"));
            }
            other => panic!("expected UpdateProperty, got {other:?}"),
        }
    }

    #[test]
    fn parse_update_rejects_tuple_assignment() {
        let sql = format!(
            "UPDATE reservations SET (reservation_from, reservation_to) = (1, 2) WHERE id = '{ID}'"
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_insert_property_columns_by_name() {
        let sql = format!(
            "INSERT INTO properties (address, name, id, available_to, available_from, \
             price_per_night, deposit, description) \
             VALUES ('1 Main St', 'Loft', '{ID}', 86400000, 0, 80, 20.00, 'Top floor')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertProperty(p) => {
                assert_eq!(p.id.to_string(), ID);
                assert_eq!(p.name, "Loft");
                assert_eq!(p.window, Span::new(0, DAY_MS));
                assert_eq!(p.price_per_night, dec!(80));
                assert_eq!(p.deposit, dec!(20.00));
                assert_eq!(p.cancellation_fee_per_night, Decimal::ZERO);
                assert_eq!(p.description, "Top floor");
                assert_eq!(p.address, "1 Main St");
            }
            other => panic!("expected InsertProperty, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_property_missing_required_column() {
        let sql = format!(
            "INSERT INTO properties (id, name, price_per_night, available_from) \
             VALUES ('{ID}', 'Loft', 80, 0)"
        );
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::MissingColumn("available_to"))
        ));
    }

    #[test]
    fn parse_insert_column_count_mismatch() {
        let sql = format!("INSERT INTO reservations (id, property_id) VALUES ('{ID}')");
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::WrongArity("reservations", 2, 1))
        ));
    }
}
