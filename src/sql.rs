use std::collections::HashMap;

use chrono::{NaiveDate, Weekday};
use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::clock::parse_time_of_day;
use crate::model::*;

/// How a verification request names its challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyTarget {
    Challenge(Ulid),
    Booking(Ulid, ChallengePurpose),
}

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertBusiness {
        id: Ulid,
        name: Option<String>,
        utc_offset: UtcOffsetMinutes,
        min_notice_days: u32,
        max_notice_days: u32,
        slot_minutes: u16,
        lead_time_hours: u32,
        cancel_lead_time_hours: Option<u32>,
    },
    InsertHours {
        business_id: Ulid,
        weekday: Weekday,
        open: TimeOfDay,
        close: TimeOfDay,
    },
    DeleteHours {
        business_id: Ulid,
        weekday: Weekday,
    },
    InsertService {
        id: Ulid,
        business_id: Ulid,
        name: String,
        duration: u32,
    },
    InsertBooking {
        id: Ulid,
        business_id: Ulid,
        date: NaiveDate,
        time: TimeOfDay,
        services: Vec<Ulid>,
        contact: Contact,
        status: BookingStatus,
    },
    InsertWaitlist {
        business_id: Ulid,
        date: NaiveDate,
        selection: WaitlistSelection,
        services: Vec<Ulid>,
        contact: Contact,
    },
    InsertChallenge {
        booking_id: Ulid,
        purpose: ChallengePurpose,
        email: String,
    },
    InsertReschedule {
        token: Ulid,
        date: NaiveDate,
        time: TimeOfDay,
        reason: Option<String>,
    },
    CancelBooking {
        token: Ulid,
    },
    SelectBusinesses,
    SelectServices {
        business_id: Ulid,
    },
    SelectAvailability {
        business_id: Ulid,
        date: NaiveDate,
        services: Vec<Ulid>,
        client_offset: Option<UtcOffsetMinutes>,
    },
    SelectBookings {
        business_id: Ulid,
    },
    SelectWaitlist {
        business_id: Ulid,
        date: Option<NaiveDate>,
    },
    SelectVerification {
        target: VerifyTarget,
        code: String,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Values of one INSERT row keyed by column name. Without a column list the
/// table's default column order applies.
struct Row {
    table: &'static str,
    values: HashMap<String, Expr>,
}

impl Row {
    fn new(table: &'static str, insert: &ast::Insert, defaults: &[&str]) -> Result<Self, SqlError> {
        let exprs = extract_insert_values(insert)?;
        let names: Vec<String> = if insert.columns.is_empty() {
            defaults.iter().map(|c| c.to_string()).collect()
        } else {
            insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
        };
        if exprs.len() != names.len() {
            return Err(SqlError::WrongArity(table, names.len(), exprs.len()));
        }
        Ok(Self {
            table,
            values: names.into_iter().zip(exprs).collect(),
        })
    }

    fn required(&self, col: &'static str) -> Result<&Expr, SqlError> {
        match self.values.get(col) {
            Some(expr) if !is_null(expr) => Ok(expr),
            _ => Err(SqlError::MissingColumn(self.table, col)),
        }
    }

    fn optional(&self, col: &str) -> Option<&Expr> {
        self.values.get(col).filter(|e| !is_null(e))
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;

    match table.as_str() {
        "businesses" => {
            let row = Row::new(
                "businesses",
                insert,
                &["id", "name", "utc_offset", "min_notice_days", "max_notice_days", "slot_minutes", "lead_time_hours"],
            )?;
            Ok(Command::InsertBusiness {
                id: parse_ulid_expr(row.required("id")?)?,
                name: row.optional("name").map(parse_string_expr).transpose()?,
                utc_offset: parse_i32(row.required("utc_offset")?)?,
                min_notice_days: row.optional("min_notice_days").map(parse_u32).transpose()?.unwrap_or(0),
                max_notice_days: parse_u32(row.required("max_notice_days")?)?,
                slot_minutes: row.optional("slot_minutes").map(parse_u16).transpose()?.unwrap_or(30),
                lead_time_hours: row.optional("lead_time_hours").map(parse_u32).transpose()?.unwrap_or(0),
                cancel_lead_time_hours: row.optional("cancel_lead_time_hours").map(parse_u32).transpose()?,
            })
        }
        "hours" => {
            let row = Row::new("hours", insert, &["business_id", "weekday", "open", "close"])?;
            Ok(Command::InsertHours {
                business_id: parse_ulid_expr(row.required("business_id")?)?,
                weekday: parse_weekday(row.required("weekday")?)?,
                open: parse_time_expr(row.required("open")?)?,
                close: parse_time_expr(row.required("close")?)?,
            })
        }
        "services" => {
            let row = Row::new("services", insert, &["id", "business_id", "name", "duration"])?;
            Ok(Command::InsertService {
                id: parse_ulid_expr(row.required("id")?)?,
                business_id: parse_ulid_expr(row.required("business_id")?)?,
                name: parse_string_expr(row.required("name")?)?,
                duration: parse_u32(row.required("duration")?)?,
            })
        }
        "bookings" => {
            let row = Row::new("bookings", insert, &["id", "business_id", "date", "time", "services", "email"])?;
            let status = match row.optional("status") {
                Some(expr) => parse_string_expr(expr)?
                    .parse()
                    .map_err(|e: crate::engine::EngineError| SqlError::Parse(e.to_string()))?,
                None => BookingStatus::Confirmed,
            };
            Ok(Command::InsertBooking {
                id: parse_ulid_expr(row.required("id")?)?,
                business_id: parse_ulid_expr(row.required("business_id")?)?,
                date: parse_date_expr(row.required("date")?)?,
                time: parse_time_expr(row.required("time")?)?,
                services: parse_ulid_list(row.required("services")?)?,
                contact: parse_contact(&row)?,
                status,
            })
        }
        "waitlist" => {
            let row = Row::new("waitlist", insert, &["business_id", "date", "mode", "slots", "services", "email"])?;
            let mode = parse_string_expr(row.required("mode")?)?;
            let slots = row.optional("slots").map(parse_string_expr).transpose()?;
            Ok(Command::InsertWaitlist {
                business_id: parse_ulid_expr(row.required("business_id")?)?,
                date: parse_date_expr(row.required("date")?)?,
                selection: parse_selection(&mode, slots.as_deref())?,
                services: parse_ulid_list(row.required("services")?)?,
                contact: parse_contact(&row)?,
            })
        }
        "challenges" => {
            let row = Row::new("challenges", insert, &["booking_id", "purpose", "email"])?;
            Ok(Command::InsertChallenge {
                booking_id: parse_ulid_expr(row.required("booking_id")?)?,
                purpose: parse_purpose(row.required("purpose")?)?,
                email: parse_string_expr(row.required("email")?)?,
            })
        }
        "reschedules" => {
            let row = Row::new("reschedules", insert, &["token", "date", "time"])?;
            Ok(Command::InsertReschedule {
                token: parse_ulid_expr(row.required("token")?)?,
                date: parse_date_expr(row.required("date")?)?,
                time: parse_time_expr(row.required("time")?)?,
                reason: row.optional("reason").map(parse_string_expr).transpose()?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = equality_filters(delete.selection.as_ref())?;

    match table.as_str() {
        "bookings" => Ok(Command::CancelBooking {
            token: parse_ulid_expr(filter(&filters, "token")?)?,
        }),
        "hours" => Ok(Command::DeleteHours {
            business_id: parse_ulid_expr(filter(&filters, "business_id")?)?,
            weekday: parse_weekday(filter(&filters, "weekday")?)?,
        }),
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
    let filters = equality_filters(select.selection.as_ref())?;

    match table.as_str() {
        "businesses" => Ok(Command::SelectBusinesses),
        "services" => Ok(Command::SelectServices {
            business_id: parse_ulid_expr(filter(&filters, "business_id")?)?,
        }),
        "availability" => Ok(Command::SelectAvailability {
            business_id: parse_ulid_expr(filter(&filters, "business_id")?)?,
            date: parse_date_expr(filter(&filters, "date")?)?,
            services: parse_ulid_list(filter(&filters, "services")?)?,
            client_offset: filters.get("client_offset").map(parse_i32).transpose()?,
        }),
        "bookings" => Ok(Command::SelectBookings {
            business_id: parse_ulid_expr(filter(&filters, "business_id")?)?,
        }),
        "waitlist" => Ok(Command::SelectWaitlist {
            business_id: parse_ulid_expr(filter(&filters, "business_id")?)?,
            date: filters.get("date").map(parse_date_expr).transpose()?,
        }),
        "verification" => {
            let code = parse_string_expr(filter(&filters, "code")?)?;
            let target = if let Some(id) = filters.get("challenge_id") {
                VerifyTarget::Challenge(parse_ulid_expr(id)?)
            } else {
                VerifyTarget::Booking(
                    parse_ulid_expr(filter(&filters, "booking_id")?)?,
                    parse_purpose(filter(&filters, "purpose")?)?,
                )
            };
            Ok(Command::SelectVerification { target, code })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Collect `col = value` terms joined by AND.
fn equality_filters(selection: Option<&Expr>) -> Result<HashMap<String, Expr>, SqlError> {
    let mut out = HashMap::new();
    if let Some(expr) = selection {
        collect_equalities(expr, &mut out)?;
    }
    Ok(out)
}

fn collect_equalities(expr: &Expr, out: &mut HashMap<String, Expr>) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp { left, op: ast::BinaryOperator::And, right } => {
            collect_equalities(left, out)?;
            collect_equalities(right, out)
        }
        Expr::BinaryOp { left, op: ast::BinaryOperator::Eq, right } => {
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Parse(format!("expected column, got {left}")))?;
            out.insert(col, right.as_ref().clone());
            Ok(())
        }
        Expr::Nested(inner) => collect_equalities(inner, out),
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

fn filter<'a>(filters: &'a HashMap<String, Expr>, col: &'static str) -> Result<&'a Expr, SqlError> {
    filters.get(col).ok_or(SqlError::MissingFilter(col))
}

fn parse_contact(row: &Row) -> Result<Contact, SqlError> {
    Ok(Contact {
        email: parse_string_expr(row.required("email")?)?,
        name: row.optional("name").map(parse_string_expr).transpose()?,
        phone: row.optional("phone").map(parse_string_expr).transpose()?,
    })
}

/// `single` + `'10:00'`, `multiple` + `'10:00,10:30'`, `range` + `'10:00-11:00'`,
/// `all` with no slots.
pub fn parse_selection(mode: &str, slots: Option<&str>) -> Result<WaitlistSelection, SqlError> {
    let need_slots = || slots.ok_or(SqlError::Parse(format!("waitlist mode {mode} needs slots")));
    match mode.trim().to_lowercase().as_str() {
        "single" => Ok(WaitlistSelection::Single(parse_time_str(need_slots()?)?)),
        "multiple" => {
            let times = need_slots()?
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(parse_time_str)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(WaitlistSelection::Multiple(times))
        }
        "range" => {
            let raw = need_slots()?;
            let (a, b) = raw
                .split_once('-')
                .ok_or_else(|| SqlError::Parse(format!("expected start-end range, got {raw:?}")))?;
            Ok(WaitlistSelection::Range(parse_time_str(a)?, parse_time_str(b)?))
        }
        "all" => Ok(WaitlistSelection::All),
        other => Err(SqlError::Parse(format!("unknown waitlist mode: {other}"))),
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
        Some(Value::Number(s, _)) => Ok(s.clone()),
        Some(other) => Err(SqlError::Parse(format!("expected string, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_ulid_list(expr: &Expr) -> Result<Vec<Ulid>, SqlError> {
    parse_string_expr(expr)?
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID {s:?}: {e}"))))
        .collect()
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            Value::SingleQuotedString(s) => s
                .trim()
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Plus,
        expr,
    } = expr
    {
        parse_i64_expr(expr)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u16(expr: &Expr) -> Result<u16, SqlError> {
    let v = parse_i64_expr(expr)?;
    u16::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u16 range")))
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_i32(expr: &Expr) -> Result<i32, SqlError> {
    let v = parse_i64_expr(expr)?;
    i32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of i32 range")))
}

/// Integer minutes since midnight or `'HH:MM'`.
fn parse_time_expr(expr: &Expr) -> Result<TimeOfDay, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) if s.contains(':') => parse_time_str(s),
        _ => TimeOfDay::new(parse_i64_expr(expr)?).map_err(|e| SqlError::Parse(e.to_string())),
    }
}

fn parse_time_str(s: &str) -> Result<TimeOfDay, SqlError> {
    parse_time_of_day(s).map_err(|e| SqlError::Parse(e.to_string()))
}

fn parse_date_expr(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string_expr(expr)?;
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}")))
}

/// 0 (Monday) through 6 (Sunday), or a weekday name.
fn parse_weekday(expr: &Expr) -> Result<Weekday, SqlError> {
    if let Some(Value::SingleQuotedString(s)) = extract_value(expr)
        && s.parse::<i64>().is_err()
    {
        return s
            .trim()
            .parse::<Weekday>()
            .map_err(|_| SqlError::Parse(format!("bad weekday: {s}")));
    }
    let n = parse_i64_expr(expr)?;
    u8::try_from(n)
        .ok()
        .and_then(|n| Weekday::try_from(n).ok())
        .ok_or_else(|| SqlError::Parse(format!("weekday {n} out of range 0..=6")))
}

fn parse_purpose(expr: &Expr) -> Result<ChallengePurpose, SqlError> {
    parse_string_expr(expr)?
        .parse()
        .map_err(|e: crate::engine::EngineError| SqlError::Parse(e.to_string()))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingColumn(&'static str, &'static str),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(t, col) => write!(f, "{t}: missing column {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
