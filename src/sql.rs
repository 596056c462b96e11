use chrono::NaiveDate;
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::calendar::{parse_date, parse_time_of_day};
use crate::model::*;

const DEFAULT_GRANULARITY_MINUTES: u16 = 30;
const DEFAULT_DURATION_MINUTES: u32 = 30;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertSalesperson {
        id: Ulid,
        name: String,
        contact: Option<String>,
        target_share: f64,
        active: bool,
    },
    UpdateSalesperson {
        id: Ulid,
        patch: SalespersonPatch,
    },
    DeleteSalesperson {
        id: Ulid,
    },
    InsertRule {
        id: Ulid,
        salesperson_id: Ulid,
        weekday: u8,
        start_minute: u16,
        end_minute: u16,
        granularity_minutes: u16,
    },
    DeleteRule {
        id: Ulid,
    },
    InsertBlackout {
        id: Ulid,
        salesperson_id: Ulid,
        start: Ms,
        end: Ms,
        reason: Option<String>,
    },
    DeleteBlackout {
        id: Ulid,
    },
    /// `salesperson_id = None` asks the allocator to choose.
    InsertAppointment {
        id: Ulid,
        salesperson_id: Option<Ulid>,
        lead_id: Option<String>,
        scheduled_at: Ms,
        duration_minutes: u32,
        notes: Option<String>,
    },
    RescheduleAppointment {
        id: Ulid,
        scheduled_at: Ms,
    },
    CompleteAppointment {
        id: Ulid,
    },
    CancelAppointment {
        id: Ulid,
    },
    SetUtcOffset {
        minutes: i32,
    },
    SelectSalespeople,
    SelectRules {
        salesperson_id: Ulid,
    },
    SelectBlackouts {
        salesperson_id: Ulid,
    },
    SelectAppointments {
        salesperson_id: Ulid,
    },
    SelectFreeSlots {
        salesperson_id: Ulid,
        day: NaiveDate,
    },
    SelectAvailability {
        salesperson_id: Ulid,
        scheduled_at: Ms,
        exclude_id: Option<Ulid>,
    },
    SelectNextSalesperson,
}

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
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

/// One VALUES row, addressable by column name when the statement lists
/// columns, by position otherwise.
struct Row<'a> {
    table: &'static str,
    columns: Vec<String>,
    values: &'a [Expr],
}

impl<'a> Row<'a> {
    fn get(&self, name: &str, position: usize) -> Option<&'a Expr> {
        if self.columns.is_empty() {
            return self.values.get(position);
        }
        let idx = self.columns.iter().position(|c| c == name)?;
        self.values.get(idx)
    }

    fn require(&self, name: &'static str, position: usize) -> Result<&'a Expr, SqlError> {
        self.get(name, position)
            .ok_or(SqlError::MissingColumn(self.table, name))
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;
    let columns: Vec<String> = insert.columns.iter().map(|c| c.value.to_lowercase()).collect();
    if !columns.is_empty() && columns.len() != values.len() {
        return Err(SqlError::Parse(format!(
            "{} columns but {} values",
            columns.len(),
            values.len()
        )));
    }

    match table.as_str() {
        "salespeople" => {
            let row = Row { table: "salespeople", columns, values: &values };
            let share = row
                .get("share", 3)
                .or_else(|| row.get("target_share", 3));
            Ok(Command::InsertSalesperson {
                id: parse_ulid(row.require("id", 0)?)?,
                name: parse_string(row.require("name", 1)?)?,
                contact: row.get("contact", 2).map(parse_string_or_null).transpose()?.flatten(),
                target_share: share.map(parse_f64).transpose()?.unwrap_or(100.0),
                active: row.get("active", 4).map(parse_bool).transpose()?.unwrap_or(true),
            })
        }
        "weekly_rules" => {
            let row = Row { table: "weekly_rules", columns, values: &values };
            Ok(Command::InsertRule {
                id: parse_ulid(row.require("id", 0)?)?,
                salesperson_id: parse_ulid(row.require("salesperson_id", 1)?)?,
                weekday: parse_u8(row.require("weekday", 2)?)?,
                start_minute: parse_time_expr(row.require("start", 3)?)?,
                end_minute: parse_time_expr(row.require("end", 4)?)?,
                granularity_minutes: row
                    .get("granularity", 5)
                    .map(parse_u16)
                    .transpose()?
                    .unwrap_or(DEFAULT_GRANULARITY_MINUTES),
            })
        }
        "blackouts" => {
            let row = Row { table: "blackouts", columns, values: &values };
            Ok(Command::InsertBlackout {
                id: parse_ulid(row.require("id", 0)?)?,
                salesperson_id: parse_ulid(row.require("salesperson_id", 1)?)?,
                start: parse_i64(row.require("start", 2)?)?,
                end: parse_i64(row.require("end", 3)?)?,
                reason: row.get("reason", 4).map(parse_string_or_null).transpose()?.flatten(),
            })
        }
        "appointments" => {
            let row = Row { table: "appointments", columns, values: &values };
            Ok(Command::InsertAppointment {
                id: parse_ulid(row.require("id", 0)?)?,
                salesperson_id: row.get("salesperson_id", 1).map(parse_ulid_or_null).transpose()?.flatten(),
                lead_id: row.get("lead_id", 2).map(parse_string_or_null).transpose()?.flatten(),
                scheduled_at: parse_i64(row.require("scheduled_at", 3)?)?,
                duration_minutes: row
                    .get("duration", 4)
                    .map(parse_u32)
                    .transpose()?
                    .unwrap_or(DEFAULT_DURATION_MINUTES),
                notes: row.get("notes", 5).map(parse_string_or_null).transpose()?.flatten(),
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    let mut set = Vec::with_capacity(assignments.len());
    for a in assignments {
        let column = match &a.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            AssignmentTarget::Tuple(_) => None,
        }
        .ok_or_else(|| SqlError::Unsupported("tuple assignment".into()))?;
        set.push((column, &a.value));
    }

    match table.as_str() {
        "salespeople" => {
            let id = extract_where_id(selection)?;
            let mut patch = SalespersonPatch::default();
            for (column, value) in set {
                match column.as_str() {
                    "name" => patch.name = Some(parse_string(value)?),
                    "contact" => patch.contact = Some(parse_string_or_null(value)?),
                    "share" | "target_share" => patch.target_share = Some(parse_f64(value)?),
                    "active" => patch.active = Some(parse_bool(value)?),
                    _ => return Err(SqlError::UnknownColumn("salespeople", column.clone())),
                }
            }
            Ok(Command::UpdateSalesperson { id, patch })
        }
        "appointments" => {
            let id = extract_where_id(selection)?;
            match set.as_slice() {
                [(column, value)] if column == "scheduled_at" => Ok(Command::RescheduleAppointment {
                    id,
                    scheduled_at: parse_i64(value)?,
                }),
                [(column, value)] if column == "status" => match parse_string(value)?.as_str() {
                    "completed" => Ok(Command::CompleteAppointment { id }),
                    "cancelled" => Ok(Command::CancelAppointment { id }),
                    other => Err(SqlError::Parse(format!("cannot set status to {other:?}"))),
                },
                _ => Err(SqlError::Unsupported(
                    "appointments accept exactly one of SET scheduled_at or SET status".into(),
                )),
            }
        }
        "settings" => match set.as_slice() {
            [(column, value)] if column == "utc_offset_minutes" => {
                let v = parse_i64(value)?;
                let minutes =
                    i32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of i32 range")))?;
                Ok(Command::SetUtcOffset { minutes })
            }
            _ => Err(SqlError::Unsupported("settings only accept SET utc_offset_minutes".into())),
        },
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "salespeople" => Ok(Command::DeleteSalesperson { id }),
        "weekly_rules" => Ok(Command::DeleteRule { id }),
        "blackouts" => Ok(Command::DeleteBlackout { id }),
        "appointments" => Ok(Command::CancelAppointment { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

#[derive(Default)]
struct Filters {
    salesperson_id: Option<Ulid>,
    day: Option<NaiveDate>,
    scheduled_at: Option<Ms>,
    exclude_id: Option<Ulid>,
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

    let mut filters = Filters::default();
    if let Some(selection) = &select.selection {
        extract_filters(selection, &mut filters)?;
    }
    let salesperson_id = || filters.salesperson_id.ok_or(SqlError::MissingFilter("salesperson_id"));

    match table.as_str() {
        "salespeople" => Ok(Command::SelectSalespeople),
        "next_salesperson" => Ok(Command::SelectNextSalesperson),
        "weekly_rules" => Ok(Command::SelectRules { salesperson_id: salesperson_id()? }),
        "blackouts" => Ok(Command::SelectBlackouts { salesperson_id: salesperson_id()? }),
        "appointments" => Ok(Command::SelectAppointments { salesperson_id: salesperson_id()? }),
        "free_slots" => Ok(Command::SelectFreeSlots {
            salesperson_id: salesperson_id()?,
            day: filters.day.ok_or(SqlError::MissingFilter("day"))?,
        }),
        "availability" => Ok(Command::SelectAvailability {
            salesperson_id: salesperson_id()?,
            scheduled_at: filters.scheduled_at.ok_or(SqlError::MissingFilter("scheduled_at"))?,
            exclude_id: filters.exclude_id,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn extract_filters(expr: &Expr, filters: &mut Filters) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                extract_filters(left, filters)?;
                extract_filters(right, filters)?;
            }
            ast::BinaryOperator::Eq => match expr_column_name(left).as_deref() {
                Some("salesperson_id") => filters.salesperson_id = Some(parse_ulid(right)?),
                Some("day") => {
                    let raw = parse_string(right)?;
                    filters.day = Some(parse_date(&raw).map_err(|e| SqlError::Parse(e.to_string()))?);
                }
                Some("scheduled_at") => filters.scheduled_at = Some(parse_i64(right)?),
                Some("exclude_id") => filters.exclude_id = parse_ulid_or_null(right)?,
                _ => {}
            },
            _ => {}
        },
        Expr::Nested(inner) => extract_filters(inner, filters)?,
        _ => {}
    }
    Ok(())
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
                parse_ulid(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
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

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
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

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_ulid(expr).map(Some)
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_string(expr).map(Some)
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
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
        Ok(-parse_i64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_f64(expr: &Expr) -> Result<f64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .trim()
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad number: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_f64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u8(expr: &Expr) -> Result<u8, SqlError> {
    let v = parse_i64(expr)?;
    u8::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u8 range")))
}

fn parse_u16(expr: &Expr) -> Result<u16, SqlError> {
    let v = parse_i64(expr)?;
    u16::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u16 range")))
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

/// `'HH:MM'` → minutes since midnight.
fn parse_time_expr(expr: &Expr) -> Result<u16, SqlError> {
    let raw = parse_string(expr)?;
    parse_time_of_day(&raw).map_err(|e| SqlError::Parse(e.to_string()))
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
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(&'static str, String),
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
            SqlError::UnknownColumn(t, c) => write!(f, "{t}: unknown column {c}"),
            SqlError::MissingColumn(t, c) => write!(f, "{t}: missing value for {c}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const SP: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    fn ulid(s: &str) -> Ulid {
        Ulid::from_string(s).unwrap()
    }

    #[test]
    fn parse_insert_salesperson_with_columns() {
        let sql = format!(
            "INSERT INTO salespeople (id, name, share, active) VALUES ('{ID}', 'Ana Souza', 70, true)"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertSalesperson {
                id: ulid(ID),
                name: "Ana Souza".into(),
                contact: None,
                target_share: 70.0,
                active: true,
            }
        );
    }

    #[test]
    fn parse_insert_salesperson_positional() {
        let sql = format!("INSERT INTO salespeople VALUES ('{ID}', 'Bruno', '+55 11 90000-0000', 30.5, false)");
        match parse_sql(&sql).unwrap() {
            Command::InsertSalesperson { contact, target_share, active, .. } => {
                assert_eq!(contact.as_deref(), Some("+55 11 90000-0000"));
                assert_eq!(target_share, 30.5);
                assert!(!active);
            }
            other => panic!("expected InsertSalesperson, got {other:?}"),
        }
    }

    #[test]
    fn parse_update_salesperson_patch() {
        let sql = format!("UPDATE salespeople SET share = 40, contact = NULL WHERE id = '{ID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::UpdateSalesperson {
                id: ulid(ID),
                patch: SalespersonPatch {
                    name: None,
                    contact: Some(None),
                    target_share: Some(40.0),
                    active: None,
                },
            }
        );
    }

    #[test]
    fn parse_update_salesperson_unknown_column() {
        let sql = format!("UPDATE salespeople SET colour = 'red' WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownColumn(..))));
    }

    #[test]
    fn parse_insert_weekly_rule() {
        let sql = format!(
            r#"INSERT INTO weekly_rules (id, salesperson_id, weekday, start, "end") VALUES ('{ID}', '{SP}', 1, '09:00', '12:00')"#
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertRule {
                id: ulid(ID),
                salesperson_id: ulid(SP),
                weekday: 1,
                start_minute: 540,
                end_minute: 720,
                granularity_minutes: 30,
            }
        );
    }

    #[test]
    fn parse_insert_weekly_rule_with_granularity_to_midnight() {
        let sql = format!(
            r#"INSERT INTO weekly_rules (id, salesperson_id, weekday, start, "end", granularity) VALUES ('{ID}', '{SP}', 5, '18:00', '24:00', 45)"#
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertRule { end_minute, granularity_minutes, .. } => {
                assert_eq!(end_minute, 1440);
                assert_eq!(granularity_minutes, 45);
            }
            other => panic!("expected InsertRule, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_weekly_rule_bad_time() {
        let sql = format!(
            r#"INSERT INTO weekly_rules (id, salesperson_id, weekday, start, "end") VALUES ('{ID}', '{SP}', 1, '9h', '12:00')"#
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_insert_blackout() {
        let sql = format!(
            r#"INSERT INTO blackouts (id, salesperson_id, start, "end", reason) VALUES ('{ID}', '{SP}', 1000, 2000, 'dentista')"#
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertBlackout {
                id: ulid(ID),
                salesperson_id: ulid(SP),
                start: 1000,
                end: 2000,
                reason: Some("dentista".into()),
            }
        );
    }

    #[test]
    fn parse_insert_appointment_defaults() {
        let sql = format!(
            "INSERT INTO appointments (id, salesperson_id, lead_id, scheduled_at) VALUES ('{ID}', '{SP}', 'crm-991', 1906542000000)"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertAppointment {
                id: ulid(ID),
                salesperson_id: Some(ulid(SP)),
                lead_id: Some("crm-991".into()),
                scheduled_at: 1_906_542_000_000,
                duration_minutes: 30,
                notes: None,
            }
        );
    }

    #[test]
    fn parse_insert_appointment_without_salesperson() {
        let sql = format!(
            "INSERT INTO appointments (id, salesperson_id, lead_id, scheduled_at, duration, notes) VALUES ('{ID}', NULL, 'crm-7', 1906542000000, 60, 'quer visita')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertAppointment { salesperson_id, duration_minutes, notes, .. } => {
                assert_eq!(salesperson_id, None);
                assert_eq!(duration_minutes, 60);
                assert_eq!(notes.as_deref(), Some("quer visita"));
            }
            other => panic!("expected InsertAppointment, got {other:?}"),
        }
    }

    #[test]
    fn parse_missing_required_column() {
        let sql = format!("INSERT INTO appointments (id, lead_id) VALUES ('{ID}', 'crm-7')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingColumn("appointments", "scheduled_at"))));
    }

    #[test]
    fn parse_appointment_updates() {
        let sql = format!("UPDATE appointments SET scheduled_at = 1906545600000 WHERE id = '{ID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::RescheduleAppointment { id: ulid(ID), scheduled_at: 1_906_545_600_000 }
        );

        let sql = format!("UPDATE appointments SET status = 'completed' WHERE id = '{ID}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::CompleteAppointment { id: ulid(ID) });

        let sql = format!("UPDATE appointments SET status = 'no_show' WHERE id = '{ID}'");
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn parse_delete_appointment_is_cancel() {
        let sql = format!("DELETE FROM appointments WHERE id = '{ID}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::CancelAppointment { id: ulid(ID) });
    }

    #[test]
    fn parse_deletes() {
        let cases = [
            ("salespeople", Command::DeleteSalesperson { id: ulid(ID) }),
            ("weekly_rules", Command::DeleteRule { id: ulid(ID) }),
            ("blackouts", Command::DeleteBlackout { id: ulid(ID) }),
        ];
        for (table, expected) in cases {
            let sql = format!("DELETE FROM {table} WHERE id = '{ID}'");
            assert_eq!(parse_sql(&sql).unwrap(), expected);
        }
    }

    #[test]
    fn parse_delete_requires_id() {
        assert!(matches!(
            parse_sql("DELETE FROM blackouts"),
            Err(SqlError::MissingFilter("id"))
        ));
    }

    #[test]
    fn parse_select_free_slots() {
        let sql = format!("SELECT * FROM free_slots WHERE salesperson_id = '{SP}' AND day = '2030-06-03'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectFreeSlots {
                salesperson_id: ulid(SP),
                day: NaiveDate::from_ymd_opt(2030, 6, 3).unwrap(),
            }
        );
    }

    #[test]
    fn parse_select_free_slots_bad_day() {
        let sql = format!("SELECT * FROM free_slots WHERE salesperson_id = '{SP}' AND day = '03/06/2030'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
        let sql = format!("SELECT * FROM free_slots WHERE salesperson_id = '{SP}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingFilter("day"))));
    }

    #[test]
    fn parse_select_availability_with_exclude() {
        let sql = format!(
            "SELECT * FROM availability WHERE salesperson_id = '{SP}' AND scheduled_at = 1906542000000 AND exclude_id = '{ID}'"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectAvailability {
                salesperson_id: ulid(SP),
                scheduled_at: 1_906_542_000_000,
                exclude_id: Some(ulid(ID)),
            }
        );
    }

    #[test]
    fn parse_simple_selects() {
        assert_eq!(parse_sql("SELECT * FROM salespeople").unwrap(), Command::SelectSalespeople);
        assert_eq!(parse_sql("SELECT * FROM next_salesperson").unwrap(), Command::SelectNextSalesperson);
        let sql = format!("SELECT * FROM appointments WHERE salesperson_id = '{SP}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectAppointments { salesperson_id: ulid(SP) }
        );
        assert!(matches!(
            parse_sql("SELECT * FROM weekly_rules"),
            Err(SqlError::MissingFilter("salesperson_id"))
        ));
    }

    #[test]
    fn parse_set_utc_offset() {
        assert_eq!(
            parse_sql("UPDATE settings SET utc_offset_minutes = -180").unwrap(),
            Command::SetUtcOffset { minutes: -180 }
        );
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO foobar (id) VALUES ('{ID}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn parse_multi_row_insert_rejected() {
        let sql = format!("INSERT INTO salespeople (id, name) VALUES ('{ID}', 'A'), ('{SP}', 'B')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
