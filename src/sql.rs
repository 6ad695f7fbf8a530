use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlparser::ast::{
    self, AssignmentTarget, BinaryOperator, Expr, FromTable, ObjectNamePart, SetExpr, Statement,
    TableFactor, TableObject, UnaryOperator, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertCategory {
        id: Ulid,
        name: String,
        description: String,
    },
    UpdateCategory {
        id: Ulid,
        name: Option<String>,
        description: Option<String>,
    },
    DeleteCategory {
        id: Ulid,
    },
    InsertVehicle {
        vehicle: NewVehicle,
    },
    UpdateVehicle {
        id: Ulid,
        changes: VehicleChanges,
    },
    DeleteVehicle {
        id: Ulid,
    },
    InsertReservation {
        reservation: NewReservation,
    },
    /// `UPDATE reservations SET start_date/end_date/notes`. Missing dates
    /// keep their current value.
    RescheduleReservation {
        id: Ulid,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        notes: Option<String>,
    },
    /// `UPDATE reservations SET status = ...`
    TransitionReservation {
        id: Ulid,
        status: ReservationStatus,
    },
    SelectCategories {
        id: Option<Ulid>,
    },
    SelectVehicles {
        id: Option<Ulid>,
        filter: VehicleFilter,
    },
    SelectReservations {
        id: Option<Ulid>,
        filter: ReservationFilter,
    },
    SelectQuote {
        vehicle_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
        exclude: Option<Ulid>,
    },
    SelectDashboard,
    SelectTopVehicles,
    SelectMonthlyRevenue,
    Listen {
        channel: String,
    },
    Unlisten {
        channel: String,
    },
    UnlistenAll,
}

const CATEGORY_COLUMNS: &[&str] = &["id", "name", "description"];
const VEHICLE_COLUMNS: &[&str] = &[
    "id",
    "license_plate",
    "brand",
    "model",
    "year",
    "category_id",
    "transmission",
    "daily_rate",
    "capacity",
    "description",
];
const RESERVATION_COLUMNS: &[&str] = &["id", "vehicle_id", "client", "start_date", "end_date", "notes"];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    if let Some(cmd) = parse_listen(trimmed) {
        return Ok(cmd);
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let stmt = match stmts.as_slice() {
        [] => return Err(SqlError::Empty),
        [stmt] => stmt,
        _ => return Err(SqlError::Unsupported("multiple statements".into())),
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection.as_ref()),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Table a SELECT reads from, if the statement is one. Placeholders are
/// fine here, so this works on unbound prepared statements.
pub fn select_table(sql: &str) -> Option<String> {
    let stmts = Parser::parse_sql(&PostgreSqlDialect {}, sql).ok()?;
    let Some(Statement::Query(query)) = stmts.first() else {
        return None;
    };
    let SetExpr::Select(select) = query.body.as_ref() else {
        return None;
    };
    let from = select.from.first()?;
    table_factor_name(&from.relation).ok()
}

/// LISTEN/UNLISTEN are handled before sqlparser.
fn parse_listen(sql: &str) -> Option<Command> {
    let (keyword, rest) = sql.split_once(char::is_whitespace)?;
    let channel = rest.trim().trim_matches('"').to_string();
    match keyword.to_uppercase().as_str() {
        "LISTEN" => Some(Command::Listen { channel }),
        "UNLISTEN" if channel == "*" => Some(Command::UnlistenAll),
        "UNLISTEN" => Some(Command::Unlisten { channel }),
        _ => None,
    }
}

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let rows = extract_insert_rows(insert)?;
    let [values] = rows.as_slice() else {
        return Err(SqlError::Unsupported("multi-row INSERT".into()));
    };
    let columns: Vec<String> = insert.columns.iter().map(|c| c.value.to_lowercase()).collect();

    match table.as_str() {
        "categories" => {
            let mut row = Row::new("categories", CATEGORY_COLUMNS, &columns, values)?;
            let cmd = Command::InsertCategory {
                id: row.optional("id", parse_ulid)?.unwrap_or_else(Ulid::new),
                name: row.required("name", parse_text)?,
                description: row.optional("description", parse_text)?.unwrap_or_default(),
            };
            row.finish()?;
            Ok(cmd)
        }
        "vehicles" => {
            let mut row = Row::new("vehicles", VEHICLE_COLUMNS, &columns, values)?;
            let vehicle = NewVehicle {
                id: row.optional("id", parse_ulid)?.unwrap_or_else(Ulid::new),
                license_plate: row.required("license_plate", parse_text)?,
                brand: row.required("brand", parse_text)?,
                model: row.required("model", parse_text)?,
                year: row.required("year", parse_int)?,
                category_id: row.required("category_id", parse_ulid)?,
                transmission: row.required("transmission", parse_enum)?,
                daily_rate: row.required("daily_rate", parse_decimal)?,
                capacity: row.required("capacity", parse_int)?,
                description: row.optional("description", parse_text)?.unwrap_or_default(),
            };
            row.finish()?;
            Ok(Command::InsertVehicle { vehicle })
        }
        "reservations" => {
            let mut row = Row::new("reservations", RESERVATION_COLUMNS, &columns, values)?;
            let reservation = NewReservation {
                id: row.optional("id", parse_ulid)?.unwrap_or_else(Ulid::new),
                vehicle_id: row.required("vehicle_id", parse_ulid)?,
                client: row.optional("client", parse_text)?,
                start: row.required("start_date", parse_date)?,
                end: row.required("end_date", parse_date)?,
                notes: row.optional("notes", parse_text)?.unwrap_or_default(),
            };
            row.finish()?;
            Ok(Command::InsertReservation { reservation })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Column → value pairs of one INSERT row or UPDATE SET list. Columns are
/// taken out as they are read; whatever is left over is an error.
struct Row {
    table: &'static str,
    cells: Vec<(String, Expr)>,
}

impl Row {
    fn new(
        table: &'static str,
        default_columns: &[&str],
        columns: &[String],
        values: &[Expr],
    ) -> Result<Self, SqlError> {
        // Without a column list, values fill the table's columns in order.
        let columns: Vec<String> = if columns.is_empty() {
            if values.len() > default_columns.len() {
                return Err(SqlError::WrongArity(table, default_columns.len(), values.len()));
            }
            default_columns[..values.len()].iter().map(|c| c.to_string()).collect()
        } else {
            if columns.len() != values.len() {
                return Err(SqlError::WrongArity(table, columns.len(), values.len()));
            }
            columns.to_vec()
        };
        Ok(Self {
            table,
            cells: columns.into_iter().zip(values.iter().cloned()).collect(),
        })
    }

    fn from_cells(table: &'static str, cells: Vec<(String, Expr)>) -> Self {
        Self { table, cells }
    }

    fn take(&mut self, column: &str) -> Option<Expr> {
        let pos = self.cells.iter().position(|(c, _)| c == column)?;
        Some(self.cells.remove(pos).1)
    }

    /// A present NULL counts as absent.
    fn optional<T>(
        &mut self,
        column: &'static str,
        parse: fn(&Expr) -> Result<T, SqlError>,
    ) -> Result<Option<T>, SqlError> {
        match self.take(column) {
            Some(expr) if is_null(&expr) => Ok(None),
            Some(expr) => parse(&expr).map(Some).map_err(|e| e.in_column(column)),
            None => Ok(None),
        }
    }

    fn required<T>(
        &mut self,
        column: &'static str,
        parse: fn(&Expr) -> Result<T, SqlError>,
    ) -> Result<T, SqlError> {
        self.optional(column, parse)?
            .ok_or(SqlError::MissingColumn(self.table, column))
    }

    fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    fn finish(self) -> Result<(), SqlError> {
        match self.cells.into_iter().next() {
            Some((column, _)) => Err(SqlError::UnknownColumn(self.table, column)),
            None => Ok(()),
        }
    }
}

// ── UPDATE / DELETE ───────────────────────────────────────────

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: Option<&Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    let id = where_id(selection)?;

    let mut cells = Vec::with_capacity(assignments.len());
    for assignment in assignments {
        let column = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name)
                .ok_or_else(|| SqlError::Parse("empty column name".into()))?,
            AssignmentTarget::Tuple(_) => {
                return Err(SqlError::Unsupported("tuple assignment".into()));
            }
        };
        if column == "id" {
            return Err(SqlError::Unsupported("changing id".into()));
        }
        cells.push((column, assignment.value.clone()));
    }

    match table.as_str() {
        "categories" => {
            let mut row = Row::from_cells("categories", cells);
            let cmd = Command::UpdateCategory {
                id,
                name: row.optional("name", parse_text)?,
                description: row.optional("description", parse_text)?,
            };
            row.finish()?;
            Ok(cmd)
        }
        "vehicles" => {
            let mut row = Row::from_cells("vehicles", cells);
            let changes = VehicleChanges {
                license_plate: row.optional("license_plate", parse_text)?,
                brand: row.optional("brand", parse_text)?,
                model: row.optional("model", parse_text)?,
                year: row.optional("year", parse_int)?,
                category_id: row.optional("category_id", parse_ulid)?,
                transmission: row.optional("transmission", parse_enum)?,
                daily_rate: row.optional("daily_rate", parse_decimal)?,
                capacity: row.optional("capacity", parse_int)?,
                description: row.optional("description", parse_text)?,
                status: row.optional("status", parse_enum)?,
            };
            row.finish()?;
            Ok(Command::UpdateVehicle { id, changes })
        }
        "reservations" => {
            let mut row = Row::from_cells("reservations", cells);
            if let Some(status) = row.optional("status", parse_enum)? {
                if !row.is_empty() {
                    return Err(SqlError::Unsupported(
                        "status must be changed on its own".into(),
                    ));
                }
                return Ok(Command::TransitionReservation { id, status });
            }
            let cmd = Command::RescheduleReservation {
                id,
                start: row.optional("start_date", parse_date)?,
                end: row.optional("end_date", parse_date)?,
                notes: row.optional("notes", parse_text)?,
            };
            row.finish()?;
            Ok(cmd)
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = where_id(delete.selection.as_ref())?;

    match table.as_str() {
        "categories" => Ok(Command::DeleteCategory { id }),
        "vehicles" => Ok(Command::DeleteVehicle { id }),
        "reservations" => Err(SqlError::Unsupported(
            "reservations are kept; set status = 'cancelled' instead".into(),
        )),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

/// One `column <op> literal` term of a WHERE clause.
#[derive(Debug)]
struct Predicate {
    column: String,
    op: BinaryOperator,
    value: Expr,
}

impl Predicate {
    fn parse<T>(&self, parse: fn(&Expr) -> Result<T, SqlError>) -> Result<T, SqlError> {
        parse(&self.value).map_err(|e| e.in_column(&self.column))
    }
}

/// Flatten an AND-tree of comparisons. OR and other shapes are refused.
fn collect_predicates(expr: &Expr, out: &mut Vec<Predicate>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_predicates(inner, out),
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            collect_predicates(left, out)?;
            collect_predicates(right, out)
        }
        Expr::BinaryOp { left, op, right } => {
            let column = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter {expr}")))?;
            out.push(Predicate {
                column,
                op: op.clone(),
                value: right.as_ref().clone(),
            });
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

fn predicates(selection: Option<&Expr>) -> Result<Vec<Predicate>, SqlError> {
    let mut out = Vec::new();
    if let Some(expr) = selection {
        collect_predicates(expr, &mut out)?;
    }
    Ok(out)
}

fn where_id(selection: Option<&Expr>) -> Result<Ulid, SqlError> {
    match predicates(selection)?.as_slice() {
        [p] if p.column == "id" && p.op == BinaryOperator::Eq => p.parse(parse_ulid),
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn unsupported_filter(p: &Predicate) -> SqlError {
    SqlError::UnsupportedFilter(format!("{} {}", p.column, p.op))
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
    let preds = predicates(select.selection.as_ref())?;

    match table.as_str() {
        "categories" => {
            let mut id = None;
            for p in &preds {
                match (p.column.as_str(), &p.op) {
                    ("id", BinaryOperator::Eq) => id = Some(p.parse(parse_ulid)?),
                    _ => return Err(unsupported_filter(p)),
                }
            }
            Ok(Command::SelectCategories { id })
        }
        "vehicles" => {
            let mut id = None;
            let mut filter = VehicleFilter::default();
            for p in &preds {
                if p.op != BinaryOperator::Eq {
                    return Err(unsupported_filter(p));
                }
                match p.column.as_str() {
                    "id" => id = Some(p.parse(parse_ulid)?),
                    "category_id" => filter.category_id = Some(p.parse(parse_ulid)?),
                    "transmission" => filter.transmission = Some(p.parse(parse_enum)?),
                    "status" => filter.status = Some(p.parse(parse_enum)?),
                    "search" => filter.search = Some(p.parse(parse_text)?),
                    _ => return Err(unsupported_filter(p)),
                }
            }
            Ok(Command::SelectVehicles { id, filter })
        }
        "reservations" => {
            let mut id = None;
            let mut filter = ReservationFilter::default();
            for p in &preds {
                match (p.column.as_str(), &p.op) {
                    ("id", BinaryOperator::Eq) => id = Some(p.parse(parse_ulid)?),
                    ("status", BinaryOperator::Eq) => filter.status = Some(p.parse(parse_enum)?),
                    ("vehicle_id", BinaryOperator::Eq) => {
                        filter.vehicle_id = Some(p.parse(parse_ulid)?)
                    }
                    ("client", BinaryOperator::Eq) => filter.client = Some(p.parse(parse_text)?),
                    ("search", BinaryOperator::Eq) => filter.search = Some(p.parse(parse_text)?),
                    ("start_date", BinaryOperator::GtEq) => {
                        filter.start_from = Some(p.parse(parse_date)?)
                    }
                    ("end_date", BinaryOperator::LtEq) => {
                        filter.end_until = Some(p.parse(parse_date)?)
                    }
                    _ => return Err(unsupported_filter(p)),
                }
            }
            Ok(Command::SelectReservations { id, filter })
        }
        "quote" => {
            let (mut vehicle_id, mut start, mut end, mut exclude) = (None, None, None, None);
            for p in &preds {
                if p.op != BinaryOperator::Eq {
                    return Err(unsupported_filter(p));
                }
                match p.column.as_str() {
                    "vehicle_id" => vehicle_id = Some(p.parse(parse_ulid)?),
                    "start_date" => start = Some(p.parse(parse_date)?),
                    "end_date" => end = Some(p.parse(parse_date)?),
                    "exclude" => exclude = Some(p.parse(parse_ulid)?),
                    _ => return Err(unsupported_filter(p)),
                }
            }
            Ok(Command::SelectQuote {
                vehicle_id: vehicle_id.ok_or(SqlError::MissingFilter("vehicle_id"))?,
                start: start.ok_or(SqlError::MissingFilter("start_date"))?,
                end: end.ok_or(SqlError::MissingFilter("end_date"))?,
                exclude,
            })
        }
        "dashboard" | "top_vehicles" | "monthly_revenue" => {
            if let Some(p) = preds.first() {
                return Err(unsupported_filter(p));
            }
            Ok(match table.as_str() {
                "dashboard" => Command::SelectDashboard,
                "top_vehicles" => Command::SelectTopVehicles,
                _ => Command::SelectMonthlyRevenue,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
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

fn extract_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) if !values.rows.is_empty() => Ok(values.rows.clone()),
        SetExpr::Values(_) => Err(SqlError::Parse("empty VALUES".into())),
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

/// Literal as text. Numbers keep their source spelling, so decimals stay exact.
fn literal_text(expr: &Expr) -> Result<String, SqlError> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => Ok(s.clone()),
            Value::Boolean(b) => Ok(b.to_string()),
            other => Err(SqlError::Parse(format!("expected literal, got {other}"))),
        },
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } => Ok(format!("-{}", literal_text(expr)?)),
        Expr::Cast { expr, .. } => literal_text(expr),
        other => Err(SqlError::Parse(format!("expected literal, got {other}"))),
    }
}

fn parse_text(expr: &Expr) -> Result<String, SqlError> {
    literal_text(expr)
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = literal_text(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID {s}: {e}")))
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = literal_text(expr)?;
    NaiveDate::parse_from_str(&s, "%Y-%m-%d")
        .map_err(|e| SqlError::Parse(format!("bad date {s} (expected YYYY-MM-DD): {e}")))
}

fn parse_decimal(expr: &Expr) -> Result<Decimal, SqlError> {
    let s = literal_text(expr)?;
    Decimal::from_str(&s).map_err(|e| SqlError::Parse(format!("bad decimal {s}: {e}")))
}

fn parse_int<T: TryFrom<i64>>(expr: &Expr) -> Result<T, SqlError> {
    let s = literal_text(expr)?;
    let v: i64 = s
        .parse()
        .map_err(|e| SqlError::Parse(format!("bad integer {s}: {e}")))?;
    T::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of range")))
}

fn parse_enum<T: FromStr<Err = UnknownVariant>>(expr: &Expr) -> Result<T, SqlError> {
    let s = literal_text(expr)?;
    s.parse().map_err(|e: UnknownVariant| SqlError::Parse(e.to_string()))
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
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
    UnsupportedFilter(String),
}

impl SqlError {
    fn in_column(self, column: &str) -> Self {
        match self {
            SqlError::Parse(msg) => SqlError::Parse(format!("{column}: {msg}")),
            other => other,
        }
    }
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(t, c) => write!(f, "{t}: unknown column {c}"),
            SqlError::MissingColumn(t, c) => write!(f, "{t}: column {c} is required"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::UnsupportedFilter(s) => write!(f, "unsupported filter: {s}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const OTHER: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn insert_category_with_generated_id() {
        let cmd = parse_sql("INSERT INTO categories (name, description) VALUES ('SUV', 'Large')")
            .unwrap();
        match cmd {
            Command::InsertCategory {
                name, description, ..
            } => {
                assert_eq!(name, "SUV");
                assert_eq!(description, "Large");
            }
            _ => panic!("expected InsertCategory, got {cmd:?}"),
        }
    }

    #[test]
    fn insert_vehicle_by_column_name() {
        let sql = format!(
            "INSERT INTO vehicles (daily_rate, id, license_plate, brand, model, year, category_id, transmission, capacity) \
             VALUES (45.90, '{ID}', 'ABC-123', 'Toyota', 'Corolla', 2022, '{OTHER}', 'automatic', 5)"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertVehicle { vehicle } => {
                assert_eq!(vehicle.id.to_string(), ID);
                assert_eq!(vehicle.category_id.to_string(), OTHER);
                assert_eq!(vehicle.daily_rate, "45.90".parse::<Decimal>().unwrap());
                assert_eq!(vehicle.transmission, Transmission::Automatic);
                assert_eq!(vehicle.year, 2022);
                assert_eq!(vehicle.capacity, 5);
                assert_eq!(vehicle.description, "");
            }
            other => panic!("expected InsertVehicle, got {other:?}"),
        }
    }

    #[test]
    fn insert_vehicle_rate_as_string() {
        let sql = format!(
            "INSERT INTO vehicles (license_plate, brand, model, year, category_id, transmission, daily_rate, capacity) \
             VALUES ('X-1', 'Kia', 'Rio', 2023, '{OTHER}', 'manual', '100.00', 5)"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertVehicle { vehicle } => {
                assert_eq!(vehicle.daily_rate, Decimal::new(10000, 2));
            }
            other => panic!("expected InsertVehicle, got {other:?}"),
        }
    }

    #[test]
    fn insert_vehicle_missing_column() {
        let sql = "INSERT INTO vehicles (license_plate, brand) VALUES ('X-1', 'Kia')";
        assert!(matches!(
            parse_sql(sql),
            Err(SqlError::MissingColumn("vehicles", _))
        ));
    }

    #[test]
    fn insert_reservation() {
        let sql = format!(
            "INSERT INTO reservations (vehicle_id, start_date, end_date, notes) \
             VALUES ('{ID}', '2024-01-10', '2024-01-12', 'airport pick-up')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertReservation { reservation } => {
                assert_eq!(reservation.vehicle_id.to_string(), ID);
                assert_eq!(reservation.start, d("2024-01-10"));
                assert_eq!(reservation.end, d("2024-01-12"));
                assert_eq!(reservation.client, None);
                assert_eq!(reservation.notes, "airport pick-up");
            }
            other => panic!("expected InsertReservation, got {other:?}"),
        }
    }

    #[test]
    fn insert_reservation_positional() {
        let sql = format!(
            "INSERT INTO reservations VALUES ('{OTHER}', '{ID}', 'ana', '2024-01-10', '2024-01-12', NULL)"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertReservation { reservation } => {
                assert_eq!(reservation.id.to_string(), OTHER);
                assert_eq!(reservation.client.as_deref(), Some("ana"));
                assert_eq!(reservation.notes, "");
            }
            other => panic!("expected InsertReservation, got {other:?}"),
        }
    }

    #[test]
    fn insert_unknown_column_errors() {
        let sql = "INSERT INTO categories (name, colour) VALUES ('SUV', 'red')";
        assert!(matches!(
            parse_sql(sql),
            Err(SqlError::UnknownColumn("categories", c)) if c == "colour"
        ));
    }

    #[test]
    fn insert_bad_date_errors() {
        let sql = format!(
            "INSERT INTO reservations (vehicle_id, start_date, end_date) VALUES ('{ID}', '10/01/2024', '2024-01-12')"
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn update_vehicle_status_and_rate() {
        let sql = format!(
            "UPDATE vehicles SET status = 'maintenance', daily_rate = 80 WHERE id = '{ID}'"
        );
        match parse_sql(&sql).unwrap() {
            Command::UpdateVehicle { id, changes } => {
                assert_eq!(id.to_string(), ID);
                assert_eq!(changes.status, Some(VehicleStatus::Maintenance));
                assert_eq!(changes.daily_rate, Some(Decimal::from(80)));
                assert_eq!(changes.brand, None);
            }
            other => panic!("expected UpdateVehicle, got {other:?}"),
        }
    }

    #[test]
    fn update_reservation_status_is_transition() {
        let sql = format!("UPDATE reservations SET status = 'cancelled' WHERE id = '{ID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::TransitionReservation {
                id: Ulid::from_string(ID).unwrap(),
                status: ReservationStatus::Cancelled,
            }
        );
    }

    #[test]
    fn update_reservation_dates_is_reschedule() {
        let sql = format!(
            "UPDATE reservations SET start_date = '2024-02-01', end_date = '2024-02-03' WHERE id = '{ID}'"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::RescheduleReservation {
                id: Ulid::from_string(ID).unwrap(),
                start: Some(d("2024-02-01")),
                end: Some(d("2024-02-03")),
                notes: None,
            }
        );
    }

    #[test]
    fn update_reservation_status_with_dates_refused() {
        let sql = format!(
            "UPDATE reservations SET status = 'active', end_date = '2024-02-03' WHERE id = '{ID}'"
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn update_requires_id_filter() {
        assert!(matches!(
            parse_sql("UPDATE categories SET name = 'Van'"),
            Err(SqlError::MissingFilter("id"))
        ));
        assert!(matches!(
            parse_sql("UPDATE categories SET name = 'Van' WHERE name = 'Truck'"),
            Err(SqlError::MissingFilter("id"))
        ));
    }

    #[test]
    fn delete_vehicle_and_category() {
        let cmd = parse_sql(&format!("DELETE FROM vehicles WHERE id = '{ID}'")).unwrap();
        assert!(matches!(cmd, Command::DeleteVehicle { .. }));
        let cmd = parse_sql(&format!("DELETE FROM categories WHERE id = '{ID}'")).unwrap();
        assert!(matches!(cmd, Command::DeleteCategory { .. }));
    }

    #[test]
    fn delete_reservation_refused() {
        let sql = format!("DELETE FROM reservations WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn select_vehicles_with_filters() {
        let sql = format!(
            "SELECT * FROM vehicles WHERE category_id = '{ID}' AND transmission = 'manual' AND search = 'toy'"
        );
        match parse_sql(&sql).unwrap() {
            Command::SelectVehicles { id, filter } => {
                assert_eq!(id, None);
                assert_eq!(filter.category_id, Some(Ulid::from_string(ID).unwrap()));
                assert_eq!(filter.transmission, Some(Transmission::Manual));
                assert_eq!(filter.search.as_deref(), Some("toy"));
                assert_eq!(filter.status, None);
            }
            other => panic!("expected SelectVehicles, got {other:?}"),
        }
    }

    #[test]
    fn select_reservations_date_window() {
        let sql = "SELECT * FROM reservations WHERE status = 'pending' AND start_date >= '2024-01-01' AND end_date <= '2024-01-31'";
        match parse_sql(sql).unwrap() {
            Command::SelectReservations { filter, .. } => {
                assert_eq!(filter.status, Some(ReservationStatus::Pending));
                assert_eq!(filter.start_from, Some(d("2024-01-01")));
                assert_eq!(filter.end_until, Some(d("2024-01-31")));
            }
            other => panic!("expected SelectReservations, got {other:?}"),
        }
    }

    #[test]
    fn select_reservations_wrong_operator() {
        let sql = "SELECT * FROM reservations WHERE start_date <= '2024-01-01'";
        assert!(matches!(parse_sql(sql), Err(SqlError::UnsupportedFilter(_))));
    }

    #[test]
    fn select_or_refused() {
        let sql = "SELECT * FROM vehicles WHERE status = 'available' OR status = 'rented'";
        assert!(parse_sql(sql).is_err());
    }

    #[test]
    fn select_quote() {
        let sql = format!(
            "SELECT * FROM quote WHERE vehicle_id = '{ID}' AND start_date = '2024-01-10' AND end_date = '2024-01-12'"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectQuote {
                vehicle_id: Ulid::from_string(ID).unwrap(),
                start: d("2024-01-10"),
                end: d("2024-01-12"),
                exclude: None,
            }
        );
    }

    #[test]
    fn select_quote_needs_dates() {
        let sql = format!("SELECT * FROM quote WHERE vehicle_id = '{ID}'");
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::MissingFilter("start_date"))
        ));
    }

    #[test]
    fn select_reports() {
        assert_eq!(parse_sql("SELECT * FROM dashboard").unwrap(), Command::SelectDashboard);
        assert_eq!(parse_sql("select * from top_vehicles;").unwrap(), Command::SelectTopVehicles);
        assert_eq!(
            parse_sql("SELECT month, total FROM monthly_revenue").unwrap(),
            Command::SelectMonthlyRevenue
        );
    }

    #[test]
    fn listen_and_unlisten() {
        let chan = format!("vehicle_{ID}");
        assert_eq!(
            parse_sql(&format!("LISTEN {chan};")).unwrap(),
            Command::Listen {
                channel: chan.clone()
            }
        );
        assert_eq!(
            parse_sql(&format!("unlisten \"{chan}\"")).unwrap(),
            Command::Unlisten { channel: chan }
        );
        assert_eq!(parse_sql("UNLISTEN *").unwrap(), Command::UnlistenAll);
    }

    #[test]
    fn unknown_table_errors() {
        let sql = format!("INSERT INTO bookings (id) VALUES ('{ID}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }

    #[test]
    fn select_table_ignores_placeholders() {
        assert_eq!(
            select_table("SELECT * FROM quote WHERE vehicle_id = $1 AND start_date = $2").as_deref(),
            Some("quote")
        );
        assert_eq!(select_table("select * from Vehicles").as_deref(), Some("vehicles"));
        assert_eq!(select_table("DELETE FROM vehicles WHERE id = $1"), None);
    }
}
