use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use thiserror::Error;

use crate::engine::BookingRequest;
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertRestaurant(Restaurant),
    InsertSector(Sector),
    InsertTable(Table),
    InsertReservation(BookingRequest),
    /// `id` is passed through unparsed; a malformed id names no reservation.
    DeleteReservation {
        id: String,
    },
    SelectAvailability {
        restaurant_id: String,
        sector_id: String,
        date: String,
        party_size: u32,
    },
    SelectSlots {
        restaurant_id: String,
        date: String,
    },
    SelectReservations {
        restaurant_id: String,
        date: String,
        sector_id: Option<String>,
    },
    SelectReservation {
        id: String,
    },
    SelectFloorPlan {
        restaurant_id: String,
        sector_id: String,
        at: Option<String>,
    },
    SelectRestaurants,
    SelectSectors {
        restaurant_id: String,
    },
}

// Column order assumed when an INSERT omits its column list.
const RESTAURANT_COLUMNS: &[&str] = &["id", "name", "timezone", "shifts"];
const SECTOR_COLUMNS: &[&str] = &["id", "restaurant_id", "name"];
const TABLE_COLUMNS: &[&str] = &["id", "sector_id", "name", "min_size", "max_size"];
const RESERVATION_COLUMNS: &[&str] = &[
    "idempotency_key",
    "restaurant_id",
    "sector_id",
    "party_size",
    "start",
    "customer_name",
    "customer_phone",
    "customer_email",
    "notes",
];

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
    let names: Vec<String> = insert.columns.iter().map(|c| c.value.to_lowercase()).collect();

    match table.as_str() {
        "restaurants" => {
            let row = Fields::from_insert("restaurants", RESTAURANT_COLUMNS, &names, values)?;
            Ok(Command::InsertRestaurant(Restaurant {
                id: row.text("id")?,
                name: row.text("name")?,
                timezone: row.text("timezone")?,
                shifts: row.shifts("shifts")?,
            }))
        }
        "sectors" => {
            let row = Fields::from_insert("sectors", SECTOR_COLUMNS, &names, values)?;
            Ok(Command::InsertSector(Sector {
                id: row.text("id")?,
                restaurant_id: row.text("restaurant_id")?,
                name: row.text("name")?,
            }))
        }
        "tables" => {
            let row = Fields::from_insert("tables", TABLE_COLUMNS, &names, values)?;
            Ok(Command::InsertTable(Table {
                id: row.text("id")?,
                sector_id: row.text("sector_id")?,
                name: row.text("name")?,
                min_size: row.u32("min_size")?,
                max_size: row.u32("max_size")?,
            }))
        }
        "reservations" => {
            let row = Fields::from_insert("reservations", RESERVATION_COLUMNS, &names, values)?;
            Ok(Command::InsertReservation(BookingRequest {
                idempotency_key: row.text("idempotency_key")?,
                restaurant_id: row.text("restaurant_id")?,
                sector_id: row.text("sector_id")?,
                party_size: row.u32("party_size")?,
                start: row.text("start")?,
                customer: Customer {
                    name: row.text("customer_name")?,
                    phone: row.text("customer_phone")?,
                    email: row.text("customer_email")?,
                },
                notes: row.opt_text("notes")?,
            }))
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    if table != "reservations" {
        return Err(SqlError::UnknownTable(table));
    }
    let filters = Fields::from_filters("reservations", delete.selection.as_ref())?;
    Ok(Command::DeleteReservation {
        id: filters.text("id")?,
    })
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
    let selection = select.selection.as_ref();

    match table.as_str() {
        "availability" => {
            let f = Fields::from_filters("availability", selection)?;
            Ok(Command::SelectAvailability {
                restaurant_id: f.text("restaurant_id")?,
                sector_id: f.text("sector_id")?,
                date: f.text("date")?,
                party_size: f.u32("party_size")?,
            })
        }
        "slots" => {
            let f = Fields::from_filters("slots", selection)?;
            Ok(Command::SelectSlots {
                restaurant_id: f.text("restaurant_id")?,
                date: f.text("date")?,
            })
        }
        "reservations" => {
            let f = Fields::from_filters("reservations", selection)?;
            if f.get("id").is_some() {
                return Ok(Command::SelectReservation { id: f.text("id")? });
            }
            Ok(Command::SelectReservations {
                restaurant_id: f.text("restaurant_id")?,
                date: f.text("date")?,
                sector_id: f.opt_text("sector_id")?,
            })
        }
        "floor_plan" => {
            let f = Fields::from_filters("floor_plan", selection)?;
            Ok(Command::SelectFloorPlan {
                restaurant_id: f.text("restaurant_id")?,
                sector_id: f.text("sector_id")?,
                at: f.opt_text("at")?,
            })
        }
        "restaurants" => Ok(Command::SelectRestaurants),
        "sectors" => {
            let f = Fields::from_filters("sectors", selection)?;
            Ok(Command::SelectSectors {
                restaurant_id: f.text("restaurant_id")?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── Named values ──────────────────────────────────────────────

/// Column-to-expression pairs from an INSERT row or a WHERE clause.
struct Fields<'a> {
    table: &'static str,
    cells: Vec<(String, &'a Expr)>,
}

impl<'a> Fields<'a> {
    fn from_insert(
        table: &'static str,
        default_columns: &[&str],
        names: &[String],
        values: &'a [Expr],
    ) -> Result<Self, SqlError> {
        let cells = if names.is_empty() {
            if values.len() > default_columns.len() {
                return Err(SqlError::WrongArity(table, default_columns.len(), values.len()));
            }
            default_columns
                .iter()
                .map(|c| c.to_string())
                .zip(values.iter())
                .collect()
        } else {
            if names.len() != values.len() {
                return Err(SqlError::WrongArity(table, names.len(), values.len()));
            }
            if let Some(unknown) = names.iter().find(|n| !default_columns.contains(&n.as_str())) {
                return Err(SqlError::UnknownColumn(table, unknown.clone()));
            }
            names.iter().cloned().zip(values.iter()).collect()
        };
        Ok(Self { table, cells })
    }

    /// Only `col = value` terms joined by AND are understood; anything else is ignored.
    fn from_filters(table: &'static str, selection: Option<&'a Expr>) -> Result<Self, SqlError> {
        let mut cells = Vec::new();
        if let Some(expr) = selection {
            collect_eq_filters(expr, &mut cells);
        }
        Ok(Self { table, cells })
    }

    fn get(&self, col: &str) -> Option<&'a Expr> {
        self.cells.iter().find(|(name, _)| name == col).map(|(_, e)| *e)
    }

    fn required(&self, col: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(col).ok_or(SqlError::MissingColumn(self.table, col))
    }

    fn text(&self, col: &'static str) -> Result<String, SqlError> {
        parse_text_or_null(self.required(col)?)?.ok_or(SqlError::MissingColumn(self.table, col))
    }

    fn opt_text(&self, col: &'static str) -> Result<Option<String>, SqlError> {
        match self.get(col) {
            Some(expr) => parse_text_or_null(expr),
            None => Ok(None),
        }
    }

    fn u32(&self, col: &'static str) -> Result<u32, SqlError> {
        parse_u32(self.required(col)?)
    }

    /// JSON array of `{"start","end"}` objects. NULL or absent means no shifts.
    fn shifts(&self, col: &'static str) -> Result<Vec<Shift>, SqlError> {
        match self.opt_text(col)? {
            Some(json) => serde_json::from_str(&json)
                .map_err(|e| SqlError::Parse(format!("bad shifts JSON: {e}"))),
            None => Ok(Vec::new()),
        }
    }
}

fn collect_eq_filters<'a>(expr: &'a Expr, out: &mut Vec<(String, &'a Expr)>) {
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_eq_filters(left, out);
            collect_eq_filters(right, out);
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if let Some(col) = expr_column_name(left) {
                out.push((col, right.as_ref()));
            }
        }
        Expr::Nested(inner) => collect_eq_filters(inner, out),
        _ => {}
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

fn extract_insert_values(insert: &ast::Insert) -> Result<&[Expr], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [row] => Ok(row),
            [] => Err(SqlError::Parse("empty VALUES".into())),
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

/// String-ish literal; `'2025-09-08'::date` style casts are unwrapped.
fn parse_text_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if let Expr::Cast { expr, .. } = expr {
        return parse_text_or_null(expr);
    }
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s))
        | Some(Value::DoubleQuotedString(s))
        | Some(Value::EscapedStringLiteral(s))
        | Some(Value::Number(s, _)) => Ok(Some(s.clone())),
        Some(other) => Err(SqlError::Parse(format!("expected string, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .trim()
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else if let Expr::Cast { expr, .. } = expr {
        parse_i64_expr(expr)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of range")))
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
    #[error("{0}: unknown column {1}")]
    UnknownColumn(&'static str, String),
    #[error("{0}: expected {1} values, got {2}")]
    WrongArity(&'static str, usize, usize),
    #[error("{0}: missing {1}")]
    MissingColumn(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn parse_insert_restaurant_with_shifts() {
        let sql = r#"INSERT INTO restaurants (id, name, timezone, shifts) VALUES ('R1', 'Bistro Central', 'America/Argentina/Buenos_Aires', '[{"start":"12:00","end":"16:00"},{"start":"20:00","end":"23:45"}]')"#;
        match parse_sql(sql).unwrap() {
            Command::InsertRestaurant(r) => {
                assert_eq!(r.id, "R1");
                assert_eq!(r.name, "Bistro Central");
                assert_eq!(r.timezone, "America/Argentina/Buenos_Aires");
                assert_eq!(
                    r.shifts,
                    vec![Shift::new("12:00", "16:00"), Shift::new("20:00", "23:45")]
                );
            }
            other => panic!("expected InsertRestaurant, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_restaurant_null_shifts() {
        let sql = "INSERT INTO restaurants VALUES ('R2', 'Night Owl', 'UTC', NULL)";
        match parse_sql(sql).unwrap() {
            Command::InsertRestaurant(r) => assert!(r.shifts.is_empty()),
            other => panic!("expected InsertRestaurant, got {other:?}"),
        }

        let sql = "INSERT INTO restaurants (id, name, timezone) VALUES ('R3', 'Open', 'UTC')";
        match parse_sql(sql).unwrap() {
            Command::InsertRestaurant(r) => assert!(r.shifts.is_empty()),
            other => panic!("expected InsertRestaurant, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_restaurant_bad_shifts_json() {
        let sql = "INSERT INTO restaurants VALUES ('R1', 'B', 'UTC', '[{\"start\":12}]')";
        assert!(matches!(parse_sql(sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_insert_sector_and_table() {
        let sql = "INSERT INTO sectors (id, restaurant_id, name) VALUES ('S1', 'R1', 'Main Hall')";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::InsertSector(Sector {
                id: "S1".into(),
                restaurant_id: "R1".into(),
                name: "Main Hall".into(),
            })
        );

        let sql = "INSERT INTO tables (id, sector_id, name, min_size, max_size) VALUES ('T1', 'S1', 'Table 1', 2, 4)";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::InsertTable(Table {
                id: "T1".into(),
                sector_id: "S1".into(),
                name: "Table 1".into(),
                min_size: 2,
                max_size: 4,
            })
        );
    }

    #[test]
    fn parse_insert_columns_in_any_order() {
        let sql = "INSERT INTO tables (max_size, name, id, min_size, sector_id) VALUES (6, 'Table 4', 'T4', '4', 'S1')";
        match parse_sql(sql).unwrap() {
            Command::InsertTable(t) => {
                assert_eq!(t.id, "T4");
                assert_eq!(t.min_size, 4);
                assert_eq!(t.max_size, 6);
            }
            other => panic!("expected InsertTable, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_reservation() {
        let sql = "INSERT INTO reservations (idempotency_key, restaurant_id, sector_id, party_size, start, customer_name, customer_phone, customer_email, notes) \
                   VALUES ('abc-123', 'R1', 'S1', 4, '2025-09-08T20:00:00-03:00', 'John Doe', '+54 9 11 5555-1234', 'john.doe@mail.com', NULL)";
        match parse_sql(sql).unwrap() {
            Command::InsertReservation(req) => {
                assert_eq!(req.idempotency_key, "abc-123");
                assert_eq!(req.restaurant_id, "R1");
                assert_eq!(req.sector_id, "S1");
                assert_eq!(req.party_size, 4);
                assert_eq!(req.start, "2025-09-08T20:00:00-03:00");
                assert_eq!(req.customer.name, "John Doe");
                assert_eq!(req.customer.phone, "+54 9 11 5555-1234");
                assert_eq!(req.customer.email, "john.doe@mail.com");
                assert_eq!(req.notes, None);
            }
            other => panic!("expected InsertReservation, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_reservation_notes_optional() {
        let sql = "INSERT INTO reservations (idempotency_key, restaurant_id, sector_id, party_size, start, customer_name, customer_phone, customer_email) \
                   VALUES ('k', 'R1', 'S1', 2, '2025-09-08T12:00:00', 'Ana', '123', 'ana@mail.com')";
        match parse_sql(sql).unwrap() {
            Command::InsertReservation(req) => assert_eq!(req.notes, None),
            other => panic!("expected InsertReservation, got {other:?}"),
        }

        let sql = "INSERT INTO reservations VALUES ('k', 'R1', 'S1', 2, '2025-09-08T12:00:00', 'Ana', '123', 'ana@mail.com', 'window seat')";
        match parse_sql(sql).unwrap() {
            Command::InsertReservation(req) => assert_eq!(req.notes.as_deref(), Some("window seat")),
            other => panic!("expected InsertReservation, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_reservation_missing_column() {
        let sql = "INSERT INTO reservations (idempotency_key, restaurant_id, sector_id, party_size) VALUES ('k', 'R1', 'S1', 2)";
        let err = parse_sql(sql).unwrap_err();
        assert!(matches!(err, SqlError::MissingColumn("reservations", "start")));
    }

    #[test]
    fn parse_insert_null_required_column() {
        let sql = "INSERT INTO sectors VALUES ('S1', NULL, 'Main Hall')";
        assert!(matches!(
            parse_sql(sql),
            Err(SqlError::MissingColumn("sectors", "restaurant_id"))
        ));
    }

    #[test]
    fn parse_insert_wrong_arity() {
        let sql = "INSERT INTO sectors (id, restaurant_id) VALUES ('S1', 'R1', 'extra')";
        assert!(matches!(parse_sql(sql), Err(SqlError::WrongArity("sectors", 2, 3))));

        let sql = "INSERT INTO sectors VALUES ('S1', 'R1', 'Main', 'extra')";
        assert!(matches!(parse_sql(sql), Err(SqlError::WrongArity("sectors", 3, 4))));
    }

    #[test]
    fn parse_insert_unknown_column() {
        let sql = "INSERT INTO sectors (id, restaurant_id, colour) VALUES ('S1', 'R1', 'red')";
        assert!(matches!(parse_sql(sql), Err(SqlError::UnknownColumn("sectors", _))));
    }

    #[test]
    fn parse_insert_negative_party_size() {
        let sql = "INSERT INTO tables VALUES ('T1', 'S1', 'Table 1', -2, 4)";
        assert!(matches!(parse_sql(sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_multi_row_insert_rejected() {
        let sql = "INSERT INTO sectors VALUES ('S1', 'R1', 'A'), ('S2', 'R1', 'B')";
        assert!(matches!(parse_sql(sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_delete_reservation() {
        let id = Ulid::new();
        let sql = format!("DELETE FROM reservations WHERE id = '{id}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::DeleteReservation { id: id.to_string() }
        );
    }

    #[test]
    fn parse_delete_requires_id() {
        let sql = "DELETE FROM reservations";
        assert!(matches!(
            parse_sql(sql),
            Err(SqlError::MissingColumn("reservations", "id"))
        ));
        // Malformed ids pass through unparsed.
        let sql = "DELETE FROM reservations WHERE id = 'not-a-ulid'";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::DeleteReservation { id: "not-a-ulid".into() }
        );
    }

    #[test]
    fn parse_delete_other_table_rejected() {
        let sql = "DELETE FROM tables WHERE id = 'T1'";
        assert!(matches!(parse_sql(sql), Err(SqlError::UnknownTable(t)) if t == "tables"));
    }

    #[test]
    fn parse_select_availability() {
        let sql = "SELECT * FROM availability WHERE restaurant_id = 'R1' AND sector_id = 'S1' AND date = '2025-09-08' AND party_size = 4";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectAvailability {
                restaurant_id: "R1".into(),
                sector_id: "S1".into(),
                date: "2025-09-08".into(),
                party_size: 4,
            }
        );
    }

    #[test]
    fn parse_select_availability_cast_date() {
        let sql = "SELECT * FROM availability WHERE restaurant_id = 'R1' AND sector_id = 'S1' AND date = '2025-09-08'::date AND party_size = '2'";
        match parse_sql(sql).unwrap() {
            Command::SelectAvailability { date, party_size, .. } => {
                assert_eq!(date, "2025-09-08");
                assert_eq!(party_size, 2);
            }
            other => panic!("expected SelectAvailability, got {other:?}"),
        }
    }

    #[test]
    fn parse_select_availability_missing_filter() {
        let sql = "SELECT * FROM availability WHERE restaurant_id = 'R1' AND sector_id = 'S1' AND date = '2025-09-08'";
        let err = parse_sql(sql).unwrap_err();
        assert!(matches!(err, SqlError::MissingColumn("availability", "party_size")));
        assert_eq!(err.to_string(), "availability: missing party_size");
    }

    #[test]
    fn parse_select_slots() {
        let sql = "SELECT * FROM slots WHERE restaurant_id = 'R1' AND date = '2025-09-08'";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectSlots {
                restaurant_id: "R1".into(),
                date: "2025-09-08".into(),
            }
        );
    }

    #[test]
    fn parse_select_reservations_by_day() {
        let sql = "SELECT * FROM reservations WHERE restaurant_id = 'R1' AND date = '2025-09-08'";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectReservations {
                restaurant_id: "R1".into(),
                date: "2025-09-08".into(),
                sector_id: None,
            }
        );

        let sql = "SELECT * FROM reservations WHERE (restaurant_id = 'R1' AND date = '2025-09-08') AND sector_id = 'S2'";
        match parse_sql(sql).unwrap() {
            Command::SelectReservations { sector_id, .. } => {
                assert_eq!(sector_id.as_deref(), Some("S2"))
            }
            other => panic!("expected SelectReservations, got {other:?}"),
        }
    }

    #[test]
    fn parse_select_reservation_by_id() {
        let id = Ulid::new();
        let sql = format!("SELECT * FROM reservations WHERE id = '{id}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectReservation { id: id.to_string() }
        );
    }

    #[test]
    fn parse_select_floor_plan() {
        let sql = "SELECT * FROM floor_plan WHERE restaurant_id = 'R1' AND sector_id = 'S1'";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectFloorPlan {
                restaurant_id: "R1".into(),
                sector_id: "S1".into(),
                at: None,
            }
        );

        let sql = r#"SELECT * FROM floor_plan WHERE restaurant_id = 'R1' AND sector_id = 'S1' AND "at" = '2025-09-08T20:30:00'"#;
        match parse_sql(sql).unwrap() {
            Command::SelectFloorPlan { at, .. } => {
                assert_eq!(at.as_deref(), Some("2025-09-08T20:30:00"))
            }
            other => panic!("expected SelectFloorPlan, got {other:?}"),
        }
    }

    #[test]
    fn parse_select_catalog() {
        assert_eq!(
            parse_sql("SELECT * FROM restaurants").unwrap(),
            Command::SelectRestaurants
        );
        assert_eq!(
            parse_sql("SELECT * FROM sectors WHERE restaurant_id = 'R1'").unwrap(),
            Command::SelectSectors {
                restaurant_id: "R1".into()
            }
        );
    }

    #[test]
    fn parse_case_insensitive_names() {
        let sql = "SELECT * FROM Availability WHERE Restaurant_Id = 'R1' AND SECTOR_ID = 'S1' AND date = '2025-09-08' AND party_size = 2";
        assert!(matches!(
            parse_sql(sql).unwrap(),
            Command::SelectAvailability { .. }
        ));
    }

    #[test]
    fn parse_errors() {
        assert!(matches!(parse_sql("SELEC nonsense"), Err(SqlError::Parse(_))));
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
        assert!(matches!(
            parse_sql("SELECT * FROM widgets"),
            Err(SqlError::UnknownTable(_))
        ));
        assert!(matches!(
            parse_sql("UPDATE reservations SET party_size = 3"),
            Err(SqlError::Unsupported(_))
        ));
    }
}
