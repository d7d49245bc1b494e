use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono_tz::Tz;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::data::DataRow;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::{process_socket, TlsAcceptor};
use tokio::net::TcpStream;
use tracing::debug;
use ulid::Ulid;

use crate::auth::SeatlineAuthSource;
use crate::engine::{Engine, EngineError, Entity};
use crate::model::*;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, SqlError};
use crate::tenant::TenantManager;
use crate::time::{format_local, parse_timezone};

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(SeatlineFactory::new(tenant_manager, password));
    process_socket(socket, tls, factory).await
}

pub struct SeatlineHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<SeatlineQueryParser>,
}

impl SeatlineHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(SeatlineQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    /// Parse and execute one statement, recording query metrics.
    async fn run(&self, engine: &Engine, sql: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(engine, cmd).await;

        let status = match &result {
            Ok(_) => "ok",
            Err(_) => "error",
        };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Response> {
        match cmd {
            Command::InsertRestaurant(restaurant) => {
                engine.create_restaurant(restaurant).await.map_err(engine_err)?;
                Ok(inserted())
            }
            Command::InsertSector(sector) => {
                engine.create_sector(sector).await.map_err(engine_err)?;
                Ok(inserted())
            }
            Command::InsertTable(table) => {
                engine.create_table(table).await.map_err(engine_err)?;
                Ok(inserted())
            }
            Command::InsertReservation(request) => {
                let booking = engine.book(request).await.map_err(engine_err)?;
                if booking.replayed {
                    debug!("replayed reservation {}", booking.reservation.id);
                }
                let tz = engine
                    .timezone(&booking.reservation.restaurant_id)
                    .await
                    .map_err(engine_err)?;
                reservation_rows(std::slice::from_ref(&booking.reservation), tz)
            }
            Command::DeleteReservation { id } => {
                let id = reservation_id(&id).map_err(engine_err)?;
                engine.cancel(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectAvailability {
                restaurant_id,
                sector_id,
                date,
                party_size,
            } => {
                let availability = engine
                    .availability(&restaurant_id, &sector_id, &date, party_size)
                    .await
                    .map_err(engine_err)?;
                availability_rows(&availability)
            }
            Command::SelectSlots { restaurant_id, date } => {
                let tz = engine.timezone(&restaurant_id).await.map_err(engine_err)?;
                let slots = engine
                    .potential_slots(&restaurant_id, &date)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(slots_schema());
                let rows: Vec<PgWireResult<_>> = slots
                    .into_iter()
                    .map(|start| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&format_local(start, tz))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(query_response(schema, rows))
            }
            Command::SelectReservations {
                restaurant_id,
                date,
                sector_id,
            } => {
                let tz = engine.timezone(&restaurant_id).await.map_err(engine_err)?;
                let reservations = engine
                    .reservations_for_day(&restaurant_id, &date, sector_id.as_deref())
                    .await
                    .map_err(engine_err)?;
                reservation_rows(&reservations, tz)
            }
            Command::SelectReservation { id } => {
                let found = match reservation_id(&id) {
                    Ok(id) => match engine.reservation(id).await {
                        Ok(r) => Some(r),
                        Err(EngineError::NotFound { .. }) => None,
                        Err(e) => return Err(engine_err(e)),
                    },
                    Err(_) => None,
                };
                match found {
                    Some(r) => {
                        let tz = engine.timezone(&r.restaurant_id).await.map_err(engine_err)?;
                        reservation_rows(std::slice::from_ref(&r), tz)
                    }
                    None => Ok(query_response(Arc::new(reservation_schema()), Vec::new())),
                }
            }
            Command::SelectFloorPlan {
                restaurant_id,
                sector_id,
                at,
            } => {
                let plan = engine
                    .floor_plan(&restaurant_id, &sector_id, at.as_deref())
                    .await
                    .map_err(engine_err)?;
                floor_plan_rows(&plan)
            }
            Command::SelectRestaurants => {
                let restaurants = engine.restaurants().await.map_err(engine_err)?;
                let schema = Arc::new(restaurants_schema());
                let rows: Vec<PgWireResult<_>> = restaurants
                    .into_iter()
                    .map(|r| {
                        let shifts = serde_json::to_string(&r.shifts)
                            .map_err(|e| PgWireError::ApiError(Box::new(e)))?;
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&r.id)?;
                        encoder.encode_field(&r.name)?;
                        encoder.encode_field(&r.timezone)?;
                        encoder.encode_field(&shifts)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(query_response(schema, rows))
            }
            Command::SelectSectors { restaurant_id } => {
                let sectors = engine.sectors(&restaurant_id).await.map_err(engine_err)?;
                let schema = Arc::new(sectors_schema());
                let rows: Vec<PgWireResult<_>> = sectors
                    .into_iter()
                    .map(|s| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&s.id)?;
                        encoder.encode_field(&s.restaurant_id)?;
                        encoder.encode_field(&s.name)?;
                        encoder.encode_field(&(s.max_capacity as i32))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(query_response(schema, rows))
            }
        }
    }
}

fn inserted() -> Response {
    Response::Execution(Tag::new("INSERT").with_oid(0).with_rows(1))
}

fn query_response(schema: Arc<Vec<FieldInfo>>, rows: Vec<PgWireResult<DataRow>>) -> Response {
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

// ── Row encoding ─────────────────────────────────────────────────

fn reservation_rows(reservations: &[Reservation], tz: Tz) -> PgWireResult<Response> {
    let schema = Arc::new(reservation_schema());
    let rows: Vec<PgWireResult<_>> = reservations
        .iter()
        .map(|r| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&r.id.to_string())?;
            encoder.encode_field(&r.restaurant_id)?;
            encoder.encode_field(&r.sector_id)?;
            encoder.encode_field(&r.table_ids.join(","))?;
            encoder.encode_field(&(r.party_size as i32))?;
            encoder.encode_field(&format_local(r.span.start, tz))?;
            encoder.encode_field(&format_local(r.span.end, tz))?;
            encoder.encode_field(&r.status.as_str())?;
            encoder.encode_field(&r.customer.name)?;
            encoder.encode_field(&r.customer.phone)?;
            encoder.encode_field(&r.customer.email)?;
            encoder.encode_field(&r.notes)?;
            encoder.encode_field(&format_local(r.created_at, tz))?;
            encoder.encode_field(&format_local(r.updated_at, tz))?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(query_response(schema, rows))
}

fn availability_rows(availability: &Availability) -> PgWireResult<Response> {
    let tz = parse_timezone(&availability.timezone).map_err(engine_err)?;
    let schema = Arc::new(availability_schema());
    let rows: Vec<PgWireResult<_>> = availability
        .slots
        .iter()
        .map(|slot| {
            let tables = match &slot.status {
                SlotStatus::Available { tables } => Some(tables.join(",")),
                SlotStatus::Unavailable(_) => None,
            };
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&format_local(slot.start, tz))?;
            encoder.encode_field(&slot.is_available())?;
            encoder.encode_field(&tables)?;
            encoder.encode_field(&slot.reason().map(|r| r.as_str()))?;
            encoder.encode_field(&availability.slot_minutes)?;
            encoder.encode_field(&availability.duration_minutes)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(query_response(schema, rows))
}

/// One row per table. Sector name, reference instant and the day's slots
/// repeat on every row.
fn floor_plan_rows(plan: &FloorPlan) -> PgWireResult<Response> {
    let tz = parse_timezone(&plan.timezone).map_err(engine_err)?;
    let reference = format_local(plan.reference, tz);
    let slots: Vec<String> = plan.slots.iter().map(|&s| format_local(s, tz)).collect();
    let slots = serde_json::to_string(&slots).map_err(|e| PgWireError::ApiError(Box::new(e)))?;
    let schema = Arc::new(floor_plan_schema());
    let rows: Vec<PgWireResult<_>> = plan
        .tables
        .iter()
        .map(|entry| {
            let occupancy = entry.occupancy.as_ref();
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&entry.table.id)?;
            encoder.encode_field(&entry.table.name)?;
            encoder.encode_field(&(entry.table.min_size as i32))?;
            encoder.encode_field(&(entry.table.max_size as i32))?;
            encoder.encode_field(&occupancy.is_some())?;
            encoder.encode_field(&occupancy.map(|o| o.reservation_id.to_string()))?;
            encoder.encode_field(&occupancy.map(|o| o.customer_name.clone()))?;
            encoder.encode_field(&occupancy.map(|o| o.time.clone()))?;
            encoder.encode_field(&occupancy.map(|o| o.party_size as i32))?;
            encoder.encode_field(&plan.sector_name)?;
            encoder.encode_field(&reference)?;
            encoder.encode_field(&slots)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(query_response(schema, rows))
}

// ── Result schemas ───────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        field("start", Type::VARCHAR),
        field("available", Type::BOOL),
        field("tables", Type::VARCHAR),
        field("reason", Type::VARCHAR),
        field("slot_minutes", Type::INT8),
        field("duration_minutes", Type::INT8),
    ]
}

fn slots_schema() -> Vec<FieldInfo> {
    vec![field("start", Type::VARCHAR)]
}

fn reservation_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("restaurant_id", Type::VARCHAR),
        field("sector_id", Type::VARCHAR),
        field("table_ids", Type::VARCHAR),
        field("party_size", Type::INT4),
        field("start", Type::VARCHAR),
        field("end", Type::VARCHAR),
        field("status", Type::VARCHAR),
        field("customer_name", Type::VARCHAR),
        field("customer_phone", Type::VARCHAR),
        field("customer_email", Type::VARCHAR),
        field("notes", Type::VARCHAR),
        field("created_at", Type::VARCHAR),
        field("updated_at", Type::VARCHAR),
    ]
}

fn floor_plan_schema() -> Vec<FieldInfo> {
    vec![
        field("table_id", Type::VARCHAR),
        field("table_name", Type::VARCHAR),
        field("min_size", Type::INT4),
        field("max_size", Type::INT4),
        field("occupied", Type::BOOL),
        field("reservation_id", Type::VARCHAR),
        field("customer_name", Type::VARCHAR),
        field("time", Type::VARCHAR),
        field("party_size", Type::INT4),
        field("sector_name", Type::VARCHAR),
        field("reference", Type::VARCHAR),
        field("slots", Type::VARCHAR),
    ]
}

fn restaurants_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("timezone", Type::VARCHAR),
        field("shifts", Type::VARCHAR),
    ]
}

fn sectors_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("restaurant_id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("max_capacity", Type::INT4),
    ]
}

/// Row shape of a statement, judged from the relation it reads or books into.
fn statement_schema(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.trim_start().to_uppercase();
    if upper.starts_with("SELECT") {
        match word_after(&upper, "FROM") {
            Some("AVAILABILITY") => availability_schema(),
            Some("SLOTS") => slots_schema(),
            Some("RESERVATIONS") => reservation_schema(),
            Some("FLOOR_PLAN") => floor_plan_schema(),
            Some("RESTAURANTS") => restaurants_schema(),
            Some("SECTORS") => sectors_schema(),
            _ => vec![],
        }
    } else if upper.starts_with("INSERT") && word_after(&upper, "INTO") == Some("RESERVATIONS") {
        reservation_schema()
    } else {
        vec![]
    }
}

fn word_after<'a>(upper: &'a str, keyword: &str) -> Option<&'a str> {
    let mut words = upper.split_whitespace();
    words.find(|w| *w == keyword)?;
    words
        .next()
        .map(|w| w.trim_matches(|c: char| !(c.is_ascii_alphanumeric() || c == '_')))
}

#[async_trait]
impl SimpleQueryHandler for SeatlineHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        Ok(vec![self.run(&engine, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SeatlineQueryParser;

#[async_trait]
impl QueryParser for SeatlineQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(statement_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for SeatlineHandler {
    type Statement = String;
    type QueryParser = SeatlineQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let sql = substitute_params(portal);
        self.run(&engine, &sql).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            statement_schema(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(statement_schema(
            &target.statement.statement,
        )))
    }
}

/// Byte ranges of `$N` placeholders outside quoted literals and identifiers,
/// with their 1-based index.
fn placeholders(sql: &str) -> Vec<(usize, usize, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            // A doubled quote is an escaped quote and keeps the literal open.
            if b == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match b {
            b'\'' | b'"' => {
                quote = Some(b);
                i += 1;
            }
            b'$' => {
                let start = i;
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                if let Ok(n) = sql[start + 1..i].parse::<usize>()
                    && n > 0
                {
                    found.push((start, i, n));
                }
            }
            _ => i += 1,
        }
    }
    found
}

/// Highest `$N` placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    placeholders(sql).iter().map(|&(_, _, n)| n).max().unwrap_or(0)
}

fn quote_param(param: Option<&[u8]>) -> String {
    match param {
        Some(bytes) => format!("'{}'", String::from_utf8_lossy(bytes).replace('\'', "''")),
        None => "NULL".to_string(),
    }
}

/// Inline bound text-format parameters as quoted literals in one left-to-right
/// pass, so a value is never scanned for placeholders itself.
fn inline_params(sql: &str, params: &[Option<&[u8]>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut copied = 0;
    for (start, end, n) in placeholders(sql) {
        let Some(param) = params.get(n - 1) else {
            continue;
        };
        out.push_str(&sql[copied..start]);
        out.push_str(&quote_param(*param));
        copied = end;
    }
    out.push_str(&sql[copied..]);
    out
}

fn substitute_params(portal: &Portal<String>) -> String {
    let params: Vec<Option<&[u8]>> = portal.parameters.iter().map(|p| p.as_deref()).collect();
    inline_params(&portal.statement.statement, &params)
}

// ── Factory ──────────────────────────────────────────────────────

pub struct SeatlineFactory {
    handler: Arc<SeatlineHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<SeatlineAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl SeatlineFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = SeatlineAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(SeatlineHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SeatlineFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

// ── Errors ───────────────────────────────────────────────────────

/// SQLSTATE for each engine failure category.
fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::InvalidInput(_) => "22023",
        EngineError::NotFound { .. } => "42704",
        EngineError::OutOfWindow => "23514",
        EngineError::NoCapacity => "23P01",
        EngineError::DuplicateBooking | EngineError::AlreadyExists { .. } => "23505",
        EngineError::QueueTimeout => "55P03",
        EngineError::Storage(_) => "58030",
    }
}

/// Reservation ids are ULIDs; anything else cannot name a reservation.
fn reservation_id(raw: &str) -> Result<Ulid, EngineError> {
    Ulid::from_string(raw).map_err(|_| EngineError::not_found(Entity::Reservation, raw))
}

fn engine_err(e: EngineError) -> PgWireError {
    debug!("refused: {e}");
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        error_message(&e),
    )))
}

/// Stable machine code first, then the human-readable detail.
fn error_message(e: &EngineError) -> String {
    format!("{}: {e}", e.code())
}

fn sql_err(e: SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
