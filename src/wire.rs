use std::fmt::Debug;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use futures::{stream, Sink, SinkExt};
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldInfo, QueryResponse,
    Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::response::NotificationResponse;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::warn;

use crate::auth::{Actor, FleetAuthSource};
use crate::engine::{Engine, EngineError, Price};
use crate::model::*;
use crate::notify;
use crate::observability;
use crate::sql::{self, Command};

struct Subscription {
    channel: String,
    rx: broadcast::Receiver<Event>,
}

/// Per-connection handler. LISTEN subscriptions live here and queued
/// notifications go out after each statement.
pub struct FleetHandler {
    engine: Arc<Engine>,
    query_parser: Arc<FleetQueryParser>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl FleetHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(FleetQueryParser),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    fn actor<C: ClientInfo>(&self, client: &C) -> PgWireResult<Actor> {
        client
            .metadata()
            .get("user")
            .map(|user| Actor::new(user.as_str()))
            .ok_or_else(|| user_error("28000", "no user on connection".into()))
    }

    async fn run<C>(&self, client: &mut C, sql: &str, format: &Format) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let actor = self.actor(client)?;
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;
        let label = observability::command_label(&cmd);

        let started = Instant::now();
        let result = self.execute_command(&actor, cmd, format).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);

        self.deliver_notifications(client).await?;
        result
    }

    async fn execute_command(
        &self,
        actor: &Actor,
        cmd: Command,
        format: &Format,
    ) -> PgWireResult<Vec<Response>> {
        let engine = &self.engine;
        match cmd {
            Command::InsertCategory {
                id,
                name,
                description,
            } => {
                engine
                    .create_category(actor, id, &name, &description)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateCategory {
                id,
                name,
                description,
            } => {
                engine
                    .update_category(actor, id, name.as_deref(), description.as_deref())
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteCategory { id } => {
                engine.delete_category(actor, id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertVehicle { vehicle } => {
                engine
                    .register_vehicle(actor, vehicle)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateVehicle { id, changes } => {
                engine
                    .update_vehicle(actor, id, changes)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteVehicle { id } => {
                engine.delete_vehicle(actor, id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertReservation { reservation } => {
                engine
                    .create_reservation(actor, reservation)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::RescheduleReservation {
                id,
                start,
                end,
                notes,
            } => {
                let (start, end) = match (start, end) {
                    (Some(start), Some(end)) => (start, end),
                    (start, end) => {
                        let current = engine.get_reservation(actor, id).await.map_err(engine_err)?;
                        let range = current.reservation.range;
                        (start.unwrap_or(range.start), end.unwrap_or(range.end))
                    }
                };
                engine
                    .reschedule_reservation(actor, id, start, end, notes)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::TransitionReservation { id, status } => {
                engine
                    .transition_reservation(actor, id, status)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::SelectCategories { id } => {
                let categories = match id {
                    Some(id) => found(engine.get_category(actor, id))?,
                    None => engine.list_categories(actor).map_err(engine_err)?,
                };
                Ok(vec![category_rows(&categories, format)?])
            }
            Command::SelectVehicles { id, filter } => {
                let vehicles = match id {
                    Some(id) => found(engine.get_vehicle(actor, id).await)?,
                    None => engine.list_vehicles(actor, &filter).await.map_err(engine_err)?,
                };
                Ok(vec![vehicle_rows(&vehicles, format)?])
            }
            Command::SelectReservations { id, filter } => {
                let reservations = match id {
                    Some(id) => found(engine.get_reservation(actor, id).await)?,
                    None => engine
                        .list_reservations(actor, &filter)
                        .await
                        .map_err(engine_err)?,
                };
                Ok(vec![reservation_rows(&reservations, format)?])
            }
            Command::SelectQuote {
                vehicle_id,
                start,
                end,
                exclude,
            } => {
                let price = engine
                    .quote(actor, vehicle_id, start, end, exclude)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![quote_rows(vehicle_id, start, end, &price, format)?])
            }
            Command::SelectDashboard => {
                let dashboard = engine.dashboard(actor, Utc::now()).await.map_err(engine_err)?;
                Ok(vec![dashboard_rows(&dashboard, format)?])
            }
            Command::SelectTopVehicles => {
                let dashboard = engine.dashboard(actor, Utc::now()).await.map_err(engine_err)?;
                Ok(vec![top_vehicle_rows(&dashboard.top_vehicles, format)?])
            }
            Command::SelectMonthlyRevenue => {
                let dashboard = engine.dashboard(actor, Utc::now()).await.map_err(engine_err)?;
                Ok(vec![monthly_revenue_rows(&dashboard.monthly_revenue, format)?])
            }
            Command::Listen { channel } => {
                let vehicle_id = notify::parse_channel(&channel).ok_or_else(|| {
                    user_error(
                        "42000",
                        format!("invalid channel: {channel} (expected vehicle_{{id}})"),
                    )
                })?;
                let mut subs = self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner);
                if !subs.iter().any(|s| s.channel == channel) {
                    subs.push(Subscription {
                        rx: engine.notify.subscribe(vehicle_id),
                        channel,
                    });
                }
                Ok(vec![Response::Execution(Tag::new("LISTEN"))])
            }
            Command::Unlisten { channel } => {
                self.subscriptions
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .retain(|s| s.channel != channel);
                Ok(vec![Response::Execution(Tag::new("UNLISTEN"))])
            }
            Command::UnlistenAll => {
                self.subscriptions
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clear();
                Ok(vec![Response::Execution(Tag::new("UNLISTEN"))])
            }
        }
    }

    /// Everything queued on this connection's channels, as (channel, payload).
    fn drain_notifications(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        let mut subs = self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner);
        subs.retain_mut(|sub| loop {
            match sub.rx.try_recv() {
                Ok(event) => out.push((sub.channel.clone(), notify::payload(&event))),
                Err(broadcast::error::TryRecvError::Empty) => return true,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("{}: dropped {n} notifications", sub.channel);
                }
                // vehicle deleted
                Err(broadcast::error::TryRecvError::Closed) => return false,
            }
        });
        out
    }

    async fn deliver_notifications<C>(&self, client: &mut C) -> PgWireResult<()>
    where
        C: Sink<PgWireBackendMessage> + Unpin + Send,
        PgWireError: From<C::Error>,
    {
        let pending = self.drain_notifications();
        if pending.is_empty() {
            return Ok(());
        }
        for (channel, payload) in pending {
            client
                .feed(PgWireBackendMessage::NotificationResponse(
                    NotificationResponse::new(0, channel, payload),
                ))
                .await?;
        }
        client.flush().await?;
        Ok(())
    }
}

/// Treat a missing row as an empty result, like a SQL lookup by key.
fn found<T>(result: Result<T, EngineError>) -> PgWireResult<Vec<T>> {
    match result {
        Ok(row) => Ok(vec![row]),
        Err(EngineError::NotFound(_)) => Ok(Vec::new()),
        Err(e) => Err(engine_err(e)),
    }
}

// ── Result schemas ───────────────────────────────────────────────

fn schema(format: &Format, columns: &[(&str, Type)]) -> Vec<FieldInfo> {
    columns
        .iter()
        .enumerate()
        .map(|(i, (name, ty))| {
            FieldInfo::new(name.to_string(), None, None, ty.clone(), format.format_for(i))
        })
        .collect()
}

fn category_schema(format: &Format) -> Vec<FieldInfo> {
    schema(
        format,
        &[
            ("id", Type::VARCHAR),
            ("name", Type::VARCHAR),
            ("description", Type::VARCHAR),
        ],
    )
}

fn vehicle_schema(format: &Format) -> Vec<FieldInfo> {
    schema(
        format,
        &[
            ("id", Type::VARCHAR),
            ("license_plate", Type::VARCHAR),
            ("brand", Type::VARCHAR),
            ("model", Type::VARCHAR),
            ("year", Type::INT4),
            ("category_id", Type::VARCHAR),
            ("transmission", Type::VARCHAR),
            ("daily_rate", Type::VARCHAR),
            ("capacity", Type::INT4),
            ("description", Type::VARCHAR),
            ("status", Type::VARCHAR),
            ("created_at", Type::VARCHAR),
        ],
    )
}

fn reservation_schema(format: &Format) -> Vec<FieldInfo> {
    schema(
        format,
        &[
            ("id", Type::VARCHAR),
            ("vehicle_id", Type::VARCHAR),
            ("vehicle", Type::VARCHAR),
            ("client", Type::VARCHAR),
            ("start_date", Type::VARCHAR),
            ("end_date", Type::VARCHAR),
            ("days", Type::INT4),
            ("daily_rate", Type::VARCHAR),
            ("total_amount", Type::VARCHAR),
            ("status", Type::VARCHAR),
            ("notes", Type::VARCHAR),
            ("created_at", Type::VARCHAR),
        ],
    )
}

fn quote_schema(format: &Format) -> Vec<FieldInfo> {
    schema(
        format,
        &[
            ("vehicle_id", Type::VARCHAR),
            ("start_date", Type::VARCHAR),
            ("end_date", Type::VARCHAR),
            ("days", Type::INT4),
            ("daily_rate", Type::VARCHAR),
            ("total_amount", Type::VARCHAR),
        ],
    )
}

fn dashboard_schema(format: &Format) -> Vec<FieldInfo> {
    let mut columns = vec![
        ("total_vehicles", Type::INT8),
        ("available_vehicles", Type::INT8),
        ("active_reservations", Type::INT8),
        ("total_revenue", Type::VARCHAR),
    ];
    // one count column per reservation status
    columns.extend(ReservationStatus::ALL.iter().map(|s| (s.as_str(), Type::INT8)));
    schema(format, &columns)
}

fn top_vehicles_schema(format: &Format) -> Vec<FieldInfo> {
    schema(
        format,
        &[
            ("vehicle_id", Type::VARCHAR),
            ("vehicle", Type::VARCHAR),
            ("reservations", Type::INT8),
        ],
    )
}

fn monthly_revenue_schema(format: &Format) -> Vec<FieldInfo> {
    schema(format, &[("month", Type::VARCHAR), ("total", Type::VARCHAR)])
}

/// Result columns for a statement, by the table it reads. Parameters are
/// not bound yet, so only the FROM clause is consulted.
fn result_schema(sql: &str, format: &Format) -> Vec<FieldInfo> {
    match sql::select_table(sql).as_deref() {
        Some("categories") => category_schema(format),
        Some("vehicles") => vehicle_schema(format),
        Some("reservations") => reservation_schema(format),
        Some("quote") => quote_schema(format),
        Some("dashboard") => dashboard_schema(format),
        Some("top_vehicles") => top_vehicles_schema(format),
        Some("monthly_revenue") => monthly_revenue_schema(format),
        _ => Vec::new(),
    }
}

// ── Row encoding ─────────────────────────────────────────────────

fn query_response<T>(
    fields: Vec<FieldInfo>,
    items: &[T],
    mut encode: impl FnMut(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> PgWireResult<Response> {
    let schema = Arc::new(fields);
    let mut rows: Vec<PgWireResult<_>> = Vec::with_capacity(items.len());
    for item in items {
        let mut encoder = DataRowEncoder::new(schema.clone());
        encode(&mut encoder, item)?;
        rows.push(Ok(encoder.take_row()));
    }
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn category_rows(categories: &[Category], format: &Format) -> PgWireResult<Response> {
    query_response(category_schema(format), categories, |enc, c| {
        enc.encode_field(&c.id.to_string())?;
        enc.encode_field(&c.name)?;
        enc.encode_field(&c.description)
    })
}

fn vehicle_rows(vehicles: &[Vehicle], format: &Format) -> PgWireResult<Response> {
    query_response(vehicle_schema(format), vehicles, |enc, v| {
        enc.encode_field(&v.id.to_string())?;
        enc.encode_field(&v.license_plate)?;
        enc.encode_field(&v.brand)?;
        enc.encode_field(&v.model)?;
        enc.encode_field(&v.year)?;
        enc.encode_field(&v.category_id.to_string())?;
        enc.encode_field(&v.transmission.to_string())?;
        enc.encode_field(&v.daily_rate.to_string())?;
        enc.encode_field(&(v.capacity as i32))?;
        enc.encode_field(&v.description)?;
        enc.encode_field(&v.status.to_string())?;
        enc.encode_field(&v.created_at.to_rfc3339())
    })
}

fn reservation_rows(reservations: &[ReservationInfo], format: &Format) -> PgWireResult<Response> {
    query_response(reservation_schema(format), reservations, |enc, info| {
        let r = &info.reservation;
        enc.encode_field(&r.id.to_string())?;
        enc.encode_field(&r.vehicle_id.to_string())?;
        enc.encode_field(&info.vehicle)?;
        enc.encode_field(&r.client)?;
        enc.encode_field(&r.range.start.to_string())?;
        enc.encode_field(&r.range.end.to_string())?;
        enc.encode_field(&(r.days as i32))?;
        enc.encode_field(&r.daily_rate.to_string())?;
        enc.encode_field(&r.total_amount.to_string())?;
        enc.encode_field(&r.status.to_string())?;
        enc.encode_field(&r.notes)?;
        enc.encode_field(&r.created_at.to_rfc3339())
    })
}

fn quote_rows(
    vehicle_id: ulid::Ulid,
    start: chrono::NaiveDate,
    end: chrono::NaiveDate,
    price: &Price,
    format: &Format,
) -> PgWireResult<Response> {
    query_response(quote_schema(format), std::slice::from_ref(price), |enc, p| {
        enc.encode_field(&vehicle_id.to_string())?;
        enc.encode_field(&start.to_string())?;
        enc.encode_field(&end.to_string())?;
        enc.encode_field(&(p.days as i32))?;
        enc.encode_field(&p.daily_rate.to_string())?;
        enc.encode_field(&p.total.to_string())
    })
}

fn dashboard_rows(dashboard: &Dashboard, format: &Format) -> PgWireResult<Response> {
    query_response(dashboard_schema(format), std::slice::from_ref(dashboard), |enc, d| {
        enc.encode_field(&(d.total_vehicles as i64))?;
        enc.encode_field(&(d.available_vehicles as i64))?;
        enc.encode_field(&(d.active_reservations as i64))?;
        enc.encode_field(&d.total_revenue.to_string())?;
        for status in ReservationStatus::ALL {
            let count = d
                .status_distribution
                .iter()
                .find(|(s, _)| *s == status)
                .map_or(0, |(_, n)| *n);
            enc.encode_field(&(count as i64))?;
        }
        Ok(())
    })
}

fn top_vehicle_rows(usage: &[VehicleUsage], format: &Format) -> PgWireResult<Response> {
    query_response(top_vehicles_schema(format), usage, |enc, u| {
        enc.encode_field(&u.vehicle_id.to_string())?;
        enc.encode_field(&u.vehicle)?;
        enc.encode_field(&(u.reservations as i64))
    })
}

fn monthly_revenue_rows(months: &[MonthlyRevenue], format: &Format) -> PgWireResult<Response> {
    query_response(monthly_revenue_schema(format), months, |enc, m| {
        enc.encode_field(&m.month)?;
        enc.encode_field(&m.total.to_string())
    })
}

#[async_trait]
impl SimpleQueryHandler for FleetHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        self.run(client, query, &Format::UnifiedText).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct FleetQueryParser;

#[async_trait]
impl QueryParser for FleetQueryParser {
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
        column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt, column_format.unwrap_or(&Format::UnifiedText)))
    }
}

#[async_trait]
impl ExtendedQueryHandler for FleetHandler {
    type Statement = String;
    type QueryParser = FleetQueryParser;

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
        let sql = substitute_params(&portal.statement.statement, &portal.parameters);
        let mut responses = self.run(client, &sql, &portal.result_column_format).await?;
        if responses.is_empty() {
            return Ok(Response::EmptyQuery);
        }
        Ok(responses.remove(0))
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
            result_schema(&target.statement, &Format::UnifiedText),
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
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
            &target.result_column_format,
        )))
    }
}

/// `$N` placeholders outside single-quoted literals, as (byte range, N).
fn placeholders(sql: &str) -> Vec<(std::ops::Range<usize>, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut in_literal = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => in_literal = !in_literal,
            b'$' if !in_literal => {
                let digits = bytes[i + 1..].iter().take_while(|b| b.is_ascii_digit()).count();
                if let Ok(n) = sql[i + 1..i + 1 + digits].parse::<usize>() {
                    found.push((i..i + 1 + digits, n));
                    i += 1 + digits;
                    continue;
                }
            }
            _ => {}
        }
        i += 1;
    }
    found
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    placeholders(sql).into_iter().map(|(_, n)| n).max().unwrap_or(0)
}

/// Inline bound text parameters as quoted literals in one pass over the
/// original statement. Unbound placeholders are left as written.
fn substitute_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut last = 0;
    for (range, n) in placeholders(sql) {
        let Some(param) = n.checked_sub(1).and_then(|i| params.get(i)) else {
            continue;
        };
        out.push_str(&sql[last..range.start]);
        match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes.as_ref());
                out.push('\'');
                out.push_str(&text.replace('\'', "''"));
                out.push('\'');
            }
            None => out.push_str("NULL"),
        }
        last = range.end;
    }
    out.push_str(&sql[last..]);
    out
}

// ── Factory ──────────────────────────────────────────────────────

pub struct FleetFactory {
    handler: Arc<FleetHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<FleetAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl FleetFactory {
    pub fn new(engine: Arc<Engine>, auth_source: FleetAuthSource) -> Self {
        Self {
            handler: Arc::new(FleetHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for FleetFactory {
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

/// Serve one client connection until it closes. Each connection gets its
/// own handler, and with it its own LISTEN subscriptions.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    auth_source: FleetAuthSource,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(FleetFactory::new(engine, auth_source));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(e.sqlstate(), e.to_string())
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}
