use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{AuthSource, DefaultServerParameterProvider, LoginInfo, Password, StartupHandler};
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
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::catalog::Catalog;
use crate::engine::grid::format_hhmm;
use crate::engine::{Engine, EngineError};
use crate::limits::MAX_QUERY_WINDOW_MS;
use crate::model::*;
use crate::observability::{self, command_label};
use crate::sql::{self, Command, SqlError};

pub struct SlotgridHandler {
    engine: Arc<Engine>,
    catalog: Arc<Catalog>,
    query_parser: Arc<SlotgridQueryParser>,
}

impl SlotgridHandler {
    pub fn new(engine: Arc<Engine>, catalog: Arc<Catalog>) -> Self {
        Self {
            engine,
            catalog,
            query_parser: Arc::new(SlotgridQueryParser),
        }
    }

    /// Parse, execute and record RED metrics for one statement.
    async fn run(&self, query: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(query).map_err(|e| {
            metrics::counter!(observability::QUERIES_TOTAL, "command" => "unparsed", "status" => "error")
                .increment(1);
            sql_err(e)
        })?;
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            Command::SelectAvailability {
                date,
                duration,
                services,
            } => {
                let slots = match (duration, services) {
                    (Some(minutes), _) => engine.list_availability(date, minutes).await,
                    (None, Some(ids)) => {
                        engine
                            .list_availability_for_services(date, &self.catalog, ids.as_slice())
                            .await
                    }
                    (None, None) => return Err(sql_err(SqlError::MissingFilter("duration"))),
                }
                .map_err(engine_err)?;
                debug!("availability for {date}: {} slots", slots.len());
                query_response(availability_schema(), &slots, |enc, slot| {
                    enc.encode_field(&format_hhmm(slot.time))?;
                    enc.encode_field(&slot.available)?;
                    enc.encode_field(&slot.is_lunch)?;
                    enc.encode_field(&slot.reason.map(|r| r.as_str()))
                })
            }
            Command::InsertAppointment {
                id,
                date,
                time,
                services,
                customer_name,
                customer_phone,
            } => {
                let result = engine
                    .book(id, date, time, services, customer_name, customer_phone, &self.catalog)
                    .await;
                match result {
                    Ok(id) => {
                        metrics::counter!(observability::BOOKINGS_CREATED_TOTAL).increment(1);
                        info!("booked appointment {id} on {date} at {}", format_hhmm(time));
                        Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
                    }
                    Err(e) => {
                        if let Some(kind) = conflict_kind(&e) {
                            metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL, "kind" => kind)
                                .increment(1);
                            debug!("booking {id} rejected: {e}");
                        }
                        Err(engine_err(e))
                    }
                }
            }
            Command::DeleteAppointment { id } => {
                engine.cancel_appointment(id).await.map_err(engine_err)?;
                info!("cancelled appointment {id}");
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectAppointments { start, end } => {
                let appointments = engine
                    .list_appointments(listing_window(start, end))
                    .await
                    .map_err(engine_err)?;
                query_response(appointments_schema(), &appointments, |enc, a| {
                    enc.encode_field(&a.id.to_string())?;
                    enc.encode_field(&a.span.start)?;
                    enc.encode_field(&a.span.end)?;
                    enc.encode_field(&a.status.as_str())?;
                    enc.encode_field(&a.service_ids.join(","))?;
                    enc.encode_field(&a.customer_name)?;
                    enc.encode_field(&a.customer_phone)
                })
            }
            Command::InsertWorkingHours(hours) => {
                let day = hours.day_of_week;
                engine.set_working_hours(hours).await.map_err(engine_err)?;
                info!("working hours updated for day {day}");
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::SelectWorkingHours => {
                let hours = engine.working_hours().await.map_err(engine_err)?;
                query_response(working_hours_schema(), &hours, |enc, h| {
                    enc.encode_field(&i32::from(h.day_of_week))?;
                    enc.encode_field(&format_hhmm(h.start_time))?;
                    enc.encode_field(&format_hhmm(h.end_time))?;
                    enc.encode_field(&h.is_active)?;
                    enc.encode_field(&h.lunch_start.map(format_hhmm))?;
                    enc.encode_field(&h.lunch_end.map(format_hhmm))
                })
            }
            Command::InsertBlockedTime {
                id,
                start,
                end,
                reason,
            } => {
                engine
                    .block_time(id, Span::new(start, end), reason)
                    .await
                    .map_err(engine_err)?;
                info!("blocked {start}..{end} as {id}");
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::DeleteBlockedTime { id } => {
                engine.unblock_time(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectBlockedTimes { start, end } => {
                let blocked = engine
                    .list_blocked(listing_window(start, end))
                    .await
                    .map_err(engine_err)?;
                query_response(blocked_times_schema(), &blocked, |enc, b| {
                    enc.encode_field(&b.id.to_string())?;
                    enc.encode_field(&b.span.start)?;
                    enc.encode_field(&b.span.end)?;
                    enc.encode_field(&b.reason)
                })
            }
            Command::SelectServices => {
                query_response(services_schema(), self.catalog.services(), |enc, s| {
                    enc.encode_field(&s.id)?;
                    enc.encode_field(&s.title)?;
                    enc.encode_field(&s.duration)?;
                    enc.encode_field(&s.price)
                })
            }
            Command::SelectCustomers { search } => {
                let customers = engine
                    .list_customers(search.as_deref())
                    .await
                    .map_err(engine_err)?;
                query_response(customers_schema(), &customers, |enc, c| {
                    enc.encode_field(&c.phone)?;
                    enc.encode_field(&c.name)?;
                    enc.encode_field(&i64::from(c.total_bookings))?;
                    enc.encode_field(&c.last_visit)
                })
            }
            Command::SelectStats => {
                let now = chrono::Utc::now().timestamp_millis();
                let stats = engine.stats(now, &self.catalog).await.map_err(engine_err)?;
                query_response(stats_schema(), &[stats], |enc, s| {
                    enc.encode_field(&(s.today_bookings as i64))?;
                    enc.encode_field(&s.today_revenue)?;
                    enc.encode_field(&(s.total_customers as i64))?;
                    enc.encode_field(&(s.upcoming as i64))
                })
            }
        }
    }
}

/// `start >= a AND "end" <= b` filters as an overlap window. A single bound
/// is widened to the maximum listing width.
fn listing_window(start: Option<Ms>, end: Option<Ms>) -> Option<Span> {
    match (start, end) {
        (None, None) => None,
        (Some(s), Some(e)) => Some(Span::new(s, e)),
        (Some(s), None) => Some(Span::new(s, s.saturating_add(MAX_QUERY_WINDOW_MS))),
        (None, Some(e)) => Some(Span::new(e.saturating_sub(MAX_QUERY_WINDOW_MS), e)),
    }
}

fn query_response<T>(
    fields: Vec<FieldInfo>,
    items: &[T],
    encode: impl Fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> PgWireResult<Response> {
    let schema = Arc::new(fields);
    let rows: Vec<PgWireResult<DataRow>> = items
        .iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        field("time", Type::VARCHAR),
        field("available", Type::BOOL),
        field("is_lunch", Type::BOOL),
        field("reason", Type::VARCHAR),
    ]
}

fn appointments_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("start", Type::INT8),
        field("end", Type::INT8),
        field("status", Type::VARCHAR),
        field("services", Type::VARCHAR),
        field("customer_name", Type::VARCHAR),
        field("customer_phone", Type::VARCHAR),
    ]
}

fn working_hours_schema() -> Vec<FieldInfo> {
    vec![
        field("day_of_week", Type::INT4),
        field("start_time", Type::VARCHAR),
        field("end_time", Type::VARCHAR),
        field("is_active", Type::BOOL),
        field("lunch_start", Type::VARCHAR),
        field("lunch_end", Type::VARCHAR),
    ]
}

fn blocked_times_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("start", Type::INT8),
        field("end", Type::INT8),
        field("reason", Type::VARCHAR),
    ]
}

fn services_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("title", Type::VARCHAR),
        field("duration", Type::INT8),
        field("price", Type::INT8),
    ]
}

fn customers_schema() -> Vec<FieldInfo> {
    vec![
        field("phone", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("total_bookings", Type::INT8),
        field("last_visit", Type::INT8),
    ]
}

fn stats_schema() -> Vec<FieldInfo> {
    vec![
        field("today_bookings", Type::INT8),
        field("today_revenue", Type::INT8),
        field("total_customers", Type::INT8),
        field("upcoming", Type::INT8),
    ]
}

/// Result columns of a SELECT, judged from the table after FROM. Used to
/// describe statements whose `$n` parameters are not bound yet.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let lower = sql.to_lowercase();
    let mut tokens = lower.split_whitespace();
    if tokens.next() != Some("select") {
        return vec![];
    }
    let table = tokens
        .skip_while(|t| *t != "from")
        .nth(1)
        .map(|t| t.trim_matches(|c: char| c == '"' || c == ';'));
    match table {
        Some("availability") => availability_schema(),
        Some("appointments") => appointments_schema(),
        Some("working_hours") => working_hours_schema(),
        Some("blocked_times") => blocked_times_schema(),
        Some("services") => services_schema(),
        Some("customers") => customers_schema(),
        Some("stats") => stats_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for SlotgridHandler {
    async fn do_query<C>(
        &self,
        _client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run(query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SlotgridQueryParser;

#[async_trait]
impl QueryParser for SlotgridQueryParser {
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
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for SlotgridHandler {
    type Statement = String;
    type QueryParser = SlotgridQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal);
        self.run(&sql).await
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
            result_schema(&target.statement),
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
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start {
                if let Ok(n) = sql[start..i].parse::<usize>() {
                    max = max.max(n);
                }
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Replace `$n` placeholders with quoted text literals. Higher indexes go
/// first so `$1` never clobbers the prefix of `$10`.
fn substitute(sql: &str, params: &[Option<&[u8]>]) -> String {
    let mut result = sql.to_string();
    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }
    result
}

fn substitute_params(portal: &Portal<String>) -> String {
    let params: Vec<Option<&[u8]>> = portal.parameters.iter().map(|p| p.as_deref()).collect();
    substitute(&portal.statement.statement, &params)
}

// ── Factory ──────────────────────────────────────────────────────

/// Single shared password; the user name is not checked.
#[derive(Debug)]
pub struct SlotgridAuthSource {
    password: String,
}

#[async_trait]
impl AuthSource for SlotgridAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

pub struct SlotgridFactory {
    handler: Arc<SlotgridHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<SlotgridAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl SlotgridFactory {
    pub fn new(engine: Arc<Engine>, catalog: Arc<Catalog>, password: String) -> Self {
        let auth_source = SlotgridAuthSource { password };
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(SlotgridHandler::new(engine, catalog)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SlotgridFactory {
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

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    catalog: Arc<Catalog>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(SlotgridFactory::new(engine, catalog, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn conflict_kind(e: &EngineError) -> Option<&'static str> {
    match e {
        EngineError::ConflictAppointment(_) => Some("appointment"),
        EngineError::ConflictBlocked(_) => Some("blocked"),
        _ => None,
    }
}

/// SQLSTATE for each engine failure.
fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::ConflictAppointment(_) | EngineError::ConflictBlocked(_) => "23P01",
        EngineError::MalformedDuration(_)
        | EngineError::InvalidInput(_)
        | EngineError::OutsideWorkingHours => "22023",
        EngineError::NotFound(_) => "P0002",
        EngineError::StoreUnavailable(_) => "58000",
        EngineError::InvalidTransition { .. } => "55000",
        EngineError::LimitExceeded(_) => "54000",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: SqlError) -> PgWireError {
    let code = match e {
        SqlError::InvalidValue(_) => "22023",
        _ => "42601",
    };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        e.to_string(),
    )))
}
