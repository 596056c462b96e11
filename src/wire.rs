use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
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
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::FairslotAuthSource;
use crate::calendar::format_time_of_day;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, SqlError};
use crate::tenant::TenantManager;

pub struct FairslotHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<FairslotQueryParser>,
}

impl FairslotHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(FairslotQueryParser),
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
                format!("organisation error: {e}"),
            )))
        })
    }

    /// Parse, execute and record one statement.
    async fn run(&self, engine: &Engine, query: &str) -> PgWireResult<Vec<Response>> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(engine, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(
        &self,
        engine: &Engine,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertSalesperson {
                id,
                name,
                contact,
                target_share,
                active,
            } => {
                engine
                    .create_salesperson(id, name, contact, target_share, active)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateSalesperson { id, patch } => {
                engine.update_salesperson(id, patch).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteSalesperson { id } => {
                engine.delete_salesperson(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertRule {
                id,
                salesperson_id,
                weekday,
                start_minute,
                end_minute,
                granularity_minutes,
            } => {
                let rule = WeeklyRule {
                    id,
                    weekday,
                    start_minute,
                    end_minute,
                    granularity_minutes,
                };
                engine.add_rule(salesperson_id, rule).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteRule { id } => {
                engine.remove_rule(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertBlackout {
                id,
                salesperson_id,
                start,
                end,
                reason,
            } => {
                engine
                    .add_blackout(id, salesperson_id, Span { start, end }, reason)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteBlackout { id } => {
                engine.remove_blackout(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertAppointment {
                id,
                salesperson_id: Some(salesperson_id),
                lead_id,
                scheduled_at,
                duration_minutes,
                notes,
            } => {
                let req = BookingRequest {
                    id,
                    salesperson_id,
                    lead_id,
                    scheduled_at,
                    duration_minutes,
                    notes,
                };
                engine.book_for_lead(req).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertAppointment {
                id,
                salesperson_id: None,
                lead_id,
                scheduled_at,
                duration_minutes,
                notes,
            } => {
                let booked = engine
                    .route_and_book(id, lead_id, scheduled_at, duration_minutes, notes)
                    .await
                    .map_err(engine_err)?;
                if booked.is_none() {
                    return Err(user_error("P0002", "no active salesperson to route to".into()));
                }
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::RescheduleAppointment { id, scheduled_at } => {
                engine.reschedule(id, scheduled_at).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::CompleteAppointment { id } => {
                engine.complete(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::CancelAppointment { id } => {
                engine.cancel(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SetUtcOffset { minutes } => {
                engine.set_utc_offset(minutes).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::SelectSalespeople => {
                let people = engine.list_salespeople().await;
                Ok(vec![salespeople_response(people)])
            }
            Command::SelectNextSalesperson => {
                let next = engine.pick_next().await;
                Ok(vec![salespeople_response(next.into_iter().collect())])
            }
            Command::SelectRules { salesperson_id } => {
                let schema = Arc::new(rules_schema());
                let sp = salesperson_id.to_string();
                let rows: Vec<PgWireResult<_>> = engine
                    .get_rules(salesperson_id)
                    .await
                    .into_iter()
                    .map(|rule| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&rule.id.to_string())?;
                        encoder.encode_field(&sp)?;
                        encoder.encode_field(&(rule.weekday as i32))?;
                        encoder.encode_field(&format_time_of_day(rule.start_minute))?;
                        encoder.encode_field(&format_time_of_day(rule.end_minute))?;
                        encoder.encode_field(&(rule.granularity_minutes as i32))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectBlackouts { salesperson_id } => {
                let schema = Arc::new(blackouts_schema());
                let sp = salesperson_id.to_string();
                let rows: Vec<PgWireResult<_>> = engine
                    .get_blackouts(salesperson_id)
                    .await
                    .into_iter()
                    .map(|b| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&b.id.to_string())?;
                        encoder.encode_field(&sp)?;
                        encoder.encode_field(&b.span.start)?;
                        encoder.encode_field(&b.span.end)?;
                        encoder.encode_field(&b.reason)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectAppointments { salesperson_id } => {
                let schema = Arc::new(appointments_schema());
                let rows: Vec<PgWireResult<_>> = engine
                    .get_appointments(salesperson_id)
                    .await
                    .into_iter()
                    .map(|a| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&a.id.to_string())?;
                        encoder.encode_field(&a.salesperson_id.to_string())?;
                        encoder.encode_field(&a.lead_id)?;
                        encoder.encode_field(&a.scheduled_at)?;
                        encoder.encode_field(&(a.duration_minutes as i32))?;
                        encoder.encode_field(&a.notes)?;
                        encoder.encode_field(&a.status.as_str().to_string())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectFreeSlots { salesperson_id, day } => {
                let slots = engine
                    .free_slots(salesperson_id, day)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(free_slots_schema());
                let rows: Vec<PgWireResult<_>> = slots
                    .into_iter()
                    .map(|slot| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&slot)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectAvailability {
                salesperson_id,
                scheduled_at,
                exclude_id,
            } => {
                let availability = engine
                    .check_availability(salesperson_id, scheduled_at, exclude_id)
                    .await
                    .map_err(engine_err)?;
                let reason = match availability {
                    Availability::Available => None,
                    Availability::Unavailable(reason) => Some(reason.to_string()),
                };

                let schema = Arc::new(availability_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&salesperson_id.to_string())?;
                encoder.encode_field(&scheduled_at)?;
                encoder.encode_field(&reason.is_none())?;
                encoder.encode_field(&reason)?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
        }
    }
}

fn salespeople_response(people: Vec<SalespersonInfo>) -> Response {
    let schema = Arc::new(salespeople_schema());
    let rows: Vec<PgWireResult<_>> = people
        .into_iter()
        .map(|p| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&p.id.to_string())?;
            encoder.encode_field(&p.name)?;
            encoder.encode_field(&p.contact)?;
            encoder.encode_field(&p.target_share)?;
            encoder.encode_field(&p.active)?;
            encoder.encode_field(&(p.leads_received as i64))?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn salespeople_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("contact", Type::VARCHAR),
        field("share", Type::FLOAT8),
        field("active", Type::BOOL),
        field("leads_received", Type::INT8),
    ]
}

fn rules_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("salesperson_id", Type::VARCHAR),
        field("weekday", Type::INT4),
        field("start", Type::VARCHAR),
        field("end", Type::VARCHAR),
        field("granularity", Type::INT4),
    ]
}

fn blackouts_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("salesperson_id", Type::VARCHAR),
        field("start", Type::INT8),
        field("end", Type::INT8),
        field("reason", Type::VARCHAR),
    ]
}

fn appointments_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("salesperson_id", Type::VARCHAR),
        field("lead_id", Type::VARCHAR),
        field("scheduled_at", Type::INT8),
        field("duration", Type::INT4),
        field("notes", Type::VARCHAR),
        field("status", Type::VARCHAR),
    ]
}

fn free_slots_schema() -> Vec<FieldInfo> {
    vec![field("slot", Type::VARCHAR)]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        field("salesperson_id", Type::VARCHAR),
        field("scheduled_at", Type::INT8),
        field("available", Type::BOOL),
        field("reason", Type::VARCHAR),
    ]
}

/// Result columns for a statement, chosen by the table it reads.
/// Writes return no rows.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.trim_start().to_uppercase();
    if !upper.starts_with("SELECT") {
        return vec![];
    }
    if upper.contains("FREE_SLOTS") {
        free_slots_schema()
    } else if upper.contains("AVAILABILITY") {
        availability_schema()
    } else if upper.contains("NEXT_SALESPERSON") || upper.contains("SALESPEOPLE") {
        salespeople_schema()
    } else if upper.contains("WEEKLY_RULES") {
        rules_schema()
    } else if upper.contains("BLACKOUTS") {
        blackouts_schema()
    } else if upper.contains("APPOINTMENTS") {
        appointments_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for FairslotHandler {
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
        self.run(&engine, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct FairslotQueryParser;

#[async_trait]
impl QueryParser for FairslotQueryParser {
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
impl ExtendedQueryHandler for FairslotHandler {
    type Statement = String;
    type QueryParser = FairslotQueryParser;

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
        let mut responses = self.run(&engine, &sql).await?;
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
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
            {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    substitute(&portal.statement.statement, &portal.parameters)
}

/// Highest index first, so `$1` never clobbers the prefix of `$10`.
fn substitute<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut result = sql.to_string();
    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes.as_ref());
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct FairslotFactory {
    handler: Arc<FairslotHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<FairslotAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl FairslotFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = FairslotAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(FairslotHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for FairslotFactory {
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
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(FairslotFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::NotFound(_) => "P0002",
        EngineError::Conflict(_) => "23P01",
        EngineError::StorageRace { .. } => "23505",
        EngineError::InvalidInput(_) => "22023",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::HasFutureAppointments(_) => "23503",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "XX000",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}
