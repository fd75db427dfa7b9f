use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
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
use pgwire::messages::PgWireBackendMessage;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::clock::from_utc_instant;
use crate::engine::{Engine, EngineError, NewBooking, SlotView, cancellable, event_start};
use crate::model::*;
use crate::sql::{self, Command, VerifyTarget};

pub struct ReslotHandler {
    engine: Arc<Engine>,
    query_parser: Arc<ReslotQueryParser>,
    request_timeout: Duration,
    shutdown: CancellationToken,
}

impl ReslotHandler {
    pub fn new(engine: Arc<Engine>, request_timeout: Duration, shutdown: CancellationToken) -> Self {
        Self {
            engine,
            query_parser: Arc::new(ReslotQueryParser),
            request_timeout,
            shutdown,
        }
    }

    /// Run an engine call under the request deadline, abandoning it when the
    /// server shuts down. Engine futures are drop-safe, so an abandoned call
    /// has no effect.
    async fn deadline<T>(&self, fut: impl Future<Output = Result<T, EngineError>>) -> PgWireResult<T> {
        let timed = async {
            tokio::time::timeout(self.request_timeout, fut)
                .await
                .unwrap_or(Err(EngineError::RequestCancelled))
        };
        cancellable(&self.shutdown, timed).await.map_err(engine_err)
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Vec<Response>> {
        let engine = &self.engine;
        match cmd {
            Command::InsertBusiness {
                id,
                name,
                utc_offset,
                min_notice_days,
                max_notice_days,
                slot_minutes,
                lead_time_hours,
                cancel_lead_time_hours,
            } => {
                let calendar = BusinessCalendar::new(utc_offset, min_notice_days, max_notice_days, slot_minutes);
                let policy = ReschedulePolicy {
                    min_lead_time_hours: lead_time_hours,
                    cancel_lead_time_hours,
                };
                self.deadline(engine.register_business(id, name, calendar, policy)).await?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertHours { business_id, weekday, open, close } => {
                let hours = DayHours::new(open, close).map_err(engine_err)?;
                self.deadline(engine.set_hours(business_id, weekday, Some(hours))).await?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteHours { business_id, weekday } => {
                self.deadline(engine.set_hours(business_id, weekday, None)).await?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertService { id, business_id, name, duration } => {
                let service = Service { id, business_id, name, duration_minutes: duration };
                self.deadline(engine.add_service(service)).await?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertBooking { id, business_id, date, time, services, contact, status } => {
                let request = NewBooking {
                    id,
                    business_id,
                    date,
                    time,
                    service_ids: services,
                    contact,
                    status,
                };
                self.deadline(engine.create_booking(request)).await?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertWaitlist { business_id, date, selection, services, contact } => {
                // Nothing awaits after the commit.
                let offset = self.deadline(engine.business_offset(business_id)).await?;
                let entries = self
                    .deadline(engine.join_waitlist(business_id, date, &services, selection, contact))
                    .await?;
                Ok(vec![waitlist_response(&entries, offset)?])
            }
            Command::InsertChallenge { booking_id, purpose, email } => {
                let issued = self
                    .deadline(engine.issue_challenge(booking_id, purpose, &email))
                    .await?;
                let schema = Arc::new(challenge_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&issued.challenge_id.to_string())?;
                encoder.encode_field(&issued.booking_id.to_string())?;
                encoder.encode_field(&issued.purpose.as_str())?;
                encoder.encode_field(&issued.expires_at.to_rfc3339())?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::InsertReschedule { token, date, time, reason } => {
                // An unknown token fails the reschedule itself.
                let offset = match engine.challenges.token_business(token) {
                    Some(business_id) => self.deadline(engine.business_offset(business_id)).await?,
                    None => 0,
                };
                let booking = self
                    .deadline(engine.apply_reschedule(token, date, time, reason))
                    .await?;
                Ok(vec![bookings_response(&[booking], offset)?])
            }
            Command::CancelBooking { token } => {
                self.deadline(engine.apply_cancel(token)).await?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectBusinesses => {
                let mut infos = Vec::new();
                for id in engine.business_ids() {
                    infos.push(self.deadline(engine.business_info(id)).await?);
                }
                Ok(vec![businesses_response(&infos)?])
            }
            Command::SelectServices { business_id } => {
                let services = self.deadline(engine.list_services(business_id)).await?;
                let schema = Arc::new(services_schema());
                let rows: Vec<PgWireResult<_>> = services
                    .iter()
                    .map(|s| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&s.id.to_string())?;
                        encoder.encode_field(&s.business_id.to_string())?;
                        encoder.encode_field(&s.name)?;
                        encoder.encode_field(&i64::from(s.duration_minutes))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectAvailability { business_id, date, services, client_offset } => {
                let business_offset = self.deadline(engine.business_offset(business_id)).await?;
                let (slots, views) = self
                    .deadline(engine.get_availability_for_client(
                        business_id,
                        date,
                        &services,
                        client_offset.unwrap_or(business_offset),
                    ))
                    .await?;
                Ok(vec![availability_response(business_id, &slots, &views)?])
            }
            Command::SelectBookings { business_id } => {
                let bookings = self.deadline(engine.list_bookings(business_id)).await?;
                let offset = self.deadline(engine.business_offset(business_id)).await?;
                Ok(vec![bookings_response(&bookings, offset)?])
            }
            Command::SelectWaitlist { business_id, date } => {
                let entries = match date {
                    Some(d) => self.deadline(engine.list_waitlist_on(business_id, d)).await?,
                    None => self.deadline(engine.list_waitlist(business_id)).await?,
                };
                let offset = self.deadline(engine.business_offset(business_id)).await?;
                Ok(vec![waitlist_response(&entries, offset)?])
            }
            Command::SelectVerification { target, code } => {
                let token = match target {
                    VerifyTarget::Challenge(id) => engine.verify_challenge(id, &code),
                    VerifyTarget::Booking(booking_id, purpose) => {
                        engine.verify_for_booking(booking_id, purpose, &code)
                    }
                }
                .map_err(engine_err)?;
                let schema = Arc::new(verification_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&token.token.to_string())?;
                encoder.encode_field(&token.booking_id.to_string())?;
                encoder.encode_field(&token.purpose.as_str())?;
                encoder.encode_field(&token.expires_at.to_rfc3339())?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
        }
    }

    async fn run(&self, query: &str) -> PgWireResult<Vec<Response>> {
        let started = Instant::now();
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = crate::observability::command_label(&cmd);
        let result = self.execute_command(cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(crate::observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(crate::observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }
}

// ── Result schemas ───────────────────────────────────────────────

fn text(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        text("business_id"),
        text("date"),
        text("start"),
        int("start_minutes"),
        text("client_date"),
        text("client_time"),
        text("status"),
        text("reason"),
    ]
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("business_id"),
        text("date"),
        text("time"),
        text("event_date_utc"),
        text("event_time_utc"),
        int("duration"),
        text("status"),
        text("email"),
        text("name"),
        text("phone"),
        int("version"),
        text("reschedule_reason"),
    ]
}

fn waitlist_schema() -> Vec<FieldInfo> {
    vec![
        text("business_id"),
        text("email"),
        text("name"),
        text("phone"),
        text("date"),
        text("time"),
        text("event_date_utc"),
        text("event_time_utc"),
        int("duration"),
    ]
}

fn businesses_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("name"),
        int("utc_offset"),
        int("min_notice_days"),
        int("max_notice_days"),
        int("slot_minutes"),
        int("lead_time_hours"),
        int("cancel_lead_time_hours"),
        int("services"),
        int("bookings"),
    ]
}

fn services_schema() -> Vec<FieldInfo> {
    vec![text("id"), text("business_id"), text("name"), int("duration")]
}

fn challenge_schema() -> Vec<FieldInfo> {
    vec![text("challenge_id"), text("booking_id"), text("purpose"), text("expires_at")]
}

fn verification_schema() -> Vec<FieldInfo> {
    vec![text("token"), text("booking_id"), text("purpose"), text("expires_at")]
}

/// Result columns for a statement, by the table it names.
fn schema_for(sql: &str) -> Vec<FieldInfo> {
    let lower = sql.to_lowercase();
    let verb = lower.trim_start();
    let names = |table: &str| lower.contains(table);
    if verb.starts_with("select") {
        if names("availability") {
            availability_schema()
        } else if names("verification") {
            verification_schema()
        } else if names("waitlist") {
            waitlist_schema()
        } else if names("businesses") {
            businesses_schema()
        } else if names("services") {
            services_schema()
        } else if names("bookings") {
            bookings_schema()
        } else {
            vec![]
        }
    } else if verb.starts_with("insert") {
        if names("into challenges") {
            challenge_schema()
        } else if names("into waitlist") {
            waitlist_schema()
        } else if names("into reschedules") {
            bookings_schema()
        } else {
            vec![]
        }
    } else {
        vec![]
    }
}

fn availability_response(business_id: ulid::Ulid, slots: &SlotSet, views: &[SlotView]) -> PgWireResult<Response> {
    let schema = Arc::new(availability_schema());
    let business = business_id.to_string();
    let date = slots.date.to_string();
    let reason = slots.reason.map(|r| r.as_str().to_string());

    let rows: Vec<PgWireResult<_>> = if views.is_empty() {
        // A day with no candidates still reports why.
        let mut encoder = DataRowEncoder::new(schema.clone());
        encoder.encode_field(&business)?;
        encoder.encode_field(&date)?;
        encoder.encode_field(&None::<String>)?;
        encoder.encode_field(&None::<i64>)?;
        encoder.encode_field(&None::<String>)?;
        encoder.encode_field(&None::<String>)?;
        encoder.encode_field(&"unavailable")?;
        encoder.encode_field(&reason)?;
        vec![Ok(encoder.take_row())]
    } else {
        views
            .iter()
            .map(|view| {
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&business)?;
                encoder.encode_field(&date)?;
                encoder.encode_field(&view.start.to_string())?;
                encoder.encode_field(&i64::from(view.start.minutes()))?;
                encoder.encode_field(&view.client_date.to_string())?;
                encoder.encode_field(&view.client_time.to_string())?;
                encoder.encode_field(&view.status.as_str())?;
                encoder.encode_field(&reason)?;
                Ok(encoder.take_row())
            })
            .collect()
    };
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn bookings_response(bookings: &[Booking], offset: UtcOffsetMinutes) -> PgWireResult<Response> {
    let schema = Arc::new(bookings_schema());
    let rows: Vec<PgWireResult<_>> = bookings
        .iter()
        .map(|b| {
            let (local_date, local_time) = from_utc_instant(event_start(b), offset);
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&b.id.to_string())?;
            encoder.encode_field(&b.business_id.to_string())?;
            encoder.encode_field(&local_date.to_string())?;
            encoder.encode_field(&local_time.to_string())?;
            encoder.encode_field(&b.event_date_utc.to_string())?;
            encoder.encode_field(&b.event_time_minutes.to_string())?;
            encoder.encode_field(&i64::from(b.duration_minutes))?;
            encoder.encode_field(&b.status.as_str())?;
            encoder.encode_field(&b.contact.email)?;
            encoder.encode_field(&b.contact.name)?;
            encoder.encode_field(&b.contact.phone)?;
            encoder.encode_field(&(b.version as i64))?;
            encoder.encode_field(&b.reschedule_reason)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn waitlist_response(entries: &[WaitlistEntry], offset: UtcOffsetMinutes) -> PgWireResult<Response> {
    let schema = Arc::new(waitlist_schema());
    let rows: Vec<PgWireResult<_>> = entries
        .iter()
        .map(|w| {
            let instant = crate::clock::to_utc_instant(w.event_date_utc, w.event_time_minutes, 0);
            let (local_date, local_time) = from_utc_instant(instant, offset);
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&w.business_id.to_string())?;
            encoder.encode_field(&w.contact_email)?;
            encoder.encode_field(&w.name)?;
            encoder.encode_field(&w.phone)?;
            encoder.encode_field(&local_date.to_string())?;
            encoder.encode_field(&local_time.to_string())?;
            encoder.encode_field(&w.event_date_utc.to_string())?;
            encoder.encode_field(&w.event_time_minutes.to_string())?;
            encoder.encode_field(&i64::from(w.duration_minutes))?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn businesses_response(infos: &[BusinessInfo]) -> PgWireResult<Response> {
    let schema = Arc::new(businesses_schema());
    let rows: Vec<PgWireResult<_>> = infos
        .iter()
        .map(|info| {
            let cal = &info.calendar;
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&info.id.to_string())?;
            encoder.encode_field(&info.name)?;
            encoder.encode_field(&i64::from(cal.utc_offset_minutes))?;
            encoder.encode_field(&i64::from(cal.min_notice_days))?;
            encoder.encode_field(&i64::from(cal.max_notice_days))?;
            encoder.encode_field(&i64::from(cal.slot_minutes))?;
            encoder.encode_field(&i64::from(info.policy.min_lead_time_hours))?;
            encoder.encode_field(&info.policy.cancel_lead_time_hours.map(i64::from))?;
            encoder.encode_field(&(info.service_count as i64))?;
            encoder.encode_field(&(info.booking_count as i64))?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

#[async_trait]
impl SimpleQueryHandler for ReslotHandler {
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
        self.run(query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct ReslotQueryParser;

#[async_trait]
impl QueryParser for ReslotQueryParser {
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
        Ok(schema_for(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for ReslotHandler {
    type Statement = String;
    type QueryParser = ReslotQueryParser;

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
        let mut responses = self.run(&sql).await?;
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
        Ok(DescribeStatementResponse::new(param_types, schema_for(&target.statement)))
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
        Ok(DescribePortalResponse::new(schema_for(&target.statement.statement)))
    }
}

/// Highest `$N` placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let mut sql = portal.statement.statement.to_string();
    // Highest index first so $1 never clobbers $10.
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let value = match param {
            Some(bytes) => format!("'{}'", String::from_utf8_lossy(bytes).replace('\'', "''")),
            None => "NULL".to_string(),
        };
        sql = sql.replace(&format!("${}", i + 1), &value);
    }
    sql
}

// ── Authentication ───────────────────────────────────────────────

/// Single shared password for every login.
#[derive(Debug)]
pub struct PasswordAuthSource {
    password: String,
}

impl PasswordAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for PasswordAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        tracing::debug!(user = ?login.user(), "password login");
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

// ── Factory ──────────────────────────────────────────────────────

pub struct ReslotFactory {
    handler: Arc<ReslotHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<PasswordAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl ReslotFactory {
    pub fn new(engine: Arc<Engine>, password: String, request_timeout: Duration, shutdown: CancellationToken) -> Self {
        Self {
            handler: Arc::new(ReslotHandler::new(engine, request_timeout, shutdown)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                PasswordAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for ReslotFactory {
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

/// Serve one client connection until it closes. Requests still running when
/// `shutdown` fires fail with `RequestCancelled`.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    password: String,
    request_timeout: Duration,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let factory = ReslotFactory::new(engine, password, request_timeout, shutdown);
    pgwire::tokio::process_socket(socket, None, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

/// SQLSTATE for each engine error kind. Standard codes where PostgreSQL has
/// a matching condition, class `RS` otherwise.
pub fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::OutsideNoticeWindow { .. } => "RS001",
        EngineError::InvalidRange(_) => "22003",
        EngineError::InvalidSelection(_) => "RS002",
        EngineError::AlreadyCancelled => "RS003",
        EngineError::EventAlreadyPassed => "RS004",
        EngineError::WithinLockoutWindow { .. } => "RS005",
        EngineError::InvalidCode => "RS006",
        EngineError::Expired => "RS007",
        EngineError::SlotNoLongerAvailable => "RS008",
        EngineError::RequestCancelled => "57014",
        EngineError::NotFound(_) => "P0002",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::UnknownService(_) => "23503",
        EngineError::ContactMismatch => "RS009",
        EngineError::InvalidToken => "RS010",
        EngineError::InvalidInput(_) => "22023",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::Delivery(_) => "RS011",
        EngineError::Journal(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
