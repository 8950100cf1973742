use std::collections::HashSet;
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
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type, METADATA_USER};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::SeatLedgerAuthSource;
use crate::engine::{Ledger, LedgerError};
use crate::model::*;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, PaymentOutcome, SqlError, StatementKind};

pub struct SeatLedgerHandler {
    ledger: Arc<Ledger>,
    admins: Arc<HashSet<String>>,
    query_parser: Arc<SeatLedgerQueryParser>,
}

impl SeatLedgerHandler {
    pub fn new(ledger: Arc<Ledger>, admins: Arc<HashSet<String>>) -> Self {
        Self {
            ledger,
            admins,
            query_parser: Arc::new(SeatLedgerQueryParser),
        }
    }

    /// The login user is the ticket holder; admins are configured by name.
    fn identity<C: ClientInfo>(&self, client: &C) -> Identity {
        let user = client
            .metadata()
            .get(METADATA_USER)
            .cloned()
            .unwrap_or_default();
        if self.admins.contains(&user) {
            Identity::admin(user)
        } else {
            Identity::user(user)
        }
    }

    async fn run(&self, identity: &Identity, query: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(identity, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, identity: &Identity, cmd: Command) -> PgWireResult<Response> {
        let ledger = &self.ledger;
        match cmd {
            Command::InsertEvent { event } => {
                ledger.publish_event(identity, event).await.map_err(ledger_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::DeleteEvent { id } => {
                ledger.withdraw_event(identity, &id).await.map_err(ledger_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectEvents => {
                let events = ledger.list_events().await.map_err(ledger_err)?;
                event_rows(&events)
            }
            Command::InsertBooking { event_id, tier, seats } => {
                let booking = ledger
                    .reserve(identity, &event_id, &tier, seats)
                    .await
                    .map_err(ledger_err)?;
                booking_rows(std::slice::from_ref(&booking))
            }
            Command::DeleteBooking { id } => {
                ledger.cancel(identity, id).await.map_err(ledger_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectBookings { event_id: None } => {
                let bookings = ledger
                    .bookings_for_user(&identity.user_id)
                    .await
                    .map_err(ledger_err)?;
                booking_rows(&bookings)
            }
            Command::SelectBookings {
                event_id: Some(event_id),
            } => {
                let bookings = ledger
                    .bookings_for_event(identity, &event_id)
                    .await
                    .map_err(ledger_err)?;
                booking_rows(&bookings)
            }
            Command::InsertPayment {
                booking_id,
                token,
                outcome,
            } => {
                let booking = match outcome {
                    PaymentOutcome::Succeeded => ledger.confirm_payment(booking_id, &token).await,
                    PaymentOutcome::Declined => ledger.decline_payment(booking_id, &token).await,
                }
                .map_err(ledger_err)?;
                booking_rows(booking.as_slice())
            }
            Command::SelectAvailability { event_id } => {
                let free = ledger.free_seats(&event_id).await.map_err(ledger_err)?;
                let schema = Arc::new(availability_schema());
                let rows: Vec<PgWireResult<_>> = free
                    .iter()
                    .map(|seat| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&event_id)?;
                        encoder.encode_field(&seat.to_string())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectSeats { event_id } => {
                let views = ledger.seat_map(&event_id).await.map_err(ledger_err)?;
                let schema = Arc::new(seats_schema());
                let rows: Vec<PgWireResult<_>> = views
                    .iter()
                    .map(|view| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&view.seat.to_string())?;
                        encoder.encode_field(&view.tier)?;
                        encoder.encode_field(&view.status.as_str())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectOccupancy { event_id } => {
                let occ = ledger.occupancy(&event_id).await.map_err(ledger_err)?;
                let schema = Arc::new(occupancy_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&occ.event_id)?;
                encoder.encode_field(&(occ.total_seats as i64))?;
                encoder.encode_field(&(occ.booked_seats as i64))?;
                encoder.encode_field(&(occ.free_seats as i64))?;
                encoder.encode_field(&(occ.confirmed_bookings as i64))?;
                encoder.encode_field(&occ.revenue.to_string())?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
        }
    }
}

fn event_rows(events: &[Event]) -> PgWireResult<Response> {
    let schema = Arc::new(events_schema());
    let mut rows = Vec::with_capacity(events.len());
    for event in events {
        let tiers = serde_json::to_string(&event.tiers).map_err(|e| internal_err(e.to_string()))?;
        let mut encoder = DataRowEncoder::new(schema.clone());
        encoder.encode_field(&event.id)?;
        encoder.encode_field(&event.title)?;
        encoder.encode_field(&i32::from(event.seats_per_row))?;
        encoder.encode_field(&tiers)?;
        encoder.encode_field(&(event.total_seats() as i64))?;
        rows.push(Ok(encoder.take_row()));
    }
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn booking_rows(bookings: &[Booking]) -> PgWireResult<Response> {
    let schema = Arc::new(bookings_schema());
    let rows: Vec<PgWireResult<_>> = bookings
        .iter()
        .map(|b| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&b.id.to_string())?;
            encoder.encode_field(&b.event_id)?;
            encoder.encode_field(&b.user_id)?;
            encoder.encode_field(&b.tier_name)?;
            encoder.encode_field(&b.seat_list())?;
            encoder.encode_field(&b.total_amount.to_string())?;
            encoder.encode_field(&b.status.as_str())?;
            encoder.encode_field(&b.token)?;
            encoder.encode_field(&b.created_at)?;
            encoder.encode_field(&b.paid_at)?;
            encoder.encode_field(&b.closed_at)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn events_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("title", Type::VARCHAR),
        field("seats_per_row", Type::INT4),
        field("tiers", Type::VARCHAR),
        field("total_seats", Type::INT8),
    ]
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("event_id", Type::VARCHAR),
        field("user_id", Type::VARCHAR),
        field("tier", Type::VARCHAR),
        field("seats", Type::VARCHAR),
        field("total_amount", Type::VARCHAR),
        field("status", Type::VARCHAR),
        field("token", Type::VARCHAR),
        field("created_at", Type::INT8),
        field("paid_at", Type::INT8),
        field("closed_at", Type::INT8),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![field("event_id", Type::VARCHAR), field("seat", Type::VARCHAR)]
}

fn seats_schema() -> Vec<FieldInfo> {
    vec![
        field("seat", Type::VARCHAR),
        field("tier", Type::VARCHAR),
        field("status", Type::VARCHAR),
    ]
}

fn occupancy_schema() -> Vec<FieldInfo> {
    vec![
        field("event_id", Type::VARCHAR),
        field("total_seats", Type::INT8),
        field("booked_seats", Type::INT8),
        field("free_seats", Type::INT8),
        field("confirmed_bookings", Type::INT8),
        field("revenue", Type::VARCHAR),
    ]
}

/// Row shape of a statement, decided from its target table before it runs.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    match sql::statement_target(sql) {
        Ok((StatementKind::Insert, table)) if table == "bookings" || table == "payments" => {
            bookings_schema()
        }
        Ok((StatementKind::Select, table)) => match table.as_str() {
            "events" => events_schema(),
            "bookings" => bookings_schema(),
            "availability" => availability_schema(),
            "seats" => seats_schema(),
            "occupancy" => occupancy_schema(),
            _ => vec![],
        },
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for SeatLedgerHandler {
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
        let identity = self.identity(client);
        Ok(vec![self.run(&identity, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SeatLedgerQueryParser;

#[async_trait]
impl QueryParser for SeatLedgerQueryParser {
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
impl ExtendedQueryHandler for SeatLedgerHandler {
    type Statement = String;
    type QueryParser = SeatLedgerQueryParser;

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
        let identity = self.identity(client);
        let sql = substitute_params(portal);
        self.run(&identity, &sql).await
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

/// Highest `$N` placeholder in the SQL string.
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

/// Inline bound parameters (text format) as quoted literals. Highest index first so
/// `$1` never clobbers the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut result = portal.statement.statement.to_string();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
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

// ── Factory ──────────────────────────────────────────────────────

pub struct SeatLedgerFactory {
    handler: Arc<SeatLedgerHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<SeatLedgerAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl SeatLedgerFactory {
    pub fn new(ledger: Arc<Ledger>, password: String, admins: HashSet<String>) -> Self {
        let auth_source = SeatLedgerAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(SeatLedgerHandler::new(ledger, Arc::new(admins))),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SeatLedgerFactory {
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

/// Serve one client until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    factory: Arc<SeatLedgerFactory>,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn ledger_err(e: LedgerError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        e.sqlstate().into(),
        e.user_message(),
    )))
}

fn sql_err(e: SqlError) -> PgWireError {
    match e {
        SqlError::Ledger(e) => ledger_err(e),
        other => PgWireError::UserError(Box::new(ErrorInfo::new(
            "ERROR".into(),
            "42601".into(),
            other.to_string(),
        ))),
    }
}

fn internal_err(message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), "XX000".into(), message)))
}
