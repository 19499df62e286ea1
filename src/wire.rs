use std::fmt::Debug;
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
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

use crate::auth::StaydAuthSource;
use crate::engine::{Engine, EngineError};
use crate::fees::display_amount;
use crate::identity::{IdentityError, Principal};
use crate::model::*;
use crate::observability;
use crate::payment::{Booking, PaymentCoordinator};
use crate::sql::{self, Command};

pub struct StaydHandler {
    engine: Arc<Engine>,
    payments: Arc<PaymentCoordinator>,
    query_parser: Arc<StaydQueryParser>,
}

impl StaydHandler {
    pub fn new(engine: Arc<Engine>, payments: Arc<PaymentCoordinator>) -> Self {
        Self {
            engine,
            payments,
            query_parser: Arc::new(StaydQueryParser),
        }
    }

    fn resolve_principal<C: ClientInfo>(&self, client: &C) -> PgWireResult<Principal> {
        client
            .metadata()
            .get("user")
            .ok_or(IdentityError::Missing)
            .and_then(|user| Principal::from_login(user))
            .map_err(|e| user_error("28000", e.to_string()))
    }

    async fn run(&self, principal: &Principal, query: &str) -> PgWireResult<Vec<Response>> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(principal, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(
        &self,
        principal: &Principal,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        let engine = self.engine.as_ref();
        match cmd {
            Command::InsertProperty(new) => {
                engine
                    .create_property(principal, new)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateProperty { id, changes } => {
                engine
                    .update_property(principal, id, changes)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteProperty { id } => {
                engine
                    .delete_property(principal, id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectProperty { id } => {
                let schema = Arc::new(property_schema());
                let rows: Vec<PgWireResult<_>> = engine
                    .get_property(id)
                    .await
                    .into_iter()
                    .map(|p| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&p.id.to_string())?;
                        encoder.encode_field(&p.owner_id.to_string())?;
                        encoder.encode_field(&p.name)?;
                        encoder.encode_field(&p.description)?;
                        encoder.encode_field(&p.address)?;
                        encoder.encode_field(&display_amount(p.price_per_night))?;
                        encoder.encode_field(&display_amount(p.deposit))?;
                        encoder.encode_field(&p.available_from)?;
                        encoder.encode_field(&p.available_to)?;
                        encoder.encode_field(&p.available)?;
                        encoder.encode_field(&p.cancellation_policy.as_str().to_string())?;
                        encoder.encode_field(&display_amount(p.cancellation_fee_per_night))?;
                        encoder.encode_field(&p.location.latitude)?;
                        encoder.encode_field(&p.location.longitude)?;
                        encoder.encode_field(&p.reservation_id.map(|r| r.to_string()))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::InsertReservation {
                reservation,
                payment_token,
            } => {
                let booking = self
                    .payments
                    .reserve_and_charge(engine, principal, reservation, &payment_token)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(reservation_schema(true));
                let mut encoder = DataRowEncoder::new(schema.clone());
                let row = encode_booking(&mut encoder, &booking).map(|()| encoder.take_row());
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(vec![row]),
                ))])
            }
            Command::UpdateReservation {
                id,
                reservation_from,
                reservation_to,
            } => {
                engine
                    .reschedule_reservation(principal, id, reservation_from, reservation_to)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteReservation { id } => {
                engine
                    .delete_reservation(principal, id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectReservation { id } => {
                let schema = Arc::new(reservation_schema(false));
                let rows: Vec<PgWireResult<_>> = engine
                    .get_reservation(id)
                    .await
                    .into_iter()
                    .map(|r| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encode_reservation(&mut encoder, &r)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::DeleteUser { id } => {
                let removal = engine.remove_user(principal, id).await.map_err(engine_err)?;
                let rows = removal.properties.len() + removal.reservations.len();
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(rows))])
            }
        }
    }
}

fn encode_reservation(encoder: &mut DataRowEncoder, r: &ReservationInfo) -> PgWireResult<()> {
    encoder.encode_field(&r.id.to_string())?;
    encoder.encode_field(&r.property_id.to_string())?;
    encoder.encode_field(&r.guest_id.to_string())?;
    encoder.encode_field(&r.reservation_from)?;
    encoder.encode_field(&r.reservation_to)?;
    encoder.encode_field(&r.reserved)?;
    encoder.encode_field(&r.fees.nights)?;
    encoder.encode_field(&display_amount(r.fees.reservation_fee))?;
    encoder.encode_field(&display_amount(r.fees.service_fee))?;
    encoder.encode_field(&display_amount(r.fees.total_fee))?;
    encoder.encode_field(&r.available_from)?;
    encoder.encode_field(&r.available_to)?;
    Ok(())
}

fn encode_booking(encoder: &mut DataRowEncoder, booking: &Booking) -> PgWireResult<()> {
    encode_reservation(encoder, &booking.reservation)?;
    let (status, error) = match &booking.payment {
        Ok(_) => ("paid", None),
        Err(e) if booking.released => (e.status(), Some(format!("{e}; reservation released"))),
        Err(e) => (e.status(), Some(e.to_string())),
    };
    encoder.encode_field(&status.to_string())?;
    encoder.encode_field(&error)?;
    Ok(())
}

fn text_field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn property_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("owner_id", Type::VARCHAR),
        text_field("name", Type::VARCHAR),
        text_field("description", Type::VARCHAR),
        text_field("address", Type::VARCHAR),
        text_field("price_per_night", Type::VARCHAR),
        text_field("deposit", Type::VARCHAR),
        text_field("available_from", Type::INT8),
        text_field("available_to", Type::INT8),
        text_field("available", Type::BOOL),
        text_field("cancellation_policy", Type::VARCHAR),
        text_field("cancellation_fee_per_night", Type::VARCHAR),
        text_field("latitude", Type::FLOAT8),
        text_field("longitude", Type::FLOAT8),
        text_field("reservation_id", Type::VARCHAR),
    ]
}

/// Reservation row; the INSERT result adds the payment outcome.
fn reservation_schema(with_payment: bool) -> Vec<FieldInfo> {
    let mut fields = vec![
        text_field("id", Type::VARCHAR),
        text_field("property_id", Type::VARCHAR),
        text_field("guest_id", Type::VARCHAR),
        text_field("reservation_from", Type::INT8),
        text_field("reservation_to", Type::INT8),
        text_field("reserved", Type::BOOL),
        text_field("reservation_in_nights", Type::INT8),
        text_field("reservation_fees", Type::VARCHAR),
        text_field("service_fees", Type::VARCHAR),
        text_field("total_fees", Type::VARCHAR),
        text_field("available_from", Type::INT8),
        text_field("available_to", Type::INT8),
    ];
    if with_payment {
        fields.push(text_field("payment_status", Type::VARCHAR));
        fields.push(text_field("payment_error", Type::VARCHAR));
    }
    fields
}

/// Result columns for a statement, judged from its text before parameters
/// are bound.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.trim_start().to_uppercase();
    let reservations = upper.contains("RESERVATIONS");
    if upper.starts_with("SELECT") && upper.contains("PROPERTIES") {
        property_schema()
    } else if upper.starts_with("SELECT") && reservations {
        reservation_schema(false)
    } else if upper.starts_with("INSERT") && reservations {
        reservation_schema(true)
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for StaydHandler {
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
        let principal = self.resolve_principal(client)?;
        self.run(&principal, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct StaydQueryParser;

#[async_trait]
impl QueryParser for StaydQueryParser {
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
impl ExtendedQueryHandler for StaydHandler {
    type Statement = String;
    type QueryParser = StaydQueryParser;

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
        let principal = self.resolve_principal(client)?;
        let sql = substitute_params(portal);
        self.run(&principal, &sql)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| user_error("XX000", "statement produced no response".into()))
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

/// `$N` placeholders outside quoted text, as `(byte range, N)`.
fn placeholders(sql: &str) -> Vec<(Range<usize>, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        match (quote, bytes[i]) {
            (Some(q), b) => {
                if b == q {
                    quote = None;
                }
                i += 1;
            }
            (None, b @ (b'\'' | b'"')) => {
                quote = Some(b);
                i += 1;
            }
            (None, b'$') => {
                let mut end = i + 1;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                if let Ok(n) = sql[i + 1..end].parse::<usize>() {
                    found.push((i..end, n));
                }
                i = end;
            }
            (None, _) => i += 1,
        }
    }
    found
}

/// Highest `$N` placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    placeholders(sql).into_iter().map(|(_, n)| n).max().unwrap_or(0)
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    bind_text_params(&portal.statement.statement, &portal.parameters)
}

/// One left-to-right pass, so bound text is never rescanned for placeholders.
fn bind_text_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut bound = String::with_capacity(sql.len());
    let mut copied = 0;
    for (range, n) in placeholders(sql) {
        let Some(param) = n.checked_sub(1).and_then(|i| params.get(i)) else {
            continue;
        };
        bound.push_str(&sql[copied..range.start]);
        match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes.as_ref());
                bound.push('\'');
                bound.push_str(&text.replace('\'', "''"));
                bound.push('\'');
            }
            None => bound.push_str("NULL"),
        }
        copied = range.end;
    }
    bound.push_str(&sql[copied..]);
    bound
}

// ── Factory ──────────────────────────────────────────────────────

pub struct StaydFactory {
    handler: Arc<StaydHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<StaydAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl StaydFactory {
    pub fn new(engine: Arc<Engine>, payments: Arc<PaymentCoordinator>, password: String) -> Self {
        let auth_source = StaydAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(StaydHandler::new(engine, payments)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for StaydFactory {
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
    payments: Arc<PaymentCoordinator>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = StaydFactory::new(engine, payments, password);
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
