use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use futures::{stream, Sink, SinkExt};
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
use pgwire::messages::response::NotificationResponse;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::auth::AmenitydAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::notify;
use crate::observability;
use crate::sql::{self, Command, ReservationFilter, StatusChange};
use crate::tenant::TenantManager;

type Listeners = HashMap<Ulid, broadcast::Receiver<Event>>;

/// One handler per connection: it owns that connection's LISTEN set.
pub struct AmenitydHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<AmenitydQueryParser>,
    listeners: Mutex<Listeners>,
}

impl AmenitydHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(AmenitydQueryParser),
            listeners: Mutex::new(HashMap::new()),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager
            .get_or_create(&db)
            .map_err(|e| user_error("08006", format!("tenant error: {e}")))
    }

    fn listeners(&self) -> MutexGuard<'_, Listeners> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Parse, execute and record metrics for one statement, then flush any
    /// notifications that arrived for this connection's channels.
    async fn run<C>(&self, client: &mut C, sql: &str) -> PgWireResult<Response>
    where
        C: ClientInfo + Sink<PgWireBackendMessage> + Unpin + Send,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let start = Instant::now();

        let result = self.execute_command(&engine, cmd).await;

        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());

        self.deliver_notifications(client).await?;
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Response> {
        match cmd {
            Command::InsertMember { user_id, location_id, role } => {
                engine
                    .grant_member(user_id, location_id, role)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::DeleteMember { user_id, location_id } => {
                engine
                    .revoke_member(user_id, location_id)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::InsertAmenity { amenity } => {
                engine.create_amenity(amenity).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdateAmenity { id, patch } => {
                let only_active = patch
                    == AmenityPatch {
                        is_active: patch.is_active,
                        ..Default::default()
                    };
                let result = match patch.is_active {
                    Some(active) if only_active => engine.set_amenity_active(id, active).await,
                    _ => engine.update_amenity(id, patch).await,
                };
                result.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteAmenity { id } => {
                engine.delete_amenity(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::InsertSchedule { entry } => {
                engine.set_schedule(entry).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::DeleteSchedule { amenity_id, day_of_week } => {
                engine
                    .remove_schedule(amenity_id, day_of_week)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::InsertReservation { request, returning } => {
                let reservation = engine
                    .create_reservation(request)
                    .await
                    .map_err(engine_err)?;
                if returning {
                    Ok(reservation_response(&[reservation]))
                } else {
                    Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
                }
            }
            Command::UpdateReservation { id, change } => {
                let result = match change {
                    StatusChange::Approve { by } => engine.approve_reservation(id, by).await,
                    StatusChange::Reject { by, reason } => engine.reject_reservation(id, by, reason).await,
                    StatusChange::Cancel { by } => engine.cancel_reservation(id, by).await,
                };
                result.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::SelectAvailability { amenity_id, date } => {
                let day = engine
                    .check_availability(amenity_id, date)
                    .await
                    .map_err(engine_err)?;
                let slots: Vec<_> = day
                    .slots
                    .iter()
                    .map(|s| {
                        json!({
                            "start_time": format_time(s.span.start),
                            "end_time": format_time(s.span.end),
                            "available": s.available,
                        })
                    })
                    .collect();
                let row = (
                    amenity_id.to_string(),
                    date.to_string(),
                    day.available,
                    day.reason.map(|r| r.as_str().to_string()),
                    serde_json::Value::Array(slots).to_string(),
                );
                Ok(query_response(availability_schema(), &[row], |enc, row| {
                    enc.encode_field(&row.0)?;
                    enc.encode_field(&row.1)?;
                    enc.encode_field(&row.2)?;
                    enc.encode_field(&row.3)?;
                    enc.encode_field(&row.4)
                }))
            }
            Command::SelectSlots { amenity_id, date } => {
                let day = engine
                    .check_availability(amenity_id, date)
                    .await
                    .map_err(engine_err)?;
                let aid = amenity_id.to_string();
                let date = date.to_string();
                Ok(query_response(slots_schema(), &day.slots, |enc, slot| {
                    enc.encode_field(&aid)?;
                    enc.encode_field(&date)?;
                    enc.encode_field(&format_time(slot.span.start))?;
                    enc.encode_field(&format_time(slot.span.end))?;
                    enc.encode_field(&slot.available)
                }))
            }
            Command::SelectReservations { filter } => {
                let list = match filter {
                    ReservationFilter::Id(id) => match engine.get_reservation(id).await {
                        Ok(r) => vec![r],
                        Err(EngineError::NotFound(_)) => vec![],
                        Err(e) => return Err(engine_err(e)),
                    },
                    ReservationFilter::Amenity { amenity_id, date } => engine
                        .list_reservations(amenity_id, date)
                        .await
                        .map_err(engine_err)?,
                    ReservationFilter::User(user_id) => engine.list_user_reservations(user_id).await,
                };
                Ok(reservation_response(&list))
            }
            Command::SelectAmenities { location_id } => {
                let list = engine.list_amenities(location_id).await;
                Ok(query_response(amenity_schema(), &list, |enc, a| {
                    enc.encode_field(&a.id.to_string())?;
                    enc.encode_field(&a.location_id.to_string())?;
                    enc.encode_field(&a.name)?;
                    enc.encode_field(&a.category.as_str().to_string())?;
                    enc.encode_field(&(a.capacity as i32))?;
                    enc.encode_field(&a.is_paid)?;
                    enc.encode_field(&(a.hourly_rate_cents as i64))?;
                    enc.encode_field(&a.min_duration_hours.map(|h| h as i32))?;
                    enc.encode_field(&a.max_duration_hours.map(|h| h as i32))?;
                    enc.encode_field(&(a.advance_booking_days as i32))?;
                    enc.encode_field(&a.requires_approval)?;
                    enc.encode_field(&a.is_24_hours)?;
                    enc.encode_field(&a.available_hours.map(|s| format_time(s.start)))?;
                    enc.encode_field(&a.available_hours.map(|s| format_time(s.end)))?;
                    enc.encode_field(&(a.block_duration_minutes as i32))?;
                    enc.encode_field(&a.is_active)
                }))
            }
            Command::SelectSchedules { amenity_id } => {
                let list = engine.get_schedules(amenity_id).await.map_err(engine_err)?;
                Ok(query_response(schedule_schema(), &list, |enc, s| {
                    enc.encode_field(&s.amenity_id.to_string())?;
                    enc.encode_field(&(s.day_of_week as i32))?;
                    enc.encode_field(&format_time(s.window.start))?;
                    enc.encode_field(&format_time(s.window.end))?;
                    enc.encode_field(&(s.block_duration_minutes as i32))
                }))
            }
            Command::Listen { channel } => {
                let amenity_id = notify::parse_channel(&channel).ok_or_else(|| {
                    user_error(
                        "42602",
                        format!("invalid channel: {channel} (expected amenity_{{id}})"),
                    )
                })?;
                engine.get_amenity(amenity_id).await.map_err(engine_err)?;
                self.listeners()
                    .entry(amenity_id)
                    .or_insert_with(|| engine.notify.subscribe(amenity_id));
                debug!("listening on {channel}");
                Ok(Response::Execution(Tag::new("LISTEN")))
            }
            Command::Unlisten { channel } => {
                if let Some(amenity_id) = notify::parse_channel(&channel) {
                    self.listeners().remove(&amenity_id);
                }
                Ok(Response::Execution(Tag::new("UNLISTEN")))
            }
            Command::UnlistenAll => {
                self.listeners().clear();
                Ok(Response::Execution(Tag::new("UNLISTEN")))
            }
        }
    }

    /// Pull everything buffered on this connection's channels. Channels whose
    /// amenity was deleted are dropped.
    fn drain_notifications(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        self.listeners().retain(|amenity_id, rx| loop {
            match rx.try_recv() {
                Ok(event) => out.push((notify::channel_name(*amenity_id), notify::payload(&event))),
                Err(TryRecvError::Empty) => break true,
                Err(TryRecvError::Lagged(n)) => {
                    warn!("listener on amenity {amenity_id} lagged, {n} notifications dropped");
                }
                Err(TryRecvError::Closed) => break false,
            }
        });
        out
    }

    async fn deliver_notifications<C>(&self, client: &mut C) -> PgWireResult<()>
    where
        C: Sink<PgWireBackendMessage> + Unpin + Send,
        PgWireError: From<C::Error>,
    {
        let pid = std::process::id() as i32;
        for (channel, payload) in self.drain_notifications() {
            client
                .send(PgWireBackendMessage::NotificationResponse(
                    NotificationResponse::new(pid, channel, payload),
                ))
                .await?;
        }
        Ok(())
    }
}

// ── Result encoding ──────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        field("amenity_id", Type::VARCHAR),
        field("reservation_date", Type::VARCHAR),
        field("available", Type::BOOL),
        field("reason", Type::VARCHAR),
        field("slots", Type::VARCHAR),
    ]
}

fn slots_schema() -> Vec<FieldInfo> {
    vec![
        field("amenity_id", Type::VARCHAR),
        field("reservation_date", Type::VARCHAR),
        field("start_time", Type::VARCHAR),
        field("end_time", Type::VARCHAR),
        field("available", Type::BOOL),
    ]
}

fn reservation_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("amenity_id", Type::VARCHAR),
        field("user_id", Type::VARCHAR),
        field("reservation_date", Type::VARCHAR),
        field("start_time", Type::VARCHAR),
        field("end_time", Type::VARCHAR),
        field("attendees", Type::INT4),
        field("status", Type::VARCHAR),
        field("purpose", Type::VARCHAR),
        field("notes", Type::VARCHAR),
        field("total_cents", Type::INT8),
        field("created_at", Type::INT8),
        field("approved_by", Type::VARCHAR),
        field("rejected_by", Type::VARCHAR),
        field("rejection_reason", Type::VARCHAR),
        field("cancelled_by", Type::VARCHAR),
    ]
}

fn amenity_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("location_id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("category", Type::VARCHAR),
        field("capacity", Type::INT4),
        field("is_paid", Type::BOOL),
        field("hourly_rate_cents", Type::INT8),
        field("min_duration_hours", Type::INT4),
        field("max_duration_hours", Type::INT4),
        field("advance_booking_days", Type::INT4),
        field("requires_approval", Type::BOOL),
        field("is_24_hours", Type::BOOL),
        field("available_from", Type::VARCHAR),
        field("available_until", Type::VARCHAR),
        field("block_duration_minutes", Type::INT4),
        field("is_active", Type::BOOL),
    ]
}

fn schedule_schema() -> Vec<FieldInfo> {
    vec![
        field("amenity_id", Type::VARCHAR),
        field("day_of_week", Type::INT4),
        field("start_time", Type::VARCHAR),
        field("end_time", Type::VARCHAR),
        field("block_duration_minutes", Type::INT4),
    ]
}

fn query_response<T>(
    schema: Vec<FieldInfo>,
    items: &[T],
    encode: impl Fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> Response {
    let schema = Arc::new(schema);
    let rows: Vec<_> = items
        .iter()
        .map(|item| -> PgWireResult<_> {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn reservation_response(list: &[Reservation]) -> Response {
    let id_text = |id: Option<Ulid>| id.map(|u| u.to_string());
    query_response(reservation_schema(), list, |enc, r| {
        enc.encode_field(&r.id.to_string())?;
        enc.encode_field(&r.amenity_id.to_string())?;
        enc.encode_field(&r.user_id.to_string())?;
        enc.encode_field(&r.date.to_string())?;
        enc.encode_field(&format_time(r.span.start))?;
        enc.encode_field(&format_time(r.span.end))?;
        enc.encode_field(&(r.attendees as i32))?;
        enc.encode_field(&r.status.as_str().to_string())?;
        enc.encode_field(&r.purpose)?;
        enc.encode_field(&r.notes)?;
        enc.encode_field(&(r.total_cents as i64))?;
        enc.encode_field(&r.created_at)?;
        enc.encode_field(&id_text(r.approved_by))?;
        enc.encode_field(&id_text(r.rejected_by))?;
        enc.encode_field(&r.rejection_reason)?;
        enc.encode_field(&id_text(r.cancelled_by))
    })
}

/// Result columns for a statement, for Describe in the extended protocol.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    let words: Vec<&str> = upper.split_whitespace().collect();
    match words.first().copied() {
        Some("SELECT") => {
            let table = words
                .iter()
                .position(|w| *w == "FROM")
                .and_then(|i| words.get(i + 1))
                .map(|t| t.trim_end_matches(';'));
            match table {
                Some("AVAILABILITY") => availability_schema(),
                Some("SLOTS") => slots_schema(),
                Some("RESERVATIONS") => reservation_schema(),
                Some("AMENITIES") => amenity_schema(),
                Some("SCHEDULES") => schedule_schema(),
                _ => vec![],
            }
        }
        Some("INSERT") if words.contains(&"RETURNING") => reservation_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for AmenitydHandler {
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
        let response = self.run(client, query).await?;
        Ok(vec![response])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct AmenitydQueryParser;

#[async_trait]
impl QueryParser for AmenitydQueryParser {
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
impl ExtendedQueryHandler for AmenitydHandler {
    type Statement = String;
    type QueryParser = AmenitydQueryParser;

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
        let sql = substitute_params(portal);
        self.run(client, &sql).await
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
            if let Ok(n) = sql[start..i].parse::<usize>() {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
/// Highest index first, so `$1` never clobbers the prefix of `$10`.
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

pub struct AmenitydFactory {
    handler: Arc<AmenitydHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<AmenitydAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl AmenitydFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = AmenitydAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(AmenitydHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for AmenitydFactory {
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
) -> std::io::Result<()> {
    let factory = Arc::new(AmenitydFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

/// SQLSTATE for each engine error.
fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Validation(_) => "22023",
        EngineError::NotFound(_) | EngineError::NoSchedule { .. } => "P0002",
        EngineError::Forbidden(_) => "42501",
        EngineError::WindowClosed(_) => "22008",
        EngineError::InvalidRange(_) => "22003",
        EngineError::SlotTaken(_) => "23P01",
        EngineError::InvalidTransition { .. } | EngineError::Frozen(_) => "55000",
        EngineError::HasReservations(_) => "23503",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::LockTimeout(_) => "55P03",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Transition;

    #[test]
    fn count_params_finds_highest() {
        assert_eq!(count_params("SELECT * FROM amenities"), 0);
        assert_eq!(count_params("SELECT * FROM slots WHERE amenity_id = $1 AND reservation_date = $2"), 2);
        assert_eq!(count_params("VALUES ($2, $10, $1)"), 10);
    }

    #[test]
    fn result_schema_by_table() {
        assert_eq!(result_schema("SELECT * FROM availability WHERE amenity_id = $1").len(), 5);
        assert_eq!(result_schema("select * from slots").len(), 5);
        assert_eq!(result_schema("SELECT * FROM reservations;").len(), 16);
        assert_eq!(
            result_schema("INSERT INTO reservations (amenity_id) VALUES ($1) RETURNING *").len(),
            16
        );
        assert!(result_schema("INSERT INTO amenities (id) VALUES ($1)").is_empty());
        assert!(result_schema("LISTEN amenity_x").is_empty());
    }

    #[test]
    fn every_error_has_a_distinct_class() {
        let id = Ulid::new();
        let cases = [
            (EngineError::Validation("x".into()), "22023"),
            (EngineError::NotFound(id), "P0002"),
            (EngineError::Forbidden(id), "42501"),
            (EngineError::WindowClosed(UnavailableReason::PastDate), "22008"),
            (EngineError::InvalidRange("x"), "22003"),
            (EngineError::SlotTaken(None), "23P01"),
            (
                EngineError::InvalidTransition {
                    from: ReservationStatus::Rejected,
                    action: Transition::Approve,
                },
                "55000",
            ),
            (EngineError::Frozen(id), "55000"),
            (EngineError::HasReservations(id), "23503"),
            (EngineError::LimitExceeded("x"), "54000"),
            (EngineError::WalError("disk".into()), "58030"),
        ];
        for (err, code) in cases {
            assert_eq!(sqlstate(&err), code, "{err}");
        }
    }
}
