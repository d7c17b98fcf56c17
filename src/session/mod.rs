//! Client sessions.
//!
//! A [`Session`] owns one client socket and walks it through the
//! connection states: greeting, optional TLS upgrade, handshake response
//! and authentication, backend connect, then the command loop. Statements
//! of a `COM_QUERY` are routed one at a time and each unit's response is
//! fully encoded before anything is written.

mod registry;
mod state;
mod variables;

pub use registry::{ConnectionHandle, ConnectionRegistry};
pub use state::{ProtocolStatus, SessionState, VariableError, VariableScope};
pub use variables::{parse_bool, DefinitionError, GlobalSettings, SystemVariable};

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::backend::{BackendConnection, BackendError, ExecuteError, StatementResult};
use crate::metrics::metrics;
use crate::parser::split_statements;
use crate::protocol::capabilities::{CLIENT_DEPRECATE_EOF, CLIENT_PROTOCOL_41};
use crate::protocol::error_codes::*;
use crate::protocol::handshake::{
    auth_switch_request, verify_native_password, NATIVE_PASSWORD_PLUGIN, SCRAMBLE_LEN,
};
use crate::protocol::response::{column_count, result_set_end, text_row};
use crate::protocol::status::{
    SERVER_MORE_RESULTS_EXISTS, SERVER_STATUS_AUTOCOMMIT, SERVER_STATUS_IN_TRANS,
};
use crate::protocol::{
    ClientCommand, ClientHandshake, ColumnDefinition, CommandError, EofPacket, ErrPacket,
    HandshakeMessage, OkPacket, Packet, PacketCodec, ServerGreeting, ValueError,
};
use crate::router::{ColumnOverride, Route};
use crate::server::ServerContext;
use crate::tls::MaybeTlsStream;

type ClientStream<S> = Framed<MaybeTlsStream<S>, PacketCodec>;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Client disconnected")]
    ClientDisconnected,

    #[error("No database selected")]
    NoDatabase,

    #[error("Backend connection failed: {0}")]
    BackendConnect(#[from] BackendError),

    #[error("Session terminated")]
    Terminated,
}

/// Handle a single client connection
pub struct Session {
    /// Connection ID, also sent in the greeting
    pub id: u32,
    /// Session state
    pub state: SessionState,
    ctx: Arc<ServerContext>,
    backend: BackendConnection,
    cancel: CancellationToken,
    scramble: [u8; SCRAMBLE_LEN],
    /// Sequence id of the next packet, in either direction
    sequence: u8,
}

impl Session {
    pub fn new(id: u32, ctx: Arc<ServerContext>, cancel: CancellationToken) -> Self {
        Self {
            id,
            state: SessionState::new(ctx.globals.clone()),
            backend: BackendConnection::new(ctx.backend.clone(), ctx.connector.clone()),
            ctx,
            cancel,
            scramble: [0u8; SCRAMBLE_LEN],
            sequence: 0,
        }
    }

    /// Run the session until the client quits, a fatal error occurs or the
    /// registry terminates it. The backend connection is closed on every path.
    pub async fn run<S>(mut self, stream: S) -> Result<(), SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let id = self.id;
        let client = Framed::new(MaybeTlsStream::Plain(stream), PacketCodec);
        let cancel = self.cancel.clone();

        let result = tokio::select! {
            _ = cancel.cancelled() => {
                info!(session_id = id, "Session terminated by registry");
                Err(SessionError::Terminated)
            }
            result = self.drive(client) => result,
        };

        self.state.set_protocol_status(ProtocolStatus::Terminated);
        self.backend.terminate().await;
        result
    }

    async fn drive<S>(&mut self, mut client: ClientStream<S>) -> Result<(), SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            match self.state.protocol_status() {
                ProtocolStatus::ConnectionInitiated => self.send_greeting(&mut client).await?,
                ProtocolStatus::ServerGreetingSent => self.handle_handshake(&mut client).await?,
                ProtocolStatus::RestartWithSsl => client = self.upgrade_tls(client).await?,
                ProtocolStatus::Authenticated => self.connect_backend(&mut client).await?,
                ProtocolStatus::QueryWait => self.handle_command(&mut client).await?,
                ProtocolStatus::Terminated => {
                    if let Err(e) = client.close().await {
                        debug!(session_id = self.id, error = %e, "Error closing client stream");
                    }
                    return Ok(());
                }
            }
        }
    }

    async fn send_greeting<S>(&mut self, client: &mut ClientStream<S>) -> Result<(), SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let greeting = ServerGreeting::new(
            self.id,
            &self.ctx.server_version,
            self.ctx.capabilities(),
        );
        self.scramble = greeting.scramble;
        self.sequence = 0;
        self.write_packet(client, greeting.encode()).await?;
        self.state
            .set_protocol_status(ProtocolStatus::ServerGreetingSent);
        debug!(session_id = self.id, "Sent server greeting");
        Ok(())
    }

    async fn handle_handshake<S>(
        &mut self,
        client: &mut ClientStream<S>,
    ) -> Result<(), SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let packet = self.read_packet(client).await?;
        let message = match HandshakeMessage::parse(&packet.payload) {
            Ok(message) => message,
            Err(e) => {
                let err = ErrPacket::new(ER_MALFORMED_PACKET, "08S01", "Malformed handshake packet");
                let cause = SessionError::Protocol(format!("malformed handshake response: {}", e));
                return Err(self.fail(client, err, cause).await);
            }
        };

        match message {
            HandshakeMessage::SslRequest(request) => {
                if self.ctx.tls.is_none() || client.get_ref().is_tls() {
                    let err = ErrPacket::new(
                        ER_NOT_SUPPORTED_YET,
                        "08004",
                        "SSL connection is not available",
                    );
                    let cause = SessionError::Protocol("unexpected SSL request".into());
                    return Err(self.fail(client, err, cause).await);
                }
                debug!(
                    session_id = self.id,
                    capabilities = request.capability_flags,
                    "Client requested TLS"
                );
                self.state.set_protocol_status(ProtocolStatus::RestartWithSsl);
                Ok(())
            }
            HandshakeMessage::Response(handshake) => self.authenticate(client, handshake).await,
        }
    }

    async fn authenticate<S>(
        &mut self,
        client: &mut ClientStream<S>,
        handshake: ClientHandshake,
    ) -> Result<(), SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if handshake.capability_flags & CLIENT_PROTOCOL_41 == 0 {
            let err = ErrPacket::new(
                ER_NOT_SUPPORTED_AUTH_MODE,
                "08004",
                "Client does not support authentication protocol requested by server",
            );
            let cause = SessionError::Protocol("client does not support protocol 4.1".into());
            return Err(self.fail(client, err, cause).await);
        }

        let negotiated = handshake.capability_flags & self.ctx.capabilities();
        self.state.set_from_handshake(
            handshake.username.clone(),
            handshake.database.clone(),
            negotiated,
            handshake.character_set,
        );

        if self.ctx.auth.is_enabled() {
            let password = self
                .ctx
                .auth
                .find_user(&handshake.username)
                .map(|user| user.password.clone());
            let Some(password) = password else {
                return Err(self.deny(client).await);
            };

            let mut auth_response = handshake.auth_response;
            if handshake.auth_plugin_name != NATIVE_PASSWORD_PLUGIN {
                debug!(
                    session_id = self.id,
                    plugin = %handshake.auth_plugin_name,
                    "Switching client to mysql_native_password"
                );
                let switch = auth_switch_request(&self.scramble);
                self.write_packet(client, switch).await?;
                auth_response = self.read_packet(client).await?.payload.to_vec();
            }

            if !verify_native_password(&password, &self.scramble, &auth_response) {
                return Err(self.deny(client).await);
            }
        }

        info!(
            session_id = self.id,
            username = %self.state.username,
            database = ?self.state.database,
            "Client authenticated"
        );
        self.state.set_protocol_status(ProtocolStatus::Authenticated);
        Ok(())
    }

    async fn deny<S>(&mut self, client: &mut ClientStream<S>) -> SessionError
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        metrics().record_auth_failure();
        let message = format!("Access denied for user '{}'", self.state.username);
        let err = ErrPacket::new(ER_ACCESS_DENIED, "28000", message.clone());
        self.fail(client, err, SessionError::Auth(message)).await
    }

    async fn upgrade_tls<S>(
        &mut self,
        client: ClientStream<S>,
    ) -> Result<ClientStream<S>, SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let Some(acceptor) = self.ctx.tls.clone() else {
            return Err(SessionError::Protocol("TLS is not configured".into()));
        };

        let parts = client.into_parts();
        if !parts.read_buf.is_empty() {
            return Err(SessionError::Protocol(
                "client sent data before the TLS handshake".into(),
            ));
        }
        let stream = match parts.io {
            MaybeTlsStream::Plain(stream) => stream,
            MaybeTlsStream::Tls(_) => {
                return Err(SessionError::Protocol("connection is already encrypted".into()))
            }
        };

        let tls = acceptor.accept(stream).await?;
        metrics().record_tls_upgrade();
        info!(session_id = self.id, "Connection upgraded to TLS");

        // The client answers over TLS with a full handshake response
        self.state
            .set_protocol_status(ProtocolStatus::ServerGreetingSent);
        Ok(Framed::new(MaybeTlsStream::Tls(Box::new(tls)), PacketCodec))
    }

    async fn connect_backend<S>(
        &mut self,
        client: &mut ClientStream<S>,
    ) -> Result<(), SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let database = self
            .state
            .database
            .clone()
            .or_else(|| self.ctx.backend.default_database.clone());
        let Some(database) = database else {
            let err = ErrPacket::new(ER_NO_DB, "3D000", "No database selected");
            return Err(self.fail(client, err, SessionError::NoDatabase).await);
        };

        let ctx = self.ctx.clone();
        if let Err(e) = self.backend.connect(&database, ctx.credentials.as_ref()).await {
            let err = e.to_err_packet();
            return Err(self.fail(client, err, SessionError::BackendConnect(e)).await);
        }
        self.state.database = Some(database);

        // Sessions start with the configured autocommit mode
        if !self.state.autocommit() {
            if let Err(e) = self.backend.process_unset_autocommit().await {
                let err = e.to_err_packet();
                return Err(self.fail(client, err, SessionError::BackendConnect(e)).await);
            }
        }

        let ok = OkPacket::new()
            .with_status(self.status_flags())
            .encode(self.capabilities());
        self.write_packet(client, ok).await?;
        self.state.set_protocol_status(ProtocolStatus::QueryWait);
        Ok(())
    }

    async fn handle_command<S>(&mut self, client: &mut ClientStream<S>) -> Result<(), SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.sequence = 0;
        let packet = match self.read_packet(client).await {
            Ok(packet) => packet,
            Err(SessionError::ClientDisconnected) => {
                info!(session_id = self.id, "Client disconnected");
                self.state.set_protocol_status(ProtocolStatus::Terminated);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let capabilities = self.capabilities();
        match ClientCommand::parse(&packet.payload, capabilities) {
            Ok(ClientCommand::Query(sql)) => self.handle_query(client, &sql).await,
            Ok(ClientCommand::Quit) => {
                debug!(session_id = self.id, "Client sent COM_QUIT");
                self.state.set_protocol_status(ProtocolStatus::Terminated);
                Ok(())
            }
            Ok(ClientCommand::Unsupported(code)) => {
                let err = ErrPacket::new(ER_UNKNOWN_COM, "08S01", "Unknown command");
                let cause = SessionError::Protocol(format!("unsupported command 0x{:02x}", code));
                Err(self.fail(client, err, cause).await)
            }
            Err(e @ CommandError::AttributesNotSupported(_)) => {
                let err = ErrPacket::new(ER_NOT_SUPPORTED_YET, "42000", e.to_string());
                self.write_packet(client, err.encode(capabilities)).await
            }
            Err(e) => {
                let err = ErrPacket::new(ER_MALFORMED_PACKET, "08S01", "Malformed packet");
                Err(self.fail(client, err, SessionError::Protocol(e.to_string())).await)
            }
        }
    }

    /// Run each statement of a batch in order, stopping at the first error
    #[instrument(skip(self, client), fields(session_id = self.id, sql_preview = %truncate_sql(sql, 100)))]
    async fn handle_query<S>(
        &mut self,
        client: &mut ClientStream<S>,
        sql: &str,
    ) -> Result<(), SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let capabilities = self.capabilities();
        let units = split_statements(sql);
        if units.is_empty() {
            let err = ErrPacket::new(ER_EMPTY_QUERY, "42000", "Query was empty");
            return self.write_packet(client, err.encode(capabilities)).await;
        }

        let last = units.len() - 1;
        for (index, unit) in units.iter().enumerate() {
            let route = self.ctx.router.route(unit);
            let start = Instant::now();
            let outcome = self.execute_unit(&route, unit).await;
            metrics().record_query(route.kind(), start.elapsed().as_secs_f64());

            let mut status = self.status_flags();
            if index < last {
                status |= SERVER_MORE_RESULTS_EXISTS;
            }

            let column_override = match &route {
                Route::Translated(query) => Some(&query.column_override),
                _ => None,
            };

            let result = match outcome {
                Ok(result) => result,
                Err(e) => {
                    debug!(route = route.kind(), error = %e, "Statement failed");
                    metrics().record_query_error(e.kind());
                    return self
                        .write_packet(client, e.to_err_packet().encode(capabilities))
                        .await;
                }
            };

            match encode_result(&result, column_override, capabilities, status) {
                Ok(payloads) => self.write_packets(client, payloads).await?,
                Err(e) => {
                    warn!(route = route.kind(), error = %e, "Failed to encode result");
                    metrics().record_query_error("encode_error");
                    let err = ErrPacket::new(ER_UNKNOWN, "HY000", e.to_string());
                    return self.write_packet(client, err.encode(capabilities)).await;
                }
            }
        }
        Ok(())
    }

    async fn execute_unit(&mut self, route: &Route, sql: &str) -> Result<StatementResult, ExecuteError> {
        match route {
            Route::Translated(query) => {
                debug!(output = %truncate_sql(&query.output_query, 100), "Running translated query");
                Ok(self.backend.execute_backend(&query.output_query).await?)
            }
            Route::Bypass => Ok(StatementResult::UpdateCount(0)),
            Route::Kill(id) => {
                if self.ctx.registry.terminate(*id) {
                    Ok(StatementResult::UpdateCount(0))
                } else {
                    Err(ExecuteError::UnknownConnection(*id))
                }
            }
            Route::Execute => self.backend.execute(sql, &mut self.state).await,
        }
    }

    /// Read the next packet and check its sequence id
    async fn read_packet<S>(&mut self, client: &mut ClientStream<S>) -> Result<Packet, SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let packet = match client.next().await {
            Some(Ok(packet)) => packet,
            Some(Err(e)) => {
                let err = ErrPacket::new(ER_MALFORMED_PACKET, "08S01", "Malformed packet");
                return Err(self.fail(client, err, SessionError::Protocol(e.to_string())).await);
            }
            None => return Err(SessionError::ClientDisconnected),
        };

        if packet.sequence_id != self.sequence {
            let err = ErrPacket::new(ER_NET_PACKETS_OUT_OF_ORDER, "08S01", "Got packets out of order");
            let cause = SessionError::Protocol(format!(
                "expected sequence id {}, got {}",
                self.sequence, packet.sequence_id
            ));
            return Err(self.fail(client, err, cause).await);
        }
        self.sequence = packet.sequence_id.wrapping_add(1);
        Ok(packet)
    }

    async fn write_packet<S>(
        &mut self,
        client: &mut ClientStream<S>,
        payload: Bytes,
    ) -> Result<(), SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.write_packets(client, vec![payload]).await
    }

    async fn write_packets<S>(
        &mut self,
        client: &mut ClientStream<S>,
        payloads: Vec<Bytes>,
    ) -> Result<(), SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        for payload in payloads {
            let packet = Packet::new(self.sequence, payload);
            self.sequence = self.sequence.wrapping_add(1);
            client.feed(packet).await?;
        }
        client.flush().await?;
        Ok(())
    }

    /// Best-effort ERR, then mark the session terminated
    async fn fail<S>(
        &mut self,
        client: &mut ClientStream<S>,
        err: ErrPacket,
        cause: SessionError,
    ) -> SessionError
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        warn!(
            session_id = self.id,
            code = err.error_code,
            error = %cause,
            "Terminating session"
        );
        let payload = err.encode(self.capabilities());
        if let Err(e) = self.write_packet(client, payload).await {
            debug!(session_id = self.id, error = %e, "Failed to send error packet");
        }
        self.state.set_protocol_status(ProtocolStatus::Terminated);
        cause
    }

    /// Negotiated capabilities, or the advertised ones before the handshake
    fn capabilities(&self) -> u32 {
        if self.state.capability_flags == 0 {
            self.ctx.capabilities()
        } else {
            self.state.capability_flags
        }
    }

    fn status_flags(&self) -> u16 {
        let mut flags = 0;
        if self.backend.is_autocommit() {
            flags |= SERVER_STATUS_AUTOCOMMIT;
        }
        if self.backend.is_transaction_active() {
            flags |= SERVER_STATUS_IN_TRANS;
        }
        flags
    }
}

/// Encode one unit's complete response
fn encode_result(
    result: &StatementResult,
    column_override: Option<&ColumnOverride>,
    capabilities: u32,
    status: u16,
) -> Result<Vec<Bytes>, ValueError> {
    let result_set = match result {
        StatementResult::UpdateCount(count) => {
            return Ok(vec![OkPacket::new()
                .with_affected_rows(*count)
                .with_status(status)
                .encode(capabilities)]);
        }
        StatementResult::ResultSet(result_set) => result_set,
    };

    let mut payloads = Vec::with_capacity(result_set.columns.len() + result_set.rows.len() + 3);
    payloads.push(column_count(result_set.columns.len()));
    for column in &result_set.columns {
        let name = match column_override {
            Some(column_override) => column_override.apply(&column.name),
            None => column.name.clone(),
        };
        payloads.push(ColumnDefinition::for_column(column, &name)?.encode());
    }
    if capabilities & CLIENT_DEPRECATE_EOF == 0 {
        payloads.push(EofPacket::new(status).encode(capabilities));
    }
    for row in &result_set.rows {
        payloads.push(text_row(&result_set.columns, row)?);
    }
    payloads.push(result_set_end(capabilities, status));
    Ok(payloads)
}

/// Truncate SQL for logging
fn truncate_sql(sql: &str, max_len: usize) -> Cow<'_, str> {
    match sql.char_indices().nth(max_len) {
        None => Cow::Borrowed(sql),
        Some((end, _)) => Cow::Owned(format!("{}...", &sql[..end])),
    }
}
