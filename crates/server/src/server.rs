//! TCP server for the session protocol.
//!
//! JSONL over TCP, one thread per connection. A connection says hello,
//! creates or uploads a session, attaches to it and submits chat turns.
//! Pushed events for the attached session are interleaved with replies.

use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use base64::Engine as _;

use gridchat_config::{RateLimitSettings, Settings};
use gridchat_core::{Cell, InitialGrid};
use gridchat_protocol::*;

use crate::rate_limiter::RateLimiter;
use crate::session::{ObserverId, RegistryError, Session, SessionRegistry};
use crate::wire;

/// Maximum consecutive parse failures before disconnecting a client.
const MAX_PARSE_FAILURES: u32 = 3;

const DEFAULT_MAX_CONNECTIONS: usize = 32;
const DEFAULT_MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Server capabilities announced in `welcome`.
const CAPABILITIES: &[&str] = &["create_session", "upload", "chat", "snapshot"];

#[derive(Debug, Clone)]
pub struct SessionServerConfig {
    /// Address to bind, e.g. `127.0.0.1:7878`. Port 0 picks a free port.
    pub bind: String,
    pub max_connections: usize,
    pub max_message_size: usize,
    pub rate_limit: RateLimitSettings,
    /// How often the listener sweeps idle sessions.
    pub reap_interval: Duration,
}

impl Default for SessionServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:0".to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            rate_limit: RateLimitSettings::default(),
            reap_interval: Duration::from_secs(5),
        }
    }
}

impl From<&Settings> for SessionServerConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            bind: settings.server.bind.clone(),
            max_connections: settings.server.max_connections,
            max_message_size: settings.server.max_message_size,
            rate_limit: settings.rate_limit,
            ..Self::default()
        }
    }
}

/// Operational counters.
#[derive(Clone, Default)]
pub struct ServerMetrics {
    /// Connections closed due to parse failure limit.
    pub connections_closed_parse_failures: Arc<AtomicU64>,
    /// Connections closed due to oversized message.
    pub connections_closed_oversize: Arc<AtomicU64>,
    /// Connections refused due to connection limit.
    pub connections_refused_limit: Arc<AtomicU64>,
    pub rate_limited: Arc<AtomicU64>,
    /// Observers told to resync after falling behind.
    pub resyncs: Arc<AtomicU64>,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self::default()
    }
}

/// The session server. Owns the listener thread; sessions live in the
/// injected [`SessionRegistry`].
pub struct SessionServer {
    registry: Arc<SessionRegistry>,
    listener_handle: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    bound_addr: Option<SocketAddr>,
    connections: Arc<AtomicUsize>,
    metrics: ServerMetrics,
}

impl SessionServer {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            listener_handle: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            bound_addr: None,
            connections: Arc::new(AtomicUsize::new(0)),
            metrics: ServerMetrics::new(),
        }
    }

    /// Bind and start accepting connections.
    pub fn start(&mut self, config: SessionServerConfig) -> std::io::Result<SocketAddr> {
        if let (true, Some(addr)) = (self.is_running(), self.bound_addr) {
            return Ok(addr);
        }
        self.shutdown.store(false, Ordering::SeqCst);

        let listener = TcpListener::bind(&config.bind)?;
        let addr = listener.local_addr()?;
        // Non-blocking so the loop can check the shutdown flag
        listener.set_nonblocking(true)?;

        let ctx = ListenerContext {
            registry: self.registry.clone(),
            shutdown: self.shutdown.clone(),
            connections: self.connections.clone(),
            metrics: self.metrics.clone(),
            next_conn_id: Arc::new(AtomicU64::new(1)),
            config,
        };
        let handle = thread::Builder::new()
            .name("session-listener".to_string())
            .spawn(move || run_listener(listener, ctx))?;

        self.listener_handle = Some(handle);
        self.bound_addr = Some(addr);
        log::info!("Session server listening on {}", addr);
        Ok(addr)
    }

    /// Stop accepting, close every session and wait for the listener.
    pub fn stop(&mut self) {
        if self.listener_handle.is_none() {
            return;
        }
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.listener_handle.take() {
            let _ = handle.join();
        }
        self.registry.close_all("server shutting down");
        self.bound_addr = None;
        log::info!("Session server stopped");
    }

    pub fn is_running(&self) -> bool {
        self.listener_handle.is_some() && !self.shutdown.load(Ordering::SeqCst)
    }

    pub fn bound_addr(&self) -> Option<SocketAddr> {
        self.bound_addr
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn metrics(&self) -> &ServerMetrics {
        &self.metrics
    }
}

impl Drop for SessionServer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Clone)]
struct ListenerContext {
    registry: Arc<SessionRegistry>,
    shutdown: Arc<AtomicBool>,
    connections: Arc<AtomicUsize>,
    metrics: ServerMetrics,
    next_conn_id: Arc<AtomicU64>,
    config: SessionServerConfig,
}

fn run_listener(listener: TcpListener, ctx: ListenerContext) {
    let mut last_reap = Instant::now();

    while !ctx.shutdown.load(Ordering::SeqCst) {
        if last_reap.elapsed() >= ctx.config.reap_interval {
            let reaped = ctx.registry.reap_idle();
            if !reaped.is_empty() {
                log::info!("Reaped {} idle session(s)", reaped.len());
            }
            last_reap = Instant::now();
        }

        match listener.accept() {
            Ok((stream, addr)) => {
                if ctx.connections.load(Ordering::SeqCst) >= ctx.config.max_connections {
                    log::warn!(
                        "Connection refused from {}: limit of {} reached",
                        addr,
                        ctx.config.max_connections
                    );
                    ctx.metrics.connections_refused_limit.fetch_add(1, Ordering::Relaxed);
                    drop(stream);
                    continue;
                }

                let conn_id = ctx.next_conn_id.fetch_add(1, Ordering::SeqCst);
                log::debug!("Accepted connection {} from {}", conn_id, addr);
                ctx.connections.fetch_add(1, Ordering::SeqCst);

                let conn_ctx = ctx.clone();
                let spawned = thread::Builder::new()
                    .name(format!("conn-{}", conn_id))
                    .spawn(move || {
                        let mut conn = Connection::new(conn_id, &conn_ctx);
                        let result = conn.run(stream);
                        conn.close();
                        conn_ctx.connections.fetch_sub(1, Ordering::SeqCst);
                        if let Err(e) = result {
                            log::warn!("Connection error from {}: {}", addr, e);
                        }
                    });
                if let Err(e) = spawned {
                    log::error!("Failed to spawn connection thread: {}", e);
                    ctx.connections.fetch_sub(1, Ordering::SeqCst);
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                log::error!("Accept error: {}", e);
                break;
            }
        }
    }
}

/// This connection's subscription to one session.
struct Attached {
    session: Arc<Session>,
    observer: ObserverId,
    events: Receiver<EventPayload>,
    last_sequence: u64,
}

struct Connection<'a> {
    id: u64,
    ctx: &'a ListenerContext,
    greeted: bool,
    rate_limiter: RateLimiter,
    attached: Option<Attached>,
}

/// What to do after handling a line.
enum Flow {
    Continue,
    Disconnect,
}

impl<'a> Connection<'a> {
    fn new(id: u64, ctx: &'a ListenerContext) -> Self {
        Self {
            id,
            ctx,
            greeted: false,
            rate_limiter: RateLimiter::new(ctx.config.rate_limit),
            attached: None,
        }
    }

    fn run(&mut self, mut stream: TcpStream) -> std::io::Result<()> {
        // Short read timeout so pushed events are forwarded promptly
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(Duration::from_millis(100)))?;
        stream.set_write_timeout(Some(Duration::from_secs(10)))?;

        let mut frames = FrameReader::new(stream.try_clone()?, self.ctx.config.max_message_size);
        let mut parse_failures: u32 = 0;

        loop {
            if self.ctx.shutdown.load(Ordering::SeqCst) {
                return Ok(());
            }

            self.forward_events(&mut stream)?;

            let line = match frames.poll()? {
                Frame::Line(line) => line,
                Frame::Pending => continue,
                Frame::Closed => return Ok(()),
                Frame::TooLarge(len) => {
                    send_error(
                        &mut stream,
                        "",
                        codes::MESSAGE_TOO_LARGE,
                        format!("message exceeds {} bytes", self.ctx.config.max_message_size),
                    )?;
                    log::warn!(
                        "Connection {} sent oversized message ({}+ bytes), disconnecting",
                        self.id,
                        len
                    );
                    self.ctx.metrics.connections_closed_oversize.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
            };
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            let msg: ClientMessage = match serde_json::from_slice(&line) {
                Ok(m) => {
                    parse_failures = 0;
                    m
                }
                Err(e) => {
                    parse_failures += 1;
                    log::debug!("Malformed message ({}/{}): {}", parse_failures, MAX_PARSE_FAILURES, e);
                    send_error(&mut stream, "", codes::PARSE_ERROR, e.to_string())?;
                    if parse_failures >= MAX_PARSE_FAILURES {
                        log::warn!("Connection {} exceeded parse failure limit, disconnecting", self.id);
                        self.ctx
                            .metrics
                            .connections_closed_parse_failures
                            .fetch_add(1, Ordering::Relaxed);
                        return Ok(());
                    }
                    continue;
                }
            };

            if !self.greeted {
                match self.handshake(&mut stream, msg)? {
                    Flow::Continue => continue,
                    Flow::Disconnect => return Ok(()),
                }
            }

            let response = self.handle_message_with_rate_limit(msg);
            send_message(&mut stream, &response)?;
        }
    }

    /// First message must be a hello with a protocol version we speak.
    fn handshake(&mut self, stream: &mut TcpStream, msg: ClientMessage) -> std::io::Result<Flow> {
        let ClientMessage::Hello(hello) = msg else {
            send_error(stream, "", codes::HELLO_REQUIRED, "first message must be hello")?;
            return Ok(Flow::Disconnect);
        };

        if hello.protocol_version == 0 || hello.protocol_version > PROTOCOL_VERSION {
            send_error(
                stream,
                &hello.id,
                codes::PROTOCOL_MISMATCH,
                format!(
                    "client speaks protocol {}, server speaks {}",
                    hello.protocol_version, PROTOCOL_VERSION
                ),
            )?;
            return Ok(Flow::Disconnect);
        }

        self.greeted = true;
        log::debug!("Connection {} greeted by {} {}", self.id, hello.client, hello.version);
        let welcome = ServerMessage::Welcome(WelcomeMessage {
            id: hello.id,
            protocol_version: hello.protocol_version.min(PROTOCOL_VERSION),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            capabilities: CAPABILITIES.iter().map(|c| c.to_string()).collect(),
        });
        send_message(stream, &welcome)?;
        Ok(Flow::Continue)
    }

    fn handle_message_with_rate_limit(&mut self, msg: ClientMessage) -> ServerMessage {
        let rate_check = match &msg {
            ClientMessage::Chat(_) => self.rate_limiter.try_chat(),
            ClientMessage::Upload(_) | ClientMessage::CreateSession(_) => self.rate_limiter.try_upload(),
            ClientMessage::Snapshot(_) | ClientMessage::Attach(_) => self.rate_limiter.try_snapshot(),
            _ => self.rate_limiter.try_ping(),
        };

        if let Err(e) = rate_check {
            log::debug!(
                "Rate limited: requested={}, available={}, retry_after={}ms",
                e.requested,
                e.available,
                e.retry_after_ms
            );
            self.ctx.metrics.rate_limited.fetch_add(1, Ordering::Relaxed);
            return ServerMessage::Error(ErrorMessage {
                id: request_id(&msg).to_string(),
                code: codes::RATE_LIMITED.to_string(),
                message: "rate limit exceeded".to_string(),
                retry_after_ms: Some(e.retry_after_ms),
            });
        }

        self.handle_message(msg)
    }

    fn handle_message(&mut self, msg: ClientMessage) -> ServerMessage {
        match msg {
            ClientMessage::Hello(h) => error(h.id, codes::PROTOCOL_VIOLATION, "already greeted"),
            ClientMessage::CreateSession(create) => {
                let grid = grid_from_payload(create.grid);
                self.create_session(create.id, grid)
            }
            ClientMessage::Upload(upload) => {
                let bytes = match base64::engine::general_purpose::STANDARD.decode(upload.data.trim()) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        return error(upload.id, codes::UPLOAD_FAILED, format!("invalid base64: {}", e))
                    }
                };
                match gridchat_io::parse_bytes(&upload.filename, bytes) {
                    Ok(grid) => self.create_session(upload.id, grid),
                    Err(e) => {
                        log::info!("Upload of '{}' failed: {}", upload.filename, e);
                        error(upload.id, codes::UPLOAD_FAILED, e.to_string())
                    }
                }
            }
            ClientMessage::Attach(attach) => match self.ctx.registry.get(&attach.session_id) {
                Ok(session) => {
                    self.detach();
                    let attachment = session.attach();
                    let snapshot = wire::snapshot(attachment.snapshot);
                    self.attached = Some(Attached {
                        session,
                        observer: attachment.observer,
                        events: attachment.events,
                        last_sequence: snapshot.sequence,
                    });
                    ServerMessage::Attached(AttachedMessage { id: attach.id, snapshot })
                }
                Err(e) => registry_error(attach.id, e),
            },
            ClientMessage::Detach(detach) => {
                if self.detach() {
                    ServerMessage::Detached(DetachedMessage { id: detach.id })
                } else {
                    not_attached(detach.id)
                }
            }
            ClientMessage::Snapshot(snap) => match &self.attached {
                Some(attached) => ServerMessage::SnapshotResult(SnapshotResultMessage {
                    id: snap.id,
                    snapshot: wire::snapshot(attached.session.snapshot()),
                }),
                None => not_attached(snap.id),
            },
            ClientMessage::Chat(chat) => {
                let Some(attached) = &self.attached else {
                    return not_attached(chat.id);
                };
                if chat.text.trim().is_empty() {
                    return error(chat.id, codes::INVALID_ARGUMENT, "chat text is empty");
                }
                match attached.session.submit(chat.text, self.id) {
                    Some(ticket) => ServerMessage::ChatAccepted(ChatAcceptedMessage {
                        id: chat.id,
                        turn: ticket.turn,
                        queued_behind: ticket.queued_behind,
                    }),
                    None => error(chat.id, codes::NOT_FOUND, "session is closed"),
                }
            }
            ClientMessage::CloseSession(close) => {
                let Some(attached) = self.attached.take() else {
                    return not_attached(close.id);
                };
                let session_id = attached.session.id().to_string();
                match self.ctx.registry.close(&session_id, "closed by client") {
                    Ok(()) => ServerMessage::SessionClosed(SessionClosedMessage { id: close.id, session_id }),
                    Err(e) => registry_error(close.id, e),
                }
            }
            ClientMessage::Ping(p) => ServerMessage::Pong(PongMessage { id: p.id }),
        }
    }

    fn create_session(&mut self, request_id: String, grid: InitialGrid) -> ServerMessage {
        match self.ctx.registry.create(grid) {
            Ok(session) => {
                let extent = wire::extent(session.extent());
                ServerMessage::SessionCreated(SessionCreatedMessage {
                    id: request_id,
                    session_id: session.id().to_string(),
                    name: session.name().to_string(),
                    extent,
                })
            }
            Err(e) => registry_error(request_id, e),
        }
    }

    /// Drain pushed events for the attached session.
    fn forward_events(&mut self, stream: &mut TcpStream) -> std::io::Result<()> {
        let Some(attached) = self.attached.as_mut() else {
            return Ok(());
        };
        let session_id = attached.session.id().to_string();

        loop {
            match attached.events.try_recv() {
                Ok(payload) => {
                    let closed = matches!(payload, EventPayload::SessionClosed { .. });
                    if let EventPayload::StateDelta { sequence, .. } = &payload {
                        attached.last_sequence = *sequence;
                    }
                    send_message(
                        stream,
                        &ServerMessage::Event(EventMessage { session_id: session_id.clone(), payload }),
                    )?;
                    if closed {
                        self.attached = None;
                        return Ok(());
                    }
                }
                Err(TryRecvError::Empty) => return Ok(()),
                Err(TryRecvError::Disconnected) => {
                    // Closed while our queue was full: the notice never arrived
                    if let Some(reason) = attached.session.closed_reason() {
                        self.attached = None;
                        return send_message(
                            stream,
                            &ServerMessage::Event(EventMessage {
                                session_id,
                                payload: EventPayload::SessionClosed { reason },
                            }),
                        );
                    }
                    // The broadcaster dropped us for falling behind
                    let last_sequence = attached.last_sequence;
                    self.attached = None;
                    self.ctx.metrics.resyncs.fetch_add(1, Ordering::Relaxed);
                    log::info!("Connection {} must resync session {} after {}", self.id, session_id, last_sequence);
                    return send_message(
                        stream,
                        &ServerMessage::Event(EventMessage {
                            session_id,
                            payload: EventPayload::ResyncRequired { last_sequence },
                        }),
                    );
                }
            }
        }
    }

    fn detach(&mut self) -> bool {
        match self.attached.take() {
            Some(attached) => {
                attached.session.detach(attached.observer);
                true
            }
            None => false,
        }
    }

    /// Connection is gone: drop the subscription and cancel its turns.
    fn close(&mut self) {
        self.detach();
        let cancelled = self.ctx.registry.cancel_origin(self.id);
        if cancelled > 0 {
            log::info!("Connection {} closed, cancelled {} turn(s)", self.id, cancelled);
        }
    }
}

fn grid_from_payload(payload: GridPayload) -> InitialGrid {
    let name = if payload.name.trim().is_empty() {
        "Sheet1".to_string()
    } else {
        payload.name
    };
    let rows: Vec<Vec<Cell>> = payload
        .rows
        .into_iter()
        .map(|row| row.into_iter().map(Cell::new).collect())
        .collect();
    let mut grid = InitialGrid::new(name, rows);
    if let Some(rows) = payload.row_count {
        grid.row_count = rows;
    }
    if let Some(cols) = payload.col_count {
        grid.col_count = cols;
    }
    grid.normalize_extent();
    grid
}

fn request_id(msg: &ClientMessage) -> &str {
    match msg {
        ClientMessage::Hello(m) => &m.id,
        ClientMessage::CreateSession(m) => &m.id,
        ClientMessage::Upload(m) => &m.id,
        ClientMessage::Attach(m) => &m.id,
        ClientMessage::Detach(m) => &m.id,
        ClientMessage::Snapshot(m) => &m.id,
        ClientMessage::Chat(m) => &m.id,
        ClientMessage::CloseSession(m) => &m.id,
        ClientMessage::Ping(m) => &m.id,
    }
}

fn error(id: String, code: &str, message: impl Into<String>) -> ServerMessage {
    ServerMessage::Error(ErrorMessage {
        id,
        code: code.to_string(),
        message: message.into(),
        retry_after_ms: None,
    })
}

fn not_attached(id: String) -> ServerMessage {
    error(id, codes::NOT_ATTACHED, "attach to a session first")
}

fn registry_error(id: String, e: RegistryError) -> ServerMessage {
    error(id, e.code(), e.to_string())
}

/// Result of polling a [`FrameReader`].
enum Frame {
    /// A complete line, terminator stripped.
    Line(Vec<u8>),
    /// No complete line yet; partial bytes are kept.
    Pending,
    /// The line being read has grown past the limit.
    TooLarge(usize),
    Closed,
}

/// Newline-framed reader that survives read timeouts.
///
/// Bytes read before a timeout stay buffered until the rest of the line
/// arrives. The size limit is enforced while reading.
struct FrameReader<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
    max_len: usize,
}

impl<R: Read> FrameReader<R> {
    fn new(inner: R, max_len: usize) -> Self {
        Self { reader: BufReader::new(inner), buf: Vec::new(), max_len }
    }

    fn poll(&mut self) -> std::io::Result<Frame> {
        loop {
            let available = match self.reader.fill_buf() {
                Ok(bytes) => bytes,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Ok(Frame::Pending)
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if available.is_empty() {
                return Ok(Frame::Closed);
            }

            let (used, complete) = match available.iter().position(|&b| b == b'\n') {
                Some(i) => (i + 1, true),
                None => (available.len(), false),
            };
            self.buf.extend_from_slice(&available[..used]);
            self.reader.consume(used);

            if complete {
                let mut line = std::mem::take(&mut self.buf);
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                if line.len() > self.max_len {
                    return Ok(Frame::TooLarge(line.len()));
                }
                return Ok(Frame::Line(line));
            }
            if self.buf.len() > self.max_len {
                return Ok(Frame::TooLarge(self.buf.len()));
            }
        }
    }
}

fn send_message(stream: &mut TcpStream, msg: &ServerMessage) -> std::io::Result<()> {
    let json = serde_json::to_string(msg)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    writeln!(stream, "{}", json)?;
    stream.flush()
}

fn send_error(stream: &mut TcpStream, id: &str, code: &str, message: impl Into<String>) -> std::io::Result<()> {
    send_message(stream, &error(id.to_string(), code, message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpStream;

    use crate::orchestrator::tests::ScriptedAgent;
    use crate::session::SessionSettings;

    fn start_server(config: SessionServerConfig) -> SessionServer {
        let registry = Arc::new(SessionRegistry::new(
            Arc::new(ScriptedAgent::new(vec![])),
            SessionSettings::default(),
        ));
        let mut server = SessionServer::new(registry);
        server.start(config).unwrap();
        server
    }

    fn connect(server: &SessionServer) -> (TcpStream, BufReader<TcpStream>) {
        let stream = TcpStream::connect(server.bound_addr().unwrap()).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let reader = BufReader::new(stream.try_clone().unwrap());
        (stream, reader)
    }

    fn read(reader: &mut BufReader<TcpStream>) -> serde_json::Value {
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        serde_json::from_str(&line).unwrap()
    }

    fn hello(stream: &mut TcpStream, reader: &mut BufReader<TcpStream>) {
        let hello = serde_json::json!({"type": "hello", "id": "h", "client": "test", "version": "1.0.0"});
        writeln!(stream, "{}", hello).unwrap();
        assert_eq!(read(reader)["type"], "welcome");
    }

    #[test]
    fn test_server_lifecycle() {
        let mut server = start_server(SessionServerConfig::default());
        assert!(server.is_running());
        assert!(server.bound_addr().is_some());
        server.stop();
        assert!(!server.is_running());
        assert!(server.bound_addr().is_none());
    }

    #[test]
    fn test_hello_then_ping() {
        let server = start_server(SessionServerConfig::default());
        let (mut stream, mut reader) = connect(&server);

        let hello = serde_json::json!({
            "type": "hello", "id": "1", "client": "test", "version": "1.0.0", "protocol_version": 1
        });
        writeln!(stream, "{}", hello).unwrap();
        let welcome = read(&mut reader);
        assert_eq!(welcome["type"], "welcome");
        assert_eq!(welcome["protocol_version"], 1);

        writeln!(stream, "{}", serde_json::json!({"type": "ping", "id": "2"})).unwrap();
        let pong = read(&mut reader);
        assert_eq!(pong["type"], "pong");
        assert_eq!(pong["id"], "2");
    }

    #[test]
    fn test_hello_required_first() {
        let server = start_server(SessionServerConfig::default());
        let (mut stream, mut reader) = connect(&server);

        writeln!(stream, "{}", serde_json::json!({"type": "ping", "id": "1"})).unwrap();
        let reply = read(&mut reader);
        assert_eq!(reply["code"], "hello_required");

        let mut line = String::new();
        let n = reader.read_line(&mut line).unwrap_or(0);
        assert_eq!(n, 0, "connection should be closed");
    }

    #[test]
    fn test_protocol_mismatch() {
        let server = start_server(SessionServerConfig::default());
        let (mut stream, mut reader) = connect(&server);
        let hello = serde_json::json!({
            "type": "hello", "id": "1", "client": "test", "version": "9", "protocol_version": 99
        });
        writeln!(stream, "{}", hello).unwrap();
        assert_eq!(read(&mut reader)["code"], "protocol_mismatch");
    }

    #[test]
    fn test_parse_failures_disconnect() {
        let server = start_server(SessionServerConfig::default());
        let (mut stream, mut reader) = connect(&server);
        hello(&mut stream, &mut reader);

        for _ in 0..MAX_PARSE_FAILURES {
            writeln!(stream, "{{not json").unwrap();
            assert_eq!(read(&mut reader)["code"], "parse_error");
        }
        let mut line = String::new();
        let n = reader.read_line(&mut line).unwrap_or(0);
        assert_eq!(n, 0);

        thread::sleep(Duration::from_millis(100));
        assert_eq!(server.metrics().connections_closed_parse_failures.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_valid_message_resets_parse_failures() {
        let server = start_server(SessionServerConfig::default());
        let (mut stream, mut reader) = connect(&server);
        hello(&mut stream, &mut reader);

        for round in 0..2 {
            for _ in 0..MAX_PARSE_FAILURES - 1 {
                writeln!(stream, "garbage").unwrap();
                assert_eq!(read(&mut reader)["code"], "parse_error");
            }
            writeln!(stream, "{}", serde_json::json!({"type": "ping", "id": format!("p{}", round)})).unwrap();
            assert_eq!(read(&mut reader)["type"], "pong");
        }
    }

    #[test]
    fn test_oversized_message_disconnects() {
        let server = start_server(SessionServerConfig { max_message_size: 64, ..Default::default() });
        let (mut stream, mut reader) = connect(&server);
        hello(&mut stream, &mut reader);

        let big = serde_json::json!({"type": "chat", "id": "1", "text": "x".repeat(200)});
        writeln!(stream, "{}", big).unwrap();
        assert_eq!(read(&mut reader)["code"], "message_too_large");

        thread::sleep(Duration::from_millis(100));
        assert_eq!(server.metrics().connections_closed_oversize.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_rate_limiting() {
        let config = SessionServerConfig {
            rate_limit: RateLimitSettings { burst: 3, per_sec: 1, ping_cost: 1, ..Default::default() },
            ..Default::default()
        };
        let server = start_server(config);
        let (mut stream, mut reader) = connect(&server);
        hello(&mut stream, &mut reader);

        for i in 0..3 {
            writeln!(stream, "{}", serde_json::json!({"type": "ping", "id": format!("{}", i)})).unwrap();
            assert_eq!(read(&mut reader)["type"], "pong");
        }
        writeln!(stream, "{}", serde_json::json!({"type": "ping", "id": "over"})).unwrap();
        let reply = read(&mut reader);
        assert_eq!(reply["code"], "rate_limited");
        assert!(reply["retry_after_ms"].as_u64().unwrap() > 0);
    }

    #[test]
    fn test_connection_limit_enforced() {
        let server = start_server(SessionServerConfig { max_connections: 2, ..Default::default() });

        let mut held = Vec::new();
        for _ in 0..2 {
            let (mut stream, mut reader) = connect(&server);
            hello(&mut stream, &mut reader);
            held.push((stream, reader));
        }
        thread::sleep(Duration::from_millis(100));

        if let Ok(stream) = TcpStream::connect(server.bound_addr().unwrap()) {
            stream.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            let result = reader.read_line(&mut line);
            assert!(result.is_err() || line.is_empty());
        }
        thread::sleep(Duration::from_millis(100));
        assert_eq!(server.metrics().connections_refused_limit.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_chat_requires_attach() {
        let server = start_server(SessionServerConfig::default());
        let (mut stream, mut reader) = connect(&server);
        hello(&mut stream, &mut reader);

        writeln!(stream, "{}", serde_json::json!({"type": "chat", "id": "1", "text": "hi"})).unwrap();
        assert_eq!(read(&mut reader)["code"], "not_attached");

        let attach = serde_json::json!({"type": "attach", "id": "2", "session_id": "nope"});
        writeln!(stream, "{}", attach).unwrap();
        assert_eq!(read(&mut reader)["code"], "not_found");
    }

    #[test]
    fn test_upload_rejects_bad_data() {
        let server = start_server(SessionServerConfig::default());
        let (mut stream, mut reader) = connect(&server);
        hello(&mut stream, &mut reader);

        let upload = serde_json::json!({"type": "upload", "id": "1", "filename": "a.csv", "data": "***"});
        writeln!(stream, "{}", upload).unwrap();
        assert_eq!(read(&mut reader)["code"], "upload_failed");

        let data = base64::engine::general_purpose::STANDARD.encode(b"a,b\n1,2\n");
        let upload = serde_json::json!({"type": "upload", "id": "2", "filename": "a.pdf", "data": data});
        writeln!(stream, "{}", upload).unwrap();
        assert_eq!(read(&mut reader)["code"], "upload_failed");
    }

    #[test]
    fn test_grid_payload_extent() {
        let payload = GridPayload {
            name: String::new(),
            rows: vec![vec![CellValue::Number(1.0), CellValue::Number(2.0)]],
            row_count: Some(10),
            col_count: Some(1),
        };
        let grid = grid_from_payload(payload);
        assert_eq!(grid.name, "Sheet1");
        assert_eq!((grid.row_count, grid.col_count), (10, 2));
    }

    /// Hands out scripted chunks; `None` stands for a read timeout.
    struct Chunks(std::collections::VecDeque<Option<&'static [u8]>>);

    impl Read for Chunks {
        fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
            match self.0.pop_front() {
                Some(Some(chunk)) => {
                    out[..chunk.len()].copy_from_slice(chunk);
                    Ok(chunk.len())
                }
                Some(None) => Err(std::io::Error::new(ErrorKind::WouldBlock, "timeout")),
                None => Ok(0),
            }
        }
    }

    fn chunk(bytes: &'static [u8]) -> Option<&'static [u8]> {
        Some(bytes)
    }

    fn frames(chunks: Vec<Option<&'static [u8]>>, max_len: usize) -> FrameReader<Chunks> {
        FrameReader::new(Chunks(chunks.into()), max_len)
    }

    #[test]
    fn test_frame_survives_timeout_mid_line() {
        let mut reader = frames(vec![chunk(b"{\"type\":"), None, chunk(b"\"ping\"}\r\nnext\n")], 1024);
        assert!(matches!(reader.poll().unwrap(), Frame::Pending));
        match reader.poll().unwrap() {
            Frame::Line(line) => assert_eq!(line, b"{\"type\":\"ping\"}"),
            _ => panic!("expected a line"),
        }
        assert!(matches!(reader.poll().unwrap(), Frame::Line(line) if line == b"next"));
        assert!(matches!(reader.poll().unwrap(), Frame::Closed));
    }

    #[test]
    fn test_frame_limit_checked_before_newline() {
        let mut reader = frames(vec![chunk(b"0123456789"), None, chunk(b"abcdef\n")], 8);
        assert!(matches!(reader.poll().unwrap(), Frame::TooLarge(10)));
    }

    #[test]
    fn test_frame_at_limit_is_accepted() {
        let mut reader = frames(vec![chunk(b"01234567\n")], 8);
        assert!(matches!(reader.poll().unwrap(), Frame::Line(line) if line.len() == 8));
    }

    #[test]
    fn test_split_message_over_tcp() {
        let server = start_server(SessionServerConfig::default());
        let (mut stream, mut reader) = connect(&server);
        hello(&mut stream, &mut reader);

        stream.write_all(b"{\"type\":\"ping\",").unwrap();
        stream.flush().unwrap();
        std::thread::sleep(Duration::from_millis(300));
        stream.write_all(b"\"id\":\"p1\"}\n").unwrap();

        let pong = read(&mut reader);
        assert_eq!(pong["type"], "pong");
        assert_eq!(pong["id"], "p1");
    }
}
