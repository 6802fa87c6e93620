//! Blocking client for the session server.
//!
//! Requests are answered in order, but pushed events for the attached
//! session can arrive in between. Events read while waiting for a reply are
//! buffered and handed out by [`ChatClient::next_event`].

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use base64::Engine as _;

use gridchat_protocol::*;

/// Largest line accepted from the server.
const MAX_LINE_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("connection closed by server")]
    ConnectionClosed,
    #[error("timed out waiting for the server")]
    Timeout,
    #[error("I/O error: {0}")]
    Io(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("session closed: {0}")]
    SessionClosed(String),
    #[error("server error [{code}]: {message}")]
    Server {
        code: String,
        message: String,
        retry_after_ms: Option<u64>,
    },
}

impl From<ErrorMessage> for ClientError {
    fn from(err: ErrorMessage) -> Self {
        ClientError::Server {
            code: err.code,
            message: err.message,
            retry_after_ms: err.retry_after_ms,
        }
    }
}

/// How a chat turn ended.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnReply {
    pub turn: u64,
    pub text: String,
    pub error: Option<String>,
}

pub struct ChatClient {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
    next_id: u64,
    server_version: String,
    attached: Option<String>,
    pending: VecDeque<EventMessage>,
}

impl ChatClient {
    /// Connect and perform the hello handshake.
    pub fn connect(addr: &str, timeout: Duration) -> Result<Self, ClientError> {
        let socket = addr
            .to_socket_addrs()
            .map_err(|e| ClientError::ConnectionFailed(format!("{}: {}", addr, e)))?
            .next()
            .ok_or_else(|| ClientError::ConnectionFailed(format!("{}: no address", addr)))?;
        let stream = TcpStream::connect_timeout(&socket, Duration::from_secs(5))
            .map_err(|e| ClientError::ConnectionFailed(format!("{}: {}", addr, e)))?;
        stream
            .set_read_timeout(Some(timeout))
            .map_err(|e| ClientError::ConnectionFailed(e.to_string()))?;
        stream
            .set_write_timeout(Some(Duration::from_secs(30)))
            .map_err(|e| ClientError::ConnectionFailed(e.to_string()))?;

        let reader = BufReader::new(
            stream
                .try_clone()
                .map_err(|e| ClientError::ConnectionFailed(e.to_string()))?,
        );
        let mut client = Self {
            reader,
            writer: BufWriter::new(stream),
            next_id: 1,
            server_version: String::new(),
            attached: None,
            pending: VecDeque::new(),
        };

        let hello = ClientMessage::Hello(HelloMessage {
            id: client.next_request_id(),
            client: "gridchat-cli".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            protocol_version: PROTOCOL_VERSION,
        });
        match client.request(&hello)? {
            ServerMessage::Welcome(welcome) => {
                client.server_version = welcome.server_version;
                Ok(client)
            }
            other => Err(unexpected("hello", &other)),
        }
    }

    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    /// Upload a spreadsheet file's bytes; the server parses it.
    pub fn upload(&mut self, filename: &str, bytes: &[u8]) -> Result<SessionCreatedMessage, ClientError> {
        let msg = ClientMessage::Upload(UploadMessage {
            id: self.next_request_id(),
            filename: filename.to_string(),
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        });
        match self.request(&msg)? {
            ServerMessage::SessionCreated(created) => Ok(created),
            other => Err(unexpected("upload", &other)),
        }
    }

    pub fn create_session(&mut self, grid: GridPayload) -> Result<SessionCreatedMessage, ClientError> {
        let msg = ClientMessage::CreateSession(CreateSessionMessage { id: self.next_request_id(), grid });
        match self.request(&msg)? {
            ServerMessage::SessionCreated(created) => Ok(created),
            other => Err(unexpected("create_session", &other)),
        }
    }

    pub fn attach(&mut self, session_id: &str) -> Result<SnapshotPayload, ClientError> {
        let msg = ClientMessage::Attach(AttachMessage {
            id: self.next_request_id(),
            session_id: session_id.to_string(),
        });
        match self.request(&msg)? {
            ServerMessage::Attached(attached) => {
                // Events from an earlier attachment are stale now
                self.pending.clear();
                self.attached = Some(session_id.to_string());
                Ok(attached.snapshot)
            }
            other => Err(unexpected("attach", &other)),
        }
    }

    pub fn snapshot(&mut self) -> Result<SnapshotPayload, ClientError> {
        let msg = ClientMessage::Snapshot(SnapshotMessage { id: self.next_request_id() });
        match self.request(&msg)? {
            ServerMessage::SnapshotResult(result) => Ok(result.snapshot),
            other => Err(unexpected("snapshot", &other)),
        }
    }

    pub fn chat(&mut self, text: &str) -> Result<ChatAcceptedMessage, ClientError> {
        let msg = ClientMessage::Chat(ChatMessage { id: self.next_request_id(), text: text.to_string() });
        match self.request(&msg)? {
            ServerMessage::ChatAccepted(accepted) => Ok(accepted),
            other => Err(unexpected("chat", &other)),
        }
    }

    pub fn close_session(&mut self) -> Result<(), ClientError> {
        let msg = ClientMessage::CloseSession(CloseSessionMessage { id: self.next_request_id() });
        match self.request(&msg)? {
            ServerMessage::SessionClosed(_) => {
                self.attached = None;
                Ok(())
            }
            other => Err(unexpected("close_session", &other)),
        }
    }

    pub fn ping(&mut self) -> Result<(), ClientError> {
        let msg = ClientMessage::Ping(PingMessage { id: self.next_request_id() });
        match self.request(&msg)? {
            ServerMessage::Pong(_) => Ok(()),
            other => Err(unexpected("ping", &other)),
        }
    }

    /// Next pushed event, buffered or fresh from the socket.
    pub fn next_event(&mut self) -> Result<EventMessage, ClientError> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(event);
        }
        loop {
            match self.receive()? {
                ServerMessage::Event(event) => return Ok(event),
                other => log::debug!("ignoring unsolicited {:?}", other),
            }
        }
    }

    /// Wait for the reply to `turn`, passing every event to `on_event`.
    ///
    /// A resync request is handled by re-attaching.
    pub fn wait_for_reply(
        &mut self,
        turn: u64,
        mut on_event: impl FnMut(&EventPayload),
    ) -> Result<TurnReply, ClientError> {
        loop {
            let event = self.next_event()?;
            on_event(&event.payload);
            match event.payload {
                EventPayload::ChatReply { turn: t, text, error } if t == turn => {
                    return Ok(TurnReply { turn, text, error });
                }
                EventPayload::SessionClosed { reason } => {
                    self.attached = None;
                    return Err(ClientError::SessionClosed(reason));
                }
                EventPayload::ResyncRequired { last_sequence } => {
                    let session_id = event.session_id;
                    log::info!("resyncing session {} after sequence {}", session_id, last_sequence);
                    self.attach(&session_id)?;
                }
                _ => {}
            }
        }
    }

    fn next_request_id(&mut self) -> String {
        let id = self.next_id;
        self.next_id += 1;
        id.to_string()
    }

    /// Send a request and return its reply, buffering events that arrive first.
    fn request(&mut self, msg: &ClientMessage) -> Result<ServerMessage, ClientError> {
        self.send(msg)?;
        loop {
            match self.receive()? {
                ServerMessage::Event(event) => self.pending.push_back(event),
                ServerMessage::Error(err) => return Err(err.into()),
                reply => return Ok(reply),
            }
        }
    }

    fn send(&mut self, msg: &ClientMessage) -> Result<(), ClientError> {
        let json = serde_json::to_string(msg).map_err(|e| ClientError::Protocol(e.to_string()))?;
        writeln!(self.writer, "{}", json).map_err(|e| ClientError::Io(e.to_string()))?;
        self.writer.flush().map_err(|e| ClientError::Io(e.to_string()))
    }

    fn receive(&mut self) -> Result<ServerMessage, ClientError> {
        let line = read_line_bounded(&mut self.reader, MAX_LINE_BYTES)?;
        serde_json::from_str(&line).map_err(|e| ClientError::Protocol(format!("invalid JSON: {}", e)))
    }
}

fn unexpected(request: &str, reply: &ServerMessage) -> ClientError {
    ClientError::Protocol(format!("unexpected reply to {}: {:?}", request, reply))
}

/// Read one newline-terminated line of at most `max_bytes`.
fn read_line_bounded<R: BufRead>(reader: &mut R, max_bytes: usize) -> Result<String, ClientError> {
    let mut buf = Vec::with_capacity(4096);
    let limit = u64::try_from(max_bytes).unwrap_or(u64::MAX).saturating_add(1);
    let n = reader.take(limit).read_until(b'\n', &mut buf).map_err(|e| match e.kind() {
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => ClientError::Timeout,
        _ => ClientError::Io(e.to_string()),
    })?;

    if n == 0 {
        return Err(ClientError::ConnectionClosed);
    }
    if buf.last() != Some(&b'\n') {
        if buf.len() > max_bytes {
            return Err(ClientError::Protocol(format!("message exceeds {} bytes", max_bytes)));
        }
        return Err(ClientError::Protocol("connection closed mid-frame (no newline)".to_string()));
    }
    buf.pop();
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    String::from_utf8(buf).map_err(|e| ClientError::Protocol(format!("invalid UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_read_line_bounded() {
        let mut reader = Cursor::new(b"{\"a\":1}\nnext\n".to_vec());
        assert_eq!(read_line_bounded(&mut reader, 100).unwrap(), "{\"a\":1}");
        assert_eq!(read_line_bounded(&mut reader, 100).unwrap(), "next");
        assert!(matches!(read_line_bounded(&mut reader, 100), Err(ClientError::ConnectionClosed)));
    }

    #[test]
    fn test_read_line_too_long() {
        let mut reader = Cursor::new(b"0123456789abcdef\n".to_vec());
        assert!(matches!(read_line_bounded(&mut reader, 8), Err(ClientError::Protocol(_))));
    }

    #[test]
    fn test_read_line_mid_frame() {
        let mut reader = Cursor::new(b"partial".to_vec());
        let err = read_line_bounded(&mut reader, 100).unwrap_err();
        assert!(err.to_string().contains("mid-frame"));
    }

    #[test]
    fn test_crlf_is_stripped() {
        let mut reader = Cursor::new(b"line\r\n".to_vec());
        assert_eq!(read_line_bounded(&mut reader, 100).unwrap(), "line");
    }

    #[test]
    fn test_server_error_conversion() {
        let err: ClientError = ErrorMessage {
            id: "1".into(),
            code: "rate_limited".into(),
            message: "slow down".into(),
            retry_after_ms: Some(250),
        }
        .into();
        assert!(matches!(err, ClientError::Server { ref code, retry_after_ms: Some(250), .. } if code == "rate_limited"));
    }
}
