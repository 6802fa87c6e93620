//! GridChat Session Protocol - v1 Frozen Wire Format
//!
//! This crate defines the canonical protocol types between chat clients and
//! the session server. The wire format is JSONL (newline-delimited JSON) over
//! TCP.
//!
//! # Protocol Version
//!
//! This is **protocol v1**. The wire format is frozen. Changes require:
//! 1. Version bump in PROTOCOL_VERSION
//! 2. New golden vectors in `crates/protocol/golden/`
//! 3. Backward compatibility handling
//!
//! # Usage
//!
//! ```ignore
//! use gridchat_protocol::{ClientMessage, ServerMessage, PingMessage};
//!
//! let msg = ClientMessage::Ping(PingMessage { id: "1".into() });
//! let json = serde_json::to_string(&msg)?;
//!
//! let response: ServerMessage = serde_json::from_str(&line)?;
//! ```

use serde::{Deserialize, Serialize};

pub use gridchat_core::{Cell, CellValue, NumberFormat};

/// Current protocol version. Increment for breaking changes.
pub const PROTOCOL_VERSION: u32 = 1;

// =============================================================================
// Client → Server Messages
// =============================================================================

/// Messages sent from a client to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Hello(HelloMessage),
    CreateSession(CreateSessionMessage),
    Upload(UploadMessage),
    Attach(AttachMessage),
    Detach(DetachMessage),
    Snapshot(SnapshotMessage),
    Chat(ChatMessage),
    CloseSession(CloseSessionMessage),
    Ping(PingMessage),
}

/// Initial handshake from client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloMessage {
    pub id: String,
    pub client: String,
    pub version: String,
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u32,
}

fn default_protocol_version() -> u32 {
    1
}

/// Create a session from an already-parsed grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionMessage {
    pub id: String,
    pub grid: GridPayload,
}

/// Rows of values plus an optional declared extent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridPayload {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub rows: Vec<Vec<CellValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub col_count: Option<usize>,
}

/// Create a session from a spreadsheet file (base64-encoded bytes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadMessage {
    pub id: String,
    pub filename: String,
    pub data: String,
}

/// Subscribe this connection to a session. The reply carries a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachMessage {
    pub id: String,
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetachMessage {
    pub id: String,
}

/// One-shot fetch of the attached session's full state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMessage {
    pub id: String,
}

/// A chat turn for the attached session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseSessionMessage {
    pub id: String,
}

/// Ping for keepalive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingMessage {
    pub id: String,
}

// =============================================================================
// Server → Client Messages
// =============================================================================

/// Messages sent from the server to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome(WelcomeMessage),
    SessionCreated(SessionCreatedMessage),
    Attached(AttachedMessage),
    Detached(DetachedMessage),
    SnapshotResult(SnapshotResultMessage),
    ChatAccepted(ChatAcceptedMessage),
    SessionClosed(SessionClosedMessage),
    Pong(PongMessage),
    Error(ErrorMessage),
    Event(EventMessage),
}

/// Welcome response after successful hello.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WelcomeMessage {
    pub id: String,
    pub protocol_version: u32,
    pub server_version: String,
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCreatedMessage {
    pub id: String,
    pub session_id: String,
    pub name: String,
    pub extent: Extent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachedMessage {
    pub id: String,
    pub snapshot: SnapshotPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetachedMessage {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotResultMessage {
    pub id: String,
    pub snapshot: SnapshotPayload,
}

/// Chat turn queued. `queued_behind` counts turns ahead of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatAcceptedMessage {
    pub id: String,
    pub turn: u64,
    pub queued_behind: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClosedMessage {
    pub id: String,
    pub session_id: String,
}

/// Pong response to ping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PongMessage {
    pub id: String,
}

/// Error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub id: String,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

/// Server-pushed event for an attached session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    pub session_id: String,
    pub payload: EventPayload,
}

/// Event payload variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum EventPayload {
    /// A committed mutation. Sequence numbers arrive strictly increasing.
    StateDelta {
        sequence: u64,
        change: WireChange,
        extent: Extent,
    },
    /// Final reply for a chat turn. `error` carries the failure code when the
    /// turn did not complete.
    ChatReply {
        turn: u64,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// The session was closed or reaped; the client must re-upload.
    SessionClosed { reason: String },
    /// This connection fell behind and was detached. Re-attach for a fresh
    /// snapshot.
    ResyncRequired { last_sequence: u64 },
}

/// Wire form of a committed change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireChange {
    Cells {
        range: RangeRef,
        values: Vec<Vec<CellValue>>,
    },
    Sparse {
        ranges: Vec<RangeRef>,
        cells: Vec<CellUpdate>,
    },
    RowsInserted { at: usize, count: usize },
    RowsDeleted { at: usize, requested: usize, deleted: usize },
    ColumnsInserted { at: usize, count: usize },
    ColumnsDeleted { at: usize, requested: usize, deleted: usize },
}

/// An inclusive rectangular range of cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeRef {
    pub r1: usize,
    pub c1: usize,
    pub r2: usize,
    pub c2: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellUpdate {
    pub row: usize,
    pub col: usize,
    pub value: CellValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extent {
    pub rows: usize,
    pub cols: usize,
}

/// A stored cell inside a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotCell {
    pub row: usize,
    pub col: usize,
    pub value: CellValue,
    #[serde(default, skip_serializing_if = "NumberFormat::is_general")]
    pub format: NumberFormat,
}

/// Full grid state for attach and snapshot replies.
///
/// Only stored cells are listed, in row-major order; every other cell inside
/// `extent` is empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotPayload {
    pub session_id: String,
    pub name: String,
    pub sequence: u64,
    pub extent: Extent,
    pub cells: Vec<SnapshotCell>,
}

// =============================================================================
// Error codes
// =============================================================================

/// Stable error-kind strings shared by the server, tool results, and clients.
pub mod codes {
    pub const INVALID_REFERENCE: &str = "invalid_reference";
    pub const RANGE_ORDER_ERROR: &str = "range_order_error";
    pub const OUT_OF_BOUNDS: &str = "out_of_bounds";
    pub const SHAPE_MISMATCH: &str = "shape_mismatch";
    pub const EMPTY_AGGREGATE: &str = "empty_aggregate";
    pub const INVALID_ARGUMENT: &str = "invalid_argument";
    pub const UNKNOWN_TOOL: &str = "unknown_tool";
    pub const AGENT_LOOP_EXCEEDED: &str = "agent_loop_exceeded";
    pub const NOT_FOUND: &str = "not_found";
    pub const REASONING_COLLABORATOR_FAILURE: &str = "reasoning_collaborator_failure";
    pub const TURN_CANCELLED: &str = "turn_cancelled";

    // Connection-level
    pub const PROTOCOL_MISMATCH: &str = "protocol_mismatch";
    pub const PROTOCOL_VIOLATION: &str = "protocol_violation";
    pub const HELLO_REQUIRED: &str = "hello_required";
    pub const NOT_ATTACHED: &str = "not_attached";
    pub const PARSE_ERROR: &str = "parse_error";
    pub const MESSAGE_TOO_LARGE: &str = "message_too_large";
    pub const UPLOAD_FAILED: &str = "upload_failed";
    pub const RATE_LIMITED: &str = "rate_limited";
    pub const SERVER_BUSY: &str = "server_busy";
    pub const INTERNAL_ERROR: &str = "internal_error";
}
