//! CLI exit codes.
//!
//! Exit codes are part of the shell contract; scripts rely on them.
//!
//! | Range   | Domain    | Description                              |
//! |---------|-----------|------------------------------------------|
//! | 0       | Universal | Success                                  |
//! | 1       | Universal | General error (unspecified)              |
//! | 2       | Universal | Usage error (bad args, missing file)     |
//! | 3-9     | input     | Loading and parsing spreadsheet files    |
//! | 10-19   | agent     | Reasoning agent configuration            |
//! | 20-29   | session   | Session server and chat client           |

use crate::client::ClientError;

// =============================================================================
// Universal (0-2)
// =============================================================================

pub const EXIT_SUCCESS: u8 = 0;

/// General error. Prefer a specific code.
pub const EXIT_ERROR: u8 = 1;

/// Bad arguments, missing required options.
pub const EXIT_USAGE: u8 = 2;

// =============================================================================
// Input (3-9)
// =============================================================================

/// File could not be read.
pub const EXIT_IO: u8 = 3;

/// File was read but could not be parsed (bad CSV, unsupported format).
pub const EXIT_PARSE: u8 = 4;

// =============================================================================
// Agent (10-19)
// =============================================================================

/// Provider needs an API key and none was found.
pub const EXIT_AGENT_MISSING_KEY: u8 = 11;

/// Settings file exists but is malformed.
pub const EXIT_AGENT_CONFIG: u8 = 12;

// =============================================================================
// Session (20-29)
// =============================================================================

/// Cannot connect (no server, connection refused) or the connection dropped.
pub const EXIT_SESSION_CONNECT: u8 = 20;

/// Protocol error (bad framing, version mismatch, malformed message).
pub const EXIT_SESSION_PROTOCOL: u8 = 21;

/// Session id unknown, or the session was closed.
pub const EXIT_SESSION_NOT_FOUND: u8 = 22;

/// Server rejected the upload.
pub const EXIT_SESSION_UPLOAD: u8 = 23;

/// Rate limited or server at its connection limit.
pub const EXIT_SESSION_BUSY: u8 = 24;

/// A chat turn failed (agent error or loop cap).
pub const EXIT_SESSION_TURN_FAILED: u8 = 25;

/// Timed out waiting for the server.
pub const EXIT_SESSION_TIMEOUT: u8 = 26;

/// Failed to bind the listen address.
pub const EXIT_SESSION_BIND: u8 = 27;

/// Map a client error to its exit code.
pub fn client_exit_code(err: &ClientError) -> u8 {
    match err {
        ClientError::ConnectionFailed(_) | ClientError::ConnectionClosed | ClientError::Io(_) => {
            EXIT_SESSION_CONNECT
        }
        ClientError::Timeout => EXIT_SESSION_TIMEOUT,
        ClientError::Protocol(_) => EXIT_SESSION_PROTOCOL,
        ClientError::SessionClosed(_) => EXIT_SESSION_NOT_FOUND,
        ClientError::Server { code, .. } => match code.as_str() {
            "not_found" | "not_attached" => EXIT_SESSION_NOT_FOUND,
            "upload_failed" => EXIT_SESSION_UPLOAD,
            "rate_limited" | "server_busy" => EXIT_SESSION_BUSY,
            "protocol_mismatch" | "protocol_violation" | "hello_required" | "parse_error"
            | "message_too_large" => EXIT_SESSION_PROTOCOL,
            "agent_loop_exceeded" | "reasoning_collaborator_failure" => EXIT_SESSION_TURN_FAILED,
            _ => EXIT_ERROR,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(code: &str) -> ClientError {
        ClientError::Server { code: code.to_string(), message: String::new(), retry_after_ms: None }
    }

    #[test]
    fn test_codes_are_distinct() {
        let codes = [
            EXIT_IO,
            EXIT_PARSE,
            EXIT_AGENT_MISSING_KEY,
            EXIT_AGENT_CONFIG,
            EXIT_SESSION_CONNECT,
            EXIT_SESSION_PROTOCOL,
            EXIT_SESSION_NOT_FOUND,
            EXIT_SESSION_UPLOAD,
            EXIT_SESSION_BUSY,
            EXIT_SESSION_TURN_FAILED,
            EXIT_SESSION_TIMEOUT,
            EXIT_SESSION_BIND,
        ];
        let mut sorted = codes.to_vec();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), codes.len());
        assert!(codes.iter().all(|c| *c > EXIT_USAGE));
    }

    #[test]
    fn test_server_error_mapping() {
        assert_eq!(client_exit_code(&server("not_found")), EXIT_SESSION_NOT_FOUND);
        assert_eq!(client_exit_code(&server("rate_limited")), EXIT_SESSION_BUSY);
        assert_eq!(client_exit_code(&server("upload_failed")), EXIT_SESSION_UPLOAD);
        assert_eq!(client_exit_code(&server("agent_loop_exceeded")), EXIT_SESSION_TURN_FAILED);
        assert_eq!(client_exit_code(&server("something_new")), EXIT_ERROR);
        assert_eq!(client_exit_code(&ClientError::ConnectionClosed), EXIT_SESSION_CONNECT);
    }
}
