//! Wire protocol between the extension and pipe clients.
//!
//! Every message is a UTF-8 JSON envelope `{protocol_version, message_type,
//! payload}` terminated by the four-byte delimiter `\r\n\r\n`. Four payload
//! kinds exist: command, response, error and heartbeat. Parsing never
//! panics and never mutates state: every deviation from the grammar is an
//! [`ProtocolError`] value, surfaced to clients as `InvalidMessage`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Version stamped into (and expected in) every envelope.
pub const PROTOCOL_VERSION: u32 = 1;

/// Upper bound for one serialized message, delimiter included.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Terminates every message on the wire.
pub const MESSAGE_DELIMITER: &[u8] = b"\r\n\r\n";

/// Default command timeout carried by requests that do not set one.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("message is empty")]
    Empty,
    #[error("message size {0} exceeds {MAX_MESSAGE_SIZE} bytes")]
    Oversized(usize),
    #[error("message delimiter not found")]
    MissingDelimiter,
    #[error("malformed message json: {0}")]
    Json(String),
    #[error("unexpected message type {0}")]
    UnexpectedType(u8),
    #[error("message invariant violated: {0}")]
    Invariant(&'static str),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        ProtocolError::Json(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Command = 1,
    Response = 2,
    Error = 3,
    Heartbeat = 4,
}

impl MessageType {
    pub fn from_u8(raw: u8) -> Result<Self, ProtocolError> {
        match raw {
            1 => Ok(MessageType::Command),
            2 => Ok(MessageType::Response),
            3 => Ok(MessageType::Error),
            4 => Ok(MessageType::Heartbeat),
            other => Err(ProtocolError::UnexpectedType(other)),
        }
    }

    fn tag(self) -> &'static str {
        match self {
            MessageType::Command => "command",
            MessageType::Response => "response",
            MessageType::Error => "error",
            MessageType::Heartbeat => "heartbeat",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub enum ErrorCode {
    None,
    InvalidMessage,
    CommandFailed,
    Timeout,
    ConnectionLost,
    InvalidParameter,
    UnknownCommand,
    ExtensionNotLoaded,
    SymbolLoadError,
    MemoryAccessError,
    ProcessNotFound,
    ThreadError,
    BreakpointError,
    StackError,
    ModuleError,
    DebuggingContextError,
    InternalError,
    AlreadyStarted,
    ClientNotFound,
    ClientNotConnected,
    SendFailed,
    HandlerException,
    PipeCreationFailed,
}

impl From<ErrorCode> for u32 {
    fn from(code: ErrorCode) -> u32 {
        match code {
            ErrorCode::None => 0,
            ErrorCode::InvalidMessage => 1,
            ErrorCode::CommandFailed => 2,
            ErrorCode::Timeout => 3,
            ErrorCode::ConnectionLost => 4,
            ErrorCode::InvalidParameter => 5,
            ErrorCode::UnknownCommand => 6,
            ErrorCode::ExtensionNotLoaded => 7,
            ErrorCode::SymbolLoadError => 8,
            ErrorCode::MemoryAccessError => 9,
            ErrorCode::ProcessNotFound => 10,
            ErrorCode::ThreadError => 11,
            ErrorCode::BreakpointError => 12,
            ErrorCode::StackError => 13,
            ErrorCode::ModuleError => 14,
            ErrorCode::DebuggingContextError => 15,
            ErrorCode::InternalError => 16,
            ErrorCode::AlreadyStarted => 17,
            ErrorCode::ClientNotFound => 18,
            ErrorCode::ClientNotConnected => 19,
            ErrorCode::SendFailed => 20,
            ErrorCode::HandlerException => 21,
            ErrorCode::PipeCreationFailed => 22,
        }
    }
}

impl From<u32> for ErrorCode {
    fn from(raw: u32) -> ErrorCode {
        match raw {
            1 => ErrorCode::InvalidMessage,
            2 => ErrorCode::CommandFailed,
            3 => ErrorCode::Timeout,
            4 => ErrorCode::ConnectionLost,
            5 => ErrorCode::InvalidParameter,
            6 => ErrorCode::UnknownCommand,
            7 => ErrorCode::ExtensionNotLoaded,
            8 => ErrorCode::SymbolLoadError,
            9 => ErrorCode::MemoryAccessError,
            10 => ErrorCode::ProcessNotFound,
            11 => ErrorCode::ThreadError,
            12 => ErrorCode::BreakpointError,
            13 => ErrorCode::StackError,
            14 => ErrorCode::ModuleError,
            15 => ErrorCode::DebuggingContextError,
            16 => ErrorCode::InternalError,
            17 => ErrorCode::AlreadyStarted,
            18 => ErrorCode::ClientNotFound,
            19 => ErrorCode::ClientNotConnected,
            20 => ErrorCode::SendFailed,
            21 => ErrorCode::HandlerException,
            22 => ErrorCode::PipeCreationFailed,
            _ => ErrorCode::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum ErrorCategory {
    Unknown,
    UserInput,
    System,
    Communication,
    Process,
    Memory,
    Symbol,
    Extension,
    Timeout,
}

impl From<ErrorCategory> for u8 {
    fn from(category: ErrorCategory) -> u8 {
        match category {
            ErrorCategory::Unknown => 0,
            ErrorCategory::UserInput => 1,
            ErrorCategory::System => 2,
            ErrorCategory::Communication => 3,
            ErrorCategory::Process => 4,
            ErrorCategory::Memory => 5,
            ErrorCategory::Symbol => 6,
            ErrorCategory::Extension => 7,
            ErrorCategory::Timeout => 8,
        }
    }
}

impl From<u8> for ErrorCategory {
    fn from(raw: u8) -> ErrorCategory {
        match raw {
            1 => ErrorCategory::UserInput,
            2 => ErrorCategory::System,
            3 => ErrorCategory::Communication,
            4 => ErrorCategory::Process,
            5 => ErrorCategory::Memory,
            6 => ErrorCategory::Symbol,
            7 => ErrorCategory::Extension,
            8 => ErrorCategory::Timeout,
            _ => ErrorCategory::Unknown,
        }
    }
}

/// Map an error code onto its category.
pub fn classify_error(code: ErrorCode) -> ErrorCategory {
    match code {
        ErrorCode::None => ErrorCategory::Unknown,
        ErrorCode::InvalidParameter | ErrorCode::UnknownCommand => ErrorCategory::UserInput,
        ErrorCode::Timeout => ErrorCategory::Timeout,
        ErrorCode::ConnectionLost => ErrorCategory::Communication,
        ErrorCode::ProcessNotFound | ErrorCode::ThreadError => ErrorCategory::Process,
        ErrorCode::MemoryAccessError => ErrorCategory::Memory,
        ErrorCode::SymbolLoadError => ErrorCategory::Symbol,
        ErrorCode::ExtensionNotLoaded => ErrorCategory::Extension,
        _ => ErrorCategory::System,
    }
}

/// Fixed, user-facing suggestion per error code.
pub fn error_suggestion(code: ErrorCode) -> &'static str {
    match code {
        ErrorCode::InvalidMessage => {
            "Check message format and ensure it follows the protocol specification"
        }
        ErrorCode::CommandFailed => "Verify the command syntax and try again",
        ErrorCode::Timeout => "Increase timeout value or check if the target is responsive",
        ErrorCode::ExtensionNotLoaded => "Load the extension first using the connect command",
        ErrorCode::ProcessNotFound => "Ensure the target process is running and accessible",
        ErrorCode::MemoryAccessError => "Check memory addresses and permissions",
        _ => "Check the logs for more detailed error information",
    }
}

/// Command payload (message type 1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub request_id: String,
    pub command: String,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub timestamp: i64,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl CommandRequest {
    pub fn new(command: impl Into<String>) -> Self {
        CommandRequest {
            request_id: generate_request_id(),
            command: command.into(),
            parameters: Value::Null,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            timestamp: now_millis(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Response payload (message type 2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub request_id: String,
    pub success: bool,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error_message: String,
    #[serde(default)]
    pub execution_time_ms: u64,
    #[serde(default)]
    pub session_data: Value,
    #[serde(default)]
    pub timestamp: i64,
}

impl CommandResponse {
    /// Successful response skeleton for the given request id.
    pub fn ok(request_id: impl Into<String>, output: impl Into<String>) -> Self {
        CommandResponse {
            request_id: request_id.into(),
            success: true,
            output: output.into(),
            error_message: String::new(),
            execution_time_ms: 0,
            session_data: Value::Null,
            timestamp: now_millis(),
        }
    }

    /// Failure response skeleton for the given request id.
    pub fn fail(request_id: impl Into<String>, error_message: impl Into<String>) -> Self {
        CommandResponse {
            request_id: request_id.into(),
            success: false,
            output: String::new(),
            error_message: error_message.into(),
            execution_time_ms: 0,
            session_data: Value::Null,
            timestamp: now_millis(),
        }
    }
}

/// Error payload (message type 3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub error_code: ErrorCode,
    pub category: ErrorCategory,
    pub error_message: String,
    pub suggestion: String,
    #[serde(default)]
    pub details: Value,
    #[serde(default)]
    pub timestamp: i64,
}

/// Heartbeat payload (message type 4).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatMessage {
    #[serde(default)]
    pub session_info: Value,
    #[serde(default)]
    pub timestamp: i64,
}

impl HeartbeatMessage {
    pub fn new(session_info: Value) -> Self {
        HeartbeatMessage {
            session_info,
            timestamp: now_millis(),
        }
    }
}

/// Build an error message, filling category and suggestion from the fixed
/// tables. A non-empty `context` lands in `details.context`.
pub fn make_error(
    request_id: Option<String>,
    code: ErrorCode,
    message: impl Into<String>,
    context: &str,
) -> ErrorMessage {
    ErrorMessage {
        request_id,
        error_code: code,
        category: classify_error(code),
        error_message: message.into(),
        suggestion: error_suggestion(code).to_string(),
        details: if context.is_empty() {
            Value::Null
        } else {
            json!({ "context": context })
        },
        timestamp: now_millis(),
    }
}

/// Opaque request identifier with negligible collision probability.
pub fn generate_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Milliseconds since the Unix epoch, the `timestamp` unit on the wire.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// `0 < size <= MAX_MESSAGE_SIZE`.
pub fn validate_message_size(size: usize) -> bool {
    size > 0 && size <= MAX_MESSAGE_SIZE
}

/// Position of the first delimiter in `data`, if any.
pub fn find_delimiter(data: &[u8]) -> Option<usize> {
    if data.len() < MESSAGE_DELIMITER.len() {
        return None;
    }
    data.windows(MESSAGE_DELIMITER.len())
        .position(|window| window == MESSAGE_DELIMITER)
}

// ---------------------------------- serialization --------------------------------------------

fn seal(message_type: MessageType, mut payload: Value) -> Result<Vec<u8>, ProtocolError> {
    if let Value::Object(map) = &mut payload {
        map.insert("type".to_string(), Value::String(message_type.tag().into()));
    }

    let envelope = json!({
        "protocol_version": PROTOCOL_VERSION,
        "message_type": message_type as u8,
        "payload": payload,
    });

    let mut bytes = serde_json::to_vec(&envelope)?;
    bytes.extend_from_slice(MESSAGE_DELIMITER);
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::Oversized(bytes.len()));
    }
    Ok(bytes)
}

pub fn serialize_command(request: &CommandRequest) -> Result<Vec<u8>, ProtocolError> {
    if request.request_id.is_empty() {
        return Err(ProtocolError::Invariant("command without request_id"));
    }
    if request.command.trim().len() > 4096 {
        return Err(ProtocolError::Invariant("command exceeds 4096 bytes"));
    }
    seal(MessageType::Command, serde_json::to_value(request)?)
}

pub fn serialize_response(response: &CommandResponse) -> Result<Vec<u8>, ProtocolError> {
    if response.request_id.is_empty() {
        return Err(ProtocolError::Invariant("response without request_id"));
    }
    if response.success != response.error_message.is_empty() {
        return Err(ProtocolError::Invariant(
            "success flag contradicts error_message",
        ));
    }
    seal(MessageType::Response, serde_json::to_value(response)?)
}

pub fn serialize_error(error: &ErrorMessage) -> Result<Vec<u8>, ProtocolError> {
    seal(MessageType::Error, serde_json::to_value(error)?)
}

pub fn serialize_heartbeat(heartbeat: &HeartbeatMessage) -> Result<Vec<u8>, ProtocolError> {
    seal(MessageType::Heartbeat, serde_json::to_value(heartbeat)?)
}

// ----------------------------------- parsing -------------------------------------------------

#[derive(Deserialize)]
struct Envelope {
    #[allow(dead_code)]
    protocol_version: u32,
    message_type: u8,
    payload: Value,
}

fn open(data: &[u8], expected: MessageType) -> Result<Value, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::Empty);
    }
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::Oversized(data.len()));
    }

    let body = match find_delimiter(data) {
        Some(pos) => &data[..pos],
        None => return Err(ProtocolError::MissingDelimiter),
    };

    let envelope: Envelope = serde_json::from_slice(body)?;
    let message_type = MessageType::from_u8(envelope.message_type)?;
    if message_type != expected {
        return Err(ProtocolError::UnexpectedType(envelope.message_type));
    }
    Ok(envelope.payload)
}

pub fn parse_command(data: &[u8]) -> Result<CommandRequest, ProtocolError> {
    let payload = open(data, MessageType::Command)?;
    let request: CommandRequest = serde_json::from_value(payload)?;
    if request.request_id.is_empty() {
        return Err(ProtocolError::Invariant("command without request_id"));
    }
    Ok(request)
}

pub fn parse_response(data: &[u8]) -> Result<CommandResponse, ProtocolError> {
    let payload = open(data, MessageType::Response)?;
    Ok(serde_json::from_value(payload)?)
}

pub fn parse_error(data: &[u8]) -> Result<ErrorMessage, ProtocolError> {
    let payload = open(data, MessageType::Error)?;
    Ok(serde_json::from_value(payload)?)
}

pub fn parse_heartbeat(data: &[u8]) -> Result<HeartbeatMessage, ProtocolError> {
    let payload = open(data, MessageType::Heartbeat)?;
    Ok(serde_json::from_value(payload)?)
}

/// Message type of a framed buffer without parsing the payload.
pub fn peek_message_type(data: &[u8]) -> Result<MessageType, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::Empty);
    }
    let body = match find_delimiter(data) {
        Some(pos) => &data[..pos],
        None => return Err(ProtocolError::MissingDelimiter),
    };
    let envelope: Envelope = serde_json::from_slice(body)?;
    MessageType::from_u8(envelope.message_type)
}
