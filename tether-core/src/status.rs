//! # Status Translation
//!
//! Maps the 17 canonical gRPC status codes onto HTTP-like `{code, message}` pairs so callers
//! can reason about failures the same way regardless of transport.
//!
//! * [`translate`] looks a numeric gRPC code up in [`GRPC_ERROR_CODE_TO_HTTP`].
//! * [`decorate`] builds a [`ResponseStatus`] out of anything exposing a code and a message.
//! * [`should_retry`] is the retry predicate used by every dispatcher.
use std::fmt;

/// One row of the translation table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusEntry {
    /// The gRPC status code.
    pub grpc_code: i32,
    /// The HTTP-like code exposed to callers.
    pub code: u16,
    pub message: &'static str,
}

const fn entry(grpc_code: i32, code: u16, message: &'static str) -> StatusEntry {
    StatusEntry {
        grpc_code,
        code,
        message,
    }
}

/// gRPC status code to HTTP-like status, indexed by the gRPC code.
pub const GRPC_ERROR_CODE_TO_HTTP: [StatusEntry; 17] = [
    entry(0, 200, "OK"),
    entry(1, 499, "Client Closed Request"),
    entry(2, 500, "Internal Server Error"),
    entry(3, 400, "Bad Request"),
    entry(4, 504, "Gateway Timeout"),
    entry(5, 404, "Not Found"),
    entry(6, 409, "Conflict"),
    entry(7, 403, "Forbidden"),
    entry(8, 429, "Too Many Requests"),
    entry(9, 412, "Precondition Failed"),
    entry(10, 409, "Conflict"),
    entry(11, 400, "Bad Request"),
    entry(12, 501, "Not Implemented"),
    entry(13, 500, "Internal Server Error"),
    entry(14, 503, "Service Unavailable"),
    entry(15, 500, "Internal Server Error"),
    entry(16, 401, "Unauthorized"),
];

/// HTTP-like codes worth another attempt.
pub const RETRYABLE_CODES: [u16; 4] = [429, 500, 502, 503];

/// A status decorated with its HTTP-like code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseStatus {
    pub code: u16,
    pub message: String,
    pub grpc_code: i32,
}

impl ResponseStatus {
    /// The decorated form of a successful call.
    pub fn ok() -> Self {
        GRPC_ERROR_CODE_TO_HTTP[0].into()
    }

    pub fn is_ok(&self) -> bool {
        self.grpc_code == 0
    }
}

impl From<StatusEntry> for ResponseStatus {
    fn from(entry: StatusEntry) -> Self {
        Self {
            code: entry.code,
            message: entry.message.to_string(),
            grpc_code: entry.grpc_code,
        }
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} (grpc code {})", self.code, self.message, self.grpc_code)
    }
}

/// Anything that carries a transport status code and an optional message.
pub trait StatusSource {
    fn status_code(&self) -> Option<i32>;
    fn status_message(&self) -> Option<&str>;
}

impl StatusSource for tonic::Status {
    fn status_code(&self) -> Option<i32> {
        Some(self.code() as i32)
    }

    fn status_message(&self) -> Option<&str> {
        Some(self.message())
    }
}

/// A bare code/message pair, for statuses that do not come from `tonic`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawStatus {
    pub code: i32,
    pub message: Option<String>,
}

impl StatusSource for RawStatus {
    fn status_code(&self) -> Option<i32> {
        Some(self.code)
    }

    fn status_message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

/// Looks a gRPC code up in the translation table.
///
/// Codes outside `0..=16` are unrecognized and yield `None`.
pub fn translate(grpc_code: i32) -> Option<&'static StatusEntry> {
    usize::try_from(grpc_code)
        .ok()
        .and_then(|index| GRPC_ERROR_CODE_TO_HTTP.get(index))
}

/// Decorates a status source with its HTTP-like code.
///
/// The source message wins over the table message when present. A message holding a JSON
/// object with a `description` field is unwrapped to that description.
///
/// # Returns
///
/// * `Some(ResponseStatus)` - The code is in the table.
/// * `None` - The code is unrecognized; the caller keeps the original error untouched.
pub fn decorate(source: &impl StatusSource) -> Option<ResponseStatus> {
    let entry = translate(source.status_code()?)?;
    let mut status = ResponseStatus::from(*entry);

    if let Some(message) = source.status_message().filter(|m| !m.is_empty()) {
        status.message = description_from_json(message).unwrap_or_else(|| message.to_string());
    }

    Some(status)
}

fn description_from_json(message: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(message).ok()?;
    match value.get("description")? {
        serde_json::Value::String(description) => Some(description.clone()),
        other => Some(other.to_string()),
    }
}

/// Whether a decorated status is worth retrying.
pub fn should_retry(status: &ResponseStatus) -> bool {
    RETRYABLE_CODES.contains(&status.code)
}
