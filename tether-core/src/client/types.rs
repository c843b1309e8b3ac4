use crate::{
    auth::AuthError, grpc::client::GrpcRequestError, request::MissingProjectId,
    status::ResponseStatus, stub::StubError,
};
use futures_util::Stream;
use std::{
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_stream::wrappers::ReceiverStream;

/// One RPC invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSpec {
    /// Logical service name, as configured in `protoServices`.
    pub service: String,
    /// Method name within the service (e.g. `UnaryEcho`).
    pub method: String,
    /// Per-call timeout. The deadline is computed once, before the first attempt.
    pub timeout: Option<Duration>,
}

impl CallSpec {
    pub fn new(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Errors surfaced by the dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("Client is running in sandbox mode: '{0}'")]
    Sandboxed(String),
    #[error("Failed to resolve credentials: {0}")]
    Credentials(#[from] AuthError),
    #[error("Failed to prepare the request: {0}")]
    Decoration(#[from] MissingProjectId),
    #[error("Failed to create the service stub: {0}")]
    Stub(#[from] StubError),
    #[error("Service '{0}' not found")]
    ServiceNotFound(String),
    #[error("Method '{method}' not found in service '{service}'")]
    MethodNotFound { service: String, method: String },
    /// A method that takes a single request was opened as a writable stream.
    #[error("Method '{method}' of service '{service}' does not accept a request stream")]
    NotClientStreaming { service: String, method: String },
    /// A transport status, decorated with its HTTP-like code.
    #[error("{0}")]
    Status(ResponseStatus),
    /// A transport status that could not be decorated.
    #[error("gRPC status: {0}")]
    Transport(tonic::Status),
    #[error("gRPC client request error: '{0}'")]
    Request(#[from] GrpcRequestError),
}

impl CallError {
    /// The HTTP-like code of a decorated status.
    pub fn code(&self) -> Option<u16> {
        match self {
            CallError::Status(status) => Some(status.code),
            _ => None,
        }
    }
}

/// A message received on a stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Object(serde_json::Value),
    /// The message serialized as JSON.
    Encoded(Vec<u8>),
}

impl Payload {
    pub(crate) fn new(value: serde_json::Value, object_mode: bool) -> Self {
        if object_mode {
            return Payload::Object(value);
        }
        match serde_json::to_vec(&value) {
            Ok(bytes) => Payload::Encoded(bytes),
            Err(_) => Payload::Object(value),
        }
    }

    /// The message as JSON, whatever its representation.
    pub fn to_value(&self) -> Option<serde_json::Value> {
        match self {
            Payload::Object(value) => Some(value.clone()),
            Payload::Encoded(bytes) => serde_json::from_slice(bytes).ok(),
        }
    }
}

/// An outbound attempt, as it left the client.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedRequest {
    pub service: String,
    pub method: String,
    pub attempt: u32,
    pub payload: serde_json::Value,
    /// Call metadata, without the `authorization` header.
    pub metadata: Vec<(String, String)>,
}

/// Everything a stream reports, in order.
#[derive(Debug)]
pub enum StreamEvent {
    Request(ObservedRequest),
    /// The decorated status of the call. On server streams it follows the response headers;
    /// on duplex streams it closes a successful call.
    Response(ResponseStatus),
    Data(Payload),
    /// Terminal failure. Nothing follows it.
    Error(CallError),
}

pub(crate) const STREAM_BUFFER: usize = 64;

/// Receiving half of a streaming call.
///
/// Dropping it cancels the call.
#[derive(Debug)]
pub struct ResponseStream {
    events: ReceiverStream<StreamEvent>,
    task: Option<JoinHandle<()>>,
}

impl ResponseStream {
    pub(crate) fn new(events: mpsc::Receiver<StreamEvent>) -> Self {
        Self {
            events: ReceiverStream::new(events),
            task: None,
        }
    }

    pub(crate) fn attach(&mut self, task: JoinHandle<()>) {
        self.task = Some(task);
    }
}

impl Stream for ResponseStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

impl Drop for ResponseStream {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("The request stream is closed")]
pub struct SinkClosed(pub serde_json::Value);

/// Sending half of a duplex call.
///
/// Writes are buffered until the transport is open. Dropping the sink, or calling
/// [`RequestSink::finish`], half-closes the call.
#[derive(Debug)]
pub struct RequestSink {
    tx: mpsc::Sender<serde_json::Value>,
}

impl RequestSink {
    pub(crate) fn new(tx: mpsc::Sender<serde_json::Value>) -> Self {
        Self { tx }
    }

    pub async fn send(&self, message: serde_json::Value) -> Result<(), SinkClosed> {
        self.tx.send(message).await.map_err(|e| SinkClosed(e.0))
    }

    pub fn finish(self) {}
}

/// Both halves of a duplex call.
#[derive(Debug)]
pub struct DuplexStream {
    pub sink: RequestSink,
    pub responses: ResponseStream,
}

impl DuplexStream {
    pub fn split(self) -> (RequestSink, ResponseStream) {
        (self.sink, self.responses)
    }
}
