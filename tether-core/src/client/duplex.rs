//! Client-streaming and bidirectional calls.
use super::{
    CallError, CallSpec, DuplexStream, Payload, RequestSink, ResponseStream, StreamEvent,
    TetherClient, closing_status, status_error, types::STREAM_BUFFER,
};
use crate::{BoxError, stub::StubFactory};
use futures_util::StreamExt;
use http_body::Body as HttpBody;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::client::GrpcService;
use tracing::debug;

impl<F, S> TetherClient<F>
where
    F: StubFactory<Service = S>,
    S: GrpcService<tonic::body::Body> + Clone + Send + Sync + 'static,
    S::Error: Into<BoxError> + Send,
    S::Future: Send,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    /// Starts a call whose requests are written through a [`RequestSink`].
    ///
    /// The sink accepts writes immediately; they are buffered until the transport is open.
    /// `initial`, when given, is decorated and sent first. Failures while preparing the call
    /// arrive as a [`StreamEvent::Error`]. A successful call ends with a
    /// [`StreamEvent::Response`] carrying the OK status.
    ///
    /// Only methods that take a request stream can be opened this way; any other method
    /// ends with [`CallError::NotClientStreaming`]. Duplex calls are not retried.
    pub fn request_writable_stream(
        &self,
        spec: CallSpec,
        initial: Option<serde_json::Value>,
    ) -> Result<DuplexStream, CallError> {
        self.ensure_live()?;

        let (request_tx, request_rx) = mpsc::channel(STREAM_BUFFER);
        let (event_tx, event_rx) = mpsc::channel(STREAM_BUFFER);
        let mut responses = ResponseStream::new(event_rx);
        let client = self.clone();
        responses.attach(tokio::spawn(async move {
            client
                .drive_duplex(spec, initial, request_rx, event_tx)
                .await
        }));

        Ok(DuplexStream {
            sink: RequestSink::new(request_tx),
            responses,
        })
    }

    async fn drive_duplex(
        self,
        spec: CallSpec,
        initial: Option<serde_json::Value>,
        requests: mpsc::Receiver<serde_json::Value>,
        tx: mpsc::Sender<StreamEvent>,
    ) {
        let call = match self
            .prepare(&spec, initial.as_ref().unwrap_or(&serde_json::Value::Null))
            .await
        {
            Ok(call) => call,
            Err(err) => {
                let _ = tx.send(StreamEvent::Error(err)).await;
                return;
            }
        };

        if !call.method.is_client_streaming() {
            let err = CallError::NotClientStreaming {
                service: spec.service,
                method: spec.method,
            };
            let _ = tx.send(StreamEvent::Error(err)).await;
            return;
        }

        let first = initial.map(|_| call.request.payload.clone());
        let outbound = futures_util::stream::iter(first).chain(ReceiverStream::new(requests));
        let mut client = call.stub.client().clone();

        if call.method.is_server_streaming() {
            let opened = client
                .bidirectional_streaming(call.method.clone(), outbound, call.options.clone())
                .await;

            let mut messages = match opened {
                Ok(Ok(messages)) => messages,
                Ok(Err(status)) => {
                    let _ = tx.send(StreamEvent::Error(status_error(status))).await;
                    return;
                }
                Err(err) => {
                    let _ = tx.send(StreamEvent::Error(err.into())).await;
                    return;
                }
            };

            loop {
                let event = match messages.message().await {
                    Ok(Some(message)) => StreamEvent::Data(Payload::Object(message)),
                    Ok(None) => closing_status(Ok(())),
                    Err(status) => closing_status(Err(status)),
                };
                let terminal = !matches!(event, StreamEvent::Data(_));

                if tx.send(event).await.is_err() {
                    debug!(service = %spec.service, method = %spec.method, "stream abandoned");
                    return;
                }
                if terminal {
                    return;
                }
            }
        }

        let outcome = client
            .client_streaming(call.method.clone(), outbound, call.options.clone())
            .await;

        let events = match outcome {
            Ok(Ok(message)) => vec![
                StreamEvent::Data(Payload::Object(message)),
                closing_status(Ok(())),
            ],
            Ok(Err(status)) => vec![closing_status(Err(status))],
            Err(err) => vec![StreamEvent::Error(err.into())],
        };

        for event in events {
            if tx.send(event).await.is_err() {
                return;
            }
        }
    }
}
