//! Server-streaming calls.
use super::{
    CallError, CallSpec, Payload, ResponseStream, StreamEvent, TetherClient, status_error,
    status_reply, types::STREAM_BUFFER,
};
use crate::{
    BoxError,
    retry::{Reply, retry_request},
    status::ResponseStatus,
    stub::StubFactory,
};
use http_body::Body as HttpBody;
use tokio::sync::mpsc;
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
    /// Starts a server-streaming call and returns its events right away.
    ///
    /// Failures while preparing the call arrive as a [`StreamEvent::Error`]. Opening the
    /// stream is retried like a unary call, each attempt reported as a
    /// [`StreamEvent::Request`]. Once open, a [`StreamEvent::Response`] with the OK status
    /// precedes the messages.
    pub fn request_stream(
        &self,
        spec: CallSpec,
        payload: serde_json::Value,
    ) -> Result<ResponseStream, CallError> {
        self.ensure_live()?;

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let mut stream = ResponseStream::new(rx);
        let client = self.clone();
        stream.attach(tokio::spawn(async move {
            client.drive_server_stream(spec, payload, tx).await
        }));

        Ok(stream)
    }

    async fn drive_server_stream(
        self,
        spec: CallSpec,
        payload: serde_json::Value,
        tx: mpsc::Sender<StreamEvent>,
    ) {
        let call = match self.prepare(&spec, &payload).await {
            Ok(call) => call,
            Err(err) => {
                let _ = tx.send(StreamEvent::Error(err)).await;
                return;
            }
        };
        let config = self.retry_config(call.request.object_mode);

        let opened = retry_request(&config, |attempt| {
            let mut client = call.stub.client().clone();
            let method = call.method.clone();
            let payload = call.request.payload.clone();
            let options = call.options.clone();
            let observed = call.observe(&spec, attempt);
            let tx = tx.clone();

            async move {
                let _ = tx.send(StreamEvent::Request(observed)).await;
                match client.server_streaming(method, payload, options).await? {
                    Ok(stream) => Ok(Reply::Message(stream)),
                    Err(status) => status_reply(status),
                }
            }
        })
        .await;

        let mut messages = match opened {
            Ok(Reply::Message(messages)) => messages,
            Ok(Reply::Status(status)) => {
                let _ = tx.send(StreamEvent::Error(CallError::Status(status))).await;
                return;
            }
            Err(err) => {
                let _ = tx.send(StreamEvent::Error(err)).await;
                return;
            }
        };

        if tx
            .send(StreamEvent::Response(ResponseStatus::ok()))
            .await
            .is_err()
        {
            return;
        }

        loop {
            let event = match messages.message().await {
                Ok(Some(message)) => StreamEvent::Data(Payload::new(message, config.object_mode)),
                Ok(None) => break,
                Err(status) => StreamEvent::Error(status_error(status)),
            };
            let terminal = matches!(event, StreamEvent::Error(_));

            if tx.send(event).await.is_err() {
                debug!(service = %spec.service, method = %spec.method, "stream abandoned");
                return;
            }
            if terminal {
                return;
            }
        }

        debug!(service = %spec.service, method = %spec.method, "stream finished");
    }
}
