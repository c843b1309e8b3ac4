//! Single-response calls.
use super::{CallError, CallSpec, TetherClient, status_reply};
use crate::{
    BoxError,
    retry::{Reply, retry_request},
    stub::StubFactory,
};
use http_body::Body as HttpBody;
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
    /// Performs a call with a single response.
    ///
    /// Retryable statuses are retried up to `max_retries` times. The returned `Result` is the
    /// single outcome of the call.
    ///
    /// # Returns
    ///
    /// * `Ok(Value)` - The response message.
    /// * `Err(CallError::Status)` - The last attempt failed with a decorated status.
    /// * `Err(_)` - Any other failure; these are never retried.
    pub async fn request(
        &self,
        spec: &CallSpec,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, CallError> {
        self.ensure_live()?;

        let call = self.prepare(spec, &payload).await?;
        let config = self.retry_config(call.request.object_mode);

        let reply = retry_request(&config, |attempt| {
            let mut client = call.stub.client().clone();
            let method = call.method.clone();
            let payload = call.request.payload.clone();
            let options = call.options.clone();

            async move {
                debug!(attempt, method = %method.full_name(), "sending request");
                match client.unary(method, payload, options).await? {
                    Ok(response) => Ok(Reply::Message(response)),
                    Err(status) => status_reply(status),
                }
            }
        })
        .await?;

        match reply {
            Reply::Message(response) => Ok(response),
            Reply::Status(status) => Err(CallError::Status(status)),
        }
    }
}
