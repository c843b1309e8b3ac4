//! # Generic gRPC Client
//!
//! This module wraps a standard `tonic` client to provide a generic interface for
//! gRPC communication. It is agnostic to the specific Protobuf messages being exchanged.
//!
//! The [`GrpcClient`] utilizes the [`super::codec::JsonCodec`] to handle serialization.
//! It does not need to know the structure of the data it is sending; it simply ensures
//! the connection is ready and passes the `serde_json::Value` and `MethodDescriptor`
//! to the codec.
//!
//! ## Features
//!
//! * **Dynamic Pathing**: Constructs the HTTP/2 path (e.g., `/package.Service/Method`) at runtime.
//! * **Metadata Handling**: Converts string tuples into Tonic's `MetadataMap` for headers.
//! * **Deadlines**: Attaches the time left until an absolute deadline as the call timeout.
//! * **Access Patterns**: Unary, Server Streaming, Client Streaming and Bidirectional Streaming.
use super::codec::JsonCodec;
use crate::{BoxError, config::ChannelOptions, deadline, descriptor::LoadOptions};
use futures_util::Stream;
use http_body::Body as HttpBody;
use prost_reflect::MethodDescriptor;
use std::str::FromStr;
use tokio::time::Instant;
use tonic::{
    Streaming,
    client::GrpcService,
    metadata::{
        MetadataKey, MetadataValue,
        errors::{InvalidMetadataKey, InvalidMetadataValue},
    },
    transport::Channel,
};

#[derive(thiserror::Error, Debug)]
pub enum GrpcRequestError {
    #[error("Internal error, the client was not ready: '{0}'")]
    ClientNotReady(#[source] BoxError),
    #[error("Invalid metadata (header) key '{key}': '{source}'")]
    InvalidMetadataKey {
        key: String,
        source: InvalidMetadataKey,
    },
    #[error("Invalid metadata (header) value for key '{key}': '{source}'")]
    InvalidMetadataValue {
        key: String,
        source: InvalidMetadataValue,
    },
}

/// Per-call transport options.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Custom gRPC metadata (headers) to attach to the request.
    pub headers: Vec<(String, String)>,
    /// Absolute point in time after which the call is abandoned.
    pub deadline: Option<Instant>,
}

/// A generic gRPC client speaking JSON.
#[derive(Debug, Clone)]
pub struct GrpcClient<S = Channel> {
    client: tonic::client::Grpc<S>,
    load_options: LoadOptions,
}

impl<S> GrpcClient<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    pub fn new(service: S, channel_options: &ChannelOptions, load_options: LoadOptions) -> Self {
        let client = tonic::client::Grpc::new(service)
            .max_encoding_message_size(channel_options.max_send_size())
            .max_decoding_message_size(channel_options.max_receive_size());
        Self {
            client,
            load_options,
        }
    }

    /// Performs a Unary gRPC call (Single Request -> Single Response).
    ///
    /// # Returns
    /// * `Ok(Ok(Value))` - Successful RPC execution.
    /// * `Ok(Err(Status))` - RPC executed, but server returned an error.
    /// * `Err(GrpcRequestError)` - Failed to send request or connect.
    pub async fn unary(
        &mut self,
        method: MethodDescriptor,
        payload: serde_json::Value,
        options: CallOptions,
    ) -> Result<Result<serde_json::Value, tonic::Status>, GrpcRequestError> {
        self.ready().await?;

        let codec = self.codec(&method);
        let path = http_path(&method);
        let request = build_request(payload, options)?;

        match self.client.unary(request, path, codec).await {
            Ok(response) => Ok(Ok(response.into_inner())),
            Err(status) => Ok(Err(status)),
        }
    }

    /// Performs a Server Streaming gRPC call (Single Request -> Stream of Responses).
    ///
    /// # Returns
    ///
    /// * `Ok(Ok(Streaming))` - The server accepted the call and sent its headers.
    /// * `Ok(Err(Status))` - RPC executed, but server returned an error.
    /// * `Err(GrpcRequestError)` - Failed to send request or connect.
    pub async fn server_streaming(
        &mut self,
        method: MethodDescriptor,
        payload: serde_json::Value,
        options: CallOptions,
    ) -> Result<Result<Streaming<serde_json::Value>, tonic::Status>, GrpcRequestError> {
        self.ready().await?;

        let codec = self.codec(&method);
        let path = http_path(&method);
        let request = build_request(payload, options)?;

        match self.client.server_streaming(request, path, codec).await {
            Ok(response) => Ok(Ok(response.into_inner())),
            Err(status) => Ok(Err(status)),
        }
    }

    /// Performs a Client Streaming gRPC call (Stream of Requests -> Single Response).
    ///
    /// # Returns
    ///
    /// * `Ok(Ok(Value))` - Successful RPC execution.
    /// * `Ok(Err(Status))` - RPC executed, but server returned an error.
    /// * `Err(GrpcRequestError)` - Failed to send request or connect.
    pub async fn client_streaming(
        &mut self,
        method: MethodDescriptor,
        payload_stream: impl Stream<Item = serde_json::Value> + Send + 'static,
        options: CallOptions,
    ) -> Result<Result<serde_json::Value, tonic::Status>, GrpcRequestError> {
        self.ready().await?;

        let codec = self.codec(&method);
        let path = http_path(&method);
        let request = build_request(payload_stream, options)?;

        match self.client.client_streaming(request, path, codec).await {
            Ok(response) => Ok(Ok(response.into_inner())),
            Err(status) => Ok(Err(status)),
        }
    }

    /// Performs a Bidirectional Streaming gRPC call (Stream of Requests -> Stream of Responses).
    ///
    /// # Returns
    ///
    /// * `Ok(Ok(Streaming))` - The server accepted the call and sent its headers.
    /// * `Ok(Err(Status))` - RPC executed, but server returned an error.
    /// * `Err(GrpcRequestError)` - Failed to send request or connect.
    pub async fn bidirectional_streaming(
        &mut self,
        method: MethodDescriptor,
        payload_stream: impl Stream<Item = serde_json::Value> + Send + 'static,
        options: CallOptions,
    ) -> Result<Result<Streaming<serde_json::Value>, tonic::Status>, GrpcRequestError> {
        self.ready().await?;

        let codec = self.codec(&method);
        let path = http_path(&method);
        let request = build_request(payload_stream, options)?;

        match self.client.streaming(request, path, codec).await {
            Ok(response) => Ok(Ok(response.into_inner())),
            Err(status) => Ok(Err(status)),
        }
    }

    async fn ready(&mut self) -> Result<(), GrpcRequestError> {
        self.client
            .ready()
            .await
            .map_err(|e| GrpcRequestError::ClientNotReady(e.into()))
    }

    fn codec(&self, method: &MethodDescriptor) -> JsonCodec {
        JsonCodec::new(method.input(), method.output(), self.load_options)
    }
}

fn http_path(method: &MethodDescriptor) -> http::uri::PathAndQuery {
    let path = format!("/{}/{}", method.parent_service().full_name(), method.name());
    // Service and method names are protobuf identifiers, which are always valid path segments.
    http::uri::PathAndQuery::from_str(&path)
        .unwrap_or_else(|_| http::uri::PathAndQuery::from_static("/"))
}

fn build_request<T>(
    payload: T,
    options: CallOptions,
) -> Result<tonic::Request<T>, GrpcRequestError> {
    let mut request = tonic::Request::new(payload);
    for (k, v) in options.headers {
        let key =
            MetadataKey::from_str(&k).map_err(|source| GrpcRequestError::InvalidMetadataKey {
                key: k.clone(),
                source,
            })?;
        let val = MetadataValue::from_str(&v)
            .map_err(|source| GrpcRequestError::InvalidMetadataValue { key: k, source })?;
        request.metadata_mut().insert(key, val);
    }
    if let Some(deadline) = options.deadline {
        request.set_timeout(deadline::remaining(deadline));
    }
    Ok(request)
}
