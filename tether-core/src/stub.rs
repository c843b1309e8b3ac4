//! # Service Stubs
//!
//! A stub is a [`GrpcClient`] bound to one service of a loaded description. Building one
//! needs resolved credentials, so stubs are created lazily on first use and then kept for
//! the lifetime of the client that created them.
//!
//! The transport a stub runs on comes from a [`StubFactory`]. The default
//! [`ChannelStubFactory`] opens a lazily-connecting `tonic` channel; tests plug in an
//! in-process server instead.
use crate::{
    auth::ChannelCredentials,
    config::ChannelOptions,
    descriptor::LoadOptions,
    grpc::client::GrpcClient,
};
use prost_reflect::{MethodDescriptor, ServiceDescriptor};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum StubError {
    #[error("Invalid base url '{url}': {source}")]
    InvalidUrl {
        url: String,
        source: tonic::transport::Error,
    },
    #[error("Failed to configure channel for '{url}': {source}")]
    Channel {
        url: String,
        source: tonic::transport::Error,
    },
}

/// Everything a stub is built from.
#[derive(Debug, Clone)]
pub struct StubTarget {
    /// The service-specific base url override, or the client's default.
    pub base_url: String,
    pub credentials: ChannelCredentials,
    /// The static channel overrides merged with the client's user agent.
    pub options: ChannelOptions,
}

/// Produces the transport a stub talks through.
pub trait StubFactory: Send + Sync + 'static {
    type Service: Clone + Send + Sync + 'static;

    fn create(&self, target: &StubTarget) -> Result<Self::Service, StubError>;
}

/// Builds lazily-connecting `tonic` channels.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelStubFactory;

impl StubFactory for ChannelStubFactory {
    type Service = Channel;

    fn create(&self, target: &StubTarget) -> Result<Channel, StubError> {
        let url = target.base_url.clone();
        let mut endpoint = Endpoint::from_shared(url.clone())
            .map_err(|source| StubError::InvalidUrl {
                url: url.clone(),
                source,
            })?
            .connect_timeout(Duration::from_millis(
                target.options.initial_reconnect_backoff_ms,
            ));

        if let Some(user_agent) = &target.options.primary_user_agent {
            endpoint = endpoint
                .user_agent(user_agent.clone())
                .map_err(|source| StubError::Channel {
                    url: url.clone(),
                    source,
                })?;
        }

        if let ChannelCredentials::Composite { tls, .. } = &target.credentials {
            endpoint = endpoint
                .tls_config(tls.clone())
                .map_err(|source| StubError::Channel { url, source })?;
        }

        Ok(endpoint.connect_lazy())
    }
}

/// A client bound to one service.
#[derive(Debug)]
pub struct ServiceStub<S = Channel> {
    client: GrpcClient<S>,
    service: ServiceDescriptor,
}

impl<S> ServiceStub<S> {
    pub fn new(client: GrpcClient<S>, service: ServiceDescriptor) -> Self {
        Self { client, service }
    }

    pub fn client(&self) -> &GrpcClient<S> {
        &self.client
    }

    pub fn service(&self) -> &ServiceDescriptor {
        &self.service
    }

    pub fn method(&self, name: &str) -> Option<MethodDescriptor> {
        self.service.methods().find(|m| m.name() == name)
    }
}

/// Stubs of one client, keyed by logical service name. Entries are never evicted.
pub(crate) struct StubCache<S> {
    stubs: Mutex<HashMap<String, Arc<ServiceStub<S>>>>,
}

impl<S> StubCache<S> {
    pub(crate) fn new() -> Self {
        Self {
            stubs: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached stub for `name`, building it with `create` on first use.
    pub(crate) async fn get_or_try_insert<E>(
        &self,
        name: &str,
        create: impl FnOnce() -> Result<ServiceStub<S>, E>,
    ) -> Result<Arc<ServiceStub<S>>, E> {
        let mut stubs = self.stubs.lock().await;

        if let Some(stub) = stubs.get(name) {
            return Ok(stub.clone());
        }

        debug!(service = name, "creating service stub");
        let stub = Arc::new(create()?);
        stubs.insert(name.to_string(), stub.clone());

        Ok(stub)
    }
}

/// Builds the stub for `service` on top of a freshly created transport.
pub(crate) fn build<F: StubFactory>(
    factory: &F,
    target: &StubTarget,
    service: ServiceDescriptor,
    load_options: LoadOptions,
) -> Result<ServiceStub<F::Service>, StubError>
where
    F::Service: tonic::client::GrpcService<tonic::body::Body>,
    <F::Service as tonic::client::GrpcService<tonic::body::Body>>::Error: Into<crate::BoxError>,
    <F::Service as tonic::client::GrpcService<tonic::body::Body>>::ResponseBody:
        http_body::Body<Data = tonic::codegen::Bytes> + Send + 'static,
    <<F::Service as tonic::client::GrpcService<tonic::body::Body>>::ResponseBody as http_body::Body>::Error:
        Into<crate::BoxError> + Send,
{
    let transport = factory.create(target)?;
    let client = GrpcClient::new(transport, &target.options, load_options);
    Ok(ServiceStub::new(client, service))
}
