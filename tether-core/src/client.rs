//! # Tether Client
//!
//! This module implements the request dispatcher: the component application code talks to.
//!
//! Every call goes through the same phases, strictly in this order:
//!
//! 1. **Credentials**: resolved once per client and reused by every later call.
//! 2. **Stub**: the service stub is created on first use and cached per service name.
//! 3. **Decoration**: control fields are stripped from a copy of the payload and project id
//!    placeholders are substituted.
//! 4. **Dispatch**: the call is performed under the retry policy, and transport statuses are
//!    decorated with their HTTP-like codes.
//!
//! The dispatcher comes in three shapes:
//!
//! * [`TetherClient::request`]: a single response, returned as a `Result`.
//! * [`TetherClient::request_stream`]: a server stream of [`StreamEvent`]s.
//! * [`TetherClient::request_writable_stream`]: a duplex stream, made of a [`RequestSink`]
//!   and a [`ResponseStream`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use tether_core::{auth::StaticAuth, client::{CallSpec, TetherClient}, config::ServiceConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ServiceConfig::from_file("tether.json")?;
//! let client = TetherClient::builder(config)
//!     .auth(StaticAuth::new(Some("token".into()), Some("my-project".into())))
//!     .build()?;
//!
//! let spec = CallSpec::new("EchoService", "UnaryEcho");
//! let response = client.request(&spec, serde_json::json!({ "message": "hi" })).await?;
//! # Ok(())
//! # }
//! ```
mod duplex;
mod streaming;
mod types;
mod unary;

pub use types::*;

use crate::{
    BoxError,
    auth::{AuthClient, CredentialResolver, StaticAuth},
    config::ServiceConfig,
    deadline,
    descriptor::{DescriptorCache, LoadError, Namespace},
    grpc::client::CallOptions,
    request::{self, DecoratedRequest},
    retry::{Backoff, Reply, RetryConfig},
    status::{self, ResponseStatus},
    stub::{self, ChannelStubFactory, ServiceStub, StubCache, StubFactory, StubTarget},
};
use http_body::Body as HttpBody;
use prost_reflect::MethodDescriptor;
use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, PoisonError, RwLock},
};
use tonic::client::GrpcService;
use tracing::debug;

/// Whether calls are performed at all.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    #[default]
    Live,
    /// A restricted runtime: nothing is loaded and every call returns
    /// [`CallError::Sandboxed`] with this marker.
    Sandbox(String),
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// May be the `{{projectId}}` placeholder, replaced once credentials resolve.
    pub project_id: Option<String>,
    pub max_retries: u32,
    pub mode: ExecutionMode,
    pub backoff: Backoff,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            project_id: None,
            max_retries: 3,
            mode: ExecutionMode::Live,
            backoff: Backoff::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientInitError {
    #[error("Failed to load the description of service '{service}': {source}")]
    Load { service: String, source: LoadError },
}

/// Configures and builds a [`TetherClient`].
pub struct ClientBuilder<F = ChannelStubFactory> {
    config: ServiceConfig,
    options: ClientOptions,
    auth: Arc<dyn AuthClient>,
    cache: Option<Arc<DescriptorCache>>,
    factory: F,
}

impl<F: StubFactory> ClientBuilder<F> {
    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    pub fn auth(mut self, auth: impl AuthClient + 'static) -> Self {
        self.auth = Arc::new(auth);
        self
    }

    /// Uses `cache` instead of the process-wide description cache.
    pub fn descriptor_cache(mut self, cache: Arc<DescriptorCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn stub_factory<G: StubFactory>(self, factory: G) -> ClientBuilder<G> {
        ClientBuilder {
            config: self.config,
            options: self.options,
            auth: self.auth,
            cache: self.cache,
            factory,
        }
    }

    /// Loads the description of every configured service and builds the client.
    ///
    /// A sandboxed client loads nothing.
    pub fn build(self) -> Result<TetherClient<F>, ClientInitError> {
        let ClientBuilder {
            config,
            options,
            auth,
            cache,
            factory,
        } = self;

        let namespaces = match options.mode {
            ExecutionMode::Sandbox(_) => HashMap::new(),
            ExecutionMode::Live => {
                let cache = cache.unwrap_or_else(DescriptorCache::global);
                config
                    .proto_services
                    .iter()
                    .map(|(service, descriptor)| {
                        cache
                            .load(&config.protos_dir, descriptor)
                            .map(|namespace| (service.clone(), namespace))
                            .map_err(|source| ClientInitError::Load {
                                service: service.clone(),
                                source,
                            })
                    })
                    .collect::<Result<_, _>>()?
            }
        };

        let credentials = if config.custom_endpoint {
            CredentialResolver::insecure(auth, options.project_id)
        } else {
            CredentialResolver::new(auth, options.project_id)
        };

        let user_agent = config.package.user_agent();
        let client_info = format!(
            "tether/{} {} tonic/0.14",
            env!("CARGO_PKG_VERSION"),
            user_agent
        );

        Ok(TetherClient {
            inner: Arc::new(Inner {
                metadata: RwLock::new(BTreeMap::from([(
                    "x-client-info".to_string(),
                    client_info,
                )])),
                mode: options.mode,
                max_retries: options.max_retries,
                backoff: options.backoff,
                user_agent,
                namespaces,
                credentials,
                stubs: StubCache::new(),
                factory,
                config,
            }),
        })
    }
}

/// The request dispatcher.
///
/// Cloning is cheap; clones share credentials, metadata and stubs.
pub struct TetherClient<F: StubFactory = ChannelStubFactory> {
    inner: Arc<Inner<F>>,
}

impl<F: StubFactory> Clone for TetherClient<F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct Inner<F: StubFactory> {
    config: ServiceConfig,
    mode: ExecutionMode,
    max_retries: u32,
    backoff: Backoff,
    user_agent: String,
    credentials: CredentialResolver,
    metadata: RwLock<BTreeMap<String, String>>,
    namespaces: HashMap<String, Namespace>,
    factory: F,
    stubs: StubCache<F::Service>,
}

impl TetherClient {
    pub fn builder(config: ServiceConfig) -> ClientBuilder {
        ClientBuilder {
            config,
            options: ClientOptions::default(),
            auth: Arc::new(StaticAuth::default()),
            cache: None,
            factory: ChannelStubFactory,
        }
    }
}

impl<F: StubFactory> TetherClient<F> {
    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    pub fn mode(&self) -> &ExecutionMode {
        &self.inner.mode
    }

    /// The loaded namespace of a configured service.
    pub fn namespace(&self, service: &str) -> Option<&Namespace> {
        self.inner.namespaces.get(service)
    }

    /// Adds (or replaces) a header sent with every call.
    pub fn insert_metadata(&self, key: impl Into<String>, value: impl Into<String>) {
        self.inner
            .metadata
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value.into());
    }

    pub fn metadata(&self) -> Vec<(String, String)> {
        self.inner
            .metadata
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// The project id as currently known; may still be the placeholder.
    pub async fn project_id(&self) -> Option<String> {
        self.inner.credentials.project_id().await
    }

    fn ensure_live(&self) -> Result<(), CallError> {
        match &self.inner.mode {
            ExecutionMode::Live => Ok(()),
            ExecutionMode::Sandbox(marker) => Err(CallError::Sandboxed(marker.clone())),
        }
    }

    fn retry_config(&self, object_mode: bool) -> RetryConfig {
        RetryConfig {
            retries: self.inner.max_retries,
            current_retry_attempt: 0,
            object_mode,
            should_retry_fn: status::should_retry,
            backoff: self.inner.backoff,
        }
    }
}

/// A call that went through credentials, stub and decoration, ready to be dispatched.
struct PreparedCall<S> {
    stub: Arc<ServiceStub<S>>,
    method: MethodDescriptor,
    request: DecoratedRequest,
    options: CallOptions,
}

impl<S> PreparedCall<S> {
    fn observe(&self, spec: &CallSpec, attempt: u32) -> ObservedRequest {
        ObservedRequest {
            service: spec.service.clone(),
            method: spec.method.clone(),
            attempt,
            payload: self.request.payload.clone(),
            metadata: self
                .options
                .headers
                .iter()
                .filter(|(k, _)| k != "authorization")
                .cloned()
                .collect(),
        }
    }
}

impl<F, S> TetherClient<F>
where
    F: StubFactory<Service = S>,
    S: GrpcService<tonic::body::Body> + Clone + Send + Sync + 'static,
    S::Error: Into<BoxError> + Send,
    S::Future: Send,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    /// Returns the stub for `service`, creating it on first use.
    pub async fn stub(&self, service: &str) -> Result<Arc<ServiceStub<S>>, CallError> {
        self.ensure_live()?;
        let credentials = self.inner.credentials.resolve().await?;

        self.inner
            .stubs
            .get_or_try_insert(service, || {
                let namespace = self
                    .inner
                    .namespaces
                    .get(service)
                    .ok_or_else(|| CallError::ServiceNotFound(service.to_string()))?;
                let descriptor = namespace
                    .service(service)
                    .ok_or_else(|| CallError::ServiceNotFound(service.to_string()))?;

                let target = StubTarget {
                    base_url: self.inner.config.base_url_for(service).to_string(),
                    credentials,
                    options: self
                        .inner
                        .config
                        .grpc_options
                        .with_user_agent(self.inner.user_agent.clone()),
                };

                Ok(stub::build(
                    &self.inner.factory,
                    &target,
                    descriptor,
                    namespace.options(),
                )?)
            })
            .await
    }

    async fn prepare(
        &self,
        spec: &CallSpec,
        payload: &serde_json::Value,
    ) -> Result<PreparedCall<S>, CallError> {
        let credentials = self.inner.credentials.resolve().await?;
        let stub = self.stub(&spec.service).await?;
        let method = stub
            .method(&spec.method)
            .ok_or_else(|| CallError::MethodNotFound {
                service: spec.service.clone(),
                method: spec.method.clone(),
            })?;

        let project_id = self.inner.credentials.project_id().await;
        let request = request::decorate(payload, project_id.as_deref())?;

        let deadline = spec.timeout.map(deadline::deadline);
        let mut headers = self.metadata();
        if let Some(authorization) = credentials.authorization().await? {
            headers.push(authorization);
        }

        debug!(
            service = %spec.service,
            method = %spec.method,
            timeout_ms = spec.timeout.map(|t| t.as_millis() as u64),
            "dispatching call"
        );

        Ok(PreparedCall {
            stub,
            method,
            request,
            options: CallOptions { headers, deadline },
        })
    }
}

/// The caller-facing error for a failed transport status.
fn status_error(status: tonic::Status) -> CallError {
    match status::decorate(&status) {
        Some(decorated) => CallError::Status(decorated),
        None => CallError::Transport(status),
    }
}

/// Folds a transport status into the retry loop: decorated statuses become replies, the
/// rest stay errors.
fn status_reply<T>(status: tonic::Status) -> Result<Reply<T>, CallError> {
    match status::decorate(&status) {
        Some(decorated) => Ok(Reply::Status(decorated)),
        None => Err(CallError::Transport(status)),
    }
}

fn closing_status(result: Result<(), tonic::Status>) -> StreamEvent {
    match result {
        Ok(()) => StreamEvent::Response(ResponseStatus::ok()),
        Err(status) => StreamEvent::Error(status_error(status)),
    }
}
