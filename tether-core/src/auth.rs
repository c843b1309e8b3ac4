//! # Credentials
//!
//! Transport credentials are resolved lazily, once per client:
//!
//! 1. An [`AuthClient`] hands out an [`AuthorizedClient`] able to mint bearer tokens.
//! 2. That client is combined with TLS channel credentials into
//!    [`ChannelCredentials::Composite`], which every later call reuses.
//! 3. If the authorized client knows the project id and the resolver does not have a real one
//!    yet, the project id is adopted.
//!
//! Clients configured for a custom endpoint skip all of this and use
//! [`ChannelCredentials::Insecure`].
use crate::BoxError;
use std::{fmt, sync::Arc};
use tokio::sync::{OnceCell, RwLock};
use tonic::transport::ClientTlsConfig;
use tracing::debug;

/// Placeholder project id, substituted once real credentials are known.
pub const PROJECT_ID_TOKEN: &str = "{{projectId}}";

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Failed to obtain an authorized client: {0}")]
    Client(#[source] BoxError),
    #[error("Failed to obtain an access token: {0}")]
    Token(#[source] BoxError),
}

/// Obtains authorized clients, typically from the environment.
#[tonic::async_trait]
pub trait AuthClient: Send + Sync {
    async fn get_client(&self) -> Result<Arc<dyn AuthorizedClient>, AuthError>;
}

/// A client able to authorize calls with bearer tokens.
#[tonic::async_trait]
pub trait AuthorizedClient: Send + Sync + fmt::Debug {
    /// The project the credentials belong to, if they know it.
    fn project_id(&self) -> Option<&str>;

    async fn access_token(&self) -> Result<String, AuthError>;
}

/// Credentials attached to channels and calls.
#[derive(Clone, Debug)]
pub enum ChannelCredentials {
    /// Plaintext channel, no call credentials.
    Insecure,
    /// TLS channel combined with per-call bearer tokens.
    Composite {
        tls: ClientTlsConfig,
        call: Arc<dyn AuthorizedClient>,
    },
}

impl ChannelCredentials {
    pub fn composite(call: Arc<dyn AuthorizedClient>) -> Self {
        ChannelCredentials::Composite {
            tls: ClientTlsConfig::new().with_native_roots(),
            call,
        }
    }

    /// The `authorization` header for a single call, if these credentials carry one.
    pub async fn authorization(&self) -> Result<Option<(String, String)>, AuthError> {
        match self {
            ChannelCredentials::Insecure => Ok(None),
            ChannelCredentials::Composite { call, .. } => {
                let token = call.access_token().await?;
                Ok(Some(("authorization".to_string(), format!("Bearer {token}"))))
            }
        }
    }
}

/// Resolves and memoizes channel credentials and the project id.
pub(crate) struct CredentialResolver {
    auth: Arc<dyn AuthClient>,
    credentials: OnceCell<ChannelCredentials>,
    project_id: RwLock<Option<String>>,
}

impl CredentialResolver {
    pub(crate) fn new(auth: Arc<dyn AuthClient>, project_id: Option<String>) -> Self {
        Self {
            auth,
            credentials: OnceCell::new(),
            project_id: RwLock::new(project_id),
        }
    }

    /// A resolver that never fetches: the channel is plaintext.
    pub(crate) fn insecure(auth: Arc<dyn AuthClient>, project_id: Option<String>) -> Self {
        Self {
            auth,
            credentials: OnceCell::new_with(Some(ChannelCredentials::Insecure)),
            project_id: RwLock::new(project_id),
        }
    }

    /// Returns the cached credentials, fetching them on first use.
    ///
    /// Concurrent first callers share one fetch. A failed fetch leaves nothing cached.
    pub(crate) async fn resolve(&self) -> Result<ChannelCredentials, AuthError> {
        self.credentials
            .get_or_try_init(|| async {
                debug!("resolving channel credentials");
                let client = self.auth.get_client().await?;

                if let Some(project_id) = client.project_id() {
                    self.adopt_project_id(project_id).await;
                }

                Ok::<_, AuthError>(ChannelCredentials::composite(client))
            })
            .await
            .cloned()
    }

    pub(crate) async fn project_id(&self) -> Option<String> {
        self.project_id.read().await.clone()
    }

    async fn adopt_project_id(&self, project_id: &str) {
        let mut current = self.project_id.write().await;
        let is_placeholder = current
            .as_deref()
            .is_none_or(|current| current == PROJECT_ID_TOKEN);

        if is_placeholder {
            debug!(project_id, "adopting project id from credentials");
            *current = Some(project_id.to_string());
        }
    }
}

/// Credentials handed over up front, e.g. from the environment.
#[derive(Clone, Default)]
pub struct StaticAuth {
    token: Option<String>,
    project_id: Option<String>,
}

impl StaticAuth {
    pub fn new(token: Option<String>, project_id: Option<String>) -> Self {
        Self { token, project_id }
    }
}

impl fmt::Debug for StaticAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticAuth")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("project_id", &self.project_id)
            .finish()
    }
}

#[tonic::async_trait]
impl AuthClient for StaticAuth {
    async fn get_client(&self) -> Result<Arc<dyn AuthorizedClient>, AuthError> {
        if self.token.is_none() {
            return Err(AuthError::Client("no access token configured".into()));
        }
        Ok(Arc::new(self.clone()))
    }
}

#[tonic::async_trait]
impl AuthorizedClient for StaticAuth {
    fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }

    async fn access_token(&self) -> Result<String, AuthError> {
        self.token
            .clone()
            .ok_or_else(|| AuthError::Token("no access token configured".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingAuth {
        calls: AtomicUsize,
        fail: bool,
        project_id: Option<&'static str>,
    }

    impl CountingAuth {
        fn new(project_id: Option<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: false,
                project_id,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: true,
                project_id: Some("never-used"),
            })
        }
    }

    #[tonic::async_trait]
    impl AuthClient for CountingAuth {
        async fn get_client(&self) -> Result<Arc<dyn AuthorizedClient>, AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(AuthError::Client("metadata server unreachable".into()));
            }
            Ok(Arc::new(StaticAuth::new(
                Some("token".into()),
                self.project_id.map(String::from),
            )))
        }
    }

    #[tokio::test]
    async fn credentials_are_fetched_once() {
        let auth = CountingAuth::new(Some("real-project"));
        let resolver = CredentialResolver::new(auth.clone(), None);

        resolver.resolve().await.unwrap();
        resolver.resolve().await.unwrap();

        assert_eq!(auth.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_first_calls_share_one_fetch() {
        let auth = CountingAuth::new(None);
        let resolver = CredentialResolver::new(auth.clone(), None);

        let (a, b) = tokio::join!(resolver.resolve(), resolver.resolve());

        assert!(a.is_ok() && b.is_ok());
        assert_eq!(auth.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn placeholder_project_id_is_replaced() {
        let resolver = CredentialResolver::new(
            CountingAuth::new(Some("real-project")),
            Some(PROJECT_ID_TOKEN.to_string()),
        );

        resolver.resolve().await.unwrap();

        assert_eq!(resolver.project_id().await.as_deref(), Some("real-project"));
    }

    #[tokio::test]
    async fn real_project_id_is_kept() {
        let resolver = CredentialResolver::new(
            CountingAuth::new(Some("from-credentials")),
            Some("configured".to_string()),
        );

        resolver.resolve().await.unwrap();

        assert_eq!(resolver.project_id().await.as_deref(), Some("configured"));
    }

    #[tokio::test]
    async fn absent_project_id_never_overwrites() {
        let resolver = CredentialResolver::new(CountingAuth::new(None), None);

        resolver.resolve().await.unwrap();

        assert_eq!(resolver.project_id().await, None);
    }

    #[tokio::test]
    async fn failed_fetch_caches_nothing() {
        let auth = CountingAuth::failing();
        let resolver =
            CredentialResolver::new(auth.clone(), Some(PROJECT_ID_TOKEN.to_string()));

        assert!(matches!(resolver.resolve().await, Err(AuthError::Client(_))));
        assert!(resolver.resolve().await.is_err());

        assert_eq!(auth.calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            resolver.project_id().await.as_deref(),
            Some(PROJECT_ID_TOKEN)
        );
    }

    #[tokio::test]
    async fn insecure_resolver_never_fetches() {
        let auth = CountingAuth::new(Some("p"));
        let resolver = CredentialResolver::insecure(auth.clone(), None);

        let credentials = resolver.resolve().await.unwrap();

        assert!(matches!(credentials, ChannelCredentials::Insecure));
        assert_eq!(auth.calls.load(Ordering::SeqCst), 0);
        assert_eq!(credentials.authorization().await.unwrap(), None);
    }

    #[tokio::test]
    async fn composite_credentials_carry_a_bearer_token() {
        let credentials =
            ChannelCredentials::composite(Arc::new(StaticAuth::new(Some("abc".into()), None)));

        assert_eq!(
            credentials.authorization().await.unwrap(),
            Some(("authorization".to_string(), "Bearer abc".to_string()))
        );
    }
}
