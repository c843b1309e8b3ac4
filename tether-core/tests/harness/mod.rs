use crate::echo_service_impl::EchoServiceImpl;
use echo_service::{EchoServiceServer, FILE_DESCRIPTOR_SET};
use std::{
    path::Path,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tether_core::{
    auth::StaticAuth,
    client::{ClientOptions, TetherClient},
    config::ServiceConfig,
    descriptor::{DescriptionLoader, DescriptorCache, LoadError},
    prost_reflect::DescriptorPool,
    retry::Backoff,
    stub::{StubError, StubFactory, StubTarget},
};

pub const CONFIG: &str = r#"{
    "protosDir": "/protos",
    "baseUrl": "https://echo.example.com",
    "package": { "name": "echo-app", "version": "2.0.0" },
    "protoServices": {
        "EchoService": { "path": "echo.bin", "service": "echo", "apiVersion": "v1" }
    }
}"#;

/// Serves the embedded echo description, counting loads.
#[derive(Clone, Default)]
pub struct EmbeddedLoader {
    pub loads: Arc<AtomicUsize>,
}

impl DescriptionLoader for EmbeddedLoader {
    fn load(&self, _root: &Path, _file: &Path) -> Result<DescriptorPool, LoadError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(DescriptorPool::decode(FILE_DESCRIPTOR_SET).expect("embedded descriptor set"))
    }
}

/// Hands out the in-process echo server as every stub's transport.
#[derive(Clone)]
pub struct InProcessFactory {
    pub service: EchoServiceImpl,
    pub targets: Arc<Mutex<Vec<StubTarget>>>,
}

impl InProcessFactory {
    pub fn new(service: EchoServiceImpl) -> Self {
        Self {
            service,
            targets: Arc::default(),
        }
    }

    pub fn created(&self) -> usize {
        self.targets.lock().unwrap().len()
    }
}

impl StubFactory for InProcessFactory {
    type Service = EchoServiceServer<EchoServiceImpl>;

    fn create(&self, target: &StubTarget) -> Result<Self::Service, StubError> {
        self.targets.lock().unwrap().push(target.clone());
        Ok(EchoServiceServer::new(self.service.clone()))
    }
}

pub fn fast_options(max_retries: u32) -> ClientOptions {
    ClientOptions {
        project_id: Some("test-project".to_string()),
        max_retries,
        backoff: Backoff {
            base: Duration::from_millis(10),
            max: Duration::from_millis(100),
        },
        ..Default::default()
    }
}

pub fn setup_client(
    options: ClientOptions,
) -> (TetherClient<InProcessFactory>, InProcessFactory, EmbeddedLoader) {
    let service = EchoServiceImpl::default();
    let factory = InProcessFactory::new(service);
    let loader = EmbeddedLoader::default();

    let client = TetherClient::builder(ServiceConfig::from_json(CONFIG).unwrap())
        .options(options)
        .auth(StaticAuth::new(
            Some("test-token".to_string()),
            Some("creds-project".to_string()),
        ))
        .descriptor_cache(Arc::new(DescriptorCache::new(loader.clone())))
        .stub_factory(factory.clone())
        .build()
        .expect("client builds");

    (client, factory, loader)
}
