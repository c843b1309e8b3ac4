//! # Interface Descriptions
//!
//! Service stubs are built from binary `FileDescriptorSet`s. Decoding one is comparatively
//! expensive and the result never changes, so descriptions are loaded at most once per
//! `(root, path)` and shared by every client in the process through [`DescriptorCache`].
//!
//! A loaded description is then narrowed to the [`Namespace`] a service config points at:
//!
//! * [`DescriptorRef::Path`]: the whole description.
//! * [`DescriptorRef::Config`] with a recognized `api_version`: the `<service>.<version>`
//!   package.
//! * [`DescriptorRef::Config`] otherwise: the `<service>` package.
use crate::config::DescriptorRef;
use prost_reflect::{DescriptorError, DescriptorPool, ServiceDescriptor};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, LazyLock, Mutex, PoisonError},
};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Failed to read description '{0}': {1}")]
    Read(PathBuf, #[source] std::io::Error),
    #[error("Failed to decode description '{0}': {1}")]
    Decode(PathBuf, #[source] DescriptorError),
    #[error("Package '{package}' not found in description '{path}'")]
    PackageNotFound { package: String, path: PathBuf },
}

/// Options every description is loaded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    /// Expose JSON field names in lowerCamelCase instead of the proto names.
    pub convert_fields_to_camel_case: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            convert_fields_to_camel_case: true,
        }
    }
}

/// Turns a description file into a descriptor pool.
pub trait DescriptionLoader: Send + Sync {
    fn load(&self, root: &Path, file: &Path) -> Result<DescriptorPool, LoadError>;
}

/// Reads binary `FileDescriptorSet`s from disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileDescriptorSetLoader;

impl DescriptionLoader for FileDescriptorSetLoader {
    fn load(&self, root: &Path, file: &Path) -> Result<DescriptorPool, LoadError> {
        let path = root.join(file);
        let bytes = std::fs::read(&path).map_err(|e| LoadError::Read(path.clone(), e))?;
        DescriptorPool::decode(bytes.as_slice()).map_err(|e| LoadError::Decode(path, e))
    }
}

/// Loaded descriptions, keyed by `(root, path)`.
///
/// The lock is held for the duration of a load, so two callers never decode the same
/// description concurrently.
pub struct DescriptorCache {
    loader: Box<dyn DescriptionLoader>,
    options: LoadOptions,
    pools: Mutex<HashMap<(PathBuf, PathBuf), Arc<DescriptorPool>>>,
}

static GLOBAL_CACHE: LazyLock<Arc<DescriptorCache>> =
    LazyLock::new(|| Arc::new(DescriptorCache::new(FileDescriptorSetLoader)));

impl DescriptorCache {
    pub fn new(loader: impl DescriptionLoader + 'static) -> Self {
        Self {
            loader: Box::new(loader),
            options: LoadOptions::default(),
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// The process-wide cache backed by [`FileDescriptorSetLoader`].
    pub fn global() -> Arc<DescriptorCache> {
        GLOBAL_CACHE.clone()
    }

    pub fn options(&self) -> LoadOptions {
        self.options
    }

    /// Returns the pool for `root/file`, loading it on first use.
    pub fn pool(&self, root: &Path, file: &Path) -> Result<Arc<DescriptorPool>, LoadError> {
        let mut pools = self.pools.lock().unwrap_or_else(PoisonError::into_inner);
        let key = (root.to_path_buf(), file.to_path_buf());

        if let Some(pool) = pools.get(&key) {
            return Ok(pool.clone());
        }

        debug!(root = %root.display(), file = %file.display(), "loading interface description");
        let pool = Arc::new(self.loader.load(root, file)?);
        pools.insert(key, pool.clone());

        Ok(pool)
    }

    /// Loads the description behind `descriptor` and narrows it to its namespace.
    pub fn load(&self, root: &Path, descriptor: &DescriptorRef) -> Result<Namespace, LoadError> {
        let pool = self.pool(root, descriptor.path())?;

        let package = match descriptor {
            DescriptorRef::Path(_) => String::new(),
            DescriptorRef::Config(config) => match config.api_version.as_deref() {
                Some(version) if is_api_version(version) => {
                    format!("{}.{}", config.service, version)
                }
                Some(version) => {
                    warn!(
                        version,
                        service = %config.service,
                        "ignoring unrecognized api version"
                    );
                    config.service.clone()
                }
                None => config.service.clone(),
            },
        };

        if !package.is_empty() && !has_package(&pool, &package) {
            return Err(LoadError::PackageNotFound {
                package,
                path: descriptor.path().to_path_buf(),
            });
        }

        Ok(Namespace {
            pool,
            package,
            options: self.options,
        })
    }
}

/// `v1`, `v2beta1`, `v1p1alpha`, ...
fn is_api_version(version: &str) -> bool {
    version
        .strip_prefix('v')
        .is_some_and(|rest| {
            rest.starts_with(|c: char| c.is_ascii_digit())
                && rest.chars().all(|c| c.is_ascii_alphanumeric())
        })
}

fn has_package(pool: &DescriptorPool, package: &str) -> bool {
    let nested = format!("{package}.");
    pool.files().any(|file| {
        let name = file.package_name();
        name == package || name.starts_with(&nested)
    })
}

/// A loaded description narrowed to one package.
#[derive(Debug, Clone)]
pub struct Namespace {
    pool: Arc<DescriptorPool>,
    package: String,
    options: LoadOptions,
}

impl Namespace {
    pub fn pool(&self) -> &Arc<DescriptorPool> {
        &self.pool
    }

    /// The package this namespace is rooted at; empty for a whole description.
    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn options(&self) -> LoadOptions {
        self.options
    }

    /// Resolves a service by its name relative to this namespace.
    ///
    /// A whole-description namespace also accepts unqualified names when they are unambiguous.
    pub fn service(&self, name: &str) -> Option<ServiceDescriptor> {
        if !self.package.is_empty() {
            return self
                .pool
                .get_service_by_name(&format!("{}.{}", self.package, name));
        }

        if let Some(service) = self.pool.get_service_by_name(name) {
            return Some(service);
        }

        let mut matches = self.pool.services().filter(|s| s.name() == name);
        match (matches.next(), matches.next()) {
            (Some(service), None) => Some(service),
            _ => None,
        }
    }
}
