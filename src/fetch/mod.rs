//! Fetch step: resolve identifiers and download them into a staging area.
//!
//! Downloads are streamed to disk and bounded by the fetch timeout. A fetch
//! is never retried here; retry policy belongs to whatever re-runs the unit.
//! Re-fetching the same identifier truncates and rewrites the staged file,
//! so staged content is always a byte copy of the remote object.

pub mod locator;
pub mod registry;

use futures::StreamExt;
use object_store::ObjectStoreExt;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

use locator::Locator;
use registry::StoreRegistry;

/// Errors raised while fetching a single resource.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("empty resource identifier")]
    EmptyIdentifier,
    #[error("invalid identifier '{uri}': {reason}")]
    InvalidIdentifier { uri: String, reason: String },
    #[error("identifier '{uri}' is missing the '/paths/' segment")]
    MissingPathsSegment { uri: String },
    #[error("datastore '{name}' has no configured location")]
    UnknownDatastore { name: String },
    #[error("cannot open store {root}: {source}")]
    Store {
        root: String,
        #[source]
        source: object_store::Error,
    },
    #[error("no object found at '{uri}'")]
    NotFound { uri: String },
    #[error("failed to read '{uri}': {source}")]
    Remote {
        uri: String,
        #[source]
        source: object_store::Error,
    },
    #[error("failed to write staged file {}: {source}", path.display())]
    Stage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("fetch of '{uri}' timed out after {timeout_ms}ms")]
    Timeout { uri: String, timeout_ms: u64 },
}

/// Downloads resources using a worker-owned [`StoreRegistry`].
pub struct Fetcher {
    registry: StoreRegistry,
    datastores: BTreeMap<String, String>,
    timeout: Duration,
}

impl Fetcher {
    pub fn new(
        datastores: BTreeMap<String, String>,
        store_options: BTreeMap<String, String>,
        timeout: Duration,
    ) -> Self {
        Fetcher {
            registry: StoreRegistry::new(store_options),
            datastores,
            timeout,
        }
    }

    /// Fetch `uri` into `dest_dir` and return the local file path.
    pub async fn fetch(&mut self, uri: &str, dest_dir: &Path) -> Result<PathBuf, FetchError> {
        let locator = locator::resolve(uri, &self.datastores)?;
        let store = self.registry.get_or_create(&locator)?;

        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|source| FetchError::Stage {
                path: dest_dir.to_path_buf(),
                source,
            })?;
        let dest = dest_dir.join(&locator.file_name);

        tracing::info!(uri = %uri, dest = %dest.display(), "downloading");

        match tokio::time::timeout(self.timeout, download(store.as_ref(), &locator, uri, &dest)).await {
            Ok(result) => result.map(|bytes| {
                tracing::debug!(uri = %uri, bytes, "download complete");
                dest
            }),
            Err(_) => Err(FetchError::Timeout {
                uri: uri.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }

    /// Number of store clients currently cached.
    pub fn cached_stores(&self) -> usize {
        self.registry.len()
    }

    /// Release every cached store client.
    pub fn release(&mut self) {
        self.registry.clear();
    }
}

async fn download(
    store: &dyn object_store::ObjectStore,
    locator: &Locator,
    uri: &str,
    dest: &Path,
) -> Result<u64, FetchError> {
    let result = store.get(&locator.path).await.map_err(|source| match source {
        object_store::Error::NotFound { .. } => FetchError::NotFound { uri: uri.to_string() },
        source => FetchError::Remote {
            uri: uri.to_string(),
            source,
        },
    })?;

    let stage_err = |source| FetchError::Stage {
        path: dest.to_path_buf(),
        source,
    };

    let mut file = tokio::fs::File::create(dest).await.map_err(stage_err)?;
    let mut stream = result.into_stream();
    let mut written = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|source| FetchError::Remote {
            uri: uri.to_string(),
            source,
        })?;
        file.write_all(&chunk).await.map_err(stage_err)?;
        written += chunk.len() as u64;
    }

    file.flush().await.map_err(stage_err)?;
    Ok(written)
}
