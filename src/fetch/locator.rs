//! Resource identifier resolution.
//!
//! Turns an opaque identifier from the dispatch table into a store root URL
//! and an object path inside that store. Three shapes are accepted:
//!
//! - long-form datastore URIs,
//!   `azureml://subscriptions/.../datastores/<name>/paths/<path>`, whose
//!   datastore name is looked up in the configured datastore map
//! - object-store URLs (`s3://`, `gs://`, `az://`, `abfss://`, `https://`, `file://`)
//! - bare filesystem paths

use super::FetchError;
use object_store::path::Path as ObjectPath;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use url::Url;

const LONG_FORM_SCHEME: &str = "azureml://";
const PATHS_MARKER: &str = "/paths/";
const DATASTORES_MARKER: &str = "/datastores/";

/// A resolved identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct Locator {
    /// Scheme and authority of the store, e.g. `s3://bucket` or `file:///`
    pub store_root: Url,
    /// Object path relative to the store root
    pub path: ObjectPath,
    /// Final path segment, used as the staged file name
    pub file_name: String,
}

impl Locator {
    /// Key under which the store client for this locator is cached.
    pub fn store_key(&self) -> &str {
        self.store_root.as_str()
    }
}

/// Split a long-form datastore URI into `(datastore_uri, file_path)`.
///
/// `datastore_uri` is everything before the `/paths/` marker and
/// `file_path` everything after it.
pub fn parse_long_uri(uri: &str) -> Result<(&str, &str), FetchError> {
    let idx = uri.find(PATHS_MARKER).ok_or_else(|| FetchError::MissingPathsSegment {
        uri: uri.to_string(),
    })?;
    Ok((&uri[..idx], &uri[idx + PATHS_MARKER.len()..]))
}

/// Extract the datastore name from the part of a long-form URI before `/paths/`.
fn datastore_name(datastore_uri: &str) -> Option<&str> {
    let idx = datastore_uri.rfind(DATASTORES_MARKER)?;
    let name = &datastore_uri[idx + DATASTORES_MARKER.len()..];
    if name.is_empty() || name.contains('/') {
        None
    } else {
        Some(name)
    }
}

/// Resolve an identifier into a [`Locator`].
pub fn resolve(uri: &str, datastores: &BTreeMap<String, String>) -> Result<Locator, FetchError> {
    let uri = uri.trim();
    if uri.is_empty() {
        return Err(FetchError::EmptyIdentifier);
    }

    if uri.starts_with(LONG_FORM_SCHEME) {
        let (datastore_uri, file_path) = parse_long_uri(uri)?;
        let name = datastore_name(datastore_uri).ok_or_else(|| FetchError::InvalidIdentifier {
            uri: uri.to_string(),
            reason: "no datastore name before '/paths/'".to_string(),
        })?;
        let base = datastores.get(name).ok_or_else(|| FetchError::UnknownDatastore {
            name: name.to_string(),
        })?;
        let mapped = format!("{}/{}", base.trim_end_matches('/'), file_path.trim_start_matches('/'));
        return resolve_url(&mapped, uri);
    }

    if uri.contains("://") {
        return resolve_url(uri, uri);
    }

    let absolute = std::path::absolute(Path::new(uri)).map_err(|e| FetchError::InvalidIdentifier {
        uri: uri.to_string(),
        reason: e.to_string(),
    })?;
    let url = Url::from_file_path(normalize(&absolute)).map_err(|_| FetchError::InvalidIdentifier {
        uri: uri.to_string(),
        reason: "not an absolute file path".to_string(),
    })?;
    split_url(&url, uri)
}

fn resolve_url(target: &str, original: &str) -> Result<Locator, FetchError> {
    let url = Url::parse(target).map_err(|e| FetchError::InvalidIdentifier {
        uri: original.to_string(),
        reason: e.to_string(),
    })?;
    split_url(&url, original)
}

fn split_url(url: &Url, original: &str) -> Result<Locator, FetchError> {
    let invalid = |reason: String| FetchError::InvalidIdentifier {
        uri: original.to_string(),
        reason,
    };

    let root = format!("{}://{}", url.scheme(), url.authority());
    let store_root = Url::parse(&root).map_err(|e| invalid(e.to_string()))?;
    let path = ObjectPath::from_url_path(url.path()).map_err(|e| invalid(e.to_string()))?;
    let file_name = path
        .filename()
        .map(|f| f.to_string())
        .ok_or_else(|| invalid("identifier has no file name".to_string()))?;

    Ok(Locator {
        store_root,
        path,
        file_name,
    })
}

/// Lexically drop `.` and resolve `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
