//! Worker-lifetime cache of object store clients.
//!
//! One client per store root is built on first use and reused for every
//! later unit the worker processes. The registry is owned by the worker and
//! emptied when the worker shuts down.
//!
//! Remote clients are built with retries disabled: a failed request surfaces
//! as a fetch error on the first attempt.

use super::locator::Locator;
use super::FetchError;
use object_store::aws::{AmazonS3Builder, AmazonS3ConfigKey};
use object_store::azure::{AzureConfigKey, MicrosoftAzureBuilder};
use object_store::gcp::{GoogleCloudStorageBuilder, GoogleConfigKey};
use object_store::http::HttpBuilder;
use object_store::{ClientConfigKey, ObjectStore, ObjectStoreScheme, RetryConfig};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::Arc;
use url::Url;

/// Retry policy for every remote client: a single attempt.
fn single_attempt() -> RetryConfig {
    RetryConfig {
        max_retries: 0,
        ..RetryConfig::default()
    }
}

/// Apply every option whose key `B` understands; the rest are meant for
/// other store kinds.
fn apply_options<B, K>(
    builder: B,
    options: &BTreeMap<String, String>,
    with_config: impl Fn(B, K, &str) -> B,
) -> B
where
    K: FromStr,
{
    options.iter().fold(builder, |builder, (key, value)| match key.parse::<K>() {
        Ok(key) => with_config(builder, key, value.as_str()),
        Err(_) => builder,
    })
}

pub struct StoreRegistry {
    stores: HashMap<String, Arc<dyn ObjectStore>>,
    options: BTreeMap<String, String>,
}

impl StoreRegistry {
    /// Create an empty registry. `options` are passed to every store
    /// builder (e.g. `aws_region`, `azure_storage_account_name`).
    pub fn new(options: BTreeMap<String, String>) -> Self {
        StoreRegistry {
            stores: HashMap::new(),
            options,
        }
    }

    /// Return the cached client for the locator's store, building it on first use.
    pub fn get_or_create(&mut self, locator: &Locator) -> Result<Arc<dyn ObjectStore>, FetchError> {
        if let Some(store) = self.stores.get(locator.store_key()) {
            return Ok(Arc::clone(store));
        }

        let store = self.build(&locator.store_root)?;

        tracing::debug!(store = %locator.store_root, "created object store client");
        self.stores.insert(locator.store_key().to_string(), Arc::clone(&store));
        Ok(store)
    }

    fn build(&self, root: &Url) -> Result<Arc<dyn ObjectStore>, FetchError> {
        let store_err = |source: object_store::Error| FetchError::Store {
            root: root.to_string(),
            source,
        };
        let (scheme, _) = ObjectStoreScheme::parse(root).map_err(|e| store_err(e.into()))?;
        let options = &self.options;

        let store: Arc<dyn ObjectStore> = match scheme {
            ObjectStoreScheme::AmazonS3 => {
                let builder = AmazonS3Builder::new().with_url(root.as_str());
                let builder = apply_options(builder, options, |b, k: AmazonS3ConfigKey, v| b.with_config(k, v));
                Arc::new(builder.with_retry(single_attempt()).build().map_err(store_err)?)
            }
            ObjectStoreScheme::MicrosoftAzure => {
                let builder = MicrosoftAzureBuilder::new().with_url(root.as_str());
                let builder = apply_options(builder, options, |b, k: AzureConfigKey, v| b.with_config(k, v));
                Arc::new(builder.with_retry(single_attempt()).build().map_err(store_err)?)
            }
            ObjectStoreScheme::GoogleCloudStorage => {
                let builder = GoogleCloudStorageBuilder::new().with_url(root.as_str());
                let builder = apply_options(builder, options, |b, k: GoogleConfigKey, v| b.with_config(k, v));
                Arc::new(builder.with_retry(single_attempt()).build().map_err(store_err)?)
            }
            ObjectStoreScheme::Http => {
                let builder = HttpBuilder::new().with_url(root.as_str());
                let builder = apply_options(builder, options, |b, k: ClientConfigKey, v| b.with_config(k, v));
                Arc::new(builder.with_retry(single_attempt()).build().map_err(store_err)?)
            }
            // Local and in-memory stores never retry.
            _ => {
                let (store, _) = object_store::parse_url_opts(root, options.iter()).map_err(store_err)?;
                Arc::from(store)
            }
        };

        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    /// Drop every cached client.
    pub fn clear(&mut self) {
        self.stores.clear();
    }
}
