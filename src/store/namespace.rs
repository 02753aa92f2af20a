use std::collections::HashMap;

use config::ConfigError;

use super::DssAction;
use super::DynamicStatusStore;
use crate::DssResult;
use crate::Error;
use crate::Result;
use crate::WatchHandle;
use crate::WatchId;

/// Leading segment of every namespaced key
pub const NAMESPACE_ROOT: &str = "dss";

/// Namespaces are non-empty lowercase ASCII alphanumerics, e.g. `framework`
pub fn is_valid_namespace(namespace: &str) -> bool {
    !namespace.is_empty()
        && namespace
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}

/// View of a [`DynamicStatusStore`] restricted to `dss.<namespace>.`.
///
/// Keys are qualified on the way in and the prefix is stripped from keys on
/// the way out. Watch events report fully qualified keys.
#[derive(Debug, Clone)]
pub struct ScopedStatusStore {
    store: DynamicStatusStore,
    namespace: String,
    prefix: String,
}

impl DynamicStatusStore {
    /// Namespaced view sharing this store's connection
    pub fn scoped(
        &self,
        namespace: &str,
    ) -> Result<ScopedStatusStore> {
        ScopedStatusStore::new(self.clone(), namespace)
    }
}

impl ScopedStatusStore {
    pub fn new(
        store: DynamicStatusStore,
        namespace: &str,
    ) -> Result<Self> {
        if !is_valid_namespace(namespace) {
            return Err(Error::Config(ConfigError::Message(format!(
                "invalid status store namespace {namespace:?}"
            ))));
        }

        Ok(Self {
            store,
            namespace: namespace.to_string(),
            prefix: format!("{NAMESPACE_ROOT}.{namespace}."),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// `dss.<namespace>.`
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Underlying unscoped store
    pub fn store(&self) -> &DynamicStatusStore {
        &self.store
    }

    fn qualify(
        &self,
        key: &str,
    ) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn qualify_all(
        &self,
        entries: &HashMap<String, String>,
    ) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (self.qualify(k), v.clone()))
            .collect()
    }

    pub async fn put(
        &self,
        key: &str,
        value: &str,
    ) -> DssResult<()> {
        self.store.put(&self.qualify(key), value).await
    }

    pub async fn put_all(
        &self,
        entries: &HashMap<String, String>,
    ) -> DssResult<()> {
        self.store.put_all(&self.qualify_all(entries)).await
    }

    pub async fn get(
        &self,
        key: &str,
    ) -> DssResult<Option<String>> {
        self.store.get(&self.qualify(key)).await
    }

    /// Matching entries with the namespace prefix removed
    pub async fn get_prefix(
        &self,
        prefix: &str,
    ) -> DssResult<HashMap<String, String>> {
        let entries = self.store.get_prefix(&self.qualify(prefix)).await?;
        Ok(entries
            .into_iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(self.prefix.as_str())
                    .map(|stripped| (stripped.to_string(), v))
            })
            .collect())
    }

    pub async fn delete(
        &self,
        key: &str,
    ) -> DssResult<()> {
        self.store.delete(&self.qualify(key)).await
    }

    pub async fn delete_all<I, K>(
        &self,
        keys: I,
    ) -> DssResult<()>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let keys: Vec<String> = keys.into_iter().map(|k| self.qualify(k.as_ref())).collect();
        self.store.delete_all(keys).await
    }

    pub async fn delete_prefix(
        &self,
        prefix: &str,
    ) -> DssResult<()> {
        self.store.delete_prefix(&self.qualify(prefix)).await
    }

    pub async fn put_swap(
        &self,
        key: &str,
        old_value: Option<&str>,
        new_value: &str,
    ) -> DssResult<bool> {
        self.store
            .put_swap(&self.qualify(key), old_value, new_value)
            .await
    }

    pub async fn put_swap_with(
        &self,
        key: &str,
        old_value: Option<&str>,
        new_value: &str,
        others: &HashMap<String, String>,
    ) -> DssResult<bool> {
        self.store
            .put_swap_with(
                &self.qualify(key),
                old_value,
                new_value,
                &self.qualify_all(others),
            )
            .await
    }

    pub async fn perform_actions(
        &self,
        actions: &[DssAction],
    ) -> DssResult<()> {
        let actions: Vec<DssAction> = actions
            .iter()
            .cloned()
            .map(|action| action.map_keys(|k| self.qualify(&k)))
            .collect();
        self.store.perform_actions(&actions).await
    }

    pub async fn watch(
        &self,
        key: &str,
    ) -> DssResult<WatchHandle> {
        self.store.watch(&self.qualify(key)).await
    }

    pub async fn watch_prefix(
        &self,
        prefix: &str,
    ) -> DssResult<WatchHandle> {
        self.store.watch_prefix(&self.qualify(prefix)).await
    }

    pub fn unwatch(
        &self,
        id: &WatchId,
    ) {
        self.store.unwatch(id);
    }
}
