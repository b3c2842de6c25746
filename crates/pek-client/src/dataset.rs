//! Memoized access to the precomputed attributes of one dataset.

use crate::connection::Session;
use crate::error::{ClientError, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::OnceCell;
use tracing::debug;

/// Attributes the server can return for a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DatasetKey {
    Features,
    Original,
    Scaled,
    Isomap,
    Mds,
    Pca,
    Tsne,
    Umap,
}

impl DatasetKey {
    pub const ALL: [Self; 8] =
        [Self::Features, Self::Original, Self::Scaled, Self::Isomap, Self::Mds, Self::Pca, Self::Tsne, Self::Umap];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Features => "features",
            Self::Original => "original",
            Self::Scaled => "scaled",
            Self::Isomap => "isomap",
            Self::Mds => "mds",
            Self::Pca => "pca",
            Self::Tsne => "tsne",
            Self::Umap => "umap",
        }
    }
}

impl fmt::Display for DatasetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatasetKey {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL.into_iter().find(|key| key.as_str() == s).ok_or_else(|| ClientError::InvalidDatasetKey {
            key: s.to_string(),
            allowed: Self::ALL.map(Self::as_str).join(", "),
        })
    }
}

/// Handle to one dataset served by the connected server.
///
/// Each key is fetched at most once; concurrent first fetches share one request.
pub struct Dataset {
    name: String,
    session: Arc<Session>,
    cache: Mutex<HashMap<DatasetKey, Arc<OnceCell<Value>>>>,
}

impl fmt::Debug for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dataset").field("name", &self.name).field("cached", &self.cached_keys()).finish()
    }
}

impl Dataset {
    pub(crate) fn new(name: impl Into<String>, session: Arc<Session>) -> Self {
        Self { name: name.into(), session, cache: Mutex::new(HashMap::new()) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<DatasetKey, Arc<OnceCell<Value>>>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the value of `key`, fetching it on first use.
    pub async fn get(&self, key: DatasetKey) -> Result<Value> {
        let cell = Arc::clone(self.cache().entry(key).or_default());
        let value = cell.get_or_try_init(|| self.fetch(key)).await?;
        Ok(value.clone())
    }

    async fn fetch(&self, key: DatasetKey) -> Result<Value> {
        debug!(dataset = %self.name, key = %key, "Fetching dataset attribute");

        let mut payload = Map::new();
        payload.insert("name".to_string(), Value::String(self.name.clone()));
        payload.insert(key.as_str().to_string(), Value::Bool(true));

        let mut data = self.session.send("dataset", Some(Value::Object(payload))).await?;
        data.get_mut(key.as_str()).map(Value::take).ok_or_else(|| {
            ClientError::InvalidResponse(format!("dataset '{}' response has no '{}' field", self.name, key))
        })
    }

    /// Keys whose values are already cached.
    pub fn cached_keys(&self) -> Vec<DatasetKey> {
        let mut keys: Vec<DatasetKey> =
            self.cache().iter().filter(|(_, cell)| cell.initialized()).map(|(key, _)| *key).collect();
        keys.sort();
        keys
    }

    // Shortcuts for `get`, one per key.

    pub async fn features(&self) -> Result<Value> {
        self.get(DatasetKey::Features).await
    }

    pub async fn original_data(&self) -> Result<Value> {
        self.get(DatasetKey::Original).await
    }

    pub async fn scaled_data(&self) -> Result<Value> {
        self.get(DatasetKey::Scaled).await
    }

    pub async fn isomap(&self) -> Result<Value> {
        self.get(DatasetKey::Isomap).await
    }

    pub async fn mds(&self) -> Result<Value> {
        self.get(DatasetKey::Mds).await
    }

    pub async fn pca(&self) -> Result<Value> {
        self.get(DatasetKey::Pca).await
    }

    pub async fn tsne(&self) -> Result<Value> {
        self.get(DatasetKey::Tsne).await
    }

    pub async fn umap(&self) -> Result<Value> {
        self.get(DatasetKey::Umap).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_round_trip() {
        for key in DatasetKey::ALL {
            assert_eq!(key.as_str().parse::<DatasetKey>().unwrap(), key);
        }
    }

    #[test]
    fn test_invalid_key_lists_allowed() {
        let err = "pcaa".parse::<DatasetKey>().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("pcaa"));
        assert!(msg.contains("features, original, scaled, isomap, mds, pca, tsne, umap"));
    }
}
