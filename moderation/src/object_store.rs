use std::collections::HashMap;

use async_trait::async_trait;
use futures::StreamExt;
use weave_client::ByteStream;

use crate::errors::{DownloadError, Result};

/// The store interface the orchestrator needs: stream bytes in, ask for a
/// stored size back, and delete aborted uploads. Metadata is an opaque
/// string map attached to the object.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload `body` under `key`, returning the number of bytes stored.
    /// A failing body must leave nothing behind.
    async fn put(&self, key: &str, body: ByteStream, metadata: HashMap<String, String>) -> Result<u64>;

    /// Size of the stored object, or `None` if absent.
    async fn head(&self, key: &str) -> Result<Option<u64>>;

    async fn delete(&self, key: &str) -> Result<()>;
}

/// In-memory store for tests and local runs.
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: std::sync::Mutex<HashMap<String, (Vec<u8>, HashMap<String, String>)>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed an object, bypassing `put`. Lets tests model uploads that
    /// completed out-of-band (e.g. before a batch timeout fired).
    pub fn seed(&self, key: &str, data: Vec<u8>) {
        if let Ok(mut objects) = self.objects.lock() {
            objects.insert(key.to_string(), (data, HashMap::new()));
        }
    }

    pub fn metadata(&self, key: &str) -> Option<HashMap<String, String>> {
        self.objects.lock().ok()?.get(key).map(|(_, m)| m.clone())
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().ok()?.get(key).map(|(data, _)| data.clone())
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(&self, key: &str, mut body: ByteStream, metadata: HashMap<String, String>) -> Result<u64> {
        let mut data = Vec::new();
        while let Some(segment) = body.next().await {
            // Stream errors surface unwrapped so the caller can classify
            // them (no-data vs generic failure).
            data.extend_from_slice(&segment.map_err(DownloadError::Client)?);
        }

        let size = data.len() as u64;
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| DownloadError::UploadError("store poisoned".to_string()))?;
        objects.insert(key.to_string(), (data, metadata));
        Ok(size)
    }

    async fn head(&self, key: &str) -> Result<Option<u64>> {
        let objects = self
            .objects
            .lock()
            .map_err(|_| DownloadError::UploadError("store poisoned".to_string()))?;
        Ok(objects.get(key).map(|(data, _)| data.len() as u64))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| DownloadError::UploadError("store poisoned".to_string()))?;
        objects.remove(key);
        Ok(())
    }
}
