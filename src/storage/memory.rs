//! In-memory [`Storage`] used by tests to observe uploads.

use anyhow::{Result, bail};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{ObjectNotFound, Storage, StoredObject};

#[derive(Debug, Default)]
pub struct MemoryStorage {
    objects: Mutex<HashMap<String, (Vec<u8>, String)>>,
    /// Keys containing this fragment are rejected.
    fail_on: Option<String>,
    delay: Duration,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(mut self, fragment: &str) -> Self {
        self.fail_on = Some(fragment.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects.lock().unwrap().get(key).map(|(_, ct)| ct.clone())
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<StoredObject> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        if let Some(fragment) = &self.fail_on {
            if key.contains(fragment.as_str()) {
                bail!("PUT {} failed with 503 Service Unavailable", key);
            }
        }
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (body, content_type.to_string()));
        Ok(StoredObject {
            key: key.to_string(),
            url: self.url(key),
        })
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        match self.objects.lock().unwrap().get(key) {
            Some((body, _)) => Ok(body.clone()),
            None => Err(ObjectNotFound(key.to_string()).into()),
        }
    }

    fn url(&self, key: &str) -> String {
        format!("https://cdn.test/{}", key)
    }
}
