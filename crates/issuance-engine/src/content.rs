//! Content storage for certificates and token metadata
//!
//! Objects are content-addressed: the reference returned by a publish is
//! derived from the BLAKE3 digest of the bytes, so republishing identical
//! content yields the same reference.

use crate::error::ContentError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tokio::sync::RwLock;

/// Scheme prefix of content references
pub const CONTENT_SCHEME: &str = "content://";

/// A stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Publishing seam for rendered artifacts.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store `bytes` and return a content reference
    async fn publish(
        &self,
        name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<String, ContentError>;

    /// Fetch a previously published object
    async fn fetch(&self, content_ref: &str) -> Result<Option<StoredObject>, ContentError>;
}

/// Compute the reference an object would be published under
pub fn content_ref_for(bytes: &[u8]) -> String {
    format!("{}{}", CONTENT_SCHEME, blake3::hash(bytes).to_hex())
}

/// In-memory content store with fault injection
#[derive(Debug, Default)]
pub struct InMemoryContentStore {
    objects: RwLock<HashMap<String, StoredObject>>,
    publish_calls: AtomicU64,
    pending_failures: AtomicU32,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of publish calls seen, including failed ones
    pub fn publish_calls(&self) -> u64 {
        self.publish_calls.load(Ordering::SeqCst)
    }

    /// Make the next `count` publishes fail
    pub fn fail_next_publishes(&self, count: u32) {
        self.pending_failures.store(count, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn publish(
        &self,
        name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<String, ContentError> {
        self.publish_calls.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(ContentError::Unavailable("simulated storage outage".into()));
        }
        if bytes.is_empty() {
            return Err(ContentError::Rejected {
                name: name.to_string(),
                reason: "empty object".into(),
            });
        }

        let content_ref = content_ref_for(&bytes);
        let mut objects = self.objects.write().await;
        objects.insert(
            content_ref.clone(),
            StoredObject {
                name: name.to_string(),
                content_type: content_type.to_string(),
                bytes,
            },
        );
        Ok(content_ref)
    }

    async fn fetch(&self, content_ref: &str) -> Result<Option<StoredObject>, ContentError> {
        let objects = self.objects.read().await;
        Ok(objects.get(content_ref).cloned())
    }
}
