use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path;
use object_store::{Attribute, Attributes, ObjectStore, PutOptions};
use tracing::{info, warn};

use crate::model::OrderDescriptor;

const EXPORT_PREFIX: &str = "historical_orders_";

/// Object store adapter: one bucket, per-key put/get/list/delete. No
/// cross-key transactions.
#[derive(Clone)]
pub struct Bucket {
    name: String,
    store: Arc<dyn ObjectStore>,
}

impl Bucket {
    /// Open the named bucket using credentials from the environment.
    pub fn open(name: &str) -> Result<Self> {
        let s3 = AmazonS3Builder::from_env()
            .with_bucket_name(name)
            .build()
            .with_context(|| format!("failed to open bucket {}", name))?;
        Ok(Self {
            name: name.to_string(),
            store: Arc::new(s3),
        })
    }

    /// Wrap an existing store (tests use `object_store::memory::InMemory`).
    pub fn with_store(name: &str, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            name: name.to_string(),
            store,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, content_type.to_string().into());
        let opts = PutOptions {
            attributes,
            ..Default::default()
        };
        self.store
            .put_opts(&Path::from(key), bytes.into(), opts)
            .await
            .with_context(|| format!("failed to put {}/{}", self.name, key))?;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let result = self
            .store
            .get(&Path::from(key))
            .await
            .with_context(|| format!("failed to get {}/{}", self.name, key))?;
        Ok(result.bytes().await?.to_vec())
    }

    /// Keys under `prefix` with their last-modified times. Prefix matching is
    /// done on the full key so partial filename prefixes work.
    pub async fn list(&self, prefix: &str) -> Result<Vec<(String, DateTime<Utc>)>> {
        let metas: Vec<_> = self
            .store
            .list(None)
            .try_collect()
            .await
            .with_context(|| format!("failed to list {}", self.name))?;
        Ok(metas
            .into_iter()
            .map(|m| (m.location.to_string(), m.last_modified))
            .filter(|(key, _)| key.starts_with(prefix))
            .collect())
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        self.store
            .delete(&Path::from(key))
            .await
            .with_context(|| format!("failed to delete {}/{}", self.name, key))?;
        Ok(())
    }

    /// Save the scraped descriptors as a timestamped JSON export, returning
    /// the object key.
    pub async fn save_export(&self, orders: &[OrderDescriptor]) -> Result<String> {
        let key = export_key(Utc::now());
        let body = serde_json::to_vec_pretty(&export_payload(orders))?;
        self.put(&key, body, "application/json").await?;
        info!("Saved export to {}/{}", self.name, key);
        Ok(key)
    }

    /// Read an export back into descriptors, restoring each order id from
    /// its key.
    pub async fn get_export(&self, key: &str) -> Result<Vec<OrderDescriptor>> {
        let bytes = self.get(key).await?;
        let map: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(&bytes)?;
        let mut orders = Vec::with_capacity(map.len());
        for (order_id, value) in map {
            let mut d: OrderDescriptor = serde_json::from_value(value)
                .with_context(|| format!("malformed descriptor for {}", order_id))?;
            d.order_id = order_id;
            orders.push(d);
        }
        Ok(orders)
    }

    /// Most recent export key by last-modified time, if any.
    pub async fn latest_export(&self) -> Result<Option<String>> {
        let mut files = self.list(EXPORT_PREFIX).await?;
        if files.is_empty() {
            warn!("No export files found in {}", self.name);
            return Ok(None);
        }
        files.sort_by(|a, b| b.1.cmp(&a.1));
        let latest = files.remove(0).0;
        info!("Found latest export in {}: {}", self.name, latest);
        Ok(Some(latest))
    }

    /// Cache the raw listing page for debugging, returning the object key.
    pub async fn snapshot_page(&self, html: &str) -> Result<String> {
        let key = debug_key(Utc::now());
        self.put(&key, html.as_bytes().to_vec(), "text/html").await?;
        Ok(key)
    }
}

/// Export payload: a JSON object keyed by order id, preserving scrape order.
pub fn export_payload(orders: &[OrderDescriptor]) -> serde_json::Value {
    let mut map = serde_json::Map::with_capacity(orders.len());
    for d in orders {
        map.insert(
            d.order_id.clone(),
            serde_json::to_value(d).expect("descriptor serializes"),
        );
    }
    serde_json::Value::Object(map)
}

pub fn export_key(now: DateTime<Utc>) -> String {
    format!("{}{}.json", EXPORT_PREFIX, now.format("%Y%m%d_%H%M%S"))
}

pub fn debug_key(now: DateTime<Utc>) -> String {
    format!("debug/webpage_{}.html", now.format("%Y%m%d_%H%M%S"))
}

/// Staging key for OCR submission, time-suffixed to avoid collisions across
/// concurrent invocations.
pub fn staging_key(basename: &str, unix_time: i64) -> String {
    format!("textract-input/{}_{}.pdf", basename, unix_time)
}

// ── Tests ──
