use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::config::ROW_USER;
use crate::db::Db;
use crate::extract::TextExtractor;
use crate::model::{normalize_order_num, OrderDescriptor, OrderEntry, OrderTextEntry};

const DOWNLOAD_RETRIES: u32 = 3;
const DOWNLOAD_BACKOFF_MS: u64 = 500;
const TEXT_WRITE_ATTEMPTS: u32 = 3;

/// Drives one order end to end: metadata upsert, PDF download, text
/// extraction, text write. Returns `true` only when every stage succeeded;
/// a `false` is final for this invocation — re-queueing is the caller's job.
pub struct OrderProcessor {
    db: Db,
    http: reqwest::Client,
    extractor: TextExtractor,
}

impl OrderProcessor {
    pub fn new(db: Db, http: reqwest::Client, extractor: TextExtractor) -> Self {
        Self {
            db,
            http,
            extractor,
        }
    }

    pub async fn process(&self, order_id: &str, order: &OrderDescriptor) -> bool {
        info!("Processing order {}", order_id);

        let order_num = normalize_order_num(&order.order_num);
        if order_num.defaulted {
            warn!(
                "Invalid order_num format for {} ({:?}), defaulting to 0",
                order_id, order.order_num
            );
        }

        let now = Utc::now().to_rfc3339();
        let entry = OrderEntry {
            order_id: order_id.to_string(),
            title: order.title.clone(),
            signed_date: order.signed_date.clone(),
            description: None,
            src: order.src.clone(),
            row_ct_dt: now.clone(),
            row_ct_user: ROW_USER.to_string(),
            row_updt_dt: now,
            row_updt_user: ROW_USER.to_string(),
            order_num: order_num.value,
        };

        // Metadata persistence is mandatory; nothing else proceeds without it.
        if let Err(e) = self.db.upsert_order(&entry).await {
            error!("Database error (executive_orders) for {}: {:#}", order_id, e);
            return false;
        }
        info!("Upserted executive order {}", order_id);

        let temp_dir = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(e) => {
                error!("Failed to create temp dir for {}: {}", order_id, e);
                return false;
            }
        };
        // Metadata is already persisted at this point; a failed download
        // leaves that partial state in place on purpose.
        let Some(pdf_path) = download_pdf(&self.http, &order.pdf_url, temp_dir.path()).await
        else {
            warn!("Skipping text extraction for {}", order_id);
            return false;
        };

        let text = self.extractor.extract(&pdf_path).await;

        let now = Utc::now().to_rfc3339();
        let text_entry = OrderTextEntry {
            order_id: order_id.to_string(),
            text,
            src: order.src.clone(),
            row_ct_dt: now.clone(),
            row_ct_user: ROW_USER.to_string(),
            row_updt_dt: now,
            row_updt_user: ROW_USER.to_string(),
        };

        // Coarse retry around the whole text write: large payloads against a
        // table with no uniqueness constraint make this the contention-prone
        // stage.
        for attempt in 0..TEXT_WRITE_ATTEMPTS {
            match self.db.write_order_text(&text_entry).await {
                Ok(()) => {
                    info!("Inserted/updated order text for {}", order_id);
                    return true;
                }
                Err(e) => {
                    error!(
                        "Attempt {}/{} failed for {}: {:#}",
                        attempt + 1,
                        TEXT_WRITE_ATTEMPTS,
                        order_id,
                        e
                    );
                    if attempt + 1 == TEXT_WRITE_ATTEMPTS {
                        error!("Max retries reached for {}. Skipping.", order_id);
                        return false;
                    }
                    tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                }
            }
        }
        false
    }
}

/// Download the order's PDF into `dir` with bounded retry on 5xx and
/// transport errors. `None` means the order keeps its metadata row but gets
/// no text.
async fn download_pdf(client: &reqwest::Client, pdf_url: &str, dir: &Path) -> Option<PathBuf> {
    for attempt in 0..=DOWNLOAD_RETRIES {
        match client.get(pdf_url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.bytes().await {
                Ok(bytes) => {
                    let path = dir.join("order.pdf");
                    if let Err(e) = std::fs::write(&path, &bytes) {
                        error!("Failed to write downloaded PDF: {}", e);
                        return None;
                    }
                    info!("Downloaded PDF from {}", pdf_url);
                    return Some(path);
                }
                Err(e) => {
                    error!("Failed to read PDF body from {}: {}", pdf_url, e);
                }
            },
            Ok(resp) => {
                let status = resp.status();
                if !status.is_server_error() {
                    error!("Failed to download PDF {}: status {}", pdf_url, status);
                    return None;
                }
                warn!("Server error {} downloading {}", status, pdf_url);
            }
            Err(e) => {
                warn!("Request error downloading {}: {}", pdf_url, e);
            }
        }
        if attempt < DOWNLOAD_RETRIES {
            let backoff = Duration::from_millis(DOWNLOAD_BACKOFF_MS * 2u64.pow(attempt));
            tokio::time::sleep(backoff).await;
        }
    }
    error!("Failed to download PDF {}: retries exhausted", pdf_url);
    None
}
