mod config;
mod db;
mod extract;
mod model;
mod ocr;
mod process;
mod scraper;
mod segments;
mod store;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{error, info};

use crate::extract::TextExtractor;
use crate::model::OrderDescriptor;
use crate::ocr::{HttpTextDetector, OcrConfig};
use crate::process::OrderProcessor;
use crate::scraper::Scraper;
use crate::store::{export_payload, Bucket};

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "ny_order_etl", about = "NY historical executive orders ETL")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape the listing page and export order descriptors
    Scrape,
    /// Process one order: download its PDF, extract text, persist both rows
    ProcessOrder {
        /// Path to the event JSON: {"order_id": "...", "order_data": {...}}
        event: PathBuf,
    },
    /// Show the most recent export in the bucket
    LatestExport,
}

/// Outcome of one invocation: a status code plus a JSON body.
struct Response {
    status_code: u16,
    body: serde_json::Value,
}

impl Response {
    fn ok(body: serde_json::Value) -> Self {
        Self {
            status_code: 200,
            body,
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status_code: 400,
            body: json!({ "error": message.into() }),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status_code: 500,
            body: json!({ "error": message.into() }),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let response = match cli.command {
        Commands::Scrape => handle_scrape().await,
        Commands::ProcessOrder { event } => handle_process_order(&event).await,
        Commands::LatestExport => handle_latest_export().await,
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "statusCode": response.status_code,
            "body": response.body,
        }))?
    );
    if response.status_code != 200 {
        std::process::exit(1);
    }
    Ok(())
}

fn http_client() -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?)
}

async fn handle_scrape() -> Response {
    let Some(bucket_name) = config::bucket_name() else {
        error!("S3_BUCKET_NAME not set");
        return Response::bad_request("S3_BUCKET_NAME not set");
    };
    let bucket = match Bucket::open(&bucket_name) {
        Ok(b) => b,
        Err(e) => return Response::internal(format!("Store error: {:#}", e)),
    };
    let http = match http_client() {
        Ok(c) => c,
        Err(e) => return Response::internal(format!("HTTP client error: {:#}", e)),
    };

    let orders = match Scraper::new(http, bucket.clone()).scrape().await {
        Ok(orders) => orders,
        Err(e) => {
            error!("Request error: {}", e);
            return Response::internal(format!("Request error: {}", e));
        }
    };
    if orders.is_empty() {
        info!("No historical executive orders data extracted");
        return Response::ok(json!({ "message": "No data extracted" }));
    }

    let file_name = match bucket.save_export(&orders).await {
        Ok(key) => key,
        Err(e) => {
            error!("Failed to save export: {:#}", e);
            return Response::internal(format!("Store error: {:#}", e));
        }
    };
    info!("Data extraction complete. File saved: {}", file_name);
    Response::ok(json!({
        "message": "Data extraction complete",
        "file_name": file_name,
        "bucket_name": bucket_name,
        "orders": export_payload(&orders),
    }))
}

async fn handle_latest_export() -> Response {
    let Some(bucket_name) = config::bucket_name() else {
        return Response::bad_request("S3_BUCKET_NAME not set");
    };
    let bucket = match Bucket::open(&bucket_name) {
        Ok(b) => b,
        Err(e) => return Response::internal(format!("Store error: {:#}", e)),
    };
    let key = match bucket.latest_export().await {
        Ok(Some(key)) => key,
        Ok(None) => return Response::ok(json!({ "message": "No export files found" })),
        Err(e) => return Response::internal(format!("Store error: {:#}", e)),
    };
    match bucket.get_export(&key).await {
        Ok(orders) => Response::ok(json!({
            "file_name": key,
            "bucket_name": bucket_name,
            "order_count": orders.len(),
        })),
        Err(e) => Response::internal(format!("Store error: {:#}", e)),
    }
}

async fn handle_process_order(event_path: &Path) -> Response {
    let event: serde_json::Value = match std::fs::read_to_string(event_path)
        .map_err(anyhow::Error::from)
        .and_then(|raw| Ok(serde_json::from_str(&raw)?))
    {
        Ok(v) => v,
        Err(e) => return Response::bad_request(format!("Unreadable event: {:#}", e)),
    };

    let Some(order_id) = event.get("order_id").and_then(|v| v.as_str()).map(String::from)
    else {
        return Response::bad_request("Missing order_id or order_data in event");
    };
    let order: OrderDescriptor = match event
        .get("order_data")
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("Missing order_id or order_data in event"))
        .and_then(|v| Ok(serde_json::from_value(v)?))
    {
        Ok(o) => o,
        Err(e) => return Response::bad_request(format!("{:#}", e)),
    };

    let Some(bucket_name) = config::bucket_name() else {
        return Response::bad_request("S3_BUCKET_NAME not set");
    };
    let Some(secret_name) = config::db_secret_name() else {
        return Response::bad_request("DB_SECRET_NAME not set");
    };
    let Some(ocr_endpoint) = config::ocr_endpoint() else {
        return Response::bad_request("OCR_ENDPOINT not set");
    };

    let bucket = match Bucket::open(&bucket_name) {
        Ok(b) => b,
        Err(e) => return Response::internal(format!("Store error: {:#}", e)),
    };
    let http = match http_client() {
        Ok(c) => c,
        Err(e) => return Response::internal(format!("HTTP client error: {:#}", e)),
    };
    let db = match db::connect(&config::EnvSecrets, &secret_name).await {
        Ok(db) => db,
        Err(e) => {
            error!("Database connection failed: {:#}", e);
            return Response::internal(format!("Database connection failed: {:#}", e));
        }
    };

    let detector = Arc::new(HttpTextDetector::new(http.clone(), &ocr_endpoint));
    let extractor = TextExtractor::new(bucket, detector, OcrConfig::default());
    let processor = OrderProcessor::new(db, http, extractor);

    if processor.process(&order_id, &order).await {
        info!("Successfully processed order {}", order_id);
        Response::ok(json!({
            "message": format!("Processed order {}", order_id),
            "order_id": order_id,
        }))
    } else {
        error!("Failed to process order {}", order_id);
        Response::internal(format!("Failed to process order {}", order_id))
    }
}
