use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use scraper::{Html, Selector};
use tracing::{info, warn};

use crate::config::{BASE_URL, SITE_ROOT, SRC_VALUE};
use crate::model::{order_id, parse_date, OrderDescriptor, NO_TITLE};
use crate::segments::{self, ParsedSegment};
use crate::store::Bucket;

const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 1000;
const RETRY_STATUS: [u16; 5] = [429, 500, 502, 503, 504];

static SECTION_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.t-section__wrapper").unwrap());
static GOVERNOR_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h2.t-section__title").unwrap());
static CONTENT_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.a-text__html").unwrap());
static PARAGRAPH_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("p").unwrap());
static LINK_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());

/// The scraper's one hard failure mode: the page could not be retrieved.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("unexpected status {status} fetching {url}")]
    Status { url: String, status: u16 },
    #[error("giving up on {url} after {attempts} attempts (last status {status})")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        status: u16,
    },
}

/// Counts of accepted orders vs dropped segments/paragraphs for one run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScrapeCounts {
    pub processed: usize,
    pub skipped: usize,
}

pub struct Scraper {
    http: reqwest::Client,
    bucket: Bucket,
}

impl Scraper {
    pub fn new(http: reqwest::Client, bucket: Bucket) -> Self {
        Self { http, bucket }
    }

    /// Fetch and parse the listing page into descriptors. The debug snapshot
    /// write is best-effort; only an unfetchable page is fatal.
    pub async fn scrape(&self) -> Result<Vec<OrderDescriptor>, FetchError> {
        info!("Starting extraction of historical executive orders...");
        info!("Fetching URL: {}", BASE_URL);
        let html = fetch_with_retry(&self.http, BASE_URL).await?;

        if let Err(e) = self.bucket.snapshot_page(&html).await {
            warn!("Failed to cache webpage snapshot: {:#}", e);
        }

        let (orders, counts) = parse_listing(&html);
        info!(
            "Processed {} total links, skipped {} links (no PDFs or parsing issues)",
            counts.processed, counts.skipped
        );
        info!(
            "Extracted metadata for {} historical executive orders",
            orders.len()
        );
        Ok(orders)
    }
}

/// GET with bounded retry: 429/5xx and transport errors back off
/// exponentially up to the attempt cap; other statuses fail immediately.
pub async fn fetch_with_retry(client: &reqwest::Client, url: &str) -> Result<String, FetchError> {
    let mut last_status = 0u16;
    for attempt in 0..=MAX_RETRIES {
        match client.get(url).send().await {
            Ok(resp) => {
                let status = resp.status().as_u16();
                if resp.status().is_success() {
                    return resp.text().await.map_err(|source| FetchError::Request {
                        url: url.to_string(),
                        source,
                    });
                }
                if !RETRY_STATUS.contains(&status) {
                    return Err(FetchError::Status {
                        url: url.to_string(),
                        status,
                    });
                }
                last_status = status;
            }
            Err(source) => {
                if attempt == MAX_RETRIES {
                    return Err(FetchError::Request {
                        url: url.to_string(),
                        source,
                    });
                }
            }
        }
        if attempt < MAX_RETRIES {
            let backoff = Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt));
            warn!(
                "Retrying {} (attempt {}/{}), backing off {:.1}s",
                url,
                attempt + 1,
                MAX_RETRIES,
                backoff.as_secs_f64()
            );
            tokio::time::sleep(backoff).await;
        }
    }
    Err(FetchError::RetriesExhausted {
        url: url.to_string(),
        attempts: MAX_RETRIES + 1,
        status: last_status,
    })
}

/// Parse the listing HTML into descriptors. Sections are keyed by governor
/// heading; each paragraph's PDF links are consumed in appearance order by
/// the orders its segments yield.
pub fn parse_listing(html: &str) -> (Vec<OrderDescriptor>, ScrapeCounts) {
    let doc = Html::parse_document(html);
    let mut orders: Vec<OrderDescriptor> = Vec::new();
    let mut by_id: HashMap<String, usize> = HashMap::new();
    // Title inheritance follows the most recently accepted order across the
    // whole run, section boundaries included.
    let mut last_title: Option<String> = None;
    let mut counts = ScrapeCounts::default();

    let sections: Vec<_> = doc.select(&SECTION_SEL).collect();
    if sections.is_empty() {
        warn!("No sections found on the page");
        return (orders, counts);
    }

    for section in sections {
        let governor = section
            .select(&GOVERNOR_SEL)
            .next()
            .map(|h| h.text().collect::<String>().trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "Unknown Governor".to_string());
        info!("Processing section for {}", governor);

        let Some(content) = section.select(&CONTENT_SEL).next() else {
            warn!("No content found in section for {}", governor);
            continue;
        };
        let paragraphs: Vec<_> = content.select(&PARAGRAPH_SEL).collect();
        if paragraphs.is_empty() {
            warn!("No paragraphs found in section for {}", governor);
            continue;
        }

        for p in paragraphs {
            let text: String = p.text().collect();
            let pdf_links: Vec<&str> = p
                .select(&LINK_SEL)
                .filter_map(|a| a.value().attr("href"))
                .filter(|href| href.ends_with(".pdf"))
                .collect();
            if pdf_links.is_empty() {
                warn!("No PDF links found in paragraph: {}", text.trim());
                counts.skipped += 1;
                continue;
            }

            let mut link_index = 0usize;
            for seg in segments::split_segments(&text) {
                let Some(parsed) = segments::match_segment(&seg) else {
                    warn!("Could not parse order in segment: '{}'", seg);
                    counts.skipped += 1;
                    continue;
                };

                // Claim the next unused link before building the
                // descriptor; an order with no link left is dropped.
                if link_index >= pdf_links.len() {
                    warn!(
                        "No PDF link available for order number {} in segment: '{}'",
                        parsed.order_num(),
                        seg
                    );
                    counts.skipped += 1;
                    continue;
                }
                let mut pdf_url = pdf_links[link_index].to_string();
                link_index += 1;
                if !pdf_url.starts_with("http") {
                    pdf_url = format!("{}{}", SITE_ROOT, pdf_url);
                }

                let (order_num, date_raw, title) = match parsed {
                    ParsedSegment::Lead {
                        order_num,
                        signed_date,
                        title,
                    } => {
                        let title = title.unwrap_or_else(|| NO_TITLE.to_string());
                        (order_num, signed_date, title)
                    }
                    ParsedSegment::Continuation {
                        order_num,
                        signed_date,
                    } => {
                        let title = last_title.clone().unwrap_or_else(|| NO_TITLE.to_string());
                        (order_num, signed_date, title)
                    }
                };

                let id = order_id(&order_num);
                let signed_date = parse_date(&date_raw);
                info!(
                    "Processing order: {}, Order Num: {}, Title: {}, Signed Date: {}, PDF URL: {}",
                    id, order_num, title, signed_date, pdf_url
                );

                let descriptor = OrderDescriptor {
                    order_id: id.clone(),
                    order_num,
                    title: title.clone(),
                    signed_date,
                    pdf_url,
                    src: SRC_VALUE.to_string(),
                    governor: governor.clone(),
                };
                last_title = Some(title);
                match by_id.get(&id) {
                    Some(&i) => orders[i] = descriptor,
                    None => {
                        by_id.insert(id, orders.len());
                        orders.push(descriptor);
                    }
                }
                counts.processed += 1;
            }
        }
    }

    (orders, counts)
}

// ── Tests ──
