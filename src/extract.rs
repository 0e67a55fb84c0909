use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use lopdf::Document;
use tracing::{error, info};

use crate::ocr::{DetectionStatus, OcrConfig, TextDetector};
use crate::store::{staging_key, Bucket};

// Page ceiling imposed by the detection backend; anything larger cannot be
// OCR'd, so direct extraction is not even attempted.
const MAX_PAGES: usize = 3000;

/// Best-effort PDF transcription. Direct text-layer extraction first, an
/// asynchronous OCR job for scanned documents, and an empty string for every
/// irrecoverable condition — the caller never sees an error.
pub struct TextExtractor {
    bucket: Bucket,
    detector: Arc<dyn TextDetector>,
    cfg: OcrConfig,
}

impl TextExtractor {
    pub fn new(bucket: Bucket, detector: Arc<dyn TextDetector>, cfg: OcrConfig) -> Self {
        Self {
            bucket,
            detector,
            cfg,
        }
    }

    pub async fn extract(&self, pdf_path: &Path) -> String {
        let mut page_count = 0usize;

        // Cheap path: the text layer, page by page.
        match Document::load(pdf_path) {
            Ok(doc) => {
                let pages = doc.get_pages();
                page_count = pages.len();
                if page_count > MAX_PAGES {
                    error!(
                        "PDF has {} pages, exceeds detection backend limit",
                        page_count
                    );
                    return String::new();
                }
                let text = pages
                    .keys()
                    .map(|&page| doc.extract_text(&[page]).unwrap_or_default())
                    .collect::<Vec<_>>()
                    .join("\n")
                    .trim()
                    .to_string();
                if !text.is_empty() {
                    info!("Successfully extracted text from the PDF text layer");
                    return text;
                }
            }
            Err(e) => {
                info!("Text-layer extraction failed (likely scanned PDF): {}", e);
            }
        }

        let file_size_mb = std::fs::metadata(pdf_path)
            .map(|m| m.len() as f64 / (1024.0 * 1024.0))
            .unwrap_or(0.0);
        info!(
            "Processing PDF: {}, Size: {:.2} MB, Pages: {}",
            pdf_path.display(),
            file_size_mb,
            page_count
        );
        info!("PDF appears to be scanned (no selectable text)");

        // The detection path needs a parseable, unencrypted container.
        let doc = match Document::load(pdf_path) {
            Ok(doc) => doc,
            Err(e) => {
                error!("Skipping invalid PDF: {}", e);
                return String::new();
            }
        };
        if is_encrypted(&doc) {
            error!("Skipping encrypted PDF");
            return String::new();
        }
        info!("PDF Metadata: {:?}", pdf_metadata(&doc));

        // Rewrite page-by-page to normalize structural quirks that trip up
        // detection backends; on failure keep the original bytes.
        let upload_path = match rewrite_pdf(pdf_path) {
            Ok(path) => {
                info!("Reformatted PDF saved to {}", path.display());
                path
            }
            Err(e) => {
                error!("Failed to reformat PDF: {}", e);
                pdf_path.to_path_buf()
            }
        };
        let bytes = match std::fs::read(&upload_path) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Failed to read PDF for staging: {}", e);
                return String::new();
            }
        };

        let basename = pdf_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "document.pdf".to_string());
        let key = staging_key(&basename, Utc::now().timestamp());
        if let Err(e) = self.bucket.put(&key, bytes, "application/pdf").await {
            error!("Failed to stage PDF for detection: {:#}", e);
            return String::new();
        }
        info!("Uploaded PDF to {}/{}", self.bucket.name(), key);

        let text = self.run_detection(&key).await;

        // The staged copy is temporary regardless of outcome.
        if let Err(e) = self.bucket.delete(&key).await {
            error!("Failed to delete staged object {}: {:#}", key, e);
        }

        text.unwrap_or_default()
    }

    /// Drive one detection job to completion: poll on a fixed interval up to
    /// the wall-clock timeout, then follow pagination tokens. Every failure
    /// mode collapses to `None`.
    async fn run_detection(&self, key: &str) -> Option<String> {
        let job_id = match self
            .detector
            .start_text_detection(self.bucket.name(), key)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                error!("Failed to start detection job: {:#}", e);
                return None;
            }
        };
        info!("Started detection job: {}", job_id);

        let started = Instant::now();
        let mut page = loop {
            if started.elapsed() >= self.cfg.timeout {
                error!(
                    "Detection job {} timed out after {}s",
                    job_id,
                    self.cfg.timeout.as_secs()
                );
                return None;
            }
            match self.detector.get_text_detection(&job_id, None).await {
                Ok(page) if page.status == DetectionStatus::InProgress => {
                    info!("Waiting for detection job {} to complete...", job_id);
                    tokio::time::sleep(self.cfg.poll_interval).await;
                }
                Ok(page) => break page,
                Err(e) => {
                    error!("Detection poll failed: {:#}", e);
                    return None;
                }
            }
        };

        if page.status == DetectionStatus::Failed {
            error!(
                "Detection job {} failed: {}",
                job_id,
                page.status_message.as_deref().unwrap_or("Unknown error")
            );
            return None;
        }

        let mut lines = std::mem::take(&mut page.lines);
        let mut next_token = page.next_token.take();
        while let Some(token) = next_token {
            match self
                .detector
                .get_text_detection(&job_id, Some(&token))
                .await
            {
                Ok(mut next_page) => {
                    lines.append(&mut next_page.lines);
                    next_token = next_page.next_token;
                }
                Err(e) => {
                    error!("Detection pagination failed: {:#}", e);
                    return None;
                }
            }
        }

        info!("Successfully extracted text via the detection backend");
        Some(lines.join("\n"))
    }
}

fn is_encrypted(doc: &Document) -> bool {
    doc.trailer.get(b"Encrypt").is_ok()
}

/// Document information dictionary entries, for the pre-detection log line.
fn pdf_metadata(doc: &Document) -> Vec<(String, String)> {
    let Ok(info_ref) = doc.trailer.get(b"Info").and_then(|obj| obj.as_reference()) else {
        return Vec::new();
    };
    let Ok(info) = doc.get_dictionary(info_ref) else {
        return Vec::new();
    };
    info.iter()
        .map(|(k, v)| (String::from_utf8_lossy(k).to_string(), format!("{:?}", v)))
        .collect()
}

/// Page-by-page rewrite into a sibling file, returning the new path.
fn rewrite_pdf(pdf_path: &Path) -> Result<std::path::PathBuf> {
    let out = pdf_path.with_file_name("reformatted.pdf");
    let mut doc = Document::load(pdf_path).context("reload for rewrite failed")?;
    doc.renumber_objects();
    doc.compress();
    doc.save(&out).context("saving rewritten PDF failed")?;
    Ok(out)
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Object, Stream};
    use object_store::memory::InMemory;

    use super::*;
    use crate::ocr::DetectionPage;

    fn test_cfg() -> OcrConfig {
        OcrConfig {
            poll_interval: Duration::from_millis(5),
            timeout: Duration::from_millis(40),
        }
    }

    fn mem_bucket() -> Bucket {
        Bucket::with_store("test-bucket", Arc::new(InMemory::new()))
    }

    /// Detector that returns scripted pages in order, then "in progress"
    /// forever. Records how many jobs were started.
    struct FakeDetector {
        start_calls: AtomicUsize,
        pages: Mutex<VecDeque<DetectionPage>>,
    }

    impl FakeDetector {
        fn new(pages: Vec<DetectionPage>) -> Self {
            Self {
                start_calls: AtomicUsize::new(0),
                pages: Mutex::new(pages.into()),
            }
        }

        fn stuck() -> Self {
            Self::new(Vec::new())
        }

        fn started(&self) -> usize {
            self.start_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TextDetector for FakeDetector {
        async fn start_text_detection(&self, _bucket: &str, _key: &str) -> Result<String> {
            self.start_calls.fetch_add(1, Ordering::SeqCst);
            Ok("job-1".to_string())
        }

        async fn get_text_detection(
            &self,
            _job_id: &str,
            _next_token: Option<&str>,
        ) -> Result<DetectionPage> {
            Ok(self.pages.lock().unwrap().pop_front().unwrap_or(DetectionPage {
                status: DetectionStatus::InProgress,
                status_message: None,
                lines: Vec::new(),
                next_token: None,
            }))
        }
    }

    fn page(status: DetectionStatus, lines: &[&str], next_token: Option<&str>) -> DetectionPage {
        DetectionPage {
            status,
            status_message: None,
            lines: lines.iter().map(|s| s.to_string()).collect(),
            next_token: next_token.map(String::from),
        }
    }

    /// Build a PDF where each entry is one page; `Some(text)` pages carry a
    /// text layer, `None` pages are blank (scanned-like).
    fn build_pdf(pages: &[Option<&str>]) -> Document {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids: Vec<Object> = Vec::new();
        for text in pages {
            let operations = match text {
                Some(t) => vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 12.into()]),
                    Operation::new("Td", vec![50.into(), 700.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*t)]),
                    Operation::new("ET", vec![]),
                ],
                None => vec![],
            };
            let content = Content { operations };
            let content_id =
                doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc
    }

    fn save_pdf(doc: &mut Document, dir: &Path) -> std::path::PathBuf {
        let path = dir.join("order.pdf");
        doc.save(&path).unwrap();
        path
    }

    #[tokio::test]
    async fn direct_text_pdf_skips_detection() {
        let dir = tempfile::tempdir().unwrap();
        let path = save_pdf(&mut build_pdf(&[Some("Hello world")]), dir.path());

        let detector = Arc::new(FakeDetector::stuck());
        let extractor = TextExtractor::new(mem_bucket(), detector.clone(), test_cfg());
        let text = extractor.extract(&path).await;

        assert!(text.contains("Hello world"));
        assert_eq!(detector.started(), 0);
    }

    #[tokio::test]
    async fn encrypted_pdf_returns_empty_without_detection() {
        let dir = tempfile::tempdir().unwrap();
        let mut doc = build_pdf(&[None]);
        doc.trailer.set("Encrypt", Object::Dictionary(dictionary! {}));
        let path = save_pdf(&mut doc, dir.path());

        let bucket = mem_bucket();
        let detector = Arc::new(FakeDetector::stuck());
        let extractor = TextExtractor::new(bucket.clone(), detector.clone(), test_cfg());
        let text = extractor.extract(&path).await;

        assert_eq!(text, "");
        assert_eq!(detector.started(), 0);
        assert!(bucket.list("textract-input/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unparseable_file_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("order.pdf");
        std::fs::write(&path, b"not a pdf at all").unwrap();

        let detector = Arc::new(FakeDetector::stuck());
        let extractor = TextExtractor::new(mem_bucket(), detector.clone(), test_cfg());
        assert_eq!(extractor.extract(&path).await, "");
        assert_eq!(detector.started(), 0);
    }

    #[tokio::test]
    async fn stuck_job_times_out_and_deletes_staged_object() {
        let dir = tempfile::tempdir().unwrap();
        let path = save_pdf(&mut build_pdf(&[None]), dir.path());

        let bucket = mem_bucket();
        let detector = Arc::new(FakeDetector::stuck());
        let extractor = TextExtractor::new(bucket.clone(), detector.clone(), test_cfg());
        let text = extractor.extract(&path).await;

        assert_eq!(text, "");
        assert_eq!(detector.started(), 1);
        assert!(bucket.list("textract-input/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_job_returns_empty_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = save_pdf(&mut build_pdf(&[None]), dir.path());

        let bucket = mem_bucket();
        let detector = Arc::new(FakeDetector::new(vec![page(
            DetectionStatus::Failed,
            &[],
            None,
        )]));
        let extractor = TextExtractor::new(bucket.clone(), detector, test_cfg());

        assert_eq!(extractor.extract(&path).await, "");
        assert!(bucket.list("textract-input/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn successful_detection_joins_lines_across_result_pages() {
        let dir = tempfile::tempdir().unwrap();
        let path = save_pdf(&mut build_pdf(&[None, None]), dir.path());

        let bucket = mem_bucket();
        let detector = Arc::new(FakeDetector::new(vec![
            page(DetectionStatus::InProgress, &[], None),
            page(DetectionStatus::Succeeded, &["first line", "second line"], Some("t1")),
            page(DetectionStatus::Succeeded, &["third line"], None),
        ]));
        let extractor = TextExtractor::new(bucket.clone(), detector.clone(), test_cfg());
        let text = extractor.extract(&path).await;

        assert_eq!(text, "first line\nsecond line\nthird line");
        assert_eq!(detector.started(), 1);
        assert!(bucket.list("textract-input/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn page_count_over_ceiling_aborts_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let blank_pages: Vec<Option<&str>> = vec![None; MAX_PAGES + 1];
        let path = save_pdf(&mut build_pdf(&blank_pages), dir.path());

        let detector = Arc::new(FakeDetector::stuck());
        let extractor = TextExtractor::new(mem_bucket(), detector.clone(), test_cfg());

        assert_eq!(extractor.extract(&path).await, "");
        assert_eq!(detector.started(), 0);
    }

    #[test]
    fn encryption_marker_is_detected() {
        let mut doc = build_pdf(&[None]);
        assert!(!is_encrypted(&doc));
        doc.trailer.set("Encrypt", Object::Dictionary(dictionary! {}));
        assert!(is_encrypted(&doc));
    }
}
