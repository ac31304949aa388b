//! File intake and invoice field extraction
//!
//! Uploaded documents go to a [`FileStore`] and are offered to an
//! [`Extractor`]. Both are trait seams: production wires object storage and
//! an OCR or fiscal-XML service behind them, tests and demos use the
//! in-memory implementations here. Extraction is best-effort; a failing
//! extractor never loses the uploaded file.
use crate::invoice::TimeStamp;
use crate::utils;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;

/// Content types accepted for upload.
pub const ALLOWED_FILE_TYPES: &[&str] = &[
    "application/pdf",
    "text/xml",
    "application/xml",
    "image/png",
    "image/jpeg",
];

/// An uploaded document as handed to the service.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub content_type: String,
}

impl FileUpload {
    pub fn new(bytes: Vec<u8>, file_name: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            bytes,
            file_name: file_name.into(),
            content_type: content_type.into(),
        }
    }
}

/// Lowercased extension of the original file name, `bin` when absent.
pub fn file_extension(file_name: &str) -> String {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
        .unwrap_or_else(|| "bin".to_string())
}

/// What the service tells an extractor about the stored document.
#[derive(Debug, Clone)]
pub struct ExtractionRequest<'a> {
    pub file_url: &'a str,
    pub file_type: &'a str,
    pub company_id: &'a str,
    pub user_id: &'a str,
}

/// Fields an extractor managed to read out of the document. Everything is
/// optional; amounts are minor units.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedFields {
    #[n(0)]
    pub invoice_number: Option<String>,
    #[n(1)]
    pub invoice_series: Option<String>,
    #[n(2)]
    pub supplier_name: Option<String>,
    #[n(3)]
    pub supplier_tax_id: Option<String>,
    #[n(4)]
    pub total_amount: Option<u64>,
    #[n(5)]
    pub tax_amount: Option<u64>,
    #[n(6)]
    pub invoice_date: Option<TimeStamp<Utc>>,
    #[n(7)]
    pub due_date: Option<TimeStamp<Utc>>,
    #[n(8)]
    pub description: Option<String>,
}

pub trait Extractor: Send + Sync {
    /// Try to read invoice fields from a stored document. `Ok(None)` means
    /// no extraction backend responded; an `Err` means the backend failed.
    fn extract(&self, request: &ExtractionRequest) -> anyhow::Result<Option<ExtractedFields>>;
}

/// Default extractor: no backend configured.
pub struct NullExtractor;

impl Extractor for NullExtractor {
    fn extract(&self, _request: &ExtractionRequest) -> anyhow::Result<Option<ExtractedFields>> {
        Ok(None)
    }
}

/// Always answers with the same fields. For tests and demos.
pub struct StaticExtractor {
    fields: ExtractedFields,
}

impl StaticExtractor {
    pub fn new(fields: ExtractedFields) -> Self {
        Self { fields }
    }
}

impl Extractor for StaticExtractor {
    fn extract(&self, _request: &ExtractionRequest) -> anyhow::Result<Option<ExtractedFields>> {
        Ok(Some(self.fields.clone()))
    }
}

/// Always fails. For exercising the error path.
pub struct FailingExtractor {
    message: String,
}

impl FailingExtractor {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Extractor for FailingExtractor {
    fn extract(&self, _request: &ExtractionRequest) -> anyhow::Result<Option<ExtractedFields>> {
        Err(anyhow::anyhow!("{}", self.message))
    }
}

pub trait FileStore: Send + Sync {
    /// Persist the document and return a stable URL for it.
    fn put(&self, bytes: &[u8], content_type: &str, original_name: &str)
    -> anyhow::Result<String>;
}

/// Keeps documents in a map, addressed by the content hash. The returned
/// URLs use a `mem://` scheme so they are recognisable in logs and tests.
#[derive(Default)]
pub struct MemoryFileStore {
    objects: Mutex<HashMap<String, (String, Vec<u8>)>>,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retrieve a stored document by the URL `put` returned.
    pub fn get(&self, url: &str) -> Option<(String, Vec<u8>)> {
        self.objects.lock().ok()?.get(url).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FileStore for MemoryFileStore {
    fn put(
        &self,
        bytes: &[u8],
        content_type: &str,
        original_name: &str,
    ) -> anyhow::Result<String> {
        let digest = sha256::digest(bytes);
        let url = format!(
            "mem://invoices/{}.{}",
            &digest[..16],
            file_extension(original_name)
        );
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| anyhow::anyhow!("file store lock poisoned"))?;
        objects.insert(url.clone(), (content_type.to_string(), bytes.to_vec()));
        Ok(url)
    }
}

/// Lifecycle of one extraction attempt.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStatus {
    /// Document stored, still waiting for a backend to answer
    #[n(0)]
    Processing,
    #[n(1)]
    Completed,
    #[n(2)]
    Error,
}

impl ExtractionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionStatus::Processing => "processing",
            ExtractionStatus::Completed => "completed",
            ExtractionStatus::Error => "error",
        }
    }
}

/// Record of one extraction attempt against one stored document.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ExtractionLog {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub company_id: String,
    #[n(2)]
    pub file_url: String,
    #[n(3)]
    pub file_type: String,
    #[n(4)]
    pub status: ExtractionStatus,
    #[n(5)]
    pub parsed: Option<ExtractedFields>,
    #[n(6)]
    pub error_message: Option<String>,
    #[n(7)]
    pub processing_time_ms: Option<u64>,
    #[n(8)]
    pub created_at: TimeStamp<Utc>,
}

impl ExtractionLog {
    pub fn processing(company_id: &str, file_url: &str, file_type: &str) -> Self {
        Self {
            id: utils::extraction_id(),
            company_id: company_id.to_string(),
            file_url: file_url.to_string(),
            file_type: file_type.to_string(),
            status: ExtractionStatus::Processing,
            parsed: None,
            error_message: None,
            processing_time_ms: None,
            created_at: TimeStamp::new(),
        }
    }

    pub fn complete(&mut self, fields: ExtractedFields, elapsed_ms: u64) {
        self.status = ExtractionStatus::Completed;
        self.parsed = Some(fields);
        self.processing_time_ms = Some(elapsed_ms);
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = ExtractionStatus::Error;
        self.error_message = Some(message.into());
    }
}
