//! Upload submission: validation, form encoding and the split receipt.

use crate::api::PrintShopApi;
use crate::error::{Error, Result};
use crate::models::{ColorMode, PaperSize, PrintJob, PrintMode, PrintType, UploadResponse};
use reqwest::blocking::multipart::{Form, Part};
use std::path::{Path, PathBuf};

pub const MIN_COPIES: u32 = 1;
pub const MAX_COPIES: u32 = 100;

/// Print settings chosen by the customer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrintOptions {
    pub copies: u32,
    pub print_mode: PrintMode,
    pub color_mode: ColorMode,
    pub paper_size: PaperSize,
}

impl Default for PrintOptions {
    fn default() -> Self {
        Self {
            copies: 1,
            print_mode: PrintMode::Single,
            color_mode: ColorMode::Bw,
            paper_size: PaperSize::A4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub file: PathBuf,
    pub options: PrintOptions,
    pub print_type: PrintType,
    /// Required for queue prints, ignored for private ones
    pub shop_id: Option<i64>,
}

impl UploadRequest {
    /// Check everything that can be checked without the network
    pub fn validate(&self) -> Result<()> {
        if !self.file.is_file() {
            return Err(Error::Validation(format!(
                "Please choose a file to upload ({} not found)",
                self.file.display()
            )));
        }
        if !(MIN_COPIES..=MAX_COPIES).contains(&self.options.copies) {
            return Err(Error::Validation(format!(
                "Copies must be between {} and {}, got {}",
                MIN_COPIES, MAX_COPIES, self.options.copies
            )));
        }
        if self.print_type == PrintType::Queue && self.shop_id.is_none() {
            return Err(Error::Validation(
                "Please select a shop for queue print".to_string(),
            ));
        }
        Ok(())
    }

    /// Collect the `/upload` form fields
    pub fn to_form(&self) -> Result<UploadForm> {
        let bytes = std::fs::read(&self.file)?;
        let file_name = self
            .file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "document.pdf".to_string());

        let mut fields = vec![
            ("print_type", self.print_type.as_str().to_string()),
            ("copies", self.options.copies.to_string()),
            ("print_mode", self.options.print_mode.as_str().to_string()),
            ("color_mode", self.options.color_mode.as_str().to_string()),
            ("paper_size", self.options.paper_size.as_str().to_string()),
        ];
        match (self.print_type, self.shop_id) {
            (PrintType::Queue, Some(shop_id)) => fields.push(("shop_id", shop_id.to_string())),
            (PrintType::Private, Some(shop_id)) => {
                tracing::debug!(shop_id, "ignoring shop for private print");
            }
            _ => {}
        }

        Ok(UploadForm {
            file_name,
            content_type: content_type_for(&self.file),
            bytes,
            fields,
        })
    }
}

fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// What the customer gets back: a pickup code or a place in a shop's queue
#[derive(Debug, Clone, PartialEq)]
pub enum UploadReceipt {
    Private {
        code: String,
        num_pages: u32,
        total_cost: f64,
    },
    Queue {
        queue_position: u32,
        num_pages: u32,
        total_cost: f64,
    },
}

impl UploadReceipt {
    /// Keep only the field the print type calls for
    pub fn from_response(print_type: PrintType, resp: UploadResponse) -> Result<Self> {
        match print_type {
            PrintType::Private => match resp.code {
                Some(code) if !code.is_empty() => Ok(Self::Private {
                    code,
                    num_pages: resp.num_pages,
                    total_cost: resp.total_cost,
                }),
                _ => Err(Error::Decode("upload response has no code".to_string())),
            },
            PrintType::Queue => match resp.queue_position {
                Some(queue_position) => Ok(Self::Queue {
                    queue_position,
                    num_pages: resp.num_pages,
                    total_cost: resp.total_cost,
                }),
                None => Err(Error::Decode(
                    "upload response has no queue position".to_string(),
                )),
            },
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Private { code, .. } => Some(code),
            Self::Queue { .. } => None,
        }
    }

    pub fn queue_position(&self) -> Option<u32> {
        match self {
            Self::Private { .. } => None,
            Self::Queue { queue_position, .. } => Some(*queue_position),
        }
    }

    pub fn num_pages(&self) -> u32 {
        match self {
            Self::Private { num_pages, .. } | Self::Queue { num_pages, .. } => *num_pages,
        }
    }

    pub fn total_cost(&self) -> f64 {
        match self {
            Self::Private { total_cost, .. } | Self::Queue { total_cost, .. } => *total_cost,
        }
    }
}

/// Validate, encode and send. Nothing goes over the wire if validation fails.
pub fn submit(api: &dyn PrintShopApi, request: &UploadRequest) -> Result<UploadReceipt> {
    request.validate()?;
    let form = request.to_form()?;
    tracing::info!(
        file = %request.file.display(),
        print_type = request.print_type.as_str(),
        copies = request.options.copies,
        "uploading"
    );
    let resp = api.upload(&form)?;
    UploadReceipt::from_response(request.print_type, resp)
}

/// Submit, then reload the customer's file list. A failed reload is logged
/// and leaves the list out; the upload itself already succeeded.
pub fn submit_and_refresh(
    api: &dyn PrintShopApi,
    request: &UploadRequest,
) -> Result<(UploadReceipt, Option<Vec<PrintJob>>)> {
    let receipt = submit(api, request)?;
    let files = match api.my_files() {
        Ok(files) => Some(files),
        Err(e) => {
            tracing::warn!(error = %e, "failed to refresh files after upload");
            None
        }
    };
    Ok((receipt, files))
}

/// The `/upload` form before encoding
#[derive(Debug, Clone, PartialEq)]
pub struct UploadForm {
    pub file_name: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
    pub fields: Vec<(&'static str, String)>,
}

impl UploadForm {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Encode as `multipart/form-data`, the document under `file`
    pub fn to_multipart(&self) -> Result<Form> {
        let part = Part::bytes(self.bytes.clone())
            .file_name(self.file_name.clone())
            .mime_str(self.content_type)
            .map_err(|e| Error::Validation(format!("bad content type: {}", e)))?;
        let form = self
            .fields
            .iter()
            .fold(Form::new(), |form, (name, value)| form.text(*name, value.clone()));
        Ok(form.part("file", part))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::FakeApi;
    use std::sync::atomic::Ordering;

    fn pdf(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("a.pdf");
        std::fs::write(&path, b"%PDF-1.4 test").unwrap();
        path
    }

    fn request(file: PathBuf, print_type: PrintType, shop_id: Option<i64>) -> UploadRequest {
        UploadRequest {
            file,
            options: PrintOptions {
                copies: 2,
                ..PrintOptions::default()
            },
            print_type,
            shop_id,
        }
    }

    #[test]
    fn test_queue_without_shop_never_reaches_network() {
        let dir = tempfile::tempdir().unwrap();
        let api = FakeApi::default();
        let err = submit(&api, &request(pdf(&dir), PrintType::Queue, None)).unwrap_err();
        assert!(matches!(err, Error::Validation(ref m) if m.contains("select a shop")));
        assert_eq!(api.uploads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_missing_file_rejected_locally() {
        let dir = tempfile::tempdir().unwrap();
        let api = FakeApi::default();
        let req = request(dir.path().join("nope.pdf"), PrintType::Private, None);
        assert!(matches!(submit(&api, &req), Err(Error::Validation(_))));
        assert_eq!(api.uploads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_copies_out_of_range_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut req = request(pdf(&dir), PrintType::Private, None);
        req.options.copies = 0;
        assert!(req.validate().is_err());
        req.options.copies = 101;
        assert!(req.validate().is_err());
        req.options.copies = 100;
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_private_upload_yields_code_only() {
        let dir = tempfile::tempdir().unwrap();
        let api = FakeApi::default();
        *api.upload_response.lock().unwrap() = Some(Ok(UploadResponse {
            code: Some("AB12CD".to_string()),
            queue_position: None,
            num_pages: 3,
            total_cost: 6.0,
        }));

        let receipt = submit(&api, &request(pdf(&dir), PrintType::Private, None)).unwrap();
        assert_eq!(receipt.code(), Some("AB12CD"));
        assert_eq!(receipt.queue_position(), None);
        assert_eq!(receipt.num_pages(), 3);
        assert_eq!(receipt.total_cost(), 6.0);

        let form = api.last_upload.lock().unwrap().clone().unwrap();
        assert_eq!(form.file_name, "a.pdf");
        assert_eq!(form.content_type, "application/pdf");
        assert_eq!(form.bytes, b"%PDF-1.4 test");
        assert_eq!(form.field("print_type"), Some("private"));
        assert_eq!(form.field("copies"), Some("2"));
        assert_eq!(form.field("shop_id"), None);
    }

    #[test]
    fn test_queue_upload_yields_position_only() {
        let dir = tempfile::tempdir().unwrap();
        let api = FakeApi::default();
        *api.upload_response.lock().unwrap() = Some(Ok(UploadResponse {
            code: None,
            queue_position: Some(3),
            num_pages: 1,
            total_cost: 2.0,
        }));

        let receipt = submit(&api, &request(pdf(&dir), PrintType::Queue, Some(5))).unwrap();
        assert_eq!(receipt.queue_position(), Some(3));
        assert_eq!(receipt.code(), None);

        let form = api.last_upload.lock().unwrap().clone().unwrap();
        assert_eq!(form.field("shop_id"), Some("5"));
        assert_eq!(form.field("print_type"), Some("queue"));
    }

    #[test]
    fn test_server_error_is_surfaced_raw() {
        let dir = tempfile::tempdir().unwrap();
        let api = FakeApi::default();
        *api.upload_response.lock().unwrap() =
            Some(Err(Error::from_status(400, "Error retrieving file".to_string())));
        let err = submit(&api, &request(pdf(&dir), PrintType::Private, None)).unwrap_err();
        assert_eq!(err.user_message(), "Error retrieving file");
        assert_eq!(api.uploads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_receipt_requires_matching_field() {
        let resp = UploadResponse {
            code: None,
            queue_position: Some(1),
            num_pages: 1,
            total_cost: 1.0,
        };
        assert!(UploadReceipt::from_response(PrintType::Private, resp).is_err());
    }

    #[test]
    fn test_successful_upload_reloads_files_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut api = FakeApi::default();
        api.files = vec![serde_json::from_value(serde_json::json!({
            "id": 1, "filename": "a.pdf", "print_type": "private", "code": "AB12CD",
            "status": "uploaded", "num_pages": 3, "total_cost": 6.0
        }))
        .unwrap()];
        *api.upload_response.lock().unwrap() = Some(Ok(UploadResponse {
            code: Some("AB12CD".to_string()),
            queue_position: None,
            num_pages: 3,
            total_cost: 6.0,
        }));

        let (receipt, files) =
            submit_and_refresh(&api, &request(pdf(&dir), PrintType::Private, None)).unwrap();
        assert_eq!(receipt.code(), Some("AB12CD"));
        assert_eq!(files.map(|f| f.len()), Some(1));
        assert_eq!(api.files_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_file_reload_keeps_receipt() {
        let dir = tempfile::tempdir().unwrap();
        let api = FakeApi {
            files_fail: true,
            ..FakeApi::default()
        };
        *api.upload_response.lock().unwrap() = Some(Ok(UploadResponse {
            code: None,
            queue_position: Some(2),
            num_pages: 1,
            total_cost: 2.0,
        }));

        let (receipt, files) =
            submit_and_refresh(&api, &request(pdf(&dir), PrintType::Queue, Some(5))).unwrap();
        assert_eq!(receipt.queue_position(), Some(2));
        assert!(files.is_none());
        assert_eq!(api.files_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_rejected_upload_skips_file_reload() {
        let dir = tempfile::tempdir().unwrap();
        let api = FakeApi::default();
        assert!(submit_and_refresh(&api, &request(pdf(&dir), PrintType::Queue, None)).is_err());
        assert_eq!(api.uploads.load(Ordering::SeqCst), 0);
        assert_eq!(api.files_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_form_encodes_as_multipart() {
        let dir = tempfile::tempdir().unwrap();
        let form = request(pdf(&dir), PrintType::Private, None).to_form().unwrap();
        let multipart = form.to_multipart().unwrap();
        assert!(!multipart.boundary().is_empty());
    }
}
