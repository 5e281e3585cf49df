use crate::error::{Error, Result};
use crate::history::{HistoryEntry, HistoryResponse};
use crate::models::{
    decode_jobs, Document, FilesResponse, JobRef, JobStatus, Location, LoginResponse, PrintJob,
    QueueResponse, RegisterRequest, Shop, StatusResponse, UploadResponse,
};
use crate::upload::UploadForm;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::io::Read;
use std::time::Duration;

/// Documents larger than this are refused rather than buffered
const MAX_DOCUMENT_BYTES: u64 = 64 * 1024 * 1024;

/// Trait for the print-shop backend to allow mocking in tests
pub trait PrintShopApi: Send + Sync {
    fn login(&self, username: &str, password: &str) -> Result<LoginResponse>;
    fn register(&self, request: &RegisterRequest) -> Result<()>;
    /// Shops nearest first when `near` is given, backend order otherwise
    fn shops(&self, near: Option<Location>) -> Result<Vec<Shop>>;
    fn upload(&self, form: &UploadForm) -> Result<UploadResponse>;
    fn my_files(&self) -> Result<Vec<PrintJob>>;
    fn file_status(&self, code: &str) -> Result<JobStatus>;
    fn fetch_document(&self, job: &JobRef) -> Result<Document>;
    /// Tell the backend printing finished; the server deletes the file
    fn confirm_print(&self, job: &JobRef) -> Result<()>;
    fn queue(&self) -> Result<Vec<PrintJob>>;
    fn shop_history(&self) -> Result<Vec<HistoryEntry>>;
}

pub struct HttpClient {
    base_url: String,
    token: Option<String>,
    timeout: Duration,
    agent: ureq::Agent,
}

impl HttpClient {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
            timeout,
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    fn request(&self, method: &str, path: &str) -> ureq::Request {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(%method, %url, "api request");
        let req = self.agent.request(method, &url);
        match &self.token {
            Some(token) => req.set("Authorization", &format!("Bearer {}", token)),
            None => req,
        }
    }
}

/// Split ureq's error into our taxonomy, keeping the raw body of HTTP errors
fn check(result: std::result::Result<ureq::Response, ureq::Error>) -> Result<ureq::Response> {
    match result {
        Ok(r) => Ok(r),
        Err(ureq::Error::Status(code, resp)) => {
            let body = resp.into_string().unwrap_or_default();
            tracing::debug!(code, %body, "api error response");
            Err(Error::from_status(code, body))
        }
        Err(ureq::Error::Transport(t)) => Err(Error::Connect(t.to_string())),
    }
}

fn decode<T: DeserializeOwned>(resp: ureq::Response) -> Result<T> {
    resp.into_json().map_err(|e| Error::Decode(e.to_string()))
}

impl PrintShopApi for HttpClient {
    fn login(&self, username: &str, password: &str) -> Result<LoginResponse> {
        let resp = check(
            self.request("POST", "/login")
                .send_json(json!({ "username": username, "password": password })),
        )?;
        decode(resp)
    }

    fn register(&self, request: &RegisterRequest) -> Result<()> {
        check(self.request("POST", "/register").send_json(serde_json::to_value(request)?))?;
        Ok(())
    }

    fn shops(&self, near: Option<Location>) -> Result<Vec<Shop>> {
        let mut req = self.request("GET", "/shops");
        if let Some(loc) = near {
            req = req
                .query("lat", &loc.lat.to_string())
                .query("long", &loc.long.to_string());
        }
        // The backend encodes an empty list as null
        let shops: Option<Vec<Shop>> = decode(check(req.call())?)?;
        Ok(shops.unwrap_or_default())
    }

    // ureq 2 has no multipart encoder, so the upload goes through reqwest
    fn upload(&self, form: &UploadForm) -> Result<UploadResponse> {
        let url = format!("{}/upload", self.base_url);
        tracing::debug!(%url, file = %form.file_name, bytes = form.bytes.len(), "api upload");
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| Error::Connect(e.to_string()))?;

        let mut req = client.post(&url).multipart(form.to_multipart()?);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().map_err(|e| Error::Connect(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            tracing::debug!(code = status.as_u16(), %body, "api error response");
            return Err(Error::from_status(status.as_u16(), body));
        }
        resp.json().map_err(|e| Error::Decode(e.to_string()))
    }

    fn my_files(&self) -> Result<Vec<PrintJob>> {
        let body: FilesResponse = decode(check(self.request("GET", "/my-files").call())?)?;
        Ok(decode_jobs(body.files.unwrap_or_default()))
    }

    fn file_status(&self, code: &str) -> Result<JobStatus> {
        let path = format!("/file/{}/status", code);
        let body: StatusResponse = decode(check(self.request("GET", &path).call())?)?;
        Ok(body.status)
    }

    fn fetch_document(&self, job: &JobRef) -> Result<Document> {
        let resp = check(self.request("GET", &job.document_path()).call())?;
        let content_type = resp.header("content-type").map(str::to_string);

        let mut bytes = Vec::new();
        resp.into_reader()
            .take(MAX_DOCUMENT_BYTES + 1)
            .read_to_end(&mut bytes)
            .map_err(|e| Error::Connect(e.to_string()))?;
        if bytes.len() as u64 > MAX_DOCUMENT_BYTES {
            return Err(Error::Decode(format!(
                "document exceeds {} bytes",
                MAX_DOCUMENT_BYTES
            )));
        }
        tracing::info!(%job, bytes = bytes.len(), "fetched document");

        Ok(Document {
            bytes,
            content_type,
        })
    }

    fn confirm_print(&self, job: &JobRef) -> Result<()> {
        check(self.request("POST", &job.confirm_path()).call())?;
        Ok(())
    }

    fn queue(&self) -> Result<Vec<PrintJob>> {
        let body: QueueResponse = decode(check(self.request("GET", "/queue").call())?)?;
        Ok(decode_jobs(body.queue.unwrap_or_default()))
    }

    fn shop_history(&self) -> Result<Vec<HistoryEntry>> {
        let body: HistoryResponse = decode(check(self.request("GET", "/shop/history").call())?)?;
        Ok(body.history.unwrap_or_default())
    }
}

#[cfg(test)]
pub mod fake {
    //! In-memory backend shared by the module tests.

    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeApi {
        pub shops: Vec<Shop>,
        pub shops_fail: bool,
        pub upload_response: Mutex<Option<Result<UploadResponse>>>,
        pub uploads: AtomicUsize,
        pub last_upload: Mutex<Option<UploadForm>>,
        pub statuses: Mutex<HashMap<String, VecDeque<Result<JobStatus>>>>,
        pub status_calls: Mutex<HashMap<String, usize>>,
        pub documents: Mutex<HashMap<JobRef, Result<Document>>>,
        pub fetches: AtomicUsize,
        pub confirms: Mutex<Vec<JobRef>>,
        pub confirm_fails: bool,
        pub queue: Mutex<Vec<PrintJob>>,
        pub queue_calls: AtomicUsize,
        pub files: Vec<PrintJob>,
        pub files_fail: bool,
        pub files_calls: AtomicUsize,
        pub history: Vec<HistoryEntry>,
    }

    impl FakeApi {
        pub fn script_status(&self, code: &str, steps: Vec<Result<JobStatus>>) {
            self.statuses
                .lock()
                .unwrap()
                .insert(code.to_string(), steps.into());
        }

        pub fn status_calls(&self, code: &str) -> usize {
            *self.status_calls.lock().unwrap().get(code).unwrap_or(&0)
        }

        pub fn add_document(&self, job: JobRef, result: Result<Document>) {
            self.documents.lock().unwrap().insert(job, result);
        }

        pub fn confirm_count(&self) -> usize {
            self.confirms.lock().unwrap().len()
        }
    }

    impl PrintShopApi for FakeApi {
        fn login(&self, username: &str, password: &str) -> Result<LoginResponse> {
            if password == "secret" {
                Ok(LoginResponse {
                    token: format!("token-{}", username),
                    role: crate::models::Role::Customer,
                    username: None,
                })
            } else {
                Err(Error::from_status(401, "Invalid credentials".to_string()))
            }
        }

        fn register(&self, _request: &RegisterRequest) -> Result<()> {
            Ok(())
        }

        fn shops(&self, _near: Option<Location>) -> Result<Vec<Shop>> {
            if self.shops_fail {
                return Err(Error::Connect("refused".to_string()));
            }
            Ok(self.shops.clone())
        }

        fn upload(&self, form: &UploadForm) -> Result<UploadResponse> {
            self.uploads.fetch_add(1, Ordering::SeqCst);
            *self.last_upload.lock().unwrap() = Some(form.clone());
            self.upload_response
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Err(Error::Decode("no scripted upload".to_string())))
        }

        fn my_files(&self) -> Result<Vec<PrintJob>> {
            self.files_calls.fetch_add(1, Ordering::SeqCst);
            if self.files_fail {
                return Err(Error::Connect("refused".to_string()));
            }
            Ok(self.files.clone())
        }

        fn file_status(&self, code: &str) -> Result<JobStatus> {
            *self
                .status_calls
                .lock()
                .unwrap()
                .entry(code.to_string())
                .or_insert(0) += 1;
            let mut statuses = self.statuses.lock().unwrap();
            match statuses.get_mut(code) {
                Some(steps) if steps.len() > 1 => steps.pop_front().unwrap(),
                Some(steps) => match steps.front() {
                    Some(Ok(status)) => Ok(*status),
                    Some(Err(_)) => Err(Error::NotFound),
                    None => Err(Error::NotFound),
                },
                None => Err(Error::NotFound),
            }
        }

        fn fetch_document(&self, job: &JobRef) -> Result<Document> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            match self.documents.lock().unwrap().remove(job) {
                Some(result) => result,
                None => Err(Error::NotFound),
            }
        }

        fn confirm_print(&self, job: &JobRef) -> Result<()> {
            if self.confirm_fails {
                return Err(Error::from_status(500, "Database error".to_string()));
            }
            self.confirms.lock().unwrap().push(job.clone());
            Ok(())
        }

        fn queue(&self) -> Result<Vec<PrintJob>> {
            self.queue_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.queue.lock().unwrap().clone())
        }

        fn shop_history(&self) -> Result<Vec<HistoryEntry>> {
            Ok(self.history.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = HttpClient::new("http://localhost:8080/", Duration::from_secs(1));
        assert_eq!(client.base_url, "http://localhost:8080");
    }

    #[test]
    fn test_unreachable_backend_is_connectivity_error() {
        // Grab a free port, then release it so nothing is listening there
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = HttpClient::new(&format!("http://{}", addr), Duration::from_millis(500));
        let err = client.file_status("AB12CD").unwrap_err();
        assert!(err.is_connectivity());
    }

    #[test]
    fn test_upload_to_unreachable_backend_is_connectivity_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = HttpClient::new(&format!("http://{}", addr), Duration::from_millis(500));
        let form = UploadForm {
            file_name: "a.pdf".to_string(),
            content_type: "application/pdf",
            bytes: b"%PDF-1.4".to_vec(),
            fields: vec![("print_type", "private".to_string())],
        };
        assert!(client.upload(&form).unwrap_err().is_connectivity());
    }
}
