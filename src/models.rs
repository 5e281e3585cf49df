//! Wire types for the print-shop API.

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Account role; fixes which command family is reachable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Shopkeeper,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Shopkeeper => "shopkeeper",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PrintMode {
    #[default]
    Single,
    Double,
}

impl PrintMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Double => "double",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    #[default]
    Bw,
    Color,
}

impl ColorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bw => "bw",
            Self::Color => "color",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, ValueEnum)]
pub enum PaperSize {
    #[default]
    A4,
    Letter,
}

impl PaperSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A4 => "A4",
            Self::Letter => "Letter",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PrintType {
    Private,
    Queue,
}

impl PrintType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Queue => "queue",
        }
    }
}

/// Lifecycle status reported by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Uploaded,
    Pending,
    Downloaded,
    #[serde(other)]
    Unknown,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Downloaded)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Downloaded => "✅ Downloaded",
            _ => "⏳ Pending",
        }
    }
}

/// A coordinate pair as sent to `/shops` and `/register`
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Location {
    pub lat: f64,
    pub long: f64,
}

/// A shopkeeper as seen from the directory
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Shop {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub distance: Option<f64>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub long: Option<f64>,
    #[serde(default)]
    pub address: Option<String>,
}

/// How a job is retrieved at the shop. Exactly one of these exists per job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobTicket {
    Private { code: String },
    Queue { shop_id: i64, queue_position: u32 },
}

impl JobTicket {
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Private { code } => Some(code),
            Self::Queue { .. } => None,
        }
    }

    pub fn queue_position(&self) -> Option<u32> {
        match self {
            Self::Private { .. } => None,
            Self::Queue { queue_position, .. } => Some(*queue_position),
        }
    }
}

/// A print job as listed by `/my-files` and `/queue`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "WireJob")]
pub struct PrintJob {
    pub id: i64,
    pub owner: Option<i64>,
    pub filename: Option<String>,
    pub num_pages: u32,
    pub copies: u32,
    pub print_mode: PrintMode,
    pub color_mode: ColorMode,
    pub paper_size: PaperSize,
    pub ticket: JobTicket,
    pub total_cost: f64,
    pub status: JobStatus,
    pub shop_name: Option<String>,
    pub shop_location: Option<Location>,
    pub created_at: Option<DateTime<Utc>>,
}

fn default_copies() -> u32 {
    1
}

/// Flat shape on the wire, before the ticket invariant is checked
#[derive(Debug, Deserialize)]
struct WireJob {
    id: i64,
    #[serde(default, alias = "owner")]
    user_id: Option<i64>,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    num_pages: u32,
    #[serde(default = "default_copies")]
    copies: u32,
    #[serde(default)]
    print_mode: PrintMode,
    #[serde(default)]
    color_mode: ColorMode,
    #[serde(default)]
    paper_size: PaperSize,
    print_type: PrintType,
    #[serde(default, alias = "unique_code")]
    code: Option<String>,
    #[serde(default)]
    shop_id: Option<i64>,
    #[serde(default)]
    queue_position: Option<u32>,
    #[serde(default)]
    total_cost: f64,
    status: JobStatus,
    #[serde(default)]
    shop_name: Option<String>,
    #[serde(default)]
    shop_lat: Option<f64>,
    #[serde(default)]
    shop_long: Option<f64>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

impl TryFrom<WireJob> for PrintJob {
    type Error = String;

    fn try_from(w: WireJob) -> Result<Self, Self::Error> {
        // The backend writes 0 and "" for columns it leaves unset
        let code = w.code.filter(|c| !c.is_empty());
        let shop_id = w.shop_id.filter(|&id| id != 0);
        let queue_position = w.queue_position.filter(|&p| p != 0);

        let ticket = match w.print_type {
            PrintType::Private => {
                if queue_position.is_some() {
                    return Err(format!("private job {} carries a queue position", w.id));
                }
                match code {
                    Some(code) => JobTicket::Private { code },
                    None => return Err(format!("private job {} has no code", w.id)),
                }
            }
            PrintType::Queue => {
                if code.is_some() {
                    return Err(format!("queue job {} carries a code", w.id));
                }
                match (shop_id, queue_position) {
                    (Some(shop_id), Some(queue_position)) => JobTicket::Queue {
                        shop_id,
                        queue_position,
                    },
                    _ => {
                        return Err(format!(
                            "queue job {} needs both shop_id and queue_position",
                            w.id
                        ))
                    }
                }
            }
        };

        let shop_location = match (w.shop_lat, w.shop_long) {
            (Some(lat), Some(long)) => Some(Location { lat, long }),
            _ => None,
        };

        Ok(PrintJob {
            id: w.id,
            owner: w.user_id,
            filename: w.filename,
            num_pages: w.num_pages,
            copies: w.copies,
            print_mode: w.print_mode,
            color_mode: w.color_mode,
            paper_size: w.paper_size,
            ticket,
            total_cost: w.total_cost,
            status: w.status,
            shop_name: w.shop_name,
            shop_location,
            created_at: w.created_at,
        })
    }
}

/// Reference the shop desk uses to fetch and confirm a document
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JobRef {
    Code(String),
    Queue(i64),
}

impl JobRef {
    pub fn document_path(&self) -> String {
        match self {
            Self::Code(code) => format!("/file/{}", code),
            Self::Queue(id) => format!("/queue/download/{}", id),
        }
    }

    pub fn confirm_path(&self) -> String {
        match self {
            Self::Code(code) => format!("/file/{}/confirm", code),
            Self::Queue(id) => format!("/queue/{}/confirm", id),
        }
    }
}

impl fmt::Display for JobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "code {}", code),
            Self::Queue(id) => write!(f, "queue job {}", id),
        }
    }
}

/// A fetched document, held in memory until it is printed
#[derive(Debug, Clone)]
pub struct Document {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub role: Role,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub role: Role,
    pub lat: f64,
    pub long: f64,
}

/// Raw `/upload` result; `UploadReceipt` is the checked form
#[derive(Debug, Clone, Deserialize)]
pub struct UploadResponse {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub queue_position: Option<u32>,
    #[serde(default)]
    pub num_pages: u32,
    #[serde(default)]
    pub total_cost: f64,
}

#[derive(Debug, Deserialize)]
pub struct StatusResponse {
    pub status: JobStatus,
}

#[derive(Debug, Deserialize)]
pub struct FilesResponse {
    #[serde(default)]
    pub files: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
pub struct QueueResponse {
    #[serde(default)]
    pub queue: Option<Vec<serde_json::Value>>,
}

/// Decode list rows one at a time so a malformed row is dropped, not the list
pub fn decode_jobs(rows: Vec<serde_json::Value>) -> Vec<PrintJob> {
    rows.into_iter()
        .filter_map(|row| match serde_json::from_value::<PrintJob>(row) {
            Ok(job) => Some(job),
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed job row");
                None
            }
        })
        .collect()
}
