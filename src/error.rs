//! Error types for talking to the print-shop API.

use thiserror::Error;

pub const CONNECT_MESSAGE: &str = "Cannot connect to server. Is the backend running?";

/// Errors surfaced by the API client and the local workflows built on it.
#[derive(Debug, Error)]
pub enum Error {
    /// Rejected locally before any request was made.
    #[error("{0}")]
    Validation(String),

    /// The requested code or job does not exist (HTTP 404).
    #[error("not found")]
    NotFound,

    /// The file was already printed and removed (HTTP 410).
    #[error("gone: already processed")]
    Gone,

    /// Missing or rejected credential (HTTP 401/403).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Any other non-2xx response. `body` is the raw payload.
    #[error("API error {code}: {body}")]
    Status { code: u16, body: String },

    /// No response at all.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The local print command failed or could not be started.
    #[error("print failed: {0}")]
    Print(String),

    /// The server answered with something we could not make sense of.
    #[error("unexpected response: {0}")]
    Decode(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Map an HTTP status and body to the matching variant.
    pub fn from_status(code: u16, body: String) -> Self {
        match code {
            404 => Self::NotFound,
            410 => Self::Gone,
            401 | 403 => Self::Unauthorized(body.trim().to_string()),
            _ => Self::Status { code, body },
        }
    }

    /// Text shown to the person at the terminal.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(msg) => msg.clone(),
            Self::NotFound => "❌ File not found.".to_string(),
            Self::Gone => "⚠️ File already processed/deleted.".to_string(),
            Self::Unauthorized(body) if body.is_empty() => {
                "Session rejected by server. Run `printdrop login` again.".to_string()
            }
            Self::Unauthorized(body) => format!(
                "Session rejected by server ({}). Run `printdrop login` again.",
                body
            ),
            Self::Status { body, .. } => body.trim().to_string(),
            Self::Connect(_) => CONNECT_MESSAGE.to_string(),
            Self::Print(msg) => format!("❌ Print failed: {}", msg),
            Self::Decode(msg) => format!("Unexpected response from server: {}", msg),
            Self::Io(e) => format!("I/O error: {}", e),
            Self::Json(e) => format!("Invalid data: {}", e),
        }
    }

    /// True when the request never reached the server.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connect(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_maps_known_codes() {
        assert!(matches!(Error::from_status(404, String::new()), Error::NotFound));
        assert!(matches!(Error::from_status(410, String::new()), Error::Gone));
        assert!(matches!(
            Error::from_status(401, "bad token\n".to_string()),
            Error::Unauthorized(ref b) if b == "bad token"
        ));
        assert!(matches!(
            Error::from_status(500, "boom".to_string()),
            Error::Status { code: 500, .. }
        ));
    }

    #[test]
    fn test_user_messages() {
        assert_eq!(
            Error::Gone.user_message(),
            "⚠️ File already processed/deleted."
        );
        assert_eq!(Error::NotFound.user_message(), "❌ File not found.");
        assert_eq!(
            Error::Connect("refused".to_string()).user_message(),
            CONNECT_MESSAGE
        );
        let err = Error::Status {
            code: 400,
            body: "Error retrieving file\n".to_string(),
        };
        assert_eq!(err.user_message(), "Error retrieving file");
        assert_eq!(err.to_string(), "API error 400: Error retrieving file\n");
    }
}
