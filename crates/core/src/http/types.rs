//! Request/response types for the HTTP transport.

use async_trait::async_trait;
use thiserror::Error;

/// Header every OpenRosa endpoint expects.
pub const OPENROSA_VERSION_HEADER: &str = "X-OpenRosa-Version";
pub const OPENROSA_VERSION: &str = "1.0";

/// Errors that can occur while executing a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HttpError {
    #[error("Redirected ({status} {phrase})")]
    Redirection { status: u16, phrase: String },

    #[error("Unauthorized ({status} {phrase})")]
    Unauthorized { status: u16, phrase: String },

    #[error("Not found ({status} {phrase})")]
    NotFound { status: u16, phrase: String },

    #[error("Unexpected response ({status} {phrase})")]
    Status { status: u16, phrase: String },

    #[error("Request timeout")]
    Timeout,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl HttpError {
    /// HTTP status code, when the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Redirection { status, .. }
            | Self::Unauthorized { status, .. }
            | Self::NotFound { status, .. }
            | Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Reason phrase that came with the status code.
    pub fn phrase(&self) -> Option<&str> {
        match self {
            Self::Redirection { phrase, .. }
            | Self::Unauthorized { phrase, .. }
            | Self::NotFound { phrase, .. }
            | Self::Status { phrase, .. } => Some(phrase),
            _ => None,
        }
    }
}

/// A `GET` request against the remote server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl Request {
    /// Plain `GET` with the OpenRosa version header.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: vec![(
                OPENROSA_VERSION_HEADER.to_string(),
                OPENROSA_VERSION.to_string(),
            )],
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// A response with its body fully read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: u16,
    phrase: String,
    body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16, phrase: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            status,
            phrase: phrase.into(),
            body,
        }
    }

    /// Response with the canonical reason phrase for `status`.
    pub fn with_status(status: u16, body: impl Into<Vec<u8>>) -> Self {
        let phrase = reqwest::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("Unknown")
            .to_string();
        Self::new(status, phrase, body.into())
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn phrase(&self) -> &str {
        &self.phrase
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_redirection(&self) -> bool {
        (300..400).contains(&self.status)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == 401
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Turn any non-success response into the matching [`HttpError`].
    pub fn error_for_status(self) -> Result<Response, HttpError> {
        let status = self.status;
        let phrase = self.phrase.clone();
        if self.is_success() {
            Ok(self)
        } else if self.is_redirection() {
            Err(HttpError::Redirection { status, phrase })
        } else if self.is_unauthorized() {
            Err(HttpError::Unauthorized { status, phrase })
        } else if self.is_not_found() {
            Err(HttpError::NotFound { status, phrase })
        } else {
            Err(HttpError::Status { status, phrase })
        }
    }
}

/// Executes requests against the remote server.
#[async_trait]
pub trait Http: Send + Sync {
    /// Execute `request` and read the whole body.
    ///
    /// Non-success statuses are returned as responses, not errors; callers
    /// classify them with [`Response::error_for_status`].
    async fn execute(&self, request: Request) -> Result<Response, HttpError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_carries_openrosa_header() {
        let request = Request::get("http://localhost/formXml").with_header("Accept", "text/xml");
        assert_eq!(request.headers.len(), 2);
        assert_eq!(request.headers[0].0, OPENROSA_VERSION_HEADER);
        assert_eq!(request.headers[1], ("Accept".to_string(), "text/xml".to_string()));
    }

    #[test]
    fn test_response_classification() {
        assert!(Response::with_status(200, "ok").error_for_status().is_ok());
        assert!(matches!(
            Response::with_status(302, "").error_for_status(),
            Err(HttpError::Redirection { status: 302, .. })
        ));
        assert!(matches!(
            Response::with_status(401, "").error_for_status(),
            Err(HttpError::Unauthorized { status: 401, .. })
        ));
        assert!(matches!(
            Response::with_status(404, "").error_for_status(),
            Err(HttpError::NotFound { status: 404, .. })
        ));
        assert!(matches!(
            Response::with_status(500, "").error_for_status(),
            Err(HttpError::Status { status: 500, .. })
        ));
    }

    #[test]
    fn test_canonical_phrase() {
        let response = Response::with_status(404, Vec::new());
        assert_eq!(response.phrase(), "Not Found");

        let err = response.error_for_status().unwrap_err();
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.phrase(), Some("Not Found"));
        assert_eq!(err.to_string(), "Not found (404 Not Found)");
    }

    #[test]
    fn test_transport_errors_have_no_status() {
        assert_eq!(HttpError::Timeout.status(), None);
        assert_eq!(HttpError::ConnectionFailed("refused".into()).phrase(), None);
    }
}
