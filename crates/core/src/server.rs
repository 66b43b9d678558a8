//! Aggregate server descriptor.
//!
//! Builds the typed requests of the Aggregate "briefcase" API. The transport
//! itself lives behind [`crate::http::Http`].

use thiserror::Error;

use crate::cursor::Cursor;
use crate::http::Request;

/// A server document that could not be understood.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Malformed {document} document: {reason}")]
pub struct ProtocolError {
    pub document: &'static str,
    pub reason: String,
}

impl ProtocolError {
    pub fn new(document: &'static str, reason: impl Into<String>) -> Self {
        Self {
            document,
            reason: reason.into(),
        }
    }
}

/// Remote Aggregate-compatible server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateServer {
    base_url: String,
}

impl AggregateServer {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Get the base URL without trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Form definition XML.
    pub fn form_xml(&self, form_id: &str) -> Request {
        Request::get(format!(
            "{}/formXml?formId={}",
            self.base_url,
            urlencoding::encode(form_id)
        ))
    }

    /// Manifest listing the form's media attachments.
    pub fn manifest(&self, form_id: &str) -> Request {
        Request::get(format!(
            "{}/xformsManifest?formId={}",
            self.base_url,
            urlencoding::encode(form_id)
        ))
    }

    /// One page of instance ids after `cursor`.
    pub fn instance_id_batch(
        &self,
        form_id: &str,
        page_size: u32,
        cursor: &Cursor,
        include_incomplete: bool,
    ) -> Request {
        Request::get(format!(
            "{}/view/submissionList?formId={}&cursor={}&numEntries={}&includeIncomplete={}",
            self.base_url,
            urlencoding::encode(form_id),
            urlencoding::encode(cursor.value()),
            page_size,
            include_incomplete
        ))
    }

    /// A single submission, addressed by its server key.
    pub fn submission(&self, submission_key: &str) -> Request {
        Request::get(format!(
            "{}/view/downloadSubmission?formId={}",
            self.base_url,
            urlencoding::encode(submission_key)
        ))
    }

    /// Raw download of an attachment URL as given by the server.
    pub fn download(&self, url: &str) -> Request {
        Request::get(url)
    }
}
