//! Error types for the pull protocol.

use thiserror::Error;

use crate::form::FormError;
use crate::http::HttpError;
use crate::index::IndexError;
use crate::server::ProtocolError;
use crate::storage::StorageError;

/// Errors that can occur while pulling a form.
#[derive(Debug, Error)]
pub enum PullError {
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Form(#[from] FormError),

    /// The form definition could not be downloaded, so no submission key
    /// can be built.
    #[error("Form definition of {form_id} is unavailable")]
    FormUnavailable { form_id: String },

    /// The runner was cancelled before the request was sent.
    #[error("Cancelled before the request was sent")]
    Cancelled,
}

impl PullError {
    /// HTTP status behind this error, if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http(e) => e.status(),
            _ => None,
        }
    }

    /// Short description for progress messages, with the HTTP status and
    /// phrase when there is one.
    pub fn describe(&self) -> String {
        match self {
            Self::Http(e) => match (e.status(), e.phrase()) {
                (Some(status), Some(phrase)) => format!("HTTP {status} {phrase}"),
                _ => e.to_string(),
            },
            other => other.to_string(),
        }
    }
}
