//! reqwest-backed HTTP transport.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{redirect, Client};
use tracing::debug;

use crate::config::ServerConfig;

use super::{Http, HttpError, Request, Response};

/// Production [`Http`] implementation.
///
/// Redirects are not followed so that they surface as
/// [`HttpError::Redirection`] (typically a server moved to https).
pub struct ReqwestHttp {
    client: Client,
    credentials: Option<(String, Option<String>)>,
}

impl ReqwestHttp {
    /// Create a client with the timeout and credentials of `config`.
    pub fn new(config: &ServerConfig) -> Result<Self, HttpError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .redirect(redirect::Policy::none())
            .cookie_store(true)
            .build()
            .map_err(|e| HttpError::Transport(format!("failed to create HTTP client: {e}")))?;

        let credentials = config
            .username
            .as_ref()
            .filter(|u| !u.is_empty())
            .map(|u| (u.clone(), config.password.clone()));

        Ok(Self {
            client,
            credentials,
        })
    }
}

fn map_transport_error(e: reqwest::Error) -> HttpError {
    if e.is_timeout() {
        HttpError::Timeout
    } else if e.is_connect() {
        HttpError::ConnectionFailed(e.to_string())
    } else {
        HttpError::Transport(e.to_string())
    }
}

#[async_trait]
impl Http for ReqwestHttp {
    async fn execute(&self, request: Request) -> Result<Response, HttpError> {
        let mut builder = self.client.get(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some((username, password)) = &self.credentials {
            builder = builder.basic_auth(username, password.as_ref());
        }

        let response = builder.send().await.map_err(map_transport_error)?;
        let status = response.status();
        let phrase = status.canonical_reason().unwrap_or("Unknown").to_string();
        let body = response.bytes().await.map_err(map_transport_error)?;

        debug!(
            url = %request.url,
            status = status.as_u16(),
            bytes = body.len(),
            "HTTP request complete"
        );

        Ok(Response::new(status.as_u16(), phrase, body.to_vec()))
    }
}
