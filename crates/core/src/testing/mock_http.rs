//! Mock HTTP transport for testing.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::http::{Http, HttpError, Request, Response};

/// A recorded request for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub request: Request,
    pub timestamp: Instant,
}

/// Called for every request before the canned responses are consulted.
type RequestHook = Arc<dyn Fn(&Request) + Send + Sync>;

#[derive(Debug, Clone)]
enum Canned {
    Respond(Response),
    Fail(HttpError),
}

/// Mock implementation of the [`Http`] trait.
///
/// Responses are matched on the exact request URL. Unknown URLs answer
/// `404 Not Found`.
///
/// # Example
///
/// ```rust,ignore
/// use formsync_core::testing::{MockHttp, fixtures};
///
/// let http = MockHttp::new();
/// http.respond_ok("https://agg.example.org/formXml?formId=f", fixtures::form_xml("f", None)).await;
/// http.respond_status("https://agg.example.org/xformsManifest?formId=f", 500).await;
///
/// // ... run a pull ...
///
/// assert_eq!(http.request_count("downloadSubmission").await, 3);
/// ```
#[derive(Default)]
pub struct MockHttp {
    responses: RwLock<HashMap<String, Canned>>,
    requests: RwLock<Vec<RecordedRequest>>,
    slow_urls: RwLock<HashSet<String>>,
    delay: RwLock<Option<Duration>>,
    hook: RwLock<Option<RequestHook>>,
}

impl std::fmt::Debug for MockHttp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockHttp")
            .field("responses", &"<responses>")
            .field("requests", &"<requests>")
            .field("hook", &"<hook>")
            .finish()
    }
}

impl MockHttp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `url` with `response`.
    pub async fn respond(&self, url: impl Into<String>, response: Response) {
        self.responses
            .write()
            .await
            .insert(url.into(), Canned::Respond(response));
    }

    /// Answer `url` with `200 OK` and `body`.
    pub async fn respond_ok(&self, url: impl Into<String>, body: impl Into<Vec<u8>>) {
        self.respond(url, Response::with_status(200, body)).await;
    }

    /// Answer `url` with an empty body and `status`.
    pub async fn respond_status(&self, url: impl Into<String>, status: u16) {
        self.respond(url, Response::with_status(status, Vec::new()))
            .await;
    }

    /// Fail requests to `url` at the transport level.
    pub async fn fail(&self, url: impl Into<String>, error: HttpError) {
        self.responses
            .write()
            .await
            .insert(url.into(), Canned::Fail(error));
    }

    /// Delay every response.
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = Some(delay);
    }

    /// Delay only requests to `url` (uses the configured delay, or 50ms).
    pub async fn slow_down(&self, url: impl Into<String>) {
        self.slow_urls.write().await.insert(url.into());
    }

    /// Run `hook` for every request, before it is answered.
    pub async fn on_request<F>(&self, hook: F)
    where
        F: Fn(&Request) + Send + Sync + 'static,
    {
        *self.hook.write().await = Some(Arc::new(hook));
    }

    /// All requests made so far, in order.
    pub async fn recorded_requests(&self) -> Vec<RecordedRequest> {
        self.requests.read().await.clone()
    }

    /// URLs requested so far, in order.
    pub async fn requested_urls(&self) -> Vec<String> {
        self.requests
            .read()
            .await
            .iter()
            .map(|r| r.request.url.clone())
            .collect()
    }

    /// Number of requests whose URL contains `fragment`.
    pub async fn request_count(&self, fragment: &str) -> usize {
        self.requests
            .read()
            .await
            .iter()
            .filter(|r| r.request.url.contains(fragment))
            .count()
    }

    /// Whether `url` was requested.
    pub async fn was_requested(&self, url: &str) -> bool {
        self.requests
            .read()
            .await
            .iter()
            .any(|r| r.request.url == url)
    }

    pub async fn clear_requests(&self) {
        self.requests.write().await.clear();
    }
}

#[async_trait]
impl Http for MockHttp {
    async fn execute(&self, request: Request) -> Result<Response, HttpError> {
        self.requests.write().await.push(RecordedRequest {
            request: request.clone(),
            timestamp: Instant::now(),
        });

        let hook = self.hook.read().await.clone();
        if let Some(hook) = hook {
            hook(&request);
        }

        let delay = *self.delay.read().await;
        let slow = self.slow_urls.read().await.contains(&request.url);
        match (delay, slow) {
            (Some(delay), _) => tokio::time::sleep(delay).await,
            (None, true) => tokio::time::sleep(Duration::from_millis(50)).await,
            (None, false) => {}
        }

        match self.responses.read().await.get(&request.url) {
            Some(Canned::Respond(response)) => Ok(response.clone()),
            Some(Canned::Fail(error)) => Err(error.clone()),
            None => Ok(Response::with_status(404, Vec::new())),
        }
    }
}
