//! Cursor-based pagination of submission instance ids.
//!
//! [`InstanceIdBatchGetter`] walks the server's `submissionList` pages. It
//! always holds the next page already fetched, so [`InstanceIdBatchGetter::has_next`]
//! answers without I/O. The server signals the end with an empty id list;
//! nothing is fetched after that.

use std::sync::Arc;

use tracing::debug;

use crate::cursor::Cursor;
use crate::http::Http;
use crate::pull::PullError;
use crate::server::{AggregateServer, ProtocolError};
use crate::xml;

/// One page of instance ids, in server order, with the cursor that follows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceIdBatch {
    ids: Vec<String>,
    cursor: Cursor,
}

impl InstanceIdBatch {
    pub fn new(ids: Vec<String>, cursor: Cursor) -> Self {
        Self { ids, cursor }
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn into_parts(self) -> (Vec<String>, Cursor) {
        (self.ids, self.cursor)
    }
}

/// Parse an Aggregate `idChunk` document.
///
/// The resumption cursor is embedded as escaped text and comes back
/// unescaped, ready to be re-sent verbatim. A missing cursor is empty.
pub fn parse_id_chunk(xml_text: &str) -> Result<InstanceIdBatch, ProtocolError> {
    if !xml::has_root(xml_text, "idChunk") {
        return Err(ProtocolError::new("idChunk", "missing <idChunk> root"));
    }
    let ids = xml::element_blocks(xml_text, "idList")
        .into_iter()
        .next()
        .map(|list| {
            xml::element_blocks(list, "id")
                .into_iter()
                .map(|id| xml::unescape(id.trim()))
                .filter(|id| !id.is_empty())
                .collect()
        })
        .unwrap_or_default();
    let cursor = xml::element_text(xml_text, "resumptionCursor")
        .map(|raw| Cursor::parse(&raw))
        .unwrap_or_default();
    Ok(InstanceIdBatch::new(ids, cursor))
}

/// Lazy iterator over the id pages of one form.
pub struct InstanceIdBatchGetter {
    http: Arc<dyn Http>,
    server: AggregateServer,
    form_id: String,
    page_size: u32,
    include_incomplete: bool,
    current: Option<InstanceIdBatch>,
    pages_fetched: usize,
}

impl std::fmt::Debug for InstanceIdBatchGetter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceIdBatchGetter")
            .field("server", &self.server)
            .field("form_id", &self.form_id)
            .field("page_size", &self.page_size)
            .field("current", &self.current)
            .field("pages_fetched", &self.pages_fetched)
            .finish()
    }
}

impl InstanceIdBatchGetter {
    /// Create a getter and fetch the first page after `start`.
    pub async fn start(
        http: Arc<dyn Http>,
        server: AggregateServer,
        form_id: impl Into<String>,
        start: Cursor,
        page_size: u32,
        include_incomplete: bool,
    ) -> Result<Self, PullError> {
        let mut getter = Self {
            http,
            server,
            form_id: form_id.into(),
            page_size,
            include_incomplete,
            current: None,
            pages_fetched: 0,
        };
        getter.current = Some(getter.fetch(&start).await?);
        Ok(getter)
    }

    /// Whether the most recently fetched page had ids.
    pub fn has_next(&self) -> bool {
        self.current.as_ref().is_some_and(|batch| !batch.is_empty())
    }

    /// Return the current page and fetch the one after it.
    ///
    /// `Ok(None)` once an empty page was seen. A failed fetch ends the
    /// sequence: the getter must not be used afterwards.
    pub async fn next(&mut self) -> Result<Option<InstanceIdBatch>, PullError> {
        if !self.has_next() {
            return Ok(None);
        }
        let Some(batch) = self.current.take() else {
            return Ok(None);
        };
        self.current = Some(self.fetch(batch.cursor()).await?);
        Ok(Some(batch))
    }

    /// Number of page requests made so far.
    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    async fn fetch(&mut self, cursor: &Cursor) -> Result<InstanceIdBatch, PullError> {
        let request =
            self.server
                .instance_id_batch(&self.form_id, self.page_size, cursor, self.include_incomplete);
        let response = self.http.execute(request).await?.error_for_status()?;
        let batch = parse_id_chunk(&response.text())?;
        self.pages_fetched += 1;

        debug!(
            form_id = %self.form_id,
            page = self.pages_fetched,
            ids = batch.len(),
            cursor = %batch.cursor(),
            "Fetched instance id page"
        );
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpError;
    use crate::testing::{fixtures, MockHttp};

    const BASE: &str = "https://agg.example.org";

    async fn drain(getter: &mut InstanceIdBatchGetter) -> Vec<InstanceIdBatch> {
        let mut batches = Vec::new();
        while getter.has_next() {
            if let Some(batch) = getter.next().await.unwrap() {
                batches.push(batch);
            }
        }
        batches
    }

    #[test]
    fn test_parse_id_chunk() {
        let xml = r#"<idChunk xmlns="http://opendatakit.org/submissions">
  <idList>
    <id>uuid:1</id>
    <id>uuid:2</id>
  </idList>
  <resumptionCursor>&lt;cursor xmlns="http://www.opendatakit.org/cursor"&gt;&lt;attributeName&gt;_LAST_UPDATE_DATE&lt;/attributeName&gt;&lt;attributeValue&gt;2024-03-01T10:00:00.000+0000&lt;/attributeValue&gt;&lt;uriLastReturnedValue&gt;uuid:2&lt;/uriLastReturnedValue&gt;&lt;isForwardCursor&gt;true&lt;/isForwardCursor&gt;&lt;/cursor&gt;</resumptionCursor>
</idChunk>"#;
        let batch = parse_id_chunk(xml).unwrap();
        assert_eq!(batch.ids(), &["uuid:1".to_string(), "uuid:2".to_string()]);
        match batch.cursor() {
            Cursor::Timestamped(c) => assert_eq!(c.last_id(), Some("uuid:2")),
            other => panic!("expected timestamped cursor, got {other}"),
        }
        assert!(batch.cursor().value().starts_with("<cursor"));
    }

    #[test]
    fn test_parse_empty_id_chunk() {
        let batch = parse_id_chunk("<idChunk><idList/><resumptionCursor>17</resumptionCursor></idChunk>")
            .unwrap();
        assert!(batch.is_empty());
        assert_eq!(batch.cursor(), &Cursor::parse("17"));
    }

    #[test]
    fn test_parse_rejects_other_documents() {
        assert!(parse_id_chunk("<html><body>Login</body></html>").is_err());
    }

    #[tokio::test]
    async fn test_pagination_yields_ceil_n_over_p_batches() {
        for (total, page_size) in [(250usize, 100u32), (200, 100), (7, 3), (1, 10), (0, 5)] {
            let http = Arc::new(MockHttp::new());
            let server = AggregateServer::new(BASE);
            let ids = fixtures::instance_ids(total);
            let cursors =
                fixtures::register_id_pages(&http, &server, "household", &ids, page_size, false)
                    .await;

            let mut getter = InstanceIdBatchGetter::start(
                http.clone(),
                server,
                "household",
                Cursor::Empty,
                page_size,
                false,
            )
            .await
            .unwrap();
            let batches = drain(&mut getter).await;

            let expected = total.div_ceil(page_size as usize);
            assert_eq!(batches.len(), expected, "{total} ids in pages of {page_size}");
            let flattened: Vec<String> = batches.iter().flat_map(|b| b.ids().to_vec()).collect();
            assert_eq!(flattened, ids);

            if let Some(last) = batches.last() {
                let max = Cursor::max(batches.iter().map(|b| b.cursor().clone()));
                assert_eq!(last.cursor(), &max);
                assert_eq!(last.cursor(), cursors.last().unwrap());
            }

            // One request per non-empty page plus the terminating empty page.
            assert_eq!(getter.pages_fetched(), expected + 1);
            assert_eq!(http.request_count("submissionList").await, expected + 1);
            assert!(getter.next().await.unwrap().is_none());
            assert_eq!(http.request_count("submissionList").await, expected + 1);
        }
    }

    #[tokio::test]
    async fn test_each_request_carries_previous_cursor() {
        let http = Arc::new(MockHttp::new());
        let server = AggregateServer::new(BASE);
        let ids = fixtures::instance_ids(4);
        let cursors = fixtures::register_id_pages(&http, &server, "f", &ids, 2, true).await;

        let mut getter =
            InstanceIdBatchGetter::start(http.clone(), server.clone(), "f", Cursor::Empty, 2, true)
                .await
                .unwrap();
        drain(&mut getter).await;

        let urls = http.requested_urls().await;
        assert_eq!(urls[0], server.instance_id_batch("f", 2, &Cursor::Empty, true).url);
        assert_eq!(urls[1], server.instance_id_batch("f", 2, &cursors[0], true).url);
        assert_eq!(urls[2], server.instance_id_batch("f", 2, &cursors[1], true).url);
    }

    #[tokio::test]
    async fn test_failed_page_is_fatal() {
        let http = Arc::new(MockHttp::new());
        let server = AggregateServer::new(BASE);
        let ids = fixtures::instance_ids(5);
        let cursors = fixtures::register_id_pages(&http, &server, "f", &ids, 2, false).await;
        let second = server.instance_id_batch("f", 2, &cursors[0], false).url;
        http.respond_status(second, 401).await;

        let mut getter = InstanceIdBatchGetter::start(http.clone(), server, "f", Cursor::Empty, 2, false)
            .await
            .unwrap();
        let err = getter.next().await.unwrap_err();
        assert!(matches!(err, PullError::Http(HttpError::Unauthorized { status: 401, .. })));
    }

    #[tokio::test]
    async fn test_first_page_failure() {
        let http = Arc::new(MockHttp::new());
        let result = InstanceIdBatchGetter::start(
            http,
            AggregateServer::new(BASE),
            "missing",
            Cursor::Empty,
            100,
            false,
        )
        .await;
        assert!(matches!(result, Err(PullError::Http(HttpError::NotFound { .. }))));
    }
}
