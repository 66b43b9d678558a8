//! Test fixtures: server documents and a scripted Aggregate server.

use chrono::{DateTime, Duration, Utc};

use crate::attachment::Attachment;
use crate::cursor::Cursor;
use crate::form::SubmissionKeyGenerator;
use crate::server::AggregateServer;
use crate::xml;

use super::MockHttp;

/// 2024-01-01T00:00:00Z, the update time of the first fixture page.
const FIRST_PAGE_EPOCH_SECS: i64 = 1_704_067_200;

/// Instance ids `uuid:0000`, `uuid:0001`, ...
pub fn instance_ids(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("uuid:{i:04}")).collect()
}

/// Minimal form definition whose primary instance root is `data`.
pub fn form_xml(form_id: &str, version: Option<&str>) -> String {
    let version = version
        .map(|v| format!(r#" version="{}""#, xml::escape(v)))
        .unwrap_or_default();
    format!(
        r#"<?xml version="1.0"?>
<h:html xmlns="http://www.w3.org/2002/xforms" xmlns:h="http://www.w3.org/1999/xhtml">
  <h:head>
    <h:title>{id}</h:title>
    <model>
      <instance>
        <data id="{id}"{version}>
          <name/>
          <photo/>
          <meta><instanceID/></meta>
        </data>
      </instance>
      <bind nodeset="/data/name" type="string"/>
    </model>
  </h:head>
  <h:body/>
</h:html>"#,
        id = xml::escape(form_id),
    )
}

/// One `idChunk` page.
pub fn id_chunk(ids: &[String], cursor: &Cursor) -> String {
    let ids: String = ids
        .iter()
        .map(|id| format!("<id>{}</id>", xml::escape(id)))
        .collect();
    format!(
        r#"<idChunk xmlns="http://opendatakit.org/submissions"><idList>{ids}</idList><resumptionCursor>{}</resumptionCursor></idChunk>"#,
        xml::escape(cursor.value())
    )
}

fn media_files(attachments: &[Attachment]) -> String {
    attachments
        .iter()
        .map(|a| {
            format!(
                "<mediaFile><filename>{}</filename><hash>{}</hash><downloadUrl>{}</downloadUrl></mediaFile>",
                xml::escape(&a.filename),
                xml::escape(&a.hash),
                xml::escape(&a.download_url)
            )
        })
        .collect()
}

/// Form manifest listing `attachments`.
pub fn manifest(attachments: &[Attachment]) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><manifest xmlns="http://openrosa.org/xforms/xformsManifest">{}</manifest>"#,
        media_files(attachments)
    )
}

/// The instance document of one submission, as stored on disk.
pub fn submission_instance(form_id: &str, instance_id: &str) -> String {
    format!(
        r#"<data id="{form}" instanceID="{id}"><name>Respondent {id}</name><photo>photo.jpg</photo><meta><instanceID>{id}</instanceID></meta></data>"#,
        form = xml::escape(form_id),
        id = xml::escape(instance_id)
    )
}

/// `downloadSubmission` response for one instance.
pub fn submission(form_id: &str, instance_id: &str, attachments: &[Attachment]) -> String {
    format!(
        r#"<submission xmlns="http://opendatakit.org/submissions" xmlns:orx="http://openrosa.org/xforms"><data>{}</data>{}</submission>"#,
        submission_instance(form_id, instance_id),
        media_files(attachments)
    )
}

/// Attachment served at `<base_url>/media/<filename>` with the md5 of `contents`.
pub fn attachment(base_url: &str, filename: &str, contents: &[u8]) -> Attachment {
    Attachment::new(
        filename,
        format!("md5:{:x}", md5::compute(contents)),
        format!("{}/media/{}", base_url.trim_end_matches('/'), filename),
    )
}

/// Cursor returned with fixture page `page`: timestamped, one minute apart.
pub fn page_cursor(page: usize, last_id: &str) -> Cursor {
    let base = DateTime::<Utc>::from_timestamp(FIRST_PAGE_EPOCH_SECS, 0).unwrap_or_default();
    Cursor::from_date_and_id(base + Duration::minutes(page as i64), last_id)
}

/// Submission key the pull will request for `instance_id` of a
/// [`form_xml`] form without version.
pub fn submission_key(form_id: &str, instance_id: &str) -> String {
    SubmissionKeyGenerator::new(form_id, None, "data").build_key(instance_id)
}

/// Script paginated `submissionList` responses for `ids`, starting from the
/// empty cursor. Returns the cursor of every non-empty page.
pub async fn register_id_pages(
    http: &MockHttp,
    server: &AggregateServer,
    form_id: &str,
    ids: &[String],
    page_size: u32,
    include_incomplete: bool,
) -> Vec<Cursor> {
    register_id_pages_from(http, server, form_id, ids, page_size, include_incomplete, &Cursor::Empty)
        .await
}

/// Like [`register_id_pages`], starting from `start`.
pub async fn register_id_pages_from(
    http: &MockHttp,
    server: &AggregateServer,
    form_id: &str,
    ids: &[String],
    page_size: u32,
    include_incomplete: bool,
    start: &Cursor,
) -> Vec<Cursor> {
    let mut previous = start.clone();
    let mut cursors = Vec::new();
    for (page, chunk) in ids.chunks(page_size.max(1) as usize).enumerate() {
        let last_id = chunk.last().map(String::as_str).unwrap_or_default();
        let cursor = page_cursor(page, last_id);
        let url = server
            .instance_id_batch(form_id, page_size, &previous, include_incomplete)
            .url;
        http.respond_ok(url, id_chunk(chunk, &cursor)).await;
        cursors.push(cursor.clone());
        previous = cursor;
    }
    let url = server
        .instance_id_batch(form_id, page_size, &previous, include_incomplete)
        .url;
    http.respond_ok(url, id_chunk(&[], &previous)).await;
    cursors
}

/// Script the form definition and an empty manifest.
pub async fn register_form(http: &MockHttp, server: &AggregateServer, form_id: &str) {
    http.respond_ok(server.form_xml(form_id).url, form_xml(form_id, None))
        .await;
    http.respond_ok(server.manifest(form_id).url, manifest(&[])).await;
}

/// Script one submission and the contents of its attachments.
pub async fn register_submission(
    http: &MockHttp,
    server: &AggregateServer,
    form_id: &str,
    instance_id: &str,
    attachments: &[(Attachment, Vec<u8>)],
) {
    let listed: Vec<Attachment> = attachments.iter().map(|(a, _)| a.clone()).collect();
    let url = server.submission(&submission_key(form_id, instance_id)).url;
    http.respond_ok(url, submission(form_id, instance_id, &listed))
        .await;
    for (attachment, contents) in attachments {
        http.respond_ok(attachment.download_url.clone(), contents.clone())
            .await;
    }
}
