//! Aggregate cursor envelopes.
//!
//! Aggregate returns its resumption cursor as a small XML document:
//!
//! ```xml
//! <cursor xmlns="http://www.opendatakit.org/cursor">
//!   <attributeName>_LAST_UPDATE_DATE</attributeName>
//!   <attributeValue>2019-03-01T10:00:00.000+0000</attributeValue>
//!   <uriLastReturnedValue>uuid:...</uriLastReturnedValue>
//!   <isForwardCursor>true</isForwardCursor>
//! </cursor>
//! ```
//!
//! The same two components are also accepted as a JSON object.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;

use super::TimestampedCursor;
use crate::xml;

const CURSOR_NAMESPACE: &str = "http://www.opendatakit.org/cursor";
const RENDER_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%z";

#[derive(Debug, Deserialize)]
struct JsonEnvelope {
    #[serde(rename = "attributeValue")]
    attribute_value: Option<String>,
    #[serde(rename = "uriLastReturnedValue")]
    uri_last_returned_value: Option<String>,
}

pub(super) fn parse_xml(raw: &str) -> Option<TimestampedCursor> {
    if !xml::has_root(raw, "cursor") {
        return None;
    }
    build(
        raw,
        xml::element_text(raw, "attributeValue"),
        xml::element_text(raw, "uriLastReturnedValue"),
    )
}

pub(super) fn parse_json(raw: &str) -> Option<TimestampedCursor> {
    let envelope: JsonEnvelope = serde_json::from_str(raw).ok()?;
    build(
        raw,
        envelope.attribute_value,
        envelope.uri_last_returned_value,
    )
}

/// Present-but-blank components count as absent; a present but unparseable
/// time rejects the envelope.
fn build(
    raw: &str,
    attribute_value: Option<String>,
    last_id: Option<String>,
) -> Option<TimestampedCursor> {
    if attribute_value.is_none() && last_id.is_none() {
        return None;
    }

    let last_update = match attribute_value.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(text) => Some(parse_timestamp(text)?),
    };
    let last_id = last_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty());

    Some(TimestampedCursor::new(raw.to_string(), last_update, last_id))
}

pub(super) fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = DateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

pub(super) fn render_xml(last_update: Option<DateTime<Utc>>, last_id: Option<&str>) -> String {
    let mut out = format!(
        "<cursor xmlns=\"{CURSOR_NAMESPACE}\"><attributeName>_LAST_UPDATE_DATE</attributeName>"
    );
    if let Some(date) = last_update {
        out.push_str(&format!(
            "<attributeValue>{}</attributeValue>",
            date.format(RENDER_FORMAT)
        ));
    }
    if let Some(id) = last_id {
        out.push_str(&format!(
            "<uriLastReturnedValue>{}</uriLastReturnedValue>",
            xml::escape(id)
        ));
    }
    out.push_str("<isForwardCursor>true</isForwardCursor></cursor>");
    out
}
