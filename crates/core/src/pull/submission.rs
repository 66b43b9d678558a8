//! Downloaded submissions.

use crate::attachment::{self, Attachment};
use crate::server::ProtocolError;
use crate::xml;

/// One submission as returned by `downloadSubmission`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedSubmission {
    /// The instance document, written to `submission.xml`.
    pub xml: String,
    pub instance_id: String,
    pub attachments: Vec<Attachment>,
}

/// Parse a `<submission>` wrapper: the instance inside `<data>` and the
/// `<mediaFile>` entries that follow it.
pub fn parse_submission(
    xml_text: &str,
    instance_id: &str,
) -> Result<DownloadedSubmission, ProtocolError> {
    if !xml::has_root(xml_text, "submission") {
        return Err(ProtocolError::new("submission", "missing <submission> root"));
    }
    let instance = xml::outer_element(xml_text, "data")
        .filter(|data| !data.is_empty())
        .ok_or_else(|| ProtocolError::new("submission", format!("no data for {instance_id}")))?;

    // Media files are siblings of <data>; an instance field could share the name.
    let outside_data = xml_text.replacen(instance, "", 1);
    let attachments = attachment::parse_media_files("submission", &outside_data)?;

    Ok(DownloadedSubmission {
        xml: instance.to_string(),
        instance_id: instance_id.to_string(),
        attachments,
    })
}
