//! Form definition helpers.
//!
//! Only the part of the form definition the pull needs is read: the primary
//! instance's root element, its `id` and `version`, from which Aggregate
//! submission keys are built.

use once_cell::sync::Lazy;
use regex_lite::Regex;
use thiserror::Error;

use crate::xml;

static INSTANCE_OPEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<(?:[A-Za-z_][A-Za-z0-9_.\-]*:)?instance(\s[^>]*)?>").expect("valid regex")
});

static ELEMENT_OPEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^(?:\s|<!--.*?-->)*<([A-Za-z_][A-Za-z0-9_.:\-]*)(\s[^>]*?)?/?>")
        .expect("valid regex")
});

/// Errors that can occur reading a form definition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormError {
    #[error("Form definition has no primary instance")]
    MissingInstance,

    #[error("Form definition has no form id")]
    MissingFormId,
}

/// Identity of a form on the server and on disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FormKey {
    /// Server form id.
    pub id: String,
    /// Human name, used for directory naming. Defaults to the id.
    pub name: String,
}

impl FormKey {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Builds the server key Aggregate uses to address one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionKeyGenerator {
    form_id: String,
    version: Option<String>,
    instance_element: String,
}

impl SubmissionKeyGenerator {
    pub fn new(
        form_id: impl Into<String>,
        version: Option<String>,
        instance_element: impl Into<String>,
    ) -> Self {
        Self {
            form_id: form_id.into(),
            version,
            instance_element: instance_element.into(),
        }
    }

    /// Read the primary instance of a form definition.
    ///
    /// Secondary instances (those with an `id` attribute) are skipped.
    pub fn from_form_xml(form_xml: &str) -> Result<Self, FormError> {
        for open in INSTANCE_OPEN.captures_iter(form_xml) {
            let attrs = open.get(1).map(|m| m.as_str()).unwrap_or("");
            if xml::attribute(attrs, "id").is_some() {
                continue;
            }
            let Some(whole) = open.get(0) else {
                continue;
            };

            let rest = &form_xml[whole.end()..];
            let root = ELEMENT_OPEN.captures(rest).ok_or(FormError::MissingInstance)?;
            let name = root.get(1).map(|m| m.as_str()).ok_or(FormError::MissingInstance)?;
            let root_attrs = root.get(2).map(|m| m.as_str()).unwrap_or("");

            let form_id = xml::attribute(root_attrs, "id")
                .filter(|id| !id.trim().is_empty())
                .ok_or(FormError::MissingFormId)?;
            let version = xml::attribute(root_attrs, "version").filter(|v| !v.trim().is_empty());

            return Ok(Self::new(form_id, version, local_name(name)));
        }
        Err(FormError::MissingInstance)
    }

    pub fn form_id(&self) -> &str {
        &self.form_id
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// `formId[@version=v and @uiVersion=null]/root[@key=instanceId]`
    pub fn build_key(&self, instance_id: &str) -> String {
        format!(
            "{}[@version={} and @uiVersion=null]/{}[@key={}]",
            self.form_id,
            self.version.as_deref().unwrap_or("null"),
            self.instance_element,
            instance_id
        )
    }
}

fn local_name(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}
