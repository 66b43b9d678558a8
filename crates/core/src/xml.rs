//! Element extraction for the small, flat XML documents an Aggregate server
//! returns (cursor envelopes, id chunks, manifests, submission wrappers).
//!
//! These documents never nest an element inside one of the same name, except
//! the submission wrapper, which [`outer_element`] handles.

use regex_lite::Regex;

/// Optional namespace prefix in front of an element name.
const PREFIX: &str = r"(?:[A-Za-z_][A-Za-z0-9_.\-]*:)?";

fn element_regex(name: &str, greedy: bool) -> Option<Regex> {
    let body = if greedy { "(.*)" } else { "(.*?)" };
    Regex::new(&format!(
        r"(?s)<{PREFIX}{name}(?:\s[^>]*)?>{body}</{PREFIX}{name}\s*>"
    ))
    .ok()
}

fn self_closing_regex(name: &str) -> Option<Regex> {
    Regex::new(&format!(r"<{PREFIX}{name}(?:\s[^>]*)?/>")).ok()
}

/// Unescaped, trimmed text of the first `name` element.
///
/// A self-closing element yields an empty string.
pub(crate) fn element_text(xml: &str, name: &str) -> Option<String> {
    if let Some(caps) = element_regex(name, false)?.captures(xml) {
        return caps.get(1).map(|m| unescape(m.as_str().trim()));
    }
    if self_closing_regex(name)?.is_match(xml) {
        return Some(String::new());
    }
    None
}

/// Raw inner content of every `name` element, in document order.
pub(crate) fn element_blocks<'a>(xml: &'a str, name: &str) -> Vec<&'a str> {
    match element_regex(name, false) {
        Some(re) => re
            .captures_iter(xml)
            .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
            .collect(),
        None => Vec::new(),
    }
}

/// Raw inner content from the first `name` opening tag to the last closing tag.
pub(crate) fn outer_element<'a>(xml: &'a str, name: &str) -> Option<&'a str> {
    element_regex(name, true)?
        .captures(xml)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
}

/// Whether the document's root element is `name` (prolog and comments allowed).
pub(crate) fn has_root(xml: &str, name: &str) -> bool {
    let pattern = format!(
        r"^\s*(?:<\?xml[^>]*\?>\s*)?(?:<!--.*?-->\s*)*<{PREFIX}{name}[\s>/]"
    );
    Regex::new(&pattern)
        .map(|re| re.is_match(xml))
        .unwrap_or(false)
}

/// Value of `attr` inside an opening tag.
pub(crate) fn attribute(tag: &str, attr: &str) -> Option<String> {
    let pattern = format!(r#"\s{attr}\s*=\s*(?:"([^"]*)"|'([^']*)')"#);
    let caps = Regex::new(&pattern).ok()?.captures(tag)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .map(|m| unescape(m.as_str()))
}

pub(crate) fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

pub(crate) fn unescape(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let Some(end) = tail.find(';') else {
            out.push_str(tail);
            return out;
        };
        let entity = &tail[1..end];
        let decoded = match entity {
            "lt" => Some('<'),
            "gt" => Some('>'),
            "amp" => Some('&'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => decode_numeric(entity),
        };
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_numeric(entity: &str) -> Option<char> {
    let digits = entity.strip_prefix('#')?;
    let code = match digits.strip_prefix('x').or_else(|| digits.strip_prefix('X')) {
        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
        None => digits.parse().ok()?,
    };
    char::from_u32(code)
}
