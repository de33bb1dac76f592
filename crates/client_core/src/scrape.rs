//! Minimal extraction of form inputs and markers from service HTML.

use std::sync::OnceLock;

use regex::Regex;

use crate::transport::Params;

fn input_tag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<input\b[^>]*>").expect("static regex"))
}

fn attribute() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?is)\b([a-z_:-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("static regex")
    })
}

fn revision_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""revision"\s*:\s*(\d+)"#).expect("static regex"))
}

/// Every `<input>` that has both a `name` and a `value`, in document order.
pub fn form_inputs(html: &str) -> Vec<(String, String)> {
    input_tag()
        .find_iter(html)
        .filter_map(|tag| {
            let mut name = None;
            let mut value = None;
            for caps in attribute().captures_iter(tag.as_str()) {
                let raw = caps.get(2).or_else(|| caps.get(3)).map(|m| m.as_str());
                match caps.get(1).map(|m| m.as_str().to_ascii_lowercase()).as_deref() {
                    Some("name") => name = raw.map(unescape),
                    Some("value") => value = raw.map(unescape),
                    _ => {}
                }
            }
            Some((name?, value?))
        })
        .collect()
}

/// Hidden inputs of a page as a form body.
pub fn hidden_form(html: &str) -> Params {
    form_inputs(html).into_iter().collect()
}

pub fn input_value(html: &str, name: &str) -> Option<String> {
    form_inputs(html)
        .into_iter()
        .find(|(input, _)| input == name)
        .map(|(_, value)| value)
}

/// The numeric `"revision":` marker embedded in the page script.
pub fn revision(html: &str) -> Option<u64> {
    revision_marker()
        .captures(html)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn unescape(raw: &str) -> String {
    raw.replace("&quot;", "\"")
        .replace("&#039;", "'")
        .replace("&#x27;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
