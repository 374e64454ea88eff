//! `{{variable}}` template rendering.

use regex::{Captures, Regex};
use std::sync::OnceLock;

use crate::database::models::{EmailTemplateDbModel, TemplateData};

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("placeholder regex is valid")
    })
}

fn value_to_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Substitute `{{ name }}` placeholders from `data`.
///
/// Unknown placeholders render as an empty string.
pub fn render_template(text: &str, data: &TemplateData) -> String {
    placeholder_regex()
        .replace_all(text, |caps: &Captures<'_>| {
            data.get(&caps[1]).map(value_to_text).unwrap_or_default()
        })
        .into_owned()
}

/// Final `(subject, body)` for a templated message.
///
/// The template subject replaces `subject` only when it is present and non-empty.
pub fn resolve_content(
    template: &EmailTemplateDbModel,
    subject: &str,
    data: &TemplateData,
) -> (String, String) {
    let subject = match template.subject.as_deref() {
        Some(s) if !s.trim().is_empty() => render_template(s, data),
        _ => subject.to_string(),
    };
    (subject, render_template(&template.body, data))
}
