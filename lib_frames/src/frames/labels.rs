//! # Label Sets
//!
//! Helpers for the `{key="value", ...}` label sets that identify log streams.

use std::sync::OnceLock;

use regex::Regex;

use super::types::Labels;

fn label_pattern() -> &'static Regex {
    static LABEL: OnceLock<Regex> = OnceLock::new();
    LABEL.get_or_init(|| Regex::new(r#"\b(\w+)(!?=~?)"([^"\n]*?)""#).expect("label pattern is valid"))
}

/// Extracts the label matchers of a selector such as `{job="api", level=~"err.*"}`.
///
/// Every matcher operator (`=`, `!=`, `=~`, `!~`) is accepted and only the value is
/// kept. Input without matchers yields an empty set.
pub fn parse_labels(selector: &str) -> Labels {
    label_pattern()
        .captures_iter(selector)
        .map(|caps| (caps[1].to_string(), caps[3].to_string()))
        .collect()
}

/// Returns the labels of `labels` that are not shared, with the same value, by `common`.
pub fn find_unique_labels(labels: &Labels, common: &Labels) -> Labels {
    labels
        .iter()
        .filter(|(key, value)| common.get(*key) != Some(*value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Renders a label set as `{key="value", ...}`.
pub fn format_labels(labels: &Labels) -> String {
    let body = labels
        .iter()
        .map(|(key, value)| format!("{}=\"{}\"", key, value))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{{{}}}", body)
}
