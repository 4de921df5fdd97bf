//! # Live Targets
//!
//! A [`LiveTarget`] names one tail request. Its cache key decides which requests
//! share a stream.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::configs::StreamKeyPolicy;

/// # Live Target
///
/// What to tail: the websocket `url`, the label `query` whose matchers become the
/// labels of the `line` column, the `ref_id` tagging the resulting frame and the
/// number of rows (`size`) the buffer keeps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveTarget {
    pub query: String,
    pub url: String,
    pub ref_id: String,
    pub size: usize,
}

impl LiveTarget {
    pub fn new(url: impl Into<String>, query: impl Into<String>, ref_id: impl Into<String>, size: usize) -> Self {
        Self { query: query.into(), url: url.into(), ref_id: ref_id.into(), size }
    }

    /// Cache key under the given policy.
    pub fn stream_key(&self, policy: StreamKeyPolicy) -> String {
        match policy {
            StreamKeyPolicy::Endpoint => self.url.clone(),
            // A JSON array keeps separators inside the parts unambiguous.
            StreamKeyPolicy::Target => json!([self.url, self.query, self.ref_id, self.size]).to_string(),
        }
    }
}
