//! Redaction filter: the gate every network event passes before it is queued.

use crate::config::RecorderConfig;
use crate::endpoint::Endpoint;
use recordroom_types::{EventPayload, NetworkPayload};
use std::collections::BTreeMap;
use tracing::trace;

/// Appended to bodies cut at the configured limit.
pub const TRUNCATION_MARKER: &str = "\n...[truncated]";

/// Stands in for bodies that are not plain strings.
pub const NON_STRING_BODY: &str = "[non-string body]";

#[derive(Debug, Clone)]
pub struct RedactionFilter {
    sample_rate: f64,
    /// Lowercased header names to strip.
    deny_headers: Vec<String>,
    max_body: usize,
    endpoint: Option<Endpoint>,
    page_url: Option<String>,
}

impl Default for RedactionFilter {
    fn default() -> Self {
        Self::new(&RecorderConfig::default(), None)
    }
}

impl RedactionFilter {
    pub fn new(config: &RecorderConfig, endpoint: Option<Endpoint>) -> Self {
        Self {
            sample_rate: config.sample_rate,
            deny_headers: config
                .remove_headers
                .iter()
                .map(|h| h.trim().to_ascii_lowercase())
                .collect(),
            max_body: config.max_body,
            endpoint,
            page_url: config.page_url.clone(),
        }
    }

    /// Decide whether an event may enter the queue, redacting it in place.
    ///
    /// Only network events are filtered; other kinds always pass.
    pub fn accept(&self, payload: &mut EventPayload) -> bool {
        match payload {
            EventPayload::Network(network) => self.accept_network(network),
            _ => true,
        }
    }

    pub fn accept_network(&self, network: &mut NetworkPayload) -> bool {
        if self.is_internal(&network.url) {
            trace!(target: "recordroom::capture", "Skipping internal request {}", network.url);
            return false;
        }
        if !self.sampled() {
            return false;
        }

        self.redact_headers(&mut network.request_headers);
        self.redact_headers(&mut network.response_headers);
        network.request_body = network
            .request_body
            .take()
            .map(|body| truncate_body(&body, self.max_body));
        network.response_body = network
            .response_body
            .take()
            .map(|body| truncate_body(&body, self.max_body));
        true
    }

    pub fn is_internal(&self, url: &str) -> bool {
        self.endpoint
            .as_ref()
            .is_some_and(|endpoint| endpoint.is_internal(url, self.page_url.as_deref()))
    }

    /// One probabilistic keep/drop decision.
    fn sampled(&self) -> bool {
        if self.sample_rate >= 1.0 {
            true
        } else if self.sample_rate <= 0.0 {
            false
        } else {
            rand::random::<f64>() < self.sample_rate
        }
    }

    fn redact_headers(&self, headers: &mut BTreeMap<String, String>) {
        headers.retain(|name, _| {
            let lower = name.to_ascii_lowercase();
            !self.deny_headers.iter().any(|deny| *deny == lower)
        });
    }
}

/// Cut `body` to `max` characters and append [`TRUNCATION_MARKER`].
///
/// Bodies already carrying the marker within the limit are left alone.
pub fn truncate_body(body: &str, max: usize) -> String {
    if body.chars().count() <= max {
        return body.to_string();
    }
    if let Some(kept) = body.strip_suffix(TRUNCATION_MARKER) {
        if kept.chars().count() <= max {
            return body.to_string();
        }
    }

    let mut truncated: String = body.chars().take(max).collect();
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}
