//! Backend URL derivation.

use crate::{RecordroomError, Result};
use reqwest::Url;

/// Path prefixes of the backend's own traffic. Never captured.
pub const INTERNAL_PATHS: &[&str] = &["/api/records", "/ws/ingest", "/sdk/recordroom-sdk.js"];

/// A validated backend base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    base: Url,
}

impl Endpoint {
    /// Parse `api_base`, trimming trailing slashes. Only http(s) is accepted.
    pub fn parse(api_base: &str) -> Result<Self> {
        let trimmed = api_base.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(RecordroomError::MissingEndpoint);
        }

        let base = Url::parse(trimmed).map_err(|e| RecordroomError::InvalidEndpoint {
            url: trimmed.to_string(),
            reason: e.to_string(),
        })?;

        match base.scheme() {
            "http" | "https" => Ok(Self { base }),
            other => Err(RecordroomError::InvalidEndpoint {
                url: trimmed.to_string(),
                reason: format!("unsupported scheme '{}'", other),
            }),
        }
    }

    /// Base URL without a trailing slash.
    pub fn base(&self) -> String {
        self.base.as_str().trim_end_matches('/').to_string()
    }

    fn join_segments(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        url.set_query(None);
        url.set_fragment(None);
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// `{base}/api/records`
    pub fn records_url(&self) -> String {
        self.join_segments(&["api", "records"]).to_string()
    }

    /// `{base}/api/records/{recordId}`
    pub fn record_url(&self, record_id: &str) -> String {
        self.join_segments(&["api", "records", record_id]).to_string()
    }

    /// `{base}/r/{recordId}/timeline`
    pub fn share_url(&self, record_id: &str) -> String {
        self.join_segments(&["r", record_id, "timeline"]).to_string()
    }

    /// `{base}` upgraded to ws/wss, path `/ws/ingest`, query `recordId={recordId}`.
    pub fn ingest_url(&self, record_id: &str) -> String {
        let mut url = self.join_segments(&["ws", "ingest"]);
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        // http(s) -> ws(s) is always a permitted special-to-special change.
        let _ = url.set_scheme(scheme);
        url.query_pairs_mut().append_pair("recordId", record_id);
        url.to_string()
    }

    /// Whether `url` points at the backend's own management or ingest paths.
    ///
    /// Relative URLs resolve against `page_url` (or the base). URLs that
    /// cannot be parsed are not considered internal.
    pub fn is_internal(&self, url: &str, page_url: Option<&str>) -> bool {
        let resolved = Url::parse(url).or_else(|_| {
            let anchor = page_url
                .and_then(|p| Url::parse(p).ok())
                .unwrap_or_else(|| self.base.clone());
            anchor.join(url)
        });

        match resolved {
            Ok(resolved) => INTERNAL_PATHS
                .iter()
                .any(|prefix| resolved.path().starts_with(prefix)),
            Err(_) => false,
        }
    }
}
