//! Breadcrumb capture: clicks, inputs and navigation.

use crate::config::RecorderConfig;
use crate::emitter::Emitter;
use crate::storage::lock;
use recordroom_types::{BreadcrumbPayload, EventPayload};
use serde_json::{json, Map, Value};
use std::sync::{Arc, Mutex};

/// Replaces password values when masking is on.
pub const MASKED_VALUE: &str = "[masked]";

#[derive(Debug, Clone, Copy)]
struct BreadcrumbSettings {
    max_input: usize,
    mask_password: bool,
}

struct BreadcrumbInner {
    emitter: Emitter,
    /// `Some` while installed.
    settings: Mutex<Option<BreadcrumbSettings>>,
    last_location: Mutex<Option<String>>,
}

/// Breadcrumb capture source. Every method is a no-op until installed.
#[derive(Clone)]
pub struct BreadcrumbCapture {
    inner: Arc<BreadcrumbInner>,
}

impl BreadcrumbCapture {
    pub fn new(emitter: Emitter) -> Self {
        Self {
            inner: Arc::new(BreadcrumbInner {
                emitter,
                settings: Mutex::new(None),
                last_location: Mutex::new(None),
            }),
        }
    }

    pub fn install(&self, config: &RecorderConfig) {
        *lock(&self.inner.settings) = Some(BreadcrumbSettings {
            max_input: config.max_input,
            mask_password: config.mask_password,
        });
    }

    pub fn uninstall(&self) {
        *lock(&self.inner.settings) = None;
        *lock(&self.inner.last_location) = None;
    }

    pub fn is_installed(&self) -> bool {
        lock(&self.inner.settings).is_some()
    }

    fn settings(&self) -> Option<BreadcrumbSettings> {
        *lock(&self.inner.settings)
    }

    fn emit(&self, name: &str, message: String, data: Map<String, Value>) -> Option<u64> {
        self.inner
            .emitter
            .emit(EventPayload::Breadcrumb(BreadcrumbPayload {
                name: name.to_string(),
                message,
                data,
            }))
    }

    /// A click on the element identified by `selector`.
    pub fn click(&self, selector: &str, text: &str, href: Option<&str>) -> Option<u64> {
        let settings = self.settings()?;
        let data = object(json!({
            "selector": selector,
            "text": clip(text, settings.max_input),
            "href": href.unwrap_or_default(),
        }));
        self.emit("click", format!("click {}", selector), data)
    }

    /// A value typed into a form field.
    pub fn input(
        &self,
        selector: &str,
        name: Option<&str>,
        input_type: &str,
        value: &str,
    ) -> Option<u64> {
        let settings = self.settings()?;
        let is_password = input_type.eq_ignore_ascii_case("password");
        let value = if settings.mask_password && is_password {
            MASKED_VALUE.to_string()
        } else {
            clip(value, settings.max_input)
        };
        let data = object(json!({
            "selector": selector,
            "name": name.unwrap_or_default(),
            "value": value,
        }));
        self.emit("input", format!("input {}", selector), data)
    }

    /// An explicit navigation from `before` to `after`.
    pub fn navigation(&self, before: &str, after: &str) -> Option<u64> {
        self.settings()?;
        *lock(&self.inner.last_location) = Some(after.to_string());
        let data = object(json!({ "before": before, "after": after }));
        self.emit("navigation", "history.pushState".to_string(), data)
    }

    /// The current location changed by other means (back/forward).
    ///
    /// Repeated reports of the same location are ignored.
    pub fn location_changed(&self, href: &str) -> Option<u64> {
        self.settings()?;
        {
            let mut last = lock(&self.inner.last_location);
            if last.as_deref() == Some(href) {
                return None;
            }
            *last = Some(href.to_string());
        }
        let data = object(json!({ "href": href }));
        self.emit("navigation", "popstate".to_string(), data)
    }
}

/// Cut `text` to `max` characters, marking the cut with `...`.
fn clip(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(max).collect();
    clipped.push_str("...");
    clipped
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::DeliveryQueue;

    fn installed(config: &RecorderConfig) -> BreadcrumbCapture {
        let capture = BreadcrumbCapture::new(Emitter::new(Arc::new(DeliveryQueue::new())));
        capture.install(config);
        capture
    }

    fn crumbs(capture: &BreadcrumbCapture) -> Vec<BreadcrumbPayload> {
        capture
            .inner
            .emitter
            .queue()
            .snapshot()
            .into_iter()
            .filter_map(|e| match e.payload {
                EventPayload::Breadcrumb(b) => Some(b),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_password_masked() {
        let capture = installed(&RecorderConfig::default());
        capture.input("form > input#pw", Some("pw"), "Password", "hunter2");
        capture.input("form > input#user", Some("user"), "text", "alice");

        let crumbs = crumbs(&capture);
        assert_eq!(crumbs[0].data["value"], MASKED_VALUE);
        assert_eq!(crumbs[0].message, "input form > input#pw");
        assert_eq!(crumbs[1].data["value"], "alice");
    }

    #[test]
    fn test_password_visible_when_masking_off() {
        let config = RecorderConfig {
            mask_password: false,
            ..RecorderConfig::default()
        };
        let capture = installed(&config);
        capture.input("input", None, "password", "hunter2");
        assert_eq!(crumbs(&capture)[0].data["value"], "hunter2");
    }

    #[test]
    fn test_long_values_clipped() {
        let config = RecorderConfig {
            max_input: 5,
            ..RecorderConfig::default()
        };
        let capture = installed(&config);
        capture.click("button.buy", "Buy it now", None);
        capture.input("textarea", None, "textarea", "abcdefgh");

        let crumbs = crumbs(&capture);
        assert_eq!(crumbs[0].data["text"], "Buy i...");
        assert_eq!(crumbs[0].data["href"], "");
        assert_eq!(crumbs[1].data["value"], "abcde...");
    }

    #[test]
    fn test_navigation_and_location_dedup() {
        let capture = installed(&RecorderConfig::default());
        capture.navigation("http://app.test/a", "http://app.test/b");
        assert_eq!(capture.location_changed("http://app.test/b"), None);
        assert!(capture.location_changed("http://app.test/a").is_some());

        let crumbs = crumbs(&capture);
        assert_eq!(crumbs.len(), 2);
        assert_eq!(crumbs[0].message, "history.pushState");
        assert_eq!(crumbs[0].data["after"], "http://app.test/b");
        assert_eq!(crumbs[1].message, "popstate");
    }

    #[test]
    fn test_noop_until_installed() {
        let capture = BreadcrumbCapture::new(Emitter::new(Arc::new(DeliveryQueue::new())));
        assert_eq!(capture.click("a", "x", None), None);
        assert!(crumbs(&capture).is_empty());
    }
}
