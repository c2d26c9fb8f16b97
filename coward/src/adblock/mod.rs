//! Request interceptor for ad and tracker blocking.
//!
//! [`Interceptor::classify`] runs on the engine's request thread. It takes a
//! read lock only long enough to clone the current engine, so a rule reload
//! never stalls classification.

mod engine;
mod resource;
mod rules;

pub use engine::{AdblockFilterEngine, FilterEngine};
pub use resource::{RawResourceType, ResourceKind, ResourceKindMap};
pub use rules::{REFRESH_CHECK_INTERVAL, RuleManager, fetch_rules, load_rule_lines, needs_refresh};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tracing::trace;

/// A request seen by the interceptor.
#[derive(Debug, Clone)]
pub struct InterceptRequest {
    pub url: String,
    pub initiator_url: String,
    pub resource_type: RawResourceType,
}

impl InterceptRequest {
    pub fn new(url: impl Into<String>, initiator_url: impl Into<String>, resource_type: RawResourceType) -> Self {
        Self {
            url: url.into(),
            initiator_url: initiator_url.into(),
            resource_type,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Block,
}

pub struct Interceptor {
    deny_substrings: Vec<String>,
    kinds: ResourceKindMap,
    enabled: AtomicBool,
    engine: RwLock<Option<Arc<dyn FilterEngine>>>,
}

impl Interceptor {
    pub fn new(deny_substrings: Vec<String>, enabled: bool) -> Self {
        Self {
            deny_substrings,
            kinds: ResourceKindMap::new(),
            enabled: AtomicBool::new(enabled),
            engine: RwLock::new(None),
        }
    }

    pub fn classify(&self, request: &InterceptRequest) -> Decision {
        if url::Url::parse(&request.url).is_err() {
            trace!(url = %request.url, "Blocking malformed URL");
            return Decision::Block;
        }
        if self.is_denied(&request.url) {
            trace!(url = %request.url, "Blocking denied URL");
            return Decision::Block;
        }
        if !self.is_enabled() {
            return Decision::Allow;
        }

        let Some(engine) = self.engine.read().clone() else {
            return Decision::Allow;
        };
        let kind = self.kinds.label(request.resource_type);
        if engine.check(&request.url, &request.initiator_url, kind) {
            trace!(url = %request.url, kind, "Blocking by filter rule");
            Decision::Block
        } else {
            Decision::Allow
        }
    }

    fn is_denied(&self, url: &str) -> bool {
        self.deny_substrings
            .iter()
            .any(|needle| !needle.is_empty() && url.contains(needle.as_str()))
    }

    /// Replace the filter engine. Classifications already holding the old one finish with it.
    pub fn swap_engine(&self, engine: Arc<dyn FilterEngine>) {
        *self.engine.write() = Some(engine);
    }

    pub fn has_engine(&self) -> bool {
        self.engine.read().is_some()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use proptest::prelude::*;

    #[derive(Default)]
    struct CountingEngine {
        calls: AtomicUsize,
        block: bool,
    }

    impl FilterEngine for CountingEngine {
        fn check(&self, _url: &str, _source_url: &str, _kind: &str) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.block
        }
    }

    fn script(url: &str) -> InterceptRequest {
        InterceptRequest::new(url, "https://page.example/", RawResourceType::Script)
    }

    #[test]
    fn test_deny_substring_skips_engine() {
        let interceptor = Interceptor::new(vec!["aswpsdkeu".into()], true);
        let engine = Arc::new(CountingEngine::default());
        interceptor.swap_engine(engine.clone());

        let decision = interceptor.classify(&script("https://cdn.aswpsdkeu.com/x.js"));
        assert_eq!(decision, Decision::Block);
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_malformed_url_is_blocked() {
        let interceptor = Interceptor::new(Vec::new(), false);
        assert_eq!(interceptor.classify(&script("not a url")), Decision::Block);
    }

    #[test]
    fn test_disabled_allows_without_engine() {
        let interceptor = Interceptor::new(Vec::new(), false);
        let engine = Arc::new(CountingEngine {
            block: true,
            ..Default::default()
        });
        interceptor.swap_engine(engine.clone());

        assert_eq!(interceptor.classify(&script("https://ads.example/x.js")), Decision::Allow);
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_engine_decides_when_enabled() {
        let interceptor = Interceptor::new(Vec::new(), true);
        assert_eq!(interceptor.classify(&script("https://ads.example/x.js")), Decision::Allow);

        interceptor.swap_engine(Arc::new(CountingEngine {
            block: true,
            ..Default::default()
        }));
        assert!(interceptor.has_engine());
        assert_eq!(interceptor.classify(&script("https://ads.example/x.js")), Decision::Block);
    }

    #[test]
    fn test_rule_engine_with_resource_kind() {
        let interceptor = Interceptor::new(Vec::new(), true);
        let lines = vec!["||tracker.example.com^$script".to_string()];
        interceptor.swap_engine(Arc::new(AdblockFilterEngine::from_lines(&lines)));

        let blocked = InterceptRequest::new(
            "https://tracker.example.com/t.js",
            "https://site.example.org/",
            RawResourceType::Script,
        );
        let allowed = InterceptRequest::new(
            "https://tracker.example.com/t.png",
            "https://site.example.org/",
            RawResourceType::Image,
        );
        assert_eq!(interceptor.classify(&blocked), Decision::Block);
        assert_eq!(interceptor.classify(&allowed), Decision::Allow);
    }

    proptest! {
        #[test]
        fn prop_deny_substring_always_blocks(
            prefix in "[a-z]{0,8}",
            suffix in "[a-z0-9/]{0,12}",
            enabled in any::<bool>(),
        ) {
            let interceptor = Interceptor::new(vec!["aswpsdkeu".into()], enabled);
            interceptor.swap_engine(Arc::new(CountingEngine::default()));
            let url = format!("https://{prefix}aswpsdkeu.com/{suffix}");
            prop_assert_eq!(interceptor.classify(&script(&url)), Decision::Block);
        }
    }
}
