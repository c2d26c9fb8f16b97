use adblock::Engine;
use adblock::lists::{FilterSet, ParseOptions};
use adblock::request::Request;
use tracing::info;

/// Compiled filter rules.
pub trait FilterEngine: Send + Sync {
    /// Whether a request for `url`, initiated by `source_url`, matches a blocking rule.
    fn check(&self, url: &str, source_url: &str, kind: &str) -> bool;
}

/// [`FilterEngine`] backed by the `adblock` crate.
pub struct AdblockFilterEngine {
    engine: Engine,
    rule_count: usize,
}

impl AdblockFilterEngine {
    pub fn from_lines(lines: &[String]) -> Self {
        let mut filter_set = FilterSet::new(false);
        filter_set.add_filter_list(&lines.join("\n"), ParseOptions::default());
        let engine = Engine::from_filter_set(filter_set, true);
        info!(rules = lines.len(), "Filter engine built");
        Self {
            engine,
            rule_count: lines.len(),
        }
    }

    pub fn rule_count(&self) -> usize {
        self.rule_count
    }
}

impl FilterEngine for AdblockFilterEngine {
    fn check(&self, url: &str, source_url: &str, kind: &str) -> bool {
        // Requests the crate cannot model (data:, blob:, bad initiators) are retried bare.
        let request = match Request::new(url, source_url, kind)
            .or_else(|_| Request::new(url, "", "other"))
        {
            Ok(request) => request,
            Err(_) => return false,
        };
        self.engine.check_network_request(&request).matched
    }
}

impl std::fmt::Debug for AdblockFilterEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdblockFilterEngine")
            .field("rule_count", &self.rule_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(rules: &[&str]) -> AdblockFilterEngine {
        let lines: Vec<String> = rules.iter().map(|r| r.to_string()).collect();
        AdblockFilterEngine::from_lines(&lines)
    }

    #[test]
    fn test_blocks_matching_rule() {
        let engine = engine(&["||ads.example.com^"]);
        assert!(engine.check("https://ads.example.com/banner.js", "https://news.example.org/", "script"));
        assert!(!engine.check("https://cdn.example.org/app.js", "https://news.example.org/", "script"));
    }

    #[test]
    fn test_typed_rule_needs_matching_kind() {
        let engine = engine(&["||tracker.example.com^$script"]);
        assert!(engine.check("https://tracker.example.com/t.js", "https://site.example.org/", "script"));
        assert!(!engine.check("https://tracker.example.com/t.png", "https://site.example.org/", "image"));
    }

    #[test]
    fn test_empty_engine_allows() {
        let engine = engine(&[]);
        assert_eq!(engine.rule_count(), 0);
        assert!(!engine.check("https://ads.example.com/x.js", "", "script"));
    }
}
