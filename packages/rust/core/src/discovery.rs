//! Discovery collaborator seam.
//!
//! Feed construction and external search live outside the core; the
//! pipeline only consumes candidate URLs through this trait. Origins
//! may use the `silo:N` convention to force-route a candidate past the
//! classifier.

use async_trait::async_trait;

use bookforge_shared::Result;

/// A candidate URL produced by discovery.
#[derive(Debug, Clone)]
pub struct SourceCandidate {
    pub url: String,
    /// Origin label; `None` lets the queue apply its default.
    pub origin: Option<String>,
}

impl SourceCandidate {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            origin: None,
        }
    }

    pub fn with_origin(url: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            origin: Some(origin.into()),
        }
    }
}

/// Supplies candidate source URLs for a topic.
#[async_trait]
pub trait DiscoverySource: Send + Sync {
    /// Gather candidates. `per_feed_limit` narrows breadth per underlying
    /// feed; `None` means unbounded.
    async fn discover(
        &self,
        topic_name: &str,
        per_feed_limit: Option<usize>,
    ) -> Result<Vec<SourceCandidate>>;
}

/// Discovery over a fixed seed list. The per-feed limit truncates the
/// list, treating the whole seed set as one feed.
pub struct StaticDiscovery {
    seeds: Vec<SourceCandidate>,
}

impl StaticDiscovery {
    pub fn new(seeds: Vec<SourceCandidate>) -> Self {
        Self { seeds }
    }
}

#[async_trait]
impl DiscoverySource for StaticDiscovery {
    async fn discover(
        &self,
        _topic_name: &str,
        per_feed_limit: Option<usize>,
    ) -> Result<Vec<SourceCandidate>> {
        let mut out = self.seeds.clone();
        if let Some(limit) = per_feed_limit {
            out.truncate(limit);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_discovery_honors_limit() {
        let discovery = StaticDiscovery::new(vec![
            SourceCandidate::new("https://a.example/1"),
            SourceCandidate::with_origin("https://a.example/2", "silo:3"),
            SourceCandidate::new("https://a.example/3"),
        ]);

        let all = discovery.discover("topic", None).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[1].origin.as_deref(), Some("silo:3"));

        let narrowed = discovery.discover("topic", Some(2)).await.unwrap();
        assert_eq!(narrowed.len(), 2);
    }
}
