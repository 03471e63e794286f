//! Short-link redirect resolution

use tracing::{debug, warn};

use crate::repository::ShortLinkStore;

/// Outcome of resolving a short code
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Code exists; its click counter was incremented
    Found(String),
    NotFound,
    /// The store could not be reached
    Unavailable,
}

impl Resolution {
    /// Where the visitor should be sent, `fallback` unless the code resolved
    pub fn target<'a>(&'a self, fallback: &'a str) -> &'a str {
        match self {
            Resolution::Found(url) => url.as_str(),
            Resolution::NotFound | Resolution::Unavailable => fallback,
        }
    }
}

/// Looks up `code` and counts the click
///
/// Never fails: store errors are logged and reported as `Unavailable` so the
/// caller can fall back to its default redirect.
pub fn resolve<S: ShortLinkStore + ?Sized>(store: &S, code: &str) -> Resolution {
    match store.resolve_and_count(code) {
        Ok(Some(short_link)) => {
            debug!(code, clicks = short_link.clicks, "short link resolved");
            Resolution::Found(short_link.original_url)
        }
        Ok(None) => {
            debug!(code, "short link not found");
            Resolution::NotFound
        }
        Err(err) => {
            warn!(code, error = %err, "short link store unavailable");
            Resolution::Unavailable
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::model::ShortLink;
    use crate::repository::StoreResult;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct OneLink {
        clicks: AtomicU64,
    }

    impl ShortLinkStore for OneLink {
        fn create_short_link(&self, _: &ShortLink) -> StoreResult<()> {
            Ok(())
        }

        fn list_short_links(&self, _: &str) -> StoreResult<Vec<ShortLink>> {
            Ok(vec![])
        }

        fn resolve_and_count(&self, code: &str) -> StoreResult<Option<ShortLink>> {
            if code != "go" {
                return Ok(None);
            }
            let clicks = self.clicks.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Some(ShortLink {
                code: code.to_string(),
                original_url: "https://example.com/landing".to_string(),
                owner_id: "alice".to_string(),
                created_at: Utc::now(),
                clicks,
            }))
        }

        fn delete_short_link(&self, _: &str, _: &str) -> StoreResult<()> {
            Ok(())
        }
    }

    struct Down;

    fn unreachable_store() -> StoreError {
        StoreError::Database(redb::Error::Io(std::io::Error::other("disk detached")))
    }

    impl ShortLinkStore for Down {
        fn create_short_link(&self, _: &ShortLink) -> StoreResult<()> {
            Err(unreachable_store())
        }

        fn list_short_links(&self, _: &str) -> StoreResult<Vec<ShortLink>> {
            Err(unreachable_store())
        }

        fn resolve_and_count(&self, _: &str) -> StoreResult<Option<ShortLink>> {
            Err(unreachable_store())
        }

        fn delete_short_link(&self, _: &str, _: &str) -> StoreResult<()> {
            Err(unreachable_store())
        }
    }

    #[test]
    fn found_counts_each_resolution() {
        let store = OneLink {
            clicks: AtomicU64::new(0),
        };

        let resolution = resolve(&store, "go");
        assert_eq!(resolution, Resolution::Found("https://example.com/landing".to_string()));
        assert_eq!(resolution.target("/"), "https://example.com/landing");

        resolve(&store, "go");
        assert_eq!(store.clicks.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn missing_code_falls_back() {
        let store = OneLink {
            clicks: AtomicU64::new(0),
        };
        let resolution = resolve(&store, "nonexistent-code");
        assert_eq!(resolution, Resolution::NotFound);
        assert_eq!(resolution.target("/"), "/");
        assert_eq!(store.clicks.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn store_failure_falls_back() {
        let resolution = resolve(&Down, "go");
        assert_eq!(resolution, Resolution::Unavailable);
        assert_eq!(resolution.target("/"), "/");
    }
}
