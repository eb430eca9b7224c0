//! Directory listings for one server, served from the cache when possible.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info};

use super::{normalize_path, DirectoryCache, DirectoryListing, FileMutation};
use crate::api::PanelApiClient;
use crate::error::SyncResult;
use crate::models::ServerIdentity;
use crate::traits::HttpClient;

/// Cached directory browser for one server.
pub struct DirectoryView<H: HttpClient> {
    api: Arc<PanelApiClient<H>>,
    identity: ServerIdentity,
    cache: Mutex<DirectoryCache>,
}

impl<H: HttpClient> std::fmt::Debug for DirectoryView<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryView")
            .field("server", &self.identity)
            .field("cached", &self.lock().len())
            .finish()
    }
}

impl<H: HttpClient> DirectoryView<H> {
    pub fn new(api: Arc<PanelApiClient<H>>, identity: ServerIdentity, limit: usize) -> Self {
        Self {
            api,
            identity,
            cache: Mutex::new(DirectoryCache::new(limit)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DirectoryCache> {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Listing for `path`, from the cache or else from the panel.
    pub async fn list(&self, path: &str) -> SyncResult<DirectoryListing> {
        if let Some(listing) = self.cached(path) {
            debug!(path = %listing.path, "directory cache hit");
            return Ok(listing);
        }
        self.refresh(path).await
    }

    /// Fetch `path` from the panel and cache the result.
    ///
    /// A listing whose fetch overlapped an invalidation is returned but not
    /// cached.
    pub async fn refresh(&self, path: &str) -> SyncResult<DirectoryListing> {
        let path = normalize_path(path);
        let generation = self.lock().generation();

        let entries = self.api.list_directory(&self.identity, &path).await?;

        let mut cache = self.lock();
        if cache.generation() == generation {
            return Ok(cache.populate(&path, entries).clone());
        }
        debug!(%path, "directory changed during fetch, not caching");
        let mut scratch = DirectoryCache::new(cache.limit());
        Ok(scratch.populate(&path, entries).clone())
    }

    /// The cached listing for `path`, without fetching.
    pub fn cached(&self, path: &str) -> Option<DirectoryListing> {
        self.lock().get(path).cloned()
    }

    /// Drop `path` and everything cached below it.
    pub fn invalidate(&self, path: &str) -> usize {
        self.lock().invalidate(path)
    }

    /// Invalidate every directory a completed file operation touched.
    /// Returns how many listings were dropped.
    pub fn apply_mutation(&self, mutation: &FileMutation) -> usize {
        let mut cache = self.lock();
        let removed: usize = mutation
            .affected_directories()
            .iter()
            .map(|dir| cache.invalidate(dir))
            .sum();
        info!(server = %self.identity, %mutation, removed, "file mutation applied to cache");
        removed
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::{MockHttpClient, MockResponse};
    use crate::cache::tests::entries;
    use serde_json::json;
    use uuid::Uuid;

    const BASE: &str = "https://panel.test/api/client";
    const LIST_URL: &str = "https://panel.test/api/client/servers/1a7ce997/files/list?directory=";

    fn listing_body(count: usize) -> serde_json::Value {
        let data: Vec<_> = entries(count)
            .into_iter()
            .map(|entry| json!({"object": "file_object", "attributes": entry}))
            .collect();
        json!({"object": "list", "data": data})
    }

    fn view(http: &MockHttpClient) -> DirectoryView<MockHttpClient> {
        let identity = ServerIdentity::from_uuid(
            Uuid::parse_str("1a7ce997-259b-452e-8b4e-cecc464142ca").unwrap(),
        );
        let api = Arc::new(PanelApiClient::new(http.clone(), BASE));
        DirectoryView::new(api, identity, 500)
    }

    fn url(path: &str) -> String {
        format!("{}{}", LIST_URL, urlencoding::encode(path))
    }

    #[tokio::test]
    async fn test_list_truncates_and_caches() {
        let http = MockHttpClient::new();
        http.set_response(&url("/plugins"), MockResponse::json(200, listing_body(600)));
        let view = view(&http);

        let listing = view.list("/plugins").await.unwrap();
        assert_eq!(listing.entries.len(), 500);
        assert!(listing.truncated);

        view.list("/plugins/").await.unwrap();
        assert_eq!(http.request_count("GET", &url("/plugins")), 1);
    }

    #[tokio::test]
    async fn test_small_listing() {
        let http = MockHttpClient::new();
        http.set_response(&url("/"), MockResponse::json(200, listing_body(10)));
        let listing = view(&http).list("/").await.unwrap();
        assert_eq!(listing.entries.len(), 10);
        assert!(!listing.truncated);
    }

    #[tokio::test]
    async fn test_mutation_forces_refetch() {
        let http = MockHttpClient::new();
        http.set_response(&url("/world"), MockResponse::json(200, listing_body(3)));
        http.set_response(&url("/world/region"), MockResponse::json(200, listing_body(2)));
        http.set_response(&url("/logs"), MockResponse::json(200, listing_body(1)));
        let view = view(&http);
        for path in ["/world", "/world/region", "/logs"] {
            view.list(path).await.unwrap();
        }

        let removed = view.apply_mutation(&FileMutation::Delete {
            root: "/world".into(),
            files: vec!["region".into()],
        });
        assert_eq!(removed, 2);
        assert!(view.cached("/logs").is_some());

        view.list("/world").await.unwrap();
        assert_eq!(http.request_count("GET", &url("/world")), 2);
        assert_eq!(http.request_count("GET", &url("/logs")), 1);
    }

    #[tokio::test]
    async fn test_failed_listing_is_not_cached() {
        let http = MockHttpClient::new();
        http.set_response(
            &url("/secret"),
            MockResponse::json(404, json!({"errors": [{"code": "NotFoundHttpException", "detail": "not found"}]})),
        );
        let view = view(&http);

        assert!(view.list("/secret").await.is_err());
        assert!(view.cached("/secret").is_none());
    }
}
