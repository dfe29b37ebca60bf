//! Memoized lookup of related records (authors, tags) by id.

use std::collections::HashMap;
use std::sync::Arc;

use bookshelf_core::RelationRef;
use bookshelf_notion::{extract_rich_text, extract_title, ContentSource, PageObject};
use tokio::sync::{Mutex, OnceCell};
use tracing::warn;

/// Title properties tried in order when naming a related record.
pub const RELATION_TITLE_PROPERTIES: [&str; 5] = ["Name", "Title", "Post Title", "Tag Name", "Author Name"];

pub fn relation_from_page(page: &PageObject) -> RelationRef {
    let name = RELATION_TITLE_PROPERTIES
        .iter()
        .map(|prop| extract_title(page.property(prop)))
        .find(|title| !title.is_empty())
        .unwrap_or_else(|| RelationRef::unknown().name);
    let slug = Some(extract_rich_text(page.property("Slug"))).filter(|s| !s.is_empty());
    RelationRef { name, slug }
}

/// One upstream lookup per id for the lifetime of the resolver, failures included.
/// The fetched page is kept so author pre-caching reads the same memo.
pub struct RelationResolver {
    source: Arc<dyn ContentSource>,
    entries: Mutex<HashMap<String, Arc<OnceCell<Option<Arc<PageObject>>>>>>,
}

impl RelationResolver {
    pub fn new(source: Arc<dyn ContentSource>) -> Self {
        Self {
            source,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn resolve(&self, relation_id: &str) -> RelationRef {
        match self.page(relation_id).await {
            Some(page) => relation_from_page(&page),
            None => RelationRef::unknown(),
        }
    }

    /// The related page, or `None` when it could not be fetched.
    pub async fn page(&self, relation_id: &str) -> Option<Arc<PageObject>> {
        let cell = {
            let mut entries = self.entries.lock().await;
            entries.entry(relation_id.to_string()).or_default().clone()
        };
        cell.get_or_init(|| self.lookup(relation_id)).await.clone()
    }

    async fn lookup(&self, relation_id: &str) -> Option<Arc<PageObject>> {
        match self.source.retrieve_page(relation_id).await {
            Ok(page) => Some(Arc::new(page)),
            Err(err) => {
                warn!(relation_id, error = %err, "relation lookup failed");
                None
            }
        }
    }

    pub async fn cached_len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixture_source, CountingSource};
    use futures::future::join_all;
    use serde_json::json;

    #[test]
    fn name_follows_property_priority() {
        let page: PageObject = serde_json::from_value(json!({
            "id": "r",
            "properties": {
                "Title": {"title": []},
                "Post Title": {"title": [{"plain_text": "From Post Title"}]},
                "Author Name": {"title": [{"plain_text": "From Author Name"}]},
                "Slug": {"rich_text": [{"plain_text": "post-title"}]}
            }
        }))
        .expect("page");
        let resolved = relation_from_page(&page);
        assert_eq!(resolved.name, "From Post Title");
        assert_eq!(resolved.slug.as_deref(), Some("post-title"));

        let bare: PageObject = serde_json::from_value(json!({"id": "b"})).expect("page");
        assert_eq!(relation_from_page(&bare), RelationRef::unknown());
    }

    #[tokio::test]
    async fn resolves_fixture_relations() {
        let resolver = RelationResolver::new(fixture_source());
        let tag = resolver.resolve("tag-scifi").await;
        assert_eq!(tag.name, "Science Fiction");
        assert_eq!(tag.slug.as_deref(), Some("science-fiction"));

        let author = resolver.resolve("author-tolkien").await;
        assert_eq!(author.name, "J. R. R. Tolkien");
        assert_eq!(author.slug, None);
    }

    #[tokio::test]
    async fn concurrent_lookups_fetch_once() {
        let source = Arc::new(CountingSource::new(fixture_source()));
        let resolver = RelationResolver::new(source.clone());

        let results = join_all((0..8).map(|_| resolver.resolve("author-herbert"))).await;
        assert!(results.iter().all(|r| r.name == "Frank Herbert"));
        assert_eq!(source.page_fetches(), 1);
        assert_eq!(resolver.cached_len().await, 1);
    }

    #[tokio::test]
    async fn failures_are_cached_as_unknown() {
        let source = Arc::new(CountingSource::new(fixture_source()));
        let resolver = RelationResolver::new(source.clone());

        assert_eq!(resolver.resolve("author-missing").await, RelationRef::unknown());
        assert_eq!(resolver.resolve("author-missing").await, RelationRef::unknown());
        assert_eq!(source.page_fetches(), 1);
    }
}
