//! Content source contract, wire models and block-tree retrieval.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use bookshelf_core::Block;
use bookshelf_storage::FetchError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;
use tracing::warn;

pub mod client;
pub mod extract;
pub mod fixture;

pub use client::{DatabaseQuery, NotionClient, NOTION_API_BASE, NOTION_SCOPE, NOTION_VERSION};
pub use extract::{
    block_from_object, extract_checkbox, extract_date, extract_file_object, extract_files_icon,
    extract_number, extract_rich_text, extract_title, extract_url, parse_rich_text,
};
pub use fixture::FixtureSource;

pub const CRATE_NAME: &str = "bookshelf-notion";
pub const DEFAULT_MAX_BLOCK_DEPTH: usize = 8;

/// One cursor page of a list endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub results: Vec<T>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

impl<T> Default for Paginated<T> {
    fn default() -> Self {
        Self {
            results: Vec::new(),
            has_more: false,
            next_cursor: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageObject {
    pub id: String,
    #[serde(default)]
    pub properties: Map<String, JsonValue>,
    #[serde(default)]
    pub cover: Option<JsonValue>,
    #[serde(default)]
    pub icon: Option<JsonValue>,
}

impl PageObject {
    pub fn property(&self, name: &str) -> Option<&JsonValue> {
        self.properties.get(name)
    }

    /// Ids of a relation property, in source order.
    pub fn relation_ids(&self, name: &str) -> Vec<String> {
        self.property(name)
            .and_then(|p| p.get("relation"))
            .and_then(JsonValue::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get("id").and_then(JsonValue::as_str))
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockObject {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub has_children: bool,
    /// Type-specific payload lives under the key named by `kind`.
    #[serde(flatten)]
    pub payload: Map<String, JsonValue>,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("decoding {context}: {source}")]
    Decode {
        context: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0} not found")]
    NotFound(String),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Read side of the content workspace.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Published pages of a database, newest first, one cursor page at a time.
    async fn query_database(
        &self,
        database_id: &str,
        cursor: Option<&str>,
    ) -> Result<Paginated<PageObject>, SourceError>;

    async fn retrieve_page(&self, page_id: &str) -> Result<PageObject, SourceError>;

    async fn list_block_children(
        &self,
        block_id: &str,
        cursor: Option<&str>,
    ) -> Result<Paginated<BlockObject>, SourceError>;
}

/// Follows the database cursor until exhausted.
pub async fn collect_database_pages(
    source: &dyn ContentSource,
    database_id: &str,
) -> Result<Vec<PageObject>, SourceError> {
    let mut pages = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let batch = source.query_database(database_id, cursor.as_deref()).await?;
        pages.extend(batch.results);
        match (batch.has_more, batch.next_cursor) {
            (true, Some(next)) => cursor = Some(next),
            _ => break,
        }
    }
    Ok(pages)
}

/// All children of `block_id`, following the cursor.
async fn list_all_children(
    source: &dyn ContentSource,
    block_id: &str,
) -> Result<Vec<BlockObject>, SourceError> {
    let mut blocks = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let batch = source.list_block_children(block_id, cursor.as_deref()).await?;
        blocks.extend(batch.results);
        match (batch.has_more, batch.next_cursor) {
            (true, Some(next)) => cursor = Some(next),
            _ => break,
        }
    }
    Ok(blocks)
}

type BlockTreeFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<Block>, SourceError>> + Send + 'a>>;

/// Typed block tree under `block_id`, at most `max_depth` levels deep.
///
/// Children are fetched one block at a time. Only a failure to list the top level
/// is an error; a nested block whose children cannot be listed keeps an empty
/// child list, and anything below `max_depth` is dropped.
pub fn fetch_block_tree<'a>(
    source: &'a dyn ContentSource,
    block_id: &'a str,
    max_depth: usize,
) -> BlockTreeFuture<'a> {
    fetch_level(source, block_id.to_string(), 0, max_depth)
}

fn fetch_level<'a>(
    source: &'a dyn ContentSource,
    block_id: String,
    depth: usize,
    max_depth: usize,
) -> BlockTreeFuture<'a> {
    Box::pin(async move {
        let raw = list_all_children(source, &block_id).await?;
        let mut blocks = Vec::with_capacity(raw.len());
        for object in raw {
            let mut block = block_from_object(&object);
            if object.has_children {
                if depth + 1 < max_depth {
                    match fetch_level(source, object.id.clone(), depth + 1, max_depth).await {
                        Ok(children) => block.set_children(children),
                        Err(err) => {
                            warn!(block_id = %object.id, error = %err, "failed to list block children")
                        }
                    }
                } else {
                    warn!(block_id = %object.id, depth, "block nesting too deep, children dropped");
                }
            }
            blocks.push(block);
        }
        Ok(blocks)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bookshelf_core::RichText;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Blocks keyed by parent id, served in pages of `page_size`.
    #[derive(Default)]
    struct MemorySource {
        children: HashMap<String, Vec<BlockObject>>,
        failing: Vec<String>,
        page_size: usize,
        calls: AtomicUsize,
    }

    impl MemorySource {
        fn with(mut self, parent: &str, blocks: Vec<JsonValue>) -> Self {
            let blocks = blocks
                .into_iter()
                .map(|b| serde_json::from_value(b).expect("block"))
                .collect();
            self.children.insert(parent.to_string(), blocks);
            self
        }
    }

    #[async_trait]
    impl ContentSource for MemorySource {
        async fn query_database(
            &self,
            _database_id: &str,
            _cursor: Option<&str>,
        ) -> Result<Paginated<PageObject>, SourceError> {
            Ok(Paginated::default())
        }

        async fn retrieve_page(&self, page_id: &str) -> Result<PageObject, SourceError> {
            Err(SourceError::NotFound(page_id.to_string()))
        }

        async fn list_block_children(
            &self,
            block_id: &str,
            cursor: Option<&str>,
        ) -> Result<Paginated<BlockObject>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.iter().any(|id| id == block_id) {
                return Err(SourceError::NotFound(block_id.to_string()));
            }
            let all = self.children.get(block_id).cloned().unwrap_or_default();
            let page_size = self.page_size.max(1);
            let start: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
            let end = (start + page_size).min(all.len());
            Ok(Paginated {
                results: all[start.min(end)..end].to_vec(),
                has_more: end < all.len(),
                next_cursor: (end < all.len()).then(|| end.to_string()),
            })
        }
    }

    fn paragraph(id: &str, text: &str, has_children: bool) -> JsonValue {
        json!({
            "object": "block", "id": id, "type": "paragraph", "has_children": has_children,
            "paragraph": {"rich_text": [{"plain_text": text}]}
        })
    }

    #[tokio::test]
    async fn block_tree_follows_cursors_and_nesting() {
        let source = MemorySource {
            page_size: 2,
            ..Default::default()
        }
        .with(
            "page",
            vec![
                paragraph("a", "one", false),
                paragraph("b", "two", true),
                paragraph("c", "three", false),
            ],
        )
        .with("b", vec![paragraph("b1", "nested", false)]);

        let tree = fetch_block_tree(&source, "page", DEFAULT_MAX_BLOCK_DEPTH)
            .await
            .expect("tree");
        assert_eq!(tree.len(), 3);
        assert_eq!(
            tree[1],
            Block::Paragraph {
                text: vec![RichText::plain("two")],
                children: vec![Block::Paragraph {
                    text: vec![RichText::plain("nested")],
                    children: vec![],
                }],
            }
        );
        // page: 2 cursor pages, b: 1
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn depth_bound_drops_deeper_children() {
        let source = MemorySource::default()
            .with("page", vec![paragraph("l1", "level one", true)])
            .with("l1", vec![paragraph("l2", "level two", true)])
            .with("l2", vec![paragraph("l3", "level three", false)]);

        let tree = fetch_block_tree(&source, "page", 2).await.expect("tree");
        let level_two = &tree[0].children()[0];
        assert_eq!(
            level_two,
            &Block::Paragraph {
                text: vec![RichText::plain("level two")],
                children: vec![],
            }
        );
    }

    #[tokio::test]
    async fn failed_child_fetch_keeps_parent() {
        let source = MemorySource {
            failing: vec!["broken".to_string()],
            ..Default::default()
        }
        .with("page", vec![paragraph("broken", "parent", true)]);

        let tree = fetch_block_tree(&source, "page", DEFAULT_MAX_BLOCK_DEPTH)
            .await
            .expect("tree");
        assert_eq!(tree.len(), 1);
        assert!(tree[0].children().is_empty());

        let missing = fetch_block_tree(&source, "nothing-here", DEFAULT_MAX_BLOCK_DEPTH)
            .await
            .expect("empty tree");
        assert!(missing.is_empty());

        let top_level = fetch_block_tree(&source, "broken", DEFAULT_MAX_BLOCK_DEPTH).await;
        assert!(matches!(top_level, Err(SourceError::NotFound(_))));
    }

    #[test]
    fn relation_ids_keep_source_order() {
        let page: PageObject = serde_json::from_value(json!({
            "id": "p",
            "properties": {
                "Author": {"type": "relation", "relation": [{"id": "a1"}, {"id": "a2"}]},
                "Tags": {"type": "relation", "relation": []}
            }
        }))
        .expect("page");
        assert_eq!(page.relation_ids("Author"), vec!["a1", "a2"]);
        assert!(page.relation_ids("Tags").is_empty());
        assert!(page.relation_ids("Missing").is_empty());
    }
}
