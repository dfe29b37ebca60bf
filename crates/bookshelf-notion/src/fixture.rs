//! Offline [`ContentSource`] backed by a directory of JSON captures.
//!
//! Layout:
//!
//! ```text
//! <root>/database.json        {"results": [page, ...]}   every page, published or not
//! <root>/pages/<id>.json      page                        relation targets (authors, tags)
//! <root>/blocks/<id>.json     {"results": [block, ...]}  children of a page or block
//! ```
//!
//! Database queries apply the same published filter and date ordering as the live
//! API, and every list is served in cursor pages so pagination paths get exercised.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::extract::{extract_checkbox, extract_date};
use crate::{BlockObject, ContentSource, DatabaseQuery, PageObject, Paginated, SourceError};

#[derive(Debug, Clone)]
pub struct FixtureSource {
    root: PathBuf,
    page_size: usize,
    query: DatabaseQuery,
}

impl FixtureSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            page_size: 100,
            query: DatabaseQuery::default(),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn database_pages(&self) -> Result<Vec<PageObject>> {
        let listing: Paginated<PageObject> = read_json_file(self.root.join("database.json"))?;
        Ok(listing.results)
    }

    fn published_pages(&self) -> Result<Vec<PageObject>> {
        let mut pages: Vec<PageObject> = self
            .database_pages()?
            .into_iter()
            .filter(|page| extract_checkbox(page.property(&self.query.published_property)))
            .collect();
        // ISO dates order lexically; stable sort keeps capture order for ties.
        pages.sort_by_cached_key(|page| {
            std::cmp::Reverse(extract_date(page.property(&self.query.sort_property)))
        });
        Ok(pages)
    }

    fn page_window<T: Clone>(&self, items: &[T], cursor: Option<&str>) -> Paginated<T> {
        let start = cursor
            .and_then(|c| c.parse::<usize>().ok())
            .unwrap_or(0)
            .min(items.len());
        let end = (start + self.page_size).min(items.len());
        let has_more = end < items.len();
        Paginated {
            results: items[start..end].to_vec(),
            has_more,
            next_cursor: has_more.then(|| end.to_string()),
        }
    }
}

fn read_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

#[async_trait]
impl ContentSource for FixtureSource {
    async fn query_database(
        &self,
        _database_id: &str,
        cursor: Option<&str>,
    ) -> Result<Paginated<PageObject>, SourceError> {
        let pages = self.published_pages()?;
        Ok(self.page_window(&pages, cursor))
    }

    async fn retrieve_page(&self, page_id: &str) -> Result<PageObject, SourceError> {
        let path = self.root.join("pages").join(format!("{page_id}.json"));
        if path.exists() {
            return Ok(read_json_file(&path)?);
        }
        self.database_pages()?
            .into_iter()
            .find(|page| page.id == page_id)
            .ok_or_else(|| SourceError::NotFound(format!("page {page_id}")))
    }

    async fn list_block_children(
        &self,
        block_id: &str,
        cursor: Option<&str>,
    ) -> Result<Paginated<BlockObject>, SourceError> {
        let path = self.root.join("blocks").join(format!("{block_id}.json"));
        if !path.exists() {
            return Ok(Paginated::default());
        }
        let listing: Paginated<BlockObject> = read_json_file(&path)?;
        Ok(self.page_window(&listing.results, cursor))
    }
}
