//! Per-build memo of the published article set, tags and authors.
//!
//! Everything is fetched once on first access. Detail content is fetched lazily
//! per slug and kept for the rest of the build.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use bookshelf_core::{paginate, reading_time, Article, Author, PageSlice, TagSummary};
use bookshelf_notion::{
    collect_database_pages, extract_file_object, extract_rich_text, extract_title, ContentSource,
    PageObject,
};
use futures::stream::{self, StreamExt};
use serde_json::Value as JsonValue;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use crate::assemble::ArticleAssembler;
use crate::query;

pub const DEFAULT_RECENT_LIMIT: usize = 12;
pub const DEFAULT_FEATURED_LIMIT: usize = 3;
pub const DEFAULT_RELATED_LIMIT: usize = 3;
pub const DEFAULT_TAGS_PER_PAGE: usize = 24;
const FEATURED_CATEGORY: &str = "Featured";

#[derive(Debug, Clone, Default)]
pub struct CacheSnapshot {
    /// Newest first, slugs unique.
    pub articles: Vec<Article>,
    pub tags: Vec<String>,
    /// Sorted by slug.
    pub authors: Vec<Author>,
}

/// Author record from a relation page. Pages without a `Slug` are not authors.
pub fn author_from_page(page: &PageObject) -> Option<Author> {
    let slug = extract_rich_text(page.property("Slug"));
    if slug.is_empty() {
        return None;
    }
    Some(Author {
        id: page.id.clone(),
        name: extract_title(first_present(page, &["Name", "Title", "Author Name"])),
        slug,
        description: extract_rich_text(first_present(page, &["Description", "Bio"])),
        image: extract_file_object(page.icon.as_ref()).or_else(|| extract_file_object(page.cover.as_ref())),
        article_count: 0,
    })
}

fn first_present<'a>(page: &'a PageObject, names: &[&str]) -> Option<&'a JsonValue> {
    names.iter().find_map(|name| page.property(name))
}

pub struct BuildCache {
    source: Arc<dyn ContentSource>,
    assembler: Arc<ArticleAssembler>,
    database_id: String,
    fan_out: usize,
    state: OnceCell<CacheSnapshot>,
    detailed: Mutex<HashMap<String, Arc<OnceCell<Article>>>>,
}

impl BuildCache {
    pub fn new(
        source: Arc<dyn ContentSource>,
        assembler: Arc<ArticleAssembler>,
        database_id: impl Into<String>,
        fan_out: usize,
    ) -> Self {
        Self {
            source,
            assembler,
            database_id: database_id.into(),
            fan_out: fan_out.max(1),
            state: OnceCell::new(),
            detailed: Mutex::new(HashMap::new()),
        }
    }

    pub fn assembler(&self) -> &Arc<ArticleAssembler> {
        &self.assembler
    }

    pub fn is_initialized(&self) -> bool {
        self.state.initialized()
    }

    /// Initializes on first call; concurrent callers share one initialization. A
    /// failed attempt leaves the cache empty so the next call tries again.
    pub async fn snapshot(&self) -> Result<&CacheSnapshot> {
        self.state.get_or_try_init(|| self.initialize()).await
    }

    async fn initialize(&self) -> Result<CacheSnapshot> {
        let started = Instant::now();
        let pages = collect_database_pages(self.source.as_ref(), &self.database_id)
            .await
            .with_context(|| format!("querying published pages of database {}", self.database_id))?;
        info!(pages = pages.len(), "fetched published pages");

        let assembled: Vec<Article> = stream::iter(pages.iter())
            .map(|page| self.assembler.assemble(page, false))
            .buffered(self.fan_out)
            .collect()
            .await;
        let articles = query::keep_unique_slugs(assembled);
        let tags = query::collect_tags(&articles);
        let authors = query::with_article_counts(self.precache_authors(&articles).await, &articles);

        info!(
            articles = articles.len(),
            tags = tags.len(),
            authors = authors.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "build cache initialized"
        );
        Ok(CacheSnapshot {
            articles,
            tags,
            authors,
        })
    }

    async fn precache_authors(&self, articles: &[Article]) -> Vec<Author> {
        let mut seen = HashSet::new();
        let ids: Vec<&str> = articles
            .iter()
            .flat_map(|a| a.author_relation_ids.iter())
            .map(String::as_str)
            .filter(|id| seen.insert(*id))
            .collect();

        // Shares the relation memo, so first authors resolved during assembly are not refetched.
        let relations = self.assembler.relations();
        let found: Vec<Option<Author>> = stream::iter(ids)
            .map(|id| async move {
                match relations.page(id).await {
                    Some(page) => author_from_page(&page),
                    None => {
                        debug!(author_id = id, "author page unavailable");
                        None
                    }
                }
            })
            .buffered(self.fan_out)
            .collect()
            .await;

        let mut by_slug = BTreeMap::new();
        for author in found.into_iter().flatten() {
            by_slug.entry(author.slug.clone()).or_insert(author);
        }
        by_slug.into_values().collect()
    }

    pub async fn all_articles(&self) -> Result<&[Article]> {
        Ok(&self.snapshot().await?.articles)
    }

    pub async fn all_tags(&self) -> Result<&[String]> {
        Ok(&self.snapshot().await?.tags)
    }

    pub async fn all_authors(&self) -> Result<&[Author]> {
        Ok(&self.snapshot().await?.authors)
    }

    pub async fn author_by_slug(&self, slug: &str) -> Result<Option<&Author>> {
        Ok(self.all_authors().await?.iter().find(|a| a.slug == slug))
    }

    /// Author page data: the pre-cached record, or one derived from the articles
    /// that carry `slug`. `None` when neither exists.
    pub async fn author_profile(&self, slug: &str) -> Result<Option<Author>> {
        let articles = self.articles_by_author(slug).await?;
        if let Some(author) = self.author_by_slug(slug).await? {
            let mut author = author.clone();
            if author.description.is_empty() {
                author.description = query::fallback_author_description(&author.name);
            }
            return Ok(Some(author));
        }
        Ok(articles.first().map(|first| Author {
            id: format!("author-{slug}"),
            name: first.author.clone(),
            slug: slug.to_string(),
            description: query::fallback_author_description(&first.author),
            image: None,
            article_count: articles.len(),
        }))
    }

    pub async fn recent_articles(&self, limit: usize) -> Result<&[Article]> {
        let articles = self.all_articles().await?;
        Ok(&articles[..limit.min(articles.len())])
    }

    pub async fn featured_articles(&self, limit: usize) -> Result<Vec<Article>> {
        Ok(self
            .all_articles()
            .await?
            .iter()
            .filter(|a| a.featured)
            .take(limit)
            .map(|a| Article {
                category: FEATURED_CATEGORY.to_string(),
                ..a.clone()
            })
            .collect())
    }

    pub async fn articles_by_tag(&self, tag_or_slug: &str) -> Result<Vec<Article>> {
        let found = query::filter_by_tag(self.all_articles().await?, tag_or_slug);
        debug!(tag = tag_or_slug, count = found.len(), "articles by tag");
        Ok(found)
    }

    pub async fn articles_by_author(&self, author_slug: &str) -> Result<Vec<Article>> {
        Ok(query::filter_by_author(self.all_articles().await?, author_slug))
    }

    pub async fn related_articles(&self, current: &Article, limit: usize) -> Result<Vec<Article>> {
        Ok(query::related(self.all_articles().await?, current, limit))
    }

    pub async fn tag_summaries(&self) -> Result<Vec<TagSummary>> {
        let snapshot = self.snapshot().await?;
        Ok(query::tag_summaries(&snapshot.tags, &snapshot.articles))
    }

    pub async fn search(&self, query_text: &str, limit: usize) -> Result<Vec<Article>> {
        Ok(query::search(self.all_articles().await?, query_text, limit))
    }

    pub async fn article_page(&self, page: usize, per_page: usize) -> Result<Option<PageSlice<Article>>> {
        Ok(paginate(self.all_articles().await?, page, per_page))
    }

    pub async fn tag_page(&self, page: usize, per_page: usize) -> Result<Option<PageSlice<TagSummary>>> {
        Ok(paginate(&self.tag_summaries().await?, page, per_page))
    }

    /// Full article with rendered content. Content is fetched at most once per slug;
    /// if it cannot be fetched the listing version is returned and a later call
    /// tries again.
    pub async fn article_by_slug(&self, slug: &str) -> Result<Option<Article>> {
        let Some(listed) = self.all_articles().await?.iter().find(|a| a.slug == slug) else {
            debug!(slug, "no article for slug");
            return Ok(None);
        };

        let cell = {
            let mut detailed = self.detailed.lock().await;
            detailed.entry(slug.to_string()).or_default().clone()
        };
        let loaded = cell
            .get_or_try_init(|| async {
                let html = self.assembler.render_content(&listed.id).await?;
                Ok::<_, bookshelf_notion::SourceError>(Article {
                    reading_time: reading_time(&html),
                    content: Some(html),
                    ..listed.clone()
                })
            })
            .await;

        match loaded {
            Ok(article) => Ok(Some(article.clone())),
            Err(err) => {
                warn!(slug, error = %err, "content fetch failed, returning article without content");
                Ok(Some(listed.clone()))
            }
        }
    }
}
