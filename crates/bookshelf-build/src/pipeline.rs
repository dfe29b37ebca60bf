//! One build run: fetch, assemble and write every generated artifact.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{ensure, Context, Result};
use bookshelf_core::html::collect_image_urls;
use bookshelf_core::{slugify, Article};
use bookshelf_notion::{
    collect_database_pages, extract_file_object, fetch_block_tree, ContentSource, FixtureSource,
    NotionClient, PageObject,
};
use bookshelf_storage::{HttpFetcher, ImagePipeline, MediaFetcher};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::assemble::ArticleAssembler;
use crate::cache::BuildCache;
use crate::config::{BuildConfig, SourceMode};
use crate::relations::RelationResolver;
use crate::site;

const FILE_HASH_LEN: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct BuildRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub source: String,
    pub articles: usize,
    pub articles_with_content: usize,
    pub tags: usize,
    pub authors: usize,
    pub output_dir: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImagePrefetchSummary {
    pub pages: usize,
    pub processed: usize,
    pub fallbacks: usize,
}

impl ImagePrefetchSummary {
    fn add(mut self, other: ImagePrefetchSummary) -> Self {
        self.pages += other.pages;
        self.processed += other.processed;
        self.fallbacks += other.fallbacks;
        self
    }
}

pub struct BuildPipeline {
    config: BuildConfig,
    source: Arc<dyn ContentSource>,
    cache: BuildCache,
}

impl BuildPipeline {
    /// Live HTTP wiring: the Notion API or a fixtures directory for content, and
    /// the rate-limited fetcher for media either way.
    pub fn new(config: BuildConfig) -> Result<Self> {
        let http = Arc::new(HttpFetcher::new(config.http_config()).context("building http client")?);
        let source: Arc<dyn ContentSource> = match &config.source {
            SourceMode::Notion { api_key, .. } => Arc::new(NotionClient::new(http.clone(), api_key.clone())),
            SourceMode::Fixtures { dir } => Arc::new(FixtureSource::new(dir.clone())),
        };
        Ok(Self::with_parts(config, source, http))
    }

    pub fn with_parts(
        config: BuildConfig,
        source: Arc<dyn ContentSource>,
        media: Arc<dyn MediaFetcher>,
    ) -> Self {
        let images = Arc::new(ImagePipeline::new(config.image_config(), media));
        let relations = Arc::new(RelationResolver::new(source.clone()));
        let assembler = Arc::new(ArticleAssembler::new(
            source.clone(),
            relations,
            images,
            config.site.max_block_depth,
        ));
        let cache = BuildCache::new(source.clone(), assembler, config.database_id(), config.site.fan_out);
        Self {
            config,
            source,
            cache,
        }
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn cache(&self) -> &BuildCache {
        &self.cache
    }

    fn source_label(&self) -> &'static str {
        match self.config.source {
            SourceMode::Notion { .. } => "notion",
            SourceMode::Fixtures { .. } => "fixtures",
        }
    }

    pub async fn run_once(&self) -> Result<BuildRunSummary> {
        let run_id = Uuid::new_v4();
        let span = info_span!("build_run", %run_id, source = self.source_label());
        self.run_inner(run_id).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid) -> Result<BuildRunSummary> {
        let started_at = Utc::now();
        let snapshot = self.cache.snapshot().await?;
        let out = &self.config.output_dir;
        let articles_dir = out.join("articles");
        fs::create_dir_all(&articles_dir)
            .await
            .with_context(|| format!("creating {}", articles_dir.display()))?;

        write_json(&out.join("articles.json"), &snapshot.articles).await?;
        write_json(&out.join("tags.json"), &self.cache.tag_summaries().await?).await?;
        write_json(&out.join("authors.json"), &snapshot.authors).await?;

        let detailed: Vec<Result<Option<Article>>> = stream::iter(snapshot.articles.iter())
            .map(|article| self.cache.article_by_slug(&article.slug))
            .buffered(self.config.site.fan_out.max(1))
            .collect()
            .await;
        let mut articles_with_content = 0usize;
        let mut file_names = HashSet::new();
        for article in detailed {
            let Some(article) = article? else { continue };
            if article.content.is_some() {
                articles_with_content += 1;
            }
            let file_name = article_file_name(&article.slug);
            ensure!(
                file_names.insert(file_name.clone()),
                "article {} (slug {:?}) would overwrite {}",
                article.id,
                article.slug,
                file_name
            );
            write_json(&articles_dir.join(file_name), &article).await?;
        }

        let entries = site::sitemap_entries(
            &self.config.site.base_url,
            &snapshot.articles,
            &snapshot.tags,
            self.config.site.articles_per_page,
            started_at,
        );
        write_text(&out.join("sitemap.xml"), &site::render_sitemap(&entries)).await?;
        write_text(&out.join("robots.txt"), &site::robots_txt(&self.config.site.base_url)).await?;

        let summary = BuildRunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            source: self.source_label().to_string(),
            articles: snapshot.articles.len(),
            articles_with_content,
            tags: snapshot.tags.len(),
            authors: snapshot.authors.len(),
            output_dir: out.display().to_string(),
        };
        write_json(&out.join("build_summary.json"), &summary).await?;
        info!(
            articles = summary.articles,
            with_content = summary.articles_with_content,
            tags = summary.tags,
            authors = summary.authors,
            "build complete"
        );
        Ok(summary)
    }

    /// Runs every cover, icon and inline image of every published page through
    /// the image pipeline so a later build only hits the local cache.
    pub async fn prefetch_images(&self) -> Result<ImagePrefetchSummary> {
        let span = info_span!("image_prefetch", database_id = self.config.database_id());
        self.prefetch_inner().instrument(span).await
    }

    async fn prefetch_inner(&self) -> Result<ImagePrefetchSummary> {
        let pages = collect_database_pages(self.source.as_ref(), self.config.database_id())
            .await
            .context("listing published pages for image pre-fetch")?;
        let summary = stream::iter(pages.iter())
            .map(|page| self.prefetch_page(page))
            .buffer_unordered(self.config.site.fan_out.max(1))
            .fold(ImagePrefetchSummary::default(), |acc, page| async move { acc.add(page) })
            .await;
        info!(
            pages = summary.pages,
            processed = summary.processed,
            fallbacks = summary.fallbacks,
            "image pre-fetch complete"
        );
        Ok(summary)
    }

    async fn prefetch_page(&self, page: &PageObject) -> ImagePrefetchSummary {
        let images: &ImagePipeline = self.cache.assembler().images();
        let mut urls: Vec<String> = [page.cover.as_ref(), page.icon.as_ref()]
            .into_iter()
            .filter_map(extract_file_object)
            .collect();
        match fetch_block_tree(self.source.as_ref(), &page.id, self.config.site.max_block_depth).await {
            Ok(blocks) => urls.extend(collect_image_urls(&blocks)),
            Err(err) => warn!(page_id = %page.id, error = %err, "block tree unavailable for image pre-fetch"),
        }
        let mut seen = HashSet::new();
        urls.retain(|url| !url.is_empty() && seen.insert(url.clone()));

        let mut summary = ImagePrefetchSummary {
            pages: 1,
            ..Default::default()
        };
        for url in &urls {
            let processed = images.process(url, &page.id).await;
            if processed.src == *url {
                summary.fallbacks += 1;
            } else {
                summary.processed += 1;
            }
        }
        summary
    }

    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<Article>> {
        self.cache.search(query, limit).await
    }
}

/// Lowercase ASCII slugs are used as file names as-is. Any other slug is
/// slugified and suffixed with a short hash of the original, so two distinct
/// slugs never land on the same file.
fn article_file_name(slug: &str) -> String {
    let plain = !slug.is_empty()
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
    if plain {
        return format!("{slug}.json");
    }
    let digest = hex::encode(Sha256::digest(slug.as_bytes()));
    let short = &digest[..FILE_HASH_LEN];
    match slugify(slug) {
        base if base.is_empty() => format!("{short}.json"),
        base => format!("{base}-{short}.json"),
    }
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value).with_context(|| format!("serializing {}", path.display()))?;
    fs::write(path, bytes)
        .await
        .with_context(|| format!("writing {}", path.display()))
}

async fn write_text(path: &Path, text: &str) -> Result<()> {
    fs::write(path, text)
        .await
        .with_context(|| format!("writing {}", path.display()))
}

pub async fn run_build_once_from_env() -> Result<BuildRunSummary> {
    let config = BuildConfig::from_env()?;
    BuildPipeline::new(config)?.run_once().await
}

/// Config from the environment, optionally pointed at a fixtures directory.
pub fn config_from_env(fixtures: Option<PathBuf>) -> Result<BuildConfig> {
    match fixtures {
        Some(dir) => Ok(BuildConfig::from_lookup(|name| match name {
            "BOOKSHELF_FIXTURES_DIR" => Some(dir.display().to_string()),
            other => std::env::var(other).ok(),
        })?),
        None => Ok(BuildConfig::from_env()?),
    }
}
