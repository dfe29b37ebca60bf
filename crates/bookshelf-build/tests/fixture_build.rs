use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bookshelf_build::{BuildConfig, BuildPipeline, ImagePrefetchSummary};
use bookshelf_notion::FixtureSource;
use bookshelf_storage::{FetchError, MediaFetcher};
use image::{DynamicImage, ImageFormat, RgbImage};
use serde_json::Value;

fn fixtures_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../fixtures/notion")
        .canonicalize()
        .expect("fixtures root")
}

/// Serves a small PNG for cover images and 404s for everything else.
#[derive(Default)]
struct CoverOnlyFetcher {
    calls: AtomicUsize,
}

#[async_trait]
impl MediaFetcher for CoverOnlyFetcher {
    async fn fetch_media(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !url.contains("cover") {
            return Err(FetchError::HttpStatus {
                status: 404,
                url: url.to_string(),
            });
        }
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 20, image::Rgb([10, 120, 200])))
            .write_to(&mut out, ImageFormat::Png)
            .expect("encode png");
        Ok(out.into_inner())
    }
}

fn config(output: &Path, media: &Path) -> BuildConfig {
    let mut config = BuildConfig::for_fixtures(fixtures_root(), output);
    config.site.media.dest_dir = media.to_path_buf();
    config
}

fn pipeline(config: BuildConfig, fetcher: Arc<CoverOnlyFetcher>) -> BuildPipeline {
    let source = Arc::new(FixtureSource::new(fixtures_root()).with_page_size(2));
    BuildPipeline::with_parts(config, source, fetcher)
}

fn read_json(path: &Path) -> Value {
    let text = std::fs::read_to_string(path).unwrap_or_else(|e| panic!("reading {}: {e}", path.display()));
    serde_json::from_str(&text).expect("json")
}

#[tokio::test]
async fn fixture_build_writes_every_artifact() {
    let out = tempfile::tempdir().expect("output dir");
    let media = tempfile::tempdir().expect("media dir");
    let build = pipeline(config(out.path(), media.path()), Arc::new(CoverOnlyFetcher::default()));

    let summary = build.run_once().await.expect("build");
    assert_eq!(summary.source, "fixtures");
    assert_eq!(summary.articles, 4);
    assert_eq!(summary.articles_with_content, 4);
    assert_eq!(summary.tags, 2);
    assert_eq!(summary.authors, 2);

    let articles = read_json(&out.path().join("articles.json"));
    let slugs: Vec<&str> = articles
        .as_array()
        .expect("array")
        .iter()
        .map(|a| a["slug"].as_str().expect("slug"))
        .collect();
    assert_eq!(
        slugs,
        vec!["dune", "the-left-hand-of-darkness", "the-hobbit", "the-unknown-author-book"]
    );
    assert!(articles[0]["content"].is_null());

    let dune = read_json(&out.path().join("articles/dune.json"));
    let content = dune["content"].as_str().expect("content");
    assert!(content.starts_with("<h1>Dune</h1>"));
    // Inline image could not be fetched, so it keeps its remote URL.
    assert!(content.contains("https://images.example.test/inline/arrakis.png"));
    assert!(dune["image"].as_str().expect("cover").starts_with("/images/notion/"));

    let left_hand = read_json(&out.path().join("articles/the-left-hand-of-darkness.json"));
    assert_eq!(left_hand["image"], "/images/notion/left-hand-cover.webp");
    assert!(media.path().join("left-hand-cover.webp").exists());

    let tags = read_json(&out.path().join("tags.json"));
    assert_eq!(tags[0]["name"], "Science Fiction");
    assert_eq!(tags[0]["article_count"], 2);

    let authors = read_json(&out.path().join("authors.json"));
    assert_eq!(authors[0]["slug"], "frank-herbert");

    let sitemap = std::fs::read_to_string(out.path().join("sitemap.xml")).expect("sitemap");
    assert!(sitemap.contains("<loc>https://booksarecool.gr/dune</loc>"));
    assert!(sitemap.contains("<loc>https://booksarecool.gr/tags/science-fiction</loc>"));
    assert!(!sitemap.contains("?page="));

    let robots = std::fs::read_to_string(out.path().join("robots.txt")).expect("robots");
    assert!(robots.contains("Sitemap: https://booksarecool.gr/sitemap.xml"));

    let written = read_json(&out.path().join("build_summary.json"));
    assert_eq!(written["run_id"], summary.run_id.to_string());
    assert_eq!(written["articles"], 4);
}

#[tokio::test]
async fn prefetched_images_are_reused_by_the_next_build() {
    let out = tempfile::tempdir().expect("output dir");
    let media = tempfile::tempdir().expect("media dir");

    let prefetcher = Arc::new(CoverOnlyFetcher::default());
    let prefetch = pipeline(config(out.path(), media.path()), prefetcher.clone())
        .prefetch_images()
        .await
        .expect("prefetch");
    assert_eq!(
        prefetch,
        ImagePrefetchSummary {
            pages: 5,
            processed: 2,
            fallbacks: 1,
        }
    );
    assert_eq!(prefetcher.calls.load(Ordering::SeqCst), 3);

    let builder = Arc::new(CoverOnlyFetcher::default());
    let build = pipeline(config(out.path(), media.path()), builder.clone());
    build.run_once().await.expect("build");
    // Both covers come from the media cache; only the uncacheable inline image is retried.
    assert_eq!(builder.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn search_ranks_cached_articles() {
    let out = tempfile::tempdir().expect("output dir");
    let media = tempfile::tempdir().expect("media dir");
    let build = pipeline(config(out.path(), media.path()), Arc::new(CoverOnlyFetcher::default()));

    let hits = build.search("darkness", 15).await.expect("search");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].slug, "the-left-hand-of-darkness");
    assert!(build.search("x", 15).await.expect("search").is_empty());
}
