//! Turns a source page into an [`Article`].

use std::sync::Arc;

use bookshelf_core::html::{collect_image_urls, render_blocks, ImageSources};
use bookshelf_core::{rating_label, rating_to_five, reading_time, Article, LISTING_READING_TIME};
use bookshelf_notion::{
    extract_checkbox, extract_date, extract_file_object, extract_number, extract_rich_text,
    extract_title, fetch_block_tree, ContentSource, PageObject, SourceError,
};
use bookshelf_storage::ImagePipeline;
use tracing::{debug, warn};

use crate::relations::RelationResolver;

pub const PLACEHOLDER_COVER: &str =
    "https://images.unsplash.com/photo-1481627834876-b7833e8f5570?w=600&h=400&fit=crop&crop=center";
pub const DEFAULT_AUTHOR: &str = "Author";
pub const DEFAULT_CATEGORY: &str = "Article";
const PUBLISH_TIME_SUFFIX: &str = "T10:00:00Z";

pub struct ArticleAssembler {
    source: Arc<dyn ContentSource>,
    relations: Arc<RelationResolver>,
    images: Arc<ImagePipeline>,
    max_block_depth: usize,
}

impl ArticleAssembler {
    pub fn new(
        source: Arc<dyn ContentSource>,
        relations: Arc<RelationResolver>,
        images: Arc<ImagePipeline>,
        max_block_depth: usize,
    ) -> Self {
        Self {
            source,
            relations,
            images,
            max_block_depth,
        }
    }

    pub fn images(&self) -> &Arc<ImagePipeline> {
        &self.images
    }

    pub fn relations(&self) -> &Arc<RelationResolver> {
        &self.relations
    }

    /// Listing views pass `include_content = false` and get the fixed reading time.
    pub async fn assemble(&self, page: &PageObject, include_content: bool) -> Article {
        let props = |name: &str| page.property(name);

        let image = match extract_file_object(page.cover.as_ref()) {
            Some(url) => self.images.process(&url, &page.id).await.src,
            None => PLACEHOLDER_COVER.to_string(),
        };

        let rating = rating_to_five(extract_number(props("Rating")).unwrap_or(0.0));
        let rating_override = extract_rich_text(props("Rating Text"));
        let date = extract_date(props("Date"));
        let meta_description = Some(extract_rich_text(props("Meta Description"))).filter(|m| !m.is_empty());

        let author_relation_ids = page.relation_ids("Author");
        let tag_relation_ids = page.relation_ids("Tags");

        let mut article = Article {
            id: page.id.clone(),
            title: extract_title(props("Post Title")),
            author: DEFAULT_AUTHOR.to_string(),
            author_slug: None,
            category: DEFAULT_CATEGORY.to_string(),
            excerpt: extract_rich_text(props("Description")),
            image,
            rating,
            rating_text: rating_label(rating, Some(rating_override.as_str())),
            published_at: format!("{date}{PUBLISH_TIME_SUFFIX}"),
            date,
            slug: extract_rich_text(props("Slug")),
            content: None,
            tags: Vec::new(),
            reading_time: LISTING_READING_TIME.to_string(),
            meta_description,
            featured: extract_checkbox(props("Featured")),
            author_relation_ids,
            tag_relation_ids,
        };

        // Only the first author and the first tag are resolved.
        let author = async {
            match article.author_relation_ids.first() {
                Some(id) => Some((id.clone(), self.relations.resolve(id).await)),
                None => None,
            }
        };
        let tag = async {
            match article.tag_relation_ids.first() {
                Some(id) => Some(self.relations.resolve(id).await),
                None => None,
            }
        };
        let (author, tag) = tokio::join!(author, tag);

        if let Some((id, resolved)) = author {
            article.author_slug = Some(resolved.slug.unwrap_or_else(|| format!("author-{id}")));
            article.author = resolved.name;
        }
        if let Some(resolved) = tag {
            article.category = resolved.name.clone();
            article.tags = vec![resolved.name];
        }

        if include_content {
            match self.render_content(&page.id).await {
                Ok(html) => {
                    article.reading_time = reading_time(&html);
                    article.content = Some(html);
                }
                Err(err) => warn!(page_id = %page.id, error = %err, "content unavailable"),
            }
        }

        article
    }

    /// Body HTML for a page; images inside it go through the image pipeline.
    pub async fn render_content(&self, page_id: &str) -> Result<String, SourceError> {
        let blocks = fetch_block_tree(self.source.as_ref(), page_id, self.max_block_depth).await?;
        let mut images = ImageSources::new();
        for url in collect_image_urls(&blocks) {
            if images.contains_key(&url) {
                continue;
            }
            let processed = self.images.process(&url, page_id).await;
            images.insert(url, processed);
        }
        debug!(page_id, blocks = blocks.len(), images = images.len(), "rendered content");
        Ok(render_blocks(&blocks, &images))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixture_page, fixture_source, offline_images, FailingFetcher};

    fn assembler(images: Arc<ImagePipeline>) -> ArticleAssembler {
        let source = fixture_source();
        let relations = Arc::new(RelationResolver::new(source.clone()));
        ArticleAssembler::new(source, relations, images, bookshelf_notion::DEFAULT_MAX_BLOCK_DEPTH)
    }

    #[tokio::test]
    async fn listing_article_from_fixture_page() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fetcher = Arc::new(FailingFetcher::default());
        let assembler = assembler(offline_images(dir.path(), fetcher.clone()));

        let article = assembler.assemble(&fixture_page("page-dune").await, false).await;
        assert_eq!(article.title, "Dune");
        assert_eq!(article.slug, "dune");
        assert_eq!(article.rating, 5.0);
        assert_eq!(article.rating_text, "Outstanding");
        assert_eq!(article.date, "2024-03-01");
        assert_eq!(article.published_at, "2024-03-01T10:00:00Z");
        assert_eq!(article.author, "Frank Herbert");
        assert_eq!(article.author_slug.as_deref(), Some("frank-herbert"));
        assert_eq!(article.category, "Science Fiction");
        assert_eq!(article.tags, vec!["Science Fiction"]);
        assert_eq!(article.tag_relation_ids, vec!["tag-scifi", "tag-fantasy"]);
        assert_eq!(article.reading_time, "5 min read");
        assert_eq!(article.content, None);
        assert!(article.featured);
        assert_eq!(article.meta_description.as_deref(), Some("Review of Dune by Frank Herbert"));
        // Offline: the cover falls back to its remote URL.
        assert_eq!(article.image, "https://images.example.test/covers/dune.jpg");
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn defaults_for_missing_relations_and_ratings() {
        let dir = tempfile::tempdir().expect("tempdir");
        let assembler = assembler(offline_images(dir.path(), Arc::new(FailingFetcher::default())));

        let hobbit = assembler.assemble(&fixture_page("page-hobbit").await, false).await;
        assert_eq!(hobbit.rating, 0.0);
        assert_eq!(hobbit.rating_text, "Re-read pending");
        assert_eq!(hobbit.author, "J. R. R. Tolkien");
        assert_eq!(hobbit.author_slug.as_deref(), Some("author-author-tolkien"));
        assert_eq!(hobbit.category, "Fantasy");
        assert_eq!(hobbit.image, PLACEHOLDER_COVER);
        assert_eq!(hobbit.meta_description, None);

        let orphan = assembler
            .assemble(&fixture_page("page-unknown-author").await, false)
            .await;
        assert_eq!(orphan.author, "Unknown");
        assert_eq!(orphan.author_slug.as_deref(), Some("author-author-missing"));
        assert_eq!(orphan.category, DEFAULT_CATEGORY);
        assert!(orphan.tags.is_empty());
        assert_eq!(orphan.rating, 1.5);
        assert_eq!(orphan.rating_text, "Terrible");
    }

    #[tokio::test]
    async fn content_is_rendered_on_request() {
        let dir = tempfile::tempdir().expect("tempdir");
        let assembler = assembler(offline_images(dir.path(), Arc::new(FailingFetcher::default())));

        let article = assembler.assemble(&fixture_page("page-dune").await, true).await;
        let html = article.content.expect("content");
        assert!(html.starts_with(
            "<h1>Dune</h1>\n<p>A <strong>classic</strong> read. <a href=\"https://example.com/dune\" target=\"_blank\">More</a></p>\n<li>Themes<ul><li>Ecology</li></ul></li>"
        ));
        assert!(html.contains(r#"<img src="https://images.example.test/inline/arrakis.png""#));
        assert_eq!(article.reading_time, "1 min read");
    }
}
