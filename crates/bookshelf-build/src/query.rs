//! Pure queries over an assembled article set.

use std::collections::{BTreeSet, HashSet};

use bookshelf_core::{tag_slug, Article, Author, TagSummary};
use tracing::warn;

pub const DEFAULT_SEARCH_LIMIT: usize = 15;
/// Related articles are picked from this many of the most recent ones.
pub const RELATED_POOL: usize = 20;

/// Drops articles with an empty slug or a slug already seen. First one wins.
pub fn keep_unique_slugs(articles: Vec<Article>) -> Vec<Article> {
    let mut seen = HashSet::new();
    articles
        .into_iter()
        .filter(|article| {
            if article.slug.is_empty() {
                warn!(id = %article.id, title = %article.title, "article without slug skipped");
                return false;
            }
            if !seen.insert(article.slug.clone()) {
                warn!(id = %article.id, slug = %article.slug, "duplicate slug skipped");
                return false;
            }
            true
        })
        .collect()
}

/// Sorted, de-duplicated, trimmed tag names.
pub fn collect_tags(articles: &[Article]) -> Vec<String> {
    articles
        .iter()
        .flat_map(|a| a.tags.iter())
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(ToString::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Matches a tag name or its URL form (`science-fiction`), ignoring case.
pub fn matches_tag(article: &Article, tag_or_slug: &str) -> bool {
    let query = tag_or_slug.to_lowercase();
    let spaced = query.replace('-', " ");
    article.tags.iter().any(|tag| {
        let tag = tag.to_lowercase();
        tag == spaced || tag == query
    })
}

pub fn filter_by_tag(articles: &[Article], tag_or_slug: &str) -> Vec<Article> {
    articles
        .iter()
        .filter(|a| matches_tag(a, tag_or_slug))
        .cloned()
        .collect()
}

pub fn filter_by_author(articles: &[Article], author_slug: &str) -> Vec<Article> {
    articles
        .iter()
        .filter(|a| a.author_slug.as_deref() == Some(author_slug))
        .cloned()
        .collect()
}

pub fn related(articles: &[Article], current: &Article, limit: usize) -> Vec<Article> {
    articles
        .iter()
        .take(RELATED_POOL)
        .filter(|a| a.id != current.id && a.slug != current.slug)
        .take(limit)
        .cloned()
        .collect()
}

/// Tags with their article counts, most used first; ties keep name order.
pub fn tag_summaries(tags: &[String], articles: &[Article]) -> Vec<TagSummary> {
    let mut summaries: Vec<TagSummary> = tags
        .iter()
        .map(|name| TagSummary {
            name: name.clone(),
            slug: tag_slug(name),
            article_count: articles.iter().filter(|a| a.tags.contains(name)).count(),
        })
        .collect();
    summaries.sort_by(|a, b| b.article_count.cmp(&a.article_count));
    summaries
}

pub fn with_article_counts(mut authors: Vec<Author>, articles: &[Article]) -> Vec<Author> {
    for author in &mut authors {
        author.article_count = articles
            .iter()
            .filter(|a| a.author_slug.as_deref() == Some(author.slug.as_str()))
            .count();
    }
    authors
}

pub fn fallback_author_description(name: &str) -> String {
    format!("Book reviews and literary criticism by {name}")
}

fn search_terms(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split_whitespace()
        .filter(|term| term.chars().count() > 1)
        .map(ToString::to_string)
        .collect()
}

pub fn score(article: &Article, terms: &[String]) -> u32 {
    let title = article.title.to_lowercase();
    let author = article.author.to_lowercase();
    let category = article.category.to_lowercase();
    let excerpt = article.excerpt.to_lowercase();
    let tags: Vec<String> = article.tags.iter().map(|t| t.to_lowercase()).collect();

    terms
        .iter()
        .map(|term| {
            let term = term.as_str();
            let mut points = 0;
            if title.contains(term) {
                points += 10;
            }
            if author.contains(term) {
                points += 8;
            }
            if tags.iter().any(|t| t.contains(term)) {
                points += 6;
            }
            if category.contains(term) {
                points += 5;
            }
            if excerpt.contains(term) {
                points += 3;
            }
            points
        })
        .sum()
}

/// Relevance-ranked search. Queries shorter than two characters match nothing.
pub fn search(articles: &[Article], query: &str, limit: usize) -> Vec<Article> {
    let query = query.trim();
    if query.chars().count() < 2 {
        return Vec::new();
    }
    let terms = search_terms(query);
    let mut scored: Vec<(u32, &Article)> = articles
        .iter()
        .map(|a| (score(a, &terms), a))
        .filter(|(s, _)| *s > 0)
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored.into_iter().take(limit).map(|(_, a)| a.clone()).collect()
}
