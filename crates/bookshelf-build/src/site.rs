//! Crawler-facing artifacts: `sitemap.xml` and `robots.txt`.

use bookshelf_core::{tag_slug, Article};
use chrono::{DateTime, SecondsFormat, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SitemapEntry {
    pub loc: String,
    pub lastmod: String,
    pub changefreq: &'static str,
    pub priority: &'static str,
}

/// Home, listing and tag index pages, every article, every tag page and the
/// review pagination pages past the first.
pub fn sitemap_entries(
    base_url: &str,
    articles: &[Article],
    tags: &[String],
    articles_per_page: usize,
    generated_at: DateTime<Utc>,
) -> Vec<SitemapEntry> {
    let base = base_url.trim_end_matches('/');
    let now = generated_at.to_rfc3339_opts(SecondsFormat::Millis, true);
    let entry = |loc: String, lastmod: String, changefreq, priority| SitemapEntry {
        loc,
        lastmod,
        changefreq,
        priority,
    };

    let mut entries = vec![
        entry(base.to_string(), now.clone(), "daily", "1.0"),
        entry(format!("{base}/reviews"), now.clone(), "weekly", "0.9"),
        entry(format!("{base}/tags"), now.clone(), "weekly", "0.8"),
    ];
    entries.extend(articles.iter().map(|article| {
        entry(
            format!("{base}/{}", article.slug),
            article.published_at.clone(),
            "monthly",
            "0.8",
        )
    }));
    entries.extend(
        tags.iter()
            .map(|tag| entry(format!("{base}/tags/{}", tag_slug(tag)), now.clone(), "weekly", "0.7")),
    );
    let total_pages = articles.len().div_ceil(articles_per_page.max(1));
    entries.extend(
        (2..=total_pages)
            .map(|page| entry(format!("{base}/reviews?page={page}"), now.clone(), "weekly", "0.6")),
    );
    entries
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

pub fn render_sitemap(entries: &[SitemapEntry]) -> String {
    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<urlset xmlns=\"http://www.sitemaps.org/schemas/sitemap/0.9\">\n",
    );
    for entry in entries {
        xml.push_str(&format!(
            "  <url>\n    <loc>{}</loc>\n    <lastmod>{}</lastmod>\n    <changefreq>{}</changefreq>\n    <priority>{}</priority>\n  </url>\n",
            escape_xml(&entry.loc),
            escape_xml(&entry.lastmod),
            entry.changefreq,
            entry.priority
        ));
    }
    xml.push_str("</urlset>\n");
    xml
}

pub fn robots_txt(base_url: &str) -> String {
    format!(
        "User-agent: *\nAllow: /\n\n# Sitemaps\nSitemap: {}/sitemap.xml\n\n\
         Disallow: /admin/\nDisallow: /_app/\nDisallow: /api/\n\nCrawl-delay: 1\n",
        base_url.trim_end_matches('/')
    )
}
