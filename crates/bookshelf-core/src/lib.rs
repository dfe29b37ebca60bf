//! Core domain model for the bookshelf build pipeline.

use serde::{Deserialize, Serialize};

pub mod html;

pub const CRATE_NAME: &str = "bookshelf-core";

pub const WORDS_PER_MINUTE: usize = 200;
/// Reading time shown for listing views, where content is not fetched.
pub const LISTING_READING_TIME: &str = "5 min read";
pub const NOT_RATED: &str = "Not Rated";

/// One published review, assembled from a source page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub title: String,
    pub author: String,
    pub author_slug: Option<String>,
    pub category: String,
    pub excerpt: String,
    pub image: String,
    pub rating: f64,
    pub rating_text: String,
    pub date: String,
    pub published_at: String,
    pub slug: String,
    pub content: Option<String>,
    pub tags: Vec<String>,
    pub reading_time: String,
    pub meta_description: Option<String>,
    pub featured: bool,
    pub author_relation_ids: Vec<String>,
    pub tag_relation_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub description: String,
    pub image: Option<String>,
    pub article_count: usize,
}

/// Display name and slug of a related record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationRef {
    pub name: String,
    pub slug: Option<String>,
}

impl RelationRef {
    pub fn unknown() -> Self {
        Self {
            name: "Unknown".to_string(),
            slug: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedImage {
    pub src: String,
    pub width: u32,
    pub height: u32,
    pub placeholder: Option<String>,
}

impl ProcessedImage {
    pub const FALLBACK_WIDTH: u32 = 800;
    pub const FALLBACK_HEIGHT: u32 = 600;

    pub fn empty() -> Self {
        Self {
            src: String::new(),
            width: 0,
            height: 0,
            placeholder: None,
        }
    }

    /// Degraded result pointing back at the remote URL with guessed dimensions.
    pub fn fallback(url: &str) -> Self {
        Self {
            src: url.to_string(),
            width: Self::FALLBACK_WIDTH,
            height: Self::FALLBACK_HEIGHT,
            placeholder: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotations {
    pub bold: bool,
    pub italic: bool,
    pub code: bool,
}

/// A single styled run of text inside a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RichText {
    pub plain_text: String,
    pub annotations: Annotations,
    pub href: Option<String>,
}

impl RichText {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            plain_text: text.into(),
            annotations: Annotations::default(),
            href: None,
        }
    }

    pub fn bold(mut self) -> Self {
        self.annotations.bold = true;
        self
    }

    pub fn italic(mut self) -> Self {
        self.annotations.italic = true;
        self
    }

    pub fn code(mut self) -> Self {
        self.annotations.code = true;
        self
    }

    pub fn link(mut self, href: impl Into<String>) -> Self {
        self.href = Some(href.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeadingLevel {
    H1,
    H2,
    H3,
}

impl HeadingLevel {
    pub fn tag(self) -> &'static str {
        match self {
            HeadingLevel::H1 => "h1",
            HeadingLevel::H2 => "h2",
            HeadingLevel::H3 => "h3",
        }
    }
}

/// A node of a page's content tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Block {
    Paragraph {
        text: Vec<RichText>,
        children: Vec<Block>,
    },
    Heading {
        level: HeadingLevel,
        text: Vec<RichText>,
    },
    BulletedListItem {
        text: Vec<RichText>,
        children: Vec<Block>,
    },
    NumberedListItem {
        text: Vec<RichText>,
        children: Vec<Block>,
    },
    Quote {
        text: Vec<RichText>,
        children: Vec<Block>,
    },
    Divider,
    Image {
        url: Option<String>,
    },
    /// Any block type without a dedicated template; children are still rendered.
    Unsupported {
        kind: String,
        children: Vec<Block>,
    },
}

impl Block {
    pub fn children(&self) -> &[Block] {
        match self {
            Block::Paragraph { children, .. }
            | Block::BulletedListItem { children, .. }
            | Block::NumberedListItem { children, .. }
            | Block::Quote { children, .. }
            | Block::Unsupported { children, .. } => children,
            Block::Heading { .. } | Block::Divider | Block::Image { .. } => &[],
        }
    }

    /// Replace the children of container blocks; leaf blocks ignore the call.
    pub fn set_children(&mut self, new_children: Vec<Block>) {
        match self {
            Block::Paragraph { children, .. }
            | Block::BulletedListItem { children, .. }
            | Block::NumberedListItem { children, .. }
            | Block::Quote { children, .. }
            | Block::Unsupported { children, .. } => *children = new_children,
            Block::Heading { .. } | Block::Divider | Block::Image { .. } => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagSummary {
    pub name: String,
    pub slug: String,
    pub article_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub current_page: usize,
    pub total_pages: usize,
    pub total_items: usize,
    pub per_page: usize,
    pub has_next_page: bool,
    pub has_previous_page: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageSlice<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

/// Slice `items` into 1-based pages. Returns `None` for a page past the end of a
/// non-empty list; page 0 is read as page 1.
pub fn paginate<T: Clone>(items: &[T], page: usize, per_page: usize) -> Option<PageSlice<T>> {
    let per_page = per_page.max(1);
    let page = page.max(1);
    let total_items = items.len();
    let total_pages = total_items.div_ceil(per_page);
    if total_pages > 0 && page > total_pages {
        return None;
    }
    let start = (page - 1) * per_page;
    let page_items = items.iter().skip(start).take(per_page).cloned().collect();
    Some(PageSlice {
        items: page_items,
        pagination: Pagination {
            current_page: page,
            total_pages,
            total_items,
            per_page,
            has_next_page: page < total_pages,
            has_previous_page: page > 1,
        },
    })
}

/// Map a 0-10 source rating onto the 0-5 scale in half steps.
pub fn rating_to_five(raw: f64) -> f64 {
    if !raw.is_finite() || raw <= 0.0 {
        return 0.0;
    }
    ((raw / 10.0 * 5.0 * 2.0).round() / 2.0).clamp(0.0, 5.0)
}

pub fn rating_label(rating: f64, override_label: Option<&str>) -> String {
    if let Some(label) = override_label.filter(|l| !l.is_empty()) {
        return label.to_string();
    }
    if rating <= 0.0 {
        return NOT_RATED.to_string();
    }
    let label = if rating >= 4.5 {
        "Outstanding"
    } else if rating >= 4.0 {
        "Excellent"
    } else if rating >= 3.5 {
        "Very Good"
    } else if rating >= 3.0 {
        "Good"
    } else if rating >= 2.5 {
        "Fair"
    } else if rating >= 2.0 {
        "Poor"
    } else {
        "Terrible"
    };
    label.to_string()
}

/// URL-safe slug: lowercase, word characters only, separators collapsed to `-`.
pub fn slugify(text: &str) -> String {
    let lowered = text.to_lowercase();
    let mut out = String::with_capacity(lowered.len());
    let mut pending_dash = false;
    for ch in lowered.chars() {
        if ch.is_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(ch);
        } else if ch.is_whitespace() || ch == '-' || ch == '_' {
            pending_dash = true;
        }
    }
    out
}

/// Slug used in tag URLs: lowercase with whitespace runs replaced by `-`.
pub fn tag_slug(tag: &str) -> String {
    tag.to_lowercase().split_whitespace().collect::<Vec<_>>().join("-")
}

pub fn strip_markup(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out
}

/// Estimated reading time at 200 words per minute, never below one minute.
pub fn reading_time(html: &str) -> String {
    let words = strip_markup(html).split_whitespace().count();
    let minutes = words.div_ceil(WORDS_PER_MINUTE).max(1);
    format!("{minutes} min read")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rating_is_always_a_half_step() {
        for tenths in 0..=100 {
            let raw = f64::from(tenths) / 10.0;
            let derived = rating_to_five(raw);
            assert_eq!((derived * 2.0).fract(), 0.0, "raw {raw} -> {derived}");
            if raw > 0.0 {
                assert_eq!(derived, (raw / 10.0 * 5.0 * 2.0).round() / 2.0);
            }
        }
    }

    #[test]
    fn rating_labels_follow_thresholds() {
        assert_eq!(rating_to_five(10.0), 5.0);
        assert_eq!(rating_label(rating_to_five(10.0), None), "Outstanding");
        assert_eq!(rating_to_five(7.0), 3.5);
        assert_eq!(rating_label(rating_to_five(7.0), None), "Very Good");
        assert_eq!(rating_label(rating_to_five(0.0), None), "Not Rated");
        assert_eq!(rating_label(1.5, None), "Terrible");
        assert_eq!(rating_label(2.0, None), "Poor");
        assert_eq!(rating_label(4.0, None), "Excellent");
    }

    #[test]
    fn override_label_always_wins() {
        assert_eq!(rating_label(5.0, Some("Meh")), "Meh");
        assert_eq!(rating_label(0.0, Some("Coming soon")), "Coming soon");
        assert_eq!(rating_label(5.0, Some(" Meh ")), " Meh ");
        assert_eq!(rating_label(5.0, Some("")), "Outstanding");
    }

    #[test]
    fn pagination_boundaries() {
        let items: Vec<usize> = (1..=25).collect();

        let first = paginate(&items, 1, 12).unwrap();
        assert_eq!(first.items, (1..=12).collect::<Vec<_>>());
        assert!(first.pagination.has_next_page);
        assert!(!first.pagination.has_previous_page);
        assert_eq!(first.pagination.total_pages, 3);

        let last = paginate(&items, 3, 12).unwrap();
        assert_eq!(last.items, vec![25]);
        assert!(!last.pagination.has_next_page);
        assert!(last.pagination.has_previous_page);

        assert!(paginate(&items, 4, 12).is_none());
        assert_eq!(paginate(&items, 0, 12).unwrap().pagination.current_page, 1);

        let empty: Vec<usize> = Vec::new();
        let page = paginate(&empty, 1, 12).unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.pagination.total_pages, 0);
        assert!(!page.pagination.has_next_page);
    }

    #[test]
    fn slugs() {
        assert_eq!(slugify("  Hello, World! "), "hello-world");
        assert_eq!(slugify("The Left Hand of Darkness"), "the-left-hand-of-darkness");
        assert_eq!(slugify("a -- b__c"), "a-b-c");
        assert_eq!(tag_slug("Science Fiction"), "science-fiction");
        assert_eq!(tag_slug("Fantasy"), "fantasy");
    }

    #[test]
    fn reading_time_strips_markup_and_floors_at_one_minute() {
        assert_eq!(reading_time(""), "1 min read");
        assert_eq!(reading_time("<p>short</p>"), "1 min read");
        let long = format!("<p>{}</p>", vec!["word"; 401].join(" "));
        assert_eq!(reading_time(&long), "3 min read");
        assert_eq!(strip_markup("<p>un<em>believ</em>able</p>"), "unbelievable");
        let inline = format!("<p>{}x<strong>y</strong></p>", "w ".repeat(199));
        assert_eq!(strip_markup(&inline).split_whitespace().count(), 200);
        assert_eq!(reading_time(&inline), "1 min read");
    }
}
