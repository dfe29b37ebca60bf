//! Block tree to HTML conversion.

use std::collections::HashMap;

use crate::{Block, ProcessedImage, RichText};

const QUOTE_CLASS: &str = "bg-light-gray border-l-4 border-accent-red p-6 my-8 italic text-xl";
const DIVIDER_HTML: &str = r#"<hr class="my-8 border-border-light" />"#;
const IMAGE_CLASS: &str = "w-full rounded-lg my-8";

/// Locally processed images keyed by their remote URL.
pub type ImageSources = HashMap<String, ProcessedImage>;

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Wraps each run as bold, then italic, then code, then link.
pub fn render_rich_text(runs: &[RichText]) -> String {
    runs.iter().map(render_run).collect()
}

fn render_run(run: &RichText) -> String {
    let mut content = escape_html(&run.plain_text);
    if run.annotations.bold {
        content = format!("<strong>{content}</strong>");
    }
    if run.annotations.italic {
        content = format!("<em>{content}</em>");
    }
    if run.annotations.code {
        content = format!("<code>{content}</code>");
    }
    if let Some(href) = &run.href {
        content = format!(r#"<a href="{}" target="_blank">{content}</a>"#, escape_html(href));
    }
    content
}

pub fn render_blocks(blocks: &[Block], images: &ImageSources) -> String {
    blocks
        .iter()
        .map(|block| render_block(block, images))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_block(block: &Block, images: &ImageSources) -> String {
    match block {
        Block::Paragraph { text, children } => {
            let mut content = render_rich_text(text);
            if !children.is_empty() {
                content.push_str(&render_blocks(children, images));
            }
            format!("<p>{content}</p>")
        }
        Block::Heading { level, text } => {
            let tag = level.tag();
            format!("<{tag}>{}</{tag}>", render_rich_text(text))
        }
        Block::BulletedListItem { text, children } => {
            list_item(render_rich_text(text), children, "ul", images)
        }
        Block::NumberedListItem { text, children } => {
            list_item(render_rich_text(text), children, "ol", images)
        }
        Block::Quote { text, children } => {
            let mut content = render_rich_text(text);
            if !children.is_empty() {
                content.push_str(&render_blocks(children, images));
            }
            format!(r#"<blockquote class="{QUOTE_CLASS}">{content}</blockquote>"#)
        }
        Block::Divider => DIVIDER_HTML.to_string(),
        Block::Image { url: Some(url) } => {
            let src = images
                .get(url)
                .map(|img| img.src.as_str())
                .filter(|src| !src.is_empty())
                .unwrap_or(url);
            format!(
                r#"<img src="{}" alt="Article image" class="{IMAGE_CLASS}" />"#,
                escape_html(src)
            )
        }
        Block::Image { url: None } => String::new(),
        Block::Unsupported { children, .. } => render_blocks(children, images),
    }
}

fn list_item(mut content: String, children: &[Block], list_tag: &str, images: &ImageSources) -> String {
    if !children.is_empty() {
        content.push_str(&format!(
            "<{list_tag}>{}</{list_tag}>",
            render_blocks(children, images)
        ));
    }
    format!("<li>{content}</li>")
}

/// Every image URL in the tree, depth first, in document order.
pub fn collect_image_urls(blocks: &[Block]) -> Vec<String> {
    let mut urls = Vec::new();
    collect_into(blocks, &mut urls);
    urls
}

fn collect_into(blocks: &[Block], urls: &mut Vec<String>) {
    for block in blocks {
        if let Block::Image { url: Some(url) } = block {
            if !url.is_empty() {
                urls.push(url.clone());
            }
        }
        collect_into(block.children(), urls);
    }
}
