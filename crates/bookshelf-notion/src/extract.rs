//! Default-safe readers for page property bags and block payloads.
//!
//! None of these fail: an absent or malformed value always maps to a default.

use bookshelf_core::{Annotations, Block, HeadingLevel, RichText};
use chrono::Utc;
use serde_json::Value as JsonValue;

use crate::BlockObject;

fn first_plain_text(property: Option<&JsonValue>, key: &str) -> String {
    property
        .and_then(|p| p.get(key))
        .and_then(|arr| arr.get(0))
        .and_then(|run| run.get("plain_text"))
        .and_then(JsonValue::as_str)
        .unwrap_or_default()
        .to_string()
}

pub fn extract_title(property: Option<&JsonValue>) -> String {
    first_plain_text(property, "title")
}

pub fn extract_rich_text(property: Option<&JsonValue>) -> String {
    first_plain_text(property, "rich_text")
}

/// A stored `0` reads as absent, like an empty number cell.
pub fn extract_number(property: Option<&JsonValue>) -> Option<f64> {
    property
        .and_then(|p| p.get("number"))
        .and_then(JsonValue::as_f64)
        .filter(|n| *n != 0.0)
}

/// `date.start`, or today's date when the property is empty.
pub fn extract_date(property: Option<&JsonValue>) -> String {
    property
        .and_then(|p| p.get("date"))
        .and_then(|d| d.get("start"))
        .and_then(JsonValue::as_str)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .unwrap_or_else(|| Utc::now().date_naive().format("%Y-%m-%d").to_string())
}

pub fn extract_checkbox(property: Option<&JsonValue>) -> bool {
    property
        .and_then(|p| p.get("checkbox"))
        .and_then(JsonValue::as_bool)
        .unwrap_or(false)
}

pub fn extract_url(property: Option<&JsonValue>) -> String {
    property
        .and_then(|p| p.get("url"))
        .and_then(JsonValue::as_str)
        .unwrap_or_default()
        .to_string()
}

/// First file of a `files` property.
pub fn extract_files_icon(property: Option<&JsonValue>) -> Option<String> {
    let first = property?.get("files")?.as_array()?.first()?;
    file_url(first)
}

/// URL of a page `cover`/`icon` object. Emoji icons have no URL.
pub fn extract_file_object(object: Option<&JsonValue>) -> Option<String> {
    let object = object?;
    match object.get("type").and_then(JsonValue::as_str)? {
        "file" | "external" => file_url(object),
        _ => None,
    }
}

fn file_url(value: &JsonValue) -> Option<String> {
    value
        .get("file")
        .and_then(|f| f.get("url"))
        .or_else(|| value.get("external").and_then(|e| e.get("url")))
        .and_then(JsonValue::as_str)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

pub fn parse_rich_text(runs: Option<&JsonValue>) -> Vec<RichText> {
    let Some(runs) = runs.and_then(JsonValue::as_array) else {
        return Vec::new();
    };
    runs.iter()
        .map(|run| {
            let flag = |name: &str| {
                run.get("annotations")
                    .and_then(|a| a.get(name))
                    .and_then(JsonValue::as_bool)
                    .unwrap_or(false)
            };
            RichText {
                plain_text: run
                    .get("plain_text")
                    .and_then(JsonValue::as_str)
                    .unwrap_or_default()
                    .to_string(),
                annotations: Annotations {
                    bold: flag("bold"),
                    italic: flag("italic"),
                    code: flag("code"),
                },
                href: run
                    .get("href")
                    .and_then(JsonValue::as_str)
                    .filter(|s| !s.is_empty())
                    .map(ToString::to_string),
            }
        })
        .collect()
}

/// Typed block for a raw block object, without children.
pub fn block_from_object(object: &BlockObject) -> Block {
    let payload = object.payload.get(&object.kind);
    let text = || parse_rich_text(payload.and_then(|p| p.get("rich_text")));
    match object.kind.as_str() {
        "paragraph" => Block::Paragraph {
            text: text(),
            children: Vec::new(),
        },
        "heading_1" => Block::Heading {
            level: HeadingLevel::H1,
            text: text(),
        },
        "heading_2" => Block::Heading {
            level: HeadingLevel::H2,
            text: text(),
        },
        "heading_3" => Block::Heading {
            level: HeadingLevel::H3,
            text: text(),
        },
        "bulleted_list_item" => Block::BulletedListItem {
            text: text(),
            children: Vec::new(),
        },
        "numbered_list_item" => Block::NumberedListItem {
            text: text(),
            children: Vec::new(),
        },
        "quote" => Block::Quote {
            text: text(),
            children: Vec::new(),
        },
        "divider" => Block::Divider,
        "image" => Block::Image {
            url: payload.and_then(file_url),
        },
        other => Block::Unsupported {
            kind: other.to_string(),
            children: Vec::new(),
        },
    }
}
