//! HTTP implementation of [`ContentSource`] against the Notion REST API.

use std::sync::Arc;

use async_trait::async_trait;
use bookshelf_storage::HttpFetcher;
use serde::de::DeserializeOwned;
use serde_json::{json, Value as JsonValue};
use tracing::debug;

use crate::{BlockObject, ContentSource, PageObject, Paginated, SourceError};

pub const NOTION_API_BASE: &str = "https://api.notion.com/v1";
pub const NOTION_VERSION: &str = "2022-06-28";
pub const NOTION_SCOPE: &str = "notion";
const PAGE_SIZE: u32 = 100;

/// Filter and sort applied to every database query.
#[derive(Debug, Clone)]
pub struct DatabaseQuery {
    pub published_property: String,
    pub sort_property: String,
    pub page_size: u32,
}

impl Default for DatabaseQuery {
    fn default() -> Self {
        Self {
            published_property: "Publish".to_string(),
            sort_property: "Date".to_string(),
            page_size: PAGE_SIZE,
        }
    }
}

impl DatabaseQuery {
    pub fn body(&self, cursor: Option<&str>) -> JsonValue {
        let mut body = json!({
            "filter": {
                "property": self.published_property,
                "checkbox": { "equals": true }
            },
            "sorts": [{ "property": self.sort_property, "direction": "descending" }],
            "page_size": self.page_size,
        });
        if let Some(cursor) = cursor {
            body["start_cursor"] = JsonValue::String(cursor.to_string());
        }
        body
    }
}

pub struct NotionClient {
    http: Arc<HttpFetcher>,
    api_key: String,
    base_url: String,
    query: DatabaseQuery,
}

impl NotionClient {
    pub fn new(http: Arc<HttpFetcher>, api_key: impl Into<String>) -> Self {
        Self {
            http,
            api_key: api_key.into(),
            base_url: NOTION_API_BASE.to_string(),
            query: DatabaseQuery::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_query(mut self, query: DatabaseQuery) -> Self {
        self.query = query;
        self
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, &str)],
    ) -> Result<T, SourceError> {
        let response = self
            .http
            .execute(NOTION_SCOPE, url, |client| {
                client
                    .get(url)
                    .query(params)
                    .bearer_auth(&self.api_key)
                    .header("Notion-Version", NOTION_VERSION)
            })
            .await?;
        decode(&response.body, url)
    }

    async fn post_json<T: DeserializeOwned>(&self, url: &str, body: &JsonValue) -> Result<T, SourceError> {
        let response = self
            .http
            .execute(NOTION_SCOPE, url, |client| {
                client
                    .post(url)
                    .json(body)
                    .bearer_auth(&self.api_key)
                    .header("Notion-Version", NOTION_VERSION)
            })
            .await?;
        decode(&response.body, url)
    }
}

fn decode<T: DeserializeOwned>(body: &[u8], context: &str) -> Result<T, SourceError> {
    serde_json::from_slice(body).map_err(|source| SourceError::Decode {
        context: context.to_string(),
        source,
    })
}

#[async_trait]
impl ContentSource for NotionClient {
    async fn query_database(
        &self,
        database_id: &str,
        cursor: Option<&str>,
    ) -> Result<Paginated<PageObject>, SourceError> {
        let url = format!("{}/databases/{database_id}/query", self.base_url);
        debug!(database_id, ?cursor, "querying database");
        self.post_json(&url, &self.query.body(cursor)).await
    }

    async fn retrieve_page(&self, page_id: &str) -> Result<PageObject, SourceError> {
        let url = format!("{}/pages/{page_id}", self.base_url);
        self.get_json(&url, &[]).await
    }

    async fn list_block_children(
        &self,
        block_id: &str,
        cursor: Option<&str>,
    ) -> Result<Paginated<BlockObject>, SourceError> {
        let url = format!("{}/blocks/{block_id}/children", self.base_url);
        let page_size = PAGE_SIZE.to_string();
        let mut params = vec![("page_size", page_size.as_str())];
        if let Some(cursor) = cursor {
            params.push(("start_cursor", cursor));
        }
        self.get_json(&url, &params).await
    }
}
