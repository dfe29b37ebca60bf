//! Build-time content pipeline for the book review site.

pub mod assemble;
pub mod cache;
pub mod config;
pub mod pipeline;
pub mod query;
pub mod relations;
pub mod site;

pub use assemble::ArticleAssembler;
pub use cache::{
    BuildCache, CacheSnapshot, DEFAULT_FEATURED_LIMIT, DEFAULT_RECENT_LIMIT, DEFAULT_RELATED_LIMIT,
    DEFAULT_TAGS_PER_PAGE,
};
pub use config::{BuildConfig, ConfigError, SiteConfig, SourceMode};
pub use pipeline::{
    config_from_env, run_build_once_from_env, BuildPipeline, BuildRunSummary, ImagePrefetchSummary,
};
pub use query::DEFAULT_SEARCH_LIMIT;
pub use relations::RelationResolver;

pub const CRATE_NAME: &str = "bookshelf-build";
