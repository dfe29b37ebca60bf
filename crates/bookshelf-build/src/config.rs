//! Build configuration: required credentials from the environment plus an
//! optional YAML site file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bookshelf_storage::{HttpClientConfig, ImagePipelineConfig, RateLimit};
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_SITE_CONFIG: &str = "bookshelf.yaml";
/// Average request rate the Notion API accepts.
pub const NOTION_REQUESTS_PER_SECOND: u32 = 3;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingEnv(&'static str),
    #[error("invalid value {value:?} for {name}")]
    InvalidEnv { name: &'static str, value: String },
    #[error("reading site config {path}: {source}")]
    ReadSite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing site config {path}: {source}")]
    ParseSite {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Site-level settings. Every field has a default, so the file is optional and
/// may set any subset. Unknown keys are rejected.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteConfig {
    pub base_url: String,
    pub articles_per_page: usize,
    pub fan_out: usize,
    pub max_block_depth: usize,
    pub media: MediaSettings,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://booksarecool.gr".to_string(),
            articles_per_page: 12,
            fan_out: 5,
            max_block_depth: bookshelf_notion::DEFAULT_MAX_BLOCK_DEPTH,
            media: MediaSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MediaSettings {
    pub dest_dir: PathBuf,
    pub public_prefix: String,
    pub max_width: u32,
    pub quality: f32,
}

impl Default for MediaSettings {
    fn default() -> Self {
        let defaults = ImagePipelineConfig::default();
        Self {
            dest_dir: defaults.dest_dir,
            public_prefix: defaults.public_prefix,
            max_width: defaults.max_width,
            quality: defaults.quality,
        }
    }
}

impl SiteConfig {
    pub fn from_yaml_str(text: &str, path: &Path) -> Result<Self, ConfigError> {
        serde_yaml::from_str(text).map_err(|source| ConfigError::ParseSite {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Reads `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) if text.trim().is_empty() => Ok(Self::default()),
            Ok(text) => Self::from_yaml_str(&text, path),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::ReadSite {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

/// Where content comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceMode {
    Notion { api_key: String, database_id: String },
    Fixtures { dir: PathBuf },
}

#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub source: SourceMode,
    pub output_dir: PathBuf,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub site: SiteConfig,
}

impl BuildConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`BuildConfig::from_env`] over an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let source = match non_empty("BOOKSHELF_FIXTURES_DIR") {
            Some(dir) => SourceMode::Fixtures { dir: PathBuf::from(dir) },
            None => SourceMode::Notion {
                api_key: non_empty("NOTION_API_KEY").ok_or(ConfigError::MissingEnv("NOTION_API_KEY"))?,
                database_id: non_empty("NOTION_DATABASE_ID")
                    .ok_or(ConfigError::MissingEnv("NOTION_DATABASE_ID"))?,
            },
        };

        let site_path = non_empty("BOOKSHELF_SITE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SITE_CONFIG));
        let mut site = SiteConfig::load(&site_path)?;
        if let Some(media_dir) = non_empty("BOOKSHELF_MEDIA_DIR") {
            site.media.dest_dir = PathBuf::from(media_dir);
        }

        let http_timeout_secs = match non_empty("BOOKSHELF_HTTP_TIMEOUT_SECS") {
            Some(value) => value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                name: "BOOKSHELF_HTTP_TIMEOUT_SECS",
                value,
            })?,
            None => 30,
        };

        Ok(Self {
            source,
            output_dir: non_empty("BOOKSHELF_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./build/content")),
            user_agent: non_empty("BOOKSHELF_USER_AGENT")
                .unwrap_or_else(|| "bookshelf-build/0.1".to_string()),
            http_timeout_secs,
            site,
        })
    }

    /// Offline configuration over a fixtures directory.
    pub fn for_fixtures(dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            source: SourceMode::Fixtures { dir: dir.into() },
            output_dir: output_dir.into(),
            user_agent: "bookshelf-build/0.1".to_string(),
            http_timeout_secs: 30,
            site: SiteConfig::default(),
        }
    }

    pub fn database_id(&self) -> &str {
        match &self.source {
            SourceMode::Notion { database_id, .. } => database_id,
            SourceMode::Fixtures { .. } => "fixtures",
        }
    }

    pub fn http_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            per_scope_concurrency: self.site.fan_out.max(1),
            rate_limit: Some(RateLimit::per_second(NOTION_REQUESTS_PER_SECOND)),
            ..Default::default()
        }
    }

    pub fn image_config(&self) -> ImagePipelineConfig {
        ImagePipelineConfig {
            dest_dir: self.site.media.dest_dir.clone(),
            public_prefix: self.site.media.public_prefix.clone(),
            max_width: self.site.media.max_width,
            quality: self.site.media.quality,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn missing_credentials_fail_fast() {
        let err = BuildConfig::from_lookup(lookup(&[("NOTION_DATABASE_ID", "db")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv("NOTION_API_KEY")));

        let err = BuildConfig::from_lookup(lookup(&[("NOTION_API_KEY", "secret"), ("NOTION_DATABASE_ID", " ")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv("NOTION_DATABASE_ID")));
    }

    #[test]
    fn notion_source_with_overrides() {
        let dir = tempfile::tempdir().expect("tempdir");
        let site_path = dir.path().join("site.yaml");
        std::fs::write(&site_path, "base_url: https://books.test\nfan_out: 3\nmedia:\n  max_width: 640\n")
            .expect("write site");

        let config = BuildConfig::from_lookup(lookup(&[
            ("NOTION_API_KEY", "secret"),
            ("NOTION_DATABASE_ID", "db-1"),
            ("BOOKSHELF_SITE_CONFIG", site_path.to_str().expect("utf8 path")),
            ("BOOKSHELF_MEDIA_DIR", "/tmp/media"),
            ("BOOKSHELF_HTTP_TIMEOUT_SECS", "7"),
        ]))
        .expect("config");

        assert_eq!(
            config.source,
            SourceMode::Notion {
                api_key: "secret".into(),
                database_id: "db-1".into()
            }
        );
        assert_eq!(config.database_id(), "db-1");
        assert_eq!(config.http_timeout_secs, 7);
        assert_eq!(config.site.base_url, "https://books.test");
        assert_eq!(config.site.fan_out, 3);
        assert_eq!(config.site.articles_per_page, 12);
        assert_eq!(config.site.media.max_width, 640);
        assert_eq!(config.site.media.public_prefix, "/images/notion");
        assert_eq!(config.image_config().dest_dir, PathBuf::from("/tmp/media"));
    }

    #[test]
    fn fixtures_dir_needs_no_credentials() {
        let config = BuildConfig::from_lookup(lookup(&[
            ("BOOKSHELF_FIXTURES_DIR", "fixtures/notion"),
            ("BOOKSHELF_SITE_CONFIG", "/nonexistent/bookshelf.yaml"),
        ]))
        .expect("config");
        assert!(matches!(config.source, SourceMode::Fixtures { .. }));
        assert_eq!(config.site, SiteConfig::default());
    }

    #[test]
    fn bad_timeout_and_bad_yaml_are_rejected() {
        let err = BuildConfig::from_lookup(lookup(&[
            ("BOOKSHELF_FIXTURES_DIR", "fixtures/notion"),
            ("BOOKSHELF_SITE_CONFIG", "/nonexistent/bookshelf.yaml"),
            ("BOOKSHELF_HTTP_TIMEOUT_SECS", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));

        let err = SiteConfig::from_yaml_str("fan_out: [1, 2]", Path::new("bad.yaml")).unwrap_err();
        assert!(err.to_string().contains("bad.yaml"));
    }

    #[test]
    fn shipped_site_file_matches_defaults_and_unknown_keys_fail() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../bookshelf.yaml");
        let text = std::fs::read_to_string(&path).expect("bookshelf.yaml");
        assert_eq!(SiteConfig::from_yaml_str(&text, &path).expect("parse"), SiteConfig::default());

        let err = SiteConfig::from_yaml_str("tags_per_page: 24\n", Path::new("stale.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::ParseSite { .. }));
    }
}
