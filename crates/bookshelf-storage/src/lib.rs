//! Local media cache and the throttled HTTP client shared by every upstream call.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

pub mod media;

pub use media::{cache_filename, ImagePipeline, ImagePipelineConfig, MediaError, MediaFetcher};

pub const CRATE_NAME: &str = "bookshelf-storage";

/// Flat directory of cached media files. Readers never see a partial file.
#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
}

impl MediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    pub fn path_for(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }

    pub async fn exists(&self, filename: &str) -> anyhow::Result<bool> {
        let path = self.path_for(filename);
        fs::try_exists(&path)
            .await
            .with_context(|| format!("checking {}", path.display()))
    }

    /// Writes `bytes` to a sibling temp file and renames it over `filename`.
    pub async fn write_atomic(&self, filename: &str, bytes: &[u8]) -> anyhow::Result<PathBuf> {
        fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("creating media directory {}", self.root.display()))?;

        let target = self.path_for(filename);
        let staging = self.root.join(format!(".{filename}.{}.tmp", Uuid::new_v4().simple()));
        fs::write(&staging, bytes)
            .await
            .with_context(|| format!("writing {}", staging.display()))?;

        if let Err(err) = fs::rename(&staging, &target).await {
            let _ = fs::remove_file(&staging).await;
            return Err(err).with_context(|| format!("moving media into place at {}", target.display()));
        }
        Ok(target)
    }

    pub async fn evict(&self, filename: &str) -> anyhow::Result<()> {
        let path = self.path_for(filename);
        match fs::remove_file(&path).await {
            Err(err) if err.kind() != std::io::ErrorKind::NotFound => {
                Err(err).with_context(|| format!("removing {}", path.display()))
            }
            _ => Ok(()),
        }
    }
}

/// Capped exponential delays between attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn delay(&self, retry: usize) -> Duration {
        let factor = 1u32 << retry.min(20);
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Rate limited and server-side failures are worth another attempt.
pub fn should_retry_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

pub fn should_retry_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

/// Sustained request rate with a burst allowance.
#[derive(Debug, Clone, Copy)]
pub struct RateLimit {
    pub burst: u32,
    pub per_second: f64,
}

impl RateLimit {
    pub fn per_second(requests: u32) -> Self {
        let requests = requests.max(1);
        Self {
            burst: requests,
            per_second: f64::from(requests),
        }
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    refilled_at: Instant,
}

/// Token bucket refilled continuously at the configured rate.
#[derive(Debug)]
pub struct TokenBucket {
    limit: RateLimit,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            state: Mutex::new(BucketState {
                tokens: f64::from(limit.burst),
                refilled_at: Instant::now(),
            }),
        }
    }

    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let earned = now.duration_since(state.refilled_at).as_secs_f64() * self.limit.per_second;
                state.tokens = (state.tokens + earned).min(f64::from(self.limit.burst));
                state.refilled_at = now;
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - state.tokens) / self.limit.per_second)
            };
            tokio::time::sleep(wait).await;
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
    pub per_scope_concurrency: usize,
    pub retry: RetryPolicy,
    pub rate_limit: Option<RateLimit>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
            global_concurrency: 16,
            per_scope_concurrency: 5,
            retry: RetryPolicy::default(),
            rate_limit: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("request limiter closed")]
    Closed,
}

/// Shared HTTP client. A scope is a logical upstream such as `notion` or `media`;
/// each gets its own concurrency cap under the global one.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global: Arc<Semaphore>,
    scope_permits: usize,
    scopes: Mutex<HashMap<String, Arc<Semaphore>>>,
    throttle: Option<TokenBucket>,
    retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = config.user_agent {
            builder = builder.user_agent(user_agent);
        }

        Ok(Self {
            client: builder.build().context("building reqwest client")?,
            global: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            scope_permits: config.per_scope_concurrency.max(1),
            scopes: Mutex::new(HashMap::new()),
            throttle: config.rate_limit.map(TokenBucket::new),
            retry: config.retry,
        })
    }

    async fn scope_semaphore(&self, scope: &str) -> Arc<Semaphore> {
        self.scopes
            .lock()
            .await
            .entry(scope.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.scope_permits)))
            .clone()
    }

    pub async fn fetch_bytes(&self, scope: &str, url: &str) -> Result<FetchedResponse, FetchError> {
        self.execute(scope, url, |client| client.get(url)).await
    }

    /// Sends the request built by `build`, retrying per the policy. `build` runs
    /// once per attempt.
    pub async fn execute<F>(&self, scope: &str, url: &str, build: F) -> Result<FetchedResponse, FetchError>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let _global = self.global.acquire().await.map_err(|_| FetchError::Closed)?;
        let scoped = self.scope_semaphore(scope).await;
        let _scoped = scoped.acquire().await.map_err(|_| FetchError::Closed)?;

        self.send_with_retry(build)
            .instrument(info_span!("http_fetch", scope, url))
            .await
    }

    async fn send_with_retry<F>(&self, build: F) -> Result<FetchedResponse, FetchError>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let mut retry = 0usize;
        loop {
            if let Some(bucket) = &self.throttle {
                bucket.acquire().await;
            }

            let outcome = build(&self.client).send().await;
            let retryable = match &outcome {
                Ok(response) => should_retry_status(response.status()),
                Err(err) => should_retry_error(err),
            };
            if retryable && retry < self.retry.max_retries {
                let delay = self.retry.delay(retry);
                debug!(retry, ?delay, "retrying request");
                tokio::time::sleep(delay).await;
                retry += 1;
                continue;
            }

            let response = outcome?;
            let status = response.status();
            let final_url = response.url().to_string();
            if !status.is_success() {
                return Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                    url: final_url,
                });
            }
            let body = response.bytes().await?.to_vec();
            return Ok(FetchedResponse {
                status,
                final_url,
                body,
            });
        }
    }
}
