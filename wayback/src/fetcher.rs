//! Concrete queries against `search.list`, cached and mapped to [`VideoRecord`]s.
//!
//! Every query is pinned to a reference date (`publishedBefore`), so the
//! results look like what the site would have shown back then. Failures never
//! reach the caller: if the router gives up, the query yields an empty list and
//! the recommendations are simply thinner.

use crate::cache::{CacheStore, Namespace};
use crate::recommend::extract_keywords;
use crate::video::VideoRecord;
use crate::youtube_api::{
    RequestRouter, RouterError, SearchListResponse, SearchOrder, VideoDuration,
};
use jiff::{SignedDuration, Timestamp};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

const SEARCH_ENDPOINT: &str = "search";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// `maxResults` for every query (the API caps it at 50).
    pub max_results: u32,
    /// Pause between consecutive queries of a multi-query fetch.
    pub inter_request_delay_ms: u64,
    /// Generic queries whose results make up the cross-channel "viral" pool.
    pub viral_queries: Vec<String>,
    /// How far before the reference date viral results may be published.
    pub viral_window_days: i64,
    /// How far before the reference date an upload still counts as fresh.
    pub fresh_window_days: i64,
    /// How many title keywords go into a series search.
    pub series_keyword_limit: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_results: 50,
            inter_request_delay_ms: 200,
            viral_queries: ["funny", "music video", "gaming", "minecraft", "vlog", "tutorial"]
                .into_iter()
                .map(String::from)
                .collect(),
            viral_window_days: 365,
            fresh_window_days: 30,
            series_keyword_limit: 3,
        }
    }
}

/// Cache lifetimes, in seconds, per kind of query.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheTtls {
    pub channel_secs: u64,
    pub fresh_secs: u64,
    pub search_secs: u64,
    pub viral_secs: u64,
    pub series_secs: u64,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            channel_secs: 2 * 60 * 60,
            fresh_secs: 15 * 60,
            search_secs: 2 * 60 * 60,
            viral_secs: 6 * 60 * 60,
            series_secs: 2 * 60 * 60,
        }
    }
}

impl CacheTtls {
    pub fn channel(&self) -> Namespace {
        Namespace::new("channel", Duration::from_secs(self.channel_secs))
    }

    pub fn fresh(&self) -> Namespace {
        Namespace::new("fresh", Duration::from_secs(self.fresh_secs))
    }

    pub fn search(&self) -> Namespace {
        Namespace::new("search", Duration::from_secs(self.search_secs))
    }

    pub fn viral(&self) -> Namespace {
        Namespace::new("viral", Duration::from_secs(self.viral_secs))
    }

    pub fn series(&self) -> Namespace {
        Namespace::new("series", Duration::from_secs(self.series_secs))
    }

    pub fn all(&self) -> [Namespace; 5] {
        [
            self.channel(),
            self.fresh(),
            self.search(),
            self.viral(),
            self.series(),
        ]
    }
}

/// Optional knobs for a free-text search.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub order: SearchOrder,
    pub published_after: Option<Timestamp>,
    pub duration: Option<VideoDuration>,
}

type Params = Vec<(&'static str, String)>;

/// Why a single query produced no page of results.
#[derive(Debug, thiserror::Error)]
enum QueryError {
    #[error(transparent)]
    Router(#[from] RouterError),

    #[error("unexpected search response: {0}")]
    Shape(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct ContentFetcher {
    router: RequestRouter,
    cache: CacheStore,
    config: FetchConfig,
    ttls: CacheTtls,
    rng: Arc<Mutex<StdRng>>,
}

impl ContentFetcher {
    pub fn new(
        router: RequestRouter,
        cache: CacheStore,
        config: FetchConfig,
        ttls: CacheTtls,
        rng: StdRng,
    ) -> Self {
        Self {
            router,
            cache,
            config,
            ttls,
            rng: Arc::new(Mutex::new(rng)),
        }
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn ttls(&self) -> &CacheTtls {
        &self.ttls
    }

    /// A channel's uploads published before `reference_date`, newest first.
    #[instrument(skip(self))]
    pub async fn channel_videos(
        &self,
        channel_id: &str,
        reference_date: Timestamp,
        force_refresh: bool,
    ) -> Vec<VideoRecord> {
        let mut params = self.base_params(SearchOrder::Date, reference_date);
        params.push(("channelId", channel_id.to_string()));
        let key = format!("{channel_id}_{reference_date}");
        self.cached_query(&self.ttls.channel(), &key, force_refresh, params, reference_date, false)
            .await
    }

    /// A channel's uploads from the last `fresh_window_days` before
    /// `reference_date`, kept only briefly in the cache.
    #[instrument(skip(self))]
    pub async fn fresh_channel_videos(
        &self,
        channel_id: &str,
        reference_date: Timestamp,
        force_refresh: bool,
    ) -> Vec<VideoRecord> {
        let mut params = self.base_params(SearchOrder::Date, reference_date);
        params.push(("channelId", channel_id.to_string()));
        params.push((
            "publishedAfter",
            days_before(reference_date, self.config.fresh_window_days).to_string(),
        ));
        let key = format!("{channel_id}_{reference_date}");
        self.cached_query(&self.ttls.fresh(), &key, force_refresh, params, reference_date, false)
            .await
    }

    /// Uploads of several channels, fetched concurrently, in input order.
    #[instrument(skip(self))]
    pub async fn channels_videos(
        &self,
        channel_ids: &[String],
        reference_date: Timestamp,
    ) -> Vec<VideoRecord> {
        let fetches = channel_ids
            .iter()
            .map(|id| self.channel_videos(id, reference_date, false));
        futures::future::join_all(fetches)
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    /// Free-text search over videos published before `reference_date`.
    #[instrument(skip(self))]
    pub async fn search(
        &self,
        query: &str,
        reference_date: Timestamp,
        options: &SearchOptions,
        force_refresh: bool,
    ) -> Vec<VideoRecord> {
        let mut params = self.base_params(options.order, reference_date);
        params.push(("q", query.to_string()));
        if let Some(after) = options.published_after {
            params.push(("publishedAfter", after.to_string()));
        }
        if let Some(duration) = options.duration {
            params.push(("videoDuration", duration.as_str().to_string()));
        }

        let key = format!(
            "{}_{}_{}_{}_{reference_date}",
            query.to_lowercase(),
            options.order.as_str(),
            options
                .published_after
                .map(|t| t.to_string())
                .unwrap_or_default(),
            options.duration.map(|d| d.as_str()).unwrap_or_default(),
        );
        self.cached_query(&self.ttls.search(), &key, force_refresh, params, reference_date, false)
            .await
    }

    /// Popular videos from the year before `reference_date`, across all
    /// channels, gathered from the configured generic queries.
    ///
    /// Queries run one after another with a short pause in between. The merged
    /// list is cached only if at least one query went through.
    #[instrument(skip(self))]
    pub async fn viral_videos(
        &self,
        reference_date: Timestamp,
        force_refresh: bool,
    ) -> Vec<VideoRecord> {
        let namespace = self.ttls.viral();
        let key = reference_date.to_string();
        if let Some(videos) = self.cache.get(&namespace, &key, force_refresh) {
            return videos;
        }

        let after = days_before(reference_date, self.config.viral_window_days).to_string();
        let delay = Duration::from_millis(self.config.inter_request_delay_ms);
        let mut seen = HashSet::new();
        let mut merged = Vec::new();
        let mut any_succeeded = false;

        for (i, query) in self.config.viral_queries.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(delay).await;
            }

            let mut params = self.base_params(SearchOrder::Relevance, reference_date);
            params.push(("q", query.clone()));
            params.push(("publishedAfter", after.clone()));

            match self.run_query(params, reference_date, true).await {
                Ok(videos) => {
                    any_succeeded = true;
                    merged.extend(videos.into_iter().filter(|v| seen.insert(v.id.clone())));
                }
                Err(QueryError::Router(RouterError::NoCredentialsAvailable)) => {
                    tracing::warn!("no credentials configured, skipping viral queries");
                    break;
                }
                Err(e) => {
                    tracing::warn!(query = %query, error = %e, "viral query failed");
                }
            }
        }

        if any_succeeded {
            self.store(&namespace, &key, &merged);
        }
        merged
    }

    /// Videos on `channel_id` that share keywords with `title`.
    #[instrument(skip(self))]
    pub async fn series_videos(
        &self,
        channel_id: &str,
        title: &str,
        reference_date: Timestamp,
        force_refresh: bool,
    ) -> Vec<VideoRecord> {
        let query = series_query(title, self.config.series_keyword_limit);
        if query.is_empty() {
            tracing::debug!("no usable keywords in title");
            return Vec::new();
        }

        let mut params = self.base_params(SearchOrder::Relevance, reference_date);
        params.push(("channelId", channel_id.to_string()));
        params.push(("q", query.clone()));
        let key = format!("{channel_id}_{}_{reference_date}", query.to_lowercase());
        self.cached_query(&self.ttls.series(), &key, force_refresh, params, reference_date, false)
            .await
    }

    fn base_params(&self, order: SearchOrder, reference_date: Timestamp) -> Params {
        vec![
            ("part", "snippet".to_string()),
            ("type", "video".to_string()),
            ("order", order.as_str().to_string()),
            ("maxResults", self.config.max_results.min(50).to_string()),
            ("publishedBefore", reference_date.to_string()),
        ]
    }

    async fn cached_query(
        &self,
        namespace: &Namespace,
        key: &str,
        force_refresh: bool,
        params: Params,
        reference_date: Timestamp,
        viral: bool,
    ) -> Vec<VideoRecord> {
        if let Some(videos) = self.cache.get(namespace, key, force_refresh) {
            return videos;
        }

        match self.run_query(params, reference_date, viral).await {
            Ok(videos) => {
                self.store(namespace, key, &videos);
                videos
            }
            Err(e) => {
                tracing::warn!(
                    namespace = namespace.name,
                    key,
                    error = %e,
                    "query failed, returning no videos"
                );
                Vec::new()
            }
        }
    }

    async fn run_query(
        &self,
        params: Params,
        reference_date: Timestamp,
        viral: bool,
    ) -> Result<Vec<VideoRecord>, QueryError> {
        let body = self.router.execute(SEARCH_ENDPOINT, &params).await?;
        let response: SearchListResponse = serde_json::from_value(body)?;

        let mut rng = self.rng.lock();
        let videos: Vec<_> = response
            .results()
            .filter_map(|item| {
                VideoRecord::from_search_result(item, reference_date, viral, &mut *rng)
            })
            .collect();
        tracing::debug!(items = videos.len(), viral, "mapped search results");
        Ok(videos)
    }

    fn store(&self, namespace: &Namespace, key: &str, videos: &[VideoRecord]) {
        if let Err(e) = self.cache.set(namespace, key, videos) {
            tracing::warn!(namespace = namespace.name, key, error = %e, "failed to cache videos");
        }
    }
}

fn days_before(timestamp: Timestamp, days: i64) -> Timestamp {
    timestamp
        .checked_sub(SignedDuration::from_hours(days.max(0) * 24))
        .unwrap_or(Timestamp::MIN)
}

/// The search string for a title's series: its most specific keywords,
/// skipping the numbered episode variants.
fn series_query(title: &str, limit: usize) -> String {
    extract_keywords(title)
        .into_iter()
        .filter(|k| !k.chars().any(|c| c.is_ascii_digit()))
        .take(limit)
        .collect::<Vec<_>>()
        .join(" ")
}
