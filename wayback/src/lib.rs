use crate::cache::CacheStore;
use crate::clock::{Clock, SystemClock};
use crate::config::Settings;
use crate::credentials::CredentialPool;
use crate::fetcher::ContentFetcher;
use crate::recommend::{RecommendationContext, RecommendationEngine};
use crate::store::{JsonFileStore, KvStore};
use crate::video::VideoRecord;
use crate::youtube_api::{RequestRouter, RouterConfig};
use eyre::Context;
use jiff::Timestamp;
use jiff::civil::Date;
use jiff::tz::TimeZone;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;
use tokio::sync::Mutex;

pub mod cache;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod display;
pub mod fetcher;
pub mod recommend;
pub mod store;
pub mod video;
pub mod youtube_api;

/// Everything needed to browse as of a past date, wired together.
///
/// The store, the credential pool and the cache are shared by every part, so
/// health statistics and cached results written by one query are seen by the
/// next.
#[derive(Debug)]
pub struct Wayback {
    settings: Settings,
    pool: Arc<Mutex<CredentialPool>>,
    router: RequestRouter,
    cache: CacheStore,
    fetcher: ContentFetcher,
    engine: RecommendationEngine,
    rng: parking_lot::Mutex<StdRng>,
}

impl Wayback {
    /// Opens the JSON store at `settings.store_path` and sets everything up
    /// against the real clock.
    pub fn open(settings: Settings) -> eyre::Result<Self> {
        let store = JsonFileStore::open(&settings.store_path)
            .with_context(|| format!("open store {}", settings.store_path.display()))?;
        Self::new(settings, Arc::new(store), Arc::new(SystemClock))
    }

    pub fn new(
        settings: Settings,
        store: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
    ) -> eyre::Result<Self> {
        let pool = CredentialPool::load(Arc::clone(&store), Arc::clone(&clock));
        let pool = Arc::new(Mutex::new(pool));
        let router = RequestRouter::new(Arc::clone(&pool), RouterConfig::from(&settings.api))
            .context("build request router")?;
        let cache = CacheStore::new(store, clock);

        let (fetch_rng, engine_rng) = match settings.seed {
            Some(seed) => (
                StdRng::seed_from_u64(seed),
                StdRng::seed_from_u64(seed.wrapping_add(1)),
            ),
            None => (StdRng::from_os_rng(), StdRng::from_os_rng()),
        };

        let fetcher = ContentFetcher::new(
            router.clone(),
            cache.clone(),
            settings.fetch.clone(),
            settings.cache.clone(),
            fetch_rng,
        );
        let engine = RecommendationEngine::new(settings.recommendations.clone());

        Ok(Self {
            settings,
            pool,
            router,
            cache,
            fetcher,
            engine,
            rng: parking_lot::Mutex::new(engine_rng),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn pool(&self) -> &Arc<Mutex<CredentialPool>> {
        &self.pool
    }

    pub fn router(&self) -> &RequestRouter {
        &self.router
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn fetcher(&self) -> &ContentFetcher {
        &self.fetcher
    }

    pub fn engine(&self) -> &RecommendationEngine {
        &self.engine
    }

    /// Recommendations for someone watching `title` on `channel_id`, as the
    /// site would have looked on `reference_date`.
    ///
    /// The three candidate pools are fetched concurrently: recent uploads of
    /// the channel, the channel's full (cached) listing plus the viral pool,
    /// and same-series videos.
    pub async fn recommend(
        &self,
        channel_id: &str,
        title: &str,
        reference_date: Timestamp,
    ) -> Vec<VideoRecord> {
        let (fresh, channel, viral, series) = tokio::join!(
            self.fetcher.fresh_channel_videos(channel_id, reference_date, false),
            self.fetcher.channel_videos(channel_id, reference_date, false),
            self.fetcher.viral_videos(reference_date, false),
            self.fetcher.series_videos(channel_id, title, reference_date, false),
        );

        let mut all = channel;
        all.extend(viral);

        let context = RecommendationContext {
            current_channel_id: channel_id.to_string(),
            current_video_title: title.to_string(),
            reference_date,
        };
        let mut rng = self.rng.lock();
        self.engine
            .generate(&context, &all, &fresh, &series, &mut *rng)
    }

    /// Drops every cached result, or only those whose key starts with
    /// `cache_<prefix>`.
    pub fn clear_cache(&self, prefix: Option<&str>) -> eyre::Result<usize> {
        self.cache.clear(prefix.unwrap_or_default())
    }

    /// Drops cached results that have outlived their namespace's TTL.
    pub fn purge_expired_cache(&self) -> eyre::Result<usize> {
        let namespaces = self.settings.cache.all();
        let refs: Vec<_> = namespaces.iter().collect();
        self.cache.purge_expired(&refs)
    }
}

/// Parses a reference date given either as a calendar day (`2011-06-15`,
/// taken as midnight UTC) or as a full RFC 3339 timestamp.
pub fn parse_reference_date(input: &str) -> eyre::Result<Timestamp> {
    let input = input.trim();
    if let Ok(timestamp) = input.parse::<Timestamp>() {
        return Ok(timestamp);
    }
    let date: Date = input
        .parse()
        .with_context(|| format!("'{input}' is neither a date nor a timestamp"))?;
    let zoned = date
        .to_zoned(TimeZone::UTC)
        .with_context(|| format!("'{input}' is out of range"))?;
    Ok(zoned.timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;

    #[test]
    fn reference_dates() {
        assert_eq!(
            parse_reference_date("2011-06-15").unwrap().to_string(),
            "2011-06-15T00:00:00Z"
        );
        assert_eq!(
            parse_reference_date(" 2011-06-15T12:30:00+02:00 ").unwrap().to_string(),
            "2011-06-15T10:30:00Z"
        );
        assert!(parse_reference_date("last tuesday").is_err());
    }

    #[tokio::test]
    async fn empty_pool_recommends_nothing() {
        let settings = Settings {
            seed: Some(1),
            ..Settings::default()
        };
        let clock = Arc::new(ManualClock::new("2011-06-15T00:00:00Z".parse().unwrap()));
        let wayback = Wayback::new(settings, Arc::new(MemoryStore::default()), clock).unwrap();

        let reference = parse_reference_date("2011-06-15").unwrap();
        let videos = wayback
            .recommend("UC123", "Tekkit Survival Part 3", reference)
            .await;
        assert!(videos.is_empty());
        assert_eq!(wayback.clear_cache(None).unwrap(), 0);
    }
}
