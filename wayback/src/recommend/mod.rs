//! Composition of the "up next" list.
//!
//! [`RecommendationEngine::generate`] blends up to three candidate pools into
//! one list:
//!
//! * **fresh**: the current channel's recent uploads,
//!   preferring those that share keywords with the current title;
//! * **all**: everything else known (cached channel listings, viral and
//!   search results), split into the current channel and other channels;
//! * **series**: videos matched on the current title's keywords, scattered
//!   through the list at random positions.
//!
//! Nothing published after the reference date, nothing titled like the video
//! being watched, and no video twice. The engine is pure apart from the random
//! source the caller passes in.

mod keywords;

pub use keywords::{extract_keywords, matches_any};

use crate::video::VideoRecord;
use jiff::Timestamp;
use rand::Rng;
use rand::seq::SliceRandom;
use serde::Deserialize;
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RecommendationConfig {
    /// Length of the list to produce.
    pub target_count: usize,
    /// How many of the slots go to fresh same-channel uploads, at most.
    pub fresh_target: usize,
    /// Share of the fresh slots reserved for keyword matches.
    pub keyword_ratio: f64,
    /// Share of the non-fresh slots given to the current channel.
    pub same_channel_ratio: f64,
    /// Most series videos scattered into the list.
    pub series_cap: usize,
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            target_count: 20,
            fresh_target: 6,
            keyword_ratio: 0.5,
            same_channel_ratio: 0.6,
            series_cap: 3,
        }
    }
}

/// What the viewer is currently looking at.
#[derive(Debug, Clone)]
pub struct RecommendationContext {
    pub current_channel_id: String,
    pub current_video_title: String,
    pub reference_date: Timestamp,
}

/// Slot counts for one run, derived from the config and the pool sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Quotas {
    keyword_fresh: usize,
    regular_fresh: usize,
    same_channel: usize,
    other_channels: usize,
}

impl Quotas {
    fn new(config: &RecommendationConfig, fresh_available: usize) -> Self {
        let fresh = config.fresh_target.min(fresh_available).min(config.target_count);
        let keyword_fresh = (fresh as f64 * config.keyword_ratio.clamp(0.0, 1.0)).floor() as usize;
        let remaining = config.target_count - fresh;
        let same_channel =
            (remaining as f64 * config.same_channel_ratio.clamp(0.0, 1.0)).floor() as usize;
        Self {
            keyword_fresh,
            regular_fresh: fresh - keyword_fresh,
            same_channel,
            other_channels: remaining - same_channel,
        }
    }
}

/// The list under construction.
struct Selection<'a> {
    current_title: &'a str,
    ids: HashSet<String>,
    videos: Vec<VideoRecord>,
}

impl<'a> Selection<'a> {
    fn new(current_title: &'a str) -> Self {
        Self {
            current_title,
            ids: HashSet::new(),
            videos: Vec::new(),
        }
    }

    fn admits(&self, video: &VideoRecord) -> bool {
        video.title != self.current_title && !self.ids.contains(&video.id)
    }

    /// Unselected candidates in random order, each id at most once.
    fn shuffled<'v, R: Rng + ?Sized>(
        &self,
        candidates: impl IntoIterator<Item = &'v VideoRecord>,
        rng: &mut R,
    ) -> Vec<&'v VideoRecord> {
        let mut seen = HashSet::new();
        let mut pool: Vec<_> = candidates
            .into_iter()
            .filter(|&v| self.admits(v) && seen.insert(v.id.as_str()))
            .collect();
        pool.shuffle(rng);
        pool
    }

    /// Adds up to `count` random picks from `candidates`; returns how many.
    fn take_random<'v, R: Rng + ?Sized>(
        &mut self,
        candidates: impl IntoIterator<Item = &'v VideoRecord>,
        count: usize,
        rng: &mut R,
    ) -> usize {
        if count == 0 {
            return 0;
        }
        let picks = self.shuffled(candidates, rng);
        let taken = picks.len().min(count);
        for video in picks.into_iter().take(taken) {
            self.ids.insert(video.id.clone());
            self.videos.push(video.clone());
        }
        taken
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecommendationEngine {
    config: RecommendationConfig,
}

impl RecommendationEngine {
    pub fn new(config: RecommendationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RecommendationConfig {
        &self.config
    }

    /// Builds the recommendation list for `context`.
    ///
    /// The result holds `min(target_count, n)` videos, where `n` is the number
    /// of distinct videos across the three pools that were published by the
    /// reference date and are not titled like the current video. Never fails;
    /// empty pools just give a shorter list.
    pub fn generate<R: Rng + ?Sized>(
        &self,
        context: &RecommendationContext,
        all: &[VideoRecord],
        fresh: &[VideoRecord],
        series: &[VideoRecord],
        rng: &mut R,
    ) -> Vec<VideoRecord> {
        let target = self.config.target_count;
        let current_title = context.current_video_title.as_str();
        let keywords = extract_keywords(current_title);

        let published = |v: &&VideoRecord| v.published_at <= context.reference_date;
        let all: Vec<&VideoRecord> = all.iter().filter(published).collect();
        let fresh: Vec<&VideoRecord> = fresh.iter().filter(published).collect();
        let series: Vec<&VideoRecord> = series
            .iter()
            .filter(published)
            .filter(|v| v.title != current_title)
            .collect();

        let (same_channel, other_channels): (Vec<&VideoRecord>, Vec<&VideoRecord>) = all
            .iter()
            .copied()
            .filter(|v| !(v.channel_id == context.current_channel_id && v.title == current_title))
            .partition(|v| v.channel_id == context.current_channel_id);

        let quotas = Quotas::new(&self.config, fresh.len());
        let mut selection = Selection::new(current_title);

        let keyword_fresh = fresh
            .iter()
            .copied()
            .filter(|v| matches_any(&v.title, &keywords));
        let keyword_hits = selection.take_random(keyword_fresh, quotas.keyword_fresh, rng);
        selection.take_random(fresh.iter().copied(), quotas.regular_fresh, rng);

        let fresh_ids: HashSet<&str> = fresh.iter().map(|v| v.id.as_str()).collect();
        selection.take_random(
            same_channel
                .iter()
                .copied()
                .filter(|v| !fresh_ids.contains(v.id.as_str())),
            quotas.same_channel,
            rng,
        );
        selection.take_random(other_channels, quotas.other_channels, rng);

        let shortfall = target.saturating_sub(selection.videos.len());
        let union = all.iter().chain(&fresh).chain(&series).copied();
        let top_up = selection.take_random(union, shortfall, rng);

        let series_picks: Vec<VideoRecord> = selection
            .shuffled(series.iter().copied(), rng)
            .into_iter()
            .take(self.config.series_cap)
            .cloned()
            .collect();
        let mut videos = selection.videos;
        let series_count = intersperse(&mut videos, series_picks, rng);
        videos.truncate(target);

        tracing::debug!(
            keywords = keywords.len(),
            keyword_hits,
            ?quotas,
            top_up,
            series = series_count,
            total = videos.len(),
            "composed recommendations"
        );
        videos
    }
}

/// Inserts `extras` at distinct random positions of `videos`, returning how
/// many were inserted.
///
/// Positions are drawn against the original list and applied from the back,
/// so an insertion never shifts the target of one still pending.
fn intersperse<R: Rng + ?Sized>(
    videos: &mut Vec<VideoRecord>,
    extras: Vec<VideoRecord>,
    rng: &mut R,
) -> usize {
    let slots = videos.len() + 1;
    let count = extras.len().min(slots);
    let mut positions = rand::seq::index::sample(rng, slots, count).into_vec();
    positions.sort_unstable_by(|a, b| b.cmp(a));
    for (position, video) in positions.into_iter().zip(extras) {
        videos.insert(position, video);
    }
    count
}
