//! The video records handed to the presentation layer.

use crate::display;
use crate::youtube_api::SearchResult;
use jiff::Timestamp;
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoRecord {
    pub id: String,
    pub title: String,
    pub channel_name: String,
    pub channel_id: String,
    pub thumbnail_url: String,
    pub published_at: Timestamp,
    pub description: String,
    pub view_count_display: String,
    pub relative_date_display: String,
    pub is_viral: bool,
}

impl VideoRecord {
    /// Builds a record from a raw search result, synthesizing the view count
    /// and age text as seen from `reference_date`.
    ///
    /// Returns `None` for results that are not videos (channels, playlists).
    pub fn from_search_result(
        item: SearchResult,
        reference_date: Timestamp,
        is_viral: bool,
        rng: &mut impl Rng,
    ) -> Option<Self> {
        let id = item.id.video_id?;
        let snippet = item.snippet;
        let days = display::days_between(snippet.published_at, reference_date);
        let views = display::synthesize_views(days, is_viral, rng);

        Some(Self {
            id,
            title: decode_entities(&snippet.title),
            channel_name: decode_entities(&snippet.channel_title),
            channel_id: snippet.channel_id,
            thumbnail_url: snippet
                .thumbnails
                .best_url()
                .unwrap_or_default()
                .to_string(),
            published_at: snippet.published_at,
            description: decode_entities(snippet.description.as_deref().unwrap_or_default()),
            view_count_display: display::format_views(views),
            relative_date_display: display::relative_age(snippet.published_at, reference_date),
            is_viral,
        })
    }
}

/// Undoes the HTML escaping the search API applies to snippet text.
fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
