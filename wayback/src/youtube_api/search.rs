//! YouTube Search API types.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Response structure for the `search.list` API call.
///
/// Items are kept as raw JSON so that one malformed entry does not take the
/// rest of the page down with it; see [`SearchListResponse::results`].
///
/// See: <https://developers.google.com/youtube/v3/docs/search/list>
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SearchListResponse {
    /// A list of results that match the search criteria.
    #[serde(default)]
    pub items: Vec<Value>,
}

impl SearchListResponse {
    /// Decodes each item on its own, yielding only those that parse.
    pub fn results(self) -> impl Iterator<Item = SearchResult> {
        self.items
            .into_iter()
            .filter_map(|item| match serde_json::from_value(item) {
                Ok(result) => Some(result),
                Err(e) => {
                    tracing::debug!(error = %e, "skipping malformed search result");
                    None
                }
            })
    }
}

/// A search result, which points at a video, channel, or playlist.
///
/// See: <https://developers.google.com/youtube/v3/docs/search#resource>
#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: ResourceId,
    pub snippet: SearchResultSnippet,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResourceId {
    /// Set only when the result is a video.
    #[serde(rename = "videoId")]
    pub video_id: Option<String>,
}

/// Basic details about a search result.
///
/// See: <https://developers.google.com/youtube/v3/docs/search#snippet>
#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResultSnippet {
    pub title: String,
    #[serde(rename = "channelTitle", default)]
    pub channel_title: String,
    #[serde(rename = "channelId", default)]
    pub channel_id: String,
    #[serde(default)]
    pub thumbnails: Thumbnails,
    /// The creation date and time of the resource, in ISO 8601 format.
    #[serde(rename = "publishedAt")]
    pub published_at: Timestamp,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Thumbnails {
    pub medium: Option<Thumbnail>,
    pub default: Option<Thumbnail>,
}

impl Thumbnails {
    /// The medium thumbnail if present, else the default one.
    pub fn best_url(&self) -> Option<&str> {
        self.medium
            .as_ref()
            .or(self.default.as_ref())
            .map(|t| t.url.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Thumbnail {
    pub url: String,
}

/// Error payload returned alongside non-2xx statuses.
///
/// See: <https://developers.google.com/youtube/v3/docs/errors>
#[derive(Debug, Deserialize)]
pub struct ApiErrorResponse {
    pub error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    pub message: String,
}

/// The `order` parameter of `search.list`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SearchOrder {
    #[default]
    Relevance,
    Date,
    ViewCount,
}

impl SearchOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchOrder::Relevance => "relevance",
            SearchOrder::Date => "date",
            SearchOrder::ViewCount => "viewCount",
        }
    }
}

/// The `videoDuration` filter of `search.list`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VideoDuration {
    /// Under four minutes.
    Short,
    /// Four to twenty minutes.
    Medium,
    /// Over twenty minutes.
    Long,
}

impl VideoDuration {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoDuration::Short => "short",
            VideoDuration::Medium => "medium",
            VideoDuration::Long => "long",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_mixed_results() {
        let body = serde_json::json!({
            "kind": "youtube#searchListResponse",
            "items": [
                {
                    "id": { "kind": "youtube#video", "videoId": "abc123" },
                    "snippet": {
                        "title": "Episode 1",
                        "channelTitle": "Someone",
                        "channelId": "UC1",
                        "publishedAt": "2011-05-01T10:00:00Z",
                        "thumbnails": { "default": { "url": "https://i.ytimg.com/d.jpg" } }
                    }
                },
                {
                    "id": { "kind": "youtube#channel", "channelId": "UC1" },
                    "snippet": {
                        "title": "Someone",
                        "publishedAt": "2009-01-01T00:00:00Z"
                    }
                }
            ]
        });

        let response: SearchListResponse = serde_json::from_value(body).unwrap();
        let results: Vec<_> = response.results().collect();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id.video_id.as_deref(), Some("abc123"));
        assert_eq!(
            results[0].snippet.thumbnails.best_url(),
            Some("https://i.ytimg.com/d.jpg")
        );
        assert_eq!(results[1].id.video_id, None);
        assert_eq!(results[1].snippet.thumbnails.best_url(), None);
    }

    #[test]
    fn malformed_items_are_skipped_individually() {
        let body = serde_json::json!({
            "items": [
                {
                    "id": { "videoId": "ok" },
                    "snippet": { "title": "Fine", "publishedAt": "2011-05-01T10:00:00Z" }
                },
                { "id": { "videoId": "bad" }, "snippet": { "title": "No date" } },
                "not even an object"
            ]
        });
        let response: SearchListResponse = serde_json::from_value(body).unwrap();
        let ids: Vec<_> = response.results().filter_map(|r| r.id.video_id).collect();
        assert_eq!(ids, vec!["ok".to_string()]);
    }

    #[test]
    fn non_list_items_fail_the_whole_page() {
        let body = serde_json::json!({ "items": 5 });
        assert!(serde_json::from_value::<SearchListResponse>(body).is_err());
    }
}
