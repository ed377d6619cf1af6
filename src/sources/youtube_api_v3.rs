use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error, info};

use super::{SearchBackend, SearchHit};
use crate::error::ResolutionError;

const SERVICE: &str = "YouTube API v3";
const SEARCH_ENDPOINT: &str = "https://www.googleapis.com/youtube/v3/search";

/// Search responses carry either `items` or an `error` object, even on 200.
#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    #[serde(default)]
    items: Vec<SearchItem>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    errors: Vec<ApiErrorDetail>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    reason: String,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: ItemId,
    snippet: Snippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemId {
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    title: String,
    thumbnails: Option<Thumbnails>,
}

#[derive(Debug, Deserialize)]
struct Thumbnails {
    medium: Option<Thumbnail>,
    high: Option<Thumbnail>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
}

impl ApiError {
    fn reason(&self) -> String {
        self.errors
            .first()
            .map(|e| e.reason.clone())
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| "unknown error".to_string())
    }
}

impl ApiEnvelope {
    fn into_hits(self) -> Result<Vec<SearchHit>, ResolutionError> {
        if let Some(err) = self.error {
            return Err(ResolutionError::Rejected {
                service: SERVICE,
                reason: err.reason(),
            });
        }

        Ok(self
            .items
            .into_iter()
            .filter_map(|item| {
                let video_id = item.id.video_id?;
                let thumbnail = item
                    .snippet
                    .thumbnails
                    .and_then(|t| t.high.or(t.medium))
                    .map(|t| t.url);
                Some(SearchHit {
                    url: format!("https://www.youtube.com/watch?v={}", video_id),
                    title: item.snippet.title,
                    thumbnail,
                })
            })
            .collect())
    }
}

pub struct YouTubeApiClient {
    /// Without a key every search is rejected locally.
    api_key: Option<String>,
    client: reqwest::Client,
}

impl YouTubeApiClient {
    pub fn new(api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { api_key, client })
    }

    fn network_error(e: reqwest::Error) -> ResolutionError {
        ResolutionError::Network {
            service: SERVICE,
            message: e.to_string(),
        }
    }
}

#[async_trait]
impl SearchBackend for YouTubeApiClient {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, ResolutionError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(ResolutionError::Rejected {
                service: SERVICE,
                reason: "no API key configured".to_string(),
            });
        };
        debug!("🔍 YouTube API v3 search: {}", query);

        let max_results = limit.to_string();
        let response = self
            .client
            .get(SEARCH_ENDPOINT)
            .query(&[
                ("part", "snippet"),
                ("type", "video"),
                ("q", query),
                ("maxResults", max_results.as_str()),
                ("key", api_key),
            ])
            .send()
            .await
            .map_err(Self::network_error)?;

        let status = response.status();
        let envelope: ApiEnvelope = response.json().await.map_err(Self::network_error)?;
        let hits = envelope.into_hits().inspect_err(|e| {
            error!("❌ YouTube API error ({}): {}", status, e);
        })?;

        info!("✅ YouTube API v3: {} results", hits.len());
        Ok(hits)
    }

    fn source_name(&self) -> &'static str {
        SERVICE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn items_become_hits_in_order() {
        let envelope: ApiEnvelope = serde_json::from_str(
            r#"{"items":[
                {"id":{"kind":"youtube#video","videoId":"aaaaaaaaaaa"},
                 "snippet":{"title":"First","channelTitle":"Chan",
                            "thumbnails":{"medium":{"url":"m"},"high":{"url":"h"}}}},
                {"id":{"kind":"youtube#channel"},"snippet":{"title":"Not a video"}},
                {"id":{"videoId":"bbbbbbbbbbb"},"snippet":{"title":"Second"}}]}"#,
        )
        .unwrap();

        let hits = envelope.into_hits().unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].url, "https://www.youtube.com/watch?v=aaaaaaaaaaa");
        assert_eq!(hits[0].thumbnail.as_deref(), Some("h"));
        assert_eq!(hits[1].title, "Second");
    }

    #[test]
    fn empty_response_is_not_an_error() {
        let envelope: ApiEnvelope = serde_json::from_str(r#"{"kind":"x"}"#).unwrap();
        assert!(envelope.into_hits().unwrap().is_empty());
    }

    #[test]
    fn error_payload_reports_reason() {
        let envelope: ApiEnvelope = serde_json::from_str(
            r#"{"error":{"code":403,"message":"quota","errors":[{"reason":"quotaExceeded"}]}}"#,
        )
        .unwrap();

        match envelope.into_hits() {
            Err(ResolutionError::Rejected { reason, .. }) => assert_eq!(reason, "quotaExceeded"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn search_without_key_is_rejected_locally() {
        let client = YouTubeApiClient::new(None, Duration::from_secs(1)).unwrap();
        let result = client.search("anything", 5).await;
        assert!(matches!(result, Err(ResolutionError::Rejected { .. })));
    }
}
