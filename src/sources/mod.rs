pub mod youtube;
pub mod youtube_api_v3;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serenity::model::id::{ChannelId, UserId};
use std::{sync::Arc, time::Duration};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::error::ResolutionError;

pub use youtube::YtDlpFetcher;
pub use youtube_api_v3::YouTubeApiClient;

/// Default number of hits returned by a multi-result search.
pub const DEFAULT_SEARCH_LIMIT: usize = 5;

/// Ranked search against the external content service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Returns at most `limit` hits, most relevant first.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, ResolutionError>;

    fn source_name(&self) -> &'static str;
}

/// Blocking fetch of the playable media behind a reference.
///
/// Implementations are allowed to block for a long time (process spawn,
/// network download); callers must run them on the blocking pool.
#[cfg_attr(test, mockall::automock)]
pub trait MediaFetcher: Send + Sync {
    fn fetch(&self, reference: &str) -> Result<Playable, ResolutionError>;
}

/// A single search result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub thumbnail: Option<String>,
}

/// Materialized media: a direct stream plus the metadata learned while
/// extracting it.
#[derive(Debug, Clone, PartialEq)]
pub struct Playable {
    pub stream_url: String,
    pub title: String,
    pub webpage_url: String,
    pub duration: Option<Duration>,
    pub thumbnail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
    pub id: UserId,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionState {
    Unresolved,
    Resolved,
}

/// A queued song.
///
/// Tracks are shared as `Arc<Track>` between the queue orderings, so the same
/// allocation can be replayed by the loop buffer. Resolution happens at most
/// once per track.
#[derive(Debug)]
pub struct Track {
    reference: String,
    title: Option<String>,
    duration: Option<Duration>,
    thumbnail: Option<String>,
    requester: Option<Requester>,
    channel: Option<ChannelId>,
    added_at: Option<DateTime<Utc>>,
    playable: OnceCell<Playable>,
}

impl Track {
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            title: None,
            duration: None,
            thumbnail: None,
            requester: None,
            channel: None,
            added_at: None,
            playable: OnceCell::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_thumbnail(mut self, thumbnail: impl Into<String>) -> Self {
        self.thumbnail = Some(thumbnail.into());
        self
    }

    #[cfg(test)]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Records who asked for the track, where to report about it, and when
    /// it was queued.
    pub fn stamp(&mut self, channel: ChannelId, requester: Requester) {
        self.channel = Some(channel);
        self.requester = Some(requester);
        self.added_at = Some(Utc::now());
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Best known title, falling back to the reference itself.
    pub fn title(&self) -> &str {
        self.playable
            .get()
            .map(|p| p.title.as_str())
            .or(self.title.as_deref())
            .unwrap_or(&self.reference)
    }

    pub fn url(&self) -> &str {
        self.playable
            .get()
            .map(|p| p.webpage_url.as_str())
            .unwrap_or(&self.reference)
    }

    pub fn duration(&self) -> Option<Duration> {
        self.playable
            .get()
            .and_then(|p| p.duration)
            .or(self.duration)
    }

    pub fn thumbnail(&self) -> Option<&str> {
        self.playable
            .get()
            .and_then(|p| p.thumbnail.as_deref())
            .or(self.thumbnail.as_deref())
    }

    pub fn requester(&self) -> Option<&Requester> {
        self.requester.as_ref()
    }

    pub fn channel(&self) -> Option<ChannelId> {
        self.channel
    }

    pub fn added_at(&self) -> Option<DateTime<Utc>> {
        self.added_at
    }

    pub fn state(&self) -> ResolutionState {
        if self.playable.initialized() {
            ResolutionState::Resolved
        } else {
            ResolutionState::Unresolved
        }
    }

    pub fn playable(&self) -> Option<&Playable> {
        self.playable.get()
    }
}

impl From<SearchHit> for Track {
    fn from(hit: SearchHit) -> Self {
        let mut track = Track::new(hit.url).with_title(hit.title);
        if let Some(thumbnail) = hit.thumbnail {
            track = track.with_thumbnail(thumbnail);
        }
        track
    }
}

/// Turns user input into tracks and tracks into playable media.
#[derive(Clone)]
pub struct TrackResolver {
    search: Arc<dyn SearchBackend>,
    fetcher: Arc<dyn MediaFetcher>,
}

impl TrackResolver {
    pub fn new(search: Arc<dyn SearchBackend>, fetcher: Arc<dyn MediaFetcher>) -> Self {
        Self { search, fetcher }
    }

    /// A direct video URL anywhere in the query wins; otherwise the top
    /// search hit. `Ok(None)` means the search found nothing.
    pub async fn resolve_one(&self, query: &str) -> Result<Option<Track>, ResolutionError> {
        if let Some(url) = youtube::match_video_url(query) {
            debug!("🔗 Direct video reference: {}", url);
            return Ok(Some(Track::new(url)));
        }

        let hits = self.search.search(query, 1).await?;
        Ok(hits.into_iter().next().map(Track::from))
    }

    /// Ranked search truncated to `limit`, relevance order preserved.
    pub async fn resolve_many(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Track>, ResolutionError> {
        let hits = self.search.search(query, limit).await?;
        info!(
            "🔍 {} results for '{}' from {}",
            hits.len().min(limit),
            query,
            self.search.source_name()
        );
        Ok(hits.into_iter().take(limit).map(Track::from).collect())
    }

    /// Fetches the playable source for `track` on the blocking pool.
    ///
    /// A resolved track is left untouched.
    pub async fn materialize(&self, track: &Track) -> Result<(), ResolutionError> {
        track
            .playable
            .get_or_try_init(|| async {
                let fetcher = Arc::clone(&self.fetcher);
                let reference = track.reference.clone();
                info!("⬇️ Resolving {}", reference);

                tokio::task::spawn_blocking(move || fetcher.fetch(&reference))
                    .await
                    .map_err(|e| {
                        warn!("Fetch worker failed for {}: {}", track.reference, e);
                        ResolutionError::WorkerLost {
                            reference: track.reference.clone(),
                        }
                    })?
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    pub(crate) fn playable(title: &str) -> Playable {
        Playable {
            stream_url: format!("https://cdn.example/{title}.webm"),
            title: title.to_string(),
            webpage_url: format!("https://www.youtube.com/watch?v={title}"),
            duration: Some(Duration::from_secs(200)),
            thumbnail: None,
        }
    }

    fn hit(n: usize) -> SearchHit {
        SearchHit {
            url: format!("https://www.youtube.com/watch?v=video{n:06}"),
            title: format!("Song {n}"),
            thumbnail: None,
        }
    }

    fn resolver(search: MockSearchBackend, fetcher: MockMediaFetcher) -> TrackResolver {
        TrackResolver::new(Arc::new(search), Arc::new(fetcher))
    }

    #[test]
    fn stamping_records_request_details() {
        let mut track = Track::new("https://youtu.be/a");
        assert!(track.added_at().is_none());

        let before = Utc::now();
        track.stamp(
            ChannelId::new(5),
            Requester {
                id: UserId::new(6),
                name: "moth".to_string(),
            },
        );

        assert_eq!(track.channel(), Some(ChannelId::new(5)));
        assert_eq!(track.requester().unwrap().name, "moth");
        assert!(track.added_at().unwrap() >= before);
    }

    #[tokio::test]
    async fn direct_url_skips_search() {
        let mut search = MockSearchBackend::new();
        search.expect_search().never();
        let resolver = resolver(search, MockMediaFetcher::new());

        let track = resolver
            .resolve_one("play this https://youtu.be/dQw4w9WgXcQ please")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(track.reference(), "https://youtu.be/dQw4w9WgXcQ");
        assert_eq!(track.state(), ResolutionState::Unresolved);
    }

    #[tokio::test]
    async fn free_text_returns_top_hit_or_none() {
        let mut search = MockSearchBackend::new();
        search
            .expect_search()
            .withf(|q, limit| q == "never gonna" && *limit == 1)
            .returning(|_, _| Ok(vec![hit(1)]));
        search
            .expect_search()
            .withf(|q, _| q == "nothing here")
            .returning(|_, _| Ok(Vec::new()));
        let resolver = resolver(search, MockMediaFetcher::new());

        let track = resolver.resolve_one("never gonna").await.unwrap().unwrap();
        assert_eq!(track.title(), "Song 1");
        assert!(resolver.resolve_one("nothing here").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn resolve_many_keeps_order_and_limit() {
        let mut search = MockSearchBackend::new();
        search
            .expect_search()
            .returning(|_, _| Ok((1..=7).map(hit).collect()));
        search.expect_source_name().return_const("YouTube API v3");
        let resolver = resolver(search, MockMediaFetcher::new());

        let titles: Vec<String> = resolver
            .resolve_many("anything", DEFAULT_SEARCH_LIMIT)
            .await
            .unwrap()
            .iter()
            .map(|t| t.title().to_string())
            .collect();

        assert_eq!(titles, vec!["Song 1", "Song 2", "Song 3", "Song 4", "Song 5"]);
    }

    #[tokio::test]
    async fn search_failure_is_a_resolution_error() {
        let mut search = MockSearchBackend::new();
        search.expect_search().returning(|_, _| {
            Err(ResolutionError::Rejected {
                service: "YouTube API v3",
                reason: "keyInvalid".to_string(),
            })
        });
        let resolver = resolver(search, MockMediaFetcher::new());

        assert!(resolver.resolve_one("song").await.is_err());
        assert!(resolver.resolve_many("song", 5).await.is_err());
    }

    #[tokio::test]
    async fn materialize_is_idempotent() {
        let mut fetcher = MockMediaFetcher::new();
        fetcher
            .expect_fetch()
            .times(1)
            .returning(|_| Ok(playable("resolved")));
        let resolver = resolver(MockSearchBackend::new(), fetcher);
        let track = Track::new("https://youtu.be/abcdefghijk").with_title("pending");

        resolver.materialize(&track).await.unwrap();
        resolver.materialize(&track).await.unwrap();

        assert_eq!(track.state(), ResolutionState::Resolved);
        assert_eq!(track.title(), "resolved");
        assert_eq!(track.duration(), Some(Duration::from_secs(200)));
    }

    #[tokio::test]
    async fn failed_materialize_leaves_track_unresolved() {
        let mut fetcher = MockMediaFetcher::new();
        fetcher.expect_fetch().returning(|reference| {
            Err(ResolutionError::Extraction {
                reference: reference.to_string(),
                message: "Video unavailable".to_string(),
            })
        });
        let resolver = resolver(MockSearchBackend::new(), fetcher);
        let track = Track::new("https://youtu.be/abcdefghijk");

        assert!(resolver.materialize(&track).await.is_err());
        assert_eq!(track.state(), ResolutionState::Unresolved);
        assert_eq!(track.title(), "https://youtu.be/abcdefghijk");
    }
}
