use regex::Regex;
use serde::Deserialize;
use std::{process::Command, sync::LazyLock, time::Duration};
use tracing::{debug, info};

use super::{MediaFetcher, Playable};
use crate::error::ResolutionError;

static WATCH_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://www\.youtube\.com/watch\?v=\S{11}").expect("valid watch url regex")
});

static SHORT_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://youtu\.be/\S{11}").expect("valid short url regex")
});

/// Finds a supported video URL inside free text and returns the matched part.
pub fn match_video_url(text: &str) -> Option<&str> {
    WATCH_URL
        .find(text)
        .or_else(|| SHORT_URL.find(text))
        .map(|m| m.as_str())
}

/// What `yt-dlp --dump-json` prints for a single video.
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    id: String,
    title: String,
    duration: Option<f64>,
    thumbnail: Option<String>,
    webpage_url: Option<String>,
    /// Present when a single format was selected with `-f`.
    url: Option<String>,
    formats: Option<Vec<Format>>,
}

#[derive(Debug, Deserialize)]
struct Format {
    url: String,
    acodec: Option<String>,
    vcodec: Option<String>,
    abr: Option<f64>,
}

impl YtDlpInfo {
    /// Selected stream, or the best audio-only format as a fallback.
    fn stream_url(&self) -> Option<String> {
        if let Some(url) = &self.url {
            return Some(url.clone());
        }

        self.formats
            .as_ref()?
            .iter()
            .filter(|f| f.acodec.as_deref().is_some_and(|c| c != "none"))
            .filter(|f| f.vcodec.as_deref().map_or(true, |c| c == "none"))
            .max_by(|a, b| {
                a.abr
                    .unwrap_or_default()
                    .partial_cmp(&b.abr.unwrap_or_default())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|f| f.url.clone())
    }

    fn into_playable(self, reference: &str) -> Result<Playable, ResolutionError> {
        let stream_url = self
            .stream_url()
            .ok_or_else(|| ResolutionError::Extraction {
                reference: reference.to_string(),
                message: "no audio stream in extractor output".to_string(),
            })?;

        Ok(Playable {
            stream_url,
            webpage_url: self
                .webpage_url
                .unwrap_or_else(|| format!("https://www.youtube.com/watch?v={}", self.id)),
            title: self.title,
            duration: self.duration.map(Duration::from_secs_f64),
            thumbnail: self.thumbnail,
        })
    }
}

/// Extracts media with the `yt-dlp` binary.
///
/// `fetch` blocks until the process exits.
pub struct YtDlpFetcher {
    binary: String,
}

impl YtDlpFetcher {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl MediaFetcher for YtDlpFetcher {
    fn fetch(&self, reference: &str) -> Result<Playable, ResolutionError> {
        debug!("📊 Extracting info for {}", reference);

        let output = Command::new(&self.binary)
            .args([
                "--no-playlist",
                "--dump-json",
                "-f",
                "bestaudio/best",
                "--no-check-certificate",
                "--quiet",
                "--no-warnings",
                reference,
            ])
            .output()
            .map_err(|e| ResolutionError::Extraction {
                reference: reference.to_string(),
                message: format!("could not run {}: {}", self.binary, e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ResolutionError::Extraction {
                reference: reference.to_string(),
                message: stderr.trim().to_string(),
            });
        }

        let info: YtDlpInfo =
            serde_json::from_slice(&output.stdout).map_err(|e| ResolutionError::Extraction {
                reference: reference.to_string(),
                message: format!("unreadable extractor output: {}", e),
            })?;

        info!("✅ Extracted '{}'", info.title);
        info.into_playable(reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_url_detection() {
        assert_eq!(
            match_video_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ"),
            Some("https://www.youtube.com/watch?v=dQw4w9WgXcQ")
        );
        assert_eq!(
            match_video_url("listen: http://youtu.be/dQw4w9WgXcQ now"),
            Some("http://youtu.be/dQw4w9WgXcQ")
        );
        assert_eq!(match_video_url("https://youtu.be/short"), None);
        assert_eq!(match_video_url("https://example.com/video"), None);
        assert_eq!(match_video_url("rick astley"), None);
    }

    #[test]
    fn prefers_selected_format_url() {
        let info: YtDlpInfo = serde_json::from_str(
            r#"{"id":"dQw4w9WgXcQ","title":"Never Gonna Give You Up","duration":212.0,
                "thumbnail":"https://i.ytimg.com/vi/dQw4w9WgXcQ/hq.jpg",
                "webpage_url":"https://www.youtube.com/watch?v=dQw4w9WgXcQ",
                "url":"https://rr1.googlevideo.com/selected"}"#,
        )
        .unwrap();

        let playable = info.into_playable("ref").unwrap();
        assert_eq!(playable.stream_url, "https://rr1.googlevideo.com/selected");
        assert_eq!(playable.duration, Some(Duration::from_secs(212)));
    }

    #[test]
    fn falls_back_to_best_audio_only_format() {
        let info: YtDlpInfo = serde_json::from_str(
            r#"{"id":"abc","title":"t","formats":[
                {"url":"video","acodec":"mp4a","vcodec":"avc1","abr":192.0},
                {"url":"low","acodec":"opus","vcodec":"none","abr":64.0},
                {"url":"high","acodec":"opus","vcodec":"none","abr":160.0}]}"#,
        )
        .unwrap();

        let playable = info.into_playable("ref").unwrap();
        assert_eq!(playable.stream_url, "high");
        assert_eq!(playable.webpage_url, "https://www.youtube.com/watch?v=abc");
    }

    #[test]
    fn missing_stream_is_an_extraction_error() {
        let info: YtDlpInfo = serde_json::from_str(r#"{"id":"abc","title":"t"}"#).unwrap();
        assert!(matches!(
            info.into_playable("ref"),
            Err(ResolutionError::Extraction { .. })
        ));
    }
}
