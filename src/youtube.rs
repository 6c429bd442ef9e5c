//! YouTube transcripts
//!
//! Video id extraction, transcript track selection and an HTTP provider that reads
//! caption tracks from the public watch page.

use crate::error::ExternalError;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

/// `...youtube.com/watch?v=<id>` or `...youtu.be/<id>`; the last candidate wins
static VIDEO_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r".*(?:v=|/)([0-9A-Za-z_-]{11})").unwrap());

static TEXT_ELEMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<text[^>]*>(.*?)</text>").unwrap());

static INNER_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());

static ENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|amp|lt|gt|quot|apos|nbsp);").unwrap());

/// Video id from a link; anything that does not look like a link is used verbatim
pub fn extract_video_id(input: &str) -> String {
    VIDEO_ID
        .captures(input)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| input.to_string())
}

/// True when `word` contains something that looks like a video id after `v=` or `/`
pub fn is_video_link(word: &str) -> bool {
    VIDEO_ID.is_match(word)
}

/// One caption track of a video
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptTrack {
    pub language_code: String,
    pub name: String,
    /// Auto-generated (speech recognition) rather than uploaded
    pub generated: bool,
    pub url: String,
}

/// Source of caption tracks
#[async_trait]
pub trait TranscriptProvider: Send + Sync {
    /// Every caption track of the video
    async fn list_tracks(&self, video_id: &str) -> Result<Vec<TranscriptTrack>, ExternalError>;

    /// Caption fragments of one track, in order
    async fn fetch_track(&self, track: &TranscriptTrack) -> Result<Vec<String>, ExternalError>;
}

/// Track in `language`, uploaded captions first, else the first generated track
pub fn pick_track<'a>(
    tracks: &'a [TranscriptTrack],
    language: &str,
) -> Option<&'a TranscriptTrack> {
    let in_language = |generated: bool| {
        tracks
            .iter()
            .find(|t| t.generated == generated && t.language_code == language)
    };
    in_language(false)
        .or_else(|| in_language(true))
        .or_else(|| tracks.iter().find(|t| t.generated))
}

/// Whole transcript of a video as one string
pub async fn fetch_transcript(
    provider: &dyn TranscriptProvider,
    video_id: &str,
    language: &str,
) -> Result<String, ExternalError> {
    let tracks = provider.list_tracks(video_id).await?;
    if tracks.is_empty() {
        return Err(ExternalError::NoTranscriptAvailable(video_id.to_string()));
    }

    let track = pick_track(&tracks, language).ok_or_else(|| {
        ExternalError::NoTranscriptForLanguage {
            video_id: video_id.to_string(),
            language: language.to_string(),
        }
    })?;

    if track.language_code != language {
        info!(
            "No '{}' transcript for {}, using generated '{}'",
            language, video_id, track.language_code
        );
    }

    let fragments = provider.fetch_track(track).await?;
    let transcript = fragments
        .iter()
        .map(|f| f.trim())
        .filter(|f| !f.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    if transcript.is_empty() {
        return Err(ExternalError::NoTranscriptAvailable(video_id.to_string()));
    }
    debug!("Transcript for {}: {} chars", video_id, transcript.len());
    Ok(transcript)
}

/// Caption track list inside the watch page player response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Captions {
    player_captions_tracklist_renderer: Option<TracklistRenderer>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TracklistRenderer {
    #[serde(default)]
    caption_tracks: Vec<CaptionTrack>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CaptionTrack {
    base_url: String,
    language_code: String,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    name: Option<TrackName>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrackName {
    simple_text: Option<String>,
    #[serde(default)]
    runs: Vec<TextRun>,
}

#[derive(Debug, Deserialize)]
struct TextRun {
    text: String,
}

impl From<CaptionTrack> for TranscriptTrack {
    fn from(track: CaptionTrack) -> Self {
        let name = track
            .name
            .map(|n| {
                n.simple_text
                    .unwrap_or_else(|| n.runs.into_iter().map(|r| r.text).collect())
            })
            .unwrap_or_else(|| track.language_code.clone());
        Self {
            generated: track.kind.as_deref() == Some("asr"),
            language_code: track.language_code,
            name,
            url: track.base_url.replace("&fmt=srv3", ""),
        }
    }
}

/// Transcript provider reading youtube.com directly
pub struct YoutubeTranscripts {
    client: Client,
}

impl YoutubeTranscripts {
    pub fn new(timeout: Duration) -> Result<Self, ExternalError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko)")
            .build()?;
        Ok(Self { client })
    }

    /// Caption tracks out of a watch page
    fn parse_watch_page(video_id: &str, html: &str) -> Result<Vec<TranscriptTrack>, ExternalError> {
        let Some((_, after)) = html.split_once("\"captions\":") else {
            if !html.contains("\"playabilityStatus\":") {
                return Err(ExternalError::NoTranscriptAvailable(video_id.to_string()));
            }
            return Err(ExternalError::TranscriptsDisabled(video_id.to_string()));
        };
        let json = after
            .split_once(",\"videoDetails")
            .map(|(captions, _)| captions)
            .unwrap_or(after);

        let captions: Captions = serde_json::from_str(json)
            .map_err(|e| ExternalError::MalformedResponse(format!("caption list: {}", e)))?;

        let tracks = captions
            .player_captions_tracklist_renderer
            .ok_or_else(|| ExternalError::TranscriptsDisabled(video_id.to_string()))?
            .caption_tracks;

        Ok(tracks.into_iter().map(TranscriptTrack::from).collect())
    }

    /// Fragments out of a timed-text XML document
    fn parse_timed_text(xml: &str) -> Vec<String> {
        TEXT_ELEMENT
            .captures_iter(xml)
            .filter_map(|c| c.get(1))
            .map(|m| {
                // Entities arrive escaped twice (`&amp;#39;`)
                let text = unescape_entities(&unescape_entities(m.as_str()));
                INNER_TAG.replace_all(&text, "").into_owned()
            })
            .filter(|t| !t.trim().is_empty())
            .collect()
    }
}

#[async_trait]
impl TranscriptProvider for YoutubeTranscripts {
    async fn list_tracks(&self, video_id: &str) -> Result<Vec<TranscriptTrack>, ExternalError> {
        let response = self
            .client
            .get("https://www.youtube.com/watch")
            .query(&[("v", video_id)])
            .header("Accept-Language", "en-US")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ExternalError::Api {
                status: response.status().as_u16(),
                message: format!("watch page for {}", video_id),
            });
        }

        let html = response.text().await?;
        let tracks = Self::parse_watch_page(video_id, &html)?;
        debug!("Video {} has {} caption tracks", video_id, tracks.len());
        Ok(tracks)
    }

    async fn fetch_track(&self, track: &TranscriptTrack) -> Result<Vec<String>, ExternalError> {
        let response = self
            .client
            .get(&track.url)
            .header("Accept-Language", "en-US")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ExternalError::Api {
                status: response.status().as_u16(),
                message: format!("timed text for '{}'", track.language_code),
            });
        }

        Ok(Self::parse_timed_text(&response.text().await?))
    }
}

fn unescape_entities(text: &str) -> String {
    ENTITY
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let entity = &caps[1];
            let decoded = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some(' '),
                _ => {
                    let number = &entity[1..];
                    let code = match number.strip_prefix(|c| c == 'x' || c == 'X') {
                        Some(hex) => u32::from_str_radix(hex, 16).ok(),
                        None => number.parse().ok(),
                    };
                    code.and_then(char::from_u32)
                }
            };
            decoded
                .map(String::from)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_video_id() {
        assert_eq!(extract_video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ"), "dQw4w9WgXcQ");
        assert_eq!(extract_video_id("youtu.be/dQw4w9WgXcQ"), "dQw4w9WgXcQ");
        assert_eq!(
            extract_video_id("https://youtu.be/dQw4w9WgXcQ?si=abcdefghijklmnop"),
            "dQw4w9WgXcQ"
        );
        assert_eq!(
            extract_video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=42s"),
            "dQw4w9WgXcQ"
        );
        assert_eq!(extract_video_id("https://www.youtube.com/shorts/aqz-KE-bpKQ"), "aqz-KE-bpKQ");
    }

    #[test]
    fn test_unmatched_input_is_used_verbatim() {
        assert_eq!(extract_video_id("dQw4w9WgXcQ"), "dQw4w9WgXcQ");
        assert_eq!(extract_video_id("not a link"), "not a link");
    }

    #[test]
    fn test_is_video_link() {
        assert!(is_video_link("youtu.be/dQw4w9WgXcQ"));
        assert!(is_video_link("https://m.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(!is_video_link("hello"));
        assert!(!is_video_link("and/or"));
    }

    fn track(lang: &str, generated: bool) -> TranscriptTrack {
        TranscriptTrack {
            language_code: lang.to_string(),
            name: lang.to_string(),
            generated,
            url: format!("https://example.test/{}/{}", lang, generated),
        }
    }

    #[test]
    fn test_pick_track_prefers_uploaded_in_language() {
        let tracks = vec![track("en", true), track("de", false), track("en", false)];
        assert_eq!(pick_track(&tracks, "en"), Some(&tracks[2]));
    }

    #[test]
    fn test_pick_track_falls_back_to_first_generated() {
        let tracks = vec![track("de", false), track("ja", true), track("fr", true)];
        assert_eq!(pick_track(&tracks, "en"), Some(&tracks[1]));
    }

    #[test]
    fn test_pick_track_none_without_generated() {
        let tracks = vec![track("de", false)];
        assert_eq!(pick_track(&tracks, "en"), None);
    }

    #[test]
    fn test_parse_watch_page() {
        let html = r#"<script>var ytInitialPlayerResponse = {"playabilityStatus":{"status":"OK"},"captions":{"playerCaptionsTracklistRenderer":{"captionTracks":[{"baseUrl":"https://www.youtube.com/api/timedtext?v=dQw4w9WgXcQ&lang=en","name":{"simpleText":"English (auto-generated)"},"languageCode":"en","kind":"asr"},{"baseUrl":"https://www.youtube.com/api/timedtext?v=dQw4w9WgXcQ&lang=de&fmt=srv3","name":{"runs":[{"text":"German"}]},"languageCode":"de"}]}},"videoDetails":{"videoId":"dQw4w9WgXcQ"}};</script>"#;
        let tracks = YoutubeTranscripts::parse_watch_page("dQw4w9WgXcQ", html).unwrap();
        assert_eq!(tracks.len(), 2);
        assert!(tracks[0].generated);
        assert_eq!(tracks[0].name, "English (auto-generated)");
        assert!(!tracks[1].generated);
        assert_eq!(tracks[1].name, "German");
        assert!(!tracks[1].url.contains("fmt=srv3"));
    }

    #[test]
    fn test_parse_watch_page_without_captions() {
        let html = r#"{"playabilityStatus":{"status":"OK"},"videoDetails":{}}"#;
        assert!(matches!(
            YoutubeTranscripts::parse_watch_page("x", html),
            Err(ExternalError::TranscriptsDisabled(_))
        ));
        assert!(matches!(
            YoutubeTranscripts::parse_watch_page("x", "<html></html>"),
            Err(ExternalError::NoTranscriptAvailable(_))
        ));
    }

    #[test]
    fn test_parse_timed_text() {
        let xml = r#"<?xml version="1.0" encoding="utf-8" ?><transcript><text start="0.5" dur="1.2">We&amp;#39;re no strangers</text><text start="2" dur="1">to &lt;i&gt;love&lt;/i&gt;</text><text start="3" dur="1"> </text></transcript>"#;
        let fragments = YoutubeTranscripts::parse_timed_text(xml);
        assert_eq!(fragments, vec!["We're no strangers", "to love"]);
    }

    struct StaticTracks(Vec<TranscriptTrack>);

    #[async_trait]
    impl TranscriptProvider for StaticTracks {
        async fn list_tracks(&self, _video_id: &str) -> Result<Vec<TranscriptTrack>, ExternalError> {
            Ok(self.0.clone())
        }

        async fn fetch_track(&self, track: &TranscriptTrack) -> Result<Vec<String>, ExternalError> {
            Ok(vec![format!(" {} ", track.language_code), String::new(), "done".to_string()])
        }
    }

    #[test]
    fn test_fetch_transcript_joins_fragments() {
        let provider = StaticTracks(vec![track("de", false), track("en", true)]);
        let transcript = tokio_test::block_on(fetch_transcript(&provider, "id", "en")).unwrap();
        assert_eq!(transcript, "en done");
    }

    #[test]
    fn test_fetch_transcript_errors() {
        let provider = StaticTracks(vec![track("de", false)]);
        assert!(matches!(
            tokio_test::block_on(fetch_transcript(&provider, "id", "en")),
            Err(ExternalError::NoTranscriptForLanguage { ref language, .. }) if language == "en"
        ));

        let provider = StaticTracks(Vec::new());
        assert!(matches!(
            tokio_test::block_on(fetch_transcript(&provider, "id", "en")),
            Err(ExternalError::NoTranscriptAvailable(ref id)) if id == "id"
        ));
    }
}
