//! Optional YouTube Data API lookups. Used only to enrich and sanity-check a
//! download; every failure here is logged and treated as "unknown".

use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoMetadata {
    pub title: String,
    pub duration_seconds: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct VideoListResponse {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoItem {
    snippet: Option<Snippet>,
    content_details: Option<ContentDetails>,
}

#[derive(Debug, Deserialize)]
struct Snippet {
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentDetails {
    duration: Option<String>,
}

/// Extracts the video id from the usual YouTube URL shapes
/// (`watch?v=`, `youtu.be/`, `/shorts/`, `/embed/`, `/live/`).
pub fn youtube_video_id(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let segments = parsed
        .path_segments()
        .map(|segments| segments.filter(|segment| !segment.is_empty()).collect::<Vec<_>>())
        .unwrap_or_default();

    let id = if host == "youtu.be" {
        segments.first().map(|segment| segment.to_string())
    } else if host == "youtube.com" || host.ends_with(".youtube.com") {
        match segments.as_slice() {
            ["shorts" | "embed" | "live", id, ..] => Some(id.to_string()),
            _ => parsed
                .query_pairs()
                .find(|(key, _)| key == "v")
                .map(|(_, value)| value.to_string()),
        }
    } else {
        None
    };

    id.filter(|value| {
        !value.is_empty()
            && value
                .chars()
                .all(|character| character.is_ascii_alphanumeric() || matches!(character, '-' | '_'))
    })
}

/// Parses the ISO 8601 durations the Data API returns, e.g. `PT1H2M3S` or
/// `P1DT2H`.
pub fn parse_iso8601_duration(value: &str) -> Option<u64> {
    let rest = value.strip_prefix('P')?;
    let (date_part, time_part) = match rest.split_once('T') {
        Some((date, time)) => (date, time),
        None => (rest, ""),
    };

    let mut total = 0u64;
    let mut saw_component = false;

    for (part, units) in [
        (date_part, &[('W', 604_800u64), ('D', 86_400)][..]),
        (time_part, &[('H', 3_600u64), ('M', 60), ('S', 1)][..]),
    ] {
        let mut digits = String::new();
        for character in part.chars() {
            if character.is_ascii_digit() {
                digits.push(character);
                continue;
            }
            let (_, multiplier) = units.iter().find(|(unit, _)| *unit == character)?;
            let amount = digits.parse::<u64>().ok()?;
            total = total.checked_add(amount.checked_mul(*multiplier)?)?;
            digits.clear();
            saw_component = true;
        }
        if !digits.is_empty() {
            return None;
        }
    }

    saw_component.then_some(total)
}

/// Fetches title and duration, trying each API key in order until one is
/// not rejected for quota or authorization reasons.
pub async fn lookup(
    client: &reqwest::Client,
    api_base: &str,
    api_keys: &[String],
    video_id: &str,
) -> Option<VideoMetadata> {
    let endpoint = format!("{}/videos", api_base.trim_end_matches('/'));

    for (index, key) in api_keys.iter().enumerate() {
        let response = match client
            .get(&endpoint)
            .query(&[
                ("part", "snippet,contentDetails"),
                ("id", video_id),
                ("key", key.as_str()),
            ])
            .send()
            .await
        {
            Ok(response) => response,
            Err(error) => {
                warn!("video metadata lookup failed: {error}");
                return None;
            }
        };

        let status = response.status();
        if matches!(
            status,
            StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS | StatusCode::BAD_REQUEST
        ) {
            warn!("metadata API key #{} rejected with HTTP {status}, trying next", index + 1);
            continue;
        }
        if !status.is_success() {
            warn!("video metadata lookup returned HTTP {status}");
            return None;
        }

        let body = match response.json::<VideoListResponse>().await {
            Ok(body) => body,
            Err(error) => {
                warn!("could not parse video metadata: {error}");
                return None;
            }
        };

        let Some(item) = body.items.into_iter().next() else {
            debug!("metadata API knows no video {video_id}");
            return None;
        };

        return Some(VideoMetadata {
            title: item
                .snippet
                .and_then(|snippet| snippet.title)
                .unwrap_or_default(),
            duration_seconds: item
                .content_details
                .and_then(|details| details.duration)
                .and_then(|duration| parse_iso8601_duration(&duration)),
        });
    }

    None
}
