//! Everything that talks to yt-dlp: media downloads with quality fallback and
//! subtitle lookups.

use std::{
    collections::HashMap,
    future::Future,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    config::AppConfig,
    cookies::CookieSource,
    error::ApiError,
    files::is_audio_format,
    process::{self, ProcessError},
};

const AUDIO_SELECTOR: &str = "bestaudio/best";
const SUBTITLE_EXT_PREFERENCE: [&str; 3] = ["vtt", "srv3", "json3"];

/// Substrings of yt-dlp errors that mean "a signed-in session is needed".
const AUTH_MARKERS: [&str; 9] = [
    "sign in to confirm",
    "sign in to view",
    "login required",
    "log in to",
    "requires authentication",
    "use --cookies",
    "--cookies-from-browser",
    "members-only",
    "private video",
];

/// One step of the fallback chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptPlan {
    pub index: usize,
    pub format_selector: String,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedMedia {
    pub path: PathBuf,
    pub id: String,
    pub ext: String,
}

/// Builds the ordered attempts for a target format: descending quality tiers
/// for video, the best audio stream for audio targets. Never more than
/// `max_attempts` entries.
pub fn plan_attempts(config: &AppConfig, target_format: &str) -> Vec<AttemptPlan> {
    let selectors: Vec<String> = if is_audio_format(target_format) {
        vec![AUDIO_SELECTOR.to_string(); config.max_attempts]
    } else {
        config.quality_tiers.clone()
    };

    selectors
        .into_iter()
        .take(config.max_attempts)
        .enumerate()
        .map(|(index, format_selector)| AttemptPlan {
            index,
            format_selector,
            user_agent: config.user_agent_for(index).map(ToString::to_string),
        })
        .collect()
}

/// Tries each plan in order until one succeeds. Errors that another tier
/// cannot fix (validation, auth, missing binaries) stop the loop at once; on
/// exhaustion the last failure is returned.
pub async fn download_with_fallback<T, F, Fut>(
    plans: &[AttemptPlan],
    mut attempt: F,
) -> Result<T, ApiError>
where
    F: FnMut(AttemptPlan) -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut last_error = None;

    for plan in plans {
        info!(
            "extraction attempt {}/{} with format {:?}",
            plan.index + 1,
            plans.len(),
            plan.format_selector
        );

        match attempt(plan.clone()).await {
            Ok(value) => return Ok(value),
            Err(error) if !error.is_retryable() => return Err(error),
            Err(error) => {
                warn!(
                    "extraction attempt {}/{} failed: {error}",
                    plan.index + 1,
                    plans.len()
                );
                last_error = Some(error);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| ApiError::internal("no extraction attempts configured")))
}

pub fn download_args(
    downloads_dir: &Path,
    url: &str,
    plan: &AttemptPlan,
    cookies: Option<&CookieSource>,
) -> Vec<String> {
    let output_template = format!("{}/%(id)s.%(ext)s", downloads_dir.to_string_lossy());

    let mut args = vec![
        "--no-playlist".to_string(),
        "--no-warnings".to_string(),
        "--print".to_string(),
        "after_move:filepath".to_string(),
        "-o".to_string(),
        output_template,
        "-f".to_string(),
        plan.format_selector.clone(),
    ];

    if let Some(user_agent) = &plan.user_agent {
        args.push("--user-agent".to_string());
        args.push(user_agent.clone());
    }
    if let Some(cookies) = cookies {
        args.extend(cookies.yt_dlp_args());
    }

    args.push("--".to_string());
    args.push(url.to_string());
    args
}

/// A single extraction run for one plan.
pub async fn download_media(
    config: &AppConfig,
    url: &str,
    plan: &AttemptPlan,
    cookies: Option<&CookieSource>,
) -> Result<DownloadedMedia, ApiError> {
    let args = download_args(&config.downloads_dir, url, plan, cookies);
    let output = run_yt_dlp(config, &args).await?;

    let printed_path = process::last_nonempty_line(&output.stdout);
    let path = resolve_downloaded_file(&config.downloads_dir, printed_path.as_deref()).await?;

    let id = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .map(ToString::to_string)
        .ok_or_else(|| ApiError::Extraction("downloaded file has no usable name".to_string()))?;
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();

    info!("downloaded {:?}", path);
    Ok(DownloadedMedia { path, id, ext })
}

async fn run_yt_dlp(config: &AppConfig, args: &[String]) -> Result<std::process::Output, ApiError> {
    let output = process::run(&config.yt_dlp_bin, args, config.yt_dlp_timeout)
        .await
        .map_err(|error| match error {
            ProcessError::TimedOut { .. } => ApiError::Extraction(error.to_string()),
            ProcessError::NotFound(_) | ProcessError::Io { .. } => {
                ApiError::internal(error.to_string())
            }
        })?;

    if !output.status.success() {
        return Err(classify_failure(&output.stderr));
    }

    Ok(output)
}

/// Maps yt-dlp's stderr to an error kind. Sign-in walls become
/// `AuthRequired`, everything else an extraction failure.
pub fn classify_failure(stderr: &[u8]) -> ApiError {
    let message = process::last_nonempty_line(stderr)
        .map(|line| line.trim_start_matches("ERROR:").trim().to_string())
        .unwrap_or_else(|| "yt-dlp could not complete the operation".to_string());
    let lower = String::from_utf8_lossy(stderr).to_ascii_lowercase();

    if AUTH_MARKERS.iter().any(|marker| lower.contains(marker)) {
        ApiError::AuthRequired(message)
    } else if lower.contains("unsupported url") {
        ApiError::Extraction("unsupported or invalid URL".to_string())
    } else {
        ApiError::Extraction(message)
    }
}

async fn resolve_downloaded_file(
    downloads_dir: &Path,
    printed_path: Option<&str>,
) -> Result<PathBuf, ApiError> {
    let printed_path = printed_path.ok_or_else(|| {
        ApiError::Extraction("yt-dlp finished without reporting a file".to_string())
    })?;

    let canonical_dir = tokio::fs::canonicalize(downloads_dir)
        .await
        .map_err(|error| ApiError::internal(format!("could not resolve downloads dir: {error}")))?;

    let absolute = PathBuf::from(printed_path);
    let relative = downloads_dir.join(printed_path);
    for candidate in [absolute, relative] {
        if let Some(path) = resolve_download_candidate(&canonical_dir, &candidate).await? {
            return Ok(path);
        }
    }

    Err(ApiError::Extraction(format!(
        "yt-dlp reported {printed_path:?} but no such file exists"
    )))
}

async fn resolve_download_candidate(
    canonical_dir: &Path,
    candidate_path: &Path,
) -> Result<Option<PathBuf>, ApiError> {
    let metadata = match tokio::fs::metadata(candidate_path).await {
        Ok(metadata) => metadata,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
        Err(error) => {
            return Err(ApiError::internal(format!(
                "could not read downloaded file: {error}"
            )));
        }
    };

    if !metadata.is_file() {
        return Ok(None);
    }

    let canonical_candidate = tokio::fs::canonicalize(candidate_path)
        .await
        .map_err(|error| ApiError::internal(format!("could not resolve downloaded file: {error}")))?;

    if !canonical_candidate.starts_with(canonical_dir) {
        warn!(
            "ignoring file outside the downloads directory: {:?}",
            canonical_candidate
        );
        return Ok(None);
    }

    Ok(Some(canonical_candidate))
}

#[derive(Debug, Clone, Deserialize)]
struct SubtitleFormat {
    ext: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideoInfo {
    #[serde(default)]
    subtitles: HashMap<String, Vec<SubtitleFormat>>,
    #[serde(default)]
    automatic_captions: HashMap<String, Vec<SubtitleFormat>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubtitleTrack {
    pub url: String,
    pub language: String,
    pub ext: String,
    pub automatic: bool,
}

/// Looks up an English subtitle track without downloading any media.
pub async fn fetch_english_subtitles(
    config: &AppConfig,
    url: &str,
    cookies: Option<&CookieSource>,
) -> Result<SubtitleTrack, ApiError> {
    let mut args = vec![
        "-J".to_string(),
        "--skip-download".to_string(),
        "--no-playlist".to_string(),
        "--no-warnings".to_string(),
    ];
    if let Some(user_agent) = config.user_agent_for(0) {
        args.push("--user-agent".to_string());
        args.push(user_agent.to_string());
    }
    if let Some(cookies) = cookies {
        args.extend(cookies.yt_dlp_args());
    }
    args.push("--".to_string());
    args.push(url.to_string());

    let output = run_yt_dlp(config, &args).await?;
    let info: VideoInfo = serde_json::from_slice(&output.stdout).map_err(|error| {
        ApiError::Extraction(format!("could not parse yt-dlp metadata: {error}"))
    })?;

    pick_english_track(&info).ok_or_else(|| {
        ApiError::TranscriptMissing("no English subtitles are available for this video".to_string())
    })
}

/// Manual subtitles beat automatic captions, `en` beats `en-*`, and within a
/// language `vtt` beats the other text formats.
fn pick_english_track(info: &VideoInfo) -> Option<SubtitleTrack> {
    let sources = [(&info.subtitles, false), (&info.automatic_captions, true)];

    for (tracks, automatic) in sources {
        let mut languages = tracks
            .keys()
            .filter(|language| *language == "en" || language.starts_with("en-"))
            .collect::<Vec<_>>();
        languages.sort_by_key(|language| (language.as_str() != "en", language.to_string()));

        for language in languages {
            let formats = tracks[language.as_str()]
                .iter()
                .filter(|format| format.url.is_some())
                .collect::<Vec<_>>();

            let chosen = SUBTITLE_EXT_PREFERENCE
                .iter()
                .find_map(|preferred| {
                    formats
                        .iter()
                        .find(|format| format.ext.as_deref() == Some(*preferred))
                })
                .or_else(|| formats.first());

            if let Some(format) = chosen {
                return Some(SubtitleTrack {
                    url: format.url.clone().unwrap_or_default(),
                    language: language.clone(),
                    ext: format.ext.clone().unwrap_or_default(),
                    automatic,
                });
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    fn config_with_attempts(max_attempts: usize) -> AppConfig {
        AppConfig {
            max_attempts,
            user_agents: vec!["ua-1".to_string(), "ua-2".to_string()],
            ..AppConfig::default()
        }
    }

    #[test]
    fn video_plans_step_down_through_tiers() {
        let plans = plan_attempts(&config_with_attempts(3), "mp4");
        assert_eq!(plans.len(), 3);
        assert!(plans[0].format_selector.contains("720"));
        assert!(plans[1].format_selector.contains("480"));
        assert_eq!(plans[2].format_selector, "best");
        assert_eq!(plans[0].user_agent.as_deref(), Some("ua-1"));
        assert_eq!(plans[1].user_agent.as_deref(), Some("ua-2"));
        assert_eq!(plans[2].user_agent.as_deref(), Some("ua-1"));
    }

    #[test]
    fn plans_are_bounded_by_max_attempts() {
        assert_eq!(plan_attempts(&config_with_attempts(2), "mp4").len(), 2);
        assert_eq!(plan_attempts(&config_with_attempts(10), "mp4").len(), 3);

        let audio = plan_attempts(&config_with_attempts(2), "mp3");
        assert_eq!(audio.len(), 2);
        assert!(audio.iter().all(|plan| plan.format_selector == AUDIO_SELECTOR));
    }

    #[tokio::test]
    async fn fallback_stops_at_first_success() {
        let plans = plan_attempts(&config_with_attempts(3), "mp4");
        let calls = Arc::new(AtomicUsize::new(0));

        let result = download_with_fallback(&plans, |plan| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if plan.index == 0 {
                    Err(ApiError::Extraction("format not available".to_string()))
                } else {
                    Ok(plan.format_selector)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(result.contains("480"));
    }

    #[tokio::test]
    async fn fallback_gives_up_after_every_tier_and_returns_last_error() {
        let plans = plan_attempts(&config_with_attempts(3), "mp4");
        let calls = Arc::new(AtomicUsize::new(0));

        let error = download_with_fallback::<(), _, _>(&plans, |plan| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ApiError::Extraction(format!("tier {} failed", plan.index)))
            }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(error.to_string(), "tier 2 failed");
    }

    #[tokio::test]
    async fn fallback_does_not_retry_validation_or_auth_errors() {
        let plans = plan_attempts(&config_with_attempts(3), "mp4");

        for failure in [
            ApiError::validation("bad input"),
            ApiError::AuthRequired("Sign in to confirm".to_string()),
        ] {
            let calls = Arc::new(AtomicUsize::new(0));
            let code = failure.code();
            let failure = Arc::new(std::sync::Mutex::new(Some(failure)));

            let error = download_with_fallback::<(), _, _>(&plans, |_| {
                let calls = Arc::clone(&calls);
                let failure = Arc::clone(&failure);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(failure
                        .lock()
                        .unwrap()
                        .take()
                        .unwrap_or_else(|| ApiError::internal("called twice")))
                }
            })
            .await
            .unwrap_err();

            assert_eq!(calls.load(Ordering::SeqCst), 1);
            assert_eq!(error.code(), code);
        }
    }

    #[test]
    fn download_args_carry_tier_agent_and_cookies() {
        let plan = AttemptPlan {
            index: 0,
            format_selector: "best".to_string(),
            user_agent: Some("agent".to_string()),
        };
        let cookies = CookieSource::Browser("firefox".to_string());
        let args = download_args(
            Path::new("/srv/downloads"),
            "https://www.youtube.com/watch?v=abc",
            &plan,
            Some(&cookies),
        );

        let joined = args.join(" ");
        assert!(joined.contains("-o /srv/downloads/%(id)s.%(ext)s"));
        assert!(joined.contains("-f best"));
        assert!(joined.contains("--user-agent agent"));
        assert!(joined.contains("--cookies-from-browser firefox"));
        assert_eq!(
            &args[args.len() - 2..],
            ["--", "https://www.youtube.com/watch?v=abc"]
        );
    }

    #[test]
    fn sign_in_walls_are_auth_errors() {
        let stderr = b"ERROR: [youtube] abc: Sign in to confirm you're not a bot. Use --cookies-from-browser or --cookies for the authentication.\n";
        let error = classify_failure(stderr);
        assert_eq!(error.code(), "AUTH_REQUIRED");
        assert!(error.to_string().starts_with("[youtube] abc: Sign in"));
    }

    #[test]
    fn other_failures_are_extraction_errors() {
        let error = classify_failure(b"ERROR: [generic] Unsupported URL: https://example.com\n");
        assert_eq!(error.code(), "EXTRACTION_FAILED");
        assert_eq!(error.to_string(), "unsupported or invalid URL");

        let error = classify_failure(b"ERROR: Requested format is not available\n");
        assert_eq!(error.to_string(), "Requested format is not available");

        let error = classify_failure(b"");
        assert_eq!(error.to_string(), "yt-dlp could not complete the operation");
    }

    fn info_from(json: serde_json::Value) -> VideoInfo {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn manual_english_subtitles_are_preferred() {
        let info = info_from(serde_json::json!({
            "subtitles": {
                "en-GB": [{"ext": "vtt", "url": "https://subs/en-gb.vtt"}],
                "en": [
                    {"ext": "json3", "url": "https://subs/en.json3"},
                    {"ext": "vtt", "url": "https://subs/en.vtt"}
                ],
                "de": [{"ext": "vtt", "url": "https://subs/de.vtt"}]
            },
            "automatic_captions": {
                "en": [{"ext": "vtt", "url": "https://auto/en.vtt"}]
            }
        }));

        let track = pick_english_track(&info).unwrap();
        assert_eq!(
            track,
            SubtitleTrack {
                url: "https://subs/en.vtt".to_string(),
                language: "en".to_string(),
                ext: "vtt".to_string(),
                automatic: false,
            }
        );
    }

    #[test]
    fn automatic_captions_are_the_fallback() {
        let info = info_from(serde_json::json!({
            "subtitles": {"fr": [{"ext": "vtt", "url": "https://subs/fr.vtt"}]},
            "automatic_captions": {
                "en-US": [{"ext": "ttml", "url": "https://auto/en-us.ttml"}]
            }
        }));

        let track = pick_english_track(&info).unwrap();
        assert!(track.automatic);
        assert_eq!(track.language, "en-US");
        assert_eq!(track.ext, "ttml");
    }

    #[test]
    fn no_english_track_yields_none() {
        let info = info_from(serde_json::json!({
            "subtitles": {"es": [{"ext": "vtt", "url": "https://subs/es.vtt"}]}
        }));
        assert!(pick_english_track(&info).is_none());
        assert!(pick_english_track(&info_from(serde_json::json!({}))).is_none());
    }

    #[tokio::test]
    async fn printed_path_outside_downloads_is_rejected() {
        let downloads = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        let outside = elsewhere.path().join("abc.mp4");
        std::fs::write(&outside, "x").unwrap();

        let error = resolve_downloaded_file(downloads.path(), outside.to_str())
            .await
            .unwrap_err();
        assert_eq!(error.code(), "EXTRACTION_FAILED");

        let inside = downloads.path().join("abc.mp4");
        std::fs::write(&inside, "x").unwrap();
        let resolved = resolve_downloaded_file(downloads.path(), Some("abc.mp4"))
            .await
            .unwrap();
        assert_eq!(resolved, std::fs::canonicalize(inside).unwrap());
    }
}
