use std::{io::ErrorKind, path::PathBuf, sync::Arc, time::Duration};

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State, rejection::JsonRejection},
    http::{
        HeaderMap, HeaderValue,
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use url::Url;

use crate::{
    captcha, cleanup,
    config::{AppConfig, non_empty},
    cookies::{self, CookieReport, CookieSource},
    error::ApiError,
    extractor, metadata,
    files::{
        build_content_disposition, content_type_for_filename, normalize_target_format,
        validate_served_filename,
    },
    timecode::TimeRange,
    transcode,
};

const OUTBOUND_HTTP_TIMEOUT_SECONDS: u64 = 10;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub http_client: reqwest::Client,
}

impl AppState {
    pub fn new(config: AppConfig) -> Result<Self, ApiError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(OUTBOUND_HTTP_TIMEOUT_SECONDS))
            .build()
            .map_err(|error| ApiError::internal(format!("could not build HTTP client: {error}")))?;

        Ok(Self {
            config: Arc::new(config),
            http_client,
        })
    }
}

pub fn router(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/check-auth", get(check_auth))
        .route("/check-cookies", get(check_cookies))
        .route("/download", post(download))
        .route("/downloads/{filename}", get(serve_download))
        .route("/transcript", post(transcript))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Every field is optional so that a missing value is reported as a
/// validation error rather than a deserialization rejection.
#[derive(Debug, Default, Deserialize)]
struct DownloadRequest {
    #[serde(alias = "videoUrl")]
    url: Option<String>,
    format: Option<String>,
    #[serde(alias = "startTime")]
    start: Option<String>,
    #[serde(alias = "endTime")]
    end: Option<String>,
    cookies: Option<serde_json::Value>,
    #[serde(rename = "captchaToken")]
    captcha_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DownloadResponse {
    success: bool,
    download_url: String,
    filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TranscriptRequest {
    #[serde(alias = "videoUrl")]
    url: Option<String>,
}

#[derive(Debug, Serialize)]
struct TranscriptResponse {
    success: bool,
    transcript_url: String,
    language: String,
    ext: String,
    automatic: bool,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    time: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct AuthStatus {
    authenticated: bool,
    source: Option<String>,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        time: Utc::now(),
    })
}

async fn download(
    State(state): State<AppState>,
    payload: Result<Json<DownloadRequest>, JsonRejection>,
) -> Result<Json<DownloadResponse>, ApiError> {
    let Json(payload) = payload.map_err(|rejection| ApiError::validation(rejection.body_text()))?;
    let config = state.config.as_ref();

    let url = require_url(payload.url.as_deref())?;
    let format = payload
        .format
        .as_deref()
        .and_then(non_empty)
        .ok_or_else(|| ApiError::validation("format is required"))?;
    let target_format = normalize_target_format(format)?;
    let range = TimeRange::parse(payload.start.as_deref(), payload.end.as_deref())?;

    if let Some(secret) = config.captcha_secret.as_deref() {
        captcha::verify_token(
            &state.http_client,
            &config.captcha_verify_url,
            secret,
            payload.captcha_token.as_deref(),
        )
        .await?;
    }

    let title = lookup_title(&state, &url, &range).await?;

    if range.is_empty() {
        info!("download requested url={url} format={target_format}");
    } else {
        info!("download requested url={url} format={target_format} range={range:?}");
    }

    let cookies = cookies::acquire(config, payload.cookies.as_ref()).await;
    let produced = produce_clip(config, &url, &target_format, &range, cookies.as_ref()).await;
    if let Some(source) = cookies {
        source.release().await;
    }
    let output = produced?;

    let filename = output
        .file_name()
        .and_then(|name| name.to_str())
        .map(ToString::to_string)
        .ok_or_else(|| ApiError::internal("converted file has no usable name"))?;

    if !tokio::fs::try_exists(&output).await.unwrap_or(false) {
        return Err(ApiError::Transcode(format!(
            "converted file {filename} is missing"
        )));
    }

    let removed = cleanup::sweep_downloads(&config.downloads_dir, config.max_files).await;
    if removed > 0 {
        info!("cleanup removed {removed} old file(s)");
    }

    Ok(Json(DownloadResponse {
        success: true,
        download_url: format!("/downloads/{}", urlencoding::encode(&filename)),
        filename,
        title,
    }))
}

/// Downloads with tier fallback, then converts. The returned path is the
/// converted file.
async fn produce_clip(
    config: &AppConfig,
    url: &str,
    target_format: &str,
    range: &TimeRange,
    cookies: Option<&CookieSource>,
) -> Result<PathBuf, ApiError> {
    let plans = extractor::plan_attempts(config, target_format);
    let media = extractor::download_with_fallback(&plans, |plan| async move {
        extractor::download_media(config, url, &plan, cookies).await
    })
    .await?;

    transcode::transcode(config, &media, target_format, range).await
}

/// Looks up the title when the metadata API is configured, and rejects ranges
/// past the end of the video once its duration is known.
async fn lookup_title(
    state: &AppState,
    url: &str,
    range: &TimeRange,
) -> Result<Option<String>, ApiError> {
    let config = state.config.as_ref();
    if config.youtube_api_keys.is_empty() {
        return Ok(None);
    }
    let Some(video_id) = metadata::youtube_video_id(url) else {
        return Ok(None);
    };
    let Some(found) = metadata::lookup(
        &state.http_client,
        &config.youtube_api_url,
        &config.youtube_api_keys,
        &video_id,
    )
    .await
    else {
        return Ok(None);
    };

    if let Some(duration) = found.duration_seconds {
        range.ensure_within(duration)?;
    }
    Ok(non_empty(&found.title).map(ToString::to_string))
}

async fn transcript(
    State(state): State<AppState>,
    payload: Result<Json<TranscriptRequest>, JsonRejection>,
) -> Result<Json<TranscriptResponse>, ApiError> {
    let Json(payload) = payload.map_err(|rejection| ApiError::validation(rejection.body_text()))?;
    let url = require_url(payload.url.as_deref())?;
    let config = state.config.as_ref();

    let cookies = cookies::acquire(config, None).await;
    let track = extractor::fetch_english_subtitles(config, &url, cookies.as_ref()).await;
    if let Some(source) = cookies {
        source.release().await;
    }
    let track = track?;

    info!(
        "subtitle track found url={url} language={} automatic={}",
        track.language, track.automatic
    );

    Ok(Json(TranscriptResponse {
        success: true,
        transcript_url: track.url,
        language: track.language,
        ext: track.ext,
        automatic: track.automatic,
    }))
}

async fn serve_download(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    let filename = validate_served_filename(&filename)?;
    let path = state.config.downloads_dir.join(filename);

    let not_found = || ApiError::NotFound(format!("{filename} does not exist"));
    let metadata = match tokio::fs::metadata(&path).await {
        Ok(metadata) if metadata.is_file() => metadata,
        Ok(_) => return Err(not_found()),
        Err(error) if error.kind() == ErrorKind::NotFound => return Err(not_found()),
        Err(error) => {
            return Err(ApiError::internal(format!(
                "could not read {filename}: {error}"
            )));
        }
    };

    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|error| ApiError::internal(format!("could not open {filename}: {error}")))?;
    let body = Body::from_stream(ReaderStream::new(file));

    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static(content_type_for_filename(filename)),
    );
    headers.insert(CONTENT_LENGTH, HeaderValue::from(metadata.len()));
    headers.insert(
        CONTENT_DISPOSITION,
        HeaderValue::from_str(&build_content_disposition(filename))
            .map_err(|_| ApiError::internal("could not build the Content-Disposition header"))?,
    );

    Ok((headers, body).into_response())
}

async fn check_auth(State(state): State<AppState>) -> Json<AuthStatus> {
    let source = cookies::acquire(&state.config, None).await;
    let label = source.as_ref().map(CookieSource::label);
    if let Some(source) = source {
        source.release().await;
    }
    if label.is_none() {
        warn!("no cookie source available; extraction will run anonymously");
    }

    Json(AuthStatus {
        authenticated: label.is_some(),
        source: label,
    })
}

async fn check_cookies(State(state): State<AppState>) -> Json<CookieReport> {
    Json(cookies::report(&state.config).await)
}

fn require_url(value: Option<&str>) -> Result<String, ApiError> {
    let url = value
        .and_then(non_empty)
        .ok_or_else(|| ApiError::validation("url is required"))?;
    let parsed =
        Url::parse(url).map_err(|_| ApiError::validation("url must be an absolute http(s) URL"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ApiError::validation("url must be an absolute http(s) URL"));
    }
    Ok(url.to_string())
}
