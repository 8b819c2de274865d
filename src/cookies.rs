//! Cookie acquisition for the extraction tool.
//!
//! Sources are tried in a fixed order (installed browser stores, the
//! `YTDLP_COOKIES_JSON` blob, a blob sent with the request, the static cookie
//! file) and the first one that yields cookies wins. A failing source is
//! logged and skipped.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;

const NETSCAPE_HEADER: &str = "# Netscape HTTP Cookie File\n";

#[derive(Debug, Error)]
pub enum CookieError {
    #[error("invalid cookie JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("cookie file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("browser lookup task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("cookie {0:?} contains control characters")]
    ControlCharacters(String),
}

/// A cookie as exported by the common browser extensions
/// (`EditThisCookie`, `Cookie-Editor`, ...).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "root_path")]
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub expiration_date: Option<f64>,
}

impl ExportedCookie {
    /// Tabs and line breaks would split or add lines in a Netscape jar.
    fn has_control_characters(&self) -> bool {
        [&self.name, &self.value, &self.domain, &self.path]
            .iter()
            .any(|field| field.chars().any(char::is_control))
    }
}

fn root_path() -> String {
    "/".to_string()
}

/// Where the cookies for one extraction run come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CookieSource {
    Browser(String),
    Environment(PathBuf),
    Request(PathBuf),
    File(PathBuf),
}

impl CookieSource {
    pub fn yt_dlp_args(&self) -> Vec<String> {
        match self {
            Self::Browser(browser) => vec!["--cookies-from-browser".to_string(), browser.clone()],
            Self::Environment(path) | Self::Request(path) | Self::File(path) => vec![
                "--cookies".to_string(),
                path.to_string_lossy().into_owned(),
            ],
        }
    }

    pub fn label(&self) -> String {
        match self {
            Self::Browser(browser) => format!("browser:{browser}"),
            Self::Environment(_) => "env".to_string(),
            Self::Request(_) => "request".to_string(),
            Self::File(path) => format!("file:{}", path.display()),
        }
    }

    /// Jars written for this request only, which must be removed afterwards.
    fn scratch_path(&self) -> Option<&Path> {
        match self {
            Self::Environment(path) | Self::Request(path) => Some(path),
            Self::Browser(_) | Self::File(_) => None,
        }
    }

    pub async fn release(self) {
        let Some(path) = self.scratch_path() else {
            return;
        };
        if let Err(error) = tokio::fs::remove_file(path).await
            && error.kind() != ErrorKind::NotFound
        {
            warn!("could not remove cookie jar {:?}: {error}", path);
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Strategy {
    Browsers,
    Environment,
    RequestBody,
    StaticFile,
}

const CASCADE: [Strategy; 4] = [
    Strategy::Browsers,
    Strategy::Environment,
    Strategy::RequestBody,
    Strategy::StaticFile,
];

/// Runs the cascade and returns the first source that has cookies, or `None`
/// when every source is empty or failed.
pub async fn acquire(
    config: &AppConfig,
    request_blob: Option<&serde_json::Value>,
) -> Option<CookieSource> {
    for strategy in CASCADE {
        let attempt = match strategy {
            Strategy::Browsers => from_browsers(&config.cookie_browsers, BrowserRoots::detect()).await,
            Strategy::Environment => match config.cookies_env_json.as_deref() {
                Some(raw) => from_blob(raw_blob(raw), &config.cookie_scratch_dir, "env")
                    .await
                    .map(|path| path.map(CookieSource::Environment)),
                None => Ok(None),
            },
            Strategy::RequestBody => match request_blob {
                Some(blob) => from_blob(value_blob(blob), &config.cookie_scratch_dir, "request")
                    .await
                    .map(|path| path.map(CookieSource::Request)),
                None => Ok(None),
            },
            Strategy::StaticFile => from_static_file(&config.cookie_file).await,
        };

        match attempt {
            Ok(Some(source)) => {
                info!("using cookies from {}", source.label());
                return Some(source);
            }
            Ok(None) => debug!("cookie source {:?} had nothing to offer", strategy),
            Err(error) => warn!("cookie source {:?} failed: {error}", strategy),
        }
    }

    debug!("no cookie source available, extracting anonymously");
    None
}

async fn from_browsers(
    browsers: &[String],
    roots: BrowserRoots,
) -> Result<Option<CookieSource>, CookieError> {
    if browsers.is_empty() {
        return Ok(None);
    }

    let browsers = browsers.to_vec();
    let found = tokio::task::spawn_blocking(move || {
        browsers
            .into_iter()
            .find(|browser| find_browser_cookie_store(browser, &roots).is_some())
    })
    .await?;

    Ok(found.map(CookieSource::Browser))
}

async fn from_blob(
    parsed: Result<Vec<ExportedCookie>, serde_json::Error>,
    scratch_dir: &Path,
    prefix: &str,
) -> Result<Option<PathBuf>, CookieError> {
    let cookies = parsed?;
    if cookies.is_empty() {
        return Ok(None);
    }
    if let Some(cookie) = cookies.iter().find(|cookie| cookie.has_control_characters()) {
        return Err(CookieError::ControlCharacters(cookie.name.clone()));
    }

    tokio::fs::create_dir_all(scratch_dir).await?;
    let path = scratch_dir.join(format!("{prefix}-{}.txt", Uuid::new_v4()));
    tokio::fs::write(&path, render_netscape(&cookies)).await?;
    debug!("wrote {} cookie(s) to {:?}", cookies.len(), path);
    Ok(Some(path))
}

async fn from_static_file(path: &Path) -> Result<Option<CookieSource>, CookieError> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) if metadata.is_file() && metadata.len() > 0 => {
            Ok(Some(CookieSource::File(path.to_path_buf())))
        }
        Ok(_) => Ok(None),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
        Err(error) => Err(error.into()),
    }
}

/// Accepts either a JSON array of cookies or a JSON string that itself
/// contains such an array (how some hosting dashboards store env values).
pub fn raw_blob(raw: &str) -> Result<Vec<ExportedCookie>, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(raw.trim())?;
    value_blob(&value)
}

pub fn value_blob(value: &serde_json::Value) -> Result<Vec<ExportedCookie>, serde_json::Error> {
    match value {
        serde_json::Value::String(inner) => serde_json::from_str(inner.trim()),
        other => serde_json::from_value(other.clone()),
    }
}

pub fn render_netscape(cookies: &[ExportedCookie]) -> String {
    let mut content = String::from(NETSCAPE_HEADER);
    for cookie in cookies {
        let include_subdomains = if cookie.domain.starts_with('.') {
            "TRUE"
        } else {
            "FALSE"
        };
        let prefix = if cookie.http_only { "#HttpOnly_" } else { "" };
        let secure = if cookie.secure { "TRUE" } else { "FALSE" };
        let expires = cookie
            .expiration_date
            .filter(|value| value.is_finite() && *value > 0.0)
            .map(|value| value as i64)
            .unwrap_or(0);

        content.push_str(&format!(
            "{prefix}{}\t{include_subdomains}\t{}\t{secure}\t{expires}\t{}\t{}\n",
            cookie.domain, cookie.path, cookie.name, cookie.value
        ));
    }
    content
}

/// Counts cookie lines in a Netscape file; `#HttpOnly_` lines are cookies,
/// other `#` lines are comments.
pub fn count_netscape_cookies(raw: &str) -> usize {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| line.starts_with("#HttpOnly_") || !line.starts_with('#'))
        .filter(|line| line.split('\t').count() >= 7)
        .count()
}

/// Base directories under which browsers keep their profiles.
#[derive(Debug, Clone, Default)]
pub struct BrowserRoots {
    pub config_dir: Option<PathBuf>,
    pub home_dir: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub data_local_dir: Option<PathBuf>,
}

impl BrowserRoots {
    pub fn detect() -> Self {
        Self {
            config_dir: dirs::config_dir(),
            home_dir: dirs::home_dir(),
            data_dir: dirs::data_dir(),
            data_local_dir: dirs::data_local_dir(),
        }
    }

    fn chromium_profiles(&self, browser: &str) -> Vec<PathBuf> {
        let (config_relative, local_relative) = match browser {
            "chrome" => (vec!["google-chrome"], vec!["Google", "Chrome", "User Data"]),
            "chromium" => (vec!["chromium"], vec!["Chromium", "User Data"]),
            "brave" => (
                vec!["BraveSoftware", "Brave-Browser"],
                vec!["BraveSoftware", "Brave-Browser", "User Data"],
            ),
            "edge" => (vec!["microsoft-edge"], vec!["Microsoft", "Edge", "User Data"]),
            "vivaldi" => (vec!["vivaldi"], vec!["Vivaldi", "User Data"]),
            _ => return Vec::new(),
        };

        let mut roots = Vec::new();
        if let Some(config) = &self.config_dir {
            roots.push(join_all(config, &config_relative));
            // macOS keeps Chrome under "Application Support/Google/Chrome".
            if browser == "chrome" {
                roots.push(join_all(config, &["Google", "Chrome"]));
            }
        }
        if let Some(local) = &self.data_local_dir {
            roots.push(join_all(local, &local_relative));
        }
        roots
            .into_iter()
            .map(|root| root.join("Default"))
            .collect()
    }

    fn firefox_profile_parents(&self) -> Vec<PathBuf> {
        let mut parents = Vec::new();
        if let Some(home) = &self.home_dir {
            parents.push(join_all(home, &[".mozilla", "firefox"]));
            parents.push(join_all(
                home,
                &["snap", "firefox", "common", ".mozilla", "firefox"],
            ));
        }
        if let Some(config) = &self.config_dir {
            parents.push(join_all(config, &["Firefox", "Profiles"]));
        }
        if let Some(data) = &self.data_dir {
            parents.push(join_all(data, &["Mozilla", "Firefox", "Profiles"]));
        }
        parents
    }
}

fn join_all(base: &Path, parts: &[&str]) -> PathBuf {
    parts.iter().fold(base.to_path_buf(), |path, part| path.join(part))
}

fn non_empty_file(path: &Path) -> bool {
    std::fs::metadata(path).is_ok_and(|metadata| metadata.is_file() && metadata.len() > 0)
}

/// Returns the cookie database of `browser` if one exists and is non-empty.
pub fn find_browser_cookie_store(browser: &str, roots: &BrowserRoots) -> Option<PathBuf> {
    if browser == "firefox" {
        return roots
            .firefox_profile_parents()
            .into_iter()
            .filter_map(|parent| std::fs::read_dir(parent).ok())
            .flat_map(|entries| entries.filter_map(Result::ok))
            .map(|entry| entry.path().join("cookies.sqlite"))
            .find(|candidate| non_empty_file(candidate));
    }

    roots
        .chromium_profiles(browser)
        .into_iter()
        .flat_map(|profile| [profile.join("Network").join("Cookies"), profile.join("Cookies")])
        .find(|candidate| non_empty_file(candidate))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserReport {
    pub browser: String,
    pub store: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobReport {
    pub present: bool,
    pub cookies: usize,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileReport {
    pub path: String,
    pub exists: bool,
    pub size_bytes: u64,
    pub cookies: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieReport {
    pub browsers: Vec<BrowserReport>,
    pub environment: BlobReport,
    pub file: FileReport,
}

/// Inspects every source without writing any jar.
pub async fn report(config: &AppConfig) -> CookieReport {
    let browser_names = config.cookie_browsers.clone();
    let roots = BrowserRoots::detect();
    let browsers = tokio::task::spawn_blocking(move || {
        browser_names
            .into_iter()
            .map(|browser| {
                let store = find_browser_cookie_store(&browser, &roots)
                    .map(|path| path.display().to_string());
                BrowserReport { browser, store }
            })
            .collect::<Vec<_>>()
    })
    .await
    .unwrap_or_else(|error| {
        warn!("browser cookie lookup failed: {error}");
        Vec::new()
    });

    let environment = match config.cookies_env_json.as_deref() {
        None => BlobReport {
            present: false,
            cookies: 0,
            error: None,
        },
        Some(raw) => match raw_blob(raw) {
            Ok(cookies) => BlobReport {
                present: true,
                cookies: cookies.len(),
                error: None,
            },
            Err(error) => BlobReport {
                present: true,
                cookies: 0,
                error: Some(error.to_string()),
            },
        },
    };

    let file = match tokio::fs::read_to_string(&config.cookie_file).await {
        Ok(contents) => FileReport {
            path: config.cookie_file.display().to_string(),
            exists: true,
            size_bytes: contents.len() as u64,
            cookies: count_netscape_cookies(&contents),
        },
        Err(error) => {
            if error.kind() != ErrorKind::NotFound {
                warn!("could not read cookie file {:?}: {error}", config.cookie_file);
            }
            FileReport {
                path: config.cookie_file.display().to_string(),
                exists: error.kind() != ErrorKind::NotFound,
                size_bytes: 0,
                cookies: 0,
            }
        }
    };

    CookieReport {
        browsers,
        environment,
        file,
    }
}
