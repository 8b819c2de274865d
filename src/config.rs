use std::{path::PathBuf, time::Duration};

const DEFAULT_MAX_DOWNLOAD_FILES: usize = 10;
const DEFAULT_MAX_DOWNLOAD_ATTEMPTS: usize = 3;
const DEFAULT_YT_DLP_TIMEOUT_SECONDS: u64 = 180;
const DEFAULT_FFMPEG_TIMEOUT_SECONDS: u64 = 300;
const DEFAULT_CAPTCHA_VERIFY_URL: &str =
    "https://challenges.cloudflare.com/turnstile/v0/siteverify";
const DEFAULT_YOUTUBE_API_URL: &str = "https://www.googleapis.com/youtube/v3";

const DEFAULT_QUALITY_TIERS: [&str; 3] = [
    "bestvideo[height<=720]+bestaudio/best[height<=720]",
    "bestvideo[height<=480]+bestaudio/best[height<=480]",
    "best",
];

const DEFAULT_USER_AGENTS: [&str; 4] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
];

const DEFAULT_COOKIE_BROWSERS: [&str; 5] = ["chrome", "firefox", "chromium", "brave", "edge"];

const DEFAULT_ALLOWED_ORIGINS: [&str; 2] = ["http://localhost:3000", "http://127.0.0.1:3000"];

/// Runtime settings, read from the environment once at startup and shared
/// read-only by every handler.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub downloads_dir: PathBuf,
    pub cookie_file: PathBuf,
    /// Where per-request Netscape cookie jars are written.
    pub cookie_scratch_dir: PathBuf,
    pub cookies_env_json: Option<String>,
    pub cookie_browsers: Vec<String>,
    pub allowed_origins: Vec<String>,
    pub max_files: usize,
    pub max_attempts: usize,
    pub quality_tiers: Vec<String>,
    pub user_agents: Vec<String>,
    pub yt_dlp_bin: String,
    pub ffmpeg_bin: String,
    pub yt_dlp_timeout: Duration,
    pub ffmpeg_timeout: Duration,
    pub youtube_api_keys: Vec<String>,
    pub youtube_api_url: String,
    pub captcha_secret: Option<String>,
    pub captcha_verify_url: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:10000".to_string(),
            downloads_dir: PathBuf::from("downloads"),
            cookie_file: PathBuf::from("cookies.txt"),
            cookie_scratch_dir: std::env::temp_dir().join("clipfetch-cookies"),
            cookies_env_json: None,
            cookie_browsers: to_strings(&DEFAULT_COOKIE_BROWSERS),
            allowed_origins: to_strings(&DEFAULT_ALLOWED_ORIGINS),
            max_files: DEFAULT_MAX_DOWNLOAD_FILES,
            max_attempts: DEFAULT_MAX_DOWNLOAD_ATTEMPTS,
            quality_tiers: to_strings(&DEFAULT_QUALITY_TIERS),
            user_agents: to_strings(&DEFAULT_USER_AGENTS),
            yt_dlp_bin: "yt-dlp".to_string(),
            ffmpeg_bin: "ffmpeg".to_string(),
            yt_dlp_timeout: Duration::from_secs(DEFAULT_YT_DLP_TIMEOUT_SECONDS),
            ffmpeg_timeout: Duration::from_secs(DEFAULT_FFMPEG_TIMEOUT_SECONDS),
            youtube_api_keys: Vec::new(),
            youtube_api_url: DEFAULT_YOUTUBE_API_URL.to_string(),
            captcha_secret: None,
            captcha_verify_url: DEFAULT_CAPTCHA_VERIFY_URL.to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            bind_addr: resolve_bind_addr().unwrap_or(defaults.bind_addr),
            downloads_dir: read_string_env("DOWNLOADS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.downloads_dir),
            cookie_file: read_string_env("COOKIES_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.cookie_file),
            cookie_scratch_dir: read_string_env("COOKIE_SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cookie_scratch_dir),
            cookies_env_json: read_string_env("YTDLP_COOKIES_JSON"),
            cookie_browsers: read_list_env("COOKIE_BROWSERS", ',')
                .unwrap_or(defaults.cookie_browsers),
            allowed_origins: read_list_env("ALLOWED_ORIGINS", ',')
                .unwrap_or(defaults.allowed_origins),
            max_files: read_usize_env("MAX_DOWNLOAD_FILES")
                .filter(|value| *value > 0)
                .unwrap_or(defaults.max_files),
            max_attempts: read_usize_env("MAX_DOWNLOAD_ATTEMPTS")
                .filter(|value| *value > 0)
                .unwrap_or(defaults.max_attempts),
            quality_tiers: defaults.quality_tiers,
            user_agents: read_list_env("USER_AGENTS", '|').unwrap_or(defaults.user_agents),
            yt_dlp_bin: read_string_env("YT_DLP_BIN").unwrap_or(defaults.yt_dlp_bin),
            ffmpeg_bin: read_string_env("FFMPEG_BIN").unwrap_or(defaults.ffmpeg_bin),
            yt_dlp_timeout: read_u64_env("YT_DLP_TIMEOUT_SECONDS")
                .filter(|value| *value > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.yt_dlp_timeout),
            ffmpeg_timeout: read_u64_env("FFMPEG_TIMEOUT_SECONDS")
                .filter(|value| *value > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.ffmpeg_timeout),
            youtube_api_keys: read_list_env("YOUTUBE_API_KEYS", ',').unwrap_or_default(),
            youtube_api_url: read_string_env("YOUTUBE_API_URL").unwrap_or(defaults.youtube_api_url),
            captcha_secret: read_string_env("CAPTCHA_SECRET_KEY"),
            captcha_verify_url: read_string_env("CAPTCHA_VERIFY_URL")
                .unwrap_or(defaults.captcha_verify_url),
        }
    }

    /// The user agent for a given attempt, rotating through the pool.
    pub fn user_agent_for(&self, attempt: usize) -> Option<&str> {
        if self.user_agents.is_empty() {
            return None;
        }
        Some(self.user_agents[attempt % self.user_agents.len()].as_str())
    }
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(ToString::to_string).collect()
}

fn read_string_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .and_then(|value| non_empty(&value).map(ToString::to_string))
}

fn read_usize_env(name: &str) -> Option<usize> {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
}

fn read_u64_env(name: &str) -> Option<u64> {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
}

fn read_list_env(name: &str, separator: char) -> Option<Vec<String>> {
    let values = split_list(&std::env::var(name).ok()?, separator);
    if values.is_empty() { None } else { Some(values) }
}

fn split_list(value: &str, separator: char) -> Vec<String> {
    value
        .split(separator)
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn resolve_bind_addr() -> Option<String> {
    if let Some(configured) = read_string_env("APP_ADDR") {
        return Some(configured);
    }

    std::env::var("PORT")
        .ok()
        .and_then(|value| value.trim().parse::<u16>().ok())
        .map(|port| format!("0.0.0.0:{port}"))
}

pub fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agents_rotate_per_attempt() {
        let config = AppConfig {
            user_agents: vec!["a".to_string(), "b".to_string()],
            ..AppConfig::default()
        };

        assert_eq!(config.user_agent_for(0), Some("a"));
        assert_eq!(config.user_agent_for(1), Some("b"));
        assert_eq!(config.user_agent_for(2), Some("a"));
    }

    #[test]
    fn empty_user_agent_pool_yields_none() {
        let config = AppConfig {
            user_agents: Vec::new(),
            ..AppConfig::default()
        };
        assert_eq!(config.user_agent_for(0), None);
    }

    #[test]
    fn list_values_are_trimmed_and_blank_items_dropped() {
        assert_eq!(
            split_list(" chrome, ,firefox ,", ','),
            vec!["chrome".to_string(), "firefox".to_string()]
        );
        assert!(split_list(" , ", ',').is_empty());
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.max_files, 10);
        assert_eq!(config.quality_tiers.last().map(String::as_str), Some("best"));
        assert!(config.captcha_secret.is_none());
    }
}
