use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::info;

use crate::{
    config::AppConfig,
    error::ApiError,
    extractor::DownloadedMedia,
    files::is_audio_format,
    process::{self, ProcessError},
    timecode::{TimeRange, format_timestamp},
};

const FINGERPRINT_HEX_LEN: usize = 10;

/// Name of the converted file: the media id plus a short digest of the
/// requested format and range, so different clips of one video never collide
/// and the output never overwrites its own input.
pub fn output_filename(media_id: &str, target_format: &str, range: &TimeRange) -> String {
    let mut hasher = Sha256::new();
    hasher.update(media_id.as_bytes());
    hasher.update(b":");
    hasher.update(target_format.as_bytes());
    hasher.update(b":");
    hasher.update(range.start.map(|value| value.to_string()).unwrap_or_default());
    hasher.update(b":");
    hasher.update(range.end.map(|value| value.to_string()).unwrap_or_default());
    let digest = format!("{:x}", hasher.finalize());

    format!(
        "{media_id}-{}.{target_format}",
        &digest[..FINGERPRINT_HEX_LEN]
    )
}

fn audio_codec_args(target_format: &str) -> Vec<&'static str> {
    match target_format {
        "mp3" => vec!["-c:a", "libmp3lame", "-q:a", "2"],
        "m4a" | "aac" => vec!["-c:a", "aac", "-b:a", "192k"],
        "wav" => vec!["-c:a", "pcm_s16le"],
        "ogg" => vec!["-c:a", "libvorbis"],
        "opus" => vec!["-c:a", "libopus"],
        "flac" => vec!["-c:a", "flac"],
        _ => Vec::new(),
    }
}

pub fn ffmpeg_args(
    input: &Path,
    output: &Path,
    source_ext: &str,
    target_format: &str,
    range: &TimeRange,
) -> Vec<String> {
    let mut args = vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-y".to_string(),
        "-i".to_string(),
        input.to_string_lossy().into_owned(),
    ];

    if let Some(start) = range.start {
        args.push("-ss".to_string());
        args.push(format_timestamp(start));
    }
    if let Some(end) = range.end {
        args.push("-to".to_string());
        args.push(format_timestamp(end));
    }

    if is_audio_format(target_format) {
        args.push("-vn".to_string());
        args.extend(audio_codec_args(target_format).into_iter().map(String::from));
    } else if source_ext.eq_ignore_ascii_case(target_format) {
        args.push("-c".to_string());
        args.push("copy".to_string());
    }

    args.push(output.to_string_lossy().into_owned());
    args
}

/// Trims and/or converts `media` into `target_format` next to the source file.
pub async fn transcode(
    config: &AppConfig,
    media: &DownloadedMedia,
    target_format: &str,
    range: &TimeRange,
) -> Result<PathBuf, ApiError> {
    let output = config
        .downloads_dir
        .join(output_filename(&media.id, target_format, range));
    let args = ffmpeg_args(&media.path, &output, &media.ext, target_format, range);

    let result = process::run(&config.ffmpeg_bin, &args, config.ffmpeg_timeout)
        .await
        .map_err(|error| match error {
            ProcessError::TimedOut { .. } => ApiError::Transcode(error.to_string()),
            ProcessError::NotFound(_) | ProcessError::Io { .. } => {
                ApiError::internal(error.to_string())
            }
        })?;

    if !result.status.success() {
        let reason = process::last_nonempty_line(&result.stderr)
            .unwrap_or_else(|| format!("ffmpeg exited with {}", result.status));
        return Err(ApiError::Transcode(reason));
    }

    match tokio::fs::metadata(&output).await {
        Ok(metadata) if metadata.is_file() => {
            info!("converted {:?} ({} bytes)", output, metadata.len());
            Ok(output)
        }
        _ => Err(ApiError::Transcode(
            "ffmpeg finished but produced no output file".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: Option<u64>, end: Option<u64>) -> TimeRange {
        TimeRange { start, end }
    }

    #[test]
    fn output_name_depends_on_format_and_range() {
        let full = output_filename("abc123", "mp4", &TimeRange::default());
        let clip = output_filename("abc123", "mp4", &range(Some(10), Some(20)));
        let audio = output_filename("abc123", "mp3", &TimeRange::default());

        assert!(full.starts_with("abc123-") && full.ends_with(".mp4"));
        assert_eq!(full.len(), "abc123-".len() + FINGERPRINT_HEX_LEN + ".mp4".len());
        assert_ne!(full, clip);
        assert_ne!(full.trim_end_matches(".mp4"), audio.trim_end_matches(".mp3"));
        assert_eq!(clip, output_filename("abc123", "mp4", &range(Some(10), Some(20))));
    }

    #[test]
    fn same_container_with_range_is_stream_copied() {
        let args = ffmpeg_args(
            Path::new("in.mp4"),
            Path::new("out.mp4"),
            "mp4",
            "mp4",
            &range(Some(62), Some(3723)),
        );
        assert_eq!(
            args,
            [
                "-hide_banner", "-loglevel", "error", "-y", "-i", "in.mp4", "-ss", "00:01:02",
                "-to", "01:02:03", "-c", "copy", "out.mp4",
            ]
        );
    }

    #[test]
    fn container_change_uses_ffmpeg_defaults() {
        let args = ffmpeg_args(
            Path::new("in.webm"),
            Path::new("out.mp4"),
            "webm",
            "mp4",
            &TimeRange::default(),
        );
        assert_eq!(
            args,
            ["-hide_banner", "-loglevel", "error", "-y", "-i", "in.webm", "out.mp4"]
        );
    }

    #[test]
    fn audio_targets_drop_video_and_pick_codec() {
        let args = ffmpeg_args(
            Path::new("in.webm"),
            Path::new("out.mp3"),
            "webm",
            "mp3",
            &range(None, Some(30)),
        );
        let joined = args.join(" ");
        assert!(joined.contains("-to 00:00:30"));
        assert!(!joined.contains("-ss"));
        assert!(joined.contains("-vn -c:a libmp3lame -q:a 2"));
        assert_eq!(args.last().map(String::as_str), Some("out.mp3"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_a_transcode_error() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("abc.mp4");
        std::fs::write(&input, "media").unwrap();

        let config = AppConfig {
            downloads_dir: dir.path().to_path_buf(),
            ffmpeg_bin: "false".to_string(),
            ..AppConfig::default()
        };
        let media = DownloadedMedia {
            path: input,
            id: "abc".to_string(),
            ext: "mp4".to_string(),
        };

        let error = transcode(&config, &media, "mp3", &TimeRange::default())
            .await
            .unwrap_err();
        assert_eq!(error.code(), "TRANSCODE_FAILED");
    }

    #[tokio::test]
    async fn missing_binary_is_an_internal_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            downloads_dir: dir.path().to_path_buf(),
            ffmpeg_bin: "definitely-not-ffmpeg-91c3".to_string(),
            ..AppConfig::default()
        };
        let media = DownloadedMedia {
            path: dir.path().join("abc.mp4"),
            id: "abc".to_string(),
            ext: "mp4".to_string(),
        };

        let error = transcode(&config, &media, "mp4", &TimeRange::default())
            .await
            .unwrap_err();
        assert_eq!(error.code(), "INTERNAL");
    }
}
