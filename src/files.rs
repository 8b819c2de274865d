use std::path::Path;

use crate::error::ApiError;

const VIDEO_FORMATS: [&str; 4] = ["mp4", "webm", "mkv", "mov"];
const AUDIO_FORMATS: [&str; 7] = ["mp3", "m4a", "wav", "ogg", "opus", "flac", "aac"];

/// Normalizes a requested target format (`.MP4` -> `mp4`) and rejects
/// anything the transcoder is not set up to produce.
pub fn normalize_target_format(value: &str) -> Result<String, ApiError> {
    let normalized = value.trim().trim_start_matches('.').to_ascii_lowercase();
    if normalized.is_empty() {
        return Err(ApiError::validation("format is required"));
    }
    if VIDEO_FORMATS.contains(&normalized.as_str()) || is_audio_format(&normalized) {
        Ok(normalized)
    } else {
        Err(ApiError::validation(format!(
            "unsupported format {normalized:?}; expected one of {}",
            VIDEO_FORMATS
                .iter()
                .chain(AUDIO_FORMATS.iter())
                .copied()
                .collect::<Vec<_>>()
                .join(", ")
        )))
    }
}

pub fn is_audio_format(format: &str) -> bool {
    AUDIO_FORMATS.contains(&format)
}

/// Rejects names that could escape the downloads directory.
pub fn validate_served_filename(filename: &str) -> Result<&str, ApiError> {
    let invalid = filename.is_empty()
        || filename.starts_with('.')
        || filename.contains('/')
        || filename.contains('\\')
        || filename.contains('\0')
        || filename.contains("..");

    if invalid {
        return Err(ApiError::validation("invalid file name"));
    }
    Ok(filename)
}

pub fn content_type_for_filename(filename: &str) -> &'static str {
    let extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mov" => "video/quicktime",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        "wav" => "audio/wav",
        "ogg" | "opus" => "audio/ogg",
        "flac" => "audio/flac",
        "vtt" => "text/vtt",
        _ => "application/octet-stream",
    }
}

pub fn build_content_disposition(filename: &str) -> String {
    let safe_ascii = sanitize_ascii_filename(filename);
    format!(
        "attachment; filename=\"{safe_ascii}\"; filename*=UTF-8''{}",
        urlencoding::encode(filename)
    )
}

pub fn sanitize_ascii_filename(value: &str) -> String {
    let sanitized = value
        .chars()
        .map(|character| {
            if character.is_ascii_alphanumeric()
                || matches!(character, '.' | '-' | '_' | ' ' | '(' | ')')
            {
                character
            } else {
                '_'
            }
        })
        .collect::<String>();

    let compact = sanitized.trim();
    if compact.is_empty() {
        "download.bin".to_string()
    } else {
        compact.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_format_is_normalized() {
        assert_eq!(normalize_target_format(" .MP4 ").unwrap(), "mp4");
        assert_eq!(normalize_target_format("mp3").unwrap(), "mp3");
        assert!(normalize_target_format("exe").is_err());
        assert!(normalize_target_format("  ").is_err());
    }

    #[test]
    fn audio_formats_are_recognized() {
        assert!(is_audio_format("mp3"));
        assert!(is_audio_format("opus"));
        assert!(!is_audio_format("mp4"));
    }

    #[test]
    fn traversal_names_are_rejected() {
        assert!(validate_served_filename("abc123-0f1e2d3c4b.mp4").is_ok());
        assert!(validate_served_filename("../etc/passwd").is_err());
        assert!(validate_served_filename("nested/file.mp4").is_err());
        assert!(validate_served_filename("..\\file.mp4").is_err());
        assert!(validate_served_filename(".hidden").is_err());
        assert!(validate_served_filename("").is_err());
    }

    #[test]
    fn content_disposition_keeps_utf8_name() {
        let header = build_content_disposition("vídeo final.mp4");
        assert!(header.starts_with("attachment; filename=\"v_deo final.mp4\""));
        assert!(header.contains("filename*=UTF-8''v%C3%ADdeo%20final.mp4"));
    }

    #[test]
    fn content_type_falls_back_to_octet_stream() {
        assert_eq!(content_type_for_filename("clip.MP4"), "video/mp4");
        assert_eq!(content_type_for_filename("clip.opus"), "audio/ogg");
        assert_eq!(content_type_for_filename("clip"), "application/octet-stream");
    }
}
