use thiserror::Error;

use crate::error::ApiError;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimecodeError {
    #[error("timestamp is empty")]
    Empty,
    #[error("invalid timestamp {0:?}, expected HH:MM:SS, MM:SS or SS")]
    Malformed(String),
}

/// Parses `HH:MM:SS`, `MM:SS` or plain `SS` into whole seconds. Every
/// component after the first must be below 60.
pub fn time_to_seconds(value: &str) -> Result<u64, TimecodeError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(TimecodeError::Empty);
    }

    let malformed = || TimecodeError::Malformed(trimmed.to_string());
    let parts = trimmed.split(':').collect::<Vec<_>>();
    if parts.len() > 3 {
        return Err(malformed());
    }

    let mut total: u64 = 0;
    for (index, part) in parts.iter().enumerate() {
        if part.is_empty() || !part.bytes().all(|byte| byte.is_ascii_digit()) {
            return Err(malformed());
        }
        let number = part.parse::<u64>().map_err(|_| malformed())?;
        if index > 0 && number >= 60 {
            return Err(malformed());
        }
        total = total
            .checked_mul(60)
            .and_then(|value| value.checked_add(number))
            .ok_or_else(malformed)?;
    }

    Ok(total)
}

pub fn format_timestamp(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

/// Optional trim window applied by the transcoder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub start: Option<u64>,
    pub end: Option<u64>,
}

impl TimeRange {
    pub fn parse(start: Option<&str>, end: Option<&str>) -> Result<Self, ApiError> {
        let parse_field = |name: &str, value: Option<&str>| -> Result<Option<u64>, ApiError> {
            match value.map(str::trim).filter(|value| !value.is_empty()) {
                Some(value) => time_to_seconds(value)
                    .map(Some)
                    .map_err(|error| ApiError::validation(format!("{name}: {error}"))),
                None => Ok(None),
            }
        };

        let range = Self {
            start: parse_field("start", start)?,
            end: parse_field("end", end)?,
        };

        if let (Some(start), Some(end)) = (range.start, range.end)
            && start >= end
        {
            return Err(ApiError::validation(format!(
                "start ({}) must be before end ({})",
                format_timestamp(start),
                format_timestamp(end)
            )));
        }

        Ok(range)
    }

    pub fn is_empty(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    pub fn ensure_within(&self, duration_seconds: u64) -> Result<(), ApiError> {
        let out_of_bounds = |value: Option<u64>| value.is_some_and(|value| value > duration_seconds);
        if out_of_bounds(self.start) || out_of_bounds(self.end) {
            return Err(ApiError::validation(format!(
                "requested range exceeds the video duration ({})",
                format_timestamp(duration_seconds)
            )));
        }
        Ok(())
    }
}
