use std::{
    io::ErrorKind,
    process::{Output, Stdio},
    time::Duration,
};

use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::Command,
    task::JoinHandle,
    time::sleep,
};
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("{0} is not installed or not on PATH")]
    NotFound(String),
    #[error("{program} did not finish within {} seconds", .limit.as_secs())]
    TimedOut { program: String, limit: Duration },
    #[error("could not run {program}: {source}")]
    Io {
        program: String,
        source: std::io::Error,
    },
}

/// Runs `program` to completion and collects its output. A non-zero exit is
/// not an error here; callers inspect `Output::status`. A child still running
/// after `limit` is killed and reaped before `TimedOut` is returned.
pub async fn run(program: &str, args: &[String], limit: Duration) -> Result<Output, ProcessError> {
    debug!("running {program} {}", args.join(" "));

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|error| spawn_error(program, error))?;

    let stdout_reader = child.stdout.take().map(|pipe| tokio::spawn(drain(pipe)));
    let stderr_reader = child.stderr.take().map(|pipe| tokio::spawn(drain(pipe)));

    let status = tokio::select! {
        status = child.wait() => status.map_err(|error| ProcessError::Io {
            program: program.to_string(),
            source: error,
        })?,
        _ = sleep(limit) => {
            warn!("{program} exceeded {}s, killing it", limit.as_secs());
            if let Err(error) = child.kill().await {
                warn!("could not kill {program}: {error}");
            }
            return Err(ProcessError::TimedOut {
                program: program.to_string(),
                limit,
            });
        }
    };

    Ok(Output {
        status,
        stdout: collect(stdout_reader).await,
        stderr: collect(stderr_reader).await,
    })
}

fn spawn_error(program: &str, error: std::io::Error) -> ProcessError {
    if error.kind() == ErrorKind::NotFound {
        ProcessError::NotFound(program.to_string())
    } else {
        ProcessError::Io {
            program: program.to_string(),
            source: error,
        }
    }
}

async fn drain<R: AsyncRead + Unpin>(mut pipe: R) -> Vec<u8> {
    let mut buffer = Vec::new();
    if let Err(error) = pipe.read_to_end(&mut buffer).await {
        debug!("stopped reading child output: {error}");
    }
    buffer
}

async fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    match reader {
        Some(handle) => handle.await.unwrap_or_default(),
        None => Vec::new(),
    }
}

/// The last non-empty line of a captured stream. On stderr this is where
/// both yt-dlp and ffmpeg put the actual reason for failing.
pub fn last_nonempty_line(stream: &[u8]) -> Option<String> {
    String::from_utf8_lossy(stream)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .map(ToString::to_string)
}
