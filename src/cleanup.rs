use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    time::SystemTime,
};

use tracing::{debug, warn};

/// Deletes every regular file in `dir` except the `max_files` most recently
/// modified ones. Failures are logged and skipped; the return value is the
/// number of files actually removed.
pub async fn sweep_downloads(dir: &Path, max_files: usize) -> usize {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(error) => {
            if error.kind() != ErrorKind::NotFound {
                warn!("could not open {:?} for cleanup: {error}", dir);
            }
            return 0;
        }
    };

    let mut files: Vec<(SystemTime, PathBuf)> = Vec::new();

    loop {
        let maybe_entry = match entries.next_entry().await {
            Ok(value) => value,
            Err(error) => {
                warn!("could not iterate {:?} for cleanup: {error}", dir);
                break;
            }
        };

        let Some(entry) = maybe_entry else {
            break;
        };

        let path = entry.path();
        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(error) => {
                warn!("could not read metadata of {:?}: {error}", path);
                continue;
            }
        };

        if !metadata.is_file() {
            continue;
        }

        match metadata.modified() {
            Ok(modified_at) => files.push((modified_at, path)),
            Err(error) => warn!("could not read modification time of {:?}: {error}", path),
        }
    }

    if files.len() <= max_files {
        return 0;
    }

    files.sort_by(|a, b| b.0.cmp(&a.0));

    let mut removed = 0;
    for (_, path) in files.into_iter().skip(max_files) {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!("removed stale download {:?}", path);
                removed += 1;
            }
            Err(error) if error.kind() == ErrorKind::NotFound => {}
            Err(error) => warn!("could not remove {:?}: {error}", path),
        }
    }

    removed
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn write_with_mtime(dir: &Path, name: &str, age_secs: u64) {
        let path = dir.join(name);
        std::fs::write(&path, name).unwrap();
        let file = std::fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(age_secs))
            .unwrap();
    }

    #[tokio::test]
    async fn keeps_only_most_recent_files() {
        let dir = tempfile::tempdir().unwrap();
        write_with_mtime(dir.path(), "oldest.mp4", 400);
        write_with_mtime(dir.path(), "old.mp4", 300);
        write_with_mtime(dir.path(), "newer.mp4", 200);
        write_with_mtime(dir.path(), "newest.mp4", 100);

        let removed = sweep_downloads(dir.path(), 2).await;
        assert_eq!(removed, 2);

        let mut remaining = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect::<Vec<_>>();
        remaining.sort();
        assert_eq!(remaining, vec!["newer.mp4", "newest.mp4"]);
    }

    #[tokio::test]
    async fn leaves_directories_alone() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        write_with_mtime(dir.path(), "a.mp4", 30);
        write_with_mtime(dir.path(), "b.mp4", 20);

        assert_eq!(sweep_downloads(dir.path(), 1).await, 1);
        assert!(dir.path().join("nested").is_dir());
        assert!(dir.path().join("b.mp4").exists());
        assert!(!dir.path().join("a.mp4").exists());
    }

    #[tokio::test]
    async fn missing_directory_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(sweep_downloads(&dir.path().join("absent"), 2).await, 0);
    }

    #[tokio::test]
    async fn under_the_limit_removes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        write_with_mtime(dir.path(), "only.mp4", 10);
        assert_eq!(sweep_downloads(dir.path(), 2).await, 0);
        assert!(dir.path().join("only.mp4").exists());
    }
}
