// Helper functions shared by the runners

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, SystemTime};

use tokio::process::Command as TokioCommand;
use tokio::time::timeout;

use super::errors::ExecutionError;
use super::traits::ToolRunner;

/// Extensions of files a tool is still writing or has left behind mid-run
const TEMPORARY_EXTENSIONS: [&str; 6] = ["part", "ytdl", "tmp", "temp", "frag", "download"];

/// Run a tool through `runner` and keep every line it printed.
pub async fn run_capture(
    runner: &dyn ToolRunner,
    program: &Path,
    args: &[String],
    cancellable: bool,
) -> Result<(i32, Vec<String>), ExecutionError> {
    let mut lines = Vec::new();
    let mut collect = |line: &str| lines.push(line.to_string());
    let code = runner.run(program, args, cancellable, &mut collect).await?;
    Ok((code, lines))
}

/// Run a short command with timeout, returning trimmed stdout on success.
/// Used for version probes where streaming is not needed.
pub async fn run_output_with_timeout(
    program: &Path,
    args: &[&str],
    timeout_secs: u64,
) -> Result<String, String> {
    let child = TokioCommand::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| format!("Failed to start {}: {}", program.display(), e))?;

    let output = timeout(Duration::from_secs(timeout_secs), child.wait_with_output())
        .await
        .map_err(|_| format!("Timed out after {}s", timeout_secs))?
        .map_err(|e| format!("Failed to wait for {}: {}", program.display(), e))?;

    if !output.status.success() {
        return Err(format!(
            "{} exited with {:?}",
            program.display(),
            output.status.code()
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

pub fn is_temporary_file(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.'));
    let temp_ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            let ext = ext.to_ascii_lowercase();
            TEMPORARY_EXTENSIONS.contains(&ext.as_str())
        });
    hidden || temp_ext
}

fn modified_files(dir: &Path) -> Vec<(PathBuf, SystemTime)> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("[files] cannot read {}: {}", dir.display(), e);
            return Vec::new();
        }
    };

    entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let meta = entry.metadata().ok()?;
            if !meta.is_file() {
                return None;
            }
            Some((entry.path(), meta.modified().ok()?))
        })
        .collect()
}

/// Locate the file a download just produced.
///
/// Order: the path the tool printed (if it exists), then the newest
/// non-temporary file modified after `started_at - grace`, then the newest
/// file in the directory at all.
pub fn find_downloaded_file(
    dir: &Path,
    printed: Option<&Path>,
    started_at: SystemTime,
    grace: Duration,
) -> Option<PathBuf> {
    if let Some(path) = printed {
        if path.is_file() {
            return Some(path.to_path_buf());
        }
        tracing::debug!("[files] printed path {} does not exist", path.display());
    }

    let files = modified_files(dir);
    let threshold = started_at.checked_sub(grace).unwrap_or(SystemTime::UNIX_EPOCH);

    let recent = files
        .iter()
        .filter(|(path, modified)| *modified >= threshold && !is_temporary_file(path))
        .max_by_key(|(_, modified)| *modified);
    if let Some((path, _)) = recent {
        return Some(path.clone());
    }

    files
        .into_iter()
        .max_by_key(|(_, modified)| *modified)
        .map(|(path, _)| path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;

    fn touch(dir: &Path, name: &str, mtime: SystemTime) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"x").unwrap();
        filetime::set_file_mtime(&path, FileTime::from_system_time(mtime)).unwrap();
        path
    }

    #[test]
    fn test_temporary_files() {
        assert!(is_temporary_file(Path::new("clip.mp4.part")));
        assert!(is_temporary_file(Path::new("clip.f137.mp4.ytdl")));
        assert!(is_temporary_file(Path::new(".hidden.mp4")));
        assert!(!is_temporary_file(Path::new("clip.mp4")));
    }

    #[test]
    fn test_printed_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        let printed = touch(dir.path(), "printed.mp4", now - Duration::from_secs(3600));
        touch(dir.path(), "newer.mp4", now);

        let found = find_downloaded_file(dir.path(), Some(&printed), now, Duration::from_secs(5));
        assert_eq!(found, Some(printed));
    }

    #[test]
    fn test_recent_non_temporary_file() {
        let dir = tempfile::tempdir().unwrap();
        let start = SystemTime::now() - Duration::from_secs(60);
        touch(dir.path(), "old.mp4", start - Duration::from_secs(3600));
        let fresh = touch(dir.path(), "fresh.webm", start + Duration::from_secs(10));
        touch(dir.path(), "fresh.webm.part", start + Duration::from_secs(20));

        let missing = dir.path().join("gone.mp4");
        let found = find_downloaded_file(dir.path(), Some(&missing), start, Duration::from_secs(5));
        assert_eq!(found, Some(fresh));
    }

    #[test]
    fn test_falls_back_to_newest_file() {
        let dir = tempfile::tempdir().unwrap();
        let start = SystemTime::now();
        touch(dir.path(), "a.mp4", start - Duration::from_secs(7200));
        let b = touch(dir.path(), "b.mp4", start - Duration::from_secs(3600));

        let found = find_downloaded_file(dir.path(), None, start, Duration::from_secs(5));
        assert_eq!(found, Some(b));
    }

    #[test]
    fn test_empty_directory_resolves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let found = find_downloaded_file(dir.path(), None, SystemTime::now(), Duration::from_secs(5));
        assert_eq!(found, None);
    }
}
