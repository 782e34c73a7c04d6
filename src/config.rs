// Engine configuration, read once at startup

use std::path::PathBuf;
use std::time::Duration;

pub const APP_DIR_NAME: &str = "media-downloader";

pub const ENV_YTDLP: &str = "MEDIA_DOWNLOADER_YTDLP";
pub const ENV_FFMPEG: &str = "MEDIA_DOWNLOADER_FFMPEG";
pub const ENV_LOG_DIR: &str = "MEDIA_DOWNLOADER_LOG_DIR";

/// Files modified this long before an attempt started still count as its output
pub const DEFAULT_GRACE_WINDOW: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub ytdlp_override: Option<PathBuf>,
    pub ffmpeg_override: Option<PathBuf>,
    pub log_dir: PathBuf,
    pub download_dir: Option<PathBuf>,
    pub grace_window: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ytdlp_override: None,
            ffmpeg_override: None,
            log_dir: default_log_dir(),
            download_dir: dirs::download_dir(),
            grace_window: DEFAULT_GRACE_WINDOW,
        }
    }
}

pub fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR_NAME)
        .join("logs")
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .map(PathBuf::from)
        };

        let mut config = Self::default();
        config.ytdlp_override = path(ENV_YTDLP);
        config.ffmpeg_override = path(ENV_FFMPEG);
        if let Some(dir) = path(ENV_LOG_DIR) {
            config.log_dir = dir;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_overrides_from_environment() {
        let env: HashMap<&str, &str> = [
            (ENV_YTDLP, "/opt/tools/yt-dlp"),
            (ENV_FFMPEG, "  "),
            (ENV_LOG_DIR, "/var/log/md"),
        ]
        .into_iter()
        .collect();
        let config = EngineConfig::from_lookup(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.ytdlp_override, Some(PathBuf::from("/opt/tools/yt-dlp")));
        assert_eq!(config.ffmpeg_override, None);
        assert_eq!(config.log_dir, PathBuf::from("/var/log/md"));
        assert_eq!(config.grace_window, Duration::from_secs(5));
    }

    #[test]
    fn test_defaults_without_environment() {
        let config = EngineConfig::from_lookup(|_| None);
        assert_eq!(config.ytdlp_override, None);
        assert!(config.log_dir.ends_with("media-downloader/logs"));
    }
}
