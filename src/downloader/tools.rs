use std::path::{Path, PathBuf};

use super::utils::run_output_with_timeout;
use crate::config::EngineConfig;

const VERSION_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolType {
    YtDlp,
    Ffmpeg,
}

impl ToolType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolType::YtDlp => "yt-dlp",
            ToolType::Ffmpeg => "ffmpeg",
        }
    }

    pub fn binary_name(&self) -> String {
        if cfg!(windows) {
            format!("{}.exe", self.as_str())
        } else {
            self.as_str().to_string()
        }
    }

    fn version_arg(&self) -> &'static str {
        match self {
            ToolType::YtDlp => "--version",
            ToolType::Ffmpeg => "-version",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolInfo {
    pub name: String,
    pub tool_type: ToolType,
    pub version: Option<String>,
    pub path: Option<PathBuf>,
    pub is_available: bool,
}

/// Finds the external tools. An explicit override is authoritative: if it
/// points nowhere the tool counts as missing.
#[derive(Debug, Clone, Default)]
pub struct ToolManager {
    ytdlp_override: Option<PathBuf>,
    ffmpeg_override: Option<PathBuf>,
}

impl ToolManager {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            ytdlp_override: config.ytdlp_override.clone(),
            ffmpeg_override: config.ffmpeg_override.clone(),
        }
    }

    pub fn with_paths(ytdlp: Option<PathBuf>, ffmpeg: Option<PathBuf>) -> Self {
        Self {
            ytdlp_override: ytdlp,
            ffmpeg_override: ffmpeg,
        }
    }

    fn override_for(&self, tool_type: ToolType) -> Option<&PathBuf> {
        match tool_type {
            ToolType::YtDlp => self.ytdlp_override.as_ref(),
            ToolType::Ffmpeg => self.ffmpeg_override.as_ref(),
        }
    }

    pub fn resolve(&self, tool_type: ToolType) -> Option<PathBuf> {
        if let Some(path) = self.override_for(tool_type) {
            if path.is_file() {
                return Some(path.clone());
            }
            tracing::warn!(
                "[tools] {} override {} does not exist",
                tool_type.as_str(),
                path.display()
            );
            return None;
        }

        let binary_name = tool_type.binary_name();

        // 1. Bundled next to our own executable
        if let Some(dir) = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
        {
            let local_copy = dir.join(&binary_name);
            if local_copy.is_file() {
                return Some(local_copy);
            }
        }

        // 2. Common install locations
        let common_paths = [
            PathBuf::from("/opt/homebrew/bin").join(&binary_name),
            PathBuf::from("/usr/local/bin").join(&binary_name),
            PathBuf::from("/usr/bin").join(&binary_name),
        ];
        if let Some(path) = common_paths.into_iter().find(|path| path.is_file()) {
            return Some(path);
        }

        // 3. PATH
        let path_var = std::env::var_os("PATH")?;
        std::env::split_paths(&path_var)
            .map(|dir| dir.join(&binary_name))
            .find(|candidate| candidate.is_file())
    }

    pub async fn get_tool_info(&self, tool_type: ToolType) -> ToolInfo {
        let path = self.resolve(tool_type);
        let version = match &path {
            Some(path) => get_version(path, tool_type).await,
            None => None,
        };

        ToolInfo {
            name: tool_type.as_str().to_string(),
            tool_type,
            version,
            is_available: path.is_some(),
            path,
        }
    }

    pub async fn get_all_tools(&self) -> Vec<ToolInfo> {
        vec![
            self.get_tool_info(ToolType::YtDlp).await,
            self.get_tool_info(ToolType::Ffmpeg).await,
        ]
    }
}

async fn get_version(path: &Path, tool_type: ToolType) -> Option<String> {
    match run_output_with_timeout(path, &[tool_type.version_arg()], VERSION_TIMEOUT_SECS).await {
        // ffmpeg prints a whole banner; the first line carries the version
        Ok(out) => out.lines().next().map(|line| line.trim().to_string()),
        Err(e) => {
            tracing::debug!("[tools] {} version check failed: {}", tool_type.as_str(), e);
            None
        }
    }
}
