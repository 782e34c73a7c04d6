// Common data models for downloader

use std::fmt;
use std::path::PathBuf;

/// Output container requested by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetFormat {
    #[default]
    Mp4,
    Webm,
    Mkv,
    Mp3,
    Wav,
}

impl TargetFormat {
    /// Unknown tokens fall back to mp4.
    pub fn from_token(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "webm" => Self::Webm,
            "mkv" => Self::Mkv,
            "mp3" => Self::Mp3,
            "wav" => Self::Wav,
            _ => Self::Mp4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Webm => "webm",
            Self::Mkv => "mkv",
            Self::Mp3 => "mp3",
            Self::Wav => "wav",
        }
    }

    pub fn is_audio_only(&self) -> bool {
        matches!(self, Self::Mp3 | Self::Wav)
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoCodec {
    #[default]
    Auto,
    Av01,
    Vp9,
    H265,
    H264,
}

impl VideoCodec {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Av01 => "av01",
            Self::Vp9 => "vp9",
            Self::H265 => "h265",
            Self::H264 => "h264",
        }
    }

    /// ffmpeg encoder for this codec; `None` for `auto`
    pub fn ffmpeg_encoder(&self) -> Option<&'static str> {
        match self {
            Self::Auto => None,
            Self::Av01 => Some("libaom-av1"),
            Self::Vp9 => Some("libvpx-vp9"),
            Self::H265 => Some("libx265"),
            Self::H264 => Some("libx264"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioCodec {
    #[default]
    Auto,
    Opus,
    Vorbis,
    Aac,
    Mp4a,
    Mp3,
}

impl AudioCodec {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Opus => "opus",
            Self::Vorbis => "vorbis",
            Self::Aac => "aac",
            Self::Mp4a => "mp4a",
            Self::Mp3 => "mp3",
        }
    }

    pub fn ffmpeg_encoder(&self) -> Option<&'static str> {
        match self {
            Self::Auto => None,
            Self::Opus => Some("libopus"),
            Self::Vorbis => Some("libvorbis"),
            Self::Aac | Self::Mp4a => Some("aac"),
            Self::Mp3 => Some("libmp3lame"),
        }
    }

    /// Whether an upstream codec id (e.g. `mp4a.40.2`) is this codec.
    /// `aac` and `mp4a` name the same family.
    pub fn matches_upstream(&self, upstream: &str) -> bool {
        let upstream = upstream.trim().to_ascii_lowercase();
        match self {
            Self::Auto => true,
            Self::Aac | Self::Mp4a => upstream.starts_with("mp4a") || upstream.starts_with("aac"),
            other => upstream.starts_with(other.as_str()),
        }
    }
}

/// Browsers yt-dlp can read cookies from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Browser {
    Brave,
    Chrome,
    Chromium,
    Edge,
    Firefox,
    Opera,
    Safari,
    Vivaldi,
    Whale,
}

impl Browser {
    pub const ALL: [Browser; 9] = [
        Self::Brave,
        Self::Chrome,
        Self::Chromium,
        Self::Edge,
        Self::Firefox,
        Self::Opera,
        Self::Safari,
        Self::Vivaldi,
        Self::Whale,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Brave => "brave",
            Self::Chrome => "chrome",
            Self::Chromium => "chromium",
            Self::Edge => "edge",
            Self::Firefox => "firefox",
            Self::Opera => "opera",
            Self::Safari => "safari",
            Self::Vivaldi => "vivaldi",
            Self::Whale => "whale",
        }
    }
}

/// Hardware acceleration handed to ffmpeg
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum HwAccelMode {
    #[default]
    None,
    Auto,
    /// An accelerator name reported by `ffmpeg -hwaccels`
    Named(String),
}

impl HwAccelMode {
    pub fn as_str(&self) -> &str {
        match self {
            Self::None => "none",
            Self::Auto => "auto",
            Self::Named(name) => name,
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl fmt::Display for HwAccelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One download invocation, immutable once built.
///
/// `hw_accel` still carries the raw user choice; named accelerators are
/// checked against the installed ffmpeg right before the run.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadRequest {
    pub url: String,
    pub format: TargetFormat,
    pub resolution: u32,
    /// Audio bitrate in kbps, 0 = unspecified
    pub audio_bitrate: u32,
    pub fps: u32,
    pub video_codec: VideoCodec,
    pub audio_codec: AudioCodec,
    pub cookie_browser: Option<Browser>,
    pub hw_accel: String,
    pub output_dir: PathBuf,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            format: TargetFormat::Mp4,
            resolution: 1080,
            audio_bitrate: 0,
            fps: 30,
            video_codec: VideoCodec::Auto,
            audio_codec: AudioCodec::Auto,
            cookie_browser: None,
            hw_accel: String::new(),
            output_dir: output_dir.into(),
        }
    }
}

/// Per-attempt switches, rebuilt from the request for each retry
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CommandOptions {
    pub use_cookies: bool,
    /// Leave the container alone at download time, a conversion pass follows
    pub defer_container: bool,
    pub include_audio_codec_sort: bool,
    /// yt-dlp appends the moved file's path here; only set when a
    /// conversion pass has to find the download afterwards
    pub final_path_file: Option<PathBuf>,
    pub ffmpeg_location: Option<PathBuf>,
    pub hw_accel: HwAccelMode,
}

/// Coarse stage of one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Downloading,
    Merging,
    Converting,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Downloading => "downloading",
            Self::Merging => "merging",
            Self::Converting => "converting",
        }
    }
}

/// Terminal result of one orchestrator run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Error,
    Canceled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_format_tokens() {
        assert_eq!(TargetFormat::from_token("WEBM"), TargetFormat::Webm);
        assert_eq!(TargetFormat::from_token(" wav "), TargetFormat::Wav);
        assert_eq!(TargetFormat::from_token("flv"), TargetFormat::Mp4);
        assert!(TargetFormat::Mp3.is_audio_only());
        assert!(!TargetFormat::Mkv.is_audio_only());
    }

    #[test]
    fn test_audio_codec_upstream_matching() {
        assert!(AudioCodec::Aac.matches_upstream("mp4a.40.2"));
        assert!(AudioCodec::Mp4a.matches_upstream("aac"));
        assert!(AudioCodec::Opus.matches_upstream("opus"));
        assert!(!AudioCodec::Opus.matches_upstream("mp4a.40.5"));
        assert!(AudioCodec::Auto.matches_upstream("anything"));
    }

    #[test]
    fn test_hw_mode_activity() {
        assert!(!HwAccelMode::None.is_active());
        assert!(HwAccelMode::Auto.is_active());
        assert_eq!(HwAccelMode::Named("cuda".into()).as_str(), "cuda");
    }
}
