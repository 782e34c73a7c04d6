// UI -> engine messages
//
// One command per line: `download:<payload>`, `cancel_download`,
// `fetch_metadata:<payload>`, `download_thumbnail:<payload>`,
// `request_hardware_acceleration_options`, `request_default_download_directory`.
//
// Payloads are version 1 of a pipe-delimited positional encoding. Fields are
// order-significant, trailing fields may be omitted, and anything unparsable
// keeps its default.

use std::path::{Path, PathBuf};

use crate::downloader::models::{DownloadRequest, TargetFormat};
use crate::ytdlp::{normalize_audio_codec, normalize_cookie_browser, normalize_video_codec};

pub const PAYLOAD_VERSION: u32 = 1;

const DEFAULT_FORMAT: &str = "mp4";
const DEFAULT_RESOLUTION: i64 = 1080;
const DEFAULT_BITRATE: i64 = 192;
const DEFAULT_FPS: i64 = 30;
const DEFAULT_CODEC: &str = "auto";
const DEFAULT_BROWSER: &str = "default";
const DEFAULT_HW_ACCEL: &str = "none";

fn split_fields(payload: &str) -> Vec<&str> {
    payload.split('|').collect()
}

/// Leading integer the way `stoi` reads it: optional sign, then digits.
/// "1080p" is 1080, "abc" is nothing.
fn parse_leading_int(raw: &str) -> Option<i64> {
    let trimmed = raw.trim_start();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    let value: i64 = digits[..end].parse().ok()?;
    Some(if negative { -value } else { value })
}

fn parse_flag(raw: &str, fallback: bool) -> bool {
    match raw {
        "true" | "1" => true,
        "false" | "0" => false,
        _ => fallback,
    }
}

fn non_empty(fields: &[&str], index: usize) -> Option<String> {
    fields
        .get(index)
        .filter(|value| !value.is_empty())
        .map(|value| value.to_string())
}

fn positive_or(value: i64, fallback: i64) -> u32 {
    let value = if value > 0 { value } else { fallback };
    value.min(u32::MAX as i64) as u32
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadPayload {
    pub url: String,
    pub format: String,
    pub resolution: i64,
    pub bitrate: i64,
    pub fps: i64,
    pub video_codec: String,
    pub audio_codec: String,
    pub always_ask_directory: bool,
    pub default_directory: String,
    pub cookie_browser: String,
    pub hw_accel: String,
}

impl Default for DownloadPayload {
    fn default() -> Self {
        Self {
            url: String::new(),
            format: DEFAULT_FORMAT.to_string(),
            resolution: DEFAULT_RESOLUTION,
            bitrate: DEFAULT_BITRATE,
            fps: DEFAULT_FPS,
            video_codec: DEFAULT_CODEC.to_string(),
            audio_codec: DEFAULT_CODEC.to_string(),
            always_ask_directory: true,
            default_directory: String::new(),
            cookie_browser: DEFAULT_BROWSER.to_string(),
            hw_accel: DEFAULT_HW_ACCEL.to_string(),
        }
    }
}

impl DownloadPayload {
    /// `url|format|resolution|bitrate|fps|vcodec|acodec|always_ask|default_dir|browser|hwaccel`
    pub fn decode(payload: &str) -> Self {
        let fields = split_fields(payload);
        let mut decoded = Self::default();

        decoded.url = fields[0].to_string();
        if let Some(format) = non_empty(&fields, 1) {
            decoded.format = format;
        }
        if let Some(value) = fields.get(2).and_then(|raw| parse_leading_int(raw)) {
            decoded.resolution = value;
        }
        if let Some(value) = fields.get(3).and_then(|raw| parse_leading_int(raw)) {
            decoded.bitrate = value;
        }
        if let Some(value) = fields.get(4).and_then(|raw| parse_leading_int(raw)) {
            decoded.fps = value;
        }
        if let Some(codec) = non_empty(&fields, 5) {
            decoded.video_codec = codec;
        }
        if let Some(codec) = non_empty(&fields, 6) {
            decoded.audio_codec = codec;
        }
        if let Some(raw) = fields.get(7) {
            decoded.always_ask_directory = parse_flag(raw, true);
        }
        if let Some(dir) = fields.get(8) {
            decoded.default_directory = dir.to_string();
        }
        if let Some(browser) = non_empty(&fields, 9) {
            decoded.cookie_browser = browser;
        }
        if let Some(mode) = non_empty(&fields, 10) {
            decoded.hw_accel = mode;
        }
        decoded
    }

    /// Normalized request writing into `output_dir`. Non-positive sizes fall
    /// back to their defaults; a negative bitrate means "unspecified".
    pub fn to_request(&self, output_dir: PathBuf) -> DownloadRequest {
        DownloadRequest {
            url: self.url.trim().to_string(),
            format: TargetFormat::from_token(&self.format),
            resolution: positive_or(self.resolution, DEFAULT_RESOLUTION),
            audio_bitrate: self.bitrate.clamp(0, u32::MAX as i64) as u32,
            fps: positive_or(self.fps, DEFAULT_FPS),
            video_codec: normalize_video_codec(&self.video_codec),
            audio_codec: normalize_audio_codec(&self.audio_codec),
            cookie_browser: normalize_cookie_browser(&self.cookie_browser),
            hw_accel: self.hw_accel.clone(),
            output_dir,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataPayload {
    pub url: String,
    pub cookie_browser: String,
}

impl MetadataPayload {
    /// `url|browser`
    pub fn decode(payload: &str) -> Self {
        let fields = split_fields(payload);
        Self {
            url: fields[0].to_string(),
            cookie_browser: non_empty(&fields, 1).unwrap_or_else(|| DEFAULT_BROWSER.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailPayload {
    pub url: String,
    pub always_ask_directory: bool,
    pub default_directory: String,
    pub cookie_browser: String,
}

impl ThumbnailPayload {
    /// `url|always_ask|default_dir|browser`
    pub fn decode(payload: &str) -> Self {
        let fields = split_fields(payload);
        Self {
            url: fields[0].to_string(),
            always_ask_directory: fields.get(1).is_none_or(|raw| parse_flag(raw, true)),
            default_directory: fields.get(2).map(|dir| dir.to_string()).unwrap_or_default(),
            cookie_browser: non_empty(&fields, 3).unwrap_or_else(|| DEFAULT_BROWSER.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiCommand {
    Download(DownloadPayload),
    Cancel,
    FetchMetadata(MetadataPayload),
    DownloadThumbnail(ThumbnailPayload),
    RequestHardwareAccelerationOptions,
    RequestDefaultDownloadDirectory,
    Unknown(String),
}

impl UiCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);

        if let Some(payload) = line.strip_prefix("download:") {
            return Self::Download(DownloadPayload::decode(payload));
        }
        if let Some(payload) = line.strip_prefix("fetch_metadata:") {
            return Self::FetchMetadata(MetadataPayload::decode(payload));
        }
        if let Some(payload) = line.strip_prefix("download_thumbnail:") {
            return Self::DownloadThumbnail(ThumbnailPayload::decode(payload));
        }

        match line {
            "cancel_download" => Self::Cancel,
            "request_hardware_acceleration_options" => Self::RequestHardwareAccelerationOptions,
            "request_default_download_directory" => Self::RequestDefaultDownloadDirectory,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// Asks the user for a folder. `None` means the user declined.
pub trait DirectoryPicker: Send + Sync {
    fn select_folder(&self) -> Option<PathBuf>;
}

/// Without a UI there is nobody to ask; answers with a fixed folder, if any.
#[derive(Debug, Clone, Default)]
pub struct FixedDirectoryPicker {
    dir: Option<PathBuf>,
}

impl FixedDirectoryPicker {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }
}

impl DirectoryPicker for FixedDirectoryPicker {
    fn select_folder(&self) -> Option<PathBuf> {
        self.dir.clone()
    }
}

/// Where a download or thumbnail goes. `None` drops the request silently.
pub fn resolve_save_path(
    always_ask: bool,
    default_directory: &str,
    platform_default: Option<&Path>,
    picker: &dyn DirectoryPicker,
) -> Option<PathBuf> {
    if always_ask {
        return picker.select_folder();
    }

    if !default_directory.is_empty() {
        return Some(PathBuf::from(default_directory));
    }

    platform_default
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .or_else(|| picker.select_folder())
}
