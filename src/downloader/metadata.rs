// Metadata prober - scrape the handful of fields we need from `yt-dlp -J`
//
// The dump is large and only a few keys matter, so this is targeted pattern
// extraction rather than a JSON parse. Each extractor documents what it
// captures; a change in upstream key names shows up as empty results.

use std::path::Path;

use lazy_static::lazy_static;
use regex::Regex;

use super::errors::DownloadError;
use super::models::{AudioCodec, Browser, DownloadRequest};
use super::traits::ToolRunner;
use super::utils::run_capture;
use crate::logging::DownloadLog;
use crate::ytdlp::build_metadata_args;

/// Heights outside this range are thumbnails, storyboards or garbage
const MIN_HEIGHT: u32 = 100;
const MAX_HEIGHT: u32 = 8640;

pub const UHD_HEIGHT: u32 = 2160;

lazy_static! {
    // `"height": 1080`
    static ref HEIGHT_RE: Regex = Regex::new(r#""height"\s*:\s*(\d+)"#).unwrap();
    // `"fps": 29.97`
    static ref FPS_RE: Regex = Regex::new(r#""fps"\s*:\s*(\d+(?:\.\d+)?)"#).unwrap();
    // `"abr": 129.478`
    static ref ABR_RE: Regex = Regex::new(r#""abr"\s*:\s*(\d+(?:\.\d+)?)"#).unwrap();
    // First `"thumbnail": "..."`, escapes left encoded
    static ref THUMBNAIL_RE: Regex =
        Regex::new(r#""thumbnail"\s*:\s*"((?:[^"\\]|\\.)*)""#).unwrap();
    // `"acodec": "opus"`
    static ref ACODEC_RE: Regex = Regex::new(r#""acodec"\s*:\s*"([^"]*)""#).unwrap();
    // Height and extension inside one format record, in either order
    static ref HEIGHT_THEN_EXT_RE: Regex =
        Regex::new(r#""height"\s*:\s*(\d+)[^{}]*?"ext"\s*:\s*"([^"]+)""#).unwrap();
    static ref EXT_THEN_HEIGHT_RE: Regex =
        Regex::new(r#""ext"\s*:\s*"([^"]+)"[^{}]*?"height"\s*:\s*(\d+)"#).unwrap();
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaMetadata {
    pub resolutions: Vec<u32>,
    pub fps: Vec<u32>,
    pub audio_bitrates: Vec<u32>,
    pub thumbnail_url: String,
    pub audio_codecs: Vec<String>,
    pub has_4k: bool,
    /// Extensions of records that carry a 2160p+ stream
    pub uhd_extensions: Vec<String>,
}

/// What the fallback decision needs from one metadata fetch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediaProbeResult {
    pub has_4k: bool,
    pub has_4k_in_target: bool,
    pub audio_codec_available: bool,
}

impl MediaProbeResult {
    pub fn from_metadata(metadata: &MediaMetadata, request: &DownloadRequest) -> Self {
        let target = request.format.as_str();
        let audio_codec_available = match request.audio_codec {
            AudioCodec::Auto => true,
            codec => metadata
                .audio_codecs
                .iter()
                .any(|upstream| codec.matches_upstream(upstream)),
        };

        Self {
            has_4k: metadata.has_4k,
            has_4k_in_target: metadata.uhd_extensions.iter().any(|ext| ext == target),
            audio_codec_available,
        }
    }
}

/// Slice from the first `{` to the last `}`; tools print warnings around it.
pub fn extract_payload(output: &str) -> Option<&str> {
    let start = output.find('{')?;
    let end = output.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&output[start..=end])
}

fn sorted_unique(mut values: Vec<u32>) -> Vec<u32> {
    values.sort_unstable();
    values.dedup();
    values
}

fn rounded_positive(re: &Regex, payload: &str) -> Vec<u32> {
    let values = re
        .captures_iter(payload)
        .filter_map(|caps| caps[1].parse::<f64>().ok())
        .map(f64::round)
        .filter(|value| *value > 0.0 && *value <= u32::MAX as f64)
        .map(|value| value as u32)
        .collect();
    sorted_unique(values)
}

pub fn extract_heights(payload: &str) -> Vec<u32> {
    let values = HEIGHT_RE
        .captures_iter(payload)
        .filter_map(|caps| caps[1].parse::<u32>().ok())
        .filter(|height| (MIN_HEIGHT..=MAX_HEIGHT).contains(height))
        .collect();
    sorted_unique(values)
}

pub fn extract_fps(payload: &str) -> Vec<u32> {
    rounded_positive(&FPS_RE, payload)
}

pub fn extract_audio_bitrates(payload: &str) -> Vec<u32> {
    rounded_positive(&ABR_RE, payload)
}

pub fn extract_thumbnail(payload: &str) -> Option<String> {
    THUMBNAIL_RE
        .captures(payload)
        .map(|caps| decode_json_string(&caps[1]))
}

/// Distinct codec ids in order of first appearance, "none" excluded.
pub fn extract_audio_codecs(payload: &str) -> Vec<String> {
    let mut codecs: Vec<String> = Vec::new();
    for caps in ACODEC_RE.captures_iter(payload) {
        let codec = caps[1].trim();
        if codec.is_empty() || codec.eq_ignore_ascii_case("none") {
            continue;
        }
        if !codecs.iter().any(|known| known == codec) {
            codecs.push(codec.to_string());
        }
    }
    codecs
}

pub fn extract_uhd_extensions(payload: &str) -> Vec<String> {
    let forward = HEIGHT_THEN_EXT_RE
        .captures_iter(payload)
        .map(|caps| (caps[1].parse::<u32>().ok(), caps[2].to_string()));
    let backward = EXT_THEN_HEIGHT_RE
        .captures_iter(payload)
        .map(|caps| (caps[2].parse::<u32>().ok(), caps[1].to_string()));

    let mut extensions: Vec<String> = Vec::new();
    for (height, ext) in forward.chain(backward) {
        let is_uhd = height.is_some_and(|h| h >= UHD_HEIGHT);
        if is_uhd && !extensions.contains(&ext) {
            extensions.push(ext);
        }
    }
    extensions
}

/// Common escapes only; `\uXXXX` is decoded for 7-bit code points and kept
/// verbatim otherwise.
pub fn decode_json_string(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();

    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('/') => out.push('/'),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&hex, 16) {
                    Ok(code) if hex.len() == 4 && code < 0x80 => {
                        out.push(char::from(code as u8));
                    }
                    _ => {
                        out.push_str("\\u");
                        out.push_str(&hex);
                    }
                }
            }
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

pub fn parse_metadata(output: &str) -> Option<MediaMetadata> {
    let payload = extract_payload(output)?;
    let resolutions = extract_heights(payload);

    Some(MediaMetadata {
        has_4k: resolutions.iter().any(|height| *height >= UHD_HEIGHT),
        resolutions,
        fps: extract_fps(payload),
        audio_bitrates: extract_audio_bitrates(payload),
        thumbnail_url: extract_thumbnail(payload).unwrap_or_default(),
        audio_codecs: extract_audio_codecs(payload),
        uhd_extensions: extract_uhd_extensions(payload),
    })
}

async fn fetch_once(
    runner: &dyn ToolRunner,
    ytdlp: &Path,
    url: &str,
    cookie_browser: Option<Browser>,
    cancellable: bool,
    log: &DownloadLog,
) -> Result<MediaMetadata, DownloadError> {
    let args = build_metadata_args(url, cookie_browser);
    log.write("metadata", format!("run: {} {}", ytdlp.display(), args.join(" ")));

    let (code, lines) = run_capture(runner, ytdlp, &args, cancellable).await?;
    log.write("metadata", format!("exit code {} ({} lines)", code, lines.len()));
    if code != 0 {
        for line in lines.iter().filter(|line| !line.trim_start().starts_with('{')) {
            log.write("metadata", line);
        }
        return Err(DownloadError::AttemptFailed {
            tool: "yt-dlp",
            code,
        });
    }

    parse_metadata(&lines.join("\n"))
        .ok_or_else(|| DownloadError::Probe("no JSON payload in output".to_string()))
}

/// Runs the metadata dump; on failure with cookies, tries once without them.
pub async fn fetch_metadata(
    runner: &dyn ToolRunner,
    ytdlp: &Path,
    url: &str,
    cookie_browser: Option<Browser>,
    cancellable: bool,
    log: &DownloadLog,
) -> Result<MediaMetadata, DownloadError> {
    match fetch_once(runner, ytdlp, url, cookie_browser, cancellable, log).await {
        Ok(metadata) => Ok(metadata),
        Err(e) if e.is_setup_failure() || cookie_browser.is_none() => Err(e),
        Err(e) => {
            log.write("metadata", format!("{}; retrying without cookies", e));
            fetch_once(runner, ytdlp, url, None, cancellable, log).await
        }
    }
}
