// yt-dlp command building and input normalization
//
// Every function here is pure: it never fails and never touches the
// filesystem. Unknown user input collapses to a safe default.

use std::path::Path;

use crate::downloader::models::{
    AudioCodec, Browser, CommandOptions, DownloadRequest, HwAccelMode, VideoCodec,
};

/// Output template relative to the chosen directory
const OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";

/// `--print-to-file` template; unlike `--print` it leaves screen output on
const FINAL_PATH_TEMPLATE: &str = "after_move:filepath";

/// Image format thumbnails are converted to
pub const THUMBNAIL_FORMAT: &str = "jpg";

pub fn normalize_video_codec(raw: &str) -> VideoCodec {
    match raw.trim().to_ascii_lowercase().as_str() {
        "av01" => VideoCodec::Av01,
        "vp9" => VideoCodec::Vp9,
        "h265" => VideoCodec::H265,
        "h264" => VideoCodec::H264,
        _ => VideoCodec::Auto,
    }
}

pub fn normalize_audio_codec(raw: &str) -> AudioCodec {
    match raw.trim().to_ascii_lowercase().as_str() {
        "opus" => AudioCodec::Opus,
        "vorbis" => AudioCodec::Vorbis,
        "aac" => AudioCodec::Aac,
        "mp4a" => AudioCodec::Mp4a,
        "mp3" => AudioCodec::Mp3,
        _ => AudioCodec::Auto,
    }
}

/// `None` means no cookies: empty, "default", or a browser yt-dlp can't read.
pub fn normalize_cookie_browser(raw: &str) -> Option<Browser> {
    let lowered = raw.trim().to_ascii_lowercase();
    if lowered.is_empty() || lowered == "default" {
        return None;
    }
    Browser::ALL
        .iter()
        .copied()
        .find(|browser| browser.as_str() == lowered)
}

/// Named accelerators survive only if the installed ffmpeg reports them.
pub fn normalize_hwaccel_mode<S: AsRef<str>>(raw: &str, available: &[S]) -> HwAccelMode {
    let lowered = raw.trim().to_ascii_lowercase();
    match lowered.as_str() {
        "" | "none" => HwAccelMode::None,
        "auto" => HwAccelMode::Auto,
        name => {
            if available.iter().any(|option| option.as_ref() == name) {
                HwAccelMode::Named(name.to_string())
            } else {
                HwAccelMode::None
            }
        }
    }
}

/// Whether a raw mode needs the ffmpeg probe to be resolved.
pub fn needs_hwaccel_probe(raw: &str) -> bool {
    !matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "" | "none" | "auto"
    )
}

fn output_arg(dir: &Path) -> String {
    dir.join(OUTPUT_TEMPLATE).to_string_lossy().into_owned()
}

fn push_cookies(args: &mut Vec<String>, browser: Option<Browser>) {
    if let Some(browser) = browser {
        args.push("--cookies-from-browser".to_string());
        args.push(browser.as_str().to_string());
    }
}

/// Format selector capped by height and frame rate, falling back to best.
pub fn video_format_selector(resolution: u32, fps: u32) -> String {
    format!(
        "bestvideo[height<={res}][fps<={fps}]+bestaudio/best[height<={res}]/best",
        res = resolution,
        fps = fps
    )
}

/// Codec preference for `-S`, `None` when nothing is preferred.
fn format_sort(request: &DownloadRequest, include_audio: bool) -> Option<String> {
    let mut keys = Vec::new();
    if request.video_codec != VideoCodec::Auto && !request.format.is_audio_only() {
        keys.push(format!("vcodec:{}", request.video_codec.as_str()));
    }
    if include_audio && request.audio_codec != AudioCodec::Auto {
        keys.push(format!("acodec:{}", request.audio_codec.as_str()));
    }
    if keys.is_empty() {
        None
    } else {
        Some(keys.join(","))
    }
}

/// Argument list for one download attempt.
pub fn build_download_args(request: &DownloadRequest, options: &CommandOptions) -> Vec<String> {
    let mut args = vec!["--newline".to_string(), "--progress".to_string()];

    if let Some(ffmpeg) = &options.ffmpeg_location {
        args.push("--ffmpeg-location".to_string());
        args.push(ffmpeg.to_string_lossy().into_owned());
    }

    if let Some(file) = &options.final_path_file {
        args.push("--print-to-file".to_string());
        args.push(FINAL_PATH_TEMPLATE.to_string());
        args.push(file.to_string_lossy().into_owned());
    }

    if request.format.is_audio_only() {
        args.extend(vec![
            "-x".to_string(),
            "--audio-format".to_string(),
            request.format.as_str().to_string(),
        ]);
        if request.audio_bitrate > 0 {
            args.push("--audio-quality".to_string());
            args.push(format!("{}K", request.audio_bitrate));
        }
    } else {
        args.push("-f".to_string());
        args.push(video_format_selector(request.resolution, request.fps));
        if !options.defer_container {
            args.push("--merge-output-format".to_string());
            args.push(request.format.as_str().to_string());
        }
    }

    if let Some(sort) = format_sort(request, options.include_audio_codec_sort) {
        args.push("-S".to_string());
        args.push(sort);
    }

    if options.use_cookies {
        push_cookies(&mut args, request.cookie_browser);
    }

    if options.hw_accel.is_active() {
        args.push("--postprocessor-args".to_string());
        args.push(format!("ffmpeg_i:-hwaccel {}", options.hw_accel));
    }

    args.push("-o".to_string());
    args.push(output_arg(&request.output_dir));
    args.push(request.url.clone());
    args
}

/// One JSON dump of the single video, nothing downloaded.
pub fn build_metadata_args(url: &str, cookie_browser: Option<Browser>) -> Vec<String> {
    let mut args = vec![
        "-J".to_string(),
        "--no-playlist".to_string(),
        "--skip-download".to_string(),
        "--no-warnings".to_string(),
    ];
    push_cookies(&mut args, cookie_browser);
    args.push(url.to_string());
    args
}

pub fn build_thumbnail_args(url: &str, dir: &Path, cookie_browser: Option<Browser>) -> Vec<String> {
    let mut args = vec![
        "--skip-download".to_string(),
        "--write-thumbnail".to_string(),
        "--convert-thumbnails".to_string(),
        THUMBNAIL_FORMAT.to_string(),
        "--no-playlist".to_string(),
        "-o".to_string(),
        output_arg(dir),
    ];
    push_cookies(&mut args, cookie_browser);
    args.push(url.to_string());
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::models::TargetFormat;
    use std::path::PathBuf;

    fn request() -> DownloadRequest {
        DownloadRequest::new("https://example.com/watch?v=1", "/downloads")
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|arg| arg == flag)
            .and_then(|idx| args.get(idx + 1))
            .map(String::as_str)
    }

    #[test]
    fn test_codec_normalization_is_total() {
        assert_eq!(normalize_video_codec("VP9"), VideoCodec::Vp9);
        assert_eq!(normalize_video_codec("mpeg2"), VideoCodec::Auto);
        assert_eq!(normalize_video_codec(""), VideoCodec::Auto);
        assert_eq!(normalize_audio_codec("mp4a"), AudioCodec::Mp4a);
        assert_eq!(normalize_audio_codec("flac"), AudioCodec::Auto);
    }

    #[test]
    fn test_cookie_browser_normalization() {
        assert_eq!(normalize_cookie_browser("Firefox"), Some(Browser::Firefox));
        assert_eq!(normalize_cookie_browser("default"), None);
        assert_eq!(normalize_cookie_browser(""), None);
        assert_eq!(normalize_cookie_browser("netscape"), None);
    }

    #[test]
    fn test_hwaccel_normalization() {
        let available = vec!["cuda".to_string(), "vaapi".to_string()];
        assert_eq!(normalize_hwaccel_mode("", &available), HwAccelMode::None);
        assert_eq!(normalize_hwaccel_mode("AUTO", &available), HwAccelMode::Auto);
        assert_eq!(normalize_hwaccel_mode("None", &available), HwAccelMode::None);
        assert_eq!(
            normalize_hwaccel_mode("CUDA", &available),
            HwAccelMode::Named("cuda".to_string())
        );
        assert_eq!(normalize_hwaccel_mode("qsv", &available), HwAccelMode::None);
        assert!(needs_hwaccel_probe("cuda"));
        assert!(!needs_hwaccel_probe("Auto"));
    }

    #[test]
    fn test_video_download_args() {
        let args = build_download_args(&request(), &CommandOptions::default());
        assert_eq!(&args[..2], &["--newline", "--progress"]);
        assert_eq!(
            value_after(&args, "-f"),
            Some("bestvideo[height<=1080][fps<=30]+bestaudio/best[height<=1080]/best")
        );
        assert_eq!(value_after(&args, "--merge-output-format"), Some("mp4"));
        assert!(!args.contains(&"-S".to_string()));
        assert!(!args.contains(&"--cookies-from-browser".to_string()));
        assert!(!args.contains(&"--postprocessor-args".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("https://example.com/watch?v=1"));
        // Ordinary attempts keep the merger, post-processor and playlist lines on screen
        assert!(!args.iter().any(|a| a.starts_with("--print")));
        let output = PathBuf::from(value_after(&args, "-o").unwrap());
        assert_eq!(output, Path::new("/downloads").join("%(title)s.%(ext)s"));
    }

    #[test]
    fn test_deferred_container_skips_merge_format() {
        let options = CommandOptions {
            defer_container: true,
            ..CommandOptions::default()
        };
        let args = build_download_args(&request(), &options);
        assert!(!args.contains(&"--merge-output-format".to_string()));
    }

    #[test]
    fn test_audio_download_args() {
        let mut req = request();
        req.format = TargetFormat::Mp3;
        req.audio_bitrate = 192;
        req.video_codec = VideoCodec::H264;
        let args = build_download_args(&req, &CommandOptions::default());
        assert!(args.contains(&"-x".to_string()));
        assert_eq!(value_after(&args, "--audio-format"), Some("mp3"));
        assert_eq!(value_after(&args, "--audio-quality"), Some("192K"));
        assert!(!args.contains(&"-f".to_string()));
        assert!(!args.contains(&"-S".to_string()));
    }

    #[test]
    fn test_sort_cookies_and_hwaccel_flags() {
        let mut req = request();
        req.video_codec = VideoCodec::Vp9;
        req.audio_codec = AudioCodec::Opus;
        req.cookie_browser = Some(Browser::Chrome);
        let options = CommandOptions {
            use_cookies: true,
            include_audio_codec_sort: true,
            final_path_file: Some(PathBuf::from("/downloads/.final-path")),
            ffmpeg_location: Some(PathBuf::from("/opt/ffmpeg")),
            hw_accel: HwAccelMode::Auto,
            ..CommandOptions::default()
        };
        let args = build_download_args(&req, &options);
        assert_eq!(value_after(&args, "-S"), Some("vcodec:vp9,acodec:opus"));
        assert_eq!(value_after(&args, "--cookies-from-browser"), Some("chrome"));
        assert_eq!(
            value_after(&args, "--postprocessor-args"),
            Some("ffmpeg_i:-hwaccel auto")
        );
        assert_eq!(value_after(&args, "--ffmpeg-location"), Some("/opt/ffmpeg"));
        let at = args.iter().position(|a| a == "--print-to-file").unwrap();
        assert_eq!(
            &args[at + 1..at + 3],
            &["after_move:filepath", "/downloads/.final-path"]
        );
        assert!(!args.contains(&"--print".to_string()));
    }

    #[test]
    fn test_audio_sort_hint_can_be_dropped() {
        let mut req = request();
        req.audio_codec = AudioCodec::Opus;
        let options = CommandOptions::default();
        let args = build_download_args(&req, &options);
        assert!(!args.contains(&"-S".to_string()));
    }

    #[test]
    fn test_cookies_need_enabled_flag_and_browser() {
        let mut req = request();
        req.cookie_browser = Some(Browser::Edge);
        let args = build_download_args(&req, &CommandOptions::default());
        assert!(!args.contains(&"--cookies-from-browser".to_string()));

        let options = CommandOptions {
            use_cookies: true,
            ..CommandOptions::default()
        };
        let args = build_download_args(&request(), &options);
        assert!(!args.contains(&"--cookies-from-browser".to_string()));
    }

    #[test]
    fn test_metadata_and_thumbnail_args() {
        let args = build_metadata_args("u", Some(Browser::Firefox));
        assert_eq!(
            args,
            vec![
                "-J",
                "--no-playlist",
                "--skip-download",
                "--no-warnings",
                "--cookies-from-browser",
                "firefox",
                "u"
            ]
        );

        let args = build_thumbnail_args("u", Path::new("/pics"), None);
        assert!(args.contains(&"--write-thumbnail".to_string()));
        assert_eq!(value_after(&args, "--convert-thumbnails"), Some("jpg"));
        assert!(!args.contains(&"--cookies-from-browser".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("u"));
    }
}
