// Transcode runner - one ffmpeg conversion, plus the `-hwaccels` probe

use std::fmt;
use std::path::{Path, PathBuf};

use tokio::sync::OnceCell;

use super::models::{AudioCodec, HwAccelMode, TargetFormat, VideoCodec};
use super::parsers;
use super::traits::ToolRunner;
use super::utils::run_capture;
use crate::logging::DownloadLog;

#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub format: TargetFormat,
    pub video_codec: VideoCodec,
    pub audio_codec: AudioCodec,
    /// kbps, 0 = leave to the encoder
    pub audio_bitrate: u32,
    pub hw_accel: HwAccelMode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeFailure {
    pub message: String,
    /// Output matched the ffmpeg hardware-acceleration failure signature
    pub hw_related: bool,
}

impl fmt::Display for TranscodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Audio encoder, falling back to a format default for audio-only targets.
fn audio_encoder(format: TargetFormat, codec: AudioCodec) -> Option<&'static str> {
    codec.ffmpeg_encoder().or(match format {
        TargetFormat::Mp3 => Some("libmp3lame"),
        TargetFormat::Wav => Some("pcm_s16le"),
        _ => None,
    })
}

pub fn build_transcode_args(request: &TranscodeRequest) -> Vec<String> {
    let mut args = vec!["-y".to_string()];

    if request.hw_accel.is_active() {
        args.push("-hwaccel".to_string());
        args.push(request.hw_accel.to_string());
    }

    args.push("-i".to_string());
    args.push(request.input.to_string_lossy().into_owned());

    let audio_only = request.format.is_audio_only();
    if audio_only {
        args.push("-vn".to_string());
    } else if let Some(encoder) = request.video_codec.ffmpeg_encoder() {
        args.push("-c:v".to_string());
        args.push(encoder.to_string());
    }

    if let Some(encoder) = audio_encoder(request.format, request.audio_codec) {
        args.push("-c:a".to_string());
        args.push(encoder.to_string());
    }

    if request.audio_bitrate > 0 {
        args.push("-b:a".to_string());
        args.push(format!("{}k", request.audio_bitrate));
    }

    args.push(request.output.to_string_lossy().into_owned());
    args
}

/// Runs one conversion to completion. Output is captured for the log and for
/// hardware failure detection; there is no progress reporting.
pub async fn convert(
    runner: &dyn ToolRunner,
    ffmpeg: &Path,
    request: &TranscodeRequest,
    log: &DownloadLog,
) -> Result<(), TranscodeFailure> {
    if request.input.as_os_str().is_empty() || request.output.as_os_str().is_empty() {
        return Err(TranscodeFailure {
            message: "Conversion paths are empty.".to_string(),
            hw_related: false,
        });
    }

    let args = build_transcode_args(request);
    log.write("ffmpeg", format!("run: {} {}", ffmpeg.display(), args.join(" ")));

    let (code, lines) = run_capture(runner, ffmpeg, &args, true)
        .await
        .map_err(|e| TranscodeFailure {
            message: format!("Failed to execute ffmpeg process: {}", e),
            hw_related: false,
        })?;

    for line in &lines {
        log.write("ffmpeg", line);
    }
    log.write("ffmpeg", format!("exit code {}", code));

    if code != 0 {
        return Err(TranscodeFailure {
            message: format!("ffmpeg exited with code {}.", code),
            hw_related: parsers::is_ffmpeg_hwaccel_failure(&lines),
        });
    }
    Ok(())
}

pub fn hwaccels_args() -> Vec<String> {
    ["-hide_banner", "-loglevel", "error", "-hwaccels"]
        .iter()
        .map(|arg| arg.to_string())
        .collect()
}

/// Keeps bare single-word lines, which is how ffmpeg lists accelerators
/// under its "Hardware acceleration methods:" header.
pub fn parse_hwaccel_options<S: AsRef<str>>(lines: &[S]) -> Vec<String> {
    let mut options: Vec<String> = lines
        .iter()
        .map(|line| line.as_ref().trim())
        .filter(|line| !line.is_empty() && !line.contains(' ') && !line.contains(':'))
        .map(str::to_ascii_lowercase)
        .collect();
    options.sort();
    options.dedup();
    options
}

/// Accelerators of the installed ffmpeg, probed once per engine.
#[derive(Debug, Default)]
pub struct HwAccelCatalog {
    options: OnceCell<Vec<String>>,
}

impl HwAccelCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, runner: &dyn ToolRunner, ffmpeg: Option<&Path>) -> &[String] {
        self.options
            .get_or_init(|| async {
                match ffmpeg {
                    Some(ffmpeg) => probe_hwaccels(runner, ffmpeg).await,
                    None => Vec::new(),
                }
            })
            .await
            .as_slice()
    }
}

async fn probe_hwaccels(runner: &dyn ToolRunner, ffmpeg: &Path) -> Vec<String> {
    match run_capture(runner, ffmpeg, &hwaccels_args(), false).await {
        Ok((0, lines)) => {
            let options = parse_hwaccel_options(&lines);
            tracing::info!("[ffmpeg] hardware accelerators: {:?}", options);
            options
        }
        Ok((code, _)) => {
            tracing::warn!("[ffmpeg] -hwaccels exited with code {}", code);
            Vec::new()
        }
        Err(e) => {
            tracing::warn!("[ffmpeg] -hwaccels failed: {}", e);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(format: TargetFormat) -> TranscodeRequest {
        TranscodeRequest {
            input: PathBuf::from("/media/in.mp4"),
            output: PathBuf::from("/media/out.webm"),
            format,
            video_codec: VideoCodec::Vp9,
            audio_codec: AudioCodec::Opus,
            audio_bitrate: 160,
            hw_accel: HwAccelMode::Named("cuda".into()),
        }
    }

    #[test]
    fn test_video_transcode_args() {
        let args = build_transcode_args(&request(TargetFormat::Webm));
        assert_eq!(
            args,
            vec![
                "-y",
                "-hwaccel",
                "cuda",
                "-i",
                "/media/in.mp4",
                "-c:v",
                "libvpx-vp9",
                "-c:a",
                "libopus",
                "-b:a",
                "160k",
                "/media/out.webm"
            ]
        );
    }

    #[test]
    fn test_audio_only_defaults() {
        let mut req = request(TargetFormat::Wav);
        req.audio_codec = AudioCodec::Auto;
        req.audio_bitrate = 0;
        req.hw_accel = HwAccelMode::None;
        let args = build_transcode_args(&req);
        assert_eq!(
            args,
            vec!["-y", "-i", "/media/in.mp4", "-vn", "-c:a", "pcm_s16le", "/media/out.webm"]
        );

        req.format = TargetFormat::Mp3;
        let args = build_transcode_args(&req);
        assert!(args.windows(2).any(|w| w[0] == "-c:a" && w[1] == "libmp3lame"));
    }

    #[test]
    fn test_auto_codecs_leave_encoders_alone() {
        let mut req = request(TargetFormat::Mkv);
        req.video_codec = VideoCodec::Auto;
        req.audio_codec = AudioCodec::Auto;
        let args = build_transcode_args(&req);
        assert!(!args.contains(&"-c:v".to_string()));
        assert!(!args.contains(&"-c:a".to_string()));
    }

    #[test]
    fn test_parse_hwaccel_listing() {
        let lines = [
            "Hardware acceleration methods:",
            "vdpau",
            "CUDA",
            "  vaapi  ",
            "",
            "cuda",
        ];
        assert_eq!(parse_hwaccel_options(&lines), vec!["cuda", "vaapi", "vdpau"]);
    }
}
