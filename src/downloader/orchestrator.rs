// Orchestrator with fallback logic
//
// One `download` call walks: probe -> pick fallback -> attempt (with cookies,
// hwaccel retry nested) -> attempt without cookies -> optional post-conversion
// -> exactly one terminal status.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use super::cancel::CancelSession;
use super::errors::DownloadError;
use super::events::EngineEvent;
use super::metadata::{self, MediaProbeResult, UHD_HEIGHT};
use super::models::{
    AudioCodec, Browser, CommandOptions, DownloadRequest, HwAccelMode, Outcome, Phase,
};
use super::parsers;
use super::state::ExecutionState;
use super::tools::{ToolManager, ToolType};
use super::traits::{ProgressEmitter, ToolRunner};
use super::transcode::{self, HwAccelCatalog, TranscodeRequest};
use super::utils::{find_downloaded_file, run_capture};
use crate::config::DEFAULT_GRACE_WINDOW;
use crate::logging::DownloadLog;
use crate::ytdlp;

/// Which conversion the download needs afterwards
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FallbackPlan {
    /// 4K exists only in another container: download as-is, convert later
    pub defer_container: bool,
    /// Requested audio codec is not offered upstream: re-encode later
    pub transcode_audio: bool,
}

impl FallbackPlan {
    pub fn needs_conversion(&self) -> bool {
        self.defer_container || self.transcode_audio
    }
}

pub fn choose_fallback(request: &DownloadRequest, probe: &MediaProbeResult) -> FallbackPlan {
    FallbackPlan {
        defer_container: request.resolution >= UHD_HEIGHT && probe.has_4k && !probe.has_4k_in_target,
        transcode_audio: request.audio_codec != AudioCodec::Auto && !probe.audio_codec_available,
    }
}

/// Event sink for one run.
///
/// Attempts restart their own parsing state, but what the UI sees is per run:
/// progress never goes backwards and a phase is only sent when it changes.
struct RunReporter<'a> {
    emitter: &'a ProgressEmitter,
    state: ExecutionState,
    phase: Option<Phase>,
    last_progress: Option<u8>,
}

impl<'a> RunReporter<'a> {
    fn new(emitter: &'a ProgressEmitter) -> Self {
        Self {
            emitter,
            state: ExecutionState::new(),
            phase: None,
            last_progress: None,
        }
    }

    fn emit(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Progress(value) => {
                if self.last_progress.is_some_and(|last| value <= last) {
                    return;
                }
                self.last_progress = Some(value);
            }
            EngineEvent::Phase(phase) => {
                if self.phase == Some(phase) {
                    return;
                }
                self.phase = Some(phase);
            }
            _ => {}
        }
        self.emitter.emit(event);
    }

    fn emit_all(&mut self, events: Vec<EngineEvent>) {
        for event in events {
            self.emit(event);
        }
    }

    /// A retry starts downloading again, even if the UI was left on merging.
    fn begin_attempt(&mut self) {
        self.state.reset();
        self.emit(EngineEvent::Phase(Phase::Downloading));
    }

    fn ingest(&mut self, line: &str) {
        let mut events = Vec::new();
        self.state.ingest(line, &mut events);
        self.emit_all(events);
    }
}

static FINAL_PATH_FILES: AtomicU64 = AtomicU64::new(0);

/// Hidden, per-run file in the output directory for `--print-to-file`.
fn final_path_file(dir: &Path) -> PathBuf {
    let n = FINAL_PATH_FILES.fetch_add(1, Ordering::Relaxed);
    dir.join(format!(".media-downloader-{}-{}.path", std::process::id(), n))
}

/// Last path yt-dlp wrote to `file`. The file is removed either way.
fn take_printed_path(file: &Path) -> Option<PathBuf> {
    let content = std::fs::read_to_string(file).ok();
    if let Err(e) = std::fs::remove_file(file) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("[download] could not remove {}: {}", file.display(), e);
        }
    }
    content?
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(PathBuf::from)
}

struct AttemptReport {
    code: i32,
    hw_failure: bool,
    final_path: Option<PathBuf>,
}

pub struct Downloader {
    runner: Arc<dyn ToolRunner>,
    session: Arc<CancelSession>,
    tools: ToolManager,
    log: Arc<DownloadLog>,
    hwaccels: HwAccelCatalog,
    grace_window: Duration,
}

impl Downloader {
    pub fn new(
        runner: Arc<dyn ToolRunner>,
        session: Arc<CancelSession>,
        tools: ToolManager,
        log: Arc<DownloadLog>,
    ) -> Self {
        Self {
            runner,
            session,
            tools,
            log,
            hwaccels: HwAccelCatalog::new(),
            grace_window: DEFAULT_GRACE_WINDOW,
        }
    }

    pub fn with_grace_window(mut self, grace_window: Duration) -> Self {
        self.grace_window = grace_window;
        self
    }

    pub fn session(&self) -> &Arc<CancelSession> {
        &self.session
    }

    pub fn tools(&self) -> &ToolManager {
        &self.tools
    }

    pub fn cancel(&self) {
        self.log.write("download", "cancel requested");
        self.session.cancel();
    }

    /// Runs one download to its end and emits exactly one terminal status.
    pub async fn download(&self, request: &DownloadRequest, emitter: &ProgressEmitter) -> Outcome {
        let mut reporter = RunReporter::new(emitter);
        self.log.write(
            "download",
            format!(
                "start {} (format {}, {}p, {} fps, vcodec {}, acodec {}, bitrate {}, hwaccel '{}') -> {}",
                request.url,
                request.format,
                request.resolution,
                request.fps,
                request.video_codec.as_str(),
                request.audio_codec.as_str(),
                request.audio_bitrate,
                request.hw_accel,
                request.output_dir.display()
            ),
        );

        let outcome = match self.drive(request, &mut reporter).await {
            Ok(()) => {
                reporter.emit(EngineEvent::Progress(100));
                Outcome::Done
            }
            Err(DownloadError::Canceled) => Outcome::Canceled,
            Err(e) if self.session.is_requested() => {
                self.log.write("download", format!("stopped after cancel: {}", e));
                Outcome::Canceled
            }
            Err(e) => {
                tracing::error!("[download] {} failed: {}", request.url, e);
                self.log.write("download", format!("failed: {}", e));
                Outcome::Error
            }
        };

        self.log.write("download", format!("finished: {:?}", outcome));
        reporter.emit(EngineEvent::Finished(outcome));
        outcome
    }

    async fn drive(
        &self,
        request: &DownloadRequest,
        reporter: &mut RunReporter<'_>,
    ) -> Result<(), DownloadError> {
        self.session.reset();
        if self.session.is_requested() {
            return Err(DownloadError::Canceled);
        }

        reporter.emit(EngineEvent::Phase(Phase::Downloading));
        reporter.emit(EngineEvent::Progress(0));

        if request.url.trim().is_empty() {
            return Err(DownloadError::EmptyUrl);
        }
        let ytdlp = self
            .tools
            .resolve(ToolType::YtDlp)
            .ok_or_else(|| DownloadError::ToolNotFound("yt-dlp".to_string()))?;
        if request.output_dir.as_os_str().is_empty() {
            return Err(DownloadError::MissingOutputDirectory);
        }
        let ffmpeg = self.tools.resolve(ToolType::Ffmpeg);

        let mut hw = self.resolve_hw_mode(&request.hw_accel, ffmpeg.as_deref()).await;
        let plan = self.plan_fallback(request, &ytdlp, ffmpeg.is_some()).await;
        if self.session.is_requested() {
            return Err(DownloadError::Canceled);
        }

        // Only a conversion pass needs to know where the download landed
        let path_file = plan
            .needs_conversion()
            .then(|| final_path_file(&request.output_dir));
        let options = self.command_options(plan, &hw, ffmpeg.as_deref(), path_file.clone());

        let started_at = SystemTime::now();
        let downloaded = self
            .download_with_fallbacks(request, &ytdlp, options, &mut hw, reporter)
            .await;
        let printed = path_file.as_deref().and_then(take_printed_path);
        let announced = downloaded?;

        if !plan.needs_conversion() {
            return Ok(());
        }
        if self.session.is_requested() {
            return Err(DownloadError::Canceled);
        }
        let ffmpeg = ffmpeg.ok_or_else(|| DownloadError::ToolNotFound("ffmpeg".to_string()))?;
        self.post_convert(
            request,
            &ffmpeg,
            printed.or(announced),
            started_at,
            &mut hw,
            reporter,
        )
        .await
    }

    async fn resolve_hw_mode(&self, raw: &str, ffmpeg: Option<&Path>) -> HwAccelMode {
        if !ytdlp::needs_hwaccel_probe(raw) {
            return ytdlp::normalize_hwaccel_mode::<String>(raw, &[]);
        }

        let available = self.hwaccels.get(self.runner.as_ref(), ffmpeg).await;
        let mode = ytdlp::normalize_hwaccel_mode(raw, available);
        if !mode.is_active() {
            self.log.write(
                "download",
                format!("hardware acceleration '{}' not offered by ffmpeg, using none", raw),
            );
        }
        mode
    }

    async fn plan_fallback(
        &self,
        request: &DownloadRequest,
        ytdlp: &Path,
        ffmpeg_available: bool,
    ) -> FallbackPlan {
        if request.format.is_audio_only() {
            return FallbackPlan::default();
        }

        let metadata = match metadata::fetch_metadata(
            self.runner.as_ref(),
            ytdlp,
            &request.url,
            request.cookie_browser,
            true,
            &self.log,
        )
        .await
        {
            Ok(metadata) => metadata,
            Err(e) => {
                self.log
                    .write("download", format!("metadata probe failed, no fallback: {}", e));
                return FallbackPlan::default();
            }
        };

        let probe = MediaProbeResult::from_metadata(&metadata, request);
        let plan = choose_fallback(request, &probe);
        self.log.write("download", format!("probe {:?} -> {:?}", probe, plan));

        if plan.needs_conversion() && !ffmpeg_available {
            self.log
                .write("download", "fallback needs ffmpeg, which was not found; proceeding without it");
            return FallbackPlan::default();
        }
        plan
    }

    fn command_options(
        &self,
        plan: FallbackPlan,
        hw: &HwAccelMode,
        ffmpeg: Option<&Path>,
        final_path_file: Option<PathBuf>,
    ) -> CommandOptions {
        CommandOptions {
            use_cookies: true,
            defer_container: plan.defer_container,
            // Sorting on a codec upstream doesn't have only skews selection
            include_audio_codec_sort: !plan.transcode_audio,
            final_path_file,
            ffmpeg_location: ffmpeg.map(Path::to_path_buf),
            hw_accel: hw.clone(),
        }
    }

    async fn download_with_fallbacks(
        &self,
        request: &DownloadRequest,
        ytdlp: &Path,
        options: CommandOptions,
        hw: &mut HwAccelMode,
        reporter: &mut RunReporter<'_>,
    ) -> Result<Option<PathBuf>, DownloadError> {
        let err = match self
            .attempt_with_hw_fallback(request, ytdlp, options.clone(), hw, reporter)
            .await
        {
            Ok(path) => return Ok(path),
            Err(e) => e,
        };

        if err.is_canceled() || self.session.is_requested() {
            return Err(DownloadError::Canceled);
        }
        if err.is_setup_failure() || request.cookie_browser.is_none() {
            return Err(err);
        }

        self.log
            .write("download", format!("{}; retrying without cookies", err));
        let options = CommandOptions {
            use_cookies: false,
            hw_accel: hw.clone(),
            ..options
        };
        match self
            .attempt_with_hw_fallback(request, ytdlp, options, hw, reporter)
            .await
        {
            Ok(path) => Ok(path),
            Err(_) if self.session.is_requested() => Err(DownloadError::Canceled),
            Err(e) => Err(e),
        }
    }

    /// One attempt, retried once with hwaccel off when the failure points at it.
    async fn attempt_with_hw_fallback(
        &self,
        request: &DownloadRequest,
        ytdlp: &Path,
        options: CommandOptions,
        hw: &mut HwAccelMode,
        reporter: &mut RunReporter<'_>,
    ) -> Result<Option<PathBuf>, DownloadError> {
        let report = self.run_attempt(request, ytdlp, &options, reporter).await?;
        if report.code == 0 {
            return Ok(report.final_path);
        }
        if self.session.is_requested() {
            return Err(DownloadError::Canceled);
        }
        if !(options.hw_accel.is_active() && report.hw_failure) {
            return Err(DownloadError::AttemptFailed {
                tool: "yt-dlp",
                code: report.code,
            });
        }

        self.log.write(
            "download",
            format!(
                "hardware acceleration '{}' failed, retrying with none",
                options.hw_accel
            ),
        );
        let retry_options = CommandOptions {
            hw_accel: HwAccelMode::None,
            ..options
        };
        let retry = self.run_attempt(request, ytdlp, &retry_options, reporter).await?;
        if retry.code == 0 {
            self.log
                .write("download", "hardware acceleration disabled for the rest of this run");
            *hw = HwAccelMode::None;
            return Ok(retry.final_path);
        }
        if self.session.is_requested() {
            return Err(DownloadError::Canceled);
        }
        Err(DownloadError::AttemptFailed {
            tool: "yt-dlp",
            code: retry.code,
        })
    }

    async fn run_attempt(
        &self,
        request: &DownloadRequest,
        ytdlp: &Path,
        options: &CommandOptions,
        reporter: &mut RunReporter<'_>,
    ) -> Result<AttemptReport, DownloadError> {
        let args = ytdlp::build_download_args(request, options);
        self.log.write(
            "download",
            format!(
                "attempt (cookies: {}, hwaccel: {}, deferred: {}): {} {}",
                options.use_cookies && request.cookie_browser.is_some(),
                options.hw_accel,
                options.defer_container,
                ytdlp.display(),
                args.join(" ")
            ),
        );

        reporter.begin_attempt();
        let log = self.log.as_ref();
        let mut hw_failure = false;
        let code = {
            let mut on_line = |line: &str| {
                log.write("yt-dlp", line);
                if parsers::is_hwaccel_failure(&[line]) {
                    hw_failure = true;
                }
                reporter.ingest(line);
            };
            self.runner.run(ytdlp, &args, true, &mut on_line).await?
        };

        self.log.write("download", format!("yt-dlp exited with code {}", code));
        Ok(AttemptReport {
            code,
            hw_failure,
            final_path: reporter.state.final_path.clone(),
        })
    }

    async fn post_convert(
        &self,
        request: &DownloadRequest,
        ffmpeg: &Path,
        printed: Option<PathBuf>,
        started_at: SystemTime,
        hw: &mut HwAccelMode,
        reporter: &mut RunReporter<'_>,
    ) -> Result<(), DownloadError> {
        let source = find_downloaded_file(
            &request.output_dir,
            printed.as_deref(),
            started_at,
            self.grace_window,
        )
        .ok_or_else(|| DownloadError::PathResolution(request.output_dir.clone()))?;

        let target = source.with_extension(request.format.as_str());
        let in_place = target == source;
        let output = if in_place {
            source.with_extension(format!("transcoding.{}", request.format.as_str()))
        } else {
            target.clone()
        };
        self.log.write(
            "download",
            format!("converting {} -> {}", source.display(), target.display()),
        );

        reporter.emit(EngineEvent::Phase(Phase::Converting));

        let mut job = TranscodeRequest {
            input: source.clone(),
            output: output.clone(),
            format: request.format,
            video_codec: request.video_codec,
            audio_codec: request.audio_codec,
            audio_bitrate: request.audio_bitrate,
            hw_accel: hw.clone(),
        };

        if let Err(failure) = transcode::convert(self.runner.as_ref(), ffmpeg, &job, &self.log).await {
            if self.session.is_requested() {
                return Err(DownloadError::Canceled);
            }
            if !(failure.hw_related && job.hw_accel.is_active()) {
                return Err(DownloadError::Transcode(failure.message));
            }

            self.log.write(
                "download",
                format!("{} (hardware related), retrying without acceleration", failure),
            );
            job.hw_accel = HwAccelMode::None;
            *hw = HwAccelMode::None;
            if let Err(failure) =
                transcode::convert(self.runner.as_ref(), ffmpeg, &job, &self.log).await
            {
                if self.session.is_requested() {
                    return Err(DownloadError::Canceled);
                }
                return Err(DownloadError::Transcode(failure.message));
            }
        }

        if in_place {
            std::fs::rename(&output, &target).map_err(|e| {
                DownloadError::Transcode(format!("cannot replace {}: {}", target.display(), e))
            })?;
        } else if let Err(e) = std::fs::remove_file(&source) {
            self.log.write(
                "download",
                format!("could not remove intermediate {}: {}", source.display(), e),
            );
        }

        self.log.write("download", format!("converted file: {}", target.display()));
        Ok(())
    }

    /// `metadata:success` or `metadata:error` for the UI.
    pub async fn fetch_metadata(
        &self,
        url: &str,
        cookie_browser: Option<Browser>,
        emitter: &ProgressEmitter,
    ) {
        let result = match self.tools.resolve(ToolType::YtDlp) {
            Some(ytdlp) => {
                metadata::fetch_metadata(
                    self.runner.as_ref(),
                    &ytdlp,
                    url,
                    cookie_browser,
                    false,
                    &self.log,
                )
                .await
            }
            None => Err(DownloadError::ToolNotFound("yt-dlp".to_string())),
        };

        let event = match result {
            Ok(metadata) => EngineEvent::MetadataSuccess {
                url: url.to_string(),
                resolutions: metadata.resolutions,
                fps: metadata.fps,
                bitrates: metadata.audio_bitrates,
                thumbnail: metadata.thumbnail_url,
            },
            Err(e) => {
                self.log.write("metadata", format!("{} failed: {}", url, e));
                EngineEvent::MetadataError {
                    url: url.to_string(),
                }
            }
        };
        emitter.emit(event);
    }

    async fn thumbnail_attempt(
        &self,
        ytdlp: &Path,
        url: &str,
        dir: &Path,
        cookie_browser: Option<Browser>,
    ) -> bool {
        let args = ytdlp::build_thumbnail_args(url, dir, cookie_browser);
        self.log
            .write("thumbnail", format!("run: {} {}", ytdlp.display(), args.join(" ")));

        match run_capture(self.runner.as_ref(), ytdlp, &args, false).await {
            Ok((code, lines)) => {
                for line in &lines {
                    self.log.write("yt-dlp", line);
                }
                self.log.write("thumbnail", format!("exit code {}", code));
                code == 0
            }
            Err(e) => {
                self.log.write("thumbnail", format!("failed: {}", e));
                false
            }
        }
    }

    /// `thumbnail:done` or `thumbnail:error` for the UI.
    pub async fn download_thumbnail(
        &self,
        url: &str,
        dir: &Path,
        cookie_browser: Option<Browser>,
        emitter: &ProgressEmitter,
    ) {
        let succeeded = match self.tools.resolve(ToolType::YtDlp) {
            Some(ytdlp) => {
                let mut ok = self.thumbnail_attempt(&ytdlp, url, dir, cookie_browser).await;
                if !ok && cookie_browser.is_some() {
                    self.log.write("thumbnail", "retrying without cookies");
                    ok = self.thumbnail_attempt(&ytdlp, url, dir, None).await;
                }
                ok
            }
            None => {
                self.log.write("thumbnail", "yt-dlp not found");
                false
            }
        };

        emitter.emit(if succeeded {
            EngineEvent::ThumbnailDone
        } else {
            EngineEvent::ThumbnailError
        });
    }

    /// "none" first, then whatever the installed ffmpeg offers.
    pub async fn hardware_acceleration_options(&self) -> Vec<String> {
        let ffmpeg = self.tools.resolve(ToolType::Ffmpeg);
        let mut options = vec!["none".to_string()];
        options.extend(
            self.hwaccels
                .get(self.runner.as_ref(), ffmpeg.as_deref())
                .await
                .iter()
                .filter(|option| option.as_str() != "none")
                .cloned(),
        );
        options
    }
}
