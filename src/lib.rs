mod config;
pub mod downloader;
mod logging;
mod protocol;
mod ytdlp;

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinSet;

pub use config::EngineConfig;
pub use logging::DownloadLog;
pub use protocol::{DirectoryPicker, FixedDirectoryPicker, UiCommand};

use downloader::{
    CancelSession, Downloader, EngineEvent, ProcessExecutor, ProgressEmitter, ToolManager,
};
use protocol::resolve_save_path;

/// Engine wired to real processes, the download log and the configured tools.
pub fn build_downloader(config: &EngineConfig) -> Downloader {
    let session = Arc::new(CancelSession::new());
    let runner = Arc::new(ProcessExecutor::new(Arc::clone(&session)));
    Downloader::new(
        runner,
        session,
        ToolManager::new(config),
        Arc::new(DownloadLog::new(&config.log_dir)),
    )
    .with_grace_window(config.grace_window)
}

async fn write_events<W>(mut rx: UnboundedReceiver<EngineEvent>, mut out: W) -> io::Result<W>
where
    W: AsyncWrite + Unpin,
{
    while let Some(event) = rx.recv().await {
        out.write_all(format!("{}\n", event).as_bytes()).await?;
        out.flush().await?;
    }
    Ok(out)
}

fn dispatch(
    command: UiCommand,
    downloader: &Arc<Downloader>,
    config: &EngineConfig,
    picker: &dyn DirectoryPicker,
    tx: &UnboundedSender<EngineEvent>,
    jobs: &mut JoinSet<()>,
) {
    let emitter = ProgressEmitter::new(tx.clone());
    let platform_default = config.download_dir.as_deref();

    match command {
        UiCommand::Download(payload) => {
            let Some(dir) = resolve_save_path(
                payload.always_ask_directory,
                &payload.default_directory,
                platform_default,
                picker,
            ) else {
                tracing::info!("[engine] no download directory chosen, ignoring request");
                return;
            };
            let request = payload.to_request(dir);
            let downloader = Arc::clone(downloader);
            jobs.spawn(async move {
                downloader.download(&request, &emitter).await;
            });
        }
        UiCommand::Cancel => downloader.cancel(),
        UiCommand::FetchMetadata(payload) => {
            if payload.url.is_empty() {
                return;
            }
            let browser = ytdlp::normalize_cookie_browser(&payload.cookie_browser);
            let downloader = Arc::clone(downloader);
            jobs.spawn(async move {
                downloader
                    .fetch_metadata(&payload.url, browser, &emitter)
                    .await;
            });
        }
        UiCommand::DownloadThumbnail(payload) => {
            if payload.url.is_empty() {
                return;
            }
            let Some(dir) = resolve_save_path(
                payload.always_ask_directory,
                &payload.default_directory,
                platform_default,
                picker,
            ) else {
                tracing::info!("[engine] no thumbnail directory chosen, ignoring request");
                return;
            };
            let browser = ytdlp::normalize_cookie_browser(&payload.cookie_browser);
            let downloader = Arc::clone(downloader);
            jobs.spawn(async move {
                downloader
                    .download_thumbnail(&payload.url, &dir, browser, &emitter)
                    .await;
            });
        }
        UiCommand::RequestHardwareAccelerationOptions => {
            let downloader = Arc::clone(downloader);
            jobs.spawn(async move {
                let options = downloader.hardware_acceleration_options().await;
                emitter.emit(EngineEvent::HardwareAccelerationOptions(options));
            });
        }
        UiCommand::RequestDefaultDownloadDirectory => {
            let path = platform_default
                .map(|dir| dir.to_string_lossy().into_owned())
                .unwrap_or_default();
            emitter.emit(EngineEvent::DefaultDownloadDirectory(path));
        }
        UiCommand::Unknown(line) => {
            if !line.trim().is_empty() {
                tracing::debug!("[engine] ignoring unknown command: {}", line);
            }
        }
    }
}

/// Reads commands from `input` until EOF, writing protocol lines to `output`.
///
/// Every request runs as its own task and is never awaited by the reader, so
/// `cancel_download` is seen while a download is in flight. At EOF all
/// outstanding tasks are allowed to finish before `output` is handed back.
pub async fn serve<R, W>(
    downloader: Arc<Downloader>,
    config: &EngineConfig,
    picker: &dyn DirectoryPicker,
    input: R,
    output: W,
) -> io::Result<W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_events(rx, output));
    let mut jobs = JoinSet::new();

    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        dispatch(
            UiCommand::parse(&line),
            &downloader,
            config,
            picker,
            &tx,
            &mut jobs,
        );
    }

    while let Some(joined) = jobs.join_next().await {
        if let Err(e) = joined {
            tracing::error!("[engine] request task failed: {}", e);
        }
    }

    drop(tx);
    writer.await.map_err(io::Error::other)?
}

async fn log_tool_status(downloader: &Downloader) {
    for tool in downloader.tools().get_all_tools().await {
        match (&tool.path, &tool.version) {
            (Some(path), version) => tracing::info!(
                "[engine] {} at {} ({})",
                tool.name,
                path.display(),
                version.as_deref().unwrap_or("unknown version")
            ),
            (None, _) => tracing::warn!("[engine] {} not found", tool.name),
        }
    }
}

/// Headless entry point: commands on stdin, status lines on stdout.
pub fn run() -> io::Result<()> {
    let config = EngineConfig::from_env();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let downloader = Arc::new(build_downloader(&config));
        log_tool_status(&downloader).await;
        tracing::info!(
            "[engine] media-downloader v{} ready, payload v{}, log {}",
            env!("CARGO_PKG_VERSION"),
            protocol::PAYLOAD_VERSION,
            config.log_dir.display()
        );

        let picker = FixedDirectoryPicker::new(config.download_dir.clone());
        serve(
            downloader,
            &config,
            &picker,
            BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
        )
        .await
        .map(|_| ())
    })
}
