use tracing_subscriber::EnvFilter;

fn main() {
    // stdout carries the status protocol, so diagnostics go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_ansi(false)
        .with_target(false)
        .init();

    if let Err(e) = media_downloader_lib::run() {
        eprintln!("media-downloader: {}", e);
        std::process::exit(1);
    }
}
