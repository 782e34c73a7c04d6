// Error types for the download engine

use std::path::PathBuf;

use thiserror::Error;

/// Fatal failures while launching or draining a child process.
///
/// A nonzero exit code is not an `ExecutionError`; the executor returns it as
/// a plain value and the caller decides whether to fall back.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Could not create the shared stdout/stderr pipe
    #[error("failed to create output pipe: {0}")]
    PipeCreation(#[source] std::io::Error),

    /// The OS refused to start the process
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Waiting for the exit status failed
    #[error("failed to wait for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum DownloadError {
    /// yt-dlp or ffmpeg not found
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("no output directory was provided")]
    MissingOutputDirectory,

    #[error("no url was provided")]
    EmptyUrl,

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// The tool ran and exited nonzero
    #[error("{tool} exited with code {code}")]
    AttemptFailed { tool: &'static str, code: i32 },

    /// Metadata dump failed or held no usable payload
    #[error("metadata probe failed: {0}")]
    Probe(String),

    /// The downloaded file could not be located for post-conversion
    #[error("could not locate the downloaded file in {0}")]
    PathResolution(PathBuf),

    #[error("conversion failed: {0}")]
    Transcode(String),

    #[error("canceled by user")]
    Canceled,
}

impl DownloadError {
    /// Setup failures end the attempt without any retry.
    pub fn is_setup_failure(&self) -> bool {
        matches!(
            self,
            Self::ToolNotFound(_)
                | Self::MissingOutputDirectory
                | Self::EmptyUrl
                | Self::Execution(_)
        )
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_failure_taxonomy() {
        assert!(DownloadError::ToolNotFound("yt-dlp".into()).is_setup_failure());
        assert!(DownloadError::MissingOutputDirectory.is_setup_failure());
        let spawn = ExecutionError::Spawn {
            program: "yt-dlp".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(DownloadError::from(spawn).is_setup_failure());
        assert!(!DownloadError::AttemptFailed { tool: "yt-dlp", code: 1 }.is_setup_failure());
        assert!(!DownloadError::Canceled.is_setup_failure());
    }

    #[test]
    fn test_attempt_failure_message_has_exit_code() {
        let err = DownloadError::AttemptFailed { tool: "ffmpeg", code: 187 };
        assert_eq!(err.to_string(), "ffmpeg exited with code 187");
    }
}
