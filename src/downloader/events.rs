// Engine -> UI messages
//
// Every event renders to one line of the textual protocol the UI listens to,
// e.g. `status:progress:42` or `metadata:error:<url>`.

use std::fmt;

use super::models::{Outcome, Phase};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Phase(Phase),
    Progress(u8),
    Playlist { current: u32, total: u32 },
    Finished(Outcome),
    ThumbnailDone,
    ThumbnailError,
    MetadataSuccess {
        url: String,
        resolutions: Vec<u32>,
        fps: Vec<u32>,
        bitrates: Vec<u32>,
        thumbnail: String,
    },
    MetadataError { url: String },
    HardwareAccelerationOptions(Vec<String>),
    DefaultDownloadDirectory(String),
}

impl EngineEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished(_))
    }
}

fn join_numbers(values: &[u32]) -> String {
    values
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

impl fmt::Display for EngineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Phase(phase) => write!(f, "status:{}", phase.as_str()),
            Self::Progress(value) => write!(f, "status:progress:{}", value),
            Self::Playlist { current, total } => write!(f, "status:playlist:{}:{}", current, total),
            Self::Finished(Outcome::Done) => write!(f, "status:done"),
            Self::Finished(Outcome::Error) => write!(f, "status:error"),
            Self::Finished(Outcome::Canceled) => write!(f, "status:canceled"),
            Self::ThumbnailDone => write!(f, "thumbnail:done"),
            Self::ThumbnailError => write!(f, "thumbnail:error"),
            Self::MetadataSuccess {
                url,
                resolutions,
                fps,
                bitrates,
                thumbnail,
            } => write!(
                f,
                "metadata:success:{}|{}|{}|{}|{}",
                url,
                join_numbers(resolutions),
                join_numbers(fps),
                join_numbers(bitrates),
                thumbnail
            ),
            Self::MetadataError { url } => write!(f, "metadata:error:{}", url),
            Self::HardwareAccelerationOptions(options) => {
                write!(f, "hardware_acceleration_options:{}", options.join(","))
            }
            Self::DefaultDownloadDirectory(path) => write!(f, "default_download_directory:{}", path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_lines() {
        assert_eq!(EngineEvent::Phase(Phase::Merging).to_string(), "status:merging");
        assert_eq!(EngineEvent::Progress(100).to_string(), "status:progress:100");
        assert_eq!(EngineEvent::Progress(0).to_string(), "status:progress:0");
        assert_eq!(
            EngineEvent::Playlist { current: 3, total: 12 }.to_string(),
            "status:playlist:3:12"
        );
        assert_eq!(EngineEvent::Finished(Outcome::Canceled).to_string(), "status:canceled");
    }

    #[test]
    fn test_metadata_success_line() {
        let event = EngineEvent::MetadataSuccess {
            url: "https://example.com/v".into(),
            resolutions: vec![360, 720, 1080],
            fps: vec![30],
            bitrates: vec![],
            thumbnail: "https://i.example.com/t.jpg".into(),
        };
        assert_eq!(
            event.to_string(),
            "metadata:success:https://example.com/v|360,720,1080|30||https://i.example.com/t.jpg"
        );
    }
}
