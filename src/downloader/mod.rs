// Downloader module - process execution, output parsing and the orchestrator

pub mod cancel;
pub mod errors;
pub mod events;
pub mod metadata;
pub mod models;
pub mod orchestrator;
pub mod parsers;
pub mod process;
pub mod state;
pub mod tools;
pub mod traits;
pub mod transcode;
pub mod utils;

pub use cancel::CancelSession;
pub use errors::{DownloadError, ExecutionError};
pub use events::EngineEvent;
pub use models::{DownloadRequest, Outcome, Phase, TargetFormat};
pub use orchestrator::Downloader;
pub use process::ProcessExecutor;
pub use tools::{ToolInfo, ToolManager, ToolType};
pub use traits::{ProgressEmitter, ToolRunner};
