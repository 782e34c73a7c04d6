// Seams between the orchestrator and the outside world

use std::path::Path;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

use super::errors::ExecutionError;
use super::events::EngineEvent;

/// Runs an external tool and streams its combined output line by line.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Returns the raw exit code. Nonzero is an ordinary result, not an `Err`.
    ///
    /// With `cancellable` set, the process is tracked by the cancellation
    /// session for the duration of the call.
    async fn run(
        &self,
        program: &Path,
        args: &[String],
        cancellable: bool,
        on_line: &mut (dyn for<'l> FnMut(&'l str) + Send),
    ) -> Result<i32, ExecutionError>;
}

/// Progress emitter helper
#[derive(Debug, Clone)]
pub struct ProgressEmitter {
    tx: UnboundedSender<EngineEvent>,
}

impl ProgressEmitter {
    pub fn new(tx: UnboundedSender<EngineEvent>) -> Self {
        Self { tx }
    }

    /// Fire and forget; a closed UI channel must not stop a running job.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }
}
