//! Contract between the script VM pool and a scripting language runtime.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use agora_types::{AgoraError, VmId};

/// Per-run context handed to a compiled script.
#[derive(Debug, Clone)]
pub struct ScriptContext {
    /// VM id assigned by the pool.
    pub vm_id: VmId,
    /// Script short name (file base).
    pub name: String,
    /// Directory the script may write output to.
    pub output_dir: PathBuf,
    /// Caller-supplied arguments for `run_with_context`.
    pub args: Option<serde_json::Value>,
    /// Flips to `true` when the run must stop.
    pub cancel: watch::Receiver<bool>,
}

impl ScriptContext {
    /// True once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolve when cancellation is requested.
    pub async fn cancelled(&mut self) {
        // A dropped sender also counts as cancellation.
        let _ = self.cancel.wait_for(|c| *c).await;
    }
}

/// A compiled script body.
#[async_trait]
pub trait CompiledScript: Send + Sync {
    /// Interval between repeated runs; `None` or zero makes the script one-shot.
    fn repeat_interval(&self) -> Option<Duration>;

    /// Execute the body once. Implementations should return promptly after
    /// `ctx.cancel` flips.
    async fn run(&self, ctx: ScriptContext) -> Result<(), AgoraError>;
}

/// A scripting language runtime.
pub trait ScriptRuntime: Send + Sync {
    /// File extension handled by the runtime, without the dot.
    fn extension(&self) -> &'static str {
        "gct"
    }

    /// Compile `source` for the script named `name`.
    fn compile(&self, name: &str, source: &str) -> Result<Arc<dyn CompiledScript>, AgoraError>;
}

/// Upload-time check of a script file.
pub trait ScriptValidator: Send + Sync {
    /// Accept or reject `source`.
    fn validate(&self, name: &str, source: &str) -> Result<(), AgoraError>;
}

/// Validator accepting whatever the runtime compiles.
pub struct CompileValidator {
    runtime: Arc<dyn ScriptRuntime>,
}

impl CompileValidator {
    /// Validate with `runtime`.
    pub fn new(runtime: Arc<dyn ScriptRuntime>) -> Self {
        Self { runtime }
    }
}

impl ScriptValidator for CompileValidator {
    fn validate(&self, name: &str, source: &str) -> Result<(), AgoraError> {
        self.runtime.compile(name, source).map(|_| ())
    }
}
