//! A line-oriented script language for exercising the VM pool.
//!
//! ```text
//! # comment
//! repeat 100      // run again every 100 ms
//! print hello     // append "hello" to <output>/<name>.log
//! print-args      // append the JSON arguments
//! sleep 50        // cooperative sleep, ends early on cancellation
//! fail boom       // fail the run
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use agora_core::{AgoraError, CompiledScript, ScriptContext, ScriptRuntime};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Print(String),
    PrintArgs,
    Sleep(Duration),
    Fail(String),
}

/// Compiled toy script.
#[derive(Debug)]
pub struct ToyScript {
    repeat: Option<Duration>,
    steps: Vec<Step>,
    runs: Arc<AtomicUsize>,
}

/// Runtime compiling toy scripts; counts runs across all scripts it compiled.
#[derive(Debug, Default)]
pub struct ToyScriptRuntime {
    runs: Arc<AtomicUsize>,
}

impl ToyScriptRuntime {
    /// Fresh runtime.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Completed or interrupted runs so far.
    #[must_use]
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

fn millis(arg: &str, line: usize) -> Result<Duration, AgoraError> {
    arg.trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| AgoraError::InvalidArg(format!("line {line}: expected milliseconds, got '{arg}'")))
}

impl ScriptRuntime for ToyScriptRuntime {
    fn compile(&self, name: &str, source: &str) -> Result<Arc<dyn CompiledScript>, AgoraError> {
        let mut repeat = None;
        let mut steps = Vec::new();
        for (idx, raw) in source.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (cmd, arg) = line.split_once(' ').unwrap_or((line, ""));
            match cmd {
                "repeat" => repeat = Some(millis(arg, idx + 1)?),
                "sleep" => steps.push(Step::Sleep(millis(arg, idx + 1)?)),
                "print" => steps.push(Step::Print(arg.to_string())),
                "print-args" => steps.push(Step::PrintArgs),
                "fail" => steps.push(Step::Fail(arg.to_string())),
                other => {
                    return Err(AgoraError::InvalidArg(format!(
                        "{name}: line {}: unknown command '{other}'",
                        idx + 1
                    )));
                }
            }
        }
        Ok(Arc::new(ToyScript {
            repeat: repeat.filter(|d| !d.is_zero()),
            steps,
            runs: Arc::clone(&self.runs),
        }))
    }
}

impl ToyScript {
    async fn append(ctx: &ScriptContext, text: &str) -> Result<(), AgoraError> {
        tokio::fs::create_dir_all(&ctx.output_dir).await?;
        let path = ctx.output_dir.join(format!("{}.log", ctx.name));
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(text.as_bytes()).await?;
        file.write_all(b"\n").await?;
        Ok(())
    }
}

#[async_trait]
impl CompiledScript for ToyScript {
    fn repeat_interval(&self) -> Option<Duration> {
        self.repeat
    }

    async fn run(&self, mut ctx: ScriptContext) -> Result<(), AgoraError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        for step in &self.steps {
            if ctx.is_cancelled() {
                return Ok(());
            }
            match step {
                Step::Print(text) => Self::append(&ctx, text).await?,
                Step::PrintArgs => {
                    let args = ctx
                        .args
                        .as_ref()
                        .map_or_else(|| "null".to_string(), ToString::to_string);
                    Self::append(&ctx, &args).await?;
                }
                Step::Sleep(d) => {
                    tokio::select! {
                        () = tokio::time::sleep(*d) => {}
                        () = ctx.cancelled() => return Ok(()),
                    }
                }
                Step::Fail(msg) => return Err(AgoraError::permanent("script", msg.clone())),
            }
        }
        Ok(())
    }
}
