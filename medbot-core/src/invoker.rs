//! Runs external analysis programs and hands back the first line they print.
//!
//! An analysis program is an independently maintained script (usually Python) that receives its
//! inputs as positional arguments and writes a single textual result to stdout. The invoker never
//! waits forever: every call is bounded by a timeout, and the child process is killed when the
//! call times out, is cancelled, or the waiting future is dropped.

use serde::de::DeserializeOwned;
use std::future::{Future, pending};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::InvokeError;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// An interpreter plus the script it runs, e.g. `python3 scripts/analyze_text.py`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisProgram {
    pub interpreter: PathBuf,
    pub script: PathBuf,
}

impl AnalysisProgram {
    pub fn new(interpreter: impl Into<PathBuf>, script: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            script: script.into(),
        }
    }

    pub fn name(&self) -> String {
        self.script.display().to_string()
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisInvoker {
    timeout: Duration,
}

impl Default for AnalysisInvoker {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl AnalysisInvoker {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `program` with `args` and return its first stdout line verbatim.
    pub async fn invoke(
        &self,
        program: &AnalysisProgram,
        args: &[&str],
    ) -> Result<String, InvokeError> {
        self.invoke_until(program, args, pending()).await
    }

    /// Like [`invoke`](Self::invoke), but gives up and kills the child as soon as `cancel`
    /// completes.
    pub async fn invoke_until<C>(
        &self,
        program: &AnalysisProgram,
        args: &[&str],
        cancel: C,
    ) -> Result<String, InvokeError>
    where
        C: Future<Output = ()>,
    {
        let name = program.name();
        debug!(program = %name, args = args.len(), "Starting analysis program");

        // The OS cannot pass NUL inside an argument.
        if let Some(index) = args.iter().position(|arg| arg.contains('\0')) {
            return Err(InvokeError::InvalidArgument {
                program: name,
                index,
            });
        }

        let child = Command::new(&program.interpreter)
            .arg(&program.script)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| InvokeError::Spawn {
                program: name.clone(),
                source,
            })?;

        // Dropping the child (timeout, cancel, or the caller going away) kills the process.
        let output = tokio::select! {
            output = tokio::time::timeout(self.timeout, child.wait_with_output()) => match output {
                Ok(Ok(output)) => output,
                Ok(Err(source)) => {
                    return Err(InvokeError::Spawn { program: name, source });
                }
                Err(_) => {
                    warn!(program = %name, timeout = ?self.timeout, "Analysis program timed out");
                    return Err(InvokeError::TimedOut { program: name, timeout: self.timeout });
                }
            },
            _ = cancel => {
                warn!(program = %name, "Analysis program cancelled");
                return Err(InvokeError::Cancelled { program: name });
            }
        };

        if !output.status.success() {
            return Err(InvokeError::Failed {
                program: name,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        match stdout.lines().next() {
            Some(line) => Ok(line.to_string()),
            None => Err(InvokeError::NoOutput { program: name }),
        }
    }

    /// Run `program` and decode its first stdout line as JSON.
    pub async fn invoke_json<T>(
        &self,
        program: &AnalysisProgram,
        args: &[&str],
    ) -> Result<T, InvokeError>
    where
        T: DeserializeOwned,
    {
        let line = self.invoke(program, args).await?;
        serde_json::from_str(&line).map_err(|e| InvokeError::MalformedOutput {
            program: program.name(),
            reason: e.to_string(),
        })
    }
}
