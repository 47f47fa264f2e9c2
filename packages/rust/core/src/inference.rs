//! Text-generation boundary.
//!
//! The extraction engine talks to an [`InferenceClient`]; the default
//! implementation drives a local model CLI as a child process.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use firmscope_shared::{FirmscopeError, InferenceConfig, Result};

/// How long the availability check may take.
const CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Why an inference call produced no text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InferenceError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to start: {0}")]
    Spawn(String),
    #[error("exited with {code:?}: {stderr}")]
    Exit { code: Option<i32>, stderr: String },
    #[error("I/O error: {0}")]
    Io(String),
}

/// Capability: prompt in, free-form text out, bounded by `timeout`.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn infer(
        &self,
        prompt: &str,
        timeout: Duration,
    ) -> std::result::Result<String, InferenceError>;
}

// ---------------------------------------------------------------------------
// OllamaCli
// ---------------------------------------------------------------------------

/// Runs `<command> run <model>` with the prompt on stdin.
#[derive(Debug, Clone)]
pub struct OllamaCli {
    command: String,
    model: String,
}

impl OllamaCli {
    pub fn new(config: &InferenceConfig) -> Self {
        Self {
            command: config.command.clone(),
            model: config.model.clone(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Verify the CLI is installed and responsive (`<command> list`).
    #[instrument(skip(self), fields(command = %self.command))]
    pub async fn check_available(&self) -> Result<()> {
        let output = Command::new(&self.command)
            .arg("list")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(CHECK_TIMEOUT, output)
            .await
            .map_err(|_| {
                FirmscopeError::config(format!(
                    "`{} list` did not answer within {CHECK_TIMEOUT:?}",
                    self.command
                ))
            })?
            .map_err(|e| {
                FirmscopeError::config(format!(
                    "failed to run `{} list`: {e}. Is `{}` installed?",
                    self.command, self.command
                ))
            })?;

        if !output.status.success() {
            return Err(FirmscopeError::config(format!(
                "`{} list` failed: {}",
                self.command,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let listing = String::from_utf8_lossy(&output.stdout);
        if !listing.contains(&self.model) {
            warn!(model = %self.model, "model not listed locally; the first call may pull it");
        }
        info!("inference CLI available");
        Ok(())
    }
}

#[async_trait]
impl InferenceClient for OllamaCli {
    #[instrument(skip(self, prompt), fields(model = %self.model, prompt_len = prompt.len()))]
    async fn infer(
        &self,
        prompt: &str,
        timeout: Duration,
    ) -> std::result::Result<String, InferenceError> {
        let mut child = Command::new(&self.command)
            .arg("run")
            .arg(&self.model)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| InferenceError::Spawn(format!("{}: {e}", self.command)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| InferenceError::Io("stdin not captured".into()))?;
        let prompt = prompt.to_owned();
        let feed = async move {
            stdin.write_all(prompt.as_bytes()).await?;
            stdin.shutdown().await
        };

        // Dropping the child on timeout kills it.
        let run = async move {
            let (fed, output) = tokio::join!(feed, child.wait_with_output());
            if let Err(e) = fed {
                debug!(error = %e, "prompt write ended early");
            }
            output
        };
        let output = tokio::time::timeout(timeout, run)
            .await
            .map_err(|_| InferenceError::Timeout(timeout))?
            .map_err(|e| InferenceError::Io(e.to_string()))?;

        if !output.status.success() {
            return Err(InferenceError::Exit {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!(response_len = text.len(), "inference complete");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(command: &str) -> OllamaCli {
        OllamaCli::new(&InferenceConfig {
            command: command.into(),
            ..Default::default()
        })
    }

    /// Executable shell script standing in for the model CLI.
    #[cfg(unix)]
    fn fake_cli(dir: &tempfile::TempDir, body: &str) -> OllamaCli {
        use std::io::Write;
        use std::os::unix::fs::PermissionsExt;

        let path = dir.path().join("fake-model");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh\n{body}").unwrap();
        file.sync_all().unwrap();
        drop(file);
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        cli(path.to_str().unwrap())
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let client = cli("firmscope-no-such-binary");
        let err = client
            .infer("prompt", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, InferenceError::Spawn(_)));
    }

    #[tokio::test]
    async fn missing_binary_fails_the_check() {
        let err = cli("firmscope-no-such-binary")
            .check_available()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("firmscope-no-such-binary"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn prompt_is_sent_on_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let client = fake_cli(&dir, "cat");
        let text = client
            .infer("{\"company_name\": \"Acme\"}", Duration::from_secs(10))
            .await
            .expect("script echoes stdin");
        assert_eq!(text, "{\"company_name\": \"Acme\"}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_process_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let err = fake_cli(&dir, "sleep 5")
            .infer("prompt", Duration::from_millis(200))
            .await
            .unwrap_err();
        assert_eq!(err, InferenceError::Timeout(Duration::from_millis(200)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = fake_cli(&dir, "echo 'model not found' >&2\nexit 3")
            .infer("prompt", Duration::from_secs(10))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            InferenceError::Exit {
                code: Some(3),
                stderr: "model not found".into()
            }
        );
    }
}
