use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

/// Runs a notebook with a parameter mapping, writing the executed copy to
/// `output`.
#[async_trait]
pub trait NotebookExecutor: Send + Sync {
    async fn execute(&self, input: &Path, output: &Path, parameters: &Value) -> anyhow::Result<()>;
}

/// Executes notebooks with the `papermill` command line tool.
#[derive(Debug, Clone)]
pub struct PapermillCli {
    program: String,
    timeout: Option<Duration>,
}

impl PapermillCli {
    pub fn new(program: &str, timeout: Option<Duration>) -> Self {
        Self {
            program: program.to_string(),
            timeout,
        }
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    const KEEP: usize = 2000;
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    match text.char_indices().rev().nth(KEEP) {
        Some((cut, _)) => format!("...{}", &text[cut..]),
        None => text.to_string(),
    }
}

#[async_trait]
impl NotebookExecutor for PapermillCli {
    async fn execute(&self, input: &Path, output: &Path, parameters: &Value) -> anyhow::Result<()> {
        anyhow::ensure!(
            tokio::fs::try_exists(input).await.unwrap_or(false),
            "notebook {} does not exist",
            input.display()
        );
        if let Some(dir) = output.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("create output dir {}", dir.display()))?;
        }

        let mut cmd = Command::new(&self.program);
        cmd.arg(input)
            .arg(output)
            .arg("-y")
            .arg(serde_json::to_string(parameters)?)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        debug!(program = %self.program, input = %input.display(), output = %output.display(), "spawning papermill");

        let run = cmd.output();
        let out = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, run)
                .await
                .map_err(|_| anyhow::anyhow!("papermill timed out after {}s", limit.as_secs()))?,
            None => run.await,
        }
        .with_context(|| format!("spawn {}", self.program))?;

        if !out.status.success() {
            anyhow::bail!("papermill exited with {}: {}", out.status, stderr_tail(&out.stderr));
        }
        Ok(())
    }
}

#[cfg(test)]
pub use fake::FakeExecutor;


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn missing_notebook_fails_before_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let exec = PapermillCli::new("definitely-not-a-real-papermill", None);
        let err = exec
            .execute(&dir.path().join("missing.ipynb"), &dir.path().join("out.ipynb"), &json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[tokio::test]
    async fn missing_program_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("nb.ipynb");
        tokio::fs::write(&input, "{}").await.unwrap();
        let exec = PapermillCli::new("definitely-not-a-real-papermill", Some(Duration::from_secs(5)));
        let err = exec
            .execute(&input, &dir.path().join("out/nb.ipynb"), &json!({"n": 1}))
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("spawn definitely-not-a-real-papermill"));
        assert!(dir.path().join("out").is_dir());
    }

    #[test]
    fn stderr_tail_keeps_the_end() {
        let long = "x".repeat(5000) + "END";
        let tail = stderr_tail(long.as_bytes());
        assert!(tail.starts_with("..."));
        assert!(tail.ends_with("END"));
        assert_eq!(stderr_tail(b"  short \n"), "short");
    }

    #[tokio::test]
    async fn fake_records_calls() {
        let fake = FakeExecutor::failing("boom");
        let err = fake
            .execute(Path::new("a.ipynb"), Path::new("b.ipynb"), &json!({"n": 1}))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "boom");
        assert_eq!(fake.calls.lock().unwrap().len(), 1);
    }
}
