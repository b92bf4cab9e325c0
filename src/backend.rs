use std::process::Stdio;

use anyhow::Context as _;
use async_trait::async_trait;
use tokio::io::AsyncWriteExt as _;

/// Generative text backend. One prompt in, one block of text out.
///
/// Implementations hold no build state; retries and pacing are the caller's job.
#[async_trait]
pub trait TextBackend: Send + Sync {
    async fn generate(&self, prompt: &str) -> anyhow::Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LlmEngine {
    /// Deterministic offline text; the outline always falls back.
    Noop,
    /// External program: prompt on stdin, text on stdout.
    Command,
    /// OpenAI Responses API.
    Openai,
}

/// Offline backend producing placeholder prose derived from the prompt.
#[derive(Debug, Clone, Default)]
pub struct NoopBackend;

#[async_trait]
impl TextBackend for NoopBackend {
    async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        let subject = prompt
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or("this section");
        Ok(format!(
            "This placeholder text was produced without a language model.\n\n\
It stands in for: {subject}\n"
        ))
    }
}

#[derive(Debug, Clone)]
pub struct CommandBackend {
    program: String,
    args: Vec<String>,
}

impl CommandBackend {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl TextBackend for CommandBackend {
    async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        let program = self.program.as_str();
        tracing::debug!(engine = "command", command = program, "generate");

        let mut child = tokio::process::Command::new(program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawn generator command: {program}"))?;

        {
            let mut stdin = child.stdin.take().context("open generator stdin")?;
            stdin
                .write_all(prompt.as_bytes())
                .await
                .context("write generator stdin")?;
        }

        let output = child
            .wait_with_output()
            .await
            .context("wait generator process")?;
        if !output.status.success() {
            anyhow::bail!("generator command failed: {program} ({})", output.status);
        }

        String::from_utf8(output.stdout).context("generator stdout is not valid UTF-8")
    }
}
