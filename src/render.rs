use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::PdfSettings;

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub pandoc: String,
    pub primary_engine: String,
    pub fallback_engine: String,
    pub toc_depth: u8,
    pub margin: String,
    pub number_sections: bool,
    pub highlight_style: String,
    pub lua_filter: Option<PathBuf>,
    pub timeout: Duration,
}

impl RenderSettings {
    pub fn from_config(pdf: &PdfSettings, lua_filter: Option<PathBuf>) -> Self {
        Self {
            pandoc: pdf.pandoc.clone(),
            primary_engine: pdf.default_engine.clone(),
            fallback_engine: pdf.fallback_engine.clone(),
            toc_depth: pdf.toc_depth,
            margin: pdf.margin.clone(),
            number_sections: pdf.number_sections,
            highlight_style: pdf.highlight_style.clone(),
            lua_filter,
            timeout: Duration::from_secs(pdf.timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    Primary,
    Fallback,
}

/// One fully specified typesetting run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderInvocation {
    pub engine: String,
    pub input: PathBuf,
    pub output: PathBuf,
    pub args: Vec<OsString>,
}

impl RenderInvocation {
    pub fn new(settings: &RenderSettings, attempt: Attempt, input: &Path, output: &Path) -> Self {
        let engine = match attempt {
            Attempt::Primary => settings.primary_engine.clone(),
            Attempt::Fallback => settings.fallback_engine.clone(),
        };

        let mut args = vec![
            input.as_os_str().to_owned(),
            OsString::from("-o"),
            output.as_os_str().to_owned(),
            OsString::from(format!("--pdf-engine={engine}")),
            OsString::from("--toc"),
            OsString::from(format!("--toc-depth={}", settings.toc_depth)),
        ];
        if settings.number_sections {
            args.push(OsString::from("-N"));
        }
        if attempt == Attempt::Primary {
            args.push(OsString::from(format!(
                "--highlight-style={}",
                settings.highlight_style
            )));
            for var in [
                format!("geometry:margin={}", settings.margin),
                "documentclass=book".to_owned(),
                "linkcolor=blue".to_owned(),
                "urlcolor=blue".to_owned(),
            ] {
                args.push(OsString::from("-V"));
                args.push(OsString::from(var));
            }
        }
        if let Some(filter) = &settings.lua_filter {
            let mut arg = OsString::from("--lua-filter=");
            arg.push(filter.as_os_str());
            args.push(arg);
        }

        Self {
            engine,
            input: input.to_owned(),
            output: output.to_owned(),
            args,
        }
    }
}

/// External typesetting engine.
#[async_trait]
pub trait Typesetter: Send + Sync {
    async fn typeset(&self, invocation: &RenderInvocation) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct Pandoc {
    program: String,
    timeout: Duration,
}

impl Pandoc {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Typesetter for Pandoc {
    async fn typeset(&self, invocation: &RenderInvocation) -> anyhow::Result<()> {
        let program = self.program.as_str();
        tracing::info!(
            pandoc = program,
            pdf_engine = %invocation.engine,
            out = %invocation.output.display(),
            "render via pandoc"
        );

        let child = match tokio::process::Command::new(program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                anyhow::bail!("pandoc is not installed (tried `{program}`); install pandoc or set pdf.pandoc");
            }
            Err(err) => return Err(err).with_context(|| format!("run pandoc: {program}")),
        };

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output.with_context(|| format!("wait pandoc: {program}"))?,
            Err(_) => anyhow::bail!(
                "pandoc timed out after {}s with pdf_engine={}",
                self.timeout.as_secs(),
                invocation.engine
            ),
        };
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "pandoc failed with pdf_engine={} ({}): {}",
                invocation.engine,
                output.status,
                tail(stderr.trim(), 2_000)
            );
        }
        if !invocation.output.is_file() {
            anyhow::bail!(
                "pandoc exited successfully but produced no file: {}",
                invocation.output.display()
            );
        }
        Ok(())
    }
}

fn tail(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let start = text.len() - max_bytes;
    let start = (start..text.len())
        .find(|idx| text.is_char_boundary(*idx))
        .unwrap_or(text.len());
    &text[start..]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RenderOutcome {
    Primary {
        artifact: PathBuf,
    },
    Fallback {
        artifact: PathBuf,
        primary_error: String,
    },
    /// Both engines failed; the compiled markdown is the best artifact.
    Failed {
        best_artifact: PathBuf,
        primary_error: String,
        fallback_error: String,
    },
}

impl RenderOutcome {
    pub fn succeeded(&self) -> bool {
        !matches!(self, RenderOutcome::Failed { .. })
    }

    pub fn artifact(&self) -> &Path {
        match self {
            RenderOutcome::Primary { artifact } | RenderOutcome::Fallback { artifact, .. } => {
                artifact
            }
            RenderOutcome::Failed { best_artifact, .. } => best_artifact,
        }
    }
}

pub struct RenderPipeline {
    settings: RenderSettings,
    typesetter: Arc<dyn Typesetter>,
}

impl RenderPipeline {
    pub fn new(settings: RenderSettings, typesetter: Arc<dyn Typesetter>) -> Self {
        Self {
            settings,
            typesetter,
        }
    }

    /// Primary engine with the full option set, then exactly one retry with
    /// the fallback engine and the reduced set. Never fails the build.
    pub async fn render(&self, input: &Path, output: &Path) -> RenderOutcome {
        let primary = RenderInvocation::new(&self.settings, Attempt::Primary, input, output);
        let primary_error = match self.typesetter.typeset(&primary).await {
            Ok(()) => {
                return RenderOutcome::Primary {
                    artifact: output.to_owned(),
                };
            }
            Err(err) => format!("{err:#}"),
        };
        tracing::warn!(
            engine = %primary.engine,
            fallback = %self.settings.fallback_engine,
            error = %primary_error,
            "primary render failed; trying fallback engine"
        );

        let fallback = RenderInvocation::new(&self.settings, Attempt::Fallback, input, output);
        match self.typesetter.typeset(&fallback).await {
            Ok(()) => RenderOutcome::Fallback {
                artifact: output.to_owned(),
                primary_error,
            },
            Err(err) => {
                let fallback_error = format!("{err:#}");
                tracing::warn!(
                    engine = %fallback.engine,
                    error = %fallback_error,
                    "fallback render failed; keeping compiled markdown"
                );
                RenderOutcome::Failed {
                    best_artifact: input.to_owned(),
                    primary_error,
                    fallback_error,
                }
            }
        }
    }
}
