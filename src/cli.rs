use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::backend::LlmEngine;
use crate::citation::CitationStyle;
use crate::config::Feature;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Plan, generate, compile and render a book.
    Build(BuildArgs),
    /// Recompile a book from the sections stored in an output directory.
    Compile(CompileArgs),
    /// Render a compiled markdown document to PDF.
    Render(RenderArgs),
}

#[derive(Debug, Args)]
pub struct BuildArgs {
    /// Book topic (at least 3 characters).
    #[arg(long)]
    pub topic: String,

    /// Output directory (must not exist or be empty).
    #[arg(long)]
    pub out: PathBuf,

    /// YAML configuration file (default: built-in settings).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Genre key from the configuration.
    #[arg(long, default_value = "technology")]
    pub genre: String,

    /// Book length preset from the configuration.
    #[arg(long, default_value = "short")]
    pub length: String,

    /// Chapter count (default: the preset minimum).
    #[arg(long)]
    pub chapters: Option<usize>,

    /// Optional front matter section, e.g. `Dedication` (repeatable).
    #[arg(long = "front-matter")]
    pub front_matter: Vec<String>,

    /// Optional back matter section, e.g. `Glossary` (repeatable).
    #[arg(long = "back-matter")]
    pub back_matter: Vec<String>,

    #[arg(long, value_enum, default_value_t = CitationStyle::Apa)]
    pub citation_style: CitationStyle,

    /// Enable only these content features (repeatable; default: configuration).
    #[arg(long = "feature", value_enum, conflicts_with = "no_features")]
    pub features: Vec<Feature>,

    /// Disable every content feature.
    #[arg(long)]
    pub no_features: bool,

    /// Skip web research entirely. Without search credentials the build
    /// researches through Wikipedia.
    #[arg(long)]
    pub no_research: bool,

    #[command(flatten)]
    pub engine: EngineArgs,

    /// Template path (overrides the configuration).
    #[arg(long)]
    pub template: Option<PathBuf>,

    /// Stop after writing the compiled markdown.
    #[arg(long)]
    pub skip_render: bool,
}

#[derive(Debug, Clone, Args)]
pub struct EngineArgs {
    #[arg(long, value_enum, default_value_t = LlmEngine::Openai)]
    pub engine: LlmEngine,

    /// Generator program for `--engine command`.
    #[arg(long, required_if_eq("engine", "command"))]
    pub command: Option<String>,

    /// Argument passed to the generator program (repeatable).
    #[arg(long = "command-arg", allow_hyphen_values = true)]
    pub command_args: Vec<String>,

    #[arg(long, default_value = crate::openai::DEFAULT_BASE_URL)]
    pub openai_base_url: String,

    #[arg(long, default_value = crate::openai::DEFAULT_MODEL)]
    pub openai_model: String,

    #[arg(long, default_value_t = 0.7)]
    pub openai_temperature: f32,

    /// Per-request timeout for the OpenAI engine.
    #[arg(long, default_value_t = 300)]
    pub openai_timeout_secs: u64,
}

#[derive(Debug, Args)]
pub struct CompileArgs {
    /// Output directory of an earlier build (reads `sections/`).
    #[arg(long)]
    pub out: PathBuf,

    /// Book topic, used for metadata and file names.
    #[arg(long)]
    pub topic: String,

    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long, default_value = "technology")]
    pub genre: String,

    #[arg(long)]
    pub template: Option<PathBuf>,

    #[arg(long)]
    pub skip_render: bool,
}

#[derive(Debug, Args)]
pub struct RenderArgs {
    /// Compiled markdown document.
    #[arg(long)]
    pub input: PathBuf,

    /// Output PDF path.
    #[arg(long)]
    pub out: PathBuf,

    #[arg(long)]
    pub config: Option<PathBuf>,
}
