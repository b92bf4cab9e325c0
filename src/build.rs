use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;

use crate::backend::{CommandBackend, LlmEngine, NoopBackend, TextBackend};
use crate::citation::{CitationManager, CitationStyle};
use crate::classify::{ClassifiedSection, Classifier, slugify, sort_by_ordering_key};
use crate::cli::{BuildArgs, CompileArgs, EngineArgs, RenderArgs};
use crate::compile::{BookMetadata, compile_from_path};
use crate::config::{Config, FeatureToggles};
use crate::formats::{GeneratedSection, SectionKind};
use crate::matter;
use crate::openai::OpenAiBackend;
use crate::outline::{OutlineGenerator, OutlineRequest};
use crate::pacing::{Pacing, Sleeper, TokioSleeper};
use crate::render::{Pandoc, RenderOutcome, RenderPipeline, RenderSettings, Typesetter};
use crate::report::{BuildReport, SectionRecord, SectionStatus};
use crate::research::{GoogleSearch, ResearchClient, WIKIPEDIA_API_ENDPOINT, WikipediaSearch};
use crate::store::{self, LocalFsSectionStore, SectionStore};
use crate::synth::{GENERATION_FAILED_MARKER, GenerationContext, Synthesizer};

/// Everything a build needs besides configuration and collaborators.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub topic: String,
    pub genre: String,
    pub length: String,
    pub chapters: Option<usize>,
    pub front_matter: Vec<String>,
    pub back_matter: Vec<String>,
    pub citation_style: CitationStyle,
    pub features: FeatureToggles,
    pub out_dir: PathBuf,
    pub skip_render: bool,
    pub published: NaiveDate,
}

/// Collaborators injected into [`execute`].
pub struct PipelineDeps {
    pub backend: Arc<dyn TextBackend>,
    /// `None` skips research entirely, including its pacing.
    pub research: Option<Arc<dyn ResearchClient>>,
    pub store: Arc<dyn SectionStore>,
    pub sleeper: Arc<dyn Sleeper>,
    pub typesetter: Arc<dyn Typesetter>,
}

pub fn compiled_document_path(out_dir: &Path, topic: &str) -> PathBuf {
    out_dir.join(format!("{}_ebook_final.md", slugify(topic)))
}

pub fn pdf_path(out_dir: &Path, topic: &str) -> PathBuf {
    out_dir.join(format!("{}_ebook.pdf", slugify(topic)))
}

/// Runs outline, generation, compilation and rendering for one book.
///
/// Input validation happens before anything is written. Recovered failures
/// end up in the returned report; only setup errors, I/O errors and
/// cancellation are returned as `Err`.
pub async fn execute(
    config: &Config,
    request: &BuildRequest,
    deps: PipelineDeps,
) -> anyhow::Result<BuildReport> {
    let topic = request.topic.trim();
    let genre = config.genre(&request.genre)?;
    let preset = config.length_preset(&request.length)?;
    let outline_request = OutlineRequest {
        topic: topic.to_owned(),
        genre: request.genre.clone(),
        chapter_count: request.chapters.unwrap_or(preset.min_chapters),
        subsections_per_chapter: preset.subsections,
    };
    outline_request.validate(preset)?;
    for (name, catalog) in request
        .front_matter
        .iter()
        .map(|name| (name, &config.front_matter_sections))
        .chain(
            request
                .back_matter
                .iter()
                .map(|name| (name, &config.back_matter_sections)),
        )
    {
        if name.trim().is_empty() {
            anyhow::bail!("optional section names must not be empty");
        }
        if !catalog.contains(name) {
            tracing::warn!(section = %name, "section is not in the configured catalog; using a generic prompt");
        }
    }

    tokio::fs::create_dir_all(&request.out_dir)
        .await
        .with_context(|| format!("create output dir: {}", request.out_dir.display()))?;

    let mut report = BuildReport::new(topic);
    tracing::info!(build_id = %report.build_id, topic, genre = %request.genre, "build: start");

    let pacing = Pacing::from_settings(&config.api, deps.sleeper.clone());
    let research_delay = Duration::from_millis(config.api.research_delay_ms);

    tracing::info!(chapters = outline_request.chapter_count, "build: outline");
    let outline = OutlineGenerator::new(deps.backend.clone(), pacing.clone())
        .generate(&outline_request, &mut report.issues)
        .await
        .context("outline")?;
    report.outline_fallback = outline.fallback;
    let outline_yaml = serde_yaml::to_string(&outline).context("serialize outline")?;
    store::write_atomic(&request.out_dir.join("outline.yaml"), outline_yaml.as_bytes())
        .await
        .context("write outline")?;

    let ctx = GenerationContext {
        topic: topic.to_owned(),
        genre: request.genre.clone(),
        tone: genre.tone.clone(),
        features: request.features,
        words_target: preset.words_per_section,
        research: Vec::new(),
    };
    let synth = Synthesizer::new(deps.backend.clone(), pacing);
    let mut citations = CitationManager::new(request.citation_style);
    let mut classifier = Classifier::new();
    let mut sections = Vec::new();

    for name in &request.front_matter {
        let section = matter::synthesize_matter(
            &synth,
            &ctx,
            name,
            SectionKind::FrontMatter,
            &citations,
            &mut report.issues,
        )
        .await
        .with_context(|| format!("generate front matter: {name}"))?;
        let status = matter_status(name, &section);
        sections.push(
            persist(&*deps.store, &mut classifier, &mut report, section, status).await?,
        );
    }

    for descriptor in &outline.sections {
        let mut hits = Vec::new();
        if let Some(research) = &deps.research
            && matches!(descriptor.kind, SectionKind::Introduction | SectionKind::Chapter)
        {
            let query = format!("{topic} {}", descriptor.title);
            tracing::debug!(query = %query, "research");
            hits = research.search(&query, config.api.research_results).await;
            for hit in &hits {
                citations.add_web_source(&hit.title, &hit.link);
            }
            deps.sleeper.sleep(research_delay).await?;
        }

        let section = synth
            .synthesize(&ctx.with_research(hits), descriptor, &mut report.issues)
            .await
            .with_context(|| format!("generate section: {}", descriptor.title))?;
        let status = generation_status(&section);
        sections.push(
            persist(&*deps.store, &mut classifier, &mut report, section, status).await?,
        );
    }

    for name in &request.back_matter {
        let section = matter::synthesize_matter(
            &synth,
            &ctx,
            name,
            SectionKind::BackMatter,
            &citations,
            &mut report.issues,
        )
        .await
        .with_context(|| format!("generate back matter: {name}"))?;
        let status = matter_status(name, &section);
        sections.push(
            persist(&*deps.store, &mut classifier, &mut report, section, status).await?,
        );
    }

    sort_by_ordering_key(&mut sections);

    tracing::info!(sections = sections.len(), "build: compile");
    let metadata = BookMetadata::new(
        topic,
        &request.genre,
        &config.publication,
        request.published,
    );
    let document = compiled_document_path(&request.out_dir, topic);
    let compiled = compile_from_path(&config.template_path, &metadata, &config.pdf, &sections)
        .await
        .context("compile")?;
    report.issues.extend(compiled.issues);
    store::write_atomic(&document, compiled.text.as_bytes())
        .await
        .context("write compiled document")?;
    report.record_compiled(&document, &compiled.text);

    if request.skip_render {
        tracing::info!("build: render skipped");
    } else {
        tracing::info!("build: render");
        let pdf = pdf_path(&request.out_dir, topic);
        let outcome = render_document(config, deps.typesetter, &document, &pdf).await;
        report.record_render(
            outcome,
            &config.pdf.default_engine,
            &config.pdf.fallback_engine,
        );
    }

    report
        .write(&request.out_dir.join("report.json"))
        .await
        .context("write report")?;

    tracing::info!(
        document = %document.display(),
        generation_ok = report.generation_succeeded(),
        typesetting_ok = report.typesetting_succeeded(),
        issues = report.issues.len(),
        "build: done"
    );
    Ok(report)
}

async fn persist(
    store: &dyn SectionStore,
    classifier: &mut Classifier,
    report: &mut BuildReport,
    section: GeneratedSection,
    status: SectionStatus,
) -> anyhow::Result<ClassifiedSection> {
    let classified = classifier.classify(section);
    let id = classified.id.to_string();
    let encoded = store::encode_section(&classified)?;
    store
        .put(&id, &encoded)
        .await
        .with_context(|| format!("store section: {id}"))?;
    report.sections.push(SectionRecord {
        id,
        title: classified.section.title().to_owned(),
        kind: classified.section.kind(),
        status,
    });
    Ok(classified)
}

fn generation_status(section: &GeneratedSection) -> SectionStatus {
    if section.body == GENERATION_FAILED_MARKER {
        SectionStatus::Failed
    } else {
        SectionStatus::Generated
    }
}

fn matter_status(name: &str, section: &GeneratedSection) -> SectionStatus {
    if matter::is_static(name) {
        SectionStatus::Static
    } else {
        generation_status(section)
    }
}

/// Missing Lua filters are dropped with a warning rather than failing pandoc.
fn render_settings(config: &Config) -> RenderSettings {
    let lua_filter = config.lua_filter.clone().filter(|path| {
        let exists = path.is_file();
        if !exists {
            tracing::warn!(path = %path.display(), "lua filter not found; rendering without it");
        }
        exists
    });
    RenderSettings::from_config(&config.pdf, lua_filter)
}

async fn render_document(
    config: &Config,
    typesetter: Arc<dyn Typesetter>,
    input: &Path,
    output: &Path,
) -> RenderOutcome {
    RenderPipeline::new(render_settings(config), typesetter)
        .render(input, output)
        .await
}

fn load_config(path: Option<&Path>, template: Option<PathBuf>) -> anyhow::Result<Config> {
    let mut config = Config::load(path)?;
    if let Some(template) = template {
        config.template_path = template;
    }
    Ok(config)
}

fn pandoc(config: &Config) -> Arc<dyn Typesetter> {
    Arc::new(Pandoc::new(
        config.pdf.pandoc.clone(),
        Duration::from_secs(config.pdf.timeout_secs),
    ))
}

fn backend(args: &EngineArgs) -> anyhow::Result<Arc<dyn TextBackend>> {
    Ok(match args.engine {
        LlmEngine::Noop => Arc::new(NoopBackend),
        LlmEngine::Command => {
            let program = args
                .command
                .clone()
                .ok_or_else(|| anyhow::anyhow!("--command is required for --engine command"))?;
            Arc::new(CommandBackend::new(program, args.command_args.clone()))
        }
        LlmEngine::Openai => Arc::new(
            OpenAiBackend::from_env(
                &args.openai_base_url,
                &args.openai_model,
                args.openai_temperature,
                Duration::from_secs(args.openai_timeout_secs),
            )
            .context("configure openai engine")?,
        ),
    })
}

fn ensure_empty_dir(dir: &Path) -> anyhow::Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    if !dir.is_dir() {
        anyhow::bail!("output path is not a directory: {}", dir.display());
    }
    let mut entries =
        std::fs::read_dir(dir).with_context(|| format!("read dir: {}", dir.display()))?;
    if entries.next().is_some() {
        anyhow::bail!("output directory is not empty: {}", dir.display());
    }
    Ok(())
}

/// Trips the token on Ctrl-C.
fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted; cancelling build");
            cancel.cancel();
        }
    });
}

pub async fn run(args: BuildArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref(), args.template.clone())?;
    ensure_empty_dir(&args.out)?;

    let features = if args.no_features {
        FeatureToggles::none()
    } else if args.features.is_empty() {
        config.content_features
    } else {
        FeatureToggles::from_features(&args.features)
    };

    let request = BuildRequest {
        topic: args.topic.clone(),
        genre: args.genre.clone(),
        length: args.length.clone(),
        chapters: args.chapters,
        front_matter: args.front_matter.clone(),
        back_matter: args.back_matter.clone(),
        citation_style: args.citation_style,
        features,
        out_dir: args.out.clone(),
        skip_render: args.skip_render,
        published: chrono::Local::now().date_naive(),
    };

    let research: Option<Arc<dyn ResearchClient>> = if args.no_research {
        None
    } else {
        let wikipedia = WikipediaSearch::new(WIKIPEDIA_API_ENDPOINT)?;
        match GoogleSearch::from_env()? {
            Some(search) => Some(Arc::new(search.with_fallback(wikipedia))),
            None => {
                tracing::info!("search credentials not set; researching with wikipedia");
                Some(Arc::new(wikipedia))
            }
        }
    };

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let deps = PipelineDeps {
        backend: backend(&args.engine)?,
        research,
        store: Arc::new(LocalFsSectionStore::new(&args.out)),
        sleeper: Arc::new(TokioSleeper::new(cancel.clone())),
        typesetter: pandoc(&config),
    };

    let report = tokio::select! {
        report = execute(&config, &request, deps) => report?,
        () = cancel.cancelled() => anyhow::bail!("build cancelled"),
    };
    if !report.generation_succeeded() {
        tracing::warn!("some sections failed to generate; see report.json");
    }
    Ok(())
}

/// Rebuilds the compiled document (and PDF) from `<out>/sections`.
pub async fn recompile(args: CompileArgs) -> anyhow::Result<()> {
    crate::outline::validate_topic(&args.topic)?;
    let config = load_config(args.config.as_deref(), args.template.clone())?;
    config.genre(&args.genre)?;

    let store = LocalFsSectionStore::new(&args.out);
    let mut sections = store::load_sections(&store).await.context("load sections")?;
    if sections.is_empty() {
        anyhow::bail!("no sections found in {}", store.sections_dir().display());
    }
    sort_by_ordering_key(&mut sections);
    tracing::info!(sections = sections.len(), "compile: loaded sections");

    let topic = args.topic.trim();
    let metadata = BookMetadata::new(
        topic,
        &args.genre,
        &config.publication,
        chrono::Local::now().date_naive(),
    );
    let compiled = compile_from_path(&config.template_path, &metadata, &config.pdf, &sections)
        .await
        .context("compile")?;
    for issue in &compiled.issues {
        tracing::warn!(?issue, "compile issue");
    }
    let document = compiled_document_path(&args.out, topic);
    store::write_atomic(&document, compiled.text.as_bytes())
        .await
        .context("write compiled document")?;
    tracing::info!(document = %document.display(), "compile: written");

    if !args.skip_render {
        let pdf = pdf_path(&args.out, topic);
        let outcome = render_document(&config, pandoc(&config), &document, &pdf).await;
        log_outcome(&outcome);
    }
    Ok(())
}

pub async fn render(args: RenderArgs) -> anyhow::Result<()> {
    let config = Config::load(args.config.as_deref())?;
    if !args.input.is_file() {
        anyhow::bail!("input document not found: {}", args.input.display());
    }
    let outcome = render_document(&config, pandoc(&config), &args.input, &args.out).await;
    log_outcome(&outcome);
    if let RenderOutcome::Failed {
        primary_error,
        fallback_error,
        ..
    } = outcome
    {
        anyhow::bail!("render failed: {primary_error}; fallback: {fallback_error}");
    }
    Ok(())
}

fn log_outcome(outcome: &RenderOutcome) {
    match outcome {
        RenderOutcome::Primary { artifact } => {
            tracing::info!(artifact = %artifact.display(), "render: done");
        }
        RenderOutcome::Fallback {
            artifact,
            primary_error,
        } => {
            tracing::warn!(
                artifact = %artifact.display(),
                primary_error = %primary_error,
                "render: done with fallback engine"
            );
        }
        RenderOutcome::Failed {
            best_artifact,
            primary_error,
            fallback_error,
        } => {
            tracing::warn!(
                best_artifact = %best_artifact.display(),
                primary_error = %primary_error,
                fallback_error = %fallback_error,
                "render: failed; compiled markdown is the best artifact"
            );
        }
    }
}
