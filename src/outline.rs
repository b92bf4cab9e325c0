use std::sync::Arc;

use anyhow::Context as _;
use serde::Deserialize;

use crate::backend::TextBackend;
use crate::config::LengthPreset;
use crate::formats::{Outline, SectionDescriptor, SectionKind};
use crate::pacing::Pacing;
use crate::prompts;
use crate::report::BuildIssue;

pub const MIN_TOPIC_CHARS: usize = 3;

#[derive(Debug, Clone)]
pub struct OutlineRequest {
    pub topic: String,
    pub genre: String,
    pub chapter_count: usize,
    pub subsections_per_chapter: usize,
}

impl OutlineRequest {
    /// Rejects inputs no plan can satisfy. Runs before any backend call.
    pub fn validate(&self, preset: &LengthPreset) -> anyhow::Result<()> {
        validate_topic(&self.topic)?;
        if self.chapter_count < preset.min_chapters || self.chapter_count > preset.max_chapters {
            anyhow::bail!(
                "chapter count {} is outside the preset range {}..={}",
                self.chapter_count,
                preset.min_chapters,
                preset.max_chapters
            );
        }
        Ok(())
    }
}

pub fn validate_topic(topic: &str) -> anyhow::Result<()> {
    if topic.trim().chars().count() < MIN_TOPIC_CHARS {
        anyhow::bail!("topic must be at least {MIN_TOPIC_CHARS} characters");
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct PlanEntry {
    title: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    subsections: Vec<String>,
    #[serde(default)]
    description: Option<String>,
}

pub struct OutlineGenerator {
    backend: Arc<dyn TextBackend>,
    pacing: Pacing,
}

impl OutlineGenerator {
    pub fn new(backend: Arc<dyn TextBackend>, pacing: Pacing) -> Self {
        Self { backend, pacing }
    }

    /// One backend call. Any backend, parse or shape failure falls back to the
    /// built-in plan and is recorded; only cancellation escapes.
    pub async fn generate(
        &self,
        request: &OutlineRequest,
        issues: &mut Vec<BuildIssue>,
    ) -> anyhow::Result<Outline> {
        let topic = request.topic.trim();
        let prompt = prompts::outline_prompt(
            topic,
            &request.genre,
            request.chapter_count,
            request.subsections_per_chapter,
        );

        let planned = match self.backend.generate(&prompt).await {
            Ok(text) => {
                self.pacing.after_success().await?;
                parse_plan(&text, request.chapter_count, request.subsections_per_chapter)
            }
            Err(err) => Err(err.context("request outline")),
        };

        let (sections, fallback) = match planned {
            Ok(sections) => (sections, false),
            Err(err) => {
                let error = format!("{err:#}");
                tracing::warn!(error = %error, "outline plan unusable; using built-in outline");
                issues.push(BuildIssue::OutlinePlan { error });
                (
                    fallback_sections(
                        topic,
                        request.chapter_count,
                        request.subsections_per_chapter,
                    ),
                    true,
                )
            }
        };

        tracing::info!(chapters = request.chapter_count, fallback, "outline ready");
        Ok(Outline {
            topic: topic.to_owned(),
            chapter_count: request.chapter_count,
            subsections_per_chapter: request.subsections_per_chapter,
            fallback,
            sections,
        })
    }
}

/// Preface, introduction, `Chapter i: Understanding {topic}` with
/// `Subsection 1..k`, conclusion.
pub fn fallback_sections(
    topic: &str,
    chapter_count: usize,
    subsections: usize,
) -> Vec<SectionDescriptor> {
    let mut sections = vec![
        SectionDescriptor::new("Preface", SectionKind::Preface),
        SectionDescriptor::new("Introduction", SectionKind::Introduction),
    ];
    for i in 1..=chapter_count {
        sections.push(
            SectionDescriptor::new(
                format!("Chapter {i}: Understanding {topic}"),
                SectionKind::Chapter,
            )
            .with_subtopics((1..=subsections).map(|j| format!("Subsection {j}")).collect())
            .with_notes(format!("Exploring key aspects of {topic}")),
        );
    }
    sections.push(SectionDescriptor::new("Conclusion", SectionKind::Conclusion));
    sections
}

fn strip_code_fences(text: &str) -> &str {
    let mut text = text.trim();
    if let Some(rest) = text.strip_prefix("```json") {
        text = rest;
    } else if let Some(rest) = text.strip_prefix("```") {
        text = rest;
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    text.trim()
}

fn parse_kind(kind: &str) -> anyhow::Result<SectionKind> {
    match kind.trim().to_ascii_lowercase().as_str() {
        "preface" => Ok(SectionKind::Preface),
        "introduction" => Ok(SectionKind::Introduction),
        "chapter" => Ok(SectionKind::Chapter),
        "conclusion" => Ok(SectionKind::Conclusion),
        other => anyhow::bail!("unexpected section type in outline: {other:?}"),
    }
}

fn parse_plan(
    text: &str,
    chapter_count: usize,
    subsections: usize,
) -> anyhow::Result<Vec<SectionDescriptor>> {
    let json = strip_code_fences(text);
    let entries: Vec<PlanEntry> = serde_json::from_str(json).context("parse outline json")?;

    let mut sections = Vec::with_capacity(entries.len());
    for entry in entries {
        let title = entry.title.trim();
        if title.is_empty() {
            anyhow::bail!("outline entry title is empty");
        }
        let kind = parse_kind(&entry.kind)?;
        let mut descriptor = SectionDescriptor::new(title, kind);
        if kind == SectionKind::Chapter {
            if entry.subsections.len() != subsections {
                anyhow::bail!(
                    "chapter {title:?} has {} subsections, expected {subsections}",
                    entry.subsections.len()
                );
            }
            if entry.subsections.iter().any(|s| s.trim().is_empty()) {
                anyhow::bail!("chapter {title:?} has an empty subsection title");
            }
            descriptor = descriptor
                .with_subtopics(entry.subsections.iter().map(|s| s.trim().to_owned()).collect());
            if let Some(description) = entry.description.filter(|d| !d.trim().is_empty()) {
                descriptor = descriptor.with_notes(description.trim());
            }
        }
        sections.push(descriptor);
    }

    let kinds = sections.iter().map(|s| s.kind).collect::<Vec<_>>();
    let expected = std::iter::once(SectionKind::Preface)
        .chain(std::iter::once(SectionKind::Introduction))
        .chain(std::iter::repeat_n(SectionKind::Chapter, chapter_count))
        .chain(std::iter::once(SectionKind::Conclusion))
        .collect::<Vec<_>>();
    if kinds != expected {
        anyhow::bail!(
            "outline shape mismatch: expected preface, introduction, {chapter_count} chapters, conclusion; got {} entries",
            kinds.len()
        );
    }
    Ok(sections)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::pacing::{Backoff, RetryPolicy};
    use crate::testing::RecordingSleeper;

    struct FixedBackend(anyhow::Result<String>);

    #[async_trait]
    impl TextBackend for FixedBackend {
        async fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
            match &self.0 {
                Ok(text) => Ok(text.clone()),
                Err(err) => Err(anyhow::anyhow!("{err}")),
            }
        }
    }

    fn generator(reply: anyhow::Result<String>) -> (OutlineGenerator, Arc<RecordingSleeper>) {
        let sleeper = Arc::new(RecordingSleeper::new());
        let pacing = Pacing::new(
            RetryPolicy::new(3, Backoff::Fixed(Duration::from_secs(1))),
            Duration::from_millis(250),
            sleeper.clone(),
        );
        (OutlineGenerator::new(Arc::new(FixedBackend(reply)), pacing), sleeper)
    }

    fn request(chapters: usize, subsections: usize) -> OutlineRequest {
        OutlineRequest {
            topic: "  Rust Programming ".to_owned(),
            genre: "technology".to_owned(),
            chapter_count: chapters,
            subsections_per_chapter: subsections,
        }
    }

    fn assert_shape(outline: &Outline, chapters: usize, subsections: usize) {
        let kinds = outline.sections.iter().map(|s| s.kind).collect::<Vec<_>>();
        assert_eq!(kinds.first(), Some(&SectionKind::Preface));
        assert_eq!(kinds.get(1), Some(&SectionKind::Introduction));
        assert_eq!(kinds.last(), Some(&SectionKind::Conclusion));
        assert_eq!(outline.chapters().count(), chapters);
        assert!(outline.chapters().all(|c| c.subtopics.len() == subsections));
        assert_eq!(kinds.len(), chapters + 3);
    }

    #[tokio::test]
    async fn fenced_valid_plan_is_accepted() -> anyhow::Result<()> {
        let plan = r#"```json
[
  {"title": "Preface", "type": "preface", "subsections": []},
  {"title": "Introduction", "type": "introduction", "subsections": []},
  {"title": "Chapter 1: Ownership", "type": "chapter", "subsections": ["Moves", "Borrows"], "description": "Who owns what"},
  {"title": "Chapter 2: Traits", "type": "chapter", "subsections": ["Bounds", "Objects"]},
  {"title": "Conclusion", "type": "conclusion", "subsections": []}
]
```"#;
        let (generator, sleeper) = generator(Ok(plan.to_owned()));
        let mut issues = Vec::new();
        let outline = generator.generate(&request(2, 2), &mut issues).await?;

        assert!(!outline.fallback);
        assert!(issues.is_empty());
        assert_shape(&outline, 2, 2);
        assert_eq!(outline.topic, "Rust Programming");
        assert_eq!(outline.sections[2].notes.as_deref(), Some("Who owns what"));
        assert_eq!(sleeper.recorded(), vec![Duration::from_millis(250)]);
        Ok(())
    }

    #[tokio::test]
    async fn wrong_chapter_count_falls_back() -> anyhow::Result<()> {
        let plan = r#"[
  {"title": "Preface", "type": "preface"},
  {"title": "Introduction", "type": "introduction"},
  {"title": "Chapter 1", "type": "chapter", "subsections": ["a"]},
  {"title": "Conclusion", "type": "conclusion"}
]"#;
        let (generator, _) = generator(Ok(plan.to_owned()));
        let mut issues = Vec::new();
        let outline = generator.generate(&request(3, 1), &mut issues).await?;
        assert!(outline.fallback);
        assert_shape(&outline, 3, 1);
        assert!(matches!(&issues[..], [BuildIssue::OutlinePlan { .. }]));
        Ok(())
    }

    #[tokio::test]
    async fn garbage_and_backend_errors_fall_back() -> anyhow::Result<()> {
        for reply in [Ok("not json at all".to_owned()), Err(anyhow::anyhow!("503"))] {
            let (generator, _) = generator(reply);
            let mut issues = Vec::new();
            let outline = generator.generate(&request(4, 3), &mut issues).await?;
            assert!(outline.fallback);
            assert_shape(&outline, 4, 3);
            assert_eq!(issues.len(), 1);
        }
        Ok(())
    }

    #[test]
    fn fallback_matches_built_in_plan() {
        let sections = fallback_sections("Rust", 2, 3);
        assert_eq!(sections[2].title, "Chapter 1: Understanding Rust");
        assert_eq!(
            sections[3].subtopics,
            vec!["Subsection 1", "Subsection 2", "Subsection 3"]
        );
        assert_eq!(sections[3].notes.as_deref(), Some("Exploring key aspects of Rust"));
        assert_eq!(sections.len(), 5);
    }

    #[test]
    fn zero_subsections_is_valid() {
        let sections = fallback_sections("Rust", 1, 0);
        assert!(sections[2].subtopics.is_empty());
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        let preset = LengthPreset {
            min_chapters: 3,
            max_chapters: 5,
            words_per_section: 800,
            subsections: 2,
        };
        let mut req = request(3, 2);
        assert!(req.validate(&preset).is_ok());
        req.chapter_count = 6;
        assert!(req.validate(&preset).is_err());
        req.chapter_count = 4;
        req.topic = " ab ".to_owned();
        assert!(req.validate(&preset).is_err());
    }
}
