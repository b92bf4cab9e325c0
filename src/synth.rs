use std::sync::Arc;

use crate::backend::TextBackend;
use crate::config::{Feature, FeatureToggles};
use crate::formats::{GeneratedSection, SectionDescriptor, SectionKind};
use crate::pacing::Pacing;
use crate::prompts;
use crate::report::BuildIssue;
use crate::research::ResearchHit;

/// In-band body of a section whose generation failed after every attempt.
pub const GENERATION_FAILED_MARKER: &str = "[Content generation failed]";

pub const QUIZ_HEADING: &str = "## 📝 Chapter Quiz";
pub const SUMMARY_MARKER: &str = "**Key Takeaways:**";

/// Shared inputs for every section of one build.
#[derive(Debug, Clone)]
pub struct GenerationContext {
    pub topic: String,
    pub genre: String,
    pub tone: String,
    pub features: FeatureToggles,
    pub words_target: u32,
    pub research: Vec<ResearchHit>,
}

impl GenerationContext {
    #[must_use]
    pub fn with_research(&self, research: Vec<ResearchHit>) -> Self {
        Self {
            research,
            ..self.clone()
        }
    }
}

/// Result of the retry loop. Exhaustion is a value, not an error: the build
/// continues past it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Generation {
    Text(String),
    Exhausted { attempts: u32, last_error: String },
}

pub struct Synthesizer {
    backend: Arc<dyn TextBackend>,
    pacing: Pacing,
}

impl Synthesizer {
    pub fn new(backend: Arc<dyn TextBackend>, pacing: Pacing) -> Self {
        Self { backend, pacing }
    }

    pub fn pacing(&self) -> &Pacing {
        &self.pacing
    }

    /// Calls the backend up to `max_attempts` times. Failure `n` sleeps
    /// `backoff.delay(n)` when another attempt remains; every success is
    /// followed by the rate-limit pause. Errors only on cancellation.
    pub async fn generate_with_retry(&self, prompt: &str) -> anyhow::Result<Generation> {
        let policy = self.pacing.policy;
        let mut last_error = String::new();

        for attempt in 1..=policy.max_attempts {
            match self.backend.generate(prompt).await {
                Ok(text) if !text.trim().is_empty() => {
                    self.pacing.after_success().await?;
                    return Ok(Generation::Text(text));
                }
                Ok(_) => last_error = "backend returned empty text".to_owned(),
                Err(err) => last_error = format!("{err:#}"),
            }

            if attempt < policy.max_attempts {
                let delay = policy.backoff.delay(attempt);
                tracing::warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %last_error,
                    "generation failed; retrying"
                );
                self.pacing.sleeper.sleep(delay).await?;
            }
        }

        Ok(Generation::Exhausted {
            attempts: policy.max_attempts,
            last_error,
        })
    }

    /// Generates one planned section plus the appendices its toggles ask for.
    pub async fn synthesize(
        &self,
        ctx: &GenerationContext,
        descriptor: &SectionDescriptor,
        issues: &mut Vec<BuildIssue>,
    ) -> anyhow::Result<GeneratedSection> {
        let prompt = prompts::section_prompt(ctx, descriptor);
        let mut section = self.synthesize_prompt(descriptor, &prompt, issues).await?;

        if descriptor.kind == SectionKind::Chapter && section.body != GENERATION_FAILED_MARKER {
            if ctx.features.enabled(Feature::SummaryBoxes) {
                let prompt = prompts::summary_prompt(ctx, &descriptor.title);
                if let Some(text) = self
                    .appendix(&descriptor.title, "summary", &prompt, issues)
                    .await?
                {
                    section.push_appendix(format!("{SUMMARY_MARKER}\n\n{}", text.trim()));
                }
            }
            if ctx.features.enabled(Feature::Quiz) {
                let prompt = prompts::quiz_prompt(ctx, &descriptor.title);
                if let Some(text) = self.appendix(&descriptor.title, "quiz", &prompt, issues).await? {
                    section.push_appendix(format!("---\n\n{QUIZ_HEADING}\n\n{}", text.trim()));
                }
            }
        }

        Ok(section)
    }

    /// Runs `prompt` through the retry loop. Exhaustion yields the failure
    /// marker and a recorded issue.
    pub async fn synthesize_prompt(
        &self,
        descriptor: &SectionDescriptor,
        prompt: &str,
        issues: &mut Vec<BuildIssue>,
    ) -> anyhow::Result<GeneratedSection> {
        tracing::info!(title = %descriptor.title, kind = %descriptor.kind, "generate section");
        match self.generate_with_retry(prompt).await? {
            Generation::Text(text) => Ok(GeneratedSection::new(descriptor.clone(), text.trim())),
            Generation::Exhausted {
                attempts,
                last_error,
            } => {
                tracing::warn!(
                    title = %descriptor.title,
                    attempts,
                    error = %last_error,
                    "section generation failed; inserting marker"
                );
                issues.push(BuildIssue::SectionGeneration {
                    title: descriptor.title.clone(),
                    attempts,
                    last_error,
                });
                Ok(GeneratedSection::new(
                    descriptor.clone(),
                    GENERATION_FAILED_MARKER,
                ))
            }
        }
    }

    async fn appendix(
        &self,
        title: &str,
        appendix: &str,
        prompt: &str,
        issues: &mut Vec<BuildIssue>,
    ) -> anyhow::Result<Option<String>> {
        match self.generate_with_retry(prompt).await? {
            Generation::Text(text) => Ok(Some(text)),
            Generation::Exhausted {
                attempts,
                last_error,
            } => {
                tracing::warn!(title, appendix, error = %last_error, "appendix generation failed; skipping");
                issues.push(BuildIssue::AppendixGeneration {
                    title: title.to_owned(),
                    appendix: appendix.to_owned(),
                    attempts,
                    last_error,
                });
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::pacing::{Backoff, RetryPolicy};
    use crate::testing::RecordingSleeper;

    /// Pops scripted replies; `Err` entries fail the call. Empty script fails.
    struct ScriptedBackend {
        replies: Mutex<VecDeque<Result<String, String>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedBackend {
        fn new(replies: Vec<Result<&str, &str>>) -> Self {
            Self {
                replies: Mutex::new(
                    replies
                        .into_iter()
                        .map(|r| r.map(str::to_owned).map_err(str::to_owned))
                        .collect(),
                ),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl TextBackend for ScriptedBackend {
        async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_owned());
            match self.replies.lock().unwrap().pop_front() {
                Some(Ok(text)) => Ok(text),
                Some(Err(err)) => Err(anyhow::anyhow!(err)),
                None => Err(anyhow::anyhow!("script exhausted")),
            }
        }
    }

    fn synthesizer(
        backend: Arc<ScriptedBackend>,
        max_attempts: u32,
    ) -> (Synthesizer, Arc<RecordingSleeper>) {
        let sleeper = Arc::new(RecordingSleeper::new());
        let pacing = Pacing::new(
            RetryPolicy::new(max_attempts, Backoff::Fixed(Duration::from_secs(5))),
            Duration::from_secs(2),
            sleeper.clone(),
        );
        (Synthesizer::new(backend, pacing), sleeper)
    }

    fn context(features: FeatureToggles) -> GenerationContext {
        GenerationContext {
            topic: "Rust".to_owned(),
            genre: "technology".to_owned(),
            tone: "Precise".to_owned(),
            features,
            words_target: 500,
            research: Vec::new(),
        }
    }

    #[tokio::test]
    async fn two_failures_then_success_makes_three_calls() -> anyhow::Result<()> {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Err("rate limited"),
            Err("rate limited"),
            Ok("Body"),
        ]));
        let (synth, sleeper) = synthesizer(backend.clone(), 3);

        let result = synth.generate_with_retry("prompt").await?;
        assert_eq!(result, Generation::Text("Body".to_owned()));
        assert_eq!(backend.calls(), 3);
        assert_eq!(
            sleeper.recorded(),
            vec![
                Duration::from_secs(5),
                Duration::from_secs(5),
                Duration::from_secs(2)
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn always_failing_backend_is_called_max_attempts_times() -> anyhow::Result<()> {
        let backend = Arc::new(ScriptedBackend::new(vec![]));
        let (synth, sleeper) = synthesizer(backend.clone(), 4);
        let mut issues = Vec::new();

        let section = synth
            .synthesize_prompt(
                &SectionDescriptor::new("Chapter 1", SectionKind::Chapter),
                "prompt",
                &mut issues,
            )
            .await?;
        assert_eq!(section.body, GENERATION_FAILED_MARKER);
        assert_eq!(backend.calls(), 4);
        // No sleep after the final failure.
        assert_eq!(sleeper.recorded().len(), 3);
        assert!(matches!(
            &issues[..],
            [BuildIssue::SectionGeneration { attempts: 4, .. }]
        ));
        Ok(())
    }

    #[tokio::test]
    async fn empty_text_counts_as_failure() -> anyhow::Result<()> {
        let backend = Arc::new(ScriptedBackend::new(vec![Ok("   "), Ok("real")]));
        let (synth, _) = synthesizer(backend.clone(), 2);
        assert_eq!(
            synth.generate_with_retry("p").await?,
            Generation::Text("real".to_owned())
        );
        Ok(())
    }

    #[tokio::test]
    async fn chapter_gets_summary_then_quiz_appendix() -> anyhow::Result<()> {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Ok("Chapter body."),
            Ok("- takeaway"),
            Ok("**Question 1:** Why?"),
        ]));
        let (synth, _) = synthesizer(backend.clone(), 1);
        let mut issues = Vec::new();
        let ctx = context(FeatureToggles::from_features(&[
            Feature::Quiz,
            Feature::SummaryBoxes,
        ]));

        let section = synth
            .synthesize(
                &ctx,
                &SectionDescriptor::new("Chapter 1", SectionKind::Chapter),
                &mut issues,
            )
            .await?;
        assert_eq!(
            section.full_text(),
            "Chapter body.\n\n**Key Takeaways:**\n\n- takeaway\n\n---\n\n## 📝 Chapter Quiz\n\n**Question 1:** Why?"
        );
        assert!(issues.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn failed_appendix_is_skipped_not_marked() -> anyhow::Result<()> {
        let backend = Arc::new(ScriptedBackend::new(vec![Ok("Chapter body.")]));
        let (synth, _) = synthesizer(backend.clone(), 1);
        let mut issues = Vec::new();
        let ctx = context(FeatureToggles::from_features(&[Feature::Quiz]));

        let section = synth
            .synthesize(
                &ctx,
                &SectionDescriptor::new("Chapter 1", SectionKind::Chapter),
                &mut issues,
            )
            .await?;
        assert_eq!(section.full_text(), "Chapter body.");
        assert!(!section.full_text().contains(GENERATION_FAILED_MARKER));
        assert!(matches!(
            &issues[..],
            [BuildIssue::AppendixGeneration { appendix, .. }] if appendix == "quiz"
        ));
        Ok(())
    }

    #[tokio::test]
    async fn non_chapters_get_no_appendices() -> anyhow::Result<()> {
        let backend = Arc::new(ScriptedBackend::new(vec![Ok("Intro text.")]));
        let (synth, _) = synthesizer(backend.clone(), 1);
        let mut issues = Vec::new();
        let section = synth
            .synthesize(
                &context(FeatureToggles::all()),
                &SectionDescriptor::new("Introduction", SectionKind::Introduction),
                &mut issues,
            )
            .await?;
        assert!(section.appendices.is_empty());
        assert_eq!(backend.calls(), 1);
        Ok(())
    }
}
