use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::matter;
use crate::pacing::BackoffKind;

/// Build configuration. Loaded once, then passed by reference into every
/// component; nothing reads it from a global.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiSettings,
    pub genres: BTreeMap<String, GenreSettings>,
    pub book_length: BTreeMap<String, LengthPreset>,
    pub content_features: FeatureToggles,
    pub front_matter_sections: Vec<String>,
    pub back_matter_sections: Vec<String>,
    pub pdf: PdfSettings,
    pub publication: PublicationSettings,
    pub template_path: PathBuf,
    pub lua_filter: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub rate_limit_delay_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub backoff: BackoffKind,
    pub max_backoff_ms: u64,
    pub research_delay_ms: u64,
    pub research_results: usize,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            rate_limit_delay_ms: 2_000,
            max_retries: 3,
            retry_backoff_ms: 5_000,
            backoff: BackoffKind::Fixed,
            max_backoff_ms: 60_000,
            research_delay_ms: 2_000,
            research_results: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenreSettings {
    pub tone: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LengthPreset {
    pub min_chapters: usize,
    pub max_chapters: usize,
    pub words_per_section: u32,
    pub subsections: usize,
}

/// Content enhancement switches. The schema is closed: unknown keys fail
/// configuration loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeatureToggles {
    pub quiz_questions: bool,
    pub did_you_know: bool,
    pub case_studies: bool,
    pub summary_boxes: bool,
    pub expert_quotes: bool,
    pub real_world_examples: bool,
}

impl Default for FeatureToggles {
    fn default() -> Self {
        Self::all()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Quiz,
    DidYouKnow,
    CaseStudies,
    SummaryBoxes,
    ExpertQuotes,
    RealWorldExamples,
}

impl FeatureToggles {
    pub fn all() -> Self {
        Self {
            quiz_questions: true,
            did_you_know: true,
            case_studies: true,
            summary_boxes: true,
            expert_quotes: true,
            real_world_examples: true,
        }
    }

    pub fn none() -> Self {
        Self {
            quiz_questions: false,
            did_you_know: false,
            case_studies: false,
            summary_boxes: false,
            expert_quotes: false,
            real_world_examples: false,
        }
    }

    pub fn from_features(features: &[Feature]) -> Self {
        let mut toggles = Self::none();
        for feature in features {
            toggles.set(*feature, true);
        }
        toggles
    }

    pub fn enabled(&self, feature: Feature) -> bool {
        match feature {
            Feature::Quiz => self.quiz_questions,
            Feature::DidYouKnow => self.did_you_know,
            Feature::CaseStudies => self.case_studies,
            Feature::SummaryBoxes => self.summary_boxes,
            Feature::ExpertQuotes => self.expert_quotes,
            Feature::RealWorldExamples => self.real_world_examples,
        }
    }

    pub fn set(&mut self, feature: Feature, on: bool) {
        let slot = match feature {
            Feature::Quiz => &mut self.quiz_questions,
            Feature::DidYouKnow => &mut self.did_you_know,
            Feature::CaseStudies => &mut self.case_studies,
            Feature::SummaryBoxes => &mut self.summary_boxes,
            Feature::ExpertQuotes => &mut self.expert_quotes,
            Feature::RealWorldExamples => &mut self.real_world_examples,
        };
        *slot = on;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PdfSettings {
    pub pandoc: String,
    pub default_engine: String,
    pub fallback_engine: String,
    pub toc_depth: u8,
    pub margin: String,
    pub number_sections: bool,
    pub highlight_style: String,
    pub timeout_secs: u64,
}

impl Default for PdfSettings {
    fn default() -> Self {
        Self {
            pandoc: "pandoc".to_owned(),
            default_engine: "xelatex".to_owned(),
            fallback_engine: "pdflatex".to_owned(),
            toc_depth: 2,
            margin: "1in".to_owned(),
            number_sections: true,
            highlight_style: "tango".to_owned(),
            timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublicationSettings {
    pub author_name: String,
    pub publisher: String,
    pub version: String,
    pub isbn: String,
    pub license: String,
    pub license_full: String,
    pub contact_email: String,
    pub website: String,
}

impl Default for PublicationSettings {
    fn default() -> Self {
        Self {
            author_name: "AI Ebook Creator".to_owned(),
            publisher: "ebookforge".to_owned(),
            version: "1.0".to_owned(),
            isbn: "N/A".to_owned(),
            license: "CC BY-NC-SA 4.0".to_owned(),
            license_full: DEFAULT_LICENSE_TEXT.to_owned(),
            contact_email: "info@example.com".to_owned(),
            website: "https://example.com".to_owned(),
        }
    }
}

const DEFAULT_LICENSE_TEXT: &str = "This work is licensed under the **Creative Commons Attribution-NonCommercial-ShareAlike 4.0 International License (CC BY-NC-SA 4.0)**.

You are free to:

- **Share**: copy and redistribute the material in any medium or format
- **Adapt**: remix, transform, and build upon the material

Under the following terms:

- **Attribution**: You must give appropriate credit
- **NonCommercial**: You may not use the material for commercial purposes
- **ShareAlike**: If you remix, transform, or build upon the material, you must distribute your contributions under the same license

For the full license text, visit: https://creativecommons.org/licenses/by-nc-sa/4.0/";

/// Highest chapter count a preset may allow; section identifiers carry a
/// three-digit counter.
pub const MAX_CHAPTERS: usize = 999;

impl Default for Config {
    fn default() -> Self {
        let genres = [
            ("technology", "Informative, precise and forward-looking"),
            ("business", "Professional, pragmatic and actionable"),
            ("health", "Supportive, clear and evidence-based"),
            ("science", "Curious, rigorous and accessible"),
            ("history", "Narrative, vivid and insightful"),
            ("finance", "Clear, grounded and practical"),
            ("self_help", "Warm, motivating and personal"),
            ("education", "Encouraging, structured and approachable"),
        ]
        .into_iter()
        .map(|(name, tone)| {
            (
                name.to_owned(),
                GenreSettings {
                    tone: tone.to_owned(),
                },
            )
        })
        .collect();

        let book_length = [
            ("short", 3, 5, 800, 2),
            ("medium", 6, 10, 1_500, 3),
            ("long", 11, 15, 2_500, 4),
        ]
        .into_iter()
        .map(|(name, min, max, words, subsections)| {
            (
                name.to_owned(),
                LengthPreset {
                    min_chapters: min,
                    max_chapters: max,
                    words_per_section: words,
                    subsections,
                },
            )
        })
        .collect();

        Self {
            api: ApiSettings::default(),
            genres,
            book_length,
            content_features: FeatureToggles::default(),
            front_matter_sections: matter::FRONT_MATTER.map(str::to_owned).to_vec(),
            back_matter_sections: matter::BACK_MATTER.map(str::to_owned).to_vec(),
            pdf: PdfSettings::default(),
            publication: PublicationSettings::default(),
            template_path: PathBuf::from("templates/ebook_template.md"),
            lua_filter: Some(PathBuf::from("filters/boxify.lua")),
        }
    }
}

impl Config {
    /// Built-in defaults when `path` is `None`, otherwise the YAML file
    /// layered over the defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let config = match path {
            None => Self::default(),
            Some(path) => {
                let yaml = std::fs::read_to_string(path)
                    .with_context(|| format!("read config: {}", path.display()))?;
                serde_yaml::from_str(&yaml)
                    .with_context(|| format!("parse config: {}", path.display()))?
            }
        };
        config.validate().context("validate config")?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api.max_retries == 0 {
            anyhow::bail!("api.max_retries must be >= 1");
        }
        if self.genres.is_empty() {
            anyhow::bail!("at least one genre must be configured");
        }
        if self.book_length.is_empty() {
            anyhow::bail!("at least one book_length preset must be configured");
        }
        for (name, preset) in &self.book_length {
            if preset.min_chapters == 0 || preset.min_chapters > preset.max_chapters {
                anyhow::bail!(
                    "book_length.{name}: expected 1 <= min_chapters <= max_chapters, got {}..{}",
                    preset.min_chapters,
                    preset.max_chapters
                );
            }
            if preset.max_chapters > MAX_CHAPTERS {
                anyhow::bail!("book_length.{name}: max_chapters must be <= {MAX_CHAPTERS}");
            }
        }
        if self.pdf.default_engine.trim().is_empty() || self.pdf.fallback_engine.trim().is_empty()
        {
            anyhow::bail!("pdf engines must not be empty");
        }
        Ok(())
    }

    pub fn genre(&self, name: &str) -> anyhow::Result<&GenreSettings> {
        self.genres.get(name).ok_or_else(|| {
            let known = self.genres.keys().cloned().collect::<Vec<_>>().join(", ");
            anyhow::anyhow!("unknown genre: {name} (known: {known})")
        })
    }

    pub fn length_preset(&self, name: &str) -> anyhow::Result<&LengthPreset> {
        self.book_length.get(name).ok_or_else(|| {
            let known = self
                .book_length
                .keys()
                .cloned()
                .collect::<Vec<_>>()
                .join(", ");
            anyhow::anyhow!("unknown book length: {name} (known: {known})")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() -> anyhow::Result<()> {
        let config = Config::default();
        config.validate()?;
        assert!(config.genre("technology").is_ok());
        assert_eq!(config.length_preset("medium")?.subsections, 3);
        assert!(config.genre("poetry").is_err());
        Ok(())
    }

    #[test]
    fn yaml_overrides_are_layered_over_defaults() -> anyhow::Result<()> {
        let yaml = "api:\n  max_retries: 5\n  backoff: exponential\ncontent_features:\n  quiz_questions: false\n";
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;

        assert_eq!(config.api.max_retries, 5);
        assert_eq!(config.api.backoff, BackoffKind::Exponential);
        assert_eq!(config.api.rate_limit_delay_ms, 2_000);
        assert!(!config.content_features.quiz_questions);
        assert!(config.content_features.did_you_know);
        assert_eq!(config.pdf.default_engine, "xelatex");
        Ok(())
    }

    #[test]
    fn unknown_feature_toggle_is_rejected() {
        let yaml = "content_features:\n  quizz_questions: true\n";
        assert!(serde_yaml::from_str::<Config>(yaml).is_err());
    }

    #[test]
    fn inverted_length_preset_is_rejected() {
        let mut config = Config::default();
        config.book_length.insert(
            "broken".to_owned(),
            LengthPreset {
                min_chapters: 5,
                max_chapters: 2,
                words_per_section: 100,
                subsections: 1,
            },
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn toggles_from_features_enable_only_those() {
        let toggles = FeatureToggles::from_features(&[Feature::Quiz, Feature::CaseStudies]);
        assert!(toggles.enabled(Feature::Quiz));
        assert!(toggles.enabled(Feature::CaseStudies));
        assert!(!toggles.enabled(Feature::DidYouKnow));
        assert!(!toggles.enabled(Feature::SummaryBoxes));
    }
}
