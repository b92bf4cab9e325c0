use std::path::{Path, PathBuf};

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::formats::SectionKind;
use crate::render::RenderOutcome;

/// A failure the build recovered from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BuildIssue {
    /// The backend plan was unusable; the built-in outline was used.
    OutlinePlan { error: String },
    /// All attempts failed; the body carries the failure marker.
    SectionGeneration {
        title: String,
        attempts: u32,
        last_error: String,
    },
    /// An optional appendix (quiz, summary) was skipped.
    AppendixGeneration {
        title: String,
        appendix: String,
        attempts: u32,
        last_error: String,
    },
    TemplateMissing { path: PathBuf, error: String },
    /// Two sections resolved to one placeholder; the later body was appended.
    PlaceholderCollision {
        placeholder: String,
        kept: String,
        appended: String,
    },
    /// The template has no slot for a named section; it went to main content.
    UnplacedSection { title: String, placeholder: String },
    RenderEngine { engine: String, error: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionStatus {
    Generated,
    Failed,
    Static,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionRecord {
    pub id: String,
    pub title: String,
    pub kind: SectionKind,
    pub status: SectionStatus,
}

/// Written as `report.json` next to the compiled document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildReport {
    pub build_id: String,
    pub topic: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub outline_fallback: bool,
    pub sections: Vec<SectionRecord>,
    pub issues: Vec<BuildIssue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compiled_document: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compiled_sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render: Option<RenderOutcome>,
}

impl BuildReport {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            build_id: uuid::Uuid::new_v4().to_string(),
            topic: topic.into(),
            started_at: Utc::now(),
            finished_at: None,
            outline_fallback: false,
            sections: Vec::new(),
            issues: Vec::new(),
            compiled_document: None,
            compiled_sha256: None,
            render: None,
        }
    }

    /// Every section produced real text.
    pub fn generation_succeeded(&self) -> bool {
        !self
            .issues
            .iter()
            .any(|issue| matches!(issue, BuildIssue::SectionGeneration { .. }))
    }

    pub fn typesetting_succeeded(&self) -> bool {
        self.render.as_ref().is_some_and(RenderOutcome::succeeded)
    }

    pub fn record_compiled(&mut self, path: &Path, contents: &str) {
        self.compiled_document = Some(path.to_owned());
        self.compiled_sha256 = Some(sha256_hex(contents.as_bytes()));
    }

    /// Stores the outcome and logs its engine failures as issues.
    pub fn record_render(&mut self, outcome: RenderOutcome, primary: &str, fallback: &str) {
        match &outcome {
            RenderOutcome::Primary { .. } => {}
            RenderOutcome::Fallback { primary_error, .. } => {
                self.issues.push(BuildIssue::RenderEngine {
                    engine: primary.to_owned(),
                    error: primary_error.clone(),
                });
            }
            RenderOutcome::Failed {
                primary_error,
                fallback_error,
                ..
            } => {
                self.issues.push(BuildIssue::RenderEngine {
                    engine: primary.to_owned(),
                    error: primary_error.clone(),
                });
                self.issues.push(BuildIssue::RenderEngine {
                    engine: fallback.to_owned(),
                    error: fallback_error.clone(),
                });
            }
        }
        self.render = Some(outcome);
    }

    pub async fn write(&mut self, path: &Path) -> anyhow::Result<()> {
        self.finished_at = Some(Utc::now());
        let data = serde_json::to_vec_pretty(self).context("serialize build report")?;
        crate::store::write_atomic(path, &data)
            .await
            .with_context(|| format!("write report: {}", path.display()))
    }
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
