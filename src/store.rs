use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context as _;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::classify::{ClassifiedSection, SectionId};
use crate::formats::{GeneratedSection, SectionDescriptor, SectionKind};

/// Persisted section fragments, keyed by section identifier.
#[async_trait]
pub trait SectionStore: Send + Sync {
    async fn put(&self, id: &str, content: &str) -> anyhow::Result<()>;
    /// Identifiers in ascending order.
    async fn list(&self) -> anyhow::Result<Vec<String>>;
    async fn get(&self, id: &str) -> anyhow::Result<Option<String>>;
}

/// `<base>/sections/<id>.md`, written atomically.
#[derive(Debug, Clone)]
pub struct LocalFsSectionStore {
    base_dir: PathBuf,
}

impl LocalFsSectionStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn sections_dir(&self) -> PathBuf {
        self.base_dir.join("sections")
    }

    fn section_path(&self, id: &str) -> PathBuf {
        self.sections_dir().join(format!("{id}.md"))
    }
}

#[async_trait]
impl SectionStore for LocalFsSectionStore {
    async fn put(&self, id: &str, content: &str) -> anyhow::Result<()> {
        validate_id(id)?;
        write_atomic(&self.section_path(id), content.as_bytes())
            .await
            .with_context(|| format!("write section: {id}"))
    }

    async fn list(&self) -> anyhow::Result<Vec<String>> {
        let dir = self.sections_dir();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("read dir: {}", dir.display()));
            }
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("read dir entry: {}", dir.display()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_owned());
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn get(&self, id: &str) -> anyhow::Result<Option<String>> {
        validate_id(id)?;
        let path = self.section_path(id);
        match fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("read: {}", path.display())),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemorySectionStore {
    sections: Mutex<BTreeMap<String, String>>,
}

impl InMemorySectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> anyhow::Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>> {
        self.sections
            .lock()
            .map_err(|_| anyhow::anyhow!("section store lock poisoned"))
    }
}

#[async_trait]
impl SectionStore for InMemorySectionStore {
    async fn put(&self, id: &str, content: &str) -> anyhow::Result<()> {
        validate_id(id)?;
        self.lock()?.insert(id.to_owned(), content.to_owned());
        Ok(())
    }

    async fn list(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.lock()?.keys().cloned().collect())
    }

    async fn get(&self, id: &str) -> anyhow::Result<Option<String>> {
        Ok(self.lock()?.get(id).cloned())
    }
}

fn validate_id(id: &str) -> anyhow::Result<()> {
    if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
        anyhow::bail!("invalid section id: {id:?}");
    }
    Ok(())
}

pub(crate) async fn write_atomic(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create parent dir: {}", parent.display()))?;

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    fs::write(&tmp_path, data)
        .await
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SectionFrontMatter {
    id: String,
    kind: SectionKind,
    title: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    subtopics: Vec<String>,
    #[serde(default)]
    heading_added: bool,
}

/// Store representation: YAML front matter, then the section text. Text
/// without a heading is prefixed with `# Title` so the file reads on its own.
pub fn encode_section(section: &ClassifiedSection) -> anyhow::Result<String> {
    let text = section.section.full_text();
    let heading_added = !text.trim_start().starts_with('#');
    let front = SectionFrontMatter {
        id: section.id.to_string(),
        kind: section.section.kind(),
        title: section.section.title().to_owned(),
        subtopics: section.section.descriptor.subtopics.clone(),
        heading_added,
    };
    let yaml = serde_yaml::to_string(&front).context("serialize section front matter")?;

    let mut out = format!("---\n{yaml}---\n\n");
    if heading_added {
        out.push_str("# ");
        out.push_str(section.section.title());
        out.push_str("\n\n");
    }
    out.push_str(&text);
    out.push('\n');
    Ok(out)
}

pub fn decode_section(content: &str) -> anyhow::Result<ClassifiedSection> {
    let (yaml, body) = split_front_matter(content)
        .ok_or_else(|| anyhow::anyhow!("missing section front matter"))?;
    let front: SectionFrontMatter =
        serde_yaml::from_str(yaml).context("parse section front matter")?;
    let id: SectionId = front.id.parse()?;
    if id.kind != front.kind {
        anyhow::bail!(
            "section id {} does not match kind {}",
            front.id,
            front.kind
        );
    }

    let mut body = body.trim_start_matches('\n');
    if front.heading_added {
        let heading = format!("# {}", front.title);
        if let Some(rest) = body.strip_prefix(&heading) {
            body = rest.trim_start_matches('\n');
        }
    }
    let body = body.strip_suffix('\n').unwrap_or(body);

    let descriptor = SectionDescriptor::new(front.title, front.kind).with_subtopics(front.subtopics);
    Ok(ClassifiedSection {
        id,
        section: GeneratedSection::new(descriptor, body),
    })
}

fn split_front_matter(content: &str) -> Option<(&str, &str)> {
    let rest = content.strip_prefix("---\n")?;
    let end = rest.find("\n---\n")?;
    Some((&rest[..end + 1], &rest[end + "\n---\n".len()..]))
}

/// Reads every stored section back in identifier order.
pub async fn load_sections(store: &dyn SectionStore) -> anyhow::Result<Vec<ClassifiedSection>> {
    let mut sections = Vec::new();
    for id in store.list().await.context("list sections")? {
        let Some(content) = store.get(&id).await? else {
            continue;
        };
        let section = decode_section(&content).with_context(|| format!("decode section: {id}"))?;
        sections.push(section);
    }
    Ok(sections)
}
