use serde::{Deserialize, Serialize};

/// Structural role of a section. Declaration order is document order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    FrontMatter,
    Preface,
    Introduction,
    Chapter,
    Conclusion,
    BackMatter,
    Other,
}

impl SectionKind {
    pub const ALL: [SectionKind; 7] = [
        SectionKind::FrontMatter,
        SectionKind::Preface,
        SectionKind::Introduction,
        SectionKind::Chapter,
        SectionKind::Conclusion,
        SectionKind::BackMatter,
        SectionKind::Other,
    ];

    /// Fixed rank used as the leading component of section identifiers.
    pub fn rank(self) -> u8 {
        match self {
            SectionKind::FrontMatter => 1,
            SectionKind::Preface => 2,
            SectionKind::Introduction => 3,
            SectionKind::Chapter => 4,
            SectionKind::Conclusion => 5,
            SectionKind::BackMatter => 6,
            SectionKind::Other => 99,
        }
    }

    pub fn from_rank(rank: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.rank() == rank)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SectionKind::FrontMatter => "front_matter",
            SectionKind::Preface => "preface",
            SectionKind::Introduction => "introduction",
            SectionKind::Chapter => "chapter",
            SectionKind::Conclusion => "conclusion",
            SectionKind::BackMatter => "back_matter",
            SectionKind::Other => "other",
        }
    }

    /// Kinds bound to their own named template slot.
    pub fn is_named_slot(self) -> bool {
        matches!(
            self,
            SectionKind::FrontMatter | SectionKind::BackMatter | SectionKind::Preface
        )
    }
}

impl std::fmt::Display for SectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Planned (not yet generated) section. Immutable once the outline is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionDescriptor {
    pub title: String,
    pub kind: SectionKind,
    #[serde(default)]
    pub subtopics: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl SectionDescriptor {
    pub fn new(title: impl Into<String>, kind: SectionKind) -> Self {
        Self {
            title: title.into(),
            kind,
            subtopics: Vec::new(),
            notes: None,
        }
    }

    #[must_use]
    pub fn with_subtopics(mut self, subtopics: Vec<String>) -> Self {
        self.subtopics = subtopics;
        self
    }

    #[must_use]
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// A descriptor paired with its synthesized text.
///
/// `appendices` only ever grows; `body` is never edited after synthesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedSection {
    pub descriptor: SectionDescriptor,
    pub body: String,
    #[serde(default)]
    pub appendices: Vec<String>,
}

impl GeneratedSection {
    pub fn new(descriptor: SectionDescriptor, body: impl Into<String>) -> Self {
        Self {
            descriptor,
            body: body.into(),
            appendices: Vec::new(),
        }
    }

    pub fn push_appendix(&mut self, block: impl Into<String>) {
        self.appendices.push(block.into());
    }

    pub fn title(&self) -> &str {
        &self.descriptor.title
    }

    pub fn kind(&self) -> SectionKind {
        self.descriptor.kind
    }

    /// Body followed by every appendix, blank-line separated.
    pub fn full_text(&self) -> String {
        let mut text = self.body.trim_end().to_owned();
        for appendix in &self.appendices {
            let appendix = appendix.trim();
            if appendix.is_empty() {
                continue;
            }
            text.push_str("\n\n");
            text.push_str(appendix);
        }
        text
    }
}

/// The accepted section plan, written to `outline.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outline {
    pub topic: String,
    pub chapter_count: usize,
    pub subsections_per_chapter: usize,
    /// `true` when the backend plan was unusable and the built-in plan was used.
    pub fallback: bool,
    pub sections: Vec<SectionDescriptor>,
}

impl Outline {
    pub fn chapters(&self) -> impl Iterator<Item = &SectionDescriptor> {
        self.sections
            .iter()
            .filter(|s| s.kind == SectionKind::Chapter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_order_matches_rank_order() {
        let mut by_rank = SectionKind::ALL.to_vec();
        by_rank.sort_by_key(|k| k.rank());
        assert_eq!(by_rank, SectionKind::ALL.to_vec());
        for kind in SectionKind::ALL {
            assert_eq!(SectionKind::from_rank(kind.rank()), Some(kind));
        }
    }

    #[test]
    fn only_matter_kinds_take_named_slots() {
        let named = SectionKind::ALL
            .into_iter()
            .filter(|kind| kind.is_named_slot())
            .collect::<Vec<_>>();
        assert_eq!(
            named,
            vec![SectionKind::FrontMatter, SectionKind::Preface, SectionKind::BackMatter]
        );
    }

    #[test]
    fn full_text_appends_non_empty_appendices() {
        let mut section = GeneratedSection::new(
            SectionDescriptor::new("Chapter 1", SectionKind::Chapter),
            "Body text.\n\n",
        );
        section.push_appendix("  ");
        section.push_appendix("## Quiz\n\nQ1");

        assert_eq!(section.full_text(), "Body text.\n\n## Quiz\n\nQ1");
        assert_eq!(section.appendices.len(), 2);
    }
}
