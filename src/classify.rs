use std::collections::HashMap;
use std::str::FromStr;

use crate::formats::{GeneratedSection, SectionKind};

/// Filename-safe form of a title.
///
/// Lowercases, drops anything that is not a word character, whitespace or
/// `-`, then collapses runs of whitespace, `_` and `-` into a single `_`.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_sep = false;
    for ch in title.to_lowercase().chars() {
        if ch.is_whitespace() || ch == '_' || ch == '-' {
            pending_sep = true;
            continue;
        }
        if !ch.is_alphanumeric() {
            continue;
        }
        if pending_sep && !slug.is_empty() {
            slug.push('_');
        }
        pending_sep = false;
        slug.push(ch);
    }
    if slug.is_empty() {
        return "untitled".to_owned();
    }
    slug
}

/// `(kind rank, per-kind sequence)`. Sorting by this key gives document order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OrderingKey {
    pub rank: u8,
    pub sequence: u32,
}

/// `{rank:02}_{counter:03}_{slug}`. String order equals [`OrderingKey`] order
/// while counters stay below 1000.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SectionId {
    pub kind: SectionKind,
    pub counter: u32,
    pub slug: String,
}

impl SectionId {
    pub fn ordering_key(&self) -> OrderingKey {
        OrderingKey {
            rank: self.kind.rank(),
            sequence: self.counter,
        }
    }
}

impl std::fmt::Display for SectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:02}_{:03}_{}",
            self.kind.rank(),
            self.counter,
            self.slug
        )
    }
}

impl FromStr for SectionId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '_');
        let (Some(rank), Some(counter), Some(slug)) = (parts.next(), parts.next(), parts.next())
        else {
            anyhow::bail!("invalid section id: {s}");
        };
        if rank.len() != 2 || counter.len() < 3 || slug.is_empty() {
            anyhow::bail!("invalid section id: {s}");
        }
        let rank: u8 = rank
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid section rank in id: {s}"))?;
        let kind = SectionKind::from_rank(rank)
            .ok_or_else(|| anyhow::anyhow!("unknown section rank {rank} in id: {s}"))?;
        let counter: u32 = counter
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid section counter in id: {s}"))?;
        Ok(Self {
            kind,
            counter,
            slug: slug.to_owned(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ClassifiedSection {
    pub id: SectionId,
    pub section: GeneratedSection,
}

impl ClassifiedSection {
    pub fn ordering_key(&self) -> OrderingKey {
        self.id.ordering_key()
    }
}

/// Assigns identifiers to sections in the order they are generated. One
/// classifier per build; counters start at 1 for every kind.
#[derive(Debug, Default)]
pub struct Classifier {
    counters: HashMap<SectionKind, u32>,
}

impl Classifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self, kind: SectionKind, title: &str) -> SectionId {
        let counter = self.counters.entry(kind).or_insert(0);
        *counter += 1;
        SectionId {
            kind,
            counter: *counter,
            slug: slugify(title),
        }
    }

    pub fn classify(&mut self, section: GeneratedSection) -> ClassifiedSection {
        let id = self.next_id(section.kind(), section.title());
        ClassifiedSection { id, section }
    }
}

/// Sorts into document order. Stable for equal keys.
pub fn sort_by_ordering_key(sections: &mut [ClassifiedSection]) {
    sections.sort_by_key(ClassifiedSection::ordering_key);
}
