use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::Context as _;
use chrono::{Datelike as _, NaiveDate};
use regex::{Captures, Regex};
use serde::Serialize;

use crate::boxes;
use crate::classify::ClassifiedSection;
use crate::config::{PdfSettings, PublicationSettings};
use crate::formats::SectionKind;
use crate::report::BuildIssue;

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([A-Z0-9_]+)\}\}").unwrap());

pub const MAIN_CONTENT: &str = "MAIN_CONTENT";

/// Slots a template may declare for optional sections. Absent sections
/// leave them empty.
pub const OPTIONAL_PLACEHOLDERS: [&str; 14] = [
    "DEDICATION",
    "EPIGRAPH",
    "FOREWORD",
    "PREFACE",
    "ACKNOWLEDGMENTS",
    "EPILOGUE",
    "AFTERWORD",
    "APPENDICES",
    "GLOSSARY",
    "NOTES_REFERENCES",
    "BIBLIOGRAPHY",
    "INDEX",
    "ABOUT_AUTHOR",
    "OTHER_BOOKS",
];

/// Preamble for the box environments `filters/boxify.lua` emits and for the
/// static index page. `templates/ebook_template.md` declares the same lines.
pub const BOX_HEADER_INCLUDES: [&str; 7] = [
    "\\usepackage[most]{tcolorbox}",
    "\\usepackage{makeidx}",
    "\\makeindex",
    "\\newtcolorbox{quizbox}{colback=blue!4,colframe=blue!60!black,title=Chapter Quiz,breakable}",
    "\\newtcolorbox{didyouknowbox}{colback=yellow!8,colframe=orange!80!black,title=Did You Know?,breakable}",
    "\\newtcolorbox{keytakeawaybox}{colback=green!5,colframe=green!50!black,title=Key Takeaways,breakable}",
    "\\newtcolorbox{casestudybox}{colback=gray!6,colframe=gray!60!black,title=Case Study,breakable}",
];

const SLOT_ALIASES: [(&str, &str); 3] = [
    ("NOTES_AND_REFERENCES", "NOTES_REFERENCES"),
    ("ABOUT_THE_AUTHOR", "ABOUT_AUTHOR"),
    ("OTHER_BOOKS_BY_AUTHOR", "OTHER_BOOKS"),
];

#[derive(Debug, Clone)]
pub struct Template {
    text: String,
}

impl Template {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("read template: {}", path.display()))?;
        Ok(Self::new(text))
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn placeholders(&self) -> BTreeSet<String> {
        PLACEHOLDER_RE
            .captures_iter(&self.text)
            .map(|caps| caps[1].to_owned())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookMetadata {
    pub topic: String,
    pub genre: String,
    pub subtitle: String,
    pub author: String,
    pub publisher: String,
    pub version: String,
    pub isbn: String,
    pub license: String,
    pub license_full: String,
    pub keywords: String,
    pub description: String,
    pub contact_email: String,
    pub website: String,
    pub published: NaiveDate,
}

impl BookMetadata {
    pub fn new(
        topic: &str,
        genre: &str,
        publication: &PublicationSettings,
        published: NaiveDate,
    ) -> Self {
        let topic = topic.trim();
        Self {
            topic: topic.to_owned(),
            genre: genre.to_owned(),
            subtitle: format!("A Comprehensive Guide to {topic}"),
            author: publication.author_name.clone(),
            publisher: publication.publisher.clone(),
            version: publication.version.clone(),
            isbn: publication.isbn.clone(),
            license: publication.license.clone(),
            license_full: publication.license_full.clone(),
            keywords: keywords(topic, genre),
            description: format!(
                "A comprehensive {} guide exploring {topic} in depth.",
                genre_display(genre).to_lowercase()
            ),
            contact_email: publication.contact_email.clone(),
            website: publication.website.clone(),
            published,
        }
    }

    pub fn publication_date(&self) -> String {
        self.published.format("%B %Y").to_string()
    }

    fn replacements(&self) -> Vec<(&'static str, String)> {
        vec![
            ("BOOK_TITLE", self.topic.clone()),
            ("BOOK_SUBTITLE", self.subtitle.clone()),
            ("AUTHOR_NAME", self.author.clone()),
            ("PUBLICATION_DATE", self.publication_date()),
            ("VERSION", self.version.clone()),
            ("COPYRIGHT_YEAR", self.published.year().to_string()),
            ("PUBLISHER", self.publisher.clone()),
            ("ISBN", self.isbn.clone()),
            ("LICENSE", self.license.clone()),
            ("LICENSE_FULL", self.license_full.clone()),
            ("KEYWORDS", self.keywords.clone()),
            ("BOOK_DESCRIPTION", self.description.clone()),
            ("SUBJECT", self.topic.clone()),
            ("GENRE", genre_display(&self.genre)),
            ("CONTACT_EMAIL", self.contact_email.clone()),
            ("WEBSITE", self.website.clone()),
        ]
    }
}

/// Topic words longer than three characters plus the genre, at most ten.
fn keywords(topic: &str, genre: &str) -> String {
    topic
        .split_whitespace()
        .filter(|word| word.chars().count() > 3)
        .map(str::to_lowercase)
        .chain(std::iter::once(genre_display(genre).to_lowercase()))
        .take(10)
        .collect::<Vec<_>>()
        .join(", ")
}

/// `self_help` -> `Self Help`.
fn genre_display(genre: &str) -> String {
    genre
        .split(['_', ' '])
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Template slot for a named section: uppercased title, `&` spelled `AND`,
/// separators joined by `_`, then known aliases applied.
pub fn slot_placeholder(title: &str) -> String {
    let mut name = String::with_capacity(title.len() + 4);
    let mut pending_sep = false;
    for ch in title.trim().chars() {
        if ch == '&' {
            pending_sep = true;
            push_word(&mut name, &mut pending_sep, "AND");
            pending_sep = true;
            continue;
        }
        if ch.is_whitespace() || ch == '_' || ch == '-' {
            pending_sep = true;
            continue;
        }
        if !ch.is_ascii_alphanumeric() {
            continue;
        }
        let upper = ch.to_ascii_uppercase().to_string();
        push_word(&mut name, &mut pending_sep, &upper);
    }
    SLOT_ALIASES
        .iter()
        .find(|(from, _)| *from == name)
        .map(|(_, to)| (*to).to_owned())
        .unwrap_or(name)
}

fn push_word(name: &mut String, pending_sep: &mut bool, word: &str) {
    if *pending_sep && !name.is_empty() {
        name.push('_');
    }
    *pending_sep = false;
    name.push_str(word);
}

/// `{{NAME}}` inside a value becomes `\{\{NAME\}\}` so it survives as
/// literal text and is never substituted.
pub fn escape_placeholders(value: &str) -> String {
    PLACEHOLDER_RE
        .replace_all(value, |caps: &Captures<'_>| format!("\\{{\\{{{}\\}}\\}}", &caps[1]))
        .into_owned()
}

/// Page break before chapters, a heading when the text has none, then
/// box extraction.
pub fn format_section(section: &ClassifiedSection) -> String {
    let title = section.section.title();
    let kind = section.section.kind();
    let text = section.section.full_text();

    let mut out = String::new();
    if kind == SectionKind::Chapter {
        out.push_str("\\newpage\n\n");
    }
    if !text.trim_start().starts_with('#') {
        match kind {
            SectionKind::Chapter => out.push_str(&format!("# {title}\n\n")),
            SectionKind::Other => out.push_str(&format!("## {title}\n\n")),
            _ => out.push_str(&format!("# {title} {{.unnumbered}}\n\n")),
        }
    }
    out.push_str(boxes::extract(title, &text).trim_end());
    out
}

#[derive(Debug, Clone)]
pub struct CompiledDocument {
    pub text: String,
    pub issues: Vec<BuildIssue>,
}

/// Fills `template` from metadata and sections. Sections are placed in
/// ordering-key order whatever order they arrive in.
pub fn compile(
    template: &Template,
    metadata: &BookMetadata,
    sections: &[ClassifiedSection],
) -> CompiledDocument {
    let declared = template.placeholders();
    let mut issues = Vec::new();
    let mut values: HashMap<String, String> = metadata
        .replacements()
        .into_iter()
        .map(|(name, value)| (name.to_owned(), value))
        .collect();

    let mut owners: HashMap<String, String> = HashMap::new();
    let mut leading = Vec::new();
    let mut main = Vec::new();
    let mut trailing = Vec::new();

    for section in sorted(sections) {
        let formatted = format_section(section);
        let kind = section.section.kind();
        let title = section.section.title();

        if !kind.is_named_slot() {
            if kind == SectionKind::Other {
                trailing.push(formatted);
            } else {
                main.push(formatted);
            }
            continue;
        }

        let placeholder = match kind {
            SectionKind::Preface => "PREFACE".to_owned(),
            _ => slot_placeholder(title),
        };
        let reserved = placeholder == MAIN_CONTENT
            || (values.contains_key(&placeholder) && !owners.contains_key(&placeholder));
        if placeholder.is_empty() || reserved || !declared.contains(&placeholder) {
            tracing::warn!(
                title,
                placeholder = %placeholder,
                "no template slot for section; placing it with main content"
            );
            issues.push(BuildIssue::UnplacedSection {
                title: title.to_owned(),
                placeholder: placeholder.clone(),
            });
            if kind == SectionKind::BackMatter {
                trailing.push(formatted);
            } else {
                leading.push(formatted);
            }
            continue;
        }

        if let Some(kept) = owners.get(&placeholder) {
            tracing::warn!(
                placeholder = %placeholder,
                kept = %kept,
                appended = title,
                "placeholder collision; appending"
            );
            issues.push(BuildIssue::PlaceholderCollision {
                placeholder: placeholder.clone(),
                kept: kept.clone(),
                appended: title.to_owned(),
            });
            if let Some(existing) = values.get_mut(&placeholder) {
                existing.push_str("\n\n");
                existing.push_str(&formatted);
            }
            continue;
        }
        owners.insert(placeholder.clone(), title.to_owned());
        values.insert(placeholder, formatted);
    }

    let main_content = leading
        .into_iter()
        .chain(main)
        .chain(trailing)
        .collect::<Vec<_>>()
        .join("\n\n");
    values.insert(MAIN_CONTENT.to_owned(), main_content);

    for name in OPTIONAL_PLACEHOLDERS
        .iter()
        .map(|name| (*name).to_owned())
        .chain(declared)
    {
        values.entry(name).or_default();
    }

    let values = values
        .into_iter()
        .map(|(name, value)| (name, escape_placeholders(&value)))
        .collect::<HashMap<_, _>>();
    let value = |name: &str| values.get(name).cloned().unwrap_or_default();
    let (front_matter, body) = split_front_matter(template.text());
    let mut text = PLACEHOLDER_RE
        .replace_all(front_matter, |caps: &Captures<'_>| yaml_quoted_inner(&value(&caps[1])))
        .into_owned();
    text.push_str(&PLACEHOLDER_RE.replace_all(body, |caps: &Captures<'_>| value(&caps[1])));

    CompiledDocument { text, issues }
}

/// Leading `---` YAML block (delimiters included) and the rest.
fn split_front_matter(text: &str) -> (&str, &str) {
    if let Some(rest) = text.strip_prefix("---\n")
        && let Some(end) = rest.find("\n---\n")
    {
        return text.split_at("---\n".len() + end + "\n---\n".len());
    }
    ("", text)
}

/// Front matter placeholders sit inside double-quoted YAML scalars, so the
/// value is written with JSON string escapes minus the outer quotes.
fn yaml_quoted_inner(value: &str) -> String {
    serde_json::to_string(value)
        .ok()
        .and_then(|quoted| {
            quoted
                .strip_prefix('"')
                .and_then(|q| q.strip_suffix('"'))
                .map(str::to_owned)
        })
        .unwrap_or_default()
}

#[derive(Serialize)]
struct FallbackFrontMatter<'a> {
    title: &'a str,
    subtitle: &'a str,
    author: &'a str,
    date: String,
    lang: &'static str,
    documentclass: &'static str,
    classoption: [&'static str; 3],
    geometry: String,
    toc: bool,
    #[serde(rename = "toc-depth")]
    toc_depth: u8,
    #[serde(rename = "number-sections")]
    number_sections: bool,
    colorlinks: bool,
    linkcolor: &'static str,
    urlcolor: &'static str,
    keywords: Vec<&'a str>,
    subject: &'a str,
    #[serde(rename = "header-includes")]
    header_includes: [&'static str; 7],
}

/// Degraded compile used when no template is available: a metadata header
/// followed by every section in ordering-key order, without named slots.
pub fn compile_without_template(
    metadata: &BookMetadata,
    pdf: &PdfSettings,
    sections: &[ClassifiedSection],
) -> anyhow::Result<String> {
    let front = FallbackFrontMatter {
        title: &metadata.topic,
        subtitle: &metadata.subtitle,
        author: &metadata.author,
        date: metadata.publication_date(),
        lang: "en-US",
        documentclass: "book",
        classoption: ["11pt", "oneside", "openany"],
        geometry: format!("margin={}", pdf.margin),
        toc: true,
        toc_depth: pdf.toc_depth,
        number_sections: pdf.number_sections,
        colorlinks: true,
        linkcolor: "blue",
        urlcolor: "blue",
        keywords: metadata.keywords.split(", ").filter(|k| !k.is_empty()).collect(),
        subject: &metadata.topic,
        header_includes: BOX_HEADER_INCLUDES,
    };
    let yaml = serde_yaml::to_string(&front).context("serialize document metadata")?;

    let title = latex_escape(&metadata.topic);
    let subtitle = latex_escape(&metadata.subtitle);
    let author = latex_escape(&metadata.author);
    let date = metadata.publication_date();
    let year = metadata.published.year();
    let license = &metadata.license_full;

    let mut out = format!(
        "---\n{yaml}---\n
\\begin{{titlepage}}
\\begin{{center}}
\\vspace*{{2cm}}

{{\\Huge\\bfseries {title}}}

\\vspace{{0.5cm}}

{{\\LARGE {subtitle}}}

\\vspace{{2cm}}

{{\\Large\\itshape {author}}}

\\vfill

{{\\large {date}}}
\\end{{center}}
\\end{{titlepage}}

\\newpage

# Copyright {{.unnumbered}}

**Copyright © {year} {author}**

{license}

\\newpage
"
    );

    let body = sorted(sections)
        .into_iter()
        .map(format_section)
        .collect::<Vec<_>>()
        .join("\n\n");
    out.push('\n');
    out.push_str(&body);
    out.push('\n');
    Ok(escape_placeholders(&out))
}

/// Loads the template and compiles; an unreadable template degrades to
/// [`compile_without_template`] and is recorded.
pub async fn compile_from_path(
    template_path: &Path,
    metadata: &BookMetadata,
    pdf: &PdfSettings,
    sections: &[ClassifiedSection],
) -> anyhow::Result<CompiledDocument> {
    let compiled = match Template::load(template_path).await {
        Ok(template) => compile(&template, metadata, sections),
        Err(err) => {
            let error = format!("{err:#}");
            tracing::warn!(error = %error, "template unavailable; compiling without it");
            let text = compile_without_template(metadata, pdf, sections)?;
            CompiledDocument {
                text,
                issues: vec![BuildIssue::TemplateMissing {
                    path: PathBuf::from(template_path),
                    error,
                }],
            }
        }
    };
    let leftover = unresolved_placeholders(&compiled.text);
    if !leftover.is_empty() {
        tracing::warn!(?leftover, "compiled document still contains placeholders");
    }
    Ok(compiled)
}

fn sorted(sections: &[ClassifiedSection]) -> Vec<&ClassifiedSection> {
    let mut sorted = sections.iter().collect::<Vec<_>>();
    sorted.sort_by_key(|s| s.ordering_key());
    sorted
}

fn latex_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' | '%' | '$' | '#' | '_' | '{' | '}' => {
                out.push('\\');
                out.push(ch);
            }
            '~' => out.push_str("\\textasciitilde{}"),
            '^' => out.push_str("\\textasciicircum{}"),
            '\\' => out.push_str("\\textbackslash{}"),
            _ => out.push(ch),
        }
    }
    out
}

/// Placeholder names left in `text`, for diagnostics.
pub fn unresolved_placeholders(text: &str) -> BTreeMap<String, usize> {
    let mut found = BTreeMap::new();
    for caps in PLACEHOLDER_RE.captures_iter(text) {
        *found.entry(caps[1].to_owned()).or_insert(0) += 1;
    }
    found
}
