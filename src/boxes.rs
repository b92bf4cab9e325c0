//! Rewrites informal inline markers into pandoc fenced-div containers.
//!
//! The scan is line based. Code fences and containers that already exist are
//! opaque: no marker inside them is rewritten, and every container produced
//! here becomes opaque for the passes that follow. Running the extractor on
//! its own output is a no-op.

use std::sync::LazyLock;

use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxKind {
    Quiz,
    DidYouKnow,
    KeyTakeaway,
    CaseStudy,
}

impl BoxKind {
    /// Pass order. Earlier kinds claim their lines first.
    pub const PASSES: [BoxKind; 4] = [
        BoxKind::Quiz,
        BoxKind::DidYouKnow,
        BoxKind::KeyTakeaway,
        BoxKind::CaseStudy,
    ];

    pub fn class(self) -> &'static str {
        match self {
            BoxKind::Quiz => "quiz",
            BoxKind::DidYouKnow => "didyouknow",
            BoxKind::KeyTakeaway => "keytakeaway",
            BoxKind::CaseStudy => "casestudy",
        }
    }

    fn marker(self) -> &'static Regex {
        match self {
            BoxKind::Quiz => &QUIZ_RE,
            BoxKind::DidYouKnow => &DID_YOU_KNOW_RE,
            BoxKind::KeyTakeaway => &KEY_TAKEAWAY_RE,
            BoxKind::CaseStudy => &CASE_STUDY_RE,
        }
    }
}

static QUIZ_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s{0,3}#{1,6}\s*(?:📝\s*)?Chapter Quiz\s*#*\s*$").unwrap()
});

static DID_YOU_KNOW_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\*\*Did You Know\?\*\*\s*(.*?)\s*$").unwrap());

static KEY_TAKEAWAY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\*\*Key Takeaways?:?\*\*:?\s*(.*?)\s*$").unwrap()
});

static CASE_STUDY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\*\*Case Study:\s*(.*?)\*\*\s*(.*?)\s*$").unwrap()
});

static HEADING_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s{0,3}#{1,6}(?:\s|$)").unwrap());

static RULE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s{0,3}(?:-{3,}|\*{3,}|_{3,})\s*$").unwrap());

/// One recognized marker and the lines it spans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoxMatch {
    pub kind: BoxKind,
    /// Index of the marker line.
    pub start: usize,
    /// One past the last consumed line.
    pub end: usize,
    /// Container body, without the fence lines.
    pub inner: Vec<String>,
}

#[derive(Debug, Clone)]
struct Line {
    text: String,
    /// Inside a code fence (fence lines included).
    fenced: bool,
    /// Opaque to marker passes.
    claimed: bool,
}

impl Line {
    fn open(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            fenced: false,
            claimed: false,
        }
    }

    fn claimed(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            fenced: false,
            claimed: true,
        }
    }

    fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Sections whose title names a preface or prologue keep their text verbatim.
pub fn is_exempt(title: &str) -> bool {
    let title = title.to_lowercase();
    title.contains("preface") || title.contains("prologue")
}

/// Escapes table-reserved characters, then rewrites markers into containers.
pub fn extract(title: &str, text: &str) -> String {
    if is_exempt(title) {
        return text.to_owned();
    }

    let mut lines = classify_lines(text);
    for line in lines.iter_mut().filter(|l| !l.fenced) {
        if is_table_line(&line.text) {
            line.text = escape_table_reserved(&line.text);
        }
    }
    for kind in BoxKind::PASSES {
        lines = apply_pass(lines, kind);
    }

    let mut out = lines
        .into_iter()
        .map(|line| line.text)
        .collect::<Vec<_>>()
        .join("\n");
    if text.ends_with('\n') {
        out.push('\n');
    }
    out
}

/// All matches of one kind, in line order, against unclaimed text.
pub fn find_matches(text: &str, kind: BoxKind) -> Vec<BoxMatch> {
    find_in_lines(&classify_lines(text), kind)
}

fn is_table_line(line: &str) -> bool {
    line.contains('|') && !HEADING_RE.is_match(line)
}

/// Backslash-escapes `&`, `%` and `#` that are not already escaped.
pub fn escape_table_reserved(line: &str) -> String {
    let mut out = String::with_capacity(line.len() + 8);
    let mut prev = None;
    for ch in line.chars() {
        if matches!(ch, '&' | '%' | '#') && prev != Some('\\') {
            out.push('\\');
        }
        out.push(ch);
        prev = Some(ch);
    }
    out
}

fn classify_lines(text: &str) -> Vec<Line> {
    let mut lines = Vec::new();
    let mut fence: Option<String> = None;
    let mut div_depth = 0usize;

    for raw in text.lines() {
        let mut line = Line::open(raw);

        if let Some(marker) = fence.as_deref() {
            line.fenced = true;
            line.claimed = true;
            if fence_end_marker(raw, marker) {
                fence = None;
            }
        } else if let Some(marker) = fence_start_marker(raw) {
            fence = Some(marker.to_owned());
            line.fenced = true;
            line.claimed = true;
        } else if is_div_open(raw) {
            div_depth += 1;
            line.claimed = true;
        } else if div_depth > 0 {
            line.claimed = true;
            if is_div_close(raw) {
                div_depth -= 1;
            }
        }

        lines.push(line);
    }
    lines
}

fn fence_start_marker(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    for tick in ['`', '~'] {
        let len = trimmed.chars().take_while(|c| *c == tick).count();
        if len >= 3 {
            return Some(&trimmed[..len]);
        }
    }
    None
}

fn fence_end_marker(line: &str, marker: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with(marker) && trimmed.chars().all(|c| Some(c) == marker.chars().next())
}

fn is_div_open(line: &str) -> bool {
    let trimmed = line.trim();
    let colons = trimmed.chars().take_while(|c| *c == ':').count();
    colons >= 3 && !trimmed[colons..].trim().is_empty()
}

fn is_div_close(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.len() >= 3 && trimmed.chars().all(|c| c == ':')
}

fn is_boundary(line: &Line, kind: BoxKind) -> bool {
    line.claimed
        || HEADING_RE.is_match(&line.text)
        || RULE_RE.is_match(&line.text)
        || line.text.trim_start().starts_with(":::")
        || kind.marker().is_match(&line.text)
}

fn starts_new_paragraph(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("**") || trimmed.chars().next().is_some_and(char::is_uppercase)
}

fn find_in_lines(lines: &[Line], kind: BoxKind) -> Vec<BoxMatch> {
    let mut matches = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let line = &lines[i];
        if line.claimed {
            i += 1;
            continue;
        }
        let Some(captures) = kind.marker().captures(&line.text) else {
            i += 1;
            continue;
        };

        let found = match kind {
            BoxKind::Quiz => quiz_span(lines, i),
            BoxKind::DidYouKnow | BoxKind::KeyTakeaway => {
                let lead = captures.get(1).map_or("", |m| m.as_str());
                paragraph_span(lines, i, kind, lead, Vec::new())
            }
            BoxKind::CaseStudy => {
                let title = captures.get(1).map_or("", |m| m.as_str().trim());
                let lead = captures.get(2).map_or("", |m| m.as_str());
                let heading = if title.is_empty() {
                    Vec::new()
                } else {
                    vec![format!("**{title}**"), String::new()]
                };
                paragraph_span(lines, i, kind, lead, heading)
            }
        };

        match found {
            Some(found) => {
                i = found.end;
                matches.push(found);
            }
            // No body: the marker stays literal.
            None => i += 1,
        }
    }
    matches
}

/// Quiz bodies run to the next heading, rule, opaque line or end of text.
fn quiz_span(lines: &[Line], start: usize) -> Option<BoxMatch> {
    let mut end = start + 1;
    while end < lines.len() && !is_boundary(&lines[end], BoxKind::Quiz) {
        end += 1;
    }
    while end > start + 1 && lines[end - 1].is_blank() {
        end -= 1;
    }
    let first = (start + 1..end).find(|&j| !lines[j].is_blank())?;
    Some(BoxMatch {
        kind: BoxKind::Quiz,
        start,
        end,
        inner: lines[first..end].iter().map(|l| l.text.clone()).collect(),
    })
}

/// Callout bodies: the first paragraph always, then following paragraphs
/// until one opens with an uppercase letter or `**`, or a boundary line.
fn paragraph_span(
    lines: &[Line],
    start: usize,
    kind: BoxKind,
    lead: &str,
    mut inner: Vec<String>,
) -> Option<BoxMatch> {
    let prefix = inner.len();
    let mut j = start + 1;

    if lead.is_empty() {
        while j < lines.len() && lines[j].is_blank() && !lines[j].claimed {
            j += 1;
        }
    } else {
        inner.push(lead.to_owned());
    }
    while j < lines.len() && !lines[j].is_blank() && !is_boundary(&lines[j], kind) {
        inner.push(lines[j].text.clone());
        j += 1;
    }
    if inner.len() == prefix {
        return None;
    }

    loop {
        let mut k = j;
        while k < lines.len() && lines[k].is_blank() && !lines[k].claimed {
            k += 1;
        }
        if k == j || k >= lines.len() {
            break;
        }
        let next = &lines[k];
        if is_boundary(next, kind) || starts_new_paragraph(&next.text) {
            break;
        }
        inner.push(String::new());
        while k < lines.len() && !lines[k].is_blank() && !is_boundary(&lines[k], kind) {
            inner.push(lines[k].text.clone());
            k += 1;
        }
        j = k;
    }

    Some(BoxMatch {
        kind,
        start,
        end: j,
        inner,
    })
}

fn apply_pass(lines: Vec<Line>, kind: BoxKind) -> Vec<Line> {
    let matches = find_in_lines(&lines, kind);
    if matches.is_empty() {
        return lines;
    }

    let mut out = Vec::with_capacity(lines.len() + matches.len() * 4);
    let mut cursor = 0;
    for found in matches {
        out.extend(lines[cursor..found.start].iter().cloned());
        if out.last().is_some_and(|l: &Line| !l.is_blank()) {
            out.push(Line::open(""));
        }
        out.push(Line::claimed(format!("::: {}", kind.class())));
        out.push(Line::claimed(""));
        out.extend(found.inner.into_iter().map(Line::claimed));
        out.push(Line::claimed(""));
        out.push(Line::claimed(":::"));
        if lines.get(found.end).is_some_and(|l| !l.is_blank()) {
            out.push(Line::open(""));
        }
        cursor = found.end;
    }
    out.extend(lines[cursor..].iter().cloned());
    out
}
