use chrono::Datelike as _;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CitationStyle {
    #[default]
    Apa,
    Mla,
    Chicago,
    Harvard,
}

impl CitationStyle {
    pub fn label(self) -> &'static str {
        match self {
            CitationStyle::Apa => "APA",
            CitationStyle::Mla => "MLA",
            CitationStyle::Chicago => "Chicago",
            CitationStyle::Harvard => "Harvard",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationRecord {
    pub authors: Vec<String>,
    pub year: i32,
    pub title: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CitationManager {
    style: CitationStyle,
    records: Vec<CitationRecord>,
}

impl CitationManager {
    pub fn new(style: CitationStyle) -> Self {
        Self {
            style,
            records: Vec::new(),
        }
    }

    pub fn style(&self) -> CitationStyle {
        self.style
    }

    pub fn records(&self) -> &[CitationRecord] {
        &self.records
    }

    pub fn add(&mut self, record: CitationRecord) {
        self.records.push(record);
    }

    /// Registers a research hit. Sources already registered under the same
    /// URL are ignored.
    pub fn add_web_source(&mut self, title: &str, url: &str) {
        if !url.is_empty()
            && self
                .records
                .iter()
                .any(|r| r.url.as_deref() == Some(url))
        {
            return;
        }
        self.records.push(CitationRecord {
            authors: vec!["Web Source".to_owned()],
            year: chrono::Local::now().year(),
            title: title.to_owned(),
            source: "Online".to_owned(),
            url: (!url.is_empty()).then(|| url.to_owned()),
        });
    }

    pub fn format(&self, record: &CitationRecord) -> String {
        let title = if record.title.trim().is_empty() {
            "Untitled"
        } else {
            record.title.as_str()
        };
        let source = &record.source;
        let year = record.year;
        match (self.style, record.url.as_deref()) {
            (CitationStyle::Apa, Some(url)) => format!(
                "{} ({year}). *{title}*. {source}. Retrieved from {url}",
                authors(&record.authors, " & ", " et al.")
            ),
            (CitationStyle::Apa, None) => format!(
                "{} ({year}). *{title}*. {source}.",
                authors(&record.authors, " & ", " et al.")
            ),
            (CitationStyle::Mla, Some(url)) => format!(
                "{}. \"{title}.\" *{source}*, {year}, {url}.",
                authors(&record.authors, " and ", ", et al")
            ),
            (CitationStyle::Mla, None) => format!(
                "{}. \"{title}.\" *{source}*, {year}.",
                authors(&record.authors, " and ", ", et al")
            ),
            (CitationStyle::Chicago, Some(url)) => format!(
                "{}. {year}. \"{title}.\" *{source}*. {url}.",
                authors(&record.authors, " and ", " et al.")
            ),
            (CitationStyle::Chicago, None) => format!(
                "{}. {year}. \"{title}.\" *{source}*.",
                authors(&record.authors, " and ", " et al.")
            ),
            (CitationStyle::Harvard, Some(url)) => format!(
                "{} ({year}) '{title}', *{source}*. Available at: {url}.",
                authors(&record.authors, " and ", " et al.")
            ),
            (CitationStyle::Harvard, None) => format!(
                "{} ({year}) '{title}', *{source}*.",
                authors(&record.authors, " and ", " et al.")
            ),
        }
    }

    /// Markdown bibliography with its heading.
    pub fn bibliography(&self) -> String {
        format!("## Bibliography\n\n{}", self.bibliography_body())
    }

    /// Entries sorted by first author, without a heading.
    pub fn bibliography_body(&self) -> String {
        if self.records.is_empty() {
            return "*This e-book was generated using AI technology and incorporates general \
knowledge and established research. Specific citations are available upon request.*\n"
                .to_owned();
        }

        let mut sorted = self.records.iter().collect::<Vec<_>>();
        sorted.sort_by(|a, b| first_author(a).cmp(first_author(b)));

        let mut out = format!("*Citations formatted in {} style*\n\n", self.style.label());
        for record in sorted {
            out.push_str("- ");
            out.push_str(&self.format(record));
            out.push_str("\n\n");
        }
        out
    }
}

fn first_author(record: &CitationRecord) -> &str {
    record.authors.first().map(String::as_str).unwrap_or("")
}

fn authors(list: &[String], pair_joiner: &str, many_suffix: &str) -> String {
    match list {
        [] => "Unknown Author".to_owned(),
        [only] => only.clone(),
        [first, second] => format!("{first}{pair_joiner}{second}"),
        [first, ..] => format!("{first}{many_suffix}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(authors: &[&str], url: Option<&str>) -> CitationRecord {
        CitationRecord {
            authors: authors.iter().map(|a| (*a).to_owned()).collect(),
            year: 2024,
            title: "Ownership in Practice".to_owned(),
            source: "Online".to_owned(),
            url: url.map(str::to_owned),
        }
    }

    #[test]
    fn apa_formats_authors_and_url() {
        let manager = CitationManager::new(CitationStyle::Apa);
        assert_eq!(
            manager.format(&record(&["Doe", "Roe"], Some("https://e.com"))),
            "Doe & Roe (2024). *Ownership in Practice*. Online. Retrieved from https://e.com"
        );
        assert_eq!(
            manager.format(&record(&["Doe", "Roe", "Poe"], None)),
            "Doe et al. (2024). *Ownership in Practice*. Online."
        );
    }

    #[test]
    fn other_styles_use_their_layout() {
        let r = record(&["Doe"], Some("https://e.com"));
        assert_eq!(
            CitationManager::new(CitationStyle::Mla).format(&r),
            "Doe. \"Ownership in Practice.\" *Online*, 2024, https://e.com."
        );
        assert_eq!(
            CitationManager::new(CitationStyle::Chicago).format(&r),
            "Doe. 2024. \"Ownership in Practice.\" *Online*. https://e.com."
        );
        assert_eq!(
            CitationManager::new(CitationStyle::Harvard).format(&r),
            "Doe (2024) 'Ownership in Practice', *Online*. Available at: https://e.com."
        );
    }

    #[test]
    fn bibliography_is_sorted_and_deduplicated() {
        let mut manager = CitationManager::new(CitationStyle::Apa);
        manager.add(record(&["Zed"], None));
        manager.add(record(&["Adams"], None));
        manager.add_web_source("Page", "https://a.example");
        manager.add_web_source("Page again", "https://a.example");
        assert_eq!(manager.records().len(), 3);

        let bib = manager.bibliography();
        assert!(bib.starts_with("## Bibliography\n\n*Citations formatted in APA style*"));
        let adams = bib.find("Adams").unwrap_or(usize::MAX);
        let web = bib.find("Web Source").unwrap_or(usize::MAX);
        let zed = bib.find("Zed").unwrap_or(usize::MAX);
        assert!(adams < web && web < zed);
    }

    #[test]
    fn empty_bibliography_has_notice() {
        let bib = CitationManager::new(CitationStyle::Mla).bibliography();
        assert!(bib.contains("Specific citations are available upon request."));
    }
}
