use std::fmt::Write as _;

use crate::config::Feature;
use crate::formats::{SectionDescriptor, SectionKind};
use crate::research::ResearchHit;
use crate::synth::GenerationContext;

/// Research hits rendered into prompts.
pub const RESEARCH_SNIPPETS: usize = 3;

pub fn outline_prompt(
    topic: &str,
    genre: &str,
    chapter_count: usize,
    subsections: usize,
) -> String {
    format!(
        "You are a bestselling author in the {genre} genre. Plan the outline of a book about \"{topic}\".

Required structure, in this order:
- Preface (the author's personal introduction)
- Introduction (a hook that draws readers in)
- Exactly {chapter_count} chapters, each with exactly {subsections} subsections
- Conclusion (a closing with lasting impact)

Give every chapter a specific, non-generic title and a one-sentence description.

Return ONLY a JSON array with this exact shape and nothing else:
[
  {{\"title\": \"Preface\", \"type\": \"preface\", \"subsections\": []}},
  {{\"title\": \"Introduction\", \"type\": \"introduction\", \"subsections\": []}},
  {{\"title\": \"Chapter 1: <title>\", \"type\": \"chapter\", \"subsections\": [\"<subsection>\"], \"description\": \"<description>\"}},
  {{\"title\": \"Conclusion\", \"type\": \"conclusion\", \"subsections\": []}}
]
"
    )
}

/// `i. title: snippet` for at most the first three hits.
pub fn research_text(hits: &[ResearchHit]) -> String {
    if hits.is_empty() {
        return String::new();
    }
    let mut out = String::from("Research context:\n");
    for (idx, hit) in hits.iter().take(RESEARCH_SNIPPETS).enumerate() {
        let title = if hit.title.is_empty() {
            "No title"
        } else {
            hit.title.as_str()
        };
        let snippet = if hit.snippet.is_empty() {
            "No description"
        } else {
            hit.snippet.as_str()
        };
        let _ = writeln!(out, "{}. {title}: {snippet}", idx + 1);
    }
    out
}

/// Inline instructions for the toggles that shape body text.
pub fn enhancement_instructions(ctx: &GenerationContext) -> String {
    let features = &ctx.features;
    let mut out = String::new();
    if features.enabled(Feature::CaseStudies) {
        out.push_str(
            "- Include one or two real-world case studies, each introduced by a line `**Case Study: <title>**`\n",
        );
    }
    if features.enabled(Feature::DidYouKnow) {
        out.push_str(
            "- Add short fact boxes, each introduced by a line `**Did You Know?**`\n",
        );
    }
    if features.enabled(Feature::RealWorldExamples) {
        out.push_str("- Give concrete real-world examples throughout\n");
    }
    if features.enabled(Feature::ExpertQuotes) {
        out.push_str("- Include relevant expert quotes or industry insights\n");
    }
    if out.is_empty() {
        return out;
    }
    format!("Enhancements:\n{out}")
}

pub fn section_prompt(ctx: &GenerationContext, descriptor: &SectionDescriptor) -> String {
    match descriptor.kind {
        SectionKind::Preface => preface_prompt(ctx),
        SectionKind::Introduction => introduction_prompt(ctx),
        SectionKind::Chapter => chapter_prompt(ctx, descriptor),
        SectionKind::Conclusion => conclusion_prompt(ctx),
        SectionKind::FrontMatter | SectionKind::BackMatter | SectionKind::Other => {
            generic_prompt(ctx, &descriptor.title)
        }
    }
}

fn preface_prompt(ctx: &GenerationContext) -> String {
    let GenerationContext {
        topic,
        genre,
        words_target,
        ..
    } = ctx;
    format!(
        "You are writing the preface of a professional {genre} book about \"{topic}\".

Write in the first person, as the author. Convey:
1. Why you wrote this book
2. Your personal connection to {topic}
3. What readers will gain
4. How this book differs from others on {topic}
5. A personal invitation to engage with the material

Write approximately {words_target} words. Be personal, genuine and compelling.
"
    )
}

fn introduction_prompt(ctx: &GenerationContext) -> String {
    let research = research_text(&ctx.research);
    let enhancements = enhancement_instructions(ctx);
    let GenerationContext {
        topic,
        genre,
        words_target,
        ..
    } = ctx;
    format!(
        "You are writing the introduction of a professional {genre} book about \"{topic}\".

{research}
Write about {words_target} words that:
1. Open with a hook (a story, statistic, provocative question or bold statement)
2. Establish why {topic} matters right now
3. Connect with the reader
4. Outline the value this book delivers
5. Build anticipation for the chapters ahead

{enhancements}
Write flowing narrative prose, as published by a major publisher.
"
    )
}

fn chapter_prompt(ctx: &GenerationContext, descriptor: &SectionDescriptor) -> String {
    let research = research_text(&ctx.research);
    let enhancements = enhancement_instructions(ctx);
    let mut subsections = String::new();
    if !descriptor.subtopics.is_empty() {
        subsections.push_str("Organize the chapter around these subsections:\n");
        for subtopic in &descriptor.subtopics {
            let _ = writeln!(subsections, "- {subtopic}");
        }
        subsections.push_str("Weave them into one cohesive narrative.\n");
    }
    let notes = descriptor
        .notes
        .as_deref()
        .map(|notes| format!("Chapter focus: {notes}\n"))
        .unwrap_or_default();
    let GenerationContext {
        topic,
        genre,
        tone,
        words_target,
        ..
    } = ctx;
    let title = &descriptor.title;
    format!(
        "You are writing a chapter of a professional {genre} book about \"{topic}\".

**Chapter Title**: {title}
Tone: {tone}
Target length: about {words_target} words
{notes}
{subsections}
{research}
Requirements:
1. Open with something compelling
2. Build each concept on the previous one
3. Provide real insight, frameworks and actionable information
4. Use concrete scenarios the reader can relate to
5. Keep transitions smooth

{enhancements}
Formatting: **bold** for key concepts, *italics* for emphasis, `##` headings for subsections, \
tables for comparisons when helpful, blockquotes for callouts. Do not start with the chapter title.
"
    )
}

fn conclusion_prompt(ctx: &GenerationContext) -> String {
    let enhancements = enhancement_instructions(ctx);
    let GenerationContext {
        topic,
        genre,
        words_target,
        ..
    } = ctx;
    format!(
        "You are writing the conclusion of a professional {genre} book about \"{topic}\".

Write about {words_target} words that:
1. Tie together the book's main themes without merely listing them
2. Remind readers of what they have gained
3. Paint a picture of what comes next
4. End with a memorable final thought or call to action

{enhancements}
This should feel like the satisfying end of a journey, not a summary.
"
    )
}

pub fn generic_prompt(ctx: &GenerationContext, title: &str) -> String {
    let GenerationContext {
        topic,
        genre,
        tone,
        words_target,
        ..
    } = ctx;
    format!(
        "Write the section \"{title}\" of a book about \"{topic}\".

Genre: {genre}
Tone: {tone}
Target length: {words_target} words

Write professional content appropriate for this section. Use Markdown formatting.
"
    )
}

pub fn quiz_prompt(ctx: &GenerationContext, chapter_title: &str) -> String {
    let topic = &ctx.topic;
    format!(
        "Create 5 thought-provoking quiz questions for the chapter \"{chapter_title}\" of a book about \"{topic}\".

Format each question as:
**Question N:** <question>
a) <option>
b) <option>
c) <option>
d) <option>

**Answer:** <letter>
**Explanation:** <why it is correct>

Output only the questions.
"
    )
}

pub fn summary_prompt(ctx: &GenerationContext, chapter_title: &str) -> String {
    let topic = &ctx.topic;
    format!(
        "List the 3 to 5 key takeaways of the chapter \"{chapter_title}\" of a book about \"{topic}\".

Output only a Markdown bullet list, one short sentence per bullet.
"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeatureToggles;

    fn hit(title: &str, snippet: &str) -> ResearchHit {
        ResearchHit {
            title: title.to_owned(),
            snippet: snippet.to_owned(),
            source: "Google Search".to_owned(),
            link: String::new(),
        }
    }

    fn context(features: FeatureToggles) -> GenerationContext {
        GenerationContext {
            topic: "Rust Programming".to_owned(),
            genre: "technology".to_owned(),
            tone: "Precise".to_owned(),
            features,
            words_target: 800,
            research: vec![hit("A", "one"), hit("B", ""), hit("C", "three"), hit("D", "four")],
        }
    }

    #[test]
    fn research_text_keeps_first_three_hits() {
        let ctx = context(FeatureToggles::none());
        let text = research_text(&ctx.research);
        assert!(text.contains("1. A: one\n"));
        assert!(text.contains("2. B: No description\n"));
        assert!(text.contains("3. C: three\n"));
        assert!(!text.contains("D: four"));
        assert_eq!(research_text(&[]), "");
    }

    #[test]
    fn chapter_prompt_lists_subtopics_and_enhancements() {
        let ctx = context(FeatureToggles::all());
        let descriptor = SectionDescriptor::new("Chapter 1: Ownership", SectionKind::Chapter)
            .with_subtopics(vec!["Moves".to_owned(), "Borrows".to_owned()]);
        let prompt = section_prompt(&ctx, &descriptor);
        assert!(prompt.contains("**Chapter Title**: Chapter 1: Ownership"));
        assert!(prompt.contains("- Moves\n- Borrows\n"));
        assert!(prompt.contains("**Did You Know?**"));
        assert!(prompt.contains("**Case Study: <title>**"));
        assert!(prompt.contains("1. A: one"));
    }

    #[test]
    fn disabled_toggles_add_no_instructions() {
        let ctx = context(FeatureToggles::none());
        assert_eq!(enhancement_instructions(&ctx), "");
        let prompt = section_prompt(&ctx, &SectionDescriptor::new("Conclusion", SectionKind::Conclusion));
        assert!(!prompt.contains("Did You Know"));
    }

    #[test]
    fn preface_prompt_is_first_person() {
        let ctx = context(FeatureToggles::all());
        let prompt = section_prompt(&ctx, &SectionDescriptor::new("Preface", SectionKind::Preface));
        assert!(prompt.contains("first person"));
        assert!(!prompt.contains("Research context"));
    }
}
