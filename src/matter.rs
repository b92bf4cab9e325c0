//! Optional named front and back matter sections.

use crate::citation::CitationManager;
use crate::formats::{GeneratedSection, SectionDescriptor, SectionKind};
use crate::prompts;
use crate::report::BuildIssue;
use crate::synth::{GenerationContext, Synthesizer};

/// Default catalogs, in template slot order.
pub const FRONT_MATTER: [&str; 5] = [
    "Dedication",
    "Epigraph",
    "Foreword",
    "Preface",
    "Acknowledgments",
];

pub const BACK_MATTER: [&str; 9] = [
    "Epilogue",
    "Afterword",
    "Appendices",
    "Glossary",
    "Notes & References",
    "Bibliography",
    "Index",
    "About the Author",
    "Other Books by Author",
];

/// Sections written without a backend call.
pub fn is_static(name: &str) -> bool {
    matches!(
        name,
        "Bibliography" | "Notes & References" | "Index" | "About the Author" | "Other Books by Author"
    )
}

/// Builds one optional section. `kind` is front or back matter, depending on
/// which list the name was selected from.
pub async fn synthesize_matter(
    synth: &Synthesizer,
    ctx: &GenerationContext,
    name: &str,
    kind: SectionKind,
    citations: &CitationManager,
    issues: &mut Vec<BuildIssue>,
) -> anyhow::Result<GeneratedSection> {
    let descriptor = SectionDescriptor::new(name, kind);
    if let Some(text) = static_text(name, &ctx.topic, citations) {
        tracing::info!(title = name, "static section");
        return Ok(GeneratedSection::new(descriptor, text));
    }
    let prompt = matter_prompt(ctx, name);
    synth.synthesize_prompt(&descriptor, &prompt, issues).await
}

fn static_text(name: &str, topic: &str, citations: &CitationManager) -> Option<String> {
    let text = match name {
        "Bibliography" => citations.bibliography_body(),
        "Index" => "\\printindex\n\n\
*The index is generated during PDF compilation when indexing is enabled.*"
            .to_owned(),
        "About the Author" => "This book was written with the help of generative AI systems, \
combining planning, drafting and research steps into one publishing pipeline. The author \
specializes in educational and informative writing across many domains."
            .to_owned(),
        "Notes & References" => format!(
            "### Chapter Notes

This book draws on established research and general knowledge about {topic}. \
Verify critical details against primary sources.

### Additional Reading

To explore {topic} further:

- Consult peer-reviewed journals in the field
- Follow current research and developments
- Engage with professional communities
- Use the bibliography as a starting point

### Citations

Citations follow the selected citation style and appear in the Bibliography."
        ),
        "Other Books by Author" => "The same pipeline can produce books on many other subjects, \
including:

- Technology and Innovation
- Healthcare and Medicine
- Business and Leadership
- Science and Research
- Education and Learning
- Finance and Economics
- Personal Development"
            .to_owned(),
        _ => return None,
    };
    Some(text)
}

fn matter_prompt(ctx: &GenerationContext, name: &str) -> String {
    let GenerationContext {
        topic, genre, tone, ..
    } = ctx;
    let brief = match name {
        "Dedication" => format!(
            "Write a heartfelt dedication for a {genre} book about \"{topic}\". \
Two or three sentences, personal and meaningful, without a heading."
        ),
        "Epigraph" => format!(
            "Select one inspiring, relevant quote for a {genre} book about \"{topic}\".\n\
Format:\n\"The quote.\"\n-- Author Name, Source"
        ),
        "Foreword" => format!(
            "Write a foreword for a {genre} book about \"{topic}\", as a respected expert in the field \
recommending it. Cover why the book is timely, what makes it unique, who should read it, \
and close with a strong recommendation. About 400 to 500 words."
        ),
        "Preface" => format!(
            "Write the preface of a {genre} book about \"{topic}\" in the first person, as the author. \
Cover your motivation, your journey with {topic}, what readers will gain and how to get the \
most from the book. About 400 to 600 words."
        ),
        "Acknowledgments" => format!(
            "Write the acknowledgments of a {genre} book about \"{topic}\". Thank experts and mentors, \
early readers, the tools and resources used and the wider {genre} community, naturally rather \
than as a checklist. About 200 to 300 words."
        ),
        "Epilogue" => format!(
            "Write an epilogue for a {genre} book about \"{topic}\". Reflect on the journey, look toward \
the future of {topic} and give closure while opening new possibilities. About 400 to 500 words."
        ),
        "Afterword" => format!(
            "Write an afterword for a book about \"{topic}\".\nGenre: {genre}\nTone: {tone}\n\
Include final reflections, how the book came to be, future directions in {topic} and a call \
to action. 300 to 400 words."
        ),
        "Glossary" => format!(
            "Create a glossary of 15 to 20 key terms for a {genre} book about \"{topic}\".\n\
Format each entry as `**Term**: definition` and list them alphabetically."
        ),
        "Appendices" => format!(
            "Create appendices for a {genre} book about \"{topic}\": curated resources, recommended \
tools, further reading and professional communities. Use headings and lists."
        ),
        _ => return prompts::generic_prompt(ctx, name),
    };
    format!("{brief}\n\nOutput only the section text in Markdown, without a top-level heading.\n")
}
