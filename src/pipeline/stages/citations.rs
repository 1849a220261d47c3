use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

use crate::error::Result;
use crate::executor::{ExtractionContext, ExtractionStage, Mention};

// [3], [1, 2], [4-7]
static NUMERIC_CITATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[\d+(?:\s*[,\u{2013}-]\s*\d+)*\]").expect("numeric citation regex is valid")
});

// (Smith, 2020), (Smith et al., 2019b), (Smith and Jones, 2018)
static AUTHOR_YEAR_CITATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\([A-Z][A-Za-z'\-]+(?:\s+et al\.)?(?:\s+(?:and|&)\s+[A-Z][A-Za-z'\-]+)?,\s*\d{4}[a-z]?\)",
    )
    .expect("author-year citation regex is valid")
});

static DOI_CITATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b10\.\d{4,9}/[-._;()/:A-Za-z0-9]*[A-Za-z0-9]").expect("DOI regex is valid")
});

/// Finds numeric, author-year and DOI citations in each paragraph.
#[derive(Debug, Default)]
pub struct CitationExtractorStage;

impl CitationExtractorStage {
    pub fn new() -> Self {
        Self
    }
}

pub fn find_citations(paragraph: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut found = Vec::new();
    for pattern in [&*NUMERIC_CITATION, &*AUTHOR_YEAR_CITATION, &*DOI_CITATION] {
        for m in pattern.find_iter(paragraph) {
            let text = m.as_str().to_string();
            if seen.insert(text.clone()) {
                found.push(text);
            }
        }
    }
    found
}

#[async_trait]
impl ExtractionStage for CitationExtractorStage {
    fn name(&self) -> &'static str {
        "CitationExtractor"
    }

    async fn process(&self, mut context: ExtractionContext) -> Result<ExtractionContext> {
        let citations: Vec<Mention> = context
            .paragraphs
            .iter()
            .enumerate()
            .flat_map(|(paragraph, text)| {
                find_citations(text)
                    .into_iter()
                    .map(move |text| Mention { text, paragraph })
            })
            .collect();
        context.citations = citations;
        Ok(context)
    }
}
