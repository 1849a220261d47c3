use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

use crate::error::Result;
use crate::executor::{ExtractionContext, ExtractionStage, Mention};

static CAPITALISED_RUN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Z][A-Za-z]+(?:[ ]+[A-Z][A-Za-z]+)+\b").expect("entity regex is valid")
});

// Sentence-initial words that get swept into a capitalised run.
const LEADING_NOISE: &[&str] = &[
    "A", "An", "The", "In", "On", "At", "By", "For", "This", "That", "These", "Those", "When",
];

/// Finds multi-word capitalised names ("Royal Society", "Marie Curie").
pub struct EntityExtractorStage {
    min_length: usize,
}

impl EntityExtractorStage {
    pub fn new(min_length: usize) -> Self {
        Self { min_length }
    }

    pub fn find_entities(&self, paragraph: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut found = Vec::new();
        for m in CAPITALISED_RUN.find_iter(paragraph) {
            let mut words: Vec<&str> = m.as_str().split_whitespace().collect();
            if words.first().is_some_and(|w| LEADING_NOISE.contains(w)) {
                words.remove(0);
            }
            if words.len() < 2 {
                continue;
            }
            let name = words.join(" ");
            if name.chars().count() >= self.min_length && seen.insert(name.clone()) {
                found.push(name);
            }
        }
        found
    }
}

#[async_trait]
impl ExtractionStage for EntityExtractorStage {
    fn name(&self) -> &'static str {
        "EntityExtractor"
    }

    async fn process(&self, mut context: ExtractionContext) -> Result<ExtractionContext> {
        let mut entities = Vec::new();
        for (paragraph, text) in context.paragraphs.iter().enumerate() {
            entities.extend(
                self.find_entities(text)
                    .into_iter()
                    .map(|text| Mention { text, paragraph }),
            );
        }
        context.entities = entities;
        Ok(context)
    }
}
