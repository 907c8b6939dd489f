use crate::traits::Summarizer;
use crate::types::{ContentItem, Result, Summary};
use async_trait::async_trait;
use tracing::debug;

/// Extractive fallback summarizer.
///
/// Lets the pipeline run end to end without an LLM backend: the short
/// text is a sentence-boundary truncation of the body and the tags are
/// naive capitalized-token entities. An LLM-backed implementation plugs
/// in through the same trait.
pub struct ExtractiveSummarizer {
    max_chars: usize,
    max_tags: usize,
}

impl ExtractiveSummarizer {
    pub fn new() -> Self {
        Self {
            max_chars: 280,
            max_tags: 6,
        }
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }
}

impl Default for ExtractiveSummarizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Summarizer for ExtractiveSummarizer {
    async fn summarize(&self, item: &ContentItem) -> Result<Summary> {
        debug!("Extractive summary for {}", item.fingerprint);
        let text = if item.body.trim().is_empty() {
            &item.title
        } else {
            &item.body
        };
        Ok(Summary {
            short_text: truncate_at_sentence(text, self.max_chars),
            tags: extract_entities(&item.body, self.max_tags),
        })
    }
}

/// Cut `text` to at most `max_chars`, preferring the last full sentence.
fn truncate_at_sentence(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let excerpt: String = flat.chars().take(max_chars).collect();
    match excerpt.rfind('.') {
        Some(pos) if pos > max_chars / 2 => excerpt[..=pos].to_string(),
        _ => format!("{}...", excerpt.trim_end()),
    }
}

/// Capitalized words as candidate entities, deduplicated, bounded.
fn extract_entities(text: &str, max_tags: usize) -> Vec<String> {
    let mut entities: Vec<String> = text
        .split_whitespace()
        .filter_map(|word| {
            let clean = word.trim_matches(|c: char| !c.is_alphanumeric());
            let mut chars = clean.chars();
            match chars.next() {
                Some(first) if first.is_uppercase() && clean.len() > 2 => {
                    Some(clean.to_string())
                }
                _ => None,
            }
        })
        .collect();
    entities.sort();
    entities.dedup();
    entities.truncate(max_tags);
    entities
}
