use crate::types::{
    ContentItem, DeliveryStatus, Digest, DigestEntry, ItemStatus, PipelineError, Result,
};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};
use uuid::Uuid;

/// Assembles the digest artifact for one cycle.
///
/// Ordering is deterministic: source priority descending, then collected
/// timestamp ascending, then fingerprint as the final tiebreak, so
/// identical inputs always produce an identical digest.
pub struct DigestBuilder {
    allow_empty: bool,
    priorities: HashMap<String, i32>,
}

impl DigestBuilder {
    pub fn new(allow_empty: bool) -> Self {
        Self {
            allow_empty,
            priorities: HashMap::new(),
        }
    }

    /// Register source priorities (higher sorts first). Unknown sources
    /// default to priority 0.
    pub fn with_priorities(mut self, priorities: HashMap<String, i32>) -> Self {
        self.priorities = priorities;
        self
    }

    pub fn set_priority(&mut self, source_id: &str, priority: i32) {
        self.priorities.insert(source_id.to_string(), priority);
    }

    pub fn build(&self, cycle_id: Uuid, items: &[ContentItem]) -> Result<Digest> {
        let mut entries: Vec<DigestEntry> = items
            .iter()
            .filter(|item| item.status == ItemStatus::Processed)
            .filter_map(|item| {
                let summary = item.summary.as_ref()?;
                Some(DigestEntry {
                    fingerprint: item.fingerprint,
                    source_id: item.source_id.clone(),
                    title: item.title.clone(),
                    url: item.url.clone(),
                    short_text: summary.short_text.clone(),
                    tags: summary.tags.clone(),
                    collected_at: item.collected_at,
                })
            })
            .collect();

        entries.sort_by(|a, b| {
            let pa = self.priority_of(&a.source_id);
            let pb = self.priority_of(&b.source_id);
            pb.cmp(&pa)
                .then(a.collected_at.cmp(&b.collected_at))
                .then(a.fingerprint.cmp(&b.fingerprint))
        });

        if entries.is_empty() && !self.allow_empty {
            return Err(PipelineError::EmptyDigest { cycle_id });
        }

        let generated_at = Utc::now();
        let body = render_body(&entries);
        debug!("Assembled digest body ({} bytes)", body.len());
        info!("Built digest for cycle {} with {} entries", cycle_id, entries.len());

        Ok(Digest {
            digest_id: Uuid::new_v4(),
            cycle_id,
            generated_at,
            entries,
            body,
            delivery_status: DeliveryStatus::Pending,
        })
    }

    fn priority_of(&self, source_id: &str) -> i32 {
        self.priorities.get(source_id).copied().unwrap_or(0)
    }
}

impl Default for DigestBuilder {
    fn default() -> Self {
        Self::new(true)
    }
}

fn render_body(entries: &[DigestEntry]) -> String {
    if entries.is_empty() {
        return "AI News Digest\n\nNo new items this cycle.\n".to_string();
    }

    // Per-source counts for the header line, in a stable order.
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for entry in entries {
        *counts.entry(entry.source_id.as_str()).or_default() += 1;
    }
    let count_line = counts
        .iter()
        .map(|(source, n)| format!("{}: {}", source, n))
        .collect::<Vec<_>>()
        .join(", ");

    let mut body = String::new();
    body.push_str("AI News Digest\n\n");
    body.push_str(&format!("{} items ({})\n\n", entries.len(), count_line));

    for (i, entry) in entries.iter().enumerate() {
        body.push_str(&format!("{}. {}\n", i + 1, entry.title));
        body.push_str(&format!("   {}\n", entry.short_text));
        if !entry.tags.is_empty() {
            body.push_str(&format!("   Tags: {}\n", entry.tags.join(", ")));
        }
        body.push_str(&format!("   {}\n\n", entry.url));
    }

    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::Fingerprint;
    use crate::types::{RawItem, Summary};
    use chrono::{Duration, Utc};

    fn processed_item(source: &str, title: &str, offset_secs: i64) -> ContentItem {
        let url = format!("https://example.com/{}/{}", source, title);
        let raw = RawItem {
            source_id: source.to_string(),
            external_id: None,
            url: url.clone(),
            title: title.to_string(),
            body: "body".to_string(),
            published_at: None,
        };
        let fp = Fingerprint::derive(source, None, &url, title);
        let mut item =
            ContentItem::from_raw(raw, fp, Utc::now() + Duration::seconds(offset_secs));
        item.status = ItemStatus::Processed;
        item.summary = Some(Summary {
            short_text: format!("summary of {}", title),
            tags: vec!["ai".to_string()],
        });
        item
    }

    #[test]
    fn orders_by_time_within_source() {
        let builder = DigestBuilder::new(true);
        let items = vec![
            processed_item("feed", "later", 10),
            processed_item("feed", "earlier", 1),
        ];
        let digest = builder.build(Uuid::new_v4(), &items).unwrap();
        assert_eq!(digest.entries[0].title, "earlier");
        assert_eq!(digest.entries[1].title, "later");
    }

    #[test]
    fn higher_priority_source_comes_first() {
        let mut priorities = HashMap::new();
        priorities.insert("important".to_string(), 10);
        let builder = DigestBuilder::new(true).with_priorities(priorities);

        let items = vec![
            processed_item("other", "older-but-lower", 0),
            processed_item("important", "newer-but-higher", 100),
        ];
        let digest = builder.build(Uuid::new_v4(), &items).unwrap();
        assert_eq!(digest.entries[0].source_id, "important");
    }

    #[test]
    fn identical_inputs_build_identical_orderings() {
        let builder = DigestBuilder::new(true);
        let items = vec![
            processed_item("a", "one", 3),
            processed_item("b", "two", 1),
            processed_item("a", "three", 2),
        ];
        let first = builder.build(Uuid::new_v4(), &items).unwrap();
        let second = builder.build(Uuid::new_v4(), &items).unwrap();
        let order =
            |d: &Digest| d.entries.iter().map(|e| e.fingerprint).collect::<Vec<_>>();
        assert_eq!(order(&first), order(&second));
    }

    #[test]
    fn unprocessed_items_are_excluded() {
        let builder = DigestBuilder::new(true);
        let mut failed = processed_item("feed", "bad", 0);
        failed.status = ItemStatus::Failed;
        let items = vec![failed, processed_item("feed", "good", 1)];
        let digest = builder.build(Uuid::new_v4(), &items).unwrap();
        assert_eq!(digest.entries.len(), 1);
        assert_eq!(digest.entries[0].title, "good");
    }

    #[test]
    fn empty_digest_policy() {
        let permissive = DigestBuilder::new(true);
        let digest = permissive.build(Uuid::new_v4(), &[]).unwrap();
        assert!(digest.entries.is_empty());
        assert_eq!(digest.delivery_status, DeliveryStatus::Pending);

        let strict = DigestBuilder::new(false);
        assert!(matches!(
            strict.build(Uuid::new_v4(), &[]),
            Err(PipelineError::EmptyDigest { .. })
        ));
    }
}
