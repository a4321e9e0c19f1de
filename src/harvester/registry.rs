//! Source registry, evidence store, and the accumulated research context.
//!
//! All shared mutable state for one harvesting run lives here behind a single
//! lock: the per-URL source records with their status state machine, merged
//! evidence, the visited-query set, and the append-only citation blocks.
//! Cloning is cheap (Arc-based), so worker futures share one registry.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

/// Directive emitted once at the top of the research context, documenting the
/// citation wrapper syntax for downstream consumers.
pub const CITATION_FORMAT_DIRECTIVE: &str = "[CITATION FORMAT]\n\
Evidence below is wrapped in <source id=\"...\"> blocks. Cite a source by its \
id in square brackets, e.g. [S3]. Only cite ids that appear in the evidence.";

/// Lifecycle of a source registry entry.
///
/// Transitions `Queued → Processing → {Completed, Failed}` exactly once per
/// URL; a terminal entry is never revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

/// How a source entered the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Supplied directly by the caller.
    Direct,
    /// Discovered by a search vector or gap-analysis round.
    Discovered,
}

/// One registry entry per discovered reference, keyed by exact URL.
#[derive(Debug, Clone)]
pub struct SourceRecord {
    pub url: String,
    pub status: SourceStatus,
    pub title: String,
    pub summary: String,
    pub last_error: Option<String>,
    pub origin: Origin,
    pub discovery_index: usize,
}

/// Derived content for a harvested source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub url: String,
    pub title: String,
    pub summary: String,
    pub facts: Vec<String>,
}

/// A URL that ended in the `Failed` state.
#[derive(Debug, Clone, Serialize)]
pub struct FailedSource {
    pub url: String,
    pub reason: String,
    pub is_high_value: bool,
}

/// A non-failed source formatted for the harvest output.
#[derive(Debug, Clone, Serialize)]
pub struct SourceReference {
    pub url: String,
    pub title: String,
    pub summary: String,
}

/// The atomic, deduplicated unit of evidence in the research context.
#[derive(Debug, Clone)]
pub struct CitationBlock {
    /// Stable identifier, assigned in discovery order.
    pub id: String,
    /// Dedup key: the source URL, or a synthetic key for query blocks.
    pub key: String,
    pub title: String,
    pub body: String,
    pub discovery_index: usize,
}

impl CitationBlock {
    /// Render the block in the wrapper syntax the format directive documents.
    pub fn render(&self) -> String {
        format!(
            "<source id=\"{}\" ref=\"{}\">\nTitle: {}\n{}\n</source>",
            self.id, self.key, self.title, self.body
        )
    }
}

#[derive(Default)]
struct RegistryInner {
    sources: HashMap<String, SourceRecord>,
    evidence: HashMap<String, EvidenceRecord>,
    blocks: Vec<CitationBlock>,
    block_keys: HashSet<String>,
    visited_queries: HashSet<String>,
    failed: Vec<FailedSource>,
    next_discovery_index: usize,
}

/// Shared registry for one harvesting run.
#[derive(Clone)]
pub(crate) struct SourceRegistry {
    inner: Arc<Mutex<RegistryInner>>,
    max_facts: usize,
}

impl SourceRegistry {
    pub(crate) fn new(max_facts: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner::default())),
            max_facts,
        }
    }

    /// Insert a URL as `Queued` if it has never been seen. Returns whether
    /// the entry is new; an existing entry (any status) is left untouched.
    pub(crate) fn enqueue(&self, url: &str, title: Option<&str>, origin: Origin) -> bool {
        let url = url.trim();
        if url.is_empty() {
            return false;
        }
        let mut inner = self.inner.lock().unwrap();
        if inner.sources.contains_key(url) {
            return false;
        }
        let discovery_index = inner.next_discovery_index;
        inner.next_discovery_index += 1;
        inner.sources.insert(
            url.to_string(),
            SourceRecord {
                url: url.to_string(),
                status: SourceStatus::Queued,
                title: title.unwrap_or("").to_string(),
                summary: String::new(),
                last_error: None,
                origin,
                discovery_index,
            },
        );
        true
    }

    /// Compare-and-set `Queued → Processing`. Returns false when the entry is
    /// missing, already in flight, or terminal, so no URL is fetched twice.
    pub(crate) fn claim(&self, url: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.sources.get_mut(url) {
            Some(record) if record.status == SourceStatus::Queued => {
                record.status = SourceStatus::Processing;
                true
            }
            _ => false,
        }
    }

    /// Merge extracted evidence for a URL: facts take the set union in
    /// first-seen order, re-capped; title and summary keep the first
    /// non-empty value. Returns the merged fact count.
    pub(crate) fn merge_evidence(
        &self,
        url: &str,
        title: &str,
        summary: &str,
        facts: Vec<String>,
    ) -> usize {
        let mut inner = self.inner.lock().unwrap();
        self.merge_evidence_locked(&mut inner, url, title, summary, facts)
    }

    fn merge_evidence_locked(
        &self,
        inner: &mut RegistryInner,
        url: &str,
        title: &str,
        summary: &str,
        facts: Vec<String>,
    ) -> usize {
        let entry = inner
            .evidence
            .entry(url.to_string())
            .or_insert_with(|| EvidenceRecord {
                url: url.to_string(),
                title: String::new(),
                summary: String::new(),
                facts: Vec::new(),
            });
        if entry.title.is_empty() && !title.is_empty() {
            entry.title = title.to_string();
        }
        if entry.summary.is_empty() && !summary.is_empty() {
            entry.summary = summary.to_string();
        }
        for fact in facts {
            let fact = fact.trim().to_string();
            if fact.is_empty() || entry.facts.contains(&fact) {
                continue;
            }
            entry.facts.push(fact);
        }
        entry.facts.truncate(self.max_facts);
        entry.facts.len()
    }

    /// Mark a `Processing` entry `Completed`, merging its evidence and
    /// appending its citation block (first write per URL wins). Returns the
    /// merged fact count.
    pub(crate) fn complete(
        &self,
        url: &str,
        title: &str,
        summary: &str,
        facts: Vec<String>,
    ) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let fact_count = self.merge_evidence_locked(&mut inner, url, title, summary, facts);

        let evidence = inner.evidence.get(url).cloned();
        let Some(record) = inner.sources.get_mut(url) else {
            return fact_count;
        };
        if record.status != SourceStatus::Processing {
            return fact_count;
        }
        record.status = SourceStatus::Completed;

        let (display_title, summary_text, facts_list) = match evidence {
            Some(merged) => {
                let title = if merged.title.is_empty() {
                    url.to_string()
                } else {
                    merged.title
                };
                (title, merged.summary, merged.facts)
            }
            None => (url.to_string(), String::new(), Vec::new()),
        };
        record.title = display_title.clone();
        record.summary = summary_text.clone();
        let discovery_index = record.discovery_index;

        if inner.block_keys.insert(url.to_string()) {
            let mut body = format!("Summary: {}", summary_text);
            if !facts_list.is_empty() {
                body.push_str("\nFacts:");
                for fact in &facts_list {
                    body.push_str("\n- ");
                    body.push_str(fact);
                }
            }
            inner.blocks.push(CitationBlock {
                id: format!("S{}", discovery_index + 1),
                key: url.to_string(),
                title: display_title,
                body,
                discovery_index,
            });
        }
        fact_count
    }

    /// Mark an entry `Failed` and record it once in the failed-source list.
    /// Terminal entries are left untouched.
    pub(crate) fn fail(&self, url: &str, reason: &str) {
        let mut inner = self.inner.lock().unwrap();
        let Some(record) = inner.sources.get_mut(url) else {
            return;
        };
        if matches!(
            record.status,
            SourceStatus::Completed | SourceStatus::Failed
        ) {
            return;
        }
        record.status = SourceStatus::Failed;
        record.last_error = Some(reason.to_string());
        let is_high_value = record.origin == Origin::Direct;
        let url = record.url.clone();
        inner.failed.push(FailedSource {
            url,
            reason: reason.to_string(),
            is_high_value,
        });
    }

    /// Mark a query visited. Returns false when the trimmed, case-sensitive
    /// string has already been executed this run.
    pub(crate) fn visit_query(&self, query: &str) -> bool {
        let query = query.trim();
        if query.is_empty() {
            return false;
        }
        let mut inner = self.inner.lock().unwrap();
        inner.visited_queries.insert(query.to_string())
    }

    pub(crate) fn is_query_visited(&self, query: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.visited_queries.contains(query.trim())
    }

    pub(crate) fn visited_queries(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        let mut queries: Vec<String> = inner.visited_queries.iter().cloned().collect();
        queries.sort();
        queries
    }

    /// Append a synthetic citation block (e.g. search results for a query).
    /// First write per key wins.
    pub(crate) fn append_synthetic_block(&self, key: &str, title: &str, body: String) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if !inner.block_keys.insert(key.to_string()) {
            return false;
        }
        let discovery_index = inner.next_discovery_index;
        inner.next_discovery_index += 1;
        inner.blocks.push(CitationBlock {
            id: format!("S{}", discovery_index + 1),
            key: key.to_string(),
            title: title.to_string(),
            body,
            discovery_index,
        });
        true
    }

    /// URLs currently waiting to be fetched.
    pub(crate) fn queued_urls(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        let mut queued: Vec<&SourceRecord> = inner
            .sources
            .values()
            .filter(|record| record.status == SourceStatus::Queued)
            .collect();
        queued.sort_by_key(|record| record.discovery_index);
        queued.iter().map(|record| record.url.clone()).collect()
    }

    /// Render the accumulated context: the format directive followed by every
    /// citation block in first-discovery order.
    pub(crate) fn render_context(&self) -> String {
        let inner = self.inner.lock().unwrap();
        if inner.blocks.is_empty() {
            return String::new();
        }
        let mut blocks = inner.blocks.clone();
        blocks.sort_by_key(|block| block.discovery_index);
        let rendered: Vec<String> = blocks.iter().map(CitationBlock::render).collect();
        format!("{}\n\n{}", CITATION_FORMAT_DIRECTIVE, rendered.join("\n\n"))
    }

    /// Citation blocks in first-discovery order, for evidence ranking.
    pub(crate) fn citation_blocks(&self) -> Vec<CitationBlock> {
        let inner = self.inner.lock().unwrap();
        let mut blocks = inner.blocks.clone();
        blocks.sort_by_key(|block| block.discovery_index);
        blocks
    }

    /// Non-failed registry entries formatted for the harvest output.
    pub(crate) fn sources(&self) -> Vec<SourceReference> {
        let inner = self.inner.lock().unwrap();
        let mut records: Vec<&SourceRecord> = inner
            .sources
            .values()
            .filter(|record| record.status != SourceStatus::Failed)
            .collect();
        records.sort_by_key(|record| record.discovery_index);
        records
            .iter()
            .map(|record| SourceReference {
                url: record.url.clone(),
                title: if record.title.is_empty() {
                    record.url.clone()
                } else {
                    record.title.clone()
                },
                summary: record.summary.clone(),
            })
            .collect()
    }

    pub(crate) fn failed(&self) -> Vec<FailedSource> {
        let inner = self.inner.lock().unwrap();
        inner.failed.clone()
    }

    /// Compact digest of accumulated evidence for gap analysis: one line per
    /// source with its title and leading facts, capped.
    pub(crate) fn evidence_digest(&self, max_sources: usize, max_facts_per_source: usize) -> String {
        let inner = self.inner.lock().unwrap();
        let mut records: Vec<&EvidenceRecord> = inner.evidence.values().collect();
        records.sort_by_key(|record| {
            inner
                .sources
                .get(&record.url)
                .map(|source| source.discovery_index)
                .unwrap_or(usize::MAX)
        });
        records
            .iter()
            .take(max_sources)
            .map(|record| {
                let title = if record.title.is_empty() {
                    record.url.as_str()
                } else {
                    record.title.as_str()
                };
                let facts = record
                    .facts
                    .iter()
                    .take(max_facts_per_source)
                    .cloned()
                    .collect::<Vec<_>>()
                    .join("; ");
                if facts.is_empty() {
                    format!("- {}", title)
                } else {
                    format!("- {}: {}", title, facts)
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[cfg(test)]
    pub(crate) fn status_of(&self, url: &str) -> Option<SourceStatus> {
        let inner = self.inner.lock().unwrap();
        inner.sources.get(url).map(|record| record.status)
    }

    #[cfg(test)]
    pub(crate) fn block_count_for(&self, key: &str) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.blocks.iter().filter(|block| block.key == key).count()
    }
}
