//! Evidence ranking and the length guide.
//!
//! Selection is deterministic: blocks are scored by keyword overlap with the
//! section plan and tied scores break on discovery order, so the same
//! evidence set and plan always produce the same pack.

use std::collections::HashSet;

use crate::gateway::truncate_chars;
use crate::harvester::CitationBlock;

use super::{SectionKind, SectionPlan};

/// Lowercased alphanumeric tokens of three or more characters.
pub(crate) fn keywords(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.len() >= 3)
        .map(str::to_string)
        .collect()
}

/// Score one block against the section's keyword set.
fn overlap_score(wanted: &HashSet<String>, block: &CitationBlock) -> usize {
    let text = format!("{} {}", block.title, block.body);
    let have = keywords(&text);
    wanted.intersection(&have).count()
}

/// Select the evidence pack for a section: the highest-scoring blocks up to
/// `cap`, falling back to the full (capped) set when nothing scores above
/// zero, so drafting never starts from nothing while evidence exists.
pub(crate) fn select_evidence<'a>(
    plan: &SectionPlan,
    blocks: &'a [CitationBlock],
    cap: usize,
) -> Vec<&'a CitationBlock> {
    let wanted = keywords(&format!("{} {}", plan.title, plan.guidance));

    let mut scored: Vec<(usize, &CitationBlock)> = blocks
        .iter()
        .map(|block| (overlap_score(&wanted, block), block))
        .collect();
    scored.sort_by(|a, b| {
        b.0.cmp(&a.0)
            .then(a.1.discovery_index.cmp(&b.1.discovery_index))
    });

    let relevant: Vec<&CitationBlock> = scored
        .iter()
        .filter(|(score, _)| *score > 0)
        .take(cap)
        .map(|(_, block)| *block)
        .collect();

    if relevant.is_empty() {
        blocks.iter().take(cap).collect()
    } else {
        relevant
    }
}

/// Derive a bounded length target from the pack size and section shape, so
/// drafting scales with available material.
pub(crate) fn length_guide(kind: SectionKind, evidence_count: usize) -> String {
    match kind {
        SectionKind::Text => {
            let low = (evidence_count / 2).clamp(2, 5);
            format!("Write {} to {} substantial paragraphs.", low, low + 2)
        }
        SectionKind::List => {
            let low = evidence_count.clamp(4, 10);
            format!("Produce {} to {} items, one assertion each.", low, low + 3)
        }
    }
}

/// Compact one-line-per-source manifest for the drafting prompt.
pub(crate) fn render_manifest(pack: &[&CitationBlock]) -> String {
    if pack.is_empty() {
        return "(no evidence gathered)".to_string();
    }
    pack.iter()
        .map(|block| format!("{} | {} | {}", block.id, block.title, block.key))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Full citation blocks for the drafting prompt, each truncated to the
/// per-block character budget.
pub(crate) fn render_pack(pack: &[&CitationBlock], max_block_chars: usize) -> String {
    if pack.is_empty() {
        return "(no evidence gathered)".to_string();
    }
    pack.iter()
        .map(|block| truncate_chars(&block.render(), max_block_chars))
        .collect::<Vec<_>>()
        .join("\n\n")
}
