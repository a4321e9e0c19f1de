//! Prompt templates and response schemas for the harvesting stage.

use serde_json::json;

/// Extraction prompt for a single source URL.
pub(crate) const SOURCE_EXTRACTION_PROMPT: &str = r#"You are a research assistant reading one source for a larger research effort.

RESEARCH MISSION:
{mission}

SOURCE URL:
{url}

Read the source and extract:
1. The document title (or a short descriptive title if none is present)
2. A 2-3 sentence summary of the content
3. Up to {max_facts} specific, self-contained facts relevant to the mission

RULES:
- Facts must be verifiable statements taken from the source, not opinions about it
- Include concrete numbers, names, and dates where the source provides them
- If the source cannot be read, reply with an empty summary and no facts"#;

/// Search prompt for one search vector.
pub(crate) const SEARCH_VECTOR_PROMPT: &str = r#"You are a research assistant running one web search for a larger research effort.

RESEARCH MISSION:
{mission}

SEARCH QUERY:
{query}

Search for the query and return:
1. A 2-4 sentence synthesis of what the results say
2. Up to {max_facts} specific facts drawn from the results
3. The most relevant result pages as sources (url and title)

RULES:
- Prefer primary sources and authoritative pages
- Include the full URL for every source
- Do not invent URLs; only return pages the search actually surfaced"#;

/// Gap-analysis prompt over the accumulated evidence.
pub(crate) const GAP_ANALYSIS_PROMPT: &str = r#"You are reviewing the evidence gathered so far for a research effort.

RESEARCH MISSION:
{mission}

EVIDENCE GATHERED:
{digest}

QUERIES ALREADY EXECUTED:
{visited}

Decide whether critical gaps remain between the mission and the evidence.
If the evidence is sufficient, return an empty query list.
Otherwise return up to {max_queries} new search queries, each targeting one
specific gap. Do not repeat or trivially rephrase an already-executed query."#;

pub(crate) fn extraction_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "title": {"type": "string"},
            "summary": {"type": "string"},
            "facts": {"type": "array", "items": {"type": "string"}}
        },
        "required": ["title", "summary"]
    })
}

pub(crate) fn search_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "summary": {"type": "string"},
            "facts": {"type": "array", "items": {"type": "string"}},
            "sources": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "url": {"type": "string"},
                        "title": {"type": "string"}
                    },
                    "required": ["url"]
                }
            }
        },
        "required": ["summary"]
    })
}

pub(crate) fn gap_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "queries": {"type": "array", "items": {"type": "string"}}
        },
        "required": ["queries"]
    })
}
