//! Search-vector execution and reference extraction.
//!
//! A search vector is one free-text query delegated to the gateway with
//! search tooling enabled. Reference URLs come from the reply's structured
//! metadata when present, with a regex sweep over the reply text as fallback
//! for gateways that only cite sources inline.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use super::prompt;
use crate::error::Result;
use crate::gateway::{Gateway, GatewayRequest, SearchReference, parse_reply, truncate_chars};

static URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https?://[^\s"'<>\)\]]+"#).expect("url pattern")
});

/// Result of executing one search vector.
pub(crate) struct SearchOutcome {
    pub summary: String,
    pub facts: Vec<String>,
    pub sources: Vec<SearchReference>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchReplyBody {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    facts: Vec<String>,
    #[serde(default)]
    sources: Vec<SearchReference>,
}

/// Execute one search vector through the gateway.
pub(crate) async fn execute_search(
    gateway: &dyn Gateway,
    mission: &str,
    query: &str,
    max_facts: usize,
    max_mission_chars: usize,
) -> Result<SearchOutcome> {
    let prompt = prompt::SEARCH_VECTOR_PROMPT
        .replace("{mission}", &truncate_chars(mission, max_mission_chars))
        .replace("{query}", query)
        .replace("{max_facts}", &max_facts.to_string());
    let schema = prompt::search_schema();

    let reply = gateway
        .invoke(GatewayRequest::new(prompt, schema.clone()).with_search())
        .await?;

    let body: SearchReplyBody = parse_reply(&reply, &schema, SearchReplyBody::default());

    // Structured metadata first, then sources named in the body, then a
    // free-text sweep; first mention of a URL wins.
    fn push_unique(sources: &mut Vec<SearchReference>, candidate: SearchReference) {
        let url = candidate.url.trim();
        if url.is_empty() || sources.iter().any(|existing| existing.url == url) {
            return;
        }
        sources.push(SearchReference {
            url: url.to_string(),
            title: candidate.title,
        });
    }

    let mut sources: Vec<SearchReference> = Vec::new();
    for reference in reply.references {
        push_unique(&mut sources, reference);
    }
    for reference in body.sources {
        push_unique(&mut sources, reference);
    }
    for url in extract_reference_urls(&reply.text) {
        push_unique(
            &mut sources,
            SearchReference {
                url,
                title: String::new(),
            },
        );
    }

    Ok(SearchOutcome {
        summary: body.summary,
        facts: body.facts,
        sources,
    })
}

/// Pull every URL mentioned in free text, trimming trailing punctuation.
pub(crate) fn extract_reference_urls(text: &str) -> Vec<String> {
    URL_PATTERN
        .find_iter(text)
        .map(|found| {
            found
                .as_str()
                .trim_end_matches(['.', ',', ';', ':', '!', '?'])
                .to_string()
        })
        .collect()
}

/// Deterministic citation key for a query's own result block.
pub(crate) fn query_citation_key(query: &str) -> String {
    let slug: String = query
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let mut collapsed = String::with_capacity(slug.len());
    for c in slug.chars() {
        if c == '-' && collapsed.ends_with('-') {
            continue;
        }
        collapsed.push(c);
    }
    let collapsed = collapsed.trim_matches('-');
    let truncated: String = collapsed.chars().take(64).collect();
    if truncated.is_empty() {
        "search:query".to_string()
    } else {
        format!("search:{}", truncated)
    }
}
