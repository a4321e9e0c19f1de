//! Prompt templates and response schemas for the drafting stage.

use serde_json::json;

use super::SectionKind;

/// Drafting prompt for one section.
pub(crate) const SECTION_DRAFT_PROMPT: &str = r#"You are a research analyst writing one section of a larger report.

SECTION TITLE:
{title}

SECTION GUIDANCE:
{guidance}

CONTENT SHAPE:
{shape}

LENGTH:
{length_guide}

USER INSTRUCTIONS:
{instructions}

SOURCE MANIFEST:
{manifest}

EVIDENCE:
{evidence}
{revision}
RULES:
- Ground every substantive statement in the evidence and cite source ids in square brackets, e.g. [S3]
- Only cite ids that appear in the source manifest
- Do not include the section title in the content; it is added by the caller
- Alongside the content, list up to {max_claims} claims: short citation-backed assertions the content makes"#;

/// Revision segment appended to the drafting prompt on a rejected draft.
pub(crate) const REVISION_SEGMENT: &str = r#"
PREVIOUS DRAFT:
{previous}

EDITOR FEEDBACK:
{feedback}

Revise the previous draft to address the feedback. Keep what the editor did
not object to.
"#;

/// Critique prompt for the editor pass.
pub(crate) const CRITIQUE_PROMPT: &str = r#"You are a meticulous editor reviewing the claims made by a drafted report section.

CLAIMS:
{claims}

EVIDENCE THE DRAFT WAS WRITTEN FROM:
{evidence}

Check every claim against the evidence. Reject the draft when a claim is
unsupported, contradicts the evidence, or cites a source id that does not
exist. Otherwise approve it. When rejecting, the feedback must name each
problematic claim and what is wrong with it."#;

pub(crate) fn draft_schema(kind: SectionKind) -> serde_json::Value {
    let content = match kind {
        SectionKind::Text => json!({"type": "string"}),
        SectionKind::List => json!({"type": "array", "items": {"type": "string"}}),
    };
    json!({
        "type": "object",
        "properties": {
            "content": content,
            "claims": {"type": "array", "items": {"type": "string"}}
        },
        "required": ["content"]
    })
}

pub(crate) fn critique_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "verdict": {"type": "string", "enum": ["approved", "rejected"]},
            "feedback": {"type": "string"}
        },
        "required": ["verdict"]
    })
}
