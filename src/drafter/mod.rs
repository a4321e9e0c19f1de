//! Draft-review refinement loop.
//!
//! Each section plan is drafted against a ranked subset of the harvested
//! evidence, then submitted to an independently prompted editor pass. A
//! rejected draft is revised with the editor's feedback attached, a bounded
//! number of times. Editor failures fail open; quota exhaustion unwinds.

mod evidence;
mod prompt;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::events::{PipelineCallbacks, PipelineEvent, verbose_callbacks};
use crate::gateway::{
    Attachment, Gateway, GatewayRequest, parse_reply, truncate_chars, try_parse_reply,
};
use crate::harvester::CitationBlock;
use crate::pool::TaskPool;

/// Declared shape of a section's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionKind {
    /// Free-text prose.
    Text,
    /// An itemized list.
    List,
}

/// One planned section of the output document. Immutable for the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionPlan {
    pub title: String,
    pub guidance: String,
    pub kind: SectionKind,
}

/// Drafted content matching the section's declared shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DraftContent {
    Text(String),
    List(Vec<String>),
}

impl DraftContent {
    fn is_empty(&self) -> bool {
        match self {
            DraftContent::Text(text) => text.trim().is_empty(),
            DraftContent::List(items) => items.iter().all(|item| item.trim().is_empty()),
        }
    }

    fn as_prompt_text(&self) -> String {
        match self {
            DraftContent::Text(text) => text.clone(),
            DraftContent::List(items) => items
                .iter()
                .map(|item| format!("- {}", item))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// One draft produced for a section.
#[derive(Debug, Clone, Deserialize)]
pub struct DraftPayload {
    pub content: DraftContent,
    /// Citation-backed assertions extracted from the content; used only by
    /// the editor pass, never rendered.
    #[serde(default)]
    pub claims: Vec<String>,
}

impl DraftPayload {
    fn placeholder(kind: SectionKind, reason: &str) -> Self {
        let text = format!("[Section drafting failed: {}]", reason);
        let content = match kind {
            SectionKind::Text => DraftContent::Text(text),
            SectionKind::List => DraftContent::List(vec![text]),
        };
        Self {
            content,
            claims: Vec::new(),
        }
    }
}

/// Editor decision for one draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Approved,
    Rejected,
}

/// Editor reply for one draft. Not persisted beyond the revision loop.
#[derive(Debug, Clone, Deserialize)]
pub struct ReviewVerdict {
    pub verdict: Verdict,
    #[serde(default)]
    pub feedback: String,
}

impl Default for ReviewVerdict {
    fn default() -> Self {
        Self {
            verdict: Verdict::Approved,
            feedback: String::new(),
        }
    }
}

/// A finished section, same order as the input plans.
#[derive(Debug, Clone, Serialize)]
pub struct ReportSection {
    pub title: String,
    pub kind: SectionKind,
    pub content: DraftContent,
}

/// Tuning for the drafting stage.
#[derive(Clone)]
pub struct DraftConfig {
    /// Revision attempts after the initial draft.
    pub max_revisions: usize,
    /// Sections drafted simultaneously.
    pub section_batch_size: usize,
    /// Delay between section dispatches.
    pub batch_delay: Duration,
    /// Citation blocks selected per section.
    pub evidence_cap: usize,
    /// Claims kept per draft; extras are truncated.
    pub max_claims: usize,
    /// Character budget per citation block in the evidence pack.
    pub max_block_chars: usize,
    /// Character budget for editor feedback in the revision prompt.
    pub max_feedback_chars: usize,
    /// Character budget for user instructions in the drafting prompt.
    pub max_instructions_chars: usize,
}

impl Default for DraftConfig {
    fn default() -> Self {
        Self {
            max_revisions: 2,
            section_batch_size: 3,
            batch_delay: Duration::from_millis(500),
            evidence_cap: 10,
            max_claims: 8,
            max_block_chars: 6_000,
            max_feedback_chars: 2_000,
            max_instructions_chars: 4_000,
        }
    }
}

impl DraftConfig {
    pub fn max_revisions(mut self, n: usize) -> Self {
        self.max_revisions = n;
        self
    }

    pub fn section_batch_size(mut self, n: usize) -> Self {
        self.section_batch_size = n;
        self
    }

    pub fn batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = delay;
        self
    }

    pub fn evidence_cap(mut self, n: usize) -> Self {
        self.evidence_cap = n;
        self
    }
}

/// Drafts every planned section against the harvested evidence.
pub struct Drafter {
    gateway: Arc<dyn Gateway>,
    config: DraftConfig,
    callbacks: PipelineCallbacks,
}

impl Drafter {
    pub fn new(gateway: Arc<dyn Gateway>, config: DraftConfig) -> Self {
        Self {
            gateway,
            config,
            callbacks: PipelineCallbacks::default(),
        }
    }

    /// Enable verbose logging to stderr.
    pub fn verbose(mut self, enabled: bool) -> Self {
        if enabled {
            self.callbacks = verbose_callbacks();
        }
        self
    }

    /// Set observability callbacks.
    pub fn callbacks(mut self, callbacks: PipelineCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Draft every section, in input order. Reads the harvester's citation
    /// blocks and never mutates them.
    pub async fn draft_sections(
        &self,
        plans: Vec<SectionPlan>,
        blocks: &[CitationBlock],
        instructions: &str,
        attachments: &[Attachment],
    ) -> Result<Vec<ReportSection>> {
        let pool = TaskPool::new(self.config.section_batch_size, self.config.batch_delay);
        let tasks: Vec<_> = plans
            .into_iter()
            .map(|plan| move || self.draft_section(plan, blocks, instructions, attachments))
            .collect();
        pool.run_all(tasks).await
    }

    /// Draft one section through the full draft → critique → revise loop.
    async fn draft_section(
        &self,
        plan: SectionPlan,
        blocks: &[CitationBlock],
        instructions: &str,
        attachments: &[Attachment],
    ) -> Result<ReportSection> {
        let pack = evidence::select_evidence(&plan, blocks, self.config.evidence_cap);
        let manifest = evidence::render_manifest(&pack);
        let pack_text = evidence::render_pack(&pack, self.config.max_block_chars);
        let guide = evidence::length_guide(plan.kind, pack.len());

        self.emit(PipelineEvent::DraftStarted {
            section: plan.title.clone(),
            attempt: 0,
        });
        let mut draft = match self
            .request_draft(&plan, &manifest, &pack_text, &guide, instructions, attachments, None)
            .await
        {
            Ok(payload) => payload,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                self.emit(PipelineEvent::Error {
                    message: format!("drafting \"{}\" failed: {}", plan.title, err),
                });
                self.emit(PipelineEvent::SectionCompleted {
                    section: plan.title.clone(),
                    approved: false,
                });
                let payload = DraftPayload::placeholder(plan.kind, &err.to_string());
                return Ok(ReportSection {
                    title: plan.title,
                    kind: plan.kind,
                    content: payload.content,
                });
            }
        };

        let mut approved = false;
        for attempt in 0..=self.config.max_revisions {
            let review = match self.request_critique(&draft, &pack_text).await {
                Ok(review) => review,
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    // Editor failure is not draft failure: accept what we have.
                    self.emit(PipelineEvent::Error {
                        message: format!("critique for \"{}\" failed: {}", plan.title, err),
                    });
                    break;
                }
            };
            self.emit(PipelineEvent::CritiqueVerdict {
                section: plan.title.clone(),
                approved: review.verdict == Verdict::Approved,
                feedback: review.feedback.clone(),
            });
            if review.verdict == Verdict::Approved {
                approved = true;
                break;
            }
            if attempt == self.config.max_revisions {
                break;
            }

            self.emit(PipelineEvent::DraftStarted {
                section: plan.title.clone(),
                attempt: attempt + 1,
            });
            draft = match self
                .request_draft(
                    &plan,
                    &manifest,
                    &pack_text,
                    &guide,
                    instructions,
                    attachments,
                    Some((&draft, &review.feedback)),
                )
                .await
            {
                Ok(payload) => payload,
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    // Keep the last good draft.
                    self.emit(PipelineEvent::Error {
                        message: format!("revision for \"{}\" failed: {}", plan.title, err),
                    });
                    break;
                }
            };
        }

        self.emit(PipelineEvent::SectionCompleted {
            section: plan.title.clone(),
            approved,
        });
        Ok(ReportSection {
            title: plan.title,
            kind: plan.kind,
            content: draft.content,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn request_draft(
        &self,
        plan: &SectionPlan,
        manifest: &str,
        pack_text: &str,
        guide: &str,
        instructions: &str,
        attachments: &[Attachment],
        revision: Option<(&DraftPayload, &str)>,
    ) -> Result<DraftPayload> {
        let revision_text = match revision {
            Some((previous, feedback)) => prompt::REVISION_SEGMENT
                .replace(
                    "{previous}",
                    &truncate_chars(&previous.content.as_prompt_text(), self.config.max_block_chars),
                )
                .replace(
                    "{feedback}",
                    &truncate_chars(feedback, self.config.max_feedback_chars),
                ),
            None => String::new(),
        };
        let shape = match plan.kind {
            SectionKind::Text => "Prose paragraphs (a single string).",
            SectionKind::List => "An itemized list (an array of strings).",
        };
        let instructions_text = if instructions.trim().is_empty() {
            "(none)".to_string()
        } else {
            truncate_chars(instructions, self.config.max_instructions_chars)
        };

        let rendered = prompt::SECTION_DRAFT_PROMPT
            .replace("{title}", &plan.title)
            .replace("{guidance}", &plan.guidance)
            .replace("{shape}", shape)
            .replace("{length_guide}", guide)
            .replace("{instructions}", &instructions_text)
            .replace("{manifest}", manifest)
            .replace("{evidence}", pack_text)
            .replace("{revision}", &revision_text)
            .replace("{max_claims}", &self.config.max_claims.to_string());
        let schema = prompt::draft_schema(plan.kind);

        let reply = self
            .gateway
            .invoke(
                GatewayRequest::new(rendered, schema.clone())
                    .with_attachments(attachments.to_vec()),
            )
            .await?;

        let mut payload: DraftPayload = try_parse_reply(&reply, &schema).ok_or_else(|| {
            Error::MalformedReply(format!(
                "draft for \"{}\" did not match the response shape",
                plan.title
            ))
        })?;
        payload.claims.truncate(self.config.max_claims);
        if payload.content.is_empty() {
            payload.content = DraftPayload::placeholder(plan.kind, "empty draft").content;
        }
        Ok(payload)
    }

    async fn request_critique(
        &self,
        draft: &DraftPayload,
        pack_text: &str,
    ) -> Result<ReviewVerdict> {
        let claims_text = if draft.claims.is_empty() {
            "(the draft lists no claims)".to_string()
        } else {
            draft
                .claims
                .iter()
                .map(|claim| format!("- {}", claim))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let rendered = prompt::CRITIQUE_PROMPT
            .replace("{claims}", &claims_text)
            .replace("{evidence}", pack_text);
        let schema = prompt::critique_schema();

        let reply = self
            .gateway
            .invoke(GatewayRequest::new(rendered, schema.clone()))
            .await?;
        // A malformed verdict fails open to approval.
        Ok(parse_reply(&reply, &schema, ReviewVerdict::default()))
    }

    fn emit(&self, event: PipelineEvent) {
        self.callbacks.emit(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockGateway, structured};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_config() -> DraftConfig {
        DraftConfig::default().batch_delay(Duration::from_millis(1))
    }

    fn text_plan(title: &str, guidance: &str) -> SectionPlan {
        SectionPlan {
            title: title.to_string(),
            guidance: guidance.to_string(),
            kind: SectionKind::Text,
        }
    }

    fn block(index: usize, title: &str, body: &str) -> CitationBlock {
        CitationBlock {
            id: format!("S{}", index + 1),
            key: format!("https://s{}.example", index),
            title: title.to_string(),
            body: body.to_string(),
            discovery_index: index,
        }
    }

    fn is_draft(request: &crate::gateway::GatewayRequest) -> bool {
        request.prompt.contains("research analyst")
    }

    fn is_critique(request: &crate::gateway::GatewayRequest) -> bool {
        request.prompt.contains("meticulous editor")
    }

    #[tokio::test]
    async fn test_fail_open_critique_returns_first_draft() {
        let gateway = MockGateway::new(|request| {
            if is_critique(request) {
                Err(Error::Gateway("editor offline".into()))
            } else {
                Ok(structured(
                    json!({"content": "drafted prose", "claims": ["c1"]}),
                ))
            }
        });

        let drafter = Drafter::new(gateway.clone(), fast_config());
        let blocks = vec![block(0, "Topic", "facts about the topic")];
        let sections = drafter
            .draft_sections(vec![text_plan("Topic", "cover it")], &blocks, "", &[])
            .await
            .unwrap();

        assert_eq!(sections.len(), 1);
        assert_eq!(
            sections[0].content,
            DraftContent::Text("drafted prose".into())
        );
        // Exactly one draft attempt, no retries.
        assert_eq!(gateway.calls_matching(is_draft), 1);
        assert_eq!(gateway.calls_matching(is_critique), 1);
    }

    #[tokio::test]
    async fn test_bounded_revision_returns_last_draft() {
        let draft_counter = Arc::new(AtomicUsize::new(0));
        let counter = draft_counter.clone();
        let gateway = MockGateway::new(move |request| {
            if is_critique(request) {
                Ok(structured(
                    json!({"verdict": "rejected", "feedback": "not good enough"}),
                ))
            } else {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(structured(json!({
                    "content": format!("draft {}", n),
                    "claims": ["c"]
                })))
            }
        });

        let config = fast_config().max_revisions(2);
        let drafter = Drafter::new(gateway.clone(), config);
        let blocks = vec![block(0, "Topic", "body")];
        let sections = drafter
            .draft_sections(vec![text_plan("Topic", "guidance")], &blocks, "", &[])
            .await
            .unwrap();

        // maxRevisions + 1 of each, and the final content is the last draft.
        assert_eq!(gateway.calls_matching(is_draft), 3);
        assert_eq!(gateway.calls_matching(is_critique), 3);
        assert_eq!(sections[0].content, DraftContent::Text("draft 3".into()));
    }

    #[tokio::test]
    async fn test_approval_stops_the_loop() {
        let gateway = MockGateway::new(|request| {
            if is_critique(request) {
                Ok(structured(json!({"verdict": "approved"})))
            } else {
                Ok(structured(json!({"content": "fine prose"})))
            }
        });

        let drafter = Drafter::new(gateway.clone(), fast_config());
        let blocks = vec![block(0, "Topic", "body")];
        drafter
            .draft_sections(vec![text_plan("Topic", "guidance")], &blocks, "", &[])
            .await
            .unwrap();

        assert_eq!(gateway.calls_matching(is_draft), 1);
        assert_eq!(gateway.calls_matching(is_critique), 1);
    }

    #[tokio::test]
    async fn test_total_draft_failure_degrades_to_placeholder() {
        let gateway = MockGateway::new(|request| {
            if is_draft(request) {
                Err(Error::Gateway("model unavailable".into()))
            } else {
                Ok(structured(json!({"verdict": "approved"})))
            }
        });

        let drafter = Drafter::new(gateway.clone(), fast_config());
        let blocks = vec![block(0, "Topic", "body")];
        let sections = drafter
            .draft_sections(vec![text_plan("Topic", "guidance")], &blocks, "", &[])
            .await
            .unwrap();

        match &sections[0].content {
            DraftContent::Text(text) => {
                assert!(text.contains("[Section drafting failed"));
            }
            other => panic!("expected text placeholder, got {:?}", other),
        }
        // The editor never runs on a failed draft.
        assert_eq!(gateway.calls_matching(is_critique), 0);
    }

    #[tokio::test]
    async fn test_malformed_draft_reply_degrades_to_placeholder() {
        // A string where the list section requires an array.
        let gateway = MockGateway::new(|request| {
            if is_draft(request) {
                Ok(structured(json!({"content": "not a list"})))
            } else {
                Ok(structured(json!({"verdict": "approved"})))
            }
        });

        let drafter = Drafter::new(gateway, fast_config());
        let plan = SectionPlan {
            title: "Items".into(),
            guidance: "enumerate".into(),
            kind: SectionKind::List,
        };
        let blocks = vec![block(0, "Items", "body")];
        let sections = drafter
            .draft_sections(vec![plan], &blocks, "", &[])
            .await
            .unwrap();

        match &sections[0].content {
            DraftContent::List(items) => {
                assert_eq!(items.len(), 1);
                assert!(items[0].contains("[Section drafting failed"));
            }
            other => panic!("expected list placeholder, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_quota_exhaustion_propagates() {
        let gateway = MockGateway::new(|_| Err(Error::QuotaExhausted("billing".into())));
        let drafter = Drafter::new(gateway, fast_config());
        let blocks = vec![block(0, "Topic", "body")];
        let result = drafter
            .draft_sections(vec![text_plan("Topic", "guidance")], &blocks, "", &[])
            .await;
        assert!(matches!(result, Err(Error::QuotaExhausted(_))));
    }

    #[tokio::test]
    async fn test_sections_return_in_plan_order() {
        let gateway = MockGateway::new(|request| {
            if is_critique(request) {
                Ok(structured(json!({"verdict": "approved"})))
            } else if request.prompt.contains("First") {
                Ok(structured(json!({"content": "first content"})))
            } else {
                Ok(structured(json!({"content": "second content"})))
            }
        });

        let drafter = Drafter::new(gateway, fast_config());
        let blocks = vec![block(0, "Shared", "body")];
        let sections = drafter
            .draft_sections(
                vec![text_plan("First", "a"), text_plan("Second", "b")],
                &blocks,
                "",
                &[],
            )
            .await
            .unwrap();

        assert_eq!(sections[0].title, "First");
        assert_eq!(sections[1].title, "Second");
        assert_eq!(sections[0].content, DraftContent::Text("first content".into()));
    }

    #[tokio::test]
    async fn test_zero_overlap_section_still_gets_evidence() {
        let gateway = MockGateway::new(|request| {
            if is_critique(request) {
                Ok(structured(json!({"verdict": "approved"})))
            } else {
                Ok(structured(json!({"content": "prose"})))
            }
        });

        let drafter = Drafter::new(gateway.clone(), fast_config());
        let blocks = vec![block(0, "Unrelated topic", "nothing shared with the plan")];
        drafter
            .draft_sections(vec![text_plan("Xyzzy", "qwerty")], &blocks, "", &[])
            .await
            .unwrap();

        // The fallback pack still carries the block into the prompt.
        let saw_block = gateway.calls.lock().unwrap().iter().any(|request| {
            is_draft(request) && request.prompt.contains("Unrelated topic")
        });
        assert!(saw_block);
    }

    #[tokio::test]
    async fn test_claims_capped_before_critique() {
        let claims: Vec<String> = (0..12).map(|i| format!("claim-{}", i)).collect();
        let claims_value = serde_json::to_value(&claims).unwrap();
        let gateway = MockGateway::new(move |request| {
            if is_critique(request) {
                Ok(structured(json!({"verdict": "approved"})))
            } else {
                Ok(structured(
                    json!({"content": "prose", "claims": claims_value.clone()}),
                ))
            }
        });

        let drafter = Drafter::new(gateway.clone(), fast_config());
        let blocks = vec![block(0, "Topic", "body")];
        drafter
            .draft_sections(vec![text_plan("Topic", "guidance")], &blocks, "", &[])
            .await
            .unwrap();

        let critique_prompt = gateway
            .calls
            .lock()
            .unwrap()
            .iter()
            .find(|request| is_critique(request))
            .map(|request| request.prompt.clone())
            .unwrap();
        assert!(critique_prompt.contains("claim-7"));
        assert!(!critique_prompt.contains("claim-8"));
    }

    #[tokio::test]
    async fn test_rejection_then_editor_failure_keeps_revised_draft() {
        let critique_counter = Arc::new(AtomicUsize::new(0));
        let draft_counter = Arc::new(AtomicUsize::new(0));
        let critiques = critique_counter.clone();
        let drafts = draft_counter.clone();
        let gateway = MockGateway::new(move |request| {
            if is_critique(request) {
                let n = critiques.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    Ok(structured(
                        json!({"verdict": "rejected", "feedback": "cite more"}),
                    ))
                } else {
                    Err(Error::Gateway("editor offline".into()))
                }
            } else {
                let n = drafts.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(structured(json!({"content": format!("draft {}", n)})))
            }
        });

        let drafter = Drafter::new(gateway.clone(), fast_config());
        let blocks = vec![block(0, "Topic", "body")];
        let sections = drafter
            .draft_sections(vec![text_plan("Topic", "guidance")], &blocks, "", &[])
            .await
            .unwrap();

        // Draft 2 was produced from the rejection feedback; the editor's
        // later failure accepts it as-is.
        assert_eq!(sections[0].content, DraftContent::Text("draft 2".into()));
        assert_eq!(gateway.calls_matching(is_draft), 2);
        assert_eq!(gateway.calls_matching(is_critique), 2);
    }
}
