//! Pipeline events and callbacks for observability.

use std::sync::Arc;

/// Events emitted during a research run for observability.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// A harvest round is starting (round 0 is the initial harvest).
    RoundStart { round: usize, max_rounds: usize },
    /// A source URL entered the registry.
    SourceQueued { url: String },
    /// A source fetch completed and its evidence was recorded.
    SourceCompleted { url: String, fact_count: usize },
    /// A source fetch failed and was recorded as a failed source.
    SourceFailed { url: String, reason: String },
    /// A search vector is being executed.
    SearchStarted { query: String },
    /// A search vector completed, possibly discovering new sources.
    SearchCompleted { query: String, discovered: usize },
    /// Gap analysis finished for a round.
    GapAnalysis { round: usize, new_queries: usize },
    /// A draft attempt started for a section (attempt 0 is the initial draft).
    DraftStarted { section: String, attempt: usize },
    /// The editor returned a verdict for a draft.
    CritiqueVerdict {
        section: String,
        approved: bool,
        feedback: String,
    },
    /// A section finished with its final content.
    SectionCompleted { section: String, approved: bool },
    /// A non-fatal error was absorbed by a fail-open path.
    Error { message: String },
}

/// Type alias for event callbacks
pub type EventCallback = Arc<dyn Fn(&PipelineEvent) + Send + Sync>;

/// Storage for pipeline callbacks
#[derive(Default, Clone)]
pub struct PipelineCallbacks {
    pub on_round_start: Option<EventCallback>,
    pub on_source_queued: Option<EventCallback>,
    pub on_source_completed: Option<EventCallback>,
    pub on_source_failed: Option<EventCallback>,
    pub on_search_started: Option<EventCallback>,
    pub on_search_completed: Option<EventCallback>,
    pub on_gap_analysis: Option<EventCallback>,
    pub on_draft_started: Option<EventCallback>,
    pub on_critique_verdict: Option<EventCallback>,
    pub on_section_completed: Option<EventCallback>,
    pub on_error: Option<EventCallback>,
    /// Catch-all callback for any event
    pub on_event: Option<EventCallback>,
}

impl PipelineCallbacks {
    /// Emit an event to the appropriate callback(s)
    pub fn emit(&self, event: &PipelineEvent) {
        let specific = match event {
            PipelineEvent::RoundStart { .. } => &self.on_round_start,
            PipelineEvent::SourceQueued { .. } => &self.on_source_queued,
            PipelineEvent::SourceCompleted { .. } => &self.on_source_completed,
            PipelineEvent::SourceFailed { .. } => &self.on_source_failed,
            PipelineEvent::SearchStarted { .. } => &self.on_search_started,
            PipelineEvent::SearchCompleted { .. } => &self.on_search_completed,
            PipelineEvent::GapAnalysis { .. } => &self.on_gap_analysis,
            PipelineEvent::DraftStarted { .. } => &self.on_draft_started,
            PipelineEvent::CritiqueVerdict { .. } => &self.on_critique_verdict,
            PipelineEvent::SectionCompleted { .. } => &self.on_section_completed,
            PipelineEvent::Error { .. } => &self.on_error,
        };

        if let Some(cb) = specific {
            cb(event);
        }

        if let Some(cb) = &self.on_event {
            cb(event);
        }
    }
}

/// Create verbose logging callbacks
pub fn verbose_callbacks() -> PipelineCallbacks {
    PipelineCallbacks {
        on_round_start: Some(Arc::new(|e| {
            if let PipelineEvent::RoundStart { round, max_rounds } = e {
                eprintln!("[dossier] Round {}/{}", round, max_rounds);
            }
        })),
        on_source_completed: Some(Arc::new(|e| {
            if let PipelineEvent::SourceCompleted { url, fact_count } = e {
                eprintln!("[dossier] ✓ {} ({} facts)", url, fact_count);
            }
        })),
        on_source_failed: Some(Arc::new(|e| {
            if let PipelineEvent::SourceFailed { url, reason } = e {
                let preview: String = reason.chars().take(80).collect();
                eprintln!("[dossier] ✗ {} — {}", url, preview);
            }
        })),
        on_search_started: Some(Arc::new(|e| {
            if let PipelineEvent::SearchStarted { query } = e {
                let preview: String = query.chars().take(60).collect();
                eprintln!("[dossier] 🔍 \"{}\"", preview);
            }
        })),
        on_search_completed: Some(Arc::new(|e| {
            if let PipelineEvent::SearchCompleted { query, discovered } = e {
                let preview: String = query.chars().take(60).collect();
                eprintln!("[dossier] 🔍 \"{}\" → {} sources", preview, discovered);
            }
        })),
        on_gap_analysis: Some(Arc::new(|e| {
            if let PipelineEvent::GapAnalysis { round, new_queries } = e {
                eprintln!(
                    "[dossier] Gap analysis round {}: {} follow-up queries",
                    round, new_queries
                );
            }
        })),
        on_draft_started: Some(Arc::new(|e| {
            if let PipelineEvent::DraftStarted { section, attempt } = e {
                eprintln!("[dossier] Drafting \"{}\" (attempt {})", section, attempt + 1);
            }
        })),
        on_critique_verdict: Some(Arc::new(|e| {
            if let PipelineEvent::CritiqueVerdict {
                section, approved, ..
            } = e
            {
                let status = if *approved { "approved" } else { "rejected" };
                eprintln!("[dossier] Editor {} \"{}\"", status, section);
            }
        })),
        on_section_completed: Some(Arc::new(|e| {
            if let PipelineEvent::SectionCompleted { section, approved } = e {
                let status = if *approved { "✓" } else { "○" };
                eprintln!("[dossier] {} Section \"{}\" done", status, section);
            }
        })),
        on_error: Some(Arc::new(|e| {
            if let PipelineEvent::Error { message } = e {
                eprintln!("[dossier] Error: {}", message);
            }
        })),
        ..Default::default()
    }
}
