//! Evidence harvesting engine.
//!
//! Given direct URLs and open-ended search vectors, the harvester fetches and
//! deduplicates supporting evidence through the gateway, then runs a
//! self-directed gap-analysis loop that decides whether more searching is
//! needed, bounded by a maximum round count.

mod prompt;
mod registry;
mod search;

pub use registry::{
    CITATION_FORMAT_DIRECTIVE, CitationBlock, EvidenceRecord, FailedSource, Origin, SourceRecord,
    SourceReference, SourceStatus,
};

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::error::Result;
use crate::events::{PipelineCallbacks, PipelineEvent, verbose_callbacks};
use crate::gateway::{Gateway, GatewayRequest, parse_reply, truncate_chars};
use crate::pool::TaskPool;
use registry::SourceRegistry;

/// Tuning for one harvesting run.
#[derive(Clone)]
pub struct HarvestConfig {
    /// Maximum simultaneous in-flight source fetches.
    pub max_concurrent_fetches: usize,
    /// Delay between fetch dispatches within a worker slot.
    pub dispatch_delay: Duration,
    /// Search vectors executed simultaneously.
    pub query_batch_size: usize,
    /// Delay between query dispatches.
    pub batch_delay: Duration,
    /// Maximum gap-analysis rounds after the initial harvest.
    pub max_rounds: usize,
    /// Facts kept per source; extras are truncated, not rejected.
    pub max_facts_per_source: usize,
    /// New queries requested from one gap-analysis call.
    pub max_gap_queries: usize,
    /// Sources included in the gap-analysis digest.
    pub gap_digest_sources: usize,
    /// Character budget for the mission statement inside prompts.
    pub max_mission_chars: usize,
    /// Character budget for the evidence digest inside the gap prompt.
    pub max_digest_chars: usize,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: 5,
            dispatch_delay: Duration::from_millis(200),
            query_batch_size: 3,
            batch_delay: Duration::from_millis(500),
            max_rounds: 3,
            max_facts_per_source: 10,
            max_gap_queries: 4,
            gap_digest_sources: 20,
            max_mission_chars: 4_000,
            max_digest_chars: 12_000,
        }
    }
}

impl HarvestConfig {
    pub fn max_concurrent_fetches(mut self, n: usize) -> Self {
        self.max_concurrent_fetches = n;
        self
    }

    /// Single-threaded mode: one in-flight call at a time. Context emission
    /// order becomes deterministic for identical inputs.
    pub fn sequential(mut self) -> Self {
        self.max_concurrent_fetches = 1;
        self.query_batch_size = 1;
        self
    }

    pub fn dispatch_delay(mut self, delay: Duration) -> Self {
        self.dispatch_delay = delay;
        self
    }

    pub fn query_batch_size(mut self, n: usize) -> Self {
        self.query_batch_size = n;
        self
    }

    pub fn batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = delay;
        self
    }

    pub fn max_rounds(mut self, n: usize) -> Self {
        self.max_rounds = n;
        self
    }

    pub fn max_facts_per_source(mut self, n: usize) -> Self {
        self.max_facts_per_source = n;
        self
    }
}

/// Output of one harvesting run.
#[derive(Debug, Clone)]
pub struct HarvestOutput {
    /// Ordered concatenation of every emitted citation block.
    pub context: String,
    /// Every non-failed registry entry.
    pub sources: Vec<SourceReference>,
    /// Every entry that ended in the failed state.
    pub failed_urls: Vec<FailedSource>,
}

#[derive(Debug, Default, Deserialize)]
struct ExtractionReply {
    #[serde(default)]
    title: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    facts: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct GapReply {
    #[serde(default)]
    queries: Vec<String>,
}

/// Recursive evidence harvester for one research run.
pub struct Harvester {
    gateway: Arc<dyn Gateway>,
    config: HarvestConfig,
    mission: String,
    registry: SourceRegistry,
    callbacks: PipelineCallbacks,
}

impl Harvester {
    /// Create a harvester for one research mission.
    pub fn new(gateway: Arc<dyn Gateway>, config: HarvestConfig, mission: impl Into<String>) -> Self {
        let registry = SourceRegistry::new(config.max_facts_per_source);
        Self {
            gateway,
            config,
            mission: mission.into(),
            registry,
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

    /// Run the full harvest: the initial URLs and queries, then up to
    /// `max_rounds` gap-analysis rounds, stopping early when gap analysis
    /// yields no new queries.
    pub async fn run(&self, urls: Vec<String>, queries: Vec<String>) -> Result<HarvestOutput> {
        self.emit(PipelineEvent::RoundStart {
            round: 0,
            max_rounds: self.config.max_rounds,
        });
        self.harvest(&urls, &queries, Origin::Direct).await?;

        for round in 1..=self.config.max_rounds {
            let follow_ups = self.analyze_gaps(round).await?;
            if follow_ups.is_empty() {
                break;
            }
            self.emit(PipelineEvent::RoundStart {
                round,
                max_rounds: self.config.max_rounds,
            });
            self.harvest(&[], &follow_ups, Origin::Discovered).await?;
        }

        Ok(HarvestOutput {
            context: self.registry.render_context(),
            sources: self.registry.sources(),
            failed_urls: self.registry.failed(),
        })
    }

    /// Citation blocks accumulated so far, in first-discovery order. The
    /// drafting stage ranks these; it never mutates harvester state.
    pub fn citation_blocks(&self) -> Vec<CitationBlock> {
        self.registry.citation_blocks()
    }

    /// One harvest step: fetch the given URLs, execute the given queries,
    /// then drain any sources the queries discovered.
    async fn harvest(&self, urls: &[String], queries: &[String], origin: Origin) -> Result<()> {
        let fresh_urls: Vec<String> = urls
            .iter()
            .filter(|url| self.registry.enqueue(url, None, origin))
            .map(|url| url.trim().to_string())
            .collect();
        for url in &fresh_urls {
            self.emit(PipelineEvent::SourceQueued { url: url.clone() });
        }
        self.fetch_batch(fresh_urls).await?;

        self.run_queries(queries).await?;

        // Sources discovered by the queries feed one extra fetch pass.
        let discovered = self.registry.queued_urls();
        self.fetch_batch(discovered).await?;
        Ok(())
    }

    /// Fetch a batch of queued URLs through the bounded worker pool.
    async fn fetch_batch(&self, urls: Vec<String>) -> Result<()> {
        if urls.is_empty() {
            return Ok(());
        }
        let pool = TaskPool::new(self.config.max_concurrent_fetches, self.config.dispatch_delay);
        let tasks: Vec<_> = urls
            .into_iter()
            .map(|url| move || self.fetch_source(url))
            .collect();
        pool.run_all(tasks).await?;
        Ok(())
    }

    /// Fetch one source: claim it, extract evidence through the gateway, and
    /// land it in a terminal state. Ordinary failures are recorded and
    /// absorbed; quota exhaustion unwinds the batch.
    async fn fetch_source(&self, url: String) -> Result<()> {
        if !self.registry.claim(&url) {
            return Ok(());
        }

        let prompt = prompt::SOURCE_EXTRACTION_PROMPT
            .replace(
                "{mission}",
                &truncate_chars(&self.mission, self.config.max_mission_chars),
            )
            .replace("{url}", &url)
            .replace("{max_facts}", &self.config.max_facts_per_source.to_string());
        let schema = prompt::extraction_schema();

        match self
            .gateway
            .invoke(GatewayRequest::new(prompt, schema.clone()))
            .await
        {
            Ok(reply) => {
                let extracted: ExtractionReply =
                    parse_reply(&reply, &schema, ExtractionReply::default());
                let fact_count = self.registry.complete(
                    &url,
                    &extracted.title,
                    &extracted.summary,
                    extracted.facts,
                );
                self.emit(PipelineEvent::SourceCompleted { url, fact_count });
                Ok(())
            }
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                let reason = err.to_string();
                self.registry.fail(&url, &reason);
                self.emit(PipelineEvent::SourceFailed { url, reason });
                Ok(())
            }
        }
    }

    /// Execute the not-yet-visited queries through the bounded pool.
    async fn run_queries(&self, queries: &[String]) -> Result<()> {
        let fresh: Vec<String> = queries
            .iter()
            .filter(|query| self.registry.visit_query(query))
            .map(|query| query.trim().to_string())
            .collect();
        if fresh.is_empty() {
            return Ok(());
        }
        let pool = TaskPool::new(self.config.query_batch_size, self.config.batch_delay);
        let tasks: Vec<_> = fresh
            .into_iter()
            .map(|query| move || self.run_query(query))
            .collect();
        pool.run_all(tasks).await?;
        Ok(())
    }

    /// Execute one search vector: merge discovered sources into the registry
    /// as queued entries and wrap the query's own synthesis in a citation
    /// block. A failed search leaves the query visited and the run continues.
    async fn run_query(&self, query: String) -> Result<()> {
        self.emit(PipelineEvent::SearchStarted {
            query: query.clone(),
        });

        let outcome = match search::execute_search(
            self.gateway.as_ref(),
            &self.mission,
            &query,
            self.config.max_facts_per_source,
            self.config.max_mission_chars,
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                self.emit(PipelineEvent::Error {
                    message: format!("search \"{}\" failed: {}", query, err),
                });
                return Ok(());
            }
        };

        let mut discovered = 0;
        for source in &outcome.sources {
            let title = if source.title.is_empty() {
                None
            } else {
                Some(source.title.as_str())
            };
            if self.registry.enqueue(&source.url, title, Origin::Discovered) {
                discovered += 1;
                self.emit(PipelineEvent::SourceQueued {
                    url: source.url.clone(),
                });
            }
        }

        let key = search::query_citation_key(&query);
        let mut body = format!("Summary: {}", outcome.summary);
        if !outcome.facts.is_empty() {
            body.push_str("\nFacts:");
            for fact in outcome.facts.iter().take(self.config.max_facts_per_source) {
                body.push_str("\n- ");
                body.push_str(fact);
            }
        }
        self.registry
            .append_synthetic_block(&key, &format!("Search results: {}", query), body);

        self.emit(PipelineEvent::SearchCompleted { query, discovered });
        Ok(())
    }

    /// Ask the gateway whether critical gaps remain. Fails open: any
    /// non-fatal error means "no gaps" and the recursion stops.
    async fn analyze_gaps(&self, round: usize) -> Result<Vec<String>> {
        let digest = truncate_chars(
            &self
                .registry
                .evidence_digest(self.config.gap_digest_sources, 3),
            self.config.max_digest_chars,
        );
        let visited = self.registry.visited_queries();
        let visited_text = if visited.is_empty() {
            "(none)".to_string()
        } else {
            visited.join("\n")
        };

        let prompt = prompt::GAP_ANALYSIS_PROMPT
            .replace(
                "{mission}",
                &truncate_chars(&self.mission, self.config.max_mission_chars),
            )
            .replace("{digest}", &digest)
            .replace("{visited}", &visited_text)
            .replace("{max_queries}", &self.config.max_gap_queries.to_string());
        let schema = prompt::gap_schema();

        match self
            .gateway
            .invoke(GatewayRequest::new(prompt, schema.clone()))
            .await
        {
            Ok(reply) => {
                let gaps: GapReply = parse_reply(&reply, &schema, GapReply::default());
                let fresh: Vec<String> = gaps
                    .queries
                    .into_iter()
                    .map(|query| query.trim().to_string())
                    .filter(|query| !query.is_empty() && !self.registry.is_query_visited(query))
                    .take(self.config.max_gap_queries)
                    .collect();
                self.emit(PipelineEvent::GapAnalysis {
                    round,
                    new_queries: fresh.len(),
                });
                Ok(fresh)
            }
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                self.emit(PipelineEvent::Error {
                    message: format!("gap analysis failed: {}", err),
                });
                self.emit(PipelineEvent::GapAnalysis {
                    round,
                    new_queries: 0,
                });
                Ok(Vec::new())
            }
        }
    }

    fn emit(&self, event: PipelineEvent) {
        self.callbacks.emit(&event);
    }
}
