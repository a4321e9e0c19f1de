//! Dossier - research orchestration engine
//!
//! Dossier turns raw input material (or a bare topic) into the evidence and
//! drafted sections of a citation-backed document by orchestrating many calls
//! to an external generative-language service. Two subsystems do the work:
//!
//! - The [`Harvester`] recursively discovers, fetches, and deduplicates
//!   supporting evidence from direct URLs and open-ended search vectors,
//!   under a bounded worker pool, with a self-directed gap-analysis loop.
//! - The [`Drafter`] writes each planned section against a ranked evidence
//!   subset, submits it to an automated editor pass, and revises a bounded
//!   number of times.
//!
//! Both talk to the service through the [`Gateway`] trait; plug in your own
//! implementation for the vendor of your choice.
//!
//! # Quick Start
//!
//! ```ignore
//! use dossier::{DraftConfig, Drafter, HarvestConfig, Harvester};
//!
//! #[tokio::main]
//! async fn main() -> dossier::Result<()> {
//!     let gateway = std::sync::Arc::new(MyGateway::new());
//!
//!     let harvester = Harvester::new(
//!         gateway.clone(),
//!         HarvestConfig::default(),
//!         "State of quantum error correction in 2026",
//!     )
//!     .verbose(true);
//!     let harvest = harvester
//!         .run(vec!["https://arxiv.org/abs/2601.0001".into()], vec![
//!             "quantum error correction 2026 milestones".into(),
//!         ])
//!         .await?;
//!
//!     let drafter = Drafter::new(gateway, DraftConfig::default());
//!     let sections = drafter
//!         .draft_sections(plans, &harvester.citation_blocks(), "", &[])
//!         .await?;
//!
//!     println!("{} sections, {} sources", sections.len(), harvest.sources.len());
//!     Ok(())
//! }
//! ```

mod drafter;
mod error;
mod events;
mod gateway;
mod harvester;
mod pool;
#[cfg(test)]
mod testing;

pub use drafter::{
    DraftConfig, DraftContent, DraftPayload, Drafter, ReportSection, ReviewVerdict, SectionKind,
    SectionPlan, Verdict,
};
pub use error::{Error, Result};
pub use events::{EventCallback, PipelineCallbacks, PipelineEvent, verbose_callbacks};
pub use gateway::{
    Attachment, Gateway, GatewayReply, GatewayRequest, SearchReference, parse_reply,
    try_parse_reply,
};
pub use harvester::{
    CITATION_FORMAT_DIRECTIVE, CitationBlock, EvidenceRecord, FailedSource, HarvestConfig,
    HarvestOutput, Harvester, Origin, SourceRecord, SourceReference, SourceStatus,
};
pub use pool::TaskPool;
