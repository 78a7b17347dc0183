//! BookForge pipeline core: topic filesystem, source queue, ingestion,
//! autopilot loop, and the swarm drafting orchestrator.
//!
//! Collaborators (storage, fetch, model backends, discovery) are passed
//! in explicitly; this crate holds the orchestration logic and the
//! per-topic on-disk layout.

pub mod autopilot;
pub mod classify;
pub mod discovery;
pub mod ingest;
pub mod queue;
pub mod swarm;
pub mod topicfs;

pub use autopilot::{Autopilot, AutopilotOpts, AutopilotOutcome, AtomicStop, SentinelFile, StopSignal};
pub use classify::{append_to_silo, classify_chunk, extract_nuggets, parse_silo_response};
pub use discovery::{DiscoverySource, SourceCandidate, StaticDiscovery};
pub use ingest::IngestRunner;
pub use queue::queue_sources;
pub use swarm::{ReviewReport, Swarm, SwarmSummary, parse_review};
pub use topicfs::TopicFs;
