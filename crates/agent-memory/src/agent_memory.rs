//! High-level agent memory built on the Factline temporal fact store.
//!
//! [`AgentMemory`] is the composition root: it owns a [`FactStore`], the
//! external capabilities (coreference resolution, relation extraction,
//! clustering) and the runtime [`MemoryConfig`], and drives the two
//! pipelines:
//!
//! - **ingest**: text -> resolved text -> candidate triples -> cardinality-aware
//!   storage, isolating per-triple failures;
//! - **consolidate**: entity names -> clusters -> topics -> weak `BELONGS_TO`
//!   edges.
//!
//! # Usage
//!
//! ```rust,no_run
//! use factline_agent_memory::AgentMemory;
//!
//! let memory = AgentMemory::open("./memory.redb").unwrap();
//!
//! // Ingest free text
//! let report = memory.ingest("Alice works for Google. She lives in London.").unwrap();
//! println!("{report}");
//!
//! // Current state of an entity
//! for fact in memory.recall("Alice").unwrap() {
//!     println!("{fact}");
//! }
//!
//! // Group related entities into topics
//! let summary = memory.consolidate().unwrap();
//! ```

mod capabilities;
mod consolidation;
mod heuristics;
mod ingestion;
mod similarity;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use factline::{Fact, FactId, FactStore, FactlineError, TemporalGraph, ValidFact};
use tracing::warn;

pub use capabilities::{
    Capabilities, Clusterer, Clusters, CorefResolver, Embedder, Lazy, RelationExtractor, Triple,
    NOISE_LABEL,
};
pub use consolidation::{topic_label, ConsolidationReport};
pub use heuristics::{PatternExtractor, PronounResolver};
pub use ingestion::IngestReport;
pub use similarity::{HashingEmbedder, SimilarityClusterer, DEFAULT_DIM};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Why an ingestion or consolidation call failed as a whole.
///
/// Per-triple and per-member storage failures never surface here; they are
/// isolated inside the pipelines.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("coreference resolution failed: {0:#}")]
    Resolution(anyhow::Error),
    #[error("relation extraction failed: {0:#}")]
    Extraction(anyhow::Error),
    #[error("clustering failed: {0:#}")]
    Clustering(anyhow::Error),
    #[error(transparent)]
    Storage(#[from] FactlineError),
}

pub type Result<T> = std::result::Result<T, MemoryError>;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

pub const ENV_MIN_GROUP_SIZE: &str = "FACTLINE_MIN_GROUP_SIZE";
pub const ENV_PREVIEW_CHARS: &str = "FACTLINE_PREVIEW_CHARS";
pub const ENV_SIMILARITY_THRESHOLD: &str = "FACTLINE_SIMILARITY_THRESHOLD";

/// Runtime knobs for the pipelines.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryConfig {
    /// Smallest group the clusterer may report as a topic.
    pub min_group_size: usize,
    /// Characters of resolved text kept in [`IngestReport::resolved_preview`].
    pub preview_chars: usize,
    /// Cosine threshold for the built-in [`SimilarityClusterer`].
    pub similarity_threshold: f32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            min_group_size: 2,
            preview_chars: 50,
            similarity_threshold: 0.55,
        }
    }
}

impl MemoryConfig {
    /// Read overrides from `FACTLINE_*` environment variables.
    ///
    /// Unset variables keep their defaults; unparsable ones are logged and
    /// ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            min_group_size: parse_or(&lookup, ENV_MIN_GROUP_SIZE, defaults.min_group_size),
            preview_chars: parse_or(&lookup, ENV_PREVIEW_CHARS, defaults.preview_chars),
            similarity_threshold: parse_or(
                &lookup,
                ENV_SIMILARITY_THRESHOLD,
                defaults.similarity_threshold,
            ),
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Debug,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, ?default, "invalid config value; using default");
            default
        }),
    }
}

impl Capabilities {
    /// Rule-based resolver and extractor plus DBSCAN over trigram embeddings.
    ///
    /// Each handle is built on first use.
    pub fn builtin(config: &MemoryConfig) -> Self {
        let threshold = config.similarity_threshold;
        Self::new(
            Lazy::new(|| Ok(Arc::new(PronounResolver) as Arc<dyn CorefResolver>)),
            Lazy::new(|| Ok(Arc::new(PatternExtractor) as Arc<dyn RelationExtractor>)),
            Lazy::new(move || {
                let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::default());
                Ok(Arc::new(SimilarityClusterer::new(embedder, threshold)) as Arc<dyn Clusterer>)
            }),
        )
    }
}

// ---------------------------------------------------------------------------
// AgentMemory
// ---------------------------------------------------------------------------

/// Agent memory over a temporal fact store.
///
/// Every call is an independent unit of work; nothing is shared between
/// concurrent calls except the store itself. Supersession of ONE-cardinality
/// facts is expire-then-add in two store transactions, so two concurrent
/// ingestions for the same `(subject, relation)` can leave two active facts.
pub struct AgentMemory<S: FactStore = TemporalGraph> {
    store: S,
    capabilities: Capabilities,
    config: MemoryConfig,
}

impl AgentMemory<TemporalGraph> {
    /// Open or create a store at `path` with the built-in capabilities.
    ///
    /// ```rust,no_run
    /// use factline_agent_memory::AgentMemory;
    /// let memory = AgentMemory::open("./memory.redb").unwrap();
    /// ```
    pub fn open(path: &str) -> Result<Self> {
        Ok(Self::with_builtin(
            TemporalGraph::open(path)?,
            MemoryConfig::default(),
        ))
    }

    /// In-memory store with the built-in capabilities.
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::with_builtin(
            TemporalGraph::open_in_memory()?,
            MemoryConfig::default(),
        ))
    }

    /// Every fact ever recorded from `subject`, superseded ones included.
    pub fn history(&self, subject: &str) -> Result<Vec<Fact>> {
        Ok(self.store.history(subject)?)
    }
}

impl<S: FactStore> AgentMemory<S> {
    pub fn new(store: S, capabilities: Capabilities, config: MemoryConfig) -> Self {
        Self {
            store,
            capabilities,
            config,
        }
    }

    /// Wire `store` to [`Capabilities::builtin`].
    pub fn with_builtin(store: S, config: MemoryConfig) -> Self {
        let capabilities = Capabilities::builtin(&config);
        Self::new(store, capabilities, config)
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Resolve, extract and store the facts in `text`.
    ///
    /// Fails only when resolution or extraction fails. Triples that cannot be
    /// stored are listed in [`IngestReport::errors`] and the rest are still
    /// written.
    pub fn ingest(&self, text: &str) -> Result<IngestReport> {
        ingestion::ingest(
            &self.store,
            &self.capabilities,
            text,
            self.config.preview_chars,
        )
    }

    /// Store one fact as-is, without cardinality handling.
    pub fn add(&self, subject: &str, relation: &str, object: &str) -> Result<FactId> {
        self.add_at(subject, relation, object, Utc::now())
    }

    /// [`add`](Self::add) with an explicit `valid_at`.
    pub fn add_at(
        &self,
        subject: &str,
        relation: &str,
        object: &str,
        valid_at: DateTime<Utc>,
    ) -> Result<FactId> {
        Ok(self.store.add_fact(subject, relation, object, valid_at)?)
    }

    /// Store one fact, superseding the active one if the relation is ONE.
    pub fn assert_fact(&self, subject: &str, relation: &str, object: &str) -> Result<FactId> {
        self.assert_fact_at(subject, relation, object, Utc::now())
    }

    /// [`assert_fact`](Self::assert_fact) with an explicit `valid_at`.
    ///
    /// A superseded fact is invalidated at `valid_at` or now, whichever is
    /// later, so backdating a replacement never erases the old fact's past.
    pub fn assert_fact_at(
        &self,
        subject: &str,
        relation: &str,
        object: &str,
        valid_at: DateTime<Utc>,
    ) -> Result<FactId> {
        let triple = Triple::new(subject, relation, object);
        let expire_at = valid_at.max(Utc::now());
        let (id, _expired) = ingestion::store_triple(&self.store, &triple, valid_at, expire_at)?;
        Ok(id)
    }

    /// What is currently true about `subject`.
    pub fn recall(&self, subject: &str) -> Result<Vec<ValidFact>> {
        Ok(self.store.query_valid_facts(subject, None)?)
    }

    /// What was true about `subject` at `at`.
    pub fn recall_at(&self, subject: &str, at: DateTime<Utc>) -> Result<Vec<ValidFact>> {
        Ok(self.store.query_valid_facts(subject, Some(at))?)
    }

    /// Cluster known entities into topics and link members to them.
    pub fn consolidate(&self) -> Result<ConsolidationReport> {
        consolidation::consolidate(&self.store, &self.capabilities, self.config.min_group_size)
    }
}
