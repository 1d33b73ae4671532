//! External capability seams and their once-initialised handles.
//!
//! Coreference resolution, relation extraction, embedding and clustering are
//! typically backed by models that are slow to load. Each is expressed as a
//! trait, and [`Capabilities`] owns one lazily-built handle per stage so the
//! model is loaded on first use and shared afterwards.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, OnceLock};

use factline::RelationDef;
use serde::{Deserialize, Serialize};

/// Label a [`Clusterer`] uses for items it could not confidently group.
pub const NOISE_LABEL: i64 = -1;

/// Clustering output: label -> member items. [`NOISE_LABEL`] holds the rest.
pub type Clusters = BTreeMap<i64, Vec<String>>;

/// A candidate `(subject, relation, object)` produced by extraction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Triple {
    pub subject: String,
    pub relation: String,
    pub object: String,
}

impl Triple {
    pub fn new(
        subject: impl Into<String>,
        relation: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            relation: relation.into(),
            object: object.into(),
        }
    }
}

impl std::fmt::Display for Triple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -[{}]-> {}", self.subject, self.relation, self.object)
    }
}

/// Rewrites text so pronouns and anaphora name their referents.
pub trait CorefResolver: Send + Sync {
    fn resolve(&self, text: &str) -> anyhow::Result<String>;
}

/// Extracts candidate triples from (already resolved) text.
///
/// `vocabulary` lists the relations the caller understands; relations outside
/// it should be reported under the fallback relation.
pub trait RelationExtractor: Send + Sync {
    fn extract(&self, text: &str, vocabulary: &[RelationDef]) -> anyhow::Result<Vec<Triple>>;
}

/// Maps texts to fixed-dimension vectors, one per input, in input order.
pub trait Embedder: Send + Sync {
    fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// Partitions items into labelled groups of at least `min_group_size`.
pub trait Clusterer: Send + Sync {
    fn cluster(&self, items: &[String], min_group_size: usize) -> anyhow::Result<Clusters>;
}

/// A capability handle built on first use and shared afterwards.
///
/// Concurrent first callers serialise on an init lock and re-check the cell,
/// so the factory runs at most once per successful initialisation. A failed
/// factory call is not cached; the next caller retries.
pub struct Lazy<T: ?Sized> {
    cell: OnceLock<Arc<T>>,
    init_lock: Mutex<()>,
    factory: Box<dyn Fn() -> anyhow::Result<Arc<T>> + Send + Sync>,
}

impl<T: ?Sized> Lazy<T> {
    /// Defer construction to `factory`.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> anyhow::Result<Arc<T>> + Send + Sync + 'static,
    {
        Self {
            cell: OnceLock::new(),
            init_lock: Mutex::new(()),
            factory: Box::new(factory),
        }
    }

    /// Wrap an already-built handle.
    pub fn ready(value: Arc<T>) -> Self
    where
        T: Send + Sync + 'static,
    {
        let cell = OnceLock::new();
        let _ = cell.set(Arc::clone(&value));
        Self {
            cell,
            init_lock: Mutex::new(()),
            factory: Box::new(move || Ok(Arc::clone(&value))),
        }
    }

    /// Return the handle, building it if this is the first call.
    pub fn get(&self) -> anyhow::Result<Arc<T>> {
        // Fast path: already initialised, no locking.
        if let Some(value) = self.cell.get() {
            return Ok(Arc::clone(value));
        }

        // Slow path: another caller may have finished while we waited.
        let _guard = self
            .init_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("capability init lock poisoned"))?;
        if let Some(value) = self.cell.get() {
            return Ok(Arc::clone(value));
        }

        let value = (self.factory)()?;
        let _ = self.cell.set(Arc::clone(&value));
        Ok(value)
    }

    /// True once a handle has been built.
    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }
}

impl<T: ?Sized> std::fmt::Debug for Lazy<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lazy")
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

/// The external stages an [`AgentMemory`] drives.
///
/// [`AgentMemory`]: crate::AgentMemory
#[derive(Debug)]
pub struct Capabilities {
    pub resolver: Lazy<dyn CorefResolver>,
    pub extractor: Lazy<dyn RelationExtractor>,
    pub clusterer: Lazy<dyn Clusterer>,
}

impl Capabilities {
    pub fn new(
        resolver: Lazy<dyn CorefResolver>,
        extractor: Lazy<dyn RelationExtractor>,
        clusterer: Lazy<dyn Clusterer>,
    ) -> Self {
        Self {
            resolver,
            extractor,
            clusterer,
        }
    }

    /// Wrap ready-made implementations.
    pub fn from_parts(
        resolver: Arc<dyn CorefResolver>,
        extractor: Arc<dyn RelationExtractor>,
        clusterer: Arc<dyn Clusterer>,
    ) -> Self {
        Self::new(
            Lazy::ready(resolver),
            Lazy::ready(extractor),
            Lazy::ready(clusterer),
        )
    }
}
