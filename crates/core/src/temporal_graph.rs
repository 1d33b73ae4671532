//! Factline: embedded temporal fact store.
//!
//! The core primitive is a [`Fact`]: a subject-relation-object edge between
//! two entities, stamped with the instant it became true (`valid_at`) and,
//! once superseded, the instant it stopped being true (`invalidated_at`).
//!
//! Facts are never physically removed. Superseding a fact sets its
//! `invalidated_at`, so the store can always answer both "what is true now?"
//! and "what was true at time *t*?".
//!
//! Whether a new fact supersedes an old one is a policy decision made by the
//! caller from the [`schema`] registry: for [`Cardinality::One`] relations,
//! call [`TemporalGraph::expire_facts`] before [`TemporalGraph::add_fact`].
//! The two calls are separate transactions.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use factline::TemporalGraph;
//! use chrono::Utc;
//!
//! let db = TemporalGraph::open("memory.redb").unwrap();
//!
//! // Record a fact
//! db.add_fact("Alice", "works_for", "Acme", Utc::now()).unwrap();
//!
//! // Current state
//! let now = db.query_valid_facts("Alice", None).unwrap();
//!
//! // Point-in-time query
//! let past = "2024-03-01T00:00:00Z".parse().unwrap();
//! let then = db.query_valid_facts("Alice", Some(past)).unwrap();
//! ```
//!
//! [`Cardinality::One`]: schema::Cardinality::One

pub mod schema;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use tracing::debug;
use ulid::Ulid;

pub use schema::{canonical_relation, cardinality_of, Cardinality, RelationDef};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum FactlineError {
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("not found: {0}")]
    NotFound(String),
}

impl From<redb::DatabaseError> for FactlineError {
    fn from(e: redb::DatabaseError) -> Self {
        FactlineError::StorageUnavailable(e.to_string())
    }
}
impl From<redb::TransactionError> for FactlineError {
    fn from(e: redb::TransactionError) -> Self {
        FactlineError::StorageUnavailable(e.to_string())
    }
}
impl From<redb::TableError> for FactlineError {
    fn from(e: redb::TableError) -> Self {
        FactlineError::StorageUnavailable(e.to_string())
    }
}
impl From<redb::StorageError> for FactlineError {
    fn from(e: redb::StorageError) -> Self {
        FactlineError::StorageUnavailable(e.to_string())
    }
}
impl From<redb::CommitError> for FactlineError {
    fn from(e: redb::CommitError) -> Self {
        FactlineError::StorageUnavailable(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FactlineError>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// A stable, time-sortable identifier for a [`Fact`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FactId(pub String);

impl FactId {
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }
}

impl Default for FactId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for FactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A named node. Created on first reference, never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    /// Transaction time of the write that first referenced this entity.
    pub first_seen: DateTime<Utc>,
}

/// An edge between two entities with temporal validity.
///
/// `valid_at` is when the fact became true; `invalidated_at` is when it
/// ceased to be true (`None` while it is still active). A fact is active at
/// instant `t` when `valid_at <= t` and `invalidated_at` is unset or `> t`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    /// Stable time-sortable ID.
    pub id: FactId,
    pub subject: String,
    /// Canonical relation name (see [`canonical_relation`]).
    pub relation: String,
    pub object: String,
    pub valid_at: DateTime<Utc>,
    pub invalidated_at: Option<DateTime<Utc>>,
    /// When this edge was written to the database.
    pub recorded_at: DateTime<Utc>,
}

impl Fact {
    /// Create a new active fact with transaction time set to now.
    pub fn new(
        subject: impl Into<String>,
        relation: &str,
        object: impl Into<String>,
        valid_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: FactId::new(),
            subject: subject.into(),
            relation: canonical_relation(relation),
            object: object.into(),
            valid_at,
            invalidated_at: None,
            recorded_at: Utc::now(),
        }
    }

    /// Not yet superseded.
    pub fn is_active(&self) -> bool {
        self.invalidated_at.is_none()
    }

    /// Was this fact true at `at`?
    pub fn was_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.valid_at <= at && self.invalidated_at.is_none_or(|t| t > at)
    }
}

/// The `(relation, object)` projection returned by [`TemporalGraph::query_valid_facts`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidFact {
    pub relation: String,
    pub object: String,
}

impl From<Fact> for ValidFact {
    fn from(fact: Fact) -> Self {
        Self {
            relation: fact.relation,
            object: fact.object,
        }
    }
}

impl std::fmt::Display for ValidFact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.relation, self.object)
    }
}

/// The graph-storage seam the orchestrators are written against.
///
/// [`TemporalGraph`] is the production implementation. The contract matches
/// the inherent methods of the same name.
pub trait FactStore: Send + Sync {
    fn add_fact(
        &self,
        subject: &str,
        relation: &str,
        object: &str,
        valid_at: DateTime<Utc>,
    ) -> Result<FactId>;

    fn expire_facts(
        &self,
        subject: &str,
        relation: &str,
        invalidated_at: DateTime<Utc>,
    ) -> Result<usize>;

    fn query_valid_facts(
        &self,
        subject: &str,
        at: Option<DateTime<Utc>>,
    ) -> Result<Vec<ValidFact>>;

    fn get_all_entities(&self) -> Result<Vec<String>>;
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Composite string key: `"{subject}\x1f{RELATION}\x1f{fact_id}"`.
///
/// Names may themselves contain the unit separator, so a prefix scan only
/// narrows the range: every scan re-checks the stored subject (and relation)
/// before accepting a row. ULID fact ids keep facts for one
/// (subject, relation) in insertion order.
const FACTS: TableDefinition<&str, &str> = TableDefinition::new("facts");

/// Entity name -> serialized [`Entity`]. Key uniqueness is the merge-on-name rule.
const ENTITIES: TableDefinition<&str, &str> = TableDefinition::new("entities");

const KEY_SEP: char = '\u{1f}';

fn subject_prefix(subject: &str) -> String {
    format!("{subject}{KEY_SEP}")
}

fn relation_prefix(subject: &str, canonical: &str) -> String {
    format!("{subject}{KEY_SEP}{canonical}{KEY_SEP}")
}

/// Factline temporal fact store.
///
/// An embedded, serverless database backed by `redb`. Every public
/// operation runs in a single ACID transaction; redb serialises writers, so
/// each call is atomic on its own. Sequences of calls are not.
///
/// # Example
///
/// ```rust,no_run
/// use factline::TemporalGraph;
/// use chrono::Utc;
///
/// let db = TemporalGraph::open("memory.redb").unwrap();
/// db.add_fact("Alice", "located_in", "London", Utc::now()).unwrap();
/// let current = db.query_valid_facts("Alice", None).unwrap();
/// assert_eq!(current.len(), 1);
/// ```
pub struct TemporalGraph {
    db: Database,
}

impl TemporalGraph {
    /// Open or create a database at the given path.
    pub fn open(path: &str) -> Result<Self> {
        let db = Database::create(path)?;
        Self::init(db)
    }

    /// Create an in-memory database (no file I/O).
    ///
    /// Data is lost when the instance is dropped.
    pub fn open_in_memory() -> Result<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder().create_with_backend(backend)?;
        Self::init(db)
    }

    fn init(db: Database) -> Result<Self> {
        {
            let write_txn = db.begin_write()?;
            write_txn.open_table(FACTS)?;
            write_txn.open_table(ENTITIES)?;
            write_txn.commit()?;
        }
        Ok(Self { db })
    }

    /// Merge-or-create `name` inside an already-open write transaction.
    fn merge_entity_in_txn(
        write_txn: &redb::WriteTransaction,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut table = write_txn.open_table(ENTITIES)?;
        if table.get(name)?.is_some() {
            return Ok(());
        }
        let entity = Entity {
            name: name.to_string(),
            first_seen: now,
        };
        let value = serde_json::to_string(&entity)?;
        table.insert(name, value.as_str())?;
        Ok(())
    }

    /// Record a new active fact and return its [`FactId`].
    ///
    /// Subject and object entities are merged in the same transaction. The
    /// relation is stored in canonical form. No existing fact is touched:
    /// for a [`Cardinality::One`] relation call [`expire_facts`] first.
    ///
    /// [`expire_facts`]: TemporalGraph::expire_facts
    pub fn add_fact(
        &self,
        subject: &str,
        relation: &str,
        object: &str,
        valid_at: DateTime<Utc>,
    ) -> Result<FactId> {
        let fact = Fact::new(subject, relation, object, valid_at);
        let key = format!(
            "{}{}",
            relation_prefix(&fact.subject, &fact.relation),
            fact.id
        );
        let value = serde_json::to_string(&fact)?;

        let write_txn = self.db.begin_write()?;
        Self::merge_entity_in_txn(&write_txn, subject, fact.recorded_at)?;
        Self::merge_entity_in_txn(&write_txn, object, fact.recorded_at)?;
        {
            let mut table = write_txn.open_table(FACTS)?;
            table.insert(key.as_str(), value.as_str())?;
        }
        write_txn.commit()?;

        debug!(fact_id = %fact.id, subject, relation = %fact.relation, object, "fact added");
        Ok(fact.id)
    }

    /// Invalidate every active fact for `(subject, relation)` at `invalidated_at`.
    ///
    /// Returns how many facts were invalidated (0 when none were active).
    /// A fact whose `valid_at` is later than `invalidated_at` is closed at its
    /// own `valid_at` instead.
    /// Invalidated facts stay in the table and keep answering point-in-time
    /// queries for instants before `invalidated_at`.
    pub fn expire_facts(
        &self,
        subject: &str,
        relation: &str,
        invalidated_at: DateTime<Utc>,
    ) -> Result<usize> {
        let canonical = canonical_relation(relation);
        let prefix = relation_prefix(subject, &canonical);

        let write_txn = self.db.begin_write()?;
        let expired = {
            let mut table = write_txn.open_table(FACTS)?;
            let mut updates: Vec<(String, String)> = Vec::new();
            for entry in table.range(prefix.as_str()..)? {
                let (k, v) = entry?;
                if !k.value().starts_with(&prefix) {
                    break;
                }
                let mut fact: Fact = serde_json::from_str(v.value())?;
                if fact.subject == subject && fact.relation == canonical && fact.is_active() {
                    // Never close a window before it opened.
                    fact.invalidated_at = Some(invalidated_at.max(fact.valid_at));
                    updates.push((k.value().to_string(), serde_json::to_string(&fact)?));
                }
            }
            for (key, value) in &updates {
                table.insert(key.as_str(), value.as_str())?;
            }
            updates.len()
        };
        write_txn.commit()?;

        debug!(subject, relation = %canonical, expired, "facts expired");
        Ok(expired)
    }

    /// Facts from `subject` that are active now (`at = None`) or were active at `at`.
    ///
    /// A subject with no facts yields an empty list. Result order is not part
    /// of the contract.
    pub fn query_valid_facts(
        &self,
        subject: &str,
        at: Option<DateTime<Utc>>,
    ) -> Result<Vec<ValidFact>> {
        let facts = match at {
            None => self.scan_subject(subject, Fact::is_active)?,
            Some(t) => self.scan_subject(subject, |f| f.was_valid_at(t))?,
        };
        Ok(facts.into_iter().map(ValidFact::from).collect())
    }

    /// Every known entity name, each exactly once.
    pub fn get_all_entities(&self) -> Result<Vec<String>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ENTITIES)?;
        let mut names = Vec::new();
        for entry in table.iter()? {
            let (k, _v) = entry?;
            names.push(k.value().to_string());
        }
        Ok(names)
    }

    /// Look up one entity record.
    pub fn entity(&self, name: &str) -> Result<Option<Entity>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ENTITIES)?;
        let raw: Option<String> = table.get(name)?.map(|guard| guard.value().to_string());
        raw.map(|s| serde_json::from_str(&s).map_err(FactlineError::from))
            .transpose()
    }

    /// Every fact ever recorded from `subject`, invalidated ones included.
    pub fn history(&self, subject: &str) -> Result<Vec<Fact>> {
        self.scan_subject(subject, |_| true)
    }

    /// Retrieve a fact by its id.
    ///
    /// Linear scan; ids are not indexed.
    pub fn fact_by_id(&self, fact_id: &FactId) -> Result<Fact> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(FACTS)?;
        for entry in table.iter()? {
            let (k, v) = entry?;
            if k.value().ends_with(fact_id.0.as_str()) {
                let fact: Fact = serde_json::from_str(v.value())?;
                if fact.id == *fact_id {
                    return Ok(fact);
                }
            }
        }
        Err(FactlineError::NotFound(format!("fact id {fact_id}")))
    }

    // Internal: range-scan the facts of `subject`, keep those matching `keep`.
    fn scan_subject(&self, subject: &str, keep: impl Fn(&Fact) -> bool) -> Result<Vec<Fact>> {
        let prefix = subject_prefix(subject);
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(FACTS)?;
        let mut results = Vec::new();

        for entry in table.range(prefix.as_str()..)? {
            let (k, v) = entry?;
            if !k.value().starts_with(&prefix) {
                break;
            }
            let fact: Fact = serde_json::from_str(v.value())?;
            if fact.subject == subject && keep(&fact) {
                results.push(fact);
            }
        }

        Ok(results)
    }
}

impl FactStore for TemporalGraph {
    fn add_fact(
        &self,
        subject: &str,
        relation: &str,
        object: &str,
        valid_at: DateTime<Utc>,
    ) -> Result<FactId> {
        TemporalGraph::add_fact(self, subject, relation, object, valid_at)
    }

    fn expire_facts(
        &self,
        subject: &str,
        relation: &str,
        invalidated_at: DateTime<Utc>,
    ) -> Result<usize> {
        TemporalGraph::expire_facts(self, subject, relation, invalidated_at)
    }

    fn query_valid_facts(
        &self,
        subject: &str,
        at: Option<DateTime<Utc>>,
    ) -> Result<Vec<ValidFact>> {
        TemporalGraph::query_valid_facts(self, subject, at)
    }

    fn get_all_entities(&self) -> Result<Vec<String>> {
        TemporalGraph::get_all_entities(self)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    fn open_temp_db() -> (TemporalGraph, NamedTempFile) {
        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let db = TemporalGraph::open(&path).unwrap();
        (db, file)
    }

    fn dt(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn pair(relation: &str, object: &str) -> ValidFact {
        ValidFact {
            relation: relation.to_string(),
            object: object.to_string(),
        }
    }

    #[test]
    fn add_and_query_current_fact() {
        let (db, _tmp) = open_temp_db();
        db.add_fact("Alice", "works_for", "Google", Utc::now()).unwrap();

        let facts = db.query_valid_facts("Alice", None).unwrap();
        assert_eq!(facts, vec![pair("WORKS_FOR", "Google")]);
    }

    #[test]
    fn unknown_subject_yields_empty_list() {
        let (db, _tmp) = open_temp_db();
        assert!(db.query_valid_facts("Nobody", None).unwrap().is_empty());
        assert!(db
            .query_valid_facts("Nobody", Some(Utc::now()))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn entities_are_merged_on_name() {
        let (db, _tmp) = open_temp_db();
        let now = Utc::now();
        db.add_fact("Alice", "works_for", "Google", now).unwrap();
        db.add_fact("Alice", "knows", "Bob", now).unwrap();
        db.add_fact("Bob", "works_for", "Google", now).unwrap();
        db.add_fact("Bob", "knows", "Alice", now).unwrap();

        let names = db.get_all_entities().unwrap();
        assert_eq!(names.len(), 3, "one record per distinct name: {names:?}");
        let unique: HashSet<&String> = names.iter().collect();
        assert_eq!(unique.len(), names.len());
        for name in ["Alice", "Bob", "Google"] {
            assert!(names.iter().any(|n| n == name), "missing {name}");
        }
    }

    #[test]
    fn first_seen_is_not_overwritten_by_later_merges() {
        let (db, _tmp) = open_temp_db();
        db.add_fact("Alice", "knows", "Bob", Utc::now()).unwrap();
        let first = db.entity("Alice").unwrap().expect("entity exists");
        std::thread::sleep(std::time::Duration::from_millis(5));
        db.add_fact("Alice", "knows", "Carol", Utc::now()).unwrap();
        let again = db.entity("Alice").unwrap().expect("entity exists");
        assert_eq!(first, again);
        assert!(db.entity("Mallory").unwrap().is_none());
    }

    #[test]
    fn relation_names_are_canonicalized() {
        let (db, _tmp) = open_temp_db();
        let t0 = dt("2024-01-01T00:00:00Z");
        db.add_fact("Alice", "located in", "London", t0).unwrap();

        let expired = db
            .expire_facts("Alice", "LOCATED_IN", dt("2024-02-01T00:00:00Z"))
            .unwrap();
        assert_eq!(expired, 1);
        assert!(db.query_valid_facts("Alice", None).unwrap().is_empty());
    }

    #[test]
    fn expire_counts_only_active_facts() {
        let (db, _tmp) = open_temp_db();
        let t0 = dt("2024-01-01T00:00:00Z");
        db.add_fact("Alice", "located_in", "London", t0).unwrap();
        db.add_fact("Alice", "works_for", "Google", t0).unwrap();

        let first = db
            .expire_facts("Alice", "located_in", dt("2024-02-01T00:00:00Z"))
            .unwrap();
        assert_eq!(first, 1);

        let second = db
            .expire_facts("Alice", "located_in", dt("2024-03-01T00:00:00Z"))
            .unwrap();
        assert_eq!(second, 0, "already-invalidated facts are not re-expired");

        // Other relations untouched.
        assert_eq!(
            db.query_valid_facts("Alice", None).unwrap(),
            vec![pair("WORKS_FOR", "Google")]
        );
    }

    #[test]
    fn expire_with_nothing_active_returns_zero() {
        let (db, _tmp) = open_temp_db();
        assert_eq!(db.expire_facts("Ghost", "located_in", Utc::now()).unwrap(), 0);
    }

    #[test]
    fn expiry_is_a_soft_delete() {
        let (db, _tmp) = open_temp_db();
        let t0 = dt("2024-01-01T00:00:00Z");
        let t1 = dt("2024-06-01T00:00:00Z");
        let id = db.add_fact("Alice", "located_in", "London", t0).unwrap();
        db.expire_facts("Alice", "located_in", t1).unwrap();

        let history = db.history("Alice").unwrap();
        assert_eq!(history.len(), 1, "invalidated facts are retained");
        assert_eq!(history[0].invalidated_at, Some(t1));

        let by_id = db.fact_by_id(&id).unwrap();
        assert_eq!(by_id.object, "London");
        assert!(!by_id.is_active());
    }

    #[test]
    fn fact_by_id_reports_missing_ids() {
        let (db, _tmp) = open_temp_db();
        let err = db.fact_by_id(&FactId::new()).unwrap_err();
        assert!(matches!(err, FactlineError::NotFound(_)));
    }

    #[test]
    fn point_in_time_boundaries() {
        let (db, _tmp) = open_temp_db();
        let valid_at = dt("2024-01-01T00:00:00Z");
        let invalidated_at = dt("2024-06-01T00:00:00Z");
        db.add_fact("Alice", "located_in", "London", valid_at).unwrap();
        db.expire_facts("Alice", "located_in", invalidated_at).unwrap();

        let at = |s: &str| db.query_valid_facts("Alice", Some(dt(s))).unwrap();

        assert!(at("2023-12-31T23:59:59Z").is_empty(), "before valid_at");
        assert_eq!(at("2024-01-01T00:00:00Z").len(), 1, "at valid_at");
        assert_eq!(at("2024-03-01T00:00:00Z").len(), 1, "inside window");
        assert!(at("2024-06-01T00:00:00Z").is_empty(), "at invalidated_at");
        assert!(at("2024-09-01T00:00:00Z").is_empty(), "after invalidated_at");
    }

    #[test]
    fn supersession_keeps_one_active_and_history_queryable() {
        let (db, _tmp) = open_temp_db();
        let jan = dt("2024-01-01T00:00:00Z");
        let jun = dt("2024-06-01T00:00:00Z");

        db.add_fact("Alice", "located_in", "London", jan).unwrap();
        db.expire_facts("Alice", "located_in", jun).unwrap();
        db.add_fact("Alice", "located_in", "Paris", jun).unwrap();

        assert_eq!(
            db.query_valid_facts("Alice", None).unwrap(),
            vec![pair("LOCATED_IN", "Paris")]
        );
        assert_eq!(
            db.query_valid_facts("Alice", Some(dt("2024-03-01T00:00:00Z")))
                .unwrap(),
            vec![pair("LOCATED_IN", "London")]
        );
        // The handover instant belongs to the new fact only.
        assert_eq!(
            db.query_valid_facts("Alice", Some(jun)).unwrap(),
            vec![pair("LOCATED_IN", "Paris")]
        );
    }

    #[test]
    fn many_relations_accumulate_and_duplicates_are_kept() {
        let (db, _tmp) = open_temp_db();
        let now = Utc::now();
        db.add_fact("Alice", "knows", "Bob", now).unwrap();
        db.add_fact("Alice", "knows", "Carol", now).unwrap();
        db.add_fact("Alice", "knows", "Bob", now).unwrap();

        let facts = db.query_valid_facts("Alice", None).unwrap();
        assert_eq!(facts.len(), 3);
        assert_eq!(
            facts.iter().filter(|f| f.object == "Bob").count(),
            2,
            "exact duplicates are not deduplicated"
        );
    }

    #[test]
    fn subject_prefix_does_not_bleed_into_longer_names() {
        let (db, _tmp) = open_temp_db();
        let now = Utc::now();
        db.add_fact("Al", "knows", "Bob", now).unwrap();
        db.add_fact("Alice", "knows", "Carol", now).unwrap();

        assert_eq!(
            db.query_valid_facts("Al", None).unwrap(),
            vec![pair("KNOWS", "Bob")]
        );
    }

    #[test]
    fn separator_inside_a_name_does_not_leak_between_subjects() {
        let (db, _tmp) = open_temp_db();
        let now = Utc::now();
        db.add_fact("Al", "knows", "Dan", now).unwrap();
        db.add_fact("Al\u{1f}X", "knows", "Bob", now).unwrap();
        db.add_fact("Al\u{1f}KNOWS", "x", "Eve", now).unwrap();

        assert_eq!(
            db.query_valid_facts("Al", None).unwrap(),
            vec![pair("KNOWS", "Dan")]
        );
        assert_eq!(db.history("Al").unwrap().len(), 1);
        assert_eq!(
            db.query_valid_facts("Al\u{1f}X", None).unwrap(),
            vec![pair("KNOWS", "Bob")]
        );

        // Only ("Al", KNOWS) is expired; the look-alike key is left alone.
        assert_eq!(db.expire_facts("Al", "knows", now).unwrap(), 1);
        assert_eq!(
            db.query_valid_facts("Al\u{1f}KNOWS", None).unwrap(),
            vec![pair("X", "Eve")]
        );
    }

    #[test]
    fn expiry_never_precedes_valid_at() {
        let (db, _tmp) = open_temp_db();
        let starts = dt("2030-01-01T00:00:00Z");
        db.add_fact("Alice", "located_in", "Mars", starts).unwrap();
        let earlier = dt("2024-01-01T00:00:00Z");
        assert_eq!(db.expire_facts("Alice", "located_in", earlier).unwrap(), 1);

        let history = db.history("Alice").unwrap();
        assert_eq!(history[0].invalidated_at, Some(starts));
    }

    #[test]
    fn data_survives_reopen() {
        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_str().unwrap().to_string();
        {
            let db = TemporalGraph::open(&path).unwrap();
            db.add_fact("Alice", "works_for", "Google", Utc::now()).unwrap();
        }
        let db = TemporalGraph::open(&path).unwrap();
        assert_eq!(db.query_valid_facts("Alice", None).unwrap().len(), 1);
        assert_eq!(db.get_all_entities().unwrap().len(), 2);
    }

    #[test]
    fn in_memory_database_works() {
        let db = TemporalGraph::open_in_memory().unwrap();
        db.add_fact("Alice", "knows", "Bob", Utc::now()).unwrap();
        assert_eq!(db.query_valid_facts("Alice", None).unwrap().len(), 1);
    }

    #[test]
    fn concurrent_writers_share_one_store() {
        let db = Arc::new(TemporalGraph::open_in_memory().unwrap());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let db = Arc::clone(&db);
                std::thread::spawn(move || {
                    for j in 0..10 {
                        db.add_fact("hub", "knows", &format!("node-{i}-{j}"), Utc::now())
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(db.query_valid_facts("hub", None).unwrap().len(), 40);
        assert_eq!(db.get_all_entities().unwrap().len(), 41);
    }

    #[test]
    fn fact_store_trait_delegates_to_graph() {
        fn record(store: &dyn FactStore) -> usize {
            let now = Utc::now();
            store.add_fact("Alice", "located_in", "London", now).unwrap();
            store.expire_facts("Alice", "located_in", now).unwrap()
        }
        let (db, _tmp) = open_temp_db();
        assert_eq!(record(&db), 1);
        assert!(FactStore::query_valid_facts(&db, "Alice", None)
            .unwrap()
            .is_empty());
        assert_eq!(FactStore::get_all_entities(&db).unwrap().len(), 2);
    }
}
