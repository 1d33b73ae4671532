//! Text -> stored facts.
//!
//! Resolution and extraction failures abort the call before anything is
//! written. Storage is attempted for every extracted triple independently:
//! a triple that fails to store is recorded in the report and the loop moves
//! on, so one bad fact never voids the batch.

use chrono::{DateTime, Utc};
use factline::schema::{self, Cardinality};
use factline::{FactId, FactStore};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::capabilities::{Capabilities, Triple};
use crate::{MemoryError, Result};

/// Outcome of one [`AgentMemory::ingest`] call.
///
/// [`AgentMemory::ingest`]: crate::AgentMemory::ingest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Triples written successfully.
    pub stored: usize,
    /// Previously active facts invalidated by ONE-cardinality supersession.
    pub expired: usize,
    /// One entry per triple that could not be stored.
    pub errors: Vec<String>,
    /// The first few characters of the resolved text.
    pub resolved_preview: String,
}

impl IngestReport {
    /// Some triples were stored and some were not.
    pub fn is_partial(&self) -> bool {
        !self.errors.is_empty()
    }
}

impl std::fmt::Display for IngestReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Ingested {} facts. (Resolved text: {}...)",
            self.stored, self.resolved_preview
        )
    }
}

/// Run resolution then extraction, short-circuiting on the first failure.
pub(crate) fn resolve_and_extract(
    capabilities: &Capabilities,
    text: &str,
) -> Result<(String, Vec<Triple>)> {
    capabilities
        .resolver
        .get()
        .and_then(|resolver| resolver.resolve(text))
        .map_err(MemoryError::Resolution)
        .and_then(|resolved| {
            capabilities
                .extractor
                .get()
                .and_then(|extractor| extractor.extract(&resolved, schema::vocabulary()))
                .map_err(MemoryError::Extraction)
                .map(|triples| (resolved, triples))
        })
}

/// Store one triple valid from `valid_at`, expiring the active fact first
/// when the relation is ONE.
///
/// Superseded facts are invalidated at `expire_at`. Ingestion passes the same
/// instant for both, so the old fact stops being valid exactly when its
/// replacement starts. An expiry failure is logged and the add still runs.
/// Returns the new id and the expired count.
pub(crate) fn store_triple<S: FactStore + ?Sized>(
    store: &S,
    triple: &Triple,
    valid_at: DateTime<Utc>,
    expire_at: DateTime<Utc>,
) -> factline::Result<(FactId, usize)> {
    let mut expired = 0;
    if schema::cardinality_of(&triple.relation) == Cardinality::One {
        debug!(%triple, "cardinality ONE; expiring active facts");
        match store.expire_facts(&triple.subject, &triple.relation, expire_at) {
            Ok(n) => expired = n,
            Err(e) => warn!(%triple, error = %e, "expiry failed; adding anyway"),
        }
    }
    let id = store.add_fact(&triple.subject, &triple.relation, &triple.object, valid_at)?;
    Ok((id, expired))
}

pub(crate) fn ingest<S: FactStore + ?Sized>(
    store: &S,
    capabilities: &Capabilities,
    text: &str,
    preview_chars: usize,
) -> Result<IngestReport> {
    let (resolved, triples) = resolve_and_extract(capabilities, text)?;
    debug!(resolved = %resolved, "resolved text");
    info!(candidates = triples.len(), "extracted candidate facts");

    let mut report = IngestReport {
        resolved_preview: preview(&resolved, preview_chars),
        ..IngestReport::default()
    };

    for triple in &triples {
        debug!(%triple, "storing");
        let now = Utc::now();
        match store_triple(store, triple, now, now) {
            Ok((_, expired)) => {
                report.stored += 1;
                report.expired += expired;
            }
            Err(e) => report.errors.push(format!("{triple}: {e}")),
        }
    }

    if report.is_partial() {
        warn!(failed = report.errors.len(), errors = ?report.errors, "some facts failed to store");
    }
    info!(stored = report.stored, expired = report.expired, "ingestion finished");
    Ok(report)
}

/// First `max_chars` characters of `text`.
fn preview(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_is_char_bounded() {
        assert_eq!(preview("Zürich is lovely", 3), "Zür");
        assert_eq!(preview("short", 50), "short");
        assert_eq!(preview("", 10), "");
    }

    #[test]
    fn report_display_matches_summary_format() {
        let report = IngestReport {
            stored: 2,
            expired: 0,
            errors: vec![],
            resolved_preview: "Alice works for Google.".to_string(),
        };
        assert_eq!(
            report.to_string(),
            "Ingested 2 facts. (Resolved text: Alice works for Google....)"
        );
        assert!(!report.is_partial());
    }

    #[test]
    fn report_serializes_for_tool_output() {
        let report = IngestReport {
            stored: 1,
            expired: 1,
            errors: vec!["Broken -[knows]-> Nobody: storage unavailable".to_string()],
            resolved_preview: "Broken knows Nobody".to_string(),
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["stored"], 1);
        assert_eq!(json["expired"], 1);
        assert_eq!(json["errors"].as_array().map(Vec::len), Some(1));
    }
}
