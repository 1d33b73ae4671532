//! Topic discovery over known entity names.
//!
//! Entities are clustered by the injected [`Clusterer`]; each non-noise group
//! becomes a topic and every member gets a weak `BELONGS_TO` edge to it.
//! Weak edges are MANY-cardinality and never expired, so repeated runs add
//! further edges rather than replacing earlier ones.
//!
//! [`Clusterer`]: crate::Clusterer

use chrono::Utc;
use factline::schema::WEAK_RELATION;
use factline::FactStore;
use serde::Serialize;
use tracing::{info, warn};

use crate::capabilities::{Capabilities, Clusters, NOISE_LABEL};
use crate::{MemoryError, Result};

/// How many distinct member names go into a topic label.
const LABEL_MEMBERS: usize = 3;

/// Outcome of one [`AgentMemory::consolidate`] call.
///
/// [`AgentMemory::consolidate`]: crate::AgentMemory::consolidate
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsolidationReport {
    /// Weak relations attempted, one per topic member.
    pub weak_relations: usize,
    /// Non-noise groups turned into topics.
    pub topics: usize,
}

impl std::fmt::Display for ConsolidationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Consolidated {} weak relations into {} topics.",
            self.weak_relations, self.topics
        )
    }
}

/// Name a topic after its members: `"Topic: a, b, c"`.
///
/// Uses the first three distinct names in sorted order.
pub fn topic_label(members: &[String]) -> String {
    let mut names: Vec<&str> = members.iter().map(String::as_str).collect();
    names.sort_unstable();
    names.dedup();
    names.truncate(LABEL_MEMBERS);
    format!("Topic: {}", names.join(", "))
}

pub(crate) fn consolidate<S: FactStore + ?Sized>(
    store: &S,
    capabilities: &Capabilities,
    min_group_size: usize,
) -> Result<ConsolidationReport> {
    let entities = store.get_all_entities()?;
    if entities.is_empty() {
        info!("no entities to consolidate");
        return Ok(ConsolidationReport::default());
    }

    let clusters = capabilities
        .clusterer
        .get()
        .and_then(|clusterer| clusterer.cluster(&entities, min_group_size))
        .map_err(MemoryError::Clustering)?;

    let report = link_topics(store, &clusters);
    info!(
        topics = report.topics,
        weak_relations = report.weak_relations,
        "consolidation finished"
    );
    Ok(report)
}

/// Write `member -BELONGS_TO-> topic` for every non-noise group.
///
/// Individual write failures are logged and otherwise ignored.
fn link_topics<S: FactStore + ?Sized>(store: &S, clusters: &Clusters) -> ConsolidationReport {
    let mut report = ConsolidationReport::default();

    for (label, members) in clusters {
        if *label == NOISE_LABEL || members.is_empty() {
            continue;
        }
        let topic = topic_label(members);
        info!(%topic, ?members, "topic discovered");
        report.topics += 1;

        let now = Utc::now();
        for member in members {
            if let Err(e) = store.add_fact(member, WEAK_RELATION, &topic, now) {
                warn!(%member, %topic, error = %e, "weak relation not stored");
            }
            report.weak_relations += 1;
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(xs: &[&str]) -> Vec<String> {
        xs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn label_uses_three_sorted_distinct_names() {
        assert_eq!(
            topic_label(&names(&["cherry", "apple", "banana", "apple", "date"])),
            "Topic: apple, banana, cherry"
        );
        assert_eq!(topic_label(&names(&["solo"])), "Topic: solo");
    }

    #[test]
    fn report_display() {
        let report = ConsolidationReport {
            weak_relations: 2,
            topics: 1,
        };
        assert_eq!(report.to_string(), "Consolidated 2 weak relations into 1 topics.");
    }
}
