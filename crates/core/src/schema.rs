//! Static relation vocabulary and cardinality policy.
//!
//! The registry answers two questions for its callers:
//!
//! - which relations an extractor may emit (the *vocabulary*), and
//! - whether a new fact for `(subject, relation)` supersedes the currently
//!   active one ([`Cardinality::One`]) or accumulates beside it
//!   ([`Cardinality::Many`]).
//!
//! The store itself never consults the registry. Orchestrators look up the
//! cardinality and call [`TemporalGraph::expire_facts`] before
//! [`TemporalGraph::add_fact`] when the answer is `One`.
//!
//! [`TemporalGraph::expire_facts`]: crate::TemporalGraph::expire_facts
//! [`TemporalGraph::add_fact`]: crate::TemporalGraph::add_fact

use serde::{Deserialize, Serialize};

/// How many simultaneously active facts a subject may hold for a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Cardinality {
    /// A new fact invalidates the active one.
    One,
    /// Facts accumulate.
    #[default]
    Many,
}

impl std::fmt::Display for Cardinality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cardinality::One => write!(f, "ONE"),
            Cardinality::Many => write!(f, "MANY"),
        }
    }
}

/// One entry of the controlled relation vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RelationDef {
    pub name: &'static str,
    pub cardinality: Cardinality,
    pub description: &'static str,
    /// Minimum extractor confidence for this relation.
    pub threshold: f32,
}

/// An entity category offered to extractors as a labelling hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EntityType {
    pub name: &'static str,
    pub description: &'static str,
}

/// Catch-all relation for relationships the vocabulary does not model.
pub const FALLBACK_RELATION: &str = "related_to";

/// Relation linking an entity to a topic discovered by consolidation.
pub const WEAK_RELATION: &str = "BELONGS_TO";

/// Threshold applied to relations without an explicit one.
pub const DEFAULT_THRESHOLD: f32 = 0.5;

const RELATIONS: &[RelationDef] = &[
    RelationDef {
        name: "works_for",
        cardinality: Cardinality::Many,
        description: "Employment or professional affiliation",
        threshold: 0.6,
    },
    RelationDef {
        name: "located_in",
        cardinality: Cardinality::One,
        description: "Geographic containment",
        threshold: 0.6,
    },
    RelationDef {
        name: "knows",
        cardinality: Cardinality::Many,
        description: "Social or professional relationship between people",
        threshold: 0.5,
    },
    RelationDef {
        name: "founded",
        cardinality: Cardinality::Many,
        description: "Organization creation",
        threshold: DEFAULT_THRESHOLD,
    },
    RelationDef {
        name: "participated_in",
        cardinality: Cardinality::Many,
        description: "Involvement in an event",
        threshold: DEFAULT_THRESHOLD,
    },
    RelationDef {
        name: "happened_at",
        cardinality: Cardinality::One,
        description: "Temporal or spatial occurrence of an event",
        threshold: DEFAULT_THRESHOLD,
    },
    RelationDef {
        name: FALLBACK_RELATION,
        cardinality: Cardinality::Many,
        description: "General relationship when strictly defined ones don't fit",
        threshold: DEFAULT_THRESHOLD,
    },
];

const ENTITY_TYPES: &[EntityType] = &[
    EntityType {
        name: "person",
        description: "People, characters, or user names",
    },
    EntityType {
        name: "organization",
        description: "Companies, groups, and institutions",
    },
    EntityType {
        name: "location",
        description: "Cities, countries, places, and physical locations",
    },
    EntityType {
        name: "event",
        description: "Specific events, incidents, or occasions",
    },
    EntityType {
        name: "date",
        description: "Date references",
    },
    EntityType {
        name: "concept",
        description: "Abstract concepts or ideas",
    },
];

/// Normalise a relation name for storage and comparison.
///
/// Trims, upper-cases, and folds whitespace and `-` into `_`, so
/// `"works for"`, `"Works-For"` and `"WORKS_FOR"` all compare equal.
pub fn canonical_relation(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| {
            if c.is_whitespace() || c == '-' {
                '_'
            } else {
                c
            }
        })
        .collect::<String>()
        .to_uppercase()
}

/// The full relation vocabulary, in declaration order.
pub fn vocabulary() -> &'static [RelationDef] {
    RELATIONS
}

/// The entity categories offered to extractors.
pub fn entity_types() -> &'static [EntityType] {
    ENTITY_TYPES
}

/// Look up a relation definition by any spelling of its name.
pub fn relation(name: &str) -> Option<&'static RelationDef> {
    let wanted = canonical_relation(name);
    RELATIONS
        .iter()
        .find(|def| canonical_relation(def.name) == wanted)
}

/// Cardinality policy for `relation`. Unknown relations are [`Cardinality::Many`].
pub fn cardinality_of(relation_name: &str) -> Cardinality {
    relation(relation_name)
        .map(|def| def.cardinality)
        .unwrap_or_default()
}

/// Extraction-confidence threshold for `relation`.
pub fn threshold_of(relation_name: &str) -> f32 {
    relation(relation_name)
        .map(|def| def.threshold)
        .unwrap_or(DEFAULT_THRESHOLD)
}
