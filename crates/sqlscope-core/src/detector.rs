//! N+1 query detection
//!
//! Read statements of one capture are grouped by their normalized text and
//! the set of tables they touch. A group with more than one member that
//! touches exactly one table is a repetition candidate. The other
//! statements of the capture are then scanned, in execution order, for a
//! table declaring a relation that points at the repeated table:
//!
//! - a belongs-to edge suggests joining the relation eagerly
//! - a has-many edge suggests prefetching the relation in one batch
//!
//! Candidates are tried in order of first occurrence and the first one
//! with a matching relation is reported. At most one finding is produced
//! per capture.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use sqlscope_sql::normalize;
use tracing::debug;

use crate::model::{RequestCapture, StatementRecord};
use crate::relations::{RelationCatalog, RelationEdge};

/// Kind of relation that explains a repeated query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// One-to-one or many-to-one
    BelongsTo,
    /// One-to-many or many-to-many
    HasMany,
}

/// A detected N+1 access pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NPlusOneFinding {
    /// Table hit by the repeated query
    pub table: String,
    /// Normalized text of the repeated query
    pub normalized_sql: String,
    /// Number of times the query ran
    pub occurrences: usize,
    /// Table declaring the relation
    pub via_table: String,
    /// Relation field on `via_table`
    pub field: String,
    pub kind: RelationKind,
}

impl NPlusOneFinding {
    /// Human-readable fix
    pub fn suggestion(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for NPlusOneFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let action = match self.kind {
            RelationKind::BelongsTo => "use an eager join on",
            RelationKind::HasMany => "batch-prefetch",
        };
        write!(
            f,
            "N+1 pattern on '{}' ({} identical queries): {} relation '{}.{}'",
            self.table, self.occurrences, action, self.via_table, self.field
        )
    }
}

struct Group {
    normalized: String,
    tables: BTreeSet<String>,
    members: Vec<usize>,
}

/// Structurally identical read statements, in order of first occurrence
fn group_reads(statements: &[StatementRecord]) -> Vec<Group> {
    let mut groups: Vec<Group> = Vec::new();
    let mut index: HashMap<(String, BTreeSet<String>), usize> = HashMap::new();

    for (position, statement) in statements.iter().enumerate() {
        if !statement.is_read() {
            continue;
        }

        let key = (normalize(&statement.sql), statement.tables.clone());
        match index.get(&key) {
            Some(&group) => groups[group].members.push(position),
            None => {
                index.insert(key.clone(), groups.len());
                groups.push(Group {
                    normalized: key.0,
                    tables: key.1,
                    members: vec![position],
                });
            }
        }
    }

    groups
}

fn find_edge<'a>(edges: &'a [RelationEdge], target: &str) -> Option<&'a RelationEdge> {
    edges.iter().find(|edge| edge.target == target)
}

/// Run N+1 detection over a capture's statements.
pub fn detect(
    statements: &[StatementRecord],
    catalog: &dyn RelationCatalog,
) -> Option<NPlusOneFinding> {
    for group in group_reads(statements) {
        if group.members.len() < 2 || group.tables.len() != 1 {
            continue;
        }
        let Some(table) = group.tables.iter().next() else {
            continue;
        };

        let others = statements
            .iter()
            .enumerate()
            .filter(|(position, _)| !group.members.contains(position));

        for (_, other) in others {
            for candidate in &other.tables {
                let relations = catalog.relations(candidate);

                let matched = find_edge(&relations.belongs_to, table)
                    .map(|edge| (edge, RelationKind::BelongsTo))
                    .or_else(|| {
                        find_edge(&relations.has_many, table).map(|edge| (edge, RelationKind::HasMany))
                    });

                if let Some((edge, kind)) = matched {
                    return Some(NPlusOneFinding {
                        table: table.clone(),
                        normalized_sql: group.normalized.clone(),
                        occurrences: group.members.len(),
                        via_table: candidate.clone(),
                        field: edge.field.clone(),
                        kind,
                    });
                }
            }
        }

        debug!(
            "Repeated query on '{}' has no related statement: {}",
            table, group.normalized
        );
    }

    None
}

/// Run detection and store the outcome on the capture.
pub fn annotate(
    capture: &mut RequestCapture,
    catalog: &dyn RelationCatalog,
) -> Option<NPlusOneFinding> {
    let finding = detect(&capture.statements, catalog);
    capture.is_n_plus_one = finding.is_some();
    capture.n_plus_one_suggestion = finding.as_ref().map(NPlusOneFinding::suggestion);
    finding
}
