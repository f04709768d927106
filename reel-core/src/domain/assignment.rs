//! Model assignment domain types
//!
//! An assignment binds a pipeline step name to a priority-ordered list of
//! acceptable (node, model) candidates.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Node selector accepting any online node that offers the model
pub const ANY_NODE: &str = "*";

/// One acceptable (node, model) pair for a step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCandidate {
    /// Registry id or address of the node, or [`ANY_NODE`]
    pub node_id: String,

    /// Model identifier in that node's catalog
    pub model: String,

    /// Disabled candidates are never selected
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Lower values are tried first
    #[serde(default)]
    pub priority: u32,
}

fn default_enabled() -> bool {
    true
}

impl ModelCandidate {
    pub fn new(node_id: impl Into<String>, model: impl Into<String>, priority: u32) -> Self {
        Self {
            node_id: node_id.into(),
            model: model.into(),
            enabled: true,
            priority,
        }
    }

    /// A candidate served by whichever capable node is least loaded
    pub fn any_node(model: impl Into<String>, priority: u32) -> Self {
        Self::new(ANY_NODE, model, priority)
    }

    pub fn is_any_node(&self) -> bool {
        self.node_id == ANY_NODE
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Candidate list for a single step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelAssignment {
    pub step: String,
    pub candidates: Vec<ModelCandidate>,
}

impl ModelAssignment {
    pub fn new(step: impl Into<String>, candidates: Vec<ModelCandidate>) -> Self {
        Self {
            step: step.into(),
            candidates,
        }
    }

    /// Enabled candidates in selection order
    ///
    /// The sort is stable, so equal priorities keep their list position.
    pub fn ordered(&self) -> Vec<&ModelCandidate> {
        let mut enabled: Vec<&ModelCandidate> =
            self.candidates.iter().filter(|c| c.enabled).collect();
        enabled.sort_by_key(|c| c.priority);
        enabled
    }
}

/// All assignments, at most one per step name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentTable {
    assignments: BTreeMap<String, ModelAssignment>,
}

impl AssignmentTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the assignment for its step
    pub fn set(&mut self, assignment: ModelAssignment) -> Option<ModelAssignment> {
        self.assignments
            .insert(assignment.step.clone(), assignment)
    }

    pub fn get(&self, step: &str) -> Option<&ModelAssignment> {
        self.assignments.get(step)
    }

    pub fn remove(&mut self, step: &str) -> Option<ModelAssignment> {
        self.assignments.remove(step)
    }

    pub fn steps(&self) -> impl Iterator<Item = &str> {
        self.assignments.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }
}

impl FromIterator<ModelAssignment> for AssignmentTable {
    fn from_iter<I: IntoIterator<Item = ModelAssignment>>(iter: I) -> Self {
        let mut table = AssignmentTable::new();
        for assignment in iter {
            table.set(assignment);
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordered_filters_disabled_and_sorts() {
        let assignment = ModelAssignment::new(
            "story",
            vec![
                ModelCandidate::new("b", "llama3", 2),
                ModelCandidate::new("a", "llama3", 1).disabled(),
                ModelCandidate::new("c", "mistral", 0),
            ],
        );

        let ordered: Vec<&str> = assignment
            .ordered()
            .iter()
            .map(|c| c.node_id.as_str())
            .collect();
        assert_eq!(ordered, vec!["c", "b"]);
    }

    #[test]
    fn test_equal_priorities_keep_list_position() {
        let assignment = ModelAssignment::new(
            "shots",
            vec![
                ModelCandidate::new("first", "m", 1),
                ModelCandidate::new("second", "m", 1),
                ModelCandidate::new("third", "m", 1),
            ],
        );

        let ordered: Vec<&str> = assignment
            .ordered()
            .iter()
            .map(|c| c.node_id.as_str())
            .collect();
        assert_eq!(ordered, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_any_node_selector() {
        let candidate = ModelCandidate::any_node("llama3", 3);
        assert!(candidate.is_any_node());
        assert_eq!(candidate.node_id, "*");
        assert!(!ModelCandidate::new("10.0.0.5", "llama3", 1).is_any_node());
    }

    #[test]
    fn test_table_keeps_one_assignment_per_step() {
        let mut table = AssignmentTable::new();
        table.set(ModelAssignment::new("story", vec![ModelCandidate::new("a", "m", 1)]));
        let previous = table.set(ModelAssignment::new(
            "story",
            vec![ModelCandidate::new("b", "m", 1)],
        ));

        assert!(previous.is_some());
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("story").unwrap().candidates[0].node_id, "b");
    }
}
