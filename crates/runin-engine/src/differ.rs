//! Tree differ: derives the template (placeholder-bearing sub-tree) of a document.
//!
//! A scalar survives iff it is the sentinel. Lists, parallel groups and
//! sub-trees survive iff at least one child survives, keeping only the
//! surviving children in their original order. A sub-tree that survives also
//! keeps its concrete identity fields (`identifier`, `name`) and retained
//! fields (`type`) so list elements stay alignable; these never make a branch
//! survive on their own.
//!
//! A list whose membership is itself a runtime input is written as a sentinel
//! at the list position (`stages: <+input>`) and survives whole.

use runin_document::{Fields, IdentityFields, Node};

use crate::config::EngineConfig;

/// Compute the template of `full` with the default configuration.
pub fn diff(full: &Node) -> Node {
    Differ::default().diff(full)
}

#[derive(Debug, Clone)]
pub struct Differ {
    identity: IdentityFields,
    retained: Vec<String>,
}

impl Default for Differ {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl Differ {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            identity: config.identity(),
            retained: config.retained_fields.clone(),
        }
    }

    /// The template of `full`; the empty document when it has no placeholders.
    pub fn diff(&self, full: &Node) -> Node {
        self.prune(full).unwrap_or_else(Node::empty)
    }

    fn prune(&self, node: &Node) -> Option<Node> {
        match node {
            Node::Scalar(s) => s.is_input().then(|| node.clone()),
            Node::List(items) => self.prune_items(items).map(Node::List),
            Node::ParallelGroup(items) => self.prune_items(items).map(Node::ParallelGroup),
            Node::Subtree(fields) => self.prune_fields(fields).map(Node::Subtree),
        }
    }

    fn prune_items(&self, items: &[Node]) -> Option<Vec<Node>> {
        let kept: Vec<Node> = items.iter().filter_map(|item| self.prune(item)).collect();
        (!kept.is_empty()).then_some(kept)
    }

    fn prune_fields(&self, fields: &Fields) -> Option<Fields> {
        let mut kept = Fields::new();
        let mut qualifies = false;
        for (key, value) in fields.iter() {
            if let Some(pruned) = self.prune(value) {
                kept.insert(key, pruned);
                qualifies = true;
            } else if self.is_structural(key, value) {
                kept.insert(key, value.clone());
            }
        }
        qualifies.then_some(kept)
    }

    fn is_structural(&self, key: &str, value: &Node) -> bool {
        let named = self.identity.names().any(|n| n == key) || self.retained.iter().any(|r| r == key);
        named && matches!(value, Node::Scalar(s) if !s.is_input())
    }
}
