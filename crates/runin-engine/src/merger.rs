//! Tree merger: layers partial documents onto a template.
//!
//! Sources are applied in increasing precedence, later entries winning on
//! conflicting leaves. Rules, per position:
//!
//! - A sentinel in a source never overwrites anything.
//! - Where the template holds a sentinel (a leaf, or a whole list/sub-tree
//!   whose value is a runtime input) a source value replaces the current one
//!   wholesale, so a higher source's list drops the elements of a lower one.
//! - Sub-trees merge field-wise. Under the template, fields the template does
//!   not know are ignored; outside it (inside elements contributed by sources)
//!   they are added.
//! - List elements align by identity (parallel-group wrappers by any shared
//!   member identity); elements without identity align by position among the
//!   identity-less elements. Under the template, source
//!   elements with no counterpart are ignored; outside it they are appended.
//!   Elements a source does not mention are kept.
//!
//! Leaves still holding the sentinel after all sources are left untouched:
//! the merger never invents a value.

use runin_document::{find_aligned, Alignment, IdentityFields, Node};

use crate::config::EngineConfig;

/// Merge `sources` onto `base` with the default configuration.
pub fn merge(base: &Node, sources: &[Node]) -> Node {
    Merger::default().merge(base, sources)
}

#[derive(Debug, Clone)]
pub struct Merger {
    identity: IdentityFields,
}

impl Default for Merger {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl Merger {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            identity: config.identity(),
        }
    }

    /// Layer `sources` (lowest precedence first) onto the template `base`.
    pub fn merge(&self, base: &Node, sources: &[Node]) -> Node {
        sources.iter().fold(base.clone(), |acc, source| {
            self.merge_node(Some(base), acc, source)
        })
    }

    /// Deep-merge two partial documents with no template to constrain them:
    /// `higher` wins on conflicts, unknown fields and elements are unioned.
    pub fn overlay(&self, lower: &Node, higher: &Node) -> Node {
        self.merge_node(None, lower.clone(), higher)
    }

    fn merge_node(&self, base: Option<&Node>, acc: Node, src: &Node) -> Node {
        if src.is_placeholder() {
            return acc;
        }
        if base.is_some_and(Node::is_placeholder) {
            return src.clone();
        }
        match (acc, src) {
            (Node::Subtree(mut fields), Node::Subtree(src_fields)) => {
                for (key, value) in src_fields.iter() {
                    let child_base = base.and_then(|b| b.field(key));
                    match fields.get_mut(key) {
                        Some(slot) => {
                            let current = std::mem::take(slot);
                            *slot = self.merge_node(child_base, current, value);
                        }
                        None if base.is_none() => fields.insert(key, value.clone()),
                        None => {
                            tracing::trace!(field = %key, "Ignoring field outside the template");
                        }
                    }
                }
                Node::Subtree(fields)
            }
            (Node::List(items), Node::List(src_items) | Node::ParallelGroup(src_items)) => {
                Node::List(self.merge_items(base.and_then(Node::as_items), items, src_items))
            }
            (Node::ParallelGroup(items), Node::List(src_items) | Node::ParallelGroup(src_items)) => {
                Node::ParallelGroup(self.merge_items(base.and_then(Node::as_items), items, src_items))
            }
            (Node::Scalar(_), Node::Scalar(s)) => Node::Scalar(s.clone()),
            (acc, _) => {
                tracing::trace!("Ignoring source value with a different shape");
                acc
            }
        }
    }

    fn merge_items(&self, base: Option<&[Node]>, items: Vec<Node>, src: &[Node]) -> Vec<Node> {
        let mut used = vec![false; src.len()];
        let src_alignment: Vec<Alignment> = src
            .iter()
            .map(|n| Alignment::of(n, &self.identity))
            .collect();
        let src_anonymous: Vec<usize> = (0..src.len())
            .filter(|&j| src_alignment[j].is_anonymous())
            .collect();
        let base_anonymous: Vec<&Node> = base
            .unwrap_or_default()
            .iter()
            .filter(|n| Alignment::of(n, &self.identity).is_anonymous())
            .collect();
        let mut anonymous_seen = 0usize;

        let mut out = Vec::with_capacity(items.len());
        for item in items {
            let alignment = Alignment::of(&item, &self.identity);
            let (matched, item_base) = if alignment.is_anonymous() {
                let j = src_anonymous.get(anonymous_seen).copied();
                let item_base = base_anonymous.get(anonymous_seen).copied();
                anonymous_seen += 1;
                (j, item_base)
            } else {
                let j = (0..src.len()).find(|&j| !used[j] && alignment.matches(&src_alignment[j]));
                let item_base = base.and_then(|b| find_aligned(b, &alignment, &self.identity));
                (j, item_base)
            };
            match matched {
                Some(j) => {
                    used[j] = true;
                    out.push(self.merge_node(item_base, item, &src[j]));
                }
                None => out.push(item),
            }
        }

        if base.is_none() {
            out.extend(
                src.iter()
                    .zip(used)
                    .filter(|(_, used)| !used)
                    .map(|(node, _)| node.clone()),
            );
        }
        out
    }
}
