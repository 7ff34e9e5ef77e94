//! Field paths addressing nodes inside a document.

use std::fmt;

use crate::identity::{Alignment, ElementKey, IdentityFields};
use crate::node::Node;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    /// Named child of a sub-tree.
    Key(String),
    /// List element matched by its identity.
    Element(ElementKey),
    /// Parallel-group wrapper matched by any of its member identities.
    Group(Vec<ElementKey>),
    /// List element without identity, by position.
    Index(usize),
}

impl PathSegment {
    /// The segment addressing `element` inside a list.
    pub fn for_element(element: &Node, index: usize, identity: &IdentityFields) -> Self {
        match Alignment::of(element, identity) {
            Alignment::Keyed(key) => Self::Element(key),
            Alignment::Group(members) => Self::Group(members),
            Alignment::Anonymous => Self::Index(index),
        }
    }
}

/// A path from the document root, e.g. `pipeline.stages[deploy].stage.spec.namespace`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FieldPath(Vec<PathSegment>);

impl FieldPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    /// A new path with `segment` appended.
    pub fn child(&self, segment: PathSegment) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment);
        Self(segments)
    }

    pub fn key(&self, key: &str) -> Self {
        self.child(PathSegment::Key(key.to_string()))
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("<root>");
        }
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                PathSegment::Key(k) if i == 0 => write!(f, "{k}")?,
                PathSegment::Key(k) => write!(f, ".{k}")?,
                PathSegment::Element(key) => write!(f, "[{}]", key.id)?,
                PathSegment::Group(members) => {
                    let ids: Vec<String> = members.iter().map(ElementKey::to_string).collect();
                    write!(f, "[{}]", ids.join(","))?
                }
                PathSegment::Index(idx) => write!(f, "[{idx}]")?,
            }
        }
        Ok(())
    }
}
