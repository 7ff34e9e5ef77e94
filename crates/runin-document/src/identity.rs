//! Stable identity of list elements.
//!
//! Lists are aligned by identity, never by position, whenever their elements
//! carry one. An element's identity is its own identity field (`identifier`,
//! then `name`), or for a single-key wrapper such as `{stage: {identifier: x}}`
//! the wrapper key together with the wrapped element's identity.
//!
//! A `{parallel: [...]}` wrapper carries no identity field of its own. It is
//! aligned through its members: two wrappers are the same element when they
//! share at least one member identity, so a wrapper still lines up after
//! pruning or stage restriction removed some of its members.

use std::fmt;

use crate::codec::PARALLEL_KEY;
use crate::node::{Fields, Node, Scalar};

/// Identity of a list element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementKey {
    /// Wrapper key (`stage`, `step`, ...) when the identity sits one level down.
    pub wrapper: Option<String>,
    pub id: String,
}

impl ElementKey {
    pub fn bare(id: impl Into<String>) -> Self {
        Self {
            wrapper: None,
            id: id.into(),
        }
    }

    pub fn wrapped(wrapper: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            wrapper: Some(wrapper.into()),
            id: id.into(),
        }
    }
}

impl fmt::Display for ElementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// How a list element is matched against the elements of another list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Alignment {
    /// Element with its own (or wrapped) identity.
    Keyed(ElementKey),
    /// Parallel-group wrapper, identified by its members.
    Group(Vec<ElementKey>),
    /// No identity: aligned by position among the other anonymous elements.
    Anonymous,
}

impl Alignment {
    pub fn of(element: &Node, identity: &IdentityFields) -> Self {
        if let Some(key) = identity_of(element, identity) {
            return Self::Keyed(key);
        }
        match group_members(element, identity) {
            Some(members) => Self::Group(members),
            None => Self::Anonymous,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }

    /// Whether `self` and `other` denote the same element. Anonymous elements
    /// never match here; callers align them by position.
    pub fn matches(&self, other: &Alignment) -> bool {
        match (self, other) {
            (Self::Keyed(a), Self::Keyed(b)) => a == b,
            (Self::Group(a), Self::Group(b)) => a.iter().any(|key| b.contains(key)),
            _ => false,
        }
    }
}

/// Member identities of a `{parallel: [...]}` wrapper; `None` for anything
/// else or for a group whose members have no identity.
fn group_members(element: &Node, identity: &IdentityFields) -> Option<Vec<ElementKey>> {
    let fields = element.as_fields()?;
    if fields.len() != 1 {
        return None;
    }
    let members = match fields.get(PARALLEL_KEY)? {
        Node::ParallelGroup(members) | Node::List(members) => members,
        _ => return None,
    };
    let keys: Vec<ElementKey> = members
        .iter()
        .filter_map(|member| identity_of(member, identity))
        .collect();
    (!keys.is_empty()).then_some(keys)
}

/// Find the element of `items` that `alignment` matches.
pub fn find_aligned<'a>(
    items: &'a [Node],
    alignment: &Alignment,
    identity: &IdentityFields,
) -> Option<&'a Node> {
    items
        .iter()
        .find(|item| alignment.matches(&Alignment::of(item, identity)))
}

/// Ordered list of field names that identify list elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityFields(Vec<String>);

impl IdentityFields {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(fields.into_iter().map(Into::into).collect())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl Default for IdentityFields {
    fn default() -> Self {
        Self::new(["identifier", "name"])
    }
}

/// The identity of `element`, if it has one.
pub fn identity_of(element: &Node, identity: &IdentityFields) -> Option<ElementKey> {
    let fields = element.as_fields()?;
    if let Some((_, id)) = own_identity(fields, identity) {
        return Some(ElementKey::bare(id));
    }
    let (wrapper, inner) = single_wrapper(fields)?;
    let (_, id) = own_identity(inner, identity)?;
    Some(ElementKey::wrapped(wrapper, id))
}

/// Find the element of `items` whose identity is `key`.
pub fn find_element<'a>(
    items: &'a [Node],
    key: &ElementKey,
    identity: &IdentityFields,
) -> Option<&'a Node> {
    items
        .iter()
        .find(|item| identity_of(item, identity).as_ref() == Some(key))
}

fn own_identity(fields: &Fields, identity: &IdentityFields) -> Option<(String, String)> {
    identity.names().find_map(|name| match fields.get(name) {
        Some(Node::Scalar(Scalar::Str(id))) => Some((name.to_string(), id.clone())),
        Some(Node::Scalar(Scalar::Int(id))) => Some((name.to_string(), id.to_string())),
        _ => None,
    })
}

fn single_wrapper(fields: &Fields) -> Option<(String, &Fields)> {
    if fields.len() != 1 {
        return None;
    }
    let (key, value) = fields.iter().next()?;
    Some((key.to_string(), value.as_fields()?))
}
