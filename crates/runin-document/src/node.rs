//! The document tree: a tagged union of scalars, lists, parallel groups and
//! named sub-trees.

use crate::identity::{find_aligned, find_element, Alignment, IdentityFields};
use crate::input::RuntimeInput;
use crate::path::{FieldPath, PathSegment};

/// A leaf value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// The runtime-input sentinel. Never equal to any user value.
    Input(RuntimeInput),
}

impl Scalar {
    pub fn is_input(&self) -> bool {
        matches!(self, Scalar::Input(_))
    }

    /// Text form of a concrete value, used when checking it against input
    /// modifiers. `None` for the sentinel.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Scalar::Null => Some(String::new()),
            Scalar::Bool(b) => Some(b.to_string()),
            Scalar::Int(i) => Some(i.to_string()),
            Scalar::Float(f) => Some(f.to_string()),
            Scalar::Str(s) => Some(s.clone()),
            Scalar::Input(_) => None,
        }
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::Str(s.to_string())
    }
}

/// Ordered named children of a sub-tree.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Fields(Vec<(String, Node)>);

impl Fields {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Node> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Node> {
        self.0.iter_mut().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Insert or replace `key`. A replaced key keeps its position.
    pub fn insert(&mut self, key: impl Into<String>, value: Node) {
        let key = key.into();
        match self.get_mut(&key) {
            Some(slot) => *slot = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }
}

impl FromIterator<(String, Node)> for Fields {
    fn from_iter<T: IntoIterator<Item = (String, Node)>>(iter: T) -> Self {
        let mut fields = Fields::new();
        for (k, v) in iter {
            fields.insert(k, v);
        }
        fields
    }
}

impl IntoIterator for Fields {
    type Item = (String, Node);
    type IntoIter = std::vec::IntoIter<(String, Node)>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// A node of a pipeline, template or override document.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Scalar(Scalar),
    List(Vec<Node>),
    /// A list whose members carry no relative-order significance.
    ParallelGroup(Vec<Node>),
    Subtree(Fields),
}

impl Default for Node {
    fn default() -> Self {
        Node::empty()
    }
}

impl Node {
    /// The empty document.
    pub fn empty() -> Self {
        Node::Subtree(Fields::new())
    }

    /// A bare `<+input>` leaf.
    pub fn placeholder() -> Self {
        Node::Scalar(Scalar::Input(RuntimeInput::new()))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Node::Scalar(Scalar::Str(value.into()))
    }

    /// Build a sub-tree from `(key, node)` pairs.
    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Node)>,
    {
        Node::Subtree(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// `true` for the empty document (an empty sub-tree or null).
    pub fn is_empty_document(&self) -> bool {
        match self {
            Node::Subtree(fields) => fields.is_empty(),
            Node::Scalar(Scalar::Null) => true,
            _ => false,
        }
    }

    /// `true` if this node itself is the sentinel.
    pub fn is_placeholder(&self) -> bool {
        matches!(self, Node::Scalar(Scalar::Input(_)))
    }

    pub fn as_input(&self) -> Option<&RuntimeInput> {
        match self {
            Node::Scalar(Scalar::Input(input)) => Some(input),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            Node::Scalar(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Node::Scalar(Scalar::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_fields(&self) -> Option<&Fields> {
        match self {
            Node::Subtree(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn as_fields_mut(&mut self) -> Option<&mut Fields> {
        match self {
            Node::Subtree(fields) => Some(fields),
            _ => None,
        }
    }

    /// Elements of a list or parallel group.
    pub fn as_items(&self) -> Option<&[Node]> {
        match self {
            Node::List(items) | Node::ParallelGroup(items) => Some(items),
            _ => None,
        }
    }

    /// Child field of a sub-tree.
    pub fn field(&self, key: &str) -> Option<&Node> {
        self.as_fields().and_then(|f| f.get(key))
    }

    /// `true` if any descendant (or the node itself) is a sentinel.
    pub fn has_placeholder(&self) -> bool {
        match self {
            Node::Scalar(s) => s.is_input(),
            Node::List(items) | Node::ParallelGroup(items) => {
                items.iter().any(Node::has_placeholder)
            }
            Node::Subtree(fields) => fields.iter().any(|(_, v)| v.has_placeholder()),
        }
    }

    /// Resolve `path` using the default identity fields.
    pub fn get(&self, path: &FieldPath) -> Option<&Node> {
        self.get_with(path, &IdentityFields::default())
    }

    pub fn get_with(&self, path: &FieldPath, identity: &IdentityFields) -> Option<&Node> {
        let mut current = self;
        for segment in path.segments() {
            current = match (segment, current) {
                (PathSegment::Key(key), Node::Subtree(fields)) => fields.get(key)?,
                (PathSegment::Element(key), Node::List(items) | Node::ParallelGroup(items)) => {
                    find_element(items, key, identity)?
                }
                (PathSegment::Group(members), Node::List(items) | Node::ParallelGroup(items)) => {
                    find_aligned(items, &Alignment::Group(members.clone()), identity)?
                }
                (PathSegment::Index(i), Node::List(items) | Node::ParallelGroup(items)) => {
                    items.get(*i)?
                }
                _ => return None,
            };
        }
        Some(current)
    }

    /// Every scalar leaf with its path, depth-first, in document order.
    pub fn leaves(&self) -> Vec<(FieldPath, &Scalar)> {
        self.leaves_with(&IdentityFields::default())
    }

    pub fn leaves_with(&self, identity: &IdentityFields) -> Vec<(FieldPath, &Scalar)> {
        let mut out = Vec::new();
        collect_leaves(self, FieldPath::root(), identity, &mut out);
        out
    }
}

fn collect_leaves<'a>(
    node: &'a Node,
    path: FieldPath,
    identity: &IdentityFields,
    out: &mut Vec<(FieldPath, &'a Scalar)>,
) {
    match node {
        Node::Scalar(s) => out.push((path, s)),
        Node::List(items) | Node::ParallelGroup(items) => {
            for (i, item) in items.iter().enumerate() {
                let segment = PathSegment::for_element(item, i, identity);
                collect_leaves(item, path.child(segment), identity, out);
            }
        }
        Node::Subtree(fields) => {
            for (k, v) in fields.iter() {
                collect_leaves(v, path.child(PathSegment::Key(k.to_string())), identity, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(id: &str, spec: Node) -> Node {
        Node::map([(
            "stage",
            Node::map([("identifier", Node::string(id)), ("spec", spec)]),
        )])
    }

    #[test]
    fn fields_insert_replaces_in_place() {
        let mut f = Fields::new();
        f.insert("a", Node::string("1"));
        f.insert("b", Node::string("2"));
        f.insert("a", Node::string("3"));
        let keys: Vec<&str> = f.keys().collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(f.get("a"), Some(&Node::string("3")));
    }

    #[test]
    fn empty_document_detection() {
        assert!(Node::empty().is_empty_document());
        assert!(Node::Scalar(Scalar::Null).is_empty_document());
        assert!(!Node::map([("a", Node::placeholder())]).is_empty_document());
    }

    #[test]
    fn placeholder_is_distinct_from_empty_string() {
        assert_ne!(Node::placeholder(), Node::string(""));
        assert!(!Node::string("").has_placeholder());
    }

    #[test]
    fn has_placeholder_looks_through_lists() {
        let doc = Node::map([(
            "stages",
            Node::List(vec![stage("deploy", Node::map([("ns", Node::placeholder())]))]),
        )]);
        assert!(doc.has_placeholder());
    }

    #[test]
    fn leaves_address_list_elements_by_identity() {
        let doc = Node::map([(
            "stages",
            Node::List(vec![stage("deploy", Node::map([("ns", Node::placeholder())]))]),
        )]);
        let paths: Vec<String> = doc.leaves().iter().map(|(p, _)| p.to_string()).collect();
        assert_eq!(
            paths,
            vec![
                "stages[deploy].stage.identifier",
                "stages[deploy].stage.spec.ns"
            ]
        );
    }

    #[test]
    fn get_resolves_leaf_paths() {
        let doc = Node::map([(
            "stages",
            Node::List(vec![stage("deploy", Node::map([("ns", Node::string("prod"))]))]),
        )]);
        let (path, _) = doc
            .leaves()
            .into_iter()
            .find(|(p, _)| p.to_string().ends_with("ns"))
            .unwrap();
        assert_eq!(doc.get(&path), Some(&Node::string("prod")));
    }

    #[test]
    fn leaf_paths_through_parallel_groups_survive_pruning() {
        let group = |members: Vec<Node>| Node::map([("parallel", Node::ParallelGroup(members))]);
        let full = Node::map([(
            "stages",
            Node::List(vec![
                group(vec![stage("a", Node::map([("ns", Node::string("x"))]))]),
                group(vec![
                    stage("c", Node::map([("ns", Node::string("C"))])),
                    stage("d", Node::map([("ns", Node::string("D"))])),
                ]),
            ]),
        )]);
        let pruned = Node::map([(
            "stages",
            Node::List(vec![group(vec![stage("d", Node::map([("ns", Node::placeholder())]))])]),
        )]);
        let (path, _) = pruned
            .leaves()
            .into_iter()
            .find(|(p, _)| p.to_string().ends_with("ns"))
            .unwrap();
        assert_eq!(path.to_string(), "stages[d].parallel[d].stage.spec.ns");
        assert_eq!(full.get(&path), Some(&Node::string("D")));
    }

    #[test]
    fn scalar_text_forms() {
        assert_eq!(Scalar::Int(3).as_text().as_deref(), Some("3"));
        assert_eq!(Scalar::Bool(true).as_text().as_deref(), Some("true"));
        assert_eq!(Scalar::Input(RuntimeInput::new()).as_text(), None);
    }
}
