//! Reference validator: which override documents no longer fit the pipeline.
//!
//! [`validate_reference`] checks one override document against a template and
//! reports every field that has no counterpart in it. [`ReferenceValidator`]
//! holds the invalid set for a pass; entries leave it only through an explicit
//! [`ReferenceValidator::reconcile`].

use std::collections::{BTreeMap, BTreeSet};

use runin_document::{find_aligned, Alignment, FieldPath, IdentityFields, Node, PathSegment};
use runin_types::{FieldError, InvalidReference};

/// Every field of `document` that does not fit `template`.
///
/// A field fits when the template holds a placeholder at or above it, or a
/// structural value equal to it. Placeholders in the document fit anywhere.
pub fn validate_reference(
    template: &Node,
    document: &Node,
    identity: &IdentityFields,
) -> Vec<FieldError> {
    let mut errors = Vec::new();
    check(template, document, FieldPath::root(), identity, &mut errors);
    errors
}

fn check(
    template: &Node,
    document: &Node,
    path: FieldPath,
    identity: &IdentityFields,
    errors: &mut Vec<FieldError>,
) {
    if template.is_placeholder() || document.is_placeholder() {
        return;
    }
    match (template, document) {
        (Node::Subtree(t), Node::Subtree(d)) => {
            for (key, value) in d.iter() {
                let child = path.key(key);
                match t.get(key) {
                    Some(t_value) => check(t_value, value, child, identity, errors),
                    None => errors.push(FieldError::new(
                        child.to_string(),
                        "field is not a runtime input of the pipeline",
                    )),
                }
            }
        }
        (
            Node::List(t) | Node::ParallelGroup(t),
            Node::List(d) | Node::ParallelGroup(d),
        ) => {
            let t_anonymous: Vec<&Node> = t
                .iter()
                .filter(|n| Alignment::of(n, identity).is_anonymous())
                .collect();
            let mut anonymous_seen = 0usize;
            for (i, item) in d.iter().enumerate() {
                let child = path.child(PathSegment::for_element(item, i, identity));
                match Alignment::of(item, identity) {
                    Alignment::Anonymous => {
                        match t_anonymous.get(anonymous_seen) {
                            Some(t_item) => check(t_item, item, child, identity, errors),
                            None => errors.push(FieldError::new(
                                child.to_string(),
                                "list element has no counterpart in the pipeline",
                            )),
                        }
                        anonymous_seen += 1;
                    }
                    alignment => match find_aligned(t, &alignment, identity) {
                        Some(t_item) => check(t_item, item, child, identity, errors),
                        None => errors.push(FieldError::new(
                            child.to_string(),
                            format!("'{}' no longer exists in the pipeline", element_label(&alignment)),
                        )),
                    },
                }
            }
        }
        (Node::Scalar(t), Node::Scalar(d)) => {
            if t != d {
                errors.push(FieldError::new(
                    path.to_string(),
                    "value conflicts with a fixed value of the pipeline",
                ));
            }
        }
        _ => errors.push(FieldError::new(
            path.to_string(),
            "value has a different shape than the pipeline field",
        )),
    }
}

fn element_label(alignment: &Alignment) -> String {
    match alignment {
        Alignment::Keyed(key) => key.id.clone(),
        Alignment::Group(members) => members
            .iter()
            .map(|key| key.id.as_str())
            .collect::<Vec<_>>()
            .join(","),
        Alignment::Anonymous => String::new(),
    }
}

/// Invalid override references of the current pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceValidator {
    invalid: BTreeMap<String, Vec<FieldError>>,
}

impl ReferenceValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the invalid set with the error payload of a merge response.
    pub fn replace(&mut self, invalid: Vec<InvalidReference>) {
        self.invalid = invalid
            .into_iter()
            .map(|r| (r.identifier, r.errors))
            .collect();
    }

    pub fn clear(&mut self) {
        self.invalid.clear();
    }

    pub fn invalid_references(&self) -> BTreeSet<String> {
        self.invalid.keys().cloned().collect()
    }

    pub fn is_invalid(&self, identifier: &str) -> bool {
        self.invalid.contains_key(identifier)
    }

    pub fn errors_for(&self, identifier: &str) -> Option<&[FieldError]> {
        self.invalid.get(identifier).map(Vec::as_slice)
    }

    /// Drop `identifier` from the invalid set. Idempotent; returns whether it
    /// was present.
    pub fn reconcile(&mut self, identifier: &str) -> bool {
        self.invalid.remove(identifier).is_some()
    }
}
