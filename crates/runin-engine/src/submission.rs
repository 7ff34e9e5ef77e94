//! What is still pending in a resolved document, and whether a submitted
//! document satisfies a template.

use serde::Serialize;

use runin_document::{FieldPath, Node, RuntimeInput, Scalar};

/// A field still holding the sentinel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingInput {
    pub path: String,
    #[serde(serialize_with = "render_input")]
    pub input: RuntimeInput,
}

fn render_input<S: serde::Serializer>(input: &RuntimeInput, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&input.render())
}

/// Every placeholder left in `resolved`, in document order.
pub fn pending_inputs(resolved: &Node) -> Vec<PendingInput> {
    resolved
        .leaves()
        .into_iter()
        .filter_map(|(path, scalar)| match scalar {
            Scalar::Input(input) => Some(PendingInput {
                path: path.to_string(),
                input: input.clone(),
            }),
            _ => None,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubmissionIssue {
    Missing { path: String },
    NotAllowed { path: String, value: String, allowed: Vec<String> },
    PatternMismatch { path: String, value: String, pattern: String },
}

impl SubmissionIssue {
    pub fn path(&self) -> &str {
        match self {
            SubmissionIssue::Missing { path }
            | SubmissionIssue::NotAllowed { path, .. }
            | SubmissionIssue::PatternMismatch { path, .. } => path,
        }
    }
}

/// Check `submitted` against every placeholder of `template`.
///
/// Inputs marked `.executionInput()` may stay pending. A placeholder that
/// stands for a whole list or sub-tree is satisfied by any concrete value of
/// that shape.
pub fn check_submission(template: &Node, submitted: &Node) -> Vec<SubmissionIssue> {
    let mut issues = Vec::new();
    for (path, scalar) in template.leaves() {
        let Scalar::Input(input) = scalar else {
            continue;
        };
        if let Some(issue) = check_field(&path, input, submitted.get(&path)) {
            issues.push(issue);
        }
    }
    issues
}

fn check_field(path: &FieldPath, input: &RuntimeInput, value: Option<&Node>) -> Option<SubmissionIssue> {
    let missing = || {
        (!input.is_execution_input()).then(|| SubmissionIssue::Missing {
            path: path.to_string(),
        })
    };
    let scalar = match value {
        None | Some(Node::Scalar(Scalar::Null | Scalar::Input(_))) => return missing(),
        Some(Node::Scalar(scalar)) => scalar,
        Some(_) => return None,
    };
    let text = scalar.as_text()?;
    if input.accepts(&text) {
        return None;
    }
    if let Some(allowed) = input.allowed_values() {
        if !allowed.iter().any(|a| *a == text) {
            return Some(SubmissionIssue::NotAllowed {
                path: path.to_string(),
                value: text,
                allowed: allowed.to_vec(),
            });
        }
    }
    Some(SubmissionIssue::PatternMismatch {
        path: path.to_string(),
        value: text,
        pattern: input.regex().unwrap_or_default().to_string(),
    })
}
