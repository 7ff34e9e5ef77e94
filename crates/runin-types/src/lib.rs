//! Shared types and errors for the runtime-input reconciliation engine.
//!
//! This crate provides the foundational types used across all other runin crates:
//! - `RuninError` — unified error taxonomy
//! - `Scope` / `GitRef` — opaque identifiers passed through to collaborators
//! - `OverrideReference` — pointer to a persisted override document (input set)
//! - `StageSelection` — which stages of a pipeline take part in a pass
//! - `FieldError` / `InvalidReference` — diagnostics for references that no longer apply

use serde::{Deserialize, Serialize};

/// Unified error type for all runin subsystems.
#[derive(Debug, thiserror::Error)]
pub enum RuninError {
    // === Collaborator Errors ===
    #[error("Request to {endpoint} failed (HTTP {status}): {message}")]
    Transport {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("Backend rejected request with HTTP {status}: {message}")]
    Backend { status: u16, message: String },

    // === Document Errors ===
    #[error("Failed to decode {format} document: {message}")]
    Decode { format: String, message: String },

    #[error("Pipeline '{pipeline}' not found")]
    PipelineNotFound { pipeline: String },

    #[error("Override document '{identifier}' not found")]
    OverrideNotFound { identifier: String },

    // === Configuration ===
    #[error("Configuration error: {0}")]
    Config(String),

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{0}")]
    Other(String),
}

impl RuninError {
    /// Returns `true` if the error came from the network boundary rather than
    /// from the data itself.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            RuninError::Transport { .. } | RuninError::Backend { .. }
        )
    }
}

/// A convenience alias for `Result<T, RuninError>`.
pub type Result<T> = std::result::Result<T, RuninError>;

// ---------------------------------------------------------------------------
// Scope — opaque tenancy identifiers
// ---------------------------------------------------------------------------

/// Account / organisation / project identifiers. The engine never interprets
/// these; they are forwarded to collaborators as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub account: String,
    pub org: Option<String>,
    pub project: Option<String>,
}

impl Scope {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            org: None,
            project: None,
        }
    }

    pub fn with_org(mut self, org: impl Into<String>) -> Self {
        self.org = Some(org.into());
        self
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }
}

/// Repository / branch pointer for pipelines stored in git.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GitRef {
    pub repo: Option<String>,
    pub branch: Option<String>,
}

impl GitRef {
    pub fn branch(branch: impl Into<String>) -> Self {
        Self {
            repo: None,
            branch: Some(branch.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// OverrideReference
// ---------------------------------------------------------------------------

/// Reference to a previously persisted override document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OverrideReference {
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<GitRef>,
}

impl OverrideReference {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            git: None,
        }
    }

    pub fn with_git(mut self, git: GitRef) -> Self {
        self.git = Some(git);
        self
    }
}

impl From<&str> for OverrideReference {
    fn from(identifier: &str) -> Self {
        Self::new(identifier)
    }
}

// ---------------------------------------------------------------------------
// StageSelection
// ---------------------------------------------------------------------------

/// The stages chosen to execute: everything, or an explicit ordered set.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageSelection {
    #[default]
    All,
    Only(Vec<String>),
}

impl StageSelection {
    /// Build a selection from stage identifiers. Duplicates are dropped
    /// (first occurrence wins) and an empty input yields [`StageSelection::All`].
    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for id in ids {
            let id = id.into();
            if !unique.contains(&id) {
                unique.push(id);
            }
        }
        if unique.is_empty() {
            StageSelection::All
        } else {
            StageSelection::Only(unique)
        }
    }
}

// ---------------------------------------------------------------------------
// Reference diagnostics
// ---------------------------------------------------------------------------

/// A single field of an override document that does not fit the template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub path: String,
    pub message: String,
}

impl FieldError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// An override reference the merge could not fully apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidReference {
    pub identifier: String,
    pub errors: Vec<FieldError>,
}
