//! Collaborator boundary: where templates and merged documents come from.
//!
//! Both steps of a reconciliation pass are network-backed in production
//! (see the `runin-remote` crate) and in-process in tests and offline use
//! ([`LocalBackend`](crate::local::LocalBackend)).

use async_trait::async_trait;

use runin_document::Node;
use runin_types::{GitRef, InvalidReference, OverrideReference, Result, Scope};

/// Parameters of a template fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateRequest {
    pub pipeline: String,
    pub scope: Scope,
    pub git: GitRef,
    /// Stages in scope. Empty means the whole pipeline.
    pub stage_ids: Vec<String>,
}

/// Parameters of a merge fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeRequest {
    pub pipeline: String,
    pub scope: Scope,
    pub git: GitRef,
    pub stage_ids: Vec<String>,
    /// Override documents to merge, lowest precedence first.
    pub references: Vec<OverrideReference>,
    /// A literal document merged above every reference.
    pub last_document: Option<Node>,
}

/// Result of a merge fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeResponse {
    pub document: Node,
    /// References that could not be applied against the current template.
    pub invalid: Vec<InvalidReference>,
}

/// Produces the template of a pipeline for a set of stages.
#[async_trait]
pub trait TemplateSource: Send + Sync {
    /// The template; the empty document when the pipeline has no runtime inputs.
    async fn fetch_template(&self, request: &TemplateRequest) -> Result<Node>;
}

/// Merges override documents against the current template.
#[async_trait]
pub trait MergeSource: Send + Sync {
    async fn fetch_merge(&self, request: &MergeRequest) -> Result<MergeResponse>;
}
