//! In-process backend: serves templates and merges from documents held in memory.
//!
//! Used by the CLI's offline mode and by tests. Cloning a `LocalBackend`
//! yields another handle to the same store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use runin_document::{IdentityFields, Node};
use runin_types::{FieldError, GitRef, InvalidReference, OverrideReference, Result, RuninError};

use crate::config::EngineConfig;
use crate::differ::Differ;
use crate::merger::Merger;
use crate::references::validate_reference;
use crate::source::{MergeRequest, MergeResponse, MergeSource, TemplateRequest, TemplateSource};
use crate::stages::restrict;

#[derive(Default)]
struct Store {
    /// Keyed by (pipeline identifier, branch). `None` is the default branch.
    pipelines: HashMap<(String, Option<String>), Node>,
    /// Keyed by (override identifier, branch), like `pipelines`.
    overrides: HashMap<(String, Option<String>), Node>,
}

#[derive(Clone)]
pub struct LocalBackend {
    store: Arc<tokio::sync::RwLock<Store>>,
    differ: Differ,
    merger: Merger,
    identity: IdentityFields,
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

impl LocalBackend {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            store: Arc::new(tokio::sync::RwLock::new(Store::default())),
            differ: Differ::from_config(config),
            merger: Merger::from_config(config),
            identity: config.identity(),
        }
    }

    /// Register (or replace) a pipeline on its default branch.
    pub async fn insert_pipeline(&self, identifier: impl Into<String>, document: Node) {
        self.store
            .write()
            .await
            .pipelines
            .insert((identifier.into(), None), document);
    }

    /// Register (or replace) a pipeline on a specific branch.
    pub async fn insert_pipeline_on_branch(
        &self,
        identifier: impl Into<String>,
        branch: impl Into<String>,
        document: Node,
    ) {
        self.store
            .write()
            .await
            .pipelines
            .insert((identifier.into(), Some(branch.into())), document);
    }

    /// Register (or replace) an override document on the default branch.
    pub async fn insert_override(&self, identifier: impl Into<String>, document: Node) {
        self.store
            .write()
            .await
            .overrides
            .insert((identifier.into(), None), document);
    }

    /// Register (or replace) an override document on a specific branch.
    pub async fn insert_override_on_branch(
        &self,
        identifier: impl Into<String>,
        branch: impl Into<String>,
        document: Node,
    ) {
        self.store
            .write()
            .await
            .overrides
            .insert((identifier.into(), Some(branch.into())), document);
    }

    fn lookup<'a>(store: &'a Store, pipeline: &str, git: &GitRef) -> Result<&'a Node> {
        let branch_key = (pipeline.to_string(), git.branch.clone());
        store
            .pipelines
            .get(&branch_key)
            .or_else(|| store.pipelines.get(&(pipeline.to_string(), None)))
            .ok_or_else(|| RuninError::PipelineNotFound {
                pipeline: pipeline.to_string(),
            })
    }

    /// The override document `reference` points at: its own branch first,
    /// then the default branch.
    fn lookup_override<'a>(store: &'a Store, reference: &OverrideReference) -> Option<&'a Node> {
        let branch = reference.git.as_ref().and_then(|git| git.branch.clone());
        store
            .overrides
            .get(&(reference.identifier.clone(), branch))
            .or_else(|| store.overrides.get(&(reference.identifier.clone(), None)))
    }

    fn scoped_template(&self, pipeline: &Node, stage_ids: &[String]) -> Node {
        self.differ.diff(&restrict(pipeline, stage_ids))
    }
}

#[async_trait]
impl TemplateSource for LocalBackend {
    async fn fetch_template(&self, request: &TemplateRequest) -> Result<Node> {
        let store = self.store.read().await;
        let pipeline = Self::lookup(&store, &request.pipeline, &request.git)?;
        Ok(self.scoped_template(pipeline, &request.stage_ids))
    }
}

#[async_trait]
impl MergeSource for LocalBackend {
    async fn fetch_merge(&self, request: &MergeRequest) -> Result<MergeResponse> {
        let store = self.store.read().await;
        let pipeline = Self::lookup(&store, &request.pipeline, &request.git)?;
        let scoped = self.scoped_template(pipeline, &request.stage_ids);
        // Override documents usually cover every stage, so they are validated
        // against the unscoped template.
        let full = self.differ.diff(pipeline);

        let mut invalid = Vec::new();
        let mut combined = Node::empty();
        for reference in &request.references {
            let Some(document) = Self::lookup_override(&store, reference) else {
                invalid.push(InvalidReference {
                    identifier: reference.identifier.clone(),
                    errors: vec![FieldError::new(
                        "<root>",
                        RuninError::OverrideNotFound {
                            identifier: reference.identifier.clone(),
                        }
                        .to_string(),
                    )],
                });
                continue;
            };
            let errors = validate_reference(&full, document, &self.identity);
            if !errors.is_empty() {
                tracing::debug!(
                    reference = %reference.identifier,
                    errors = errors.len(),
                    "Override document does not fit the pipeline"
                );
                invalid.push(InvalidReference {
                    identifier: reference.identifier.clone(),
                    errors,
                });
            }
            combined = self.merger.overlay(&combined, document);
        }

        let mut sources = vec![combined];
        sources.extend(request.last_document.clone());
        Ok(MergeResponse {
            document: self.merger.merge(&scoped, &sources),
            invalid,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runin_types::Scope;

    const PIPELINE: &str = r#"
pipeline:
  identifier: shop
  stages:
    - stage:
        identifier: build
        spec: {image: rust}
    - stage:
        identifier: deploy
        spec: {namespace: <+input>}
"#;

    fn yaml(text: &str) -> Node {
        Node::from_yaml_str(text).unwrap()
    }

    fn template_request(stage_ids: &[&str]) -> TemplateRequest {
        TemplateRequest {
            pipeline: "shop".into(),
            scope: Scope::new("acct"),
            git: GitRef::default(),
            stage_ids: stage_ids.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn merge_request(refs: &[&str], last: Option<Node>) -> MergeRequest {
        MergeRequest {
            pipeline: "shop".into(),
            scope: Scope::new("acct"),
            git: GitRef::default(),
            stage_ids: vec![],
            references: refs.iter().map(|r| OverrideReference::new(*r)).collect(),
            last_document: last,
        }
    }

    async fn backend() -> LocalBackend {
        let backend = LocalBackend::default();
        backend.insert_pipeline("shop", yaml(PIPELINE)).await;
        backend
    }

    #[tokio::test]
    async fn template_for_unknown_pipeline_is_an_error() {
        let backend = LocalBackend::default();
        let err = backend.fetch_template(&template_request(&[])).await.unwrap_err();
        assert!(matches!(err, RuninError::PipelineNotFound { .. }));
    }

    #[tokio::test]
    async fn template_is_scoped_to_stages() {
        let backend = backend().await;
        let only_build = backend.fetch_template(&template_request(&["build"])).await.unwrap();
        assert!(only_build.is_empty_document());
        let only_deploy = backend.fetch_template(&template_request(&["deploy"])).await.unwrap();
        assert!(only_deploy.has_placeholder());
    }

    #[tokio::test]
    async fn branch_specific_pipeline_takes_priority() {
        let backend = backend().await;
        backend
            .insert_pipeline_on_branch("shop", "feature", yaml("pipeline: {identifier: shop}"))
            .await;
        let mut request = template_request(&[]);
        request.git = GitRef::branch("feature");
        assert!(backend.fetch_template(&request).await.unwrap().is_empty_document());
        request.git = GitRef::branch("other");
        assert!(backend.fetch_template(&request).await.unwrap().has_placeholder());
    }

    #[tokio::test]
    async fn merge_reports_missing_and_unfit_overrides() {
        let backend = backend().await;
        backend
            .insert_override(
                "ov1",
                yaml("pipeline:\n  stages:\n    - stage: {identifier: deploy, spec: {namespace: prod}}\n"),
            )
            .await;
        backend
            .insert_override(
                "ov2",
                yaml("pipeline:\n  stages:\n    - stage: {identifier: deploy, spec: {region: eu}}\n"),
            )
            .await;

        let response = backend
            .fetch_merge(&merge_request(&["ov1", "ov2", "missing"], None))
            .await
            .unwrap();
        let ids: Vec<&str> = response.invalid.iter().map(|r| r.identifier.as_str()).collect();
        assert_eq!(ids, vec!["ov2", "missing"]);
        let ns = response.document.leaves().into_iter().find(|(p, _)| p.to_string().ends_with("namespace"));
        assert_eq!(ns.unwrap().1, &runin_document::Scalar::Str("prod".into()));
    }

    #[tokio::test]
    async fn last_document_wins_over_references() {
        let backend = backend().await;
        backend
            .insert_override(
                "ov1",
                yaml("pipeline:\n  stages:\n    - stage: {identifier: deploy, spec: {namespace: prod}}\n"),
            )
            .await;
        let edits = yaml("pipeline:\n  stages:\n    - stage: {identifier: deploy, spec: {namespace: qa}}\n");
        let response = backend
            .fetch_merge(&merge_request(&["ov1"], Some(edits)))
            .await
            .unwrap();
        assert!(response.invalid.is_empty());
        assert!(response.document.to_yaml_string().unwrap().contains("namespace: qa"));
    }

    #[tokio::test]
    async fn override_reference_resolves_on_its_own_branch() {
        let backend = backend().await;
        let on = |ns: &str| {
            yaml(&format!(
                "pipeline:\n  stages:\n    - stage: {{identifier: deploy, spec: {{namespace: {ns}}}}}\n"
            ))
        };
        backend.insert_override("ov1", on("prod")).await;
        backend.insert_override_on_branch("ov1", "feature", on("canary")).await;

        let mut request = merge_request(&[], None);
        request.references = vec![OverrideReference::new("ov1").with_git(GitRef::branch("feature"))];
        let response = backend.fetch_merge(&request).await.unwrap();
        assert!(response.document.to_yaml_string().unwrap().contains("namespace: canary"));

        request.references = vec![OverrideReference::new("ov1").with_git(GitRef::branch("other"))];
        let response = backend.fetch_merge(&request).await.unwrap();
        assert!(response.document.to_yaml_string().unwrap().contains("namespace: prod"));
    }
}
