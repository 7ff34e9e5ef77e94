//! Reconciliation orchestrator: sequences template fetch → merge fetch.
//!
//! One [`Orchestrator`] owns one [`ReconciliationState`] for one caller and
//! pipeline. Input changes arrive through the `on_*` handlers, which funnel into
//! [`Orchestrator::recompute`] (fresh template) or a merge-only re-run. Fetches
//! run as spawned tasks that post a [`Completion`] tagged with the [`PassKey`]
//! they were issued under; [`Orchestrator::pump`] applies a completion only if
//! its key is still the current one, so a superseded request can never write
//! state.
//!
//! Spawning requires a Tokio runtime.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;

use runin_document::Node;
use runin_types::{GitRef, OverrideReference, Result, RuninError, Scope, StageSelection};

use crate::config::EngineConfig;
use crate::events::{EventEmitter, ReconcileEvent};
use crate::merger::Merger;
use crate::references::ReferenceValidator;
use crate::source::{MergeRequest, MergeResponse, MergeSource, TemplateRequest, TemplateSource};
use crate::stages;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Everything a pass depends on, as supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileInputs {
    pub pipeline: String,
    pub scope: Scope,
    pub git: GitRef,
    /// The full pipeline, when the caller has it. Used to map the stage
    /// selection onto stage identifiers; without it an explicit selection is
    /// passed through as given.
    pub definition: Option<Node>,
    pub selection: StageSelection,
    /// Selected override documents, lowest precedence first.
    pub references: Vec<OverrideReference>,
    /// Values of a previous execution.
    pub rerun: Option<Node>,
    /// The document the caller is currently editing.
    pub edits: Option<Node>,
}

impl ReconcileInputs {
    pub fn new(pipeline: impl Into<String>, scope: Scope) -> Self {
        Self {
            pipeline: pipeline.into(),
            scope,
            ..Default::default()
        }
    }

    pub fn with_definition(mut self, definition: Node) -> Self {
        self.definition = Some(definition);
        self
    }

    pub fn with_git(mut self, git: GitRef) -> Self {
        self.git = git;
        self
    }

    pub fn with_selection(mut self, selection: StageSelection) -> Self {
        self.selection = selection;
        self
    }

    pub fn with_references<I, R>(mut self, references: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<OverrideReference>,
    {
        self.references = references.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_rerun(mut self, rerun: Node) -> Self {
        self.rerun = Some(rerun);
        self
    }

    pub fn with_edits(mut self, edits: Node) -> Self {
        self.edits = Some(edits);
        self
    }

    fn has_merge_sources(&self) -> bool {
        !self.references.is_empty() || self.rerun.is_some() || self.edits.is_some()
    }
}

/// Where the current pass stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    FetchingTemplate,
    FetchingMerge,
    /// The template has no placeholders; `resolved` is the empty document.
    NoRuntimeInputs,
    Resolved,
    Failed,
}

impl Phase {
    pub fn is_loading(self) -> bool {
        matches!(self, Phase::FetchingTemplate | Phase::FetchingMerge)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::NoRuntimeInputs | Phase::Resolved | Phase::Failed)
    }
}

/// Identity of one pass: a completion is applied only while its key is current.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassKey {
    pub generation: u64,
    pub pipeline: String,
    pub git: GitRef,
    pub stage_ids: Vec<String>,
    pub references: Vec<OverrideReference>,
}

/// A terminal pass failure, kept in a cloneable form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassError {
    pub message: String,
    pub transport: bool,
}

impl From<&RuninError> for PassError {
    fn from(err: &RuninError) -> Self {
        Self {
            message: err.to_string(),
            transport: err.is_transport(),
        }
    }
}

/// Snapshot of the orchestrator's externally observed state.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileOutput {
    pub resolved: Node,
    pub template: Node,
    pub invalid_references: BTreeSet<String>,
    pub is_loading: bool,
    pub error: Option<PassError>,
    pub phase: Phase,
}

/// Mutable state of the current pass. Replaced wholesale on a fresh pass.
#[derive(Debug, Clone)]
pub struct ReconciliationState {
    template: Option<Node>,
    resolved: Node,
    validator: ReferenceValidator,
    phase: Phase,
    error: Option<PassError>,
}

impl Default for ReconciliationState {
    fn default() -> Self {
        Self {
            template: None,
            resolved: Node::empty(),
            validator: ReferenceValidator::new(),
            phase: Phase::Idle,
            error: None,
        }
    }
}

impl ReconciliationState {
    pub fn template_ready(&self) -> bool {
        self.template.is_some()
    }

    pub fn merge_ready(&self) -> bool {
        matches!(self.phase, Phase::Resolved | Phase::NoRuntimeInputs)
    }
}

/// A finished fetch, posted back by the task that ran it.
#[derive(Debug)]
pub enum Completion {
    Template { key: PassKey, result: Result<Node> },
    Merge { key: PassKey, result: Result<MergeResponse> },
}

impl Completion {
    fn key(&self) -> &PassKey {
        match self {
            Completion::Template { key, .. } | Completion::Merge { key, .. } => key,
        }
    }
}

/// What [`Orchestrator::pump`] did with a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pumped {
    Applied,
    Discarded,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    templates: Arc<dyn TemplateSource>,
    merges: Arc<dyn MergeSource>,
    merger: Merger,
    events: EventEmitter,
    inputs: ReconcileInputs,
    state: ReconciliationState,
    generation: u64,
    current: Option<PassKey>,
    tx: mpsc::UnboundedSender<Completion>,
    rx: mpsc::UnboundedReceiver<Completion>,
}

impl Orchestrator {
    /// An orchestrator whose template and merge steps go to the same backend.
    pub fn new<B>(backend: Arc<B>, inputs: ReconcileInputs, config: &EngineConfig) -> Self
    where
        B: TemplateSource + MergeSource + 'static,
    {
        Self::with_sources(backend.clone(), backend, inputs, config)
    }

    pub fn with_sources(
        templates: Arc<dyn TemplateSource>,
        merges: Arc<dyn MergeSource>,
        inputs: ReconcileInputs,
        config: &EngineConfig,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            templates,
            merges,
            merger: Merger::from_config(config),
            events: EventEmitter::new(config.event_capacity),
            inputs,
            state: ReconciliationState::default(),
            generation: 0,
            current: None,
            tx,
            rx,
        }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ReconcileEvent> {
        self.events.subscribe()
    }

    pub fn inputs(&self) -> &ReconcileInputs {
        &self.inputs
    }

    pub fn state(&self) -> &ReconciliationState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn current_key(&self) -> Option<&PassKey> {
        self.current.as_ref()
    }

    pub fn output(&self) -> ReconcileOutput {
        ReconcileOutput {
            resolved: self.state.resolved.clone(),
            template: self.state.template.clone().unwrap_or_default(),
            invalid_references: self.state.validator.invalid_references(),
            is_loading: self.state.phase.is_loading(),
            error: self.state.error.clone(),
            phase: self.state.phase,
        }
    }

    /// Per-field diagnostics of an invalid reference.
    pub fn reference_errors(&self, identifier: &str) -> Option<&[runin_types::FieldError]> {
        self.state.validator.errors_for(identifier)
    }

    // -- Event handlers ------------------------------------------------------

    pub fn on_selection_changed(&mut self, selection: StageSelection) {
        if self.inputs.selection == selection && self.state.phase != Phase::Idle {
            return;
        }
        self.inputs.selection = selection;
        self.recompute();
    }

    pub fn on_pipeline_changed(&mut self, pipeline: impl Into<String>, git: GitRef, definition: Option<Node>) {
        self.inputs.pipeline = pipeline.into();
        self.inputs.git = git;
        self.inputs.definition = definition;
        self.recompute();
    }

    pub fn on_overrides_changed(&mut self, references: Vec<OverrideReference>) {
        self.inputs.references = references;
        self.remerge();
    }

    pub fn on_rerun_changed(&mut self, rerun: Option<Node>) {
        self.inputs.rerun = rerun;
        self.remerge();
    }

    pub fn on_edits_changed(&mut self, edits: Option<Node>) {
        self.inputs.edits = edits;
        self.remerge();
    }

    /// Re-run the whole pass with unchanged inputs.
    pub fn refetch(&mut self) {
        self.recompute();
    }

    /// Drop `identifier` from the invalid set. Never triggers a fetch.
    pub fn reconcile(&mut self, identifier: &str) -> bool {
        let removed = self.state.validator.reconcile(identifier);
        if removed {
            tracing::debug!(reference = %identifier, "Invalid reference reconciled");
            self.events.emit(ReconcileEvent::ReferenceReconciled {
                identifier: identifier.to_string(),
            });
        }
        removed
    }

    /// Reconcile `identifier` and also remove it from the active references,
    /// re-running the merge without it.
    pub fn drop_reference(&mut self, identifier: &str) {
        self.reconcile(identifier);
        let before = self.inputs.references.len();
        self.inputs.references.retain(|r| r.identifier != identifier);
        if self.inputs.references.len() != before {
            self.remerge();
        }
    }

    // -- Pass control ----------------------------------------------------------

    /// Start a fresh pass: discard state and fetch the template.
    pub fn recompute(&mut self) {
        let key = self.next_key();
        self.state = ReconciliationState {
            phase: Phase::FetchingTemplate,
            ..Default::default()
        };

        tracing::debug!(
            generation = key.generation,
            pipeline = %key.pipeline,
            stages = ?key.stage_ids,
            "Fetching template"
        );
        self.events.emit(ReconcileEvent::PassStarted {
            generation: key.generation,
            pipeline: key.pipeline.clone(),
            stage_ids: key.stage_ids.clone(),
        });

        let request = TemplateRequest {
            pipeline: key.pipeline.clone(),
            scope: self.inputs.scope.clone(),
            git: key.git.clone(),
            stage_ids: key.stage_ids.clone(),
        };
        let source = Arc::clone(&self.templates);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let fetch = tokio::spawn(async move { source.fetch_template(&request).await });
            let result = handle_join("template fetch", fetch.await);
            let _ = tx.send(Completion::Template { key, result });
        });
    }

    /// Keep a ready template and re-run only the merge step.
    fn remerge(&mut self) {
        let Some(template) = self.state.template.clone() else {
            self.recompute();
            return;
        };
        if self.state.phase == Phase::FetchingTemplate {
            self.recompute();
            return;
        }
        let key = self.next_key();
        self.state.validator.clear();
        self.state.error = None;
        self.advance(key, template);
    }

    /// Receive one completion and apply it if it belongs to the current pass.
    pub async fn pump(&mut self) -> Pumped {
        match self.rx.recv().await {
            Some(completion) => self.apply(completion),
            // Unreachable while `self.tx` is alive.
            None => Pumped::Discarded,
        }
    }

    /// Drive completions until the current pass stops loading.
    pub async fn settle(&mut self) -> ReconcileOutput {
        while self.state.phase.is_loading() {
            self.pump().await;
        }
        self.output()
    }

    /// Apply a completion. Stale or out-of-phase completions change nothing.
    pub fn apply(&mut self, completion: Completion) -> Pumped {
        if self.current.as_ref() != Some(completion.key()) {
            let generation = completion.key().generation;
            tracing::debug!(generation, current = self.generation, "Discarding stale response");
            self.events.emit(ReconcileEvent::StaleDiscarded {
                generation,
                current: self.generation,
            });
            return Pumped::Discarded;
        }

        match (completion, self.state.phase) {
            (Completion::Template { key, result }, Phase::FetchingTemplate) => match result {
                Ok(template) => {
                    self.events.emit(ReconcileEvent::TemplateFetched {
                        generation: key.generation,
                        has_inputs: template.has_placeholder(),
                    });
                    self.advance(key, template);
                }
                Err(err) => self.fail(&key, &err),
            },
            (Completion::Merge { key, result }, Phase::FetchingMerge) => match result {
                Ok(response) => self.resolve_merge(&key, response),
                Err(err) => self.fail(&key, &err),
            },
            (completion, phase) => {
                tracing::debug!(
                    generation = completion.key().generation,
                    ?phase,
                    "Ignoring completion that does not match the pass phase"
                );
                return Pumped::Discarded;
            }
        }
        Pumped::Applied
    }

    // -- Internals -------------------------------------------------------------

    fn next_key(&mut self) -> PassKey {
        self.generation += 1;
        let key = PassKey {
            generation: self.generation,
            pipeline: self.inputs.pipeline.clone(),
            git: self.inputs.git.clone(),
            stage_ids: self.stage_ids(),
            references: self.inputs.references.clone(),
        };
        self.current = Some(key.clone());
        key
    }

    fn stage_ids(&self) -> Vec<String> {
        match (&self.inputs.definition, &self.inputs.selection) {
            (Some(definition), selection) => stages::scope(definition, selection),
            (None, StageSelection::All) => Vec::new(),
            (None, StageSelection::Only(ids)) => ids.clone(),
        }
    }

    /// Template in hand: finish without a merge, or issue the merge fetch.
    fn advance(&mut self, key: PassKey, template: Node) {
        if !template.has_placeholder() {
            self.state.template = Some(template);
            self.state.resolved = Node::empty();
            self.finish(&key, Phase::NoRuntimeInputs);
            return;
        }
        self.state.template = Some(template.clone());

        if !self.inputs.has_merge_sources() {
            self.state.resolved = template;
            self.finish(&key, Phase::Resolved);
            return;
        }

        self.state.phase = Phase::FetchingMerge;
        let last_document = match (&self.inputs.edits, &self.inputs.rerun) {
            (Some(edits), _) => Some(edits.clone()),
            (None, Some(rerun)) if key.references.is_empty() => Some(rerun.clone()),
            _ => None,
        };
        let request = MergeRequest {
            pipeline: key.pipeline.clone(),
            scope: self.inputs.scope.clone(),
            git: key.git.clone(),
            stage_ids: key.stage_ids.clone(),
            references: key.references.clone(),
            last_document,
        };

        let references: Vec<String> = key.references.iter().map(|r| r.identifier.clone()).collect();
        tracing::debug!(
            generation = key.generation,
            pipeline = %key.pipeline,
            ?references,
            "Fetching merge"
        );
        self.events.emit(ReconcileEvent::MergeRequested {
            generation: key.generation,
            references,
        });

        let source = Arc::clone(&self.merges);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let fetch = tokio::spawn(async move { source.fetch_merge(&request).await });
            let result = handle_join("merge fetch", fetch.await);
            let _ = tx.send(Completion::Merge { key, result });
        });
    }

    fn resolve_merge(&mut self, key: &PassKey, response: MergeResponse) {
        let Some(template) = self.state.template.as_ref() else {
            return;
        };
        let mut sources = Vec::with_capacity(3);
        sources.extend(self.inputs.rerun.clone());
        sources.push(response.document);
        sources.extend(self.inputs.edits.clone());
        self.state.resolved = self.merger.merge(template, &sources);

        let invalid: Vec<String> = response.invalid.iter().map(|r| r.identifier.clone()).collect();
        if !invalid.is_empty() {
            tracing::warn!(
                generation = key.generation,
                pipeline = %key.pipeline,
                ?invalid,
                "Override references no longer match the pipeline"
            );
        }
        self.events.emit(ReconcileEvent::MergeFetched {
            generation: key.generation,
            invalid_references: invalid,
        });
        self.state.validator.replace(response.invalid);
        self.finish(key, Phase::Resolved);
    }

    fn finish(&mut self, key: &PassKey, phase: Phase) {
        self.state.phase = phase;
        tracing::info!(
            generation = key.generation,
            pipeline = %key.pipeline,
            stages = ?key.stage_ids,
            ?phase,
            "Reconciliation pass resolved"
        );
        self.events.emit(ReconcileEvent::PassResolved {
            generation: key.generation,
        });
    }

    fn fail(&mut self, key: &PassKey, err: &RuninError) {
        tracing::warn!(
            generation = key.generation,
            pipeline = %key.pipeline,
            error = %err,
            "Reconciliation pass failed"
        );
        let error = PassError::from(err);
        self.events.emit(ReconcileEvent::PassFailed {
            generation: key.generation,
            error: error.message.clone(),
            transport: error.transport,
        });
        self.state.phase = Phase::Failed;
        self.state.error = Some(error);
    }
}

/// A fetch task that panicked or was cancelled still completes its pass.
fn handle_join<T>(
    task: &str,
    result: std::result::Result<Result<T>, tokio::task::JoinError>,
) -> Result<T> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(RuninError::Other(format!("{task} task join failure: {err}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalBackend;

    const PIPELINE: &str = r#"
pipeline:
  identifier: shop
  allowStageExecutions: true
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

    async fn orchestrator(inputs: ReconcileInputs) -> Orchestrator {
        let backend = LocalBackend::default();
        backend.insert_pipeline("shop", yaml(PIPELINE)).await;
        Orchestrator::new(Arc::new(backend), inputs, &EngineConfig::default())
    }

    fn inputs() -> ReconcileInputs {
        ReconcileInputs::new("shop", Scope::new("acct")).with_definition(yaml(PIPELINE))
    }

    #[tokio::test]
    async fn starts_idle_and_settles_immediately() {
        let mut orch = orchestrator(inputs()).await;
        assert_eq!(orch.phase(), Phase::Idle);
        let out = orch.settle().await;
        assert_eq!(out.phase, Phase::Idle);
        assert!(!out.is_loading);
    }

    #[tokio::test]
    async fn pass_without_sources_resolves_to_template() {
        let mut orch = orchestrator(inputs()).await;
        orch.recompute();
        assert!(orch.output().is_loading);
        let out = orch.settle().await;
        assert_eq!(out.phase, Phase::Resolved);
        assert_eq!(out.resolved, out.template);
        assert!(out.template.has_placeholder());
        assert!(orch.state().template_ready());
        assert!(orch.state().merge_ready());
    }

    #[tokio::test]
    async fn build_only_selection_has_no_runtime_inputs() {
        let mut orch = orchestrator(inputs()).await;
        orch.on_selection_changed(StageSelection::from_ids(["build"]));
        let out = orch.settle().await;
        assert_eq!(out.phase, Phase::NoRuntimeInputs);
        assert!(out.resolved.is_empty_document());
    }

    #[tokio::test]
    async fn unknown_pipeline_fails_without_transport_flag() {
        let mut orch = orchestrator(ReconcileInputs::new("ghost", Scope::new("acct"))).await;
        orch.recompute();
        let out = orch.settle().await;
        assert_eq!(out.phase, Phase::Failed);
        let error = out.error.unwrap();
        assert!(!error.transport);
        assert!(error.message.contains("ghost"));
    }

    #[tokio::test]
    async fn stale_completion_is_discarded() {
        let mut orch = orchestrator(inputs()).await;
        orch.recompute();
        let stale = orch.current_key().cloned().unwrap();
        orch.recompute();
        let pumped = orch.apply(Completion::Template {
            key: stale,
            result: Ok(Node::empty()),
        });
        assert_eq!(pumped, Pumped::Discarded);
        assert_eq!(orch.phase(), Phase::FetchingTemplate);
        let out = orch.settle().await;
        assert_eq!(out.phase, Phase::Resolved);
    }

    #[tokio::test]
    async fn out_of_phase_completion_is_discarded() {
        let mut orch = orchestrator(inputs()).await;
        orch.recompute();
        let key = orch.current_key().cloned().unwrap();
        let pumped = orch.apply(Completion::Merge {
            key,
            result: Ok(MergeResponse {
                document: Node::empty(),
                invalid: vec![],
            }),
        });
        assert_eq!(pumped, Pumped::Discarded);
        assert_eq!(orch.phase(), Phase::FetchingTemplate);
    }

    struct PanickingSource;

    #[async_trait::async_trait]
    impl TemplateSource for PanickingSource {
        async fn fetch_template(&self, _request: &TemplateRequest) -> Result<Node> {
            panic!("template source crashed");
        }
    }

    #[async_trait::async_trait]
    impl MergeSource for PanickingSource {
        async fn fetch_merge(&self, _request: &MergeRequest) -> Result<MergeResponse> {
            panic!("merge source crashed");
        }
    }

    #[tokio::test]
    async fn panicking_template_source_fails_the_pass() {
        let source = Arc::new(PanickingSource);
        let mut orch =
            Orchestrator::with_sources(source.clone(), source, inputs(), &EngineConfig::default());
        orch.recompute();
        let out = tokio::time::timeout(std::time::Duration::from_secs(5), orch.settle())
            .await
            .expect("pass settles");
        assert_eq!(out.phase, Phase::Failed);
        assert!(!out.is_loading);
        assert!(out.error.unwrap().message.contains("template fetch"));
    }

    #[tokio::test]
    async fn panicking_merge_source_fails_the_pass() {
        let backend = LocalBackend::default();
        backend.insert_pipeline("shop", yaml(PIPELINE)).await;
        let mut orch = Orchestrator::with_sources(
            Arc::new(backend),
            Arc::new(PanickingSource),
            inputs().with_references(["ov1"]),
            &EngineConfig::default(),
        );
        orch.recompute();
        let out = tokio::time::timeout(std::time::Duration::from_secs(5), orch.settle())
            .await
            .expect("pass settles");
        assert_eq!(out.phase, Phase::Failed);
        assert!(out.error.unwrap().message.contains("merge fetch"));
    }

    #[test]
    fn pass_error_keeps_transport_kind() {
        let err = RuninError::Transport {
            endpoint: "merge".into(),
            status: 0,
            message: "connection refused".into(),
        };
        let pass = PassError::from(&err);
        assert!(pass.transport);
        assert!(pass.message.contains("connection refused"));
    }
}
