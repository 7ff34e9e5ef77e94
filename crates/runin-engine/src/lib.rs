//! Runtime-input reconciliation: differ, merger, stage selector, reference
//! validator and the orchestrator that sequences them.
//!
//! This crate turns a pipeline definition, a stage selection, saved override
//! documents and optional rerun/in-progress values into the document of values
//! still to prompt for, while reporting override documents that no longer fit
//! the pipeline.

pub mod config;
pub mod differ;
pub mod events;
pub mod local;
pub mod merger;
pub mod orchestrator;
pub mod references;
pub mod source;
pub mod stages;
pub mod submission;

pub use config::EngineConfig;
pub use differ::{diff, Differ};
pub use events::{EventEmitter, ReconcileEvent};
pub use local::LocalBackend;
pub use merger::{merge, Merger};
pub use orchestrator::{
    Completion, Orchestrator, PassError, PassKey, Phase, Pumped, ReconcileInputs, ReconcileOutput,
    ReconciliationState,
};
pub use references::{validate_reference, ReferenceValidator};
pub use source::{MergeRequest, MergeResponse, MergeSource, TemplateRequest, TemplateSource};
pub use stages::{allows_selective_execution, normalize, restrict, scope, stage_ids};
pub use submission::{check_submission, pending_inputs, PendingInput, SubmissionIssue};
