//! Stage selector: maps a [`StageSelection`] onto the stages of a pipeline.
//!
//! Stages live under `pipeline.stages` (or a top-level `stages` list) as
//! `{stage: {identifier: ..}}` elements or `{parallel: [..]}` groups of them.

use runin_document::{Node, PARALLEL_KEY};
use runin_types::StageSelection;

const STAGE_KEY: &str = "stage";
const ALLOW_SELECTIVE_KEY: &str = "allowStageExecutions";

fn pipeline_body(pipeline: &Node) -> &Node {
    pipeline.field("pipeline").unwrap_or(pipeline)
}

fn stage_id(element: &Node) -> Option<&str> {
    element.field(STAGE_KEY)?.field("identifier")?.as_str()
}

/// Every stage identifier in pipeline order, parallel groups flattened.
pub fn stage_ids(pipeline: &Node) -> Vec<String> {
    let Some(stages) = pipeline_body(pipeline).field("stages").and_then(Node::as_items) else {
        return Vec::new();
    };
    let mut ids = Vec::new();
    for element in stages {
        if let Some(id) = stage_id(element) {
            ids.push(id.to_string());
        } else if let Some(group) = element.field(PARALLEL_KEY).and_then(Node::as_items) {
            ids.extend(group.iter().filter_map(stage_id).map(String::from));
        }
    }
    ids
}

/// Whether the pipeline permits running a subset of its stages.
pub fn allows_selective_execution(pipeline: &Node) -> bool {
    matches!(
        pipeline_body(pipeline).field(ALLOW_SELECTIVE_KEY),
        Some(Node::Scalar(runin_document::Scalar::Bool(true)))
    )
}

/// Force [`StageSelection::All`] when the pipeline disallows selective execution.
pub fn normalize(pipeline: &Node, selection: &StageSelection) -> StageSelection {
    if allows_selective_execution(pipeline) {
        selection.clone()
    } else {
        StageSelection::All
    }
}

/// The stage identifiers a pass runs against, in pipeline order.
///
/// Identifiers the pipeline does not contain are ignored. If nothing in an
/// explicit selection survives, the whole pipeline is in scope.
pub fn scope(pipeline: &Node, selection: &StageSelection) -> Vec<String> {
    let all = stage_ids(pipeline);
    match normalize(pipeline, selection) {
        StageSelection::All => all,
        StageSelection::Only(selected) => {
            let picked: Vec<String> = all
                .iter()
                .filter(|id| selected.contains(id))
                .cloned()
                .collect();
            if picked.is_empty() {
                tracing::debug!(?selected, "No selected stage exists in pipeline, using all stages");
                all
            } else {
                picked
            }
        }
    }
}

/// A copy of `pipeline` keeping only the stages in `stage_ids`.
///
/// Parallel groups left empty are removed; everything outside the stage list
/// is untouched. An empty `stage_ids` keeps every stage.
pub fn restrict(pipeline: &Node, stage_ids: &[String]) -> Node {
    let mut out = pipeline.clone();
    if stage_ids.is_empty() {
        return out;
    }
    let keep = |element: &Node| stage_id(element).is_some_and(|id| stage_ids.iter().any(|s| s == id));

    let body = if out.field("pipeline").is_some() {
        out.as_fields_mut().and_then(|f| f.get_mut("pipeline"))
    } else {
        Some(&mut out)
    };
    let Some(Node::List(stages)) = body
        .and_then(Node::as_fields_mut)
        .and_then(|f| f.get_mut("stages"))
    else {
        return out;
    };

    let mut retained = Vec::with_capacity(stages.len());
    for element in stages.drain(..) {
        if stage_id(&element).is_some() {
            if keep(&element) {
                retained.push(element);
            }
            continue;
        }
        match element {
            Node::Subtree(mut fields) => {
                if let Some(Node::ParallelGroup(members)) = fields.get_mut(PARALLEL_KEY) {
                    members.retain(|m| keep(m));
                    if members.is_empty() {
                        continue;
                    }
                }
                retained.push(Node::Subtree(fields));
            }
            other => retained.push(other),
        }
    }
    *stages = retained;
    out
}
