//! CLI binary for computing templates and reconciling runtime inputs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};

use runin_document::Node;
use runin_engine::{
    check_submission, pending_inputs, restrict, scope, Differ, EngineConfig, LocalBackend,
    Orchestrator, Phase, ReconcileInputs, ReconcileOutput,
};
use runin_remote::{HttpBackend, RemoteConfig};
use runin_types::{GitRef, Scope, StageSelection};

#[derive(Parser)]
#[command(name = "runin", version, about = "Runtime-input reconciliation for pipeline documents")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Engine configuration file (YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the runtime-input template of a pipeline
    Template {
        /// Path to the pipeline YAML file
        pipeline: PathBuf,

        /// Restrict to these stages (repeatable; default: all)
        #[arg(short, long = "stage")]
        stages: Vec<String>,
    },

    /// Reconcile a pipeline offline against local override documents
    Resolve {
        /// Path to the pipeline YAML file
        pipeline: PathBuf,

        /// Override document, lowest precedence first (repeatable)
        #[arg(short, long = "input-set")]
        input_sets: Vec<PathBuf>,

        /// Values of a previous execution
        #[arg(long)]
        rerun: Option<PathBuf>,

        /// In-progress values, highest precedence
        #[arg(long)]
        edits: Option<PathBuf>,

        #[arg(short, long = "stage")]
        stages: Vec<String>,

        /// Print a JSON summary instead of YAML
        #[arg(long)]
        json: bool,
    },

    /// Reconcile against the remote input-set API (RUNIN_* environment)
    Remote {
        /// Pipeline identifier
        #[arg(short, long)]
        pipeline: String,

        #[arg(long)]
        org: Option<String>,

        #[arg(long)]
        project: Option<String>,

        #[arg(long)]
        branch: Option<String>,

        #[arg(long)]
        repo: Option<String>,

        /// Override the RUNIN_BASE_URL endpoint
        #[arg(long)]
        base_url: Option<String>,

        /// Override document identifier (repeatable)
        #[arg(short, long = "input-set")]
        input_sets: Vec<String>,

        #[arg(long)]
        rerun: Option<PathBuf>,

        #[arg(long)]
        edits: Option<PathBuf>,

        #[arg(short, long = "stage")]
        stages: Vec<String>,

        #[arg(long)]
        json: bool,
    },

    /// Check a filled-in document against a pipeline's runtime inputs
    Check {
        /// Path to the pipeline YAML file
        pipeline: PathBuf,

        /// Path to the submitted values
        submitted: PathBuf,

        #[arg(short, long = "stage")]
        stages: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Commands::Template { pipeline, stages } => {
            cmd_template(&config, &pipeline, stages)?;
        }
        Commands::Resolve {
            pipeline,
            input_sets,
            rerun,
            edits,
            stages,
            json,
        } => {
            let out = cmd_resolve(
                &config,
                &pipeline,
                &input_sets,
                rerun.as_deref(),
                edits.as_deref(),
                stages,
            )
            .await?;
            print_output(&out, json)?;
            exit_on_failure(&out);
        }
        Commands::Remote {
            pipeline,
            org,
            project,
            branch,
            repo,
            base_url,
            input_sets,
            rerun,
            edits,
            stages,
            json,
        } => {
            let mut remote = RemoteConfig::from_env()?;
            if let Some(url) = base_url {
                remote.base_url = url;
            }
            let scope = Scope {
                account: remote.account.clone(),
                org,
                project,
            };
            let mut inputs = ReconcileInputs::new(pipeline, scope)
                .with_git(GitRef { repo, branch })
                .with_selection(StageSelection::from_ids(stages))
                .with_references(input_sets.iter().map(String::as_str));
            if let Some(path) = rerun {
                inputs = inputs.with_rerun(load_document(&path)?);
            }
            if let Some(path) = edits {
                inputs = inputs.with_edits(load_document(&path)?);
            }
            let backend = Arc::new(HttpBackend::new(remote)?);
            let out = run_pass(Orchestrator::new(backend, inputs, &config)).await;
            print_output(&out, json)?;
            exit_on_failure(&out);
        }
        Commands::Check {
            pipeline,
            submitted,
            stages,
        } => {
            cmd_check(&config, &pipeline, &submitted, stages)?;
        }
    }

    Ok(())
}

fn load_document(path: &Path) -> anyhow::Result<Node> {
    let source = std::fs::read_to_string(path)?;
    Ok(Node::from_yaml_str(&source)?)
}

/// The pipeline's own identifier, else the file stem.
fn pipeline_identifier(document: &Node, path: &Path) -> String {
    document
        .field("pipeline")
        .and_then(|p| p.field("identifier"))
        .and_then(Node::as_str)
        .map(String::from)
        .unwrap_or_else(|| file_identifier(path))
}

/// Override documents are referenced by file stem.
fn file_identifier(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn scoped_template(config: &EngineConfig, pipeline: &Node, stages: Vec<String>) -> Node {
    let stage_ids = scope(pipeline, &StageSelection::from_ids(stages));
    Differ::from_config(config).diff(&restrict(pipeline, &stage_ids))
}

fn cmd_template(config: &EngineConfig, path: &Path, stages: Vec<String>) -> anyhow::Result<()> {
    let pipeline = load_document(path)?;
    let template = scoped_template(config, &pipeline, stages);
    if !template.has_placeholder() {
        println!("# pipeline has no runtime inputs");
        return Ok(());
    }
    print!("{}", template.to_yaml_string()?);
    Ok(())
}

async fn cmd_resolve(
    config: &EngineConfig,
    path: &Path,
    input_sets: &[PathBuf],
    rerun: Option<&Path>,
    edits: Option<&Path>,
    stages: Vec<String>,
) -> anyhow::Result<ReconcileOutput> {
    let pipeline = load_document(path)?;
    let identifier = pipeline_identifier(&pipeline, path);

    let backend = LocalBackend::new(config);
    backend.insert_pipeline(identifier.clone(), pipeline.clone()).await;
    let mut references = Vec::with_capacity(input_sets.len());
    for input_set in input_sets {
        let id = file_identifier(input_set);
        backend.insert_override(id.clone(), load_document(input_set)?).await;
        references.push(id);
    }

    let mut inputs = ReconcileInputs::new(identifier, Scope::default())
        .with_definition(pipeline)
        .with_selection(StageSelection::from_ids(stages))
        .with_references(references.iter().map(String::as_str));
    if let Some(path) = rerun {
        inputs = inputs.with_rerun(load_document(path)?);
    }
    if let Some(path) = edits {
        inputs = inputs.with_edits(load_document(path)?);
    }

    Ok(run_pass(Orchestrator::new(Arc::new(backend), inputs, config)).await)
}

async fn run_pass(mut orchestrator: Orchestrator) -> ReconcileOutput {
    orchestrator.recompute();
    let out = orchestrator.settle().await;
    for id in &out.invalid_references {
        for error in orchestrator.reference_errors(id).unwrap_or_default() {
            tracing::warn!(reference = %id, path = %error.path, "{}", error.message);
        }
    }
    out
}

fn print_output(out: &ReconcileOutput, json: bool) -> anyhow::Result<()> {
    let pending = pending_inputs(&out.resolved);
    if json {
        let summary = serde_json::json!({
            "phase": out.phase,
            "resolved": out.resolved.to_json()?,
            "pending": pending,
            "invalidReferences": out.invalid_references,
            "error": out.error,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    match out.phase {
        Phase::Failed => {
            if let Some(error) = &out.error {
                eprintln!("Reconciliation failed: {}", error.message);
            }
            return Ok(());
        }
        Phase::NoRuntimeInputs => println!("# pipeline has no runtime inputs"),
        _ => print!("{}", out.resolved.to_yaml_string()?),
    }
    if !pending.is_empty() {
        eprintln!("\nPending inputs:");
        for input in &pending {
            eprintln!("  {} = {}", input.path, input.input);
        }
    }
    if !out.invalid_references.is_empty() {
        eprintln!("\nInvalid input sets:");
        for id in &out.invalid_references {
            eprintln!("  {id}");
        }
    }
    Ok(())
}

fn exit_on_failure(out: &ReconcileOutput) {
    if out.phase == Phase::Failed {
        std::process::exit(1);
    }
}

fn cmd_check(
    config: &EngineConfig,
    pipeline: &Path,
    submitted: &Path,
    stages: Vec<String>,
) -> anyhow::Result<()> {
    let template = scoped_template(config, &load_document(pipeline)?, stages);
    let issues = check_submission(&template, &load_document(submitted)?);
    if issues.is_empty() {
        println!("Submission is complete");
        return Ok(());
    }
    for issue in &issues {
        println!("[{}] {}", issue_kind(issue), describe(issue));
    }
    std::process::exit(1);
}

fn issue_kind(issue: &runin_engine::SubmissionIssue) -> &'static str {
    use runin_engine::SubmissionIssue::*;
    match issue {
        Missing { .. } => "MISSING",
        NotAllowed { .. } => "NOT_ALLOWED",
        PatternMismatch { .. } => "PATTERN",
    }
}

fn describe(issue: &runin_engine::SubmissionIssue) -> String {
    use runin_engine::SubmissionIssue::*;
    match issue {
        Missing { path } => format!("{path}: no value supplied"),
        NotAllowed {
            path,
            value,
            allowed,
        } => format!("{path}: '{value}' is not one of {}", allowed.join(", ")),
        PatternMismatch {
            path,
            value,
            pattern,
        } => format!("{path}: '{value}' does not match {pattern}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    const PIPELINE: &str = r#"
pipeline:
  identifier: shop
  allowStageExecutions: true
  stages:
    - stage: {identifier: build, spec: {image: rust}}
    - stage: {identifier: deploy, spec: {namespace: <+input>, region: <+input>}}
"#;

    #[test]
    fn cli_parses_repeated_flags() {
        let cli = Cli::parse_from([
            "runin", "resolve", "p.yaml", "-i", "a.yaml", "-i", "b.yaml", "--stage", "deploy", "-v",
        ]);
        assert!(cli.verbose);
        match cli.command {
            Commands::Resolve {
                input_sets, stages, ..
            } => {
                assert_eq!(input_sets, vec![PathBuf::from("a.yaml"), PathBuf::from("b.yaml")]);
                assert_eq!(stages, vec!["deploy".to_string()]);
            }
            _ => panic!("expected resolve"),
        }
    }

    #[test]
    fn identifiers_come_from_document_or_file_stem() {
        let doc = Node::from_yaml_str(PIPELINE).unwrap();
        assert_eq!(pipeline_identifier(&doc, Path::new("x/other.yaml")), "shop");
        assert_eq!(
            pipeline_identifier(&Node::empty(), Path::new("x/other.yaml")),
            "other"
        );
        assert_eq!(file_identifier(Path::new("sets/prod.yaml")), "prod");
    }

    #[test]
    fn build_only_template_is_empty() {
        let doc = Node::from_yaml_str(PIPELINE).unwrap();
        let template = scoped_template(&EngineConfig::default(), &doc, vec!["build".into()]);
        assert!(!template.has_placeholder());
    }

    #[tokio::test]
    async fn resolve_merges_local_input_sets() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = write(&dir, "pipeline.yaml", PIPELINE);
        let prod = write(
            &dir,
            "prod.yaml",
            "pipeline:\n  stages:\n    - stage: {identifier: deploy, spec: {namespace: prod}}\n",
        );
        let stale = write(
            &dir,
            "stale.yaml",
            "pipeline:\n  stages:\n    - stage: {identifier: deploy, spec: {zone: a}}\n",
        );

        let out = cmd_resolve(
            &EngineConfig::default(),
            &pipeline,
            &[prod, stale],
            None,
            None,
            vec![],
        )
        .await
        .unwrap();

        assert_eq!(out.phase, Phase::Resolved);
        assert!(out.resolved.to_yaml_string().unwrap().contains("namespace: prod"));
        assert!(out.invalid_references.contains("stale"));
        let pending: Vec<String> = pending_inputs(&out.resolved).into_iter().map(|p| p.path).collect();
        assert_eq!(pending, vec!["pipeline.stages[deploy].stage.spec.region".to_string()]);
    }
}
