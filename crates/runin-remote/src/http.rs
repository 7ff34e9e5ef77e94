//! HTTP adapter for a remote pipeline service.
//!
//! Templates and merges are fetched with `POST` requests; scope identifiers
//! travel as query parameters and documents as YAML strings inside JSON.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use runin_document::Node;
use runin_engine::{MergeRequest, MergeResponse, MergeSource, TemplateRequest, TemplateSource};
use runin_types::{FieldError, GitRef, InvalidReference, Result, RuninError, Scope};

use crate::config::RemoteConfig;

const TEMPLATE_PATH: &str = "/pipeline/api/inputSets/template";
const MERGE_PATH: &str = "/pipeline/api/inputSets/merge";

// ---------------------------------------------------------------------------
// HttpBackend
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    config: RemoteConfig,
}

impl HttpBackend {
    pub fn new(config: RemoteConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RuninError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(RemoteConfig::from_env()?)
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    async fn post(
        &self,
        path: &str,
        pipeline: &str,
        scope: &Scope,
        git: &GitRef,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let endpoint = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);
        tracing::debug!(endpoint = %endpoint, pipeline = %pipeline, "POST");

        let resp = self
            .client
            .post(&endpoint)
            .header("x-api-key", &self.config.api_key)
            .query(&query_params(&self.config.account, pipeline, scope, git))
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(&endpoint, e))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| transport_error(&endpoint, e))?;

        if !status.is_success() {
            return Err(map_error(status, &text));
        }

        serde_json::from_str(&text).map_err(|e| RuninError::Decode {
            format: "json".into(),
            message: format!("invalid response from {endpoint}: {e}"),
        })
    }
}

// ---------------------------------------------------------------------------
// Request translation
// ---------------------------------------------------------------------------

/// Scope and git pointer travel as query parameters. The request scope's
/// account wins over the configured default when set.
fn query_params(account: &str, pipeline: &str, scope: &Scope, git: &GitRef) -> Vec<(&'static str, String)> {
    let account = if scope.account.is_empty() {
        account
    } else {
        scope.account.as_str()
    };
    let mut params = vec![
        ("accountIdentifier", account.to_string()),
        ("pipelineIdentifier", pipeline.to_string()),
    ];
    if let Some(org) = &scope.org {
        params.push(("orgIdentifier", org.clone()));
    }
    if let Some(project) = &scope.project {
        params.push(("projectIdentifier", project.clone()));
    }
    if let Some(branch) = &git.branch {
        params.push(("branch", branch.clone()));
    }
    if let Some(repo) = &git.repo {
        params.push(("repoIdentifier", repo.clone()));
    }
    params
}

fn build_template_body(request: &TemplateRequest) -> serde_json::Value {
    json!({ "stageIdentifiers": request.stage_ids })
}

fn build_merge_body(request: &MergeRequest) -> Result<serde_json::Value> {
    let references: Vec<&str> = request
        .references
        .iter()
        .map(|r| r.identifier.as_str())
        .collect();
    let mut body = json!({
        "inputSetReferences": references,
        "stageIdentifiers": request.stage_ids,
    });
    let git_details: Vec<serde_json::Value> = request
        .references
        .iter()
        .filter_map(|r| {
            let git = r.git.as_ref()?;
            Some(json!({
                "identifier": r.identifier,
                "repoIdentifier": git.repo,
                "branch": git.branch,
            }))
        })
        .collect();
    if !git_details.is_empty() {
        body["inputSetGitDetails"] = json!(git_details);
    }
    if let Some(last) = &request.last_document {
        body["lastYamlToMerge"] = json!(last.to_yaml_string()?);
    }
    Ok(body)
}

// ---------------------------------------------------------------------------
// Response translation
// ---------------------------------------------------------------------------

/// Decode the YAML string at `data.<field>`. Missing or blank is the empty
/// document.
fn yaml_field(json: &serde_json::Value, field: &str) -> Result<Node> {
    match &json["data"][field] {
        serde_json::Value::Null => Ok(Node::empty()),
        serde_json::Value::String(text) => Node::from_yaml_str(text),
        other => Err(RuninError::Decode {
            format: "json".into(),
            message: format!("data.{field} is not a string: {other}"),
        }),
    }
}

fn parse_template_response(json: &serde_json::Value) -> Result<Node> {
    yaml_field(json, "inputSetTemplateYaml")
}

fn parse_merge_response(json: &serde_json::Value) -> Result<MergeResponse> {
    let document = yaml_field(json, "pipelineYaml")?;
    let mut invalid = Vec::new();
    if let Some(map) = json["data"]["inputSetErrorWrapper"]["uuidToErrorResponseMap"].as_object() {
        for (identifier, entry) in map {
            let errors: Vec<FieldError> = entry["errors"]
                .as_array()
                .map(|errors| errors.iter().map(parse_field_error).collect())
                .unwrap_or_default();
            invalid.push(InvalidReference {
                identifier: identifier.clone(),
                errors,
            });
        }
    }
    Ok(MergeResponse { document, invalid })
}

fn parse_field_error(value: &serde_json::Value) -> FieldError {
    let path = value["fieldName"]
        .as_str()
        .or_else(|| value["path"].as_str())
        .unwrap_or("<root>");
    let message = value["message"].as_str().unwrap_or("invalid field");
    FieldError::new(path, message)
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn transport_error(endpoint: &str, err: reqwest::Error) -> RuninError {
    RuninError::Transport {
        endpoint: endpoint.to_string(),
        status: err.status().map(|s| s.as_u16()).unwrap_or(0),
        message: err.to_string(),
    }
}

fn map_error(status: reqwest::StatusCode, body: &str) -> RuninError {
    RuninError::Backend {
        status: status.as_u16(),
        message: extract_error_message(body),
    }
}

fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["message"].as_str().map(String::from))
        .unwrap_or_else(|| body.to_string())
}

// ---------------------------------------------------------------------------
// Collaborator implementations
// ---------------------------------------------------------------------------

#[async_trait]
impl TemplateSource for HttpBackend {
    async fn fetch_template(&self, request: &TemplateRequest) -> Result<Node> {
        let json = self
            .post(
                TEMPLATE_PATH,
                &request.pipeline,
                &request.scope,
                &request.git,
                &build_template_body(request),
            )
            .await?;
        parse_template_response(&json)
    }
}

#[async_trait]
impl MergeSource for HttpBackend {
    async fn fetch_merge(&self, request: &MergeRequest) -> Result<MergeResponse> {
        let body = build_merge_body(request)?;
        let json = self
            .post(MERGE_PATH, &request.pipeline, &request.scope, &request.git, &body)
            .await?;
        let response = parse_merge_response(&json)?;
        if !response.invalid.is_empty() {
            tracing::debug!(
                pipeline = %request.pipeline,
                invalid = response.invalid.len(),
                "Merge reported invalid references"
            );
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runin_types::OverrideReference;

    fn merge_request(last: Option<Node>) -> MergeRequest {
        MergeRequest {
            pipeline: "shop".into(),
            scope: Scope::new("acct").with_org("default").with_project("web"),
            git: GitRef::default(),
            stage_ids: vec!["deploy".into()],
            references: vec![OverrideReference::new("ov1"), OverrideReference::new("ov2")],
            last_document: last,
        }
    }

    #[test]
    fn template_body_lists_stage_identifiers() {
        let body = build_template_body(&TemplateRequest {
            pipeline: "shop".into(),
            scope: Scope::new("acct"),
            git: GitRef::default(),
            stage_ids: vec!["build".into(), "deploy".into()],
        });
        assert_eq!(body, json!({ "stageIdentifiers": ["build", "deploy"] }));
    }

    #[test]
    fn merge_body_carries_references_in_order() {
        let body = build_merge_body(&merge_request(None)).unwrap();
        assert_eq!(body["inputSetReferences"], json!(["ov1", "ov2"]));
        assert_eq!(body["stageIdentifiers"], json!(["deploy"]));
        assert!(body.get("lastYamlToMerge").is_none());
        assert!(body.get("inputSetGitDetails").is_none());
    }

    #[test]
    fn merge_body_carries_reference_git_scope() {
        let mut request = merge_request(None);
        request.references[1] = OverrideReference::new("ov2").with_git(GitRef {
            repo: Some("overrides".into()),
            branch: Some("release".into()),
        });
        let body = build_merge_body(&request).unwrap();
        assert_eq!(body["inputSetReferences"], json!(["ov1", "ov2"]));
        assert_eq!(
            body["inputSetGitDetails"],
            json!([{"identifier": "ov2", "repoIdentifier": "overrides", "branch": "release"}])
        );
    }

    #[test]
    fn merge_body_serializes_last_document_as_yaml() {
        let last = Node::from_yaml_str("deploy:\n  namespace: qa\n").unwrap();
        let body = build_merge_body(&merge_request(Some(last))).unwrap();
        let text = body["lastYamlToMerge"].as_str().unwrap();
        assert!(text.contains("namespace: qa"));
    }

    #[test]
    fn query_params_include_scope_and_git() {
        let scope = Scope::new("acct").with_org("default").with_project("web");
        let git = GitRef {
            repo: Some("infra".into()),
            branch: Some("main".into()),
        };
        let params = query_params("fallback", "shop", &scope, &git);
        let keys: Vec<&str> = params.iter().map(|(k, _)| *k).collect();
        assert_eq!(
            keys,
            vec![
                "accountIdentifier",
                "pipelineIdentifier",
                "orgIdentifier",
                "projectIdentifier",
                "branch",
                "repoIdentifier"
            ]
        );
        assert_eq!(params[0].1, "acct");
    }

    #[test]
    fn query_params_fall_back_to_configured_account() {
        let params = query_params("fallback", "shop", &Scope::default(), &GitRef::default());
        assert_eq!(params[0], ("accountIdentifier", "fallback".to_string()));
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn parse_template_with_inputs() {
        let json = json!({
            "status": "SUCCESS",
            "data": { "inputSetTemplateYaml": "pipeline:\n  identifier: shop\n  variables:\n    - name: env\n      value: <+input>\n" }
        });
        let template = parse_template_response(&json).unwrap();
        assert!(template.has_placeholder());
    }

    #[test]
    fn parse_template_without_inputs_is_empty() {
        let json = json!({ "status": "SUCCESS", "data": {} });
        assert!(parse_template_response(&json).unwrap().is_empty_document());
        let json = json!({ "data": { "inputSetTemplateYaml": "" } });
        assert!(parse_template_response(&json).unwrap().is_empty_document());
    }

    #[test]
    fn parse_merge_with_error_wrapper() {
        let json = json!({
            "status": "SUCCESS",
            "data": {
                "pipelineYaml": "pipeline:\n  identifier: shop\n",
                "errorResponse": true,
                "inputSetErrorWrapper": {
                    "uuidToErrorResponseMap": {
                        "ov2": {
                            "errors": [
                                { "fieldName": "pipeline.stages[deploy].stage.spec.region", "message": "field not found" }
                            ]
                        }
                    }
                }
            }
        });
        let response = parse_merge_response(&json).unwrap();
        assert_eq!(response.invalid.len(), 1);
        assert_eq!(response.invalid[0].identifier, "ov2");
        assert_eq!(response.invalid[0].errors[0].message, "field not found");
        assert!(response.document.field("pipeline").is_some());
    }

    #[test]
    fn non_string_yaml_field_is_a_decode_error() {
        let json = json!({ "data": { "pipelineYaml": 42 } });
        let err = parse_merge_response(&json).unwrap_err();
        assert!(matches!(err, RuninError::Decode { .. }));
    }

    #[test]
    fn backend_error_extracts_message() {
        let err = map_error(
            reqwest::StatusCode::NOT_FOUND,
            r#"{"status":"ERROR","code":"ENTITY_NOT_FOUND","message":"Pipeline shop not found"}"#,
        );
        match err {
            RuninError::Backend { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "Pipeline shop not found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(map_error(reqwest::StatusCode::BAD_GATEWAY, "bad gateway").is_transport());
    }

    #[tokio::test]
    async fn unreachable_server_is_a_transport_error() {
        let backend =
            HttpBackend::new(RemoteConfig::new("acct", "key").with_base_url("http://127.0.0.1:9")).unwrap();
        let err = backend
            .fetch_template(&TemplateRequest {
                pipeline: "shop".into(),
                scope: Scope::new("acct"),
                git: GitRef::default(),
                stage_ids: vec![],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RuninError::Transport { .. }));
    }
}
