//! Galaxy REST implementation of the execution service
//!
//! Sessions map to histories, artifacts to datasets. Every request carries
//! the API key in the `x-api-key` header.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;

use crate::common::{Error, Result};

use super::{
    ArtifactHandle, ExecutionService, InputBindings, InvocationHandle, InvocationState,
    OutputArtifact, ParamBindings, SessionHandle, ToolInfo, WorkflowHandle,
};

/// Dataset states that will never turn into `ok`
const FAILED_DATASET_STATES: &[&str] = &["error", "failed_metadata", "discarded", "deferred"];

/// Client for a Galaxy server
pub struct GalaxyClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Deserialize)]
struct HistoryResponse {
    id: String,
    name: String,
}

#[derive(Deserialize)]
struct UploadResponse {
    outputs: Vec<IdResponse>,
}

#[derive(Deserialize)]
struct ToolResponse {
    id: String,
    #[serde(default)]
    version: Option<String>,
}

#[derive(Deserialize)]
struct InvocationResponse {
    state: String,
    history_id: String,
    #[serde(default)]
    outputs: BTreeMap<String, IdResponse>,
}

#[derive(Deserialize)]
struct DatasetResponse {
    state: String,
}

impl GalaxyClient {
    /// Create a client for the server at `url`
    pub fn new(url: &str, api_key: &str) -> Result<Self> {
        if url.trim().is_empty() {
            return Err(Error::Config("Galaxy URL is empty".to_string()));
        }
        let http = reqwest::Client::builder()
            .user_agent("workflow-tester")
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, self.url(path))
            .header("x-api-key", &self.api_key)
    }

    async fn send(&self, operation: &str, request: RequestBuilder) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::remote(operation, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::remote(
                operation,
                format!("HTTP {}: {}", status, body.trim()),
            ));
        }
        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: RequestBuilder,
    ) -> Result<T> {
        self.send(operation, request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| Error::remote(operation, format!("Invalid response: {}", e)))
    }

    async fn dataset_state(&self, artifact: &str) -> Result<String> {
        let dataset: DatasetResponse = self
            .send_json(
                "dataset_state",
                self.request(Method::GET, &format!("datasets/{}", artifact)),
            )
            .await?;
        Ok(dataset.state)
    }
}

/// Build the `inputs` payload of an invocation request
fn invocation_inputs(inputs: &InputBindings) -> Value {
    let mut payload = serde_json::Map::new();
    for (label, artifacts) in inputs {
        let refs: Vec<Value> = artifacts
            .iter()
            .map(|a| json!({ "src": "hda", "id": a.id() }))
            .collect();
        let value = match refs.len() {
            1 => refs.into_iter().next().unwrap_or(Value::Null),
            _ => json!({ "batch": false, "values": refs }),
        };
        payload.insert(label.clone(), value);
    }
    Value::Object(payload)
}

#[async_trait]
impl ExecutionService for GalaxyClient {
    async fn create_session(&self, name: &str) -> Result<SessionHandle> {
        let history: HistoryResponse = self
            .send_json(
                "create_session",
                self.request(Method::POST, "histories")
                    .json(&json!({ "name": name })),
            )
            .await?;
        tracing::debug!("Created history '{}' (id: {})", history.name, history.id);
        Ok(SessionHandle {
            id: history.id,
            name: history.name,
        })
    }

    async fn upload_artifact(
        &self,
        session: &SessionHandle,
        local_path: &Path,
        type_hint: Option<&str>,
    ) -> Result<ArtifactHandle> {
        let data = tokio::fs::read(local_path).await?;
        let file_name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());

        let inputs = json!({
            "files_0|type": "upload_dataset",
            "files_0|NAME": file_name,
            "file_type": type_hint.unwrap_or("auto"),
            "dbkey": "?",
        });
        let form = reqwest::multipart::Form::new()
            .text("tool_id", "upload1")
            .text("history_id", session.id.clone())
            .text("inputs", inputs.to_string())
            .part(
                "files_0|file_data",
                reqwest::multipart::Part::bytes(data).file_name(file_name),
            );

        let upload: UploadResponse = self
            .send_json(
                "upload_artifact",
                self.request(Method::POST, "tools").multipart(form),
            )
            .await?;

        upload
            .outputs
            .into_iter()
            .next()
            .map(|o| ArtifactHandle::new(o.id))
            .ok_or_else(|| Error::remote("upload_artifact", "no dataset created"))
    }

    async fn import_workflow(&self, definition: &Value, name: &str) -> Result<WorkflowHandle> {
        let mut definition = definition.clone();
        if let Some(obj) = definition.as_object_mut() {
            obj.insert("name".to_string(), Value::String(name.to_string()));
        }

        let imported: IdResponse = self
            .send_json(
                "import_workflow",
                self.request(Method::POST, "workflows")
                    .json(&json!({ "workflow": definition })),
            )
            .await?;
        Ok(WorkflowHandle::new(imported.id))
    }

    async fn invoke(
        &self,
        workflow: &WorkflowHandle,
        inputs: &InputBindings,
        session: &SessionHandle,
        params: &ParamBindings,
    ) -> Result<InvocationHandle> {
        let body = json!({
            "history_id": session.id,
            "inputs": invocation_inputs(inputs),
            "inputs_by": "name",
            "parameters": params,
            "parameters_normalized": false,
        });

        let invocation: IdResponse = self
            .send_json(
                "invoke",
                self.request(Method::POST, &format!("workflows/{}/invocations", workflow))
                    .json(&body),
            )
            .await?;
        Ok(InvocationHandle::new(invocation.id))
    }

    async fn invocation_state(&self, invocation: &InvocationHandle) -> Result<InvocationState> {
        let info: InvocationResponse = self
            .send_json(
                "invocation_state",
                self.request(Method::GET, &format!("invocations/{}", invocation)),
            )
            .await?;

        match info.state.as_str() {
            "failed" | "cancelled" | "cancelling" => {
                return Ok(InvocationState::Failed(format!(
                    "invocation {} is {}",
                    invocation, info.state
                )))
            }
            "scheduled" => {}
            _ => return Ok(InvocationState::Running),
        }

        // Scheduled only means the jobs exist; wait for the datasets themselves
        for (name, output) in &info.outputs {
            let state = self.dataset_state(&output.id).await?;
            if FAILED_DATASET_STATES.contains(&state.as_str()) {
                return Ok(InvocationState::Failed(format!(
                    "output '{}' (dataset {}) is in state '{}'",
                    name, output.id, state
                )));
            }
            if state != "ok" {
                return Ok(InvocationState::Running);
            }
        }

        let history: HistoryResponse = self
            .send_json(
                "invocation_state",
                self.request(Method::GET, &format!("histories/{}", info.history_id)),
            )
            .await?;

        Ok(InvocationState::Completed {
            outputs: info
                .outputs
                .into_iter()
                .map(|(name, output)| OutputArtifact {
                    name,
                    artifact: ArtifactHandle::new(output.id),
                })
                .collect(),
            session: SessionHandle {
                id: history.id,
                name: history.name,
            },
        })
    }

    async fn download_artifact(&self, artifact: &ArtifactHandle, dest: &Path) -> Result<()> {
        let response = self
            .send(
                "download_artifact",
                self.request(Method::GET, &format!("datasets/{}/display", artifact)),
            )
            .await?;

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::remote("download_artifact", e))?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<ToolInfo>> {
        let tools: Vec<ToolResponse> = self
            .send_json(
                "list_tools",
                self.request(Method::GET, "tools").query(&[("in_panel", "false")]),
            )
            .await?;
        Ok(tools
            .into_iter()
            .map(|t| ToolInfo {
                id: t.id,
                version: t.version.unwrap_or_default(),
            })
            .collect())
    }

    async fn delete_session(&self, session: &SessionHandle) -> Result<()> {
        self.send(
            "delete_session",
            self.request(Method::DELETE, &format!("histories/{}", session.id))
                .json(&json!({ "purge": true })),
        )
        .await?;
        Ok(())
    }

    async fn delete_workflow(&self, workflow: &WorkflowHandle) -> Result<()> {
        self.send(
            "delete_workflow",
            self.request(Method::DELETE, &format!("workflows/{}", workflow)),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_strips_trailing_slash() {
        let client = GalaxyClient::new("http://localhost:8080/", "key").unwrap();
        assert_eq!(client.url("histories"), "http://localhost:8080/api/histories");
    }

    #[test]
    fn test_empty_url_is_config_error() {
        let err = GalaxyClient::new("  ", "key").err().unwrap();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_single_and_multiple_input_payloads() {
        let mut inputs = InputBindings::new();
        inputs.insert("single".into(), vec![ArtifactHandle::new("a1")]);
        inputs.insert(
            "many".into(),
            vec![ArtifactHandle::new("b1"), ArtifactHandle::new("b2")],
        );

        let payload = invocation_inputs(&inputs);
        assert_eq!(payload["single"], json!({ "src": "hda", "id": "a1" }));
        assert_eq!(payload["many"]["values"][1]["id"], "b2");
        assert_eq!(payload["many"]["batch"], false);
    }

    #[test]
    fn test_parse_invocation_response() {
        let info: InvocationResponse = serde_json::from_value(json!({
            "id": "inv1",
            "state": "scheduled",
            "history_id": "h1",
            "outputs": { "out": { "id": "d1", "src": "hda" } }
        }))
        .unwrap();
        assert_eq!(info.state, "scheduled");
        assert_eq!(info.outputs["out"].id, "d1");
    }

    #[test]
    fn test_parse_tool_without_version() {
        let tools: Vec<ToolResponse> =
            serde_json::from_value(json!([{ "id": "cat1" }, { "id": "sort1", "version": "1.2.0" }]))
                .unwrap();
        assert!(tools[0].version.is_none());
        assert_eq!(tools[1].version.as_deref(), Some("1.2.0"));
    }
}
