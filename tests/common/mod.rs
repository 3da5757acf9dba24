//! Shared helpers for the integration tests
//!
//! `FakeService` is an in-memory execution service: every workflow output
//! echoes the content uploaded for one input label, unless a test replaces
//! it. Every call is recorded so tests can check what reached the service.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;

use wftester::service::{
    ArtifactHandle, ExecutionService, InputBindings, InvocationHandle, InvocationState,
    OutputArtifact, ParamBindings, PollSettings, SessionHandle, ToolInfo, WorkflowHandle,
};
use wftester::testing::{RunContext, TestCaseSpec};
use wftester::{Error, Result};

pub const INPUT_LABEL: &str = "InputText";
pub const OUTPUT_NAME: &str = "OutputText";
pub const INPUT_CONTENT: &str = "hello\nworld\n";

#[derive(Default)]
struct State {
    next_id: usize,
    sessions: BTreeSet<String>,
    workflows: BTreeMap<String, String>,
    artifacts: BTreeMap<String, Vec<u8>>,
    invocations: BTreeMap<String, Invocation>,
    calls: Vec<String>,
}

impl State {
    fn id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}{}", prefix, self.next_id)
    }
}

struct Invocation {
    session: SessionHandle,
    outputs: Vec<OutputArtifact>,
    polls_left: usize,
}

/// How the fake behaves
#[derive(Clone, Default)]
pub struct Behaviour {
    /// Installed tools
    pub tools: Vec<ToolInfo>,
    /// Output name -> input label it echoes
    pub outputs: Vec<(String, String)>,
    /// Output name -> content replacing the echo
    pub content_overrides: BTreeMap<String, String>,
    /// `Running` answers before completion
    pub running_polls: usize,
    /// Report every invocation as failed
    pub fail_invocation: Option<String>,
    /// Never leave the running state
    pub never_finish: bool,
    /// Reject every upload with this message
    pub fail_upload: Option<String>,
    /// Write part of the file, then fail every download with this message
    pub fail_download: Option<String>,
}

pub struct FakeService {
    behaviour: Behaviour,
    state: Mutex<State>,
}

impl FakeService {
    pub fn new(behaviour: Behaviour) -> Self {
        Self {
            behaviour,
            state: Mutex::new(State::default()),
        }
    }

    /// Tools and outputs matching [`TestContext::write_workflow`]
    pub fn echo() -> Self {
        Self::new(echo_behaviour())
    }

    fn record(&self, call: String) -> std::sync::MutexGuard<'_, State> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        state
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Number of recorded calls of one operation
    pub fn count(&self, operation: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.split(':').next() == Some(operation))
            .count()
    }

    pub fn live_sessions(&self) -> usize {
        self.state.lock().unwrap().sessions.len()
    }

    pub fn live_workflows(&self) -> usize {
        self.state.lock().unwrap().workflows.len()
    }

    /// Names of the sessions created so far
    pub fn session_names(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|c| c.strip_prefix("create_session:").map(str::to_string))
            .collect()
    }
}

pub fn echo_behaviour() -> Behaviour {
    Behaviour {
        tools: vec![ToolInfo {
            id: "ChangeCase".into(),
            version: "1.0.0".into(),
        }],
        outputs: vec![(OUTPUT_NAME.into(), INPUT_LABEL.into())],
        running_polls: 2,
        ..Default::default()
    }
}

#[async_trait]
impl ExecutionService for FakeService {
    async fn create_session(&self, name: &str) -> Result<SessionHandle> {
        let mut state = self.record(format!("create_session:{}", name));
        let id = state.id("s");
        state.sessions.insert(id.clone());
        Ok(SessionHandle {
            id,
            name: name.to_string(),
        })
    }

    async fn upload_artifact(
        &self,
        session: &SessionHandle,
        local_path: &Path,
        _type_hint: Option<&str>,
    ) -> Result<ArtifactHandle> {
        let data = std::fs::read(local_path)?;
        let mut state = self.record(format!("upload_artifact:{}", local_path.display()));
        if let Some(message) = &self.behaviour.fail_upload {
            return Err(Error::remote("upload_artifact", message));
        }
        if !state.sessions.contains(&session.id) {
            return Err(Error::remote("upload_artifact", "unknown session"));
        }
        let id = state.id("a");
        state.artifacts.insert(id.clone(), data);
        Ok(ArtifactHandle::new(id))
    }

    async fn import_workflow(&self, _definition: &Value, name: &str) -> Result<WorkflowHandle> {
        let mut state = self.record(format!("import_workflow:{}", name));
        let id = state.id("w");
        state.workflows.insert(id.clone(), name.to_string());
        Ok(WorkflowHandle::new(id))
    }

    async fn invoke(
        &self,
        workflow: &WorkflowHandle,
        inputs: &InputBindings,
        session: &SessionHandle,
        _params: &ParamBindings,
    ) -> Result<InvocationHandle> {
        let mut state = self.record(format!("invoke:{}", workflow));
        if !state.workflows.contains_key(workflow.id()) {
            return Err(Error::remote("invoke", "unknown workflow"));
        }

        let mut outputs = Vec::new();
        for (output, label) in &self.behaviour.outputs {
            let content = match self.behaviour.content_overrides.get(output) {
                Some(content) => content.clone().into_bytes(),
                None => inputs
                    .get(label)
                    .map(|artifacts| {
                        artifacts
                            .iter()
                            .flat_map(|a| state.artifacts.get(a.id()).cloned().unwrap_or_default())
                            .collect()
                    })
                    .unwrap_or_default(),
            };
            let id = state.id("a");
            state.artifacts.insert(id.clone(), content);
            outputs.push(OutputArtifact {
                name: output.clone(),
                artifact: ArtifactHandle::new(id),
            });
        }

        let id = state.id("i");
        state.invocations.insert(
            id.clone(),
            Invocation {
                session: session.clone(),
                outputs,
                polls_left: self.behaviour.running_polls,
            },
        );
        Ok(InvocationHandle::new(id))
    }

    async fn invocation_state(&self, invocation: &InvocationHandle) -> Result<InvocationState> {
        let mut state = self.record(format!("invocation_state:{}", invocation));
        if let Some(message) = &self.behaviour.fail_invocation {
            return Ok(InvocationState::Failed(message.clone()));
        }
        if self.behaviour.never_finish {
            return Ok(InvocationState::Running);
        }
        let entry = state
            .invocations
            .get_mut(invocation.id())
            .ok_or_else(|| Error::remote("invocation_state", "unknown invocation"))?;
        if entry.polls_left > 0 {
            entry.polls_left -= 1;
            return Ok(InvocationState::Running);
        }
        Ok(InvocationState::Completed {
            outputs: entry.outputs.clone(),
            session: entry.session.clone(),
        })
    }

    async fn download_artifact(&self, artifact: &ArtifactHandle, dest: &Path) -> Result<()> {
        let data = {
            let state = self.record(format!("download_artifact:{}", artifact));
            state
                .artifacts
                .get(artifact.id())
                .cloned()
                .ok_or_else(|| Error::remote("download_artifact", "unknown artifact"))?
        };
        if let Some(message) = &self.behaviour.fail_download {
            std::fs::write(dest, &data[..data.len() / 2])?;
            return Err(Error::remote("download_artifact", message));
        }
        std::fs::write(dest, data)?;
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<ToolInfo>> {
        let _state = self.record("list_tools".to_string());
        Ok(self.behaviour.tools.clone())
    }

    async fn delete_session(&self, session: &SessionHandle) -> Result<()> {
        let mut state = self.record(format!("delete_session:{}", session.id));
        state.sessions.remove(&session.id);
        Ok(())
    }

    async fn delete_workflow(&self, workflow: &WorkflowHandle) -> Result<()> {
        let mut state = self.record(format!("delete_workflow:{}", workflow));
        state.workflows.remove(workflow.id());
        Ok(())
    }
}

/// Scratch directory with a workflow, its input and expected outputs
pub struct TestContext {
    pub dir: TempDir,
}

impl TestContext {
    pub fn new() -> Self {
        let ctx = Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
        };
        ctx.write_workflow("workflow.ga");
        ctx.write("input.txt", INPUT_CONTENT);
        ctx.write("expected.txt", INPUT_CONTENT);
        ctx.write("other.txt", "something else\n");
        ctx
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    pub fn write(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create dir");
        }
        std::fs::write(&path, content).expect("Failed to write file");
        path
    }

    /// A one-input, one-tool workflow using ChangeCase 1.0.0
    pub fn write_workflow(&self, rel: &str) -> PathBuf {
        let definition = json!({
            "a_galaxy_workflow": "true",
            "name": "ChangeCase",
            "steps": {
                "0": {"id": 0, "type": "data_input", "tool_id": null,
                      "inputs": [{"name": INPUT_LABEL}]},
                "1": {"id": 1, "type": "tool", "tool_id": "ChangeCase", "tool_version": "1.0.0"}
            }
        });
        self.write(rel, &definition.to_string())
    }

    pub fn output_root(&self) -> PathBuf {
        self.path("results")
    }

    /// A case whose output echoes its input and matches `expected.txt`
    pub fn case(&self, name: &str) -> TestCaseSpec {
        TestCaseSpec::new(name, self.dir.path(), "workflow.ga")
            .with_input(INPUT_LABEL, &["input.txt"], None)
            .with_expected(OUTPUT_NAME, "expected.txt", None)
            .with_output_folder(self.output_root().join(name))
    }
}

/// Run context with fast polling
pub fn context(service: &Arc<FakeService>) -> RunContext {
    RunContext::new(service.clone()).with_poll(PollSettings {
        interval: Duration::from_millis(1),
        timeout: Duration::from_secs(5),
    })
}
