//! Execution service abstraction
//!
//! The test runners only talk to the remote engine through the
//! [`ExecutionService`] trait. [`galaxy::GalaxyClient`] implements it over the
//! Galaxy REST API; tests use an in-memory fake.

pub mod galaxy;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::common::{Error, Result};

macro_rules! opaque_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn id(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

opaque_handle!(
    /// An artifact (dataset) stored on the execution service
    ArtifactHandle
);
opaque_handle!(
    /// A workflow definition imported into the execution service
    WorkflowHandle
);
opaque_handle!(
    /// A submitted workflow run
    InvocationHandle
);

/// An isolated session (history) holding the artifacts of one run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionHandle {
    pub id: String,
    pub name: String,
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// A tool installed on the execution service
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ToolInfo {
    pub id: String,
    pub version: String,
}

impl fmt::Display for ToolInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (ver. {})", self.id, self.version)
    }
}

/// A named output produced by a workflow run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputArtifact {
    pub name: String,
    pub artifact: ArtifactHandle,
}

/// Workflow input label -> uploaded artifacts, in upload order
pub type InputBindings = BTreeMap<String, Vec<ArtifactHandle>>;

/// Step -> parameter name -> value
pub type ParamBindings = BTreeMap<String, BTreeMap<String, serde_json::Value>>;

/// State of a submitted invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationState {
    /// Still scheduled or running
    Running,
    /// Finished; outputs live in `session`
    Completed {
        outputs: Vec<OutputArtifact>,
        session: SessionHandle,
    },
    /// Terminal failure reported by the service
    Failed(String),
}

/// Remote engine that runs workflows inside isolated sessions
#[async_trait]
pub trait ExecutionService: Send + Sync {
    /// Create a new isolated session
    async fn create_session(&self, name: &str) -> Result<SessionHandle>;

    /// Upload a local file into a session
    async fn upload_artifact(
        &self,
        session: &SessionHandle,
        local_path: &Path,
        type_hint: Option<&str>,
    ) -> Result<ArtifactHandle>;

    /// Import a workflow definition under the given name
    async fn import_workflow(
        &self,
        definition: &serde_json::Value,
        name: &str,
    ) -> Result<WorkflowHandle>;

    /// Submit a workflow run; returns immediately
    async fn invoke(
        &self,
        workflow: &WorkflowHandle,
        inputs: &InputBindings,
        session: &SessionHandle,
        params: &ParamBindings,
    ) -> Result<InvocationHandle>;

    /// Query the state of a submitted run
    async fn invocation_state(&self, invocation: &InvocationHandle) -> Result<InvocationState>;

    /// Download an artifact into `dest`
    async fn download_artifact(&self, artifact: &ArtifactHandle, dest: &Path) -> Result<()>;

    /// List the installed tools
    async fn list_tools(&self) -> Result<Vec<ToolInfo>>;

    /// Delete a session and everything in it
    async fn delete_session(&self, session: &SessionHandle) -> Result<()>;

    /// Delete an imported workflow
    async fn delete_workflow(&self, workflow: &WorkflowHandle) -> Result<()>;
}

/// Polling behaviour while waiting for an invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            timeout: Duration::from_secs(3600),
        }
    }
}

/// Outputs of a finished invocation
#[derive(Debug, Clone)]
pub struct CompletedRun {
    pub invocation: InvocationHandle,
    pub outputs: Vec<OutputArtifact>,
    pub session: SessionHandle,
}

/// Submit a workflow run and block until it reaches a terminal state
///
/// Polls at a fixed interval. Exceeding `poll.timeout` yields
/// [`Error::Timeout`]; the remote run is left to the session cleanup.
pub async fn invoke_and_wait(
    service: &dyn ExecutionService,
    workflow: &WorkflowHandle,
    inputs: &InputBindings,
    session: &SessionHandle,
    params: &ParamBindings,
    poll: &PollSettings,
) -> Result<CompletedRun> {
    let invocation = service.invoke(workflow, inputs, session, params).await?;
    tracing::debug!("Invocation {} submitted, polling every {:?}", invocation, poll.interval);

    match tokio::time::timeout(poll.timeout, wait_for_terminal(service, &invocation, poll.interval))
        .await
    {
        Ok(Ok((outputs, session))) => Ok(CompletedRun {
            invocation,
            outputs,
            session,
        }),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(Error::Timeout(poll.timeout)),
    }
}

async fn wait_for_terminal(
    service: &dyn ExecutionService,
    invocation: &InvocationHandle,
    interval: Duration,
) -> Result<(Vec<OutputArtifact>, SessionHandle)> {
    loop {
        match service.invocation_state(invocation).await? {
            InvocationState::Running => tokio::time::sleep(interval).await,
            InvocationState::Completed { outputs, session } => return Ok((outputs, session)),
            InvocationState::Failed(message) => return Err(Error::InvocationFailed(message)),
        }
    }
}
