//! Single test case execution
//!
//! A [`TestCaseRunner`] owns everything one test case creates on the
//! execution service: the sessions of its runs, the downloaded outputs and
//! its hold on the imported workflow. Every run goes through
//!
//! 1. tool check (no session is created when tools are missing)
//! 2. session creation and input upload
//! 3. invocation and polling
//! 4. output download and comparison
//!
//! after which the result is stored, resources are released unless cleanup
//! is disabled, and a failed result becomes an assertion error unless
//! assertions are disabled.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::common::logging::Verbosity;
use crate::common::paths::resolve;
use crate::common::{Error, Result};
use crate::service::{invoke_and_wait, InputBindings, ParamBindings, SessionHandle, ToolInfo};

use super::comparators::{diff_path, Comparator};
use super::loader::LoadedWorkflow;
use super::result::TestCaseResult;
use super::spec::{EffectiveOptions, ExpectedOutput, InputBinding, RunOptions, TestCaseSpec};
use super::RunContext;

/// Prefix of every session created by a run
pub const SESSION_NAME_PREFIX: &str = "WorkflowTestCase_";

/// Per-call replacements for the configured case values
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub base_path: Option<PathBuf>,
    pub inputs: Option<BTreeMap<String, InputBinding>>,
    pub params: Option<ParamBindings>,
    pub expected: Option<BTreeMap<String, ExpectedOutput>>,
    pub output_folder: Option<PathBuf>,
    pub options: RunOptions,
}

impl RunOverrides {
    pub fn with_options(options: RunOptions) -> Self {
        Self {
            options,
            ..Default::default()
        }
    }
}

/// Values a single run works with, after overrides and validation
struct RunPlan {
    base_path: PathBuf,
    inputs: BTreeMap<String, InputBinding>,
    params: ParamBindings,
    expected: Vec<PlannedOutput>,
    output_folder: PathBuf,
    options: EffectiveOptions,
}

struct PlannedOutput {
    name: String,
    file: PathBuf,
    comparator: Arc<dyn Comparator>,
}

/// Resources created by one run and not yet released
#[derive(Debug, Default)]
struct HeldResources {
    sessions: Vec<SessionHandle>,
    files: Vec<PathBuf>,
    output_folder: PathBuf,
}

impl HeldResources {
    fn hold_session(&mut self, session: &SessionHandle) {
        if !self.sessions.iter().any(|s| s.id == session.id) {
            self.sessions.push(session.clone());
        }
    }
}

/// Runs one configured test case against the execution service
pub struct TestCaseRunner {
    ctx: RunContext,
    case: TestCaseSpec,
    suite_defaults: RunOptions,
    workflow: Option<LoadedWorkflow>,
    results: Vec<TestCaseResult>,
    held: Vec<HeldResources>,
}

impl TestCaseRunner {
    pub fn new(ctx: RunContext, case: TestCaseSpec) -> Self {
        Self::with_suite_defaults(ctx, case, RunOptions::default())
    }

    /// A runner whose unset case options fall back to `suite_defaults`
    pub fn with_suite_defaults(ctx: RunContext, case: TestCaseSpec, suite_defaults: RunOptions) -> Self {
        Self {
            ctx,
            case,
            suite_defaults,
            workflow: None,
            results: Vec::new(),
            held: Vec::new(),
        }
    }

    pub fn case(&self) -> &TestCaseSpec {
        &self.case
    }

    /// Every result produced by this runner, oldest first
    pub fn results(&self) -> &[TestCaseResult] {
        &self.results
    }

    pub fn last_result(&self) -> Option<&TestCaseResult> {
        self.results.last()
    }

    /// Execute the test case once
    ///
    /// Configuration problems are returned before anything is sent to the
    /// execution service. Any other failure ends up in the result, which is
    /// returned as is when assertions are disabled and as
    /// [`Error::TestAssertion`] otherwise.
    ///
    /// The log level follows the case flags during the run and is restored
    /// afterwards.
    pub async fn run(&mut self, overrides: RunOverrides) -> Result<TestCaseResult> {
        let plan = self.plan(overrides)?;
        let previous = self
            .ctx
            .log
            .apply(Verbosity::from_flags(plan.options.enable_logger, plan.options.enable_debug));
        let outcome = self.run_planned(plan).await;
        self.ctx.log.apply(previous);
        outcome
    }

    /// Whether earlier runs kept resources that [`cleanup`](Self::cleanup)
    /// would release
    pub fn holds_resources(&self) -> bool {
        !self.held.is_empty()
    }

    async fn run_planned(&mut self, plan: RunPlan) -> Result<TestCaseResult> {
        tracing::debug!("Running test '{}' with {:?}", self.case.name, plan.options);

        let started = Instant::now();
        let mut result = TestCaseResult::new(&self.case.name, plan.output_folder.clone());
        result.inputs = plan.inputs.keys().cloned().collect();
        let mut held = HeldResources {
            output_folder: plan.output_folder.clone(),
            ..Default::default()
        };

        match self.acquire_workflow().await {
            Ok(workflow) => {
                result.workflow_name = Some(workflow.definition.name.clone());
                match self.missing_tools_for(&workflow).await {
                    Ok(missing) if !missing.is_empty() => {
                        let list: Vec<String> = missing.iter().map(ToString::to_string).collect();
                        let message = format!("missing tools: {}", list.join(", "));
                        tracing::warn!("Test '{}': {}", self.case.name, message);
                        result.errors.push(message);
                        result.missing_tools = missing;
                    }
                    Ok(_) => {
                        if let Err(e) = self.execute(&workflow, &plan, &mut result, &mut held).await {
                            tracing::warn!("Test '{}' failed: {}", self.case.name, e);
                            result.errors.push(e.to_string());
                        }
                    }
                    Err(e) => result.errors.push(e.to_string()),
                }
            }
            // Nothing was created remotely yet
            Err(e) if e.is_configuration() => return Err(e),
            Err(e) => result.errors.push(e.to_string()),
        }

        result.duration = started.elapsed();
        self.results.push(result.clone());
        self.held.push(held);

        if plan.options.disable_cleanup {
            tracing::debug!("Cleanup disabled, keeping resources of test '{}'", self.case.name);
        } else {
            self.cleanup().await;
        }

        if result.failed() {
            tracing::info!("{}", result.failure_message());
            if !plan.options.disable_assertions {
                return Err(Error::TestAssertion(result.failure_message()));
            }
        }
        Ok(result)
    }

    /// Resolve overrides and validate everything that can be checked locally
    fn plan(&self, overrides: RunOverrides) -> Result<RunPlan> {
        let options = overrides
            .options
            .or(&self.case.options)
            .or(&self.suite_defaults)
            .resolve();

        let inputs = overrides.inputs.unwrap_or_else(|| self.case.inputs.clone());
        if inputs.is_empty() {
            return Err(Error::Config(format!(
                "No input configured for test '{}'",
                self.case.name
            )));
        }

        let expected = overrides.expected.unwrap_or_else(|| self.case.expected.clone());
        if expected.is_empty() {
            return Err(Error::Config(format!(
                "No expected output configured for test '{}'",
                self.case.name
            )));
        }
        let expected = expected
            .into_iter()
            .map(|(name, output)| {
                let comparator = self.ctx.comparators.resolve(output.comparator.as_deref())?;
                Ok::<_, Error>(PlannedOutput {
                    name,
                    file: output.file,
                    comparator,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(RunPlan {
            base_path: overrides
                .base_path
                .unwrap_or_else(|| self.case.base_path.clone()),
            inputs,
            params: overrides.params.unwrap_or_else(|| self.case.params.clone()),
            expected,
            output_folder: overrides
                .output_folder
                .unwrap_or_else(|| self.case.output_folder.clone()),
            options,
        })
    }

    /// Import the workflow on first use
    async fn acquire_workflow(&mut self) -> Result<LoadedWorkflow> {
        if let Some(workflow) = &self.workflow {
            return Ok(workflow.clone());
        }
        let workflow = self
            .ctx
            .loader
            .load(&self.case.workflow_path(), Some(&self.case.name))
            .await?;
        self.workflow = Some(workflow.clone());
        Ok(workflow)
    }

    /// Tools used by the workflow that the service does not provide
    pub async fn find_missing_tools(&mut self) -> Result<Vec<ToolInfo>> {
        let workflow = self.acquire_workflow().await?;
        self.missing_tools_for(&workflow).await
    }

    async fn missing_tools_for(&self, workflow: &LoadedWorkflow) -> Result<Vec<ToolInfo>> {
        tracing::debug!("Checking required tools ...");
        let available: BTreeSet<ToolInfo> = self.ctx.service.list_tools().await?.into_iter().collect();
        let missing: Vec<ToolInfo> = workflow
            .definition
            .tools()
            .into_iter()
            .filter(|tool| !available.contains(tool))
            .collect();
        tracing::debug!("Missing tools: {}", missing.len());
        Ok(missing)
    }

    async fn execute(
        &self,
        workflow: &LoadedWorkflow,
        plan: &RunPlan,
        result: &mut TestCaseResult,
        held: &mut HeldResources,
    ) -> Result<()> {
        let service = self.ctx.service.as_ref();

        let session_name = format!("{}{}_{}", SESSION_NAME_PREFIX, result.result_id, self.case.name);
        let session = service.create_session(&session_name).await?;
        tracing::info!("Created session {}", session);
        held.hold_session(&session);
        result.session = Some(session.clone());

        let mut bindings = InputBindings::new();
        for (label, input) in &plan.inputs {
            let artifacts = bindings.entry(label.clone()).or_default();
            for file in &input.files {
                let path = resolve(&plan.base_path, file);
                tracing::debug!("Uploading {} for input '{}'", path.display(), label);
                let artifact = service
                    .upload_artifact(&session, &path, input.file_type.as_deref())
                    .await?;
                artifacts.push(artifact);
            }
        }

        tracing::info!("Workflow {} running ...", workflow.handle);
        let run = invoke_and_wait(
            service,
            &workflow.handle,
            &bindings,
            &session,
            &plan.params,
            &self.ctx.poll,
        )
        .await?;
        tracing::info!("Workflow {} executed (invocation {})", workflow.handle, run.invocation);
        held.hold_session(&run.session);
        result.session = Some(run.session.clone());

        tokio::fs::create_dir_all(&plan.output_folder).await?;
        for output in &run.outputs {
            let Some(expected) = plan.expected.iter().find(|e| e.name == output.name) else {
                continue;
            };
            let dest = plan.output_folder.join(&output.name);
            // a failed download may leave a partial file
            held.files.push(dest.clone());
            held.files.push(diff_path(&dest));
            service.download_artifact(&output.artifact, &dest).await?;
            tracing::debug!("Downloaded output '{}' to {}", output.name, dest.display());
            result.output_file_map.insert(output.name.clone(), dest.clone());

            let expected_file = resolve(&plan.base_path, &expected.file);
            let matched = match expected.comparator.compare(&dest, &expected_file) {
                Ok(matched) => matched,
                Err(e) => {
                    result
                        .errors
                        .push(format!("output '{}': {}", output.name, e));
                    false
                }
            };
            tracing::debug!(
                "Output '{}' {} the expected {}",
                output.name,
                if matched { "is equal to" } else { "differs from" },
                expected_file.display()
            );
            result.results.insert(output.name.clone(), matched);
        }

        for expected in &plan.expected {
            if !result.results.contains_key(&expected.name) {
                tracing::warn!("Expected output '{}' was not produced", expected.name);
                result.results.insert(expected.name.clone(), false);
            }
        }
        Ok(())
    }

    /// Release every resource still held by this runner's runs
    ///
    /// Deletes sessions and downloaded files, then drops the hold on the
    /// workflow. Failures are logged. Calling it again does nothing.
    pub async fn cleanup(&mut self) {
        let held: Vec<HeldResources> = self.held.drain(..).collect();
        for resources in held {
            for session in &resources.sessions {
                match self.ctx.service.delete_session(session).await {
                    Ok(()) => tracing::debug!("Deleted session {}", session),
                    Err(e) => tracing::warn!("Failed to delete session {}: {}", session, e),
                }
            }
            for file in &resources.files {
                remove_file(file).await;
            }
            remove_dir_if_empty(&resources.output_folder).await;
        }

        if let Some(workflow) = self.workflow.take() {
            if let Err(e) = self.ctx.loader.release(&workflow.handle).await {
                tracing::warn!("Failed to unload workflow {}: {}", workflow.handle, e);
            }
        }
    }
}

async fn remove_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!("Deleted {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to delete {}: {}", path.display(), e),
    }
}

/// Remove `dir` when nothing is left in it
pub(crate) async fn remove_dir_if_empty(dir: &Path) {
    let is_empty = match tokio::fs::read_dir(dir).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(None)),
        Err(_) => false,
    };
    if is_empty {
        match tokio::fs::remove_dir(dir).await {
            Ok(()) => tracing::debug!("Removed empty folder {}", dir.display()),
            Err(e) => tracing::debug!("Could not remove {}: {}", dir.display(), e),
        }
    }
}
