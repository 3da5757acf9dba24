//! Workflow test engine
//!
//! Loads test suites, runs their cases against an [`ExecutionService`],
//! verifies outputs with named comparators and reports the results.

pub mod case_runner;
pub mod comparators;
pub mod loader;
pub mod report;
pub mod result;
pub mod spec;
pub mod suite_runner;

use std::sync::Arc;

use crate::common::logging::LogControl;
use crate::service::{ExecutionService, PollSettings};

pub use case_runner::{RunOverrides, TestCaseRunner};
pub use comparators::{Comparator, ComparatorRegistry};
pub use loader::{LoadedWorkflow, WorkflowDefinition, WorkflowLoader};
pub use result::{TestCaseResult, TestSuiteResult};
pub use spec::{ExpectedOutput, InputBinding, RunOptions, ServerConfig, TestCaseSpec, TestSuiteSpec};
pub use suite_runner::TestSuiteRunner;

/// Shared collaborators of every runner
#[derive(Clone)]
pub struct RunContext {
    pub service: Arc<dyn ExecutionService>,
    pub loader: Arc<WorkflowLoader>,
    pub comparators: Arc<ComparatorRegistry>,
    pub poll: PollSettings,
    pub log: LogControl,
}

impl RunContext {
    /// Context with the built-in comparators, default polling and no log control
    pub fn new(service: Arc<dyn ExecutionService>) -> Self {
        let loader = Arc::new(WorkflowLoader::new(service.clone()));
        Self {
            service,
            loader,
            comparators: Arc::new(ComparatorRegistry::with_defaults()),
            poll: PollSettings::default(),
            log: LogControl::disabled(),
        }
    }

    pub fn with_poll(mut self, poll: PollSettings) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_comparators(mut self, comparators: ComparatorRegistry) -> Self {
        self.comparators = Arc::new(comparators);
        self
    }

    pub fn with_log(mut self, log: LogControl) -> Self {
        self.log = log;
        self
    }
}
