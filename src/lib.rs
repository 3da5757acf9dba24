//! Workflow tester - run workflow test suites against a Galaxy server
//!
//! A suite file lists workflows together with their inputs and expected
//! outputs. Each test uploads the inputs into a fresh session, runs the
//! workflow, downloads the outputs, compares them with the expected files
//! and removes everything it created.

pub mod cli;
pub mod commands;
pub mod common;
pub mod service;
pub mod testing;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use service::ExecutionService;
pub use testing::{
    ComparatorRegistry, RunContext, RunOverrides, TestCaseRunner, TestCaseSpec, TestSuiteRunner,
    TestSuiteSpec,
};
