//! Test results
//!
//! A case fails when any compared output is `false` or any error was
//! recorded during the run.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use uuid::Uuid;

use crate::common::Error;
use crate::service::{SessionHandle, ToolInfo};

/// Outcome of one test case run
#[derive(Debug, Clone)]
pub struct TestCaseResult {
    /// Fresh for every run
    pub result_id: Uuid,
    pub case_name: String,
    /// Name of the workflow as imported, once known
    pub workflow_name: Option<String>,
    /// Input labels that were staged
    pub inputs: Vec<String>,
    /// Expected output name -> comparison outcome
    pub results: BTreeMap<String, bool>,
    pub errors: Vec<String>,
    pub missing_tools: Vec<ToolInfo>,
    /// Output name -> downloaded file
    pub output_file_map: BTreeMap<String, PathBuf>,
    /// Session holding the run's artifacts
    pub session: Option<SessionHandle>,
    pub output_folder: PathBuf,
    pub duration: Duration,
}

impl TestCaseResult {
    pub fn new(case_name: &str, output_folder: PathBuf) -> Self {
        Self {
            result_id: Uuid::new_v4(),
            case_name: case_name.to_string(),
            workflow_name: None,
            inputs: Vec::new(),
            results: BTreeMap::new(),
            errors: Vec::new(),
            missing_tools: Vec::new(),
            output_file_map: BTreeMap::new(),
            session: None,
            output_folder,
            duration: Duration::ZERO,
        }
    }

    /// A result for a case that could not run at all
    pub fn from_error(case_name: &str, output_folder: PathBuf, error: &Error) -> Self {
        let mut result = Self::new(case_name, output_folder);
        result.errors.push(error.to_string());
        result
    }

    pub fn failed(&self) -> bool {
        self.results.values().any(|ok| !ok) || !self.errors.is_empty()
    }

    pub fn passed(&self) -> bool {
        !self.failed()
    }

    /// Names of outputs that did not match
    pub fn failed_outputs(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|(_, ok)| !**ok)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Comparison outcome of one output; `None` if it was never compared
    pub fn check_output(&self, name: &str) -> Option<bool> {
        self.results.get(name).copied()
    }

    pub fn check_outputs(&self) -> &BTreeMap<String, bool> {
        &self.results
    }

    /// Message used when a failed result is turned into an assertion error
    pub fn failure_message(&self) -> String {
        let failed = self.failed_outputs();
        if !failed.is_empty() {
            format!(
                "test '{}': outputs do not match: {}",
                self.case_name,
                failed.join(", ")
            )
        } else {
            format!("test '{}': {}", self.case_name, self.errors.join("; "))
        }
    }
}

impl fmt::Display for TestCaseResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let outputs: Vec<String> = self
            .results
            .iter()
            .map(|(name, ok)| format!("{}: {}", name, if *ok { "OK" } else { "ERROR" }))
            .collect();
        write!(
            f,
            "Test {}: workflow {}, inputs=[{}], outputs=[{}]",
            self.result_id,
            self.workflow_name.as_deref().unwrap_or(&self.case_name),
            self.inputs.join(","),
            outputs.join(", ")
        )
    }
}

/// Results of a suite run, in case declaration order
#[derive(Debug, Clone, Default)]
pub struct TestSuiteResult {
    pub suite_name: String,
    results: Vec<TestCaseResult>,
    pub duration: Duration,
}

impl TestSuiteResult {
    pub fn new(suite_name: &str) -> Self {
        Self {
            suite_name: suite_name.to_string(),
            results: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    pub fn push(&mut self, result: TestCaseResult) {
        self.results.push(result);
    }

    pub fn results(&self) -> &[TestCaseResult] {
        &self.results
    }

    pub fn get(&self, case_name: &str) -> Option<&TestCaseResult> {
        self.results.iter().find(|r| r.case_name == case_name)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn failed_count(&self) -> usize {
        self.results.iter().filter(|r| r.failed()).count()
    }

    pub fn passed_count(&self) -> usize {
        self.len() - self.failed_count()
    }

    /// (case, output, matched) for every compared output
    pub fn output_breakdown(&self) -> Vec<(&str, &str, bool)> {
        self.results
            .iter()
            .flat_map(|r| {
                r.results
                    .iter()
                    .map(move |(output, ok)| (r.case_name.as_str(), output.as_str(), *ok))
            })
            .collect()
    }

    /// Process exit code: the number of failed cases
    pub fn exit_code(&self) -> i32 {
        i32::try_from(self.failed_count()).unwrap_or(i32::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(outputs: &[(&str, bool)]) -> TestCaseResult {
        let mut r = TestCaseResult::new("case", PathBuf::from("results/case"));
        for (name, ok) in outputs {
            r.results.insert(name.to_string(), *ok);
        }
        r
    }

    #[test]
    fn test_pass_fail_rules() {
        assert!(result(&[("a", true), ("b", true)]).passed());
        assert!(result(&[("a", true), ("b", false)]).failed());

        let mut errored = result(&[("a", true)]);
        errored.errors.push("timeout".into());
        assert!(errored.failed());
    }

    #[test]
    fn test_output_queries() {
        let r = result(&[("a", true), ("b", false)]);
        assert_eq!(r.failed_outputs(), vec!["b"]);
        assert_eq!(r.check_output("a"), Some(true));
        assert_eq!(r.check_output("zzz"), None);
        assert_eq!(r.check_outputs().len(), 2);
        assert!(r.failure_message().contains("b"));
    }

    #[test]
    fn test_fresh_ids() {
        let a = TestCaseResult::new("x", PathBuf::new());
        let b = TestCaseResult::new("x", PathBuf::new());
        assert_ne!(a.result_id, b.result_id);
    }

    #[test]
    fn test_from_error() {
        let r = TestCaseResult::from_error(
            "broken",
            PathBuf::new(),
            &Error::Config("no inputs".into()),
        );
        assert!(r.failed());
        assert!(r.failure_message().contains("no inputs"));
    }

    #[test]
    fn test_suite_counts() {
        let mut suite = TestSuiteResult::new("suite");
        suite.push(result(&[("a", true)]));
        suite.push(result(&[("a", false), ("b", true)]));
        suite.push(result(&[("a", false)]));

        assert_eq!(suite.len(), 3);
        assert_eq!(suite.failed_count(), 2);
        assert_eq!(suite.passed_count(), 1);
        assert_eq!(suite.exit_code(), 2);
        assert_eq!(suite.output_breakdown().len(), 4);
    }
}
