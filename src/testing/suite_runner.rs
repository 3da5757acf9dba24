//! Test suite execution

use std::time::Instant;

use crate::common::logging::Verbosity;
use crate::common::{Error, Result};

use super::case_runner::{remove_dir_if_empty, RunOverrides, TestCaseRunner};
use super::result::{TestCaseResult, TestSuiteResult};
use super::spec::{EffectiveOptions, RunOptions, TestSuiteSpec};
use super::RunContext;

/// Runs the cases of a suite one after another
pub struct TestSuiteRunner {
    ctx: RunContext,
    suite: TestSuiteSpec,
    overrides: RunOptions,
    runners: Vec<TestCaseRunner>,
}

impl TestSuiteRunner {
    pub fn new(ctx: RunContext, suite: TestSuiteSpec) -> Self {
        Self {
            ctx,
            suite,
            overrides: RunOptions::default(),
            runners: Vec::new(),
        }
    }

    /// Call-time options; they win over case and suite settings
    pub fn with_overrides(mut self, overrides: RunOptions) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn suite(&self) -> &TestSuiteSpec {
        &self.suite
    }

    /// Runners created by [`run`](Self::run), in execution order
    pub fn runners(&self) -> &[TestCaseRunner] {
        &self.runners
    }

    /// Suite-level flags after applying the overrides
    pub fn effective_options(&self) -> EffectiveOptions {
        self.overrides.or(&self.suite.defaults).resolve()
    }

    /// Run every case, or only the ones named in `filter`
    ///
    /// Case failures never stop the suite; each case contributes exactly
    /// one result, in declaration order.
    pub async fn run(&mut self, filter: Option<&[String]>) -> Result<TestSuiteResult> {
        let options = self.effective_options();
        let previous = self
            .ctx
            .log
            .apply(Verbosity::from_flags(options.enable_logger, options.enable_debug));
        let outcome = self.run_selected(filter, options).await;
        self.ctx.log.apply(previous);
        outcome
    }

    async fn run_selected(
        &mut self,
        filter: Option<&[String]>,
        options: EffectiveOptions,
    ) -> Result<TestSuiteResult> {
        let started = Instant::now();

        if let Some(names) = filter {
            for name in names {
                if self.suite.case(name).is_none() {
                    tracing::debug!("Ignoring unknown test '{}'", name);
                }
            }
        }

        let selected: Vec<_> = self
            .suite
            .cases()
            .iter()
            .filter(|case| filter.map_or(true, |names| names.contains(&case.name)))
            .cloned()
            .collect();
        tracing::info!(
            "Running {} of {} tests in suite '{}'",
            selected.len(),
            self.suite.cases().len(),
            self.suite.name
        );

        let mut suite_result = TestSuiteResult::new(&self.suite.name);
        for case in selected {
            let name = case.name.clone();
            let output_folder = case.output_folder.clone();
            let mut runner =
                TestCaseRunner::with_suite_defaults(self.ctx.clone(), case, self.suite.defaults.clone());

            let result = match runner.run(RunOverrides::with_options(self.overrides.clone())).await {
                Ok(result) => result,
                Err(Error::TestAssertion(message)) => {
                    tracing::debug!("{}", message);
                    match runner.last_result() {
                        Some(result) => result.clone(),
                        None => TestCaseResult::from_error(
                            &name,
                            output_folder,
                            &Error::TestAssertion(message),
                        ),
                    }
                }
                Err(e) => {
                    tracing::warn!("Test '{}' could not run: {}", name, e);
                    TestCaseResult::from_error(&name, output_folder, &e)
                }
            };
            suite_result.push(result);
            self.runners.push(runner);
        }

        if options.disable_cleanup {
            tracing::debug!("Suite cleanup disabled");
        } else {
            self.release_finished().await;
        }

        suite_result.duration = started.elapsed();
        Ok(suite_result)
    }

    /// Automatic cleanup after a run: cases that kept their resources
    /// (`disable_cleanup` at case level) are left alone
    async fn release_finished(&mut self) {
        for runner in &mut self.runners {
            if runner.holds_resources() {
                tracing::debug!("Keeping resources of test '{}'", runner.case().name);
            } else {
                runner.cleanup().await;
            }
        }
        remove_dir_if_empty(&self.suite.output_folder).await;
    }

    /// Clean up every runner, kept resources included, then drop the output
    /// folder if it is empty
    pub async fn cleanup(&mut self) {
        for runner in &mut self.runners {
            runner.cleanup().await;
        }
        remove_dir_if_empty(&self.suite.output_folder).await;
    }
}
