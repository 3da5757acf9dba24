//! Report rendering for suite results

use std::fmt::Write as _;
use std::io::Write;
use std::str::FromStr;

use crate::common::{Error, Result};

use super::result::{TestCaseResult, TestSuiteResult};

/// Supported report formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    #[default]
    Plaintext,
    Xunit,
}

impl FromStr for ReportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "plaintext" | "text" => Ok(ReportFormat::Plaintext),
            "xunit" | "junit" => Ok(ReportFormat::Xunit),
            other => Err(Error::Config(format!("Unknown report format '{}'", other))),
        }
    }
}

/// Render `result` in `format` into `out`
pub fn write_report<W: Write>(out: &mut W, result: &TestSuiteResult, format: ReportFormat) -> Result<()> {
    let text = match format {
        ReportFormat::Plaintext => plaintext(result),
        ReportFormat::Xunit => xunit(result),
    };
    out.write_all(text.as_bytes())?;
    out.flush()?;
    Ok(())
}

/// One line per case, then per-output status and errors, then a summary
pub fn plaintext(result: &TestSuiteResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Test suite: {}", result.suite_name);
    for case in result.results() {
        let _ = writeln!(
            out,
            "  [{}] {} ({:.2}s)",
            if case.passed() { "PASS" } else { "FAIL" },
            case.case_name,
            case.duration.as_secs_f64()
        );
        for (output, ok) in case.check_outputs() {
            let _ = writeln!(out, "      {}: {}", output, if *ok { "OK" } else { "FAILED" });
        }
        for error in &case.errors {
            let _ = writeln!(out, "      error: {}", error);
        }
    }
    let _ = writeln!(
        out,
        "Ran {} tests in {:.2}s: {} passed, {} failed",
        result.len(),
        result.duration.as_secs_f64(),
        result.passed_count(),
        result.failed_count()
    );
    out
}

/// xUnit XML: one `<testsuite>`, one `<testcase>` per case
pub fn xunit(result: &TestSuiteResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    let _ = writeln!(
        out,
        r#"<testsuite name="{}" tests="{}" failures="{}" errors="0" skipped="0" time="{:.3}">"#,
        escape_xml(&result.suite_name),
        result.len(),
        result.failed_count(),
        result.duration.as_secs_f64()
    );
    for case in result.results() {
        write_testcase(&mut out, &result.suite_name, case);
    }
    let _ = writeln!(out, "</testsuite>");
    out
}

fn write_testcase(out: &mut String, suite_name: &str, case: &TestCaseResult) {
    let open = format!(
        r#"  <testcase classname="{}" name="{}" time="{:.3}""#,
        escape_xml(suite_name),
        escape_xml(&case.case_name),
        case.duration.as_secs_f64()
    );
    if case.passed() {
        let _ = writeln!(out, "{}/>", open);
        return;
    }

    let mut details: Vec<String> = case
        .failed_outputs()
        .iter()
        .map(|name| format!("output '{}' differs from the expected one", name))
        .collect();
    details.extend(case.errors.iter().cloned());

    let _ = writeln!(out, "{}>", open);
    let _ = writeln!(
        out,
        r#"    <failure message="{}">{}</failure>"#,
        escape_xml(&case.failure_message()),
        escape_xml(&details.join("\n"))
    );
    let _ = writeln!(out, "  </testcase>");
}

fn escape_xml(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c => escaped.push(c),
        }
    }
    escaped
}
