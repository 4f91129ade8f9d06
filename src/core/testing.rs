//! JT-019: Record/verify test mode.
//!
//! Each declared test runs once per case (or once when it has none) through
//! an engine whose commands are only recorded. Recorded exec invocations
//! are checked against `expect` in order, then assertions are evaluated
//! with a `result` scope.

use super::context::{eval_variables, EvalContext};
use super::error::{Error, Result};
use super::executor::{Engine, RunResult};
use super::resolver::Registry;
use super::types::{Case, Expect, TestSpec};
use super::value::Value;
use crate::eventlog::EventLogger;
use crate::transport::record::RecordingRunner;
use crate::transport::CommandSpec;
use std::path::Path;
use std::sync::Arc;

/// Outcome of one test case.
#[derive(Debug)]
pub struct CaseReport {
    pub test: String,
    pub case: Option<String>,
    pub result: Option<RunResult>,
    pub failure: Option<Error>,
}

impl CaseReport {
    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }

    /// `test` or `test/case`.
    pub fn label(&self) -> String {
        match &self.case {
            Some(case) => format!("{}/{}", self.test, case),
            None => self.test.clone(),
        }
    }
}

/// Run the root's tests, optionally only those named `filter`.
pub fn run_tests(registry: Arc<Registry>, filter: Option<&str>) -> Result<Vec<CaseReport>> {
    let tests: Vec<TestSpec> = registry
        .root()
        .map(|root| root.tests.clone())
        .unwrap_or_default();
    if let Some(name) = filter {
        if !tests.iter().any(|t| t.name == name) {
            return Err(Error::Expectation {
                test: name.to_string(),
                message: "no such test".to_string(),
            });
        }
    }

    let mut reports = Vec::new();
    for test in tests.iter().filter(|t| filter.is_none_or(|f| f == t.name)) {
        if test.cases.is_empty() {
            reports.push(run_case(&registry, test, None));
        } else {
            for case in &test.cases {
                reports.push(run_case(&registry, test, Some(case)));
            }
        }
    }
    Ok(reports)
}

fn run_case(registry: &Arc<Registry>, test: &TestSpec, case: Option<&Case>) -> CaseReport {
    let mut report = CaseReport {
        test: test.name.clone(),
        case: case.map(|c| c.name.clone()),
        result: None,
        failure: None,
    };
    match execute_case(registry, test, case) {
        Ok(result) => {
            tracing::info!(test = %report.label(), "test passed");
            report.result = result;
        }
        Err(e) => {
            tracing::warn!(test = %report.label(), error = %e, "test failed");
            report.failure = Some(e);
        }
    }
    report
}

fn execute_case(registry: &Arc<Registry>, test: &TestSpec, case: Option<&Case>) -> Result<Option<RunResult>> {
    let runner = Arc::new(RecordingRunner::new());
    let engine = Engine::new(registry.clone())
        .with_logger(Arc::new(EventLogger::new()))
        .with_runner(runner.clone());

    let base = EvalContext::new();
    let vars = eval_variables(&base, &test.variables, &test.name)?;
    let ctx = base.with_scope("var", vars);
    let case_args = match case {
        Some(c) => ctx.eval_args(&c.args)?,
        None => Default::default(),
    };
    let ctx = ctx.with_scope("case", Value::Object(case_args));

    let outcome = engine.invoke_run(&test.run, &ctx)?;
    if !test.expect.is_empty() {
        verify_calls(&test.name, &test.expect, &runner.calls())?;
    }

    let result_value = outcome
        .result
        .as_ref()
        .map(RunResult::to_value)
        .unwrap_or(Value::Null);
    let ctx = ctx.with_scope("result", result_value);
    for assertion in &test.assertions {
        if !ctx.eval_bool(&assertion.condition)? {
            return Err(Error::Assertion {
                job: test.name.clone(),
                expr: assertion.condition.source().to_string(),
            });
        }
    }
    Ok(outcome.result)
}

/// Recorded calls must match `expect` one to one, in order.
fn verify_calls(test: &str, expect: &[Expect], calls: &[CommandSpec]) -> Result<()> {
    let mismatch = |message: String| Error::Expectation {
        test: test.to_string(),
        message,
    };
    if expect.len() != calls.len() {
        return Err(mismatch(format!(
            "expected {} command(s), recorded {}: [{}]",
            expect.len(),
            calls.len(),
            calls
                .iter()
                .map(CommandSpec::display_line)
                .collect::<Vec<_>>()
                .join(", ")
        )));
    }
    for (i, (want, got)) in expect.iter().zip(calls).enumerate() {
        if want.command != got.command || want.args != got.args {
            return Err(mismatch(format!(
                "command {}: expected '{}', recorded '{}'",
                i + 1,
                std::iter::once(want.command.as_str())
                    .chain(want.args.iter().map(String::as_str))
                    .collect::<Vec<_>>()
                    .join(" "),
                got.display_line()
            )));
        }
        if let Some(dir) = &want.dir {
            let matched = got.dir.as_deref().is_some_and(|d| d.ends_with(Path::new(dir)));
            if !matched {
                return Err(mismatch(format!(
                    "command {}: expected dir '{}', recorded {:?}",
                    i + 1,
                    dir,
                    got.dir
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::resolver::load_str;

    fn registry(yaml: &str) -> Arc<Registry> {
        Arc::new(load_str(yaml, Path::new("/work")).unwrap())
    }

    const DOC: &str = r#"
jobs:
  deploy:
    params: [{ name: env }]
    exec:
      command: '"kubectl"'
      args: '["apply", "-n", param.env]'
      dir: '"k8s"'
tests:
  - name: deploy-envs
    variables:
      - name: prefix
        value: '"ns-"'
    cases:
      - name: staging
        args: { env: '"${var.prefix}staging"' }
    run: { job: deploy, args: { env: 'case.env' } }
    expect:
      - command: kubectl
        args: [apply, -n, ns-staging]
        dir: k8s
    assert:
      - condition: 'result.exit_code == 0'
  - name: wrong
    run: { job: deploy, args: { env: '"prod"' } }
    expect:
      - command: helm
"#;

    #[test]
    fn test_jt019_case_passes() {
        let reports = run_tests(registry(DOC), Some("deploy-envs")).unwrap();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].passed(), "{:?}", reports[0].failure);
        assert_eq!(reports[0].label(), "deploy-envs/staging");
    }

    #[test]
    fn test_jt019_expectation_mismatch_reported() {
        let reports = run_tests(registry(DOC), None).unwrap();
        assert_eq!(reports.len(), 2);
        let wrong = &reports[1];
        assert_eq!(wrong.label(), "wrong");
        assert!(matches!(wrong.failure, Some(Error::Expectation { .. })));
    }

    #[test]
    fn test_jt019_unknown_filter() {
        assert!(run_tests(registry(DOC), Some("nope")).is_err());
    }

    #[test]
    fn test_jt019_failed_assertion() {
        let doc = r#"
jobs:
  noop: {}
tests:
  - name: t
    run: { job: noop }
    assert:
      - condition: 'result != null'
"#;
        let reports = run_tests(registry(doc), None).unwrap();
        assert!(matches!(reports[0].failure, Some(Error::Assertion { .. })));
    }
}
