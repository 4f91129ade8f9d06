//! JT-018: Execution engine.
//!
//! Invokes a job: bind inputs → build context → start log collection →
//! dependencies → decoded body (steps, run block, phases, or dynamic runs)
//! or `exec` leaf → assertions → finish log (write + forward).
//!
//! Run groups execute through [`run_bounded`] with the group's concurrency;
//! results aggregate in declaration order. Sub-invocation errors propagate
//! unchanged.

use super::body::{decode, Plan, StaticPlan};
use super::context::{eval_variables, job_context, EvalContext};
use super::error::{Error, Result};
use super::group::run_bounded;
use super::inputs::{resolve_inputs, Args, InputResolver};
use super::resolver::Registry;
use super::types::{Assertion, DynamicRun, ExecSpec, Job, JobName, RunBlock, StaticRun};
use super::value::Value;
use crate::eventlog::collector::{Forwarder, JobLog};
use crate::eventlog::EventLogger;
use crate::source::{CacheFetcher, Fetcher};
use crate::transport::local::LocalRunner;
use crate::transport::record::RecordingRunner;
use crate::transport::{CommandRunner, CommandSpec, ExecOutput};
use indexmap::IndexMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Nested invocation bound; guards against jobs that run themselves.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Captured outcome of one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl From<ExecOutput> for RunResult {
    fn from(out: ExecOutput) -> Self {
        Self {
            exit_code: out.exit_code,
            stdout: out.stdout,
            stderr: out.stderr,
        }
    }
}

impl RunResult {
    /// `{stdout, stderr, exit_code}` for `step`, `phase` and `result` scopes.
    pub fn to_value(&self) -> Value {
        Value::object([
            ("stdout", Value::string(self.stdout.clone())),
            ("stderr", Value::string(self.stderr.clone())),
            ("exit_code", Value::Number(f64::from(self.exit_code))),
        ])
    }
}

/// Fold a run group's results: status of the last non-skipped run, output
/// of every non-skipped run concatenated in declaration order. `None` when
/// everything was skipped.
pub fn aggregate<'a>(results: impl IntoIterator<Item = &'a Option<RunResult>>) -> Option<RunResult> {
    let mut out: Option<RunResult> = None;
    for r in results.into_iter().flatten() {
        let agg = out.get_or_insert_with(RunResult::default);
        agg.exit_code = r.exit_code;
        agg.stdout.push_str(&r.stdout);
        agg.stderr.push_str(&r.stderr);
    }
    out
}

fn optional_value(result: &Option<RunResult>) -> Value {
    result.as_ref().map(RunResult::to_value).unwrap_or(Value::Null)
}

/// Result of invoking a job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcome {
    pub result: Option<RunResult>,
    /// False for a leaf without `exec`; the caller may run it directly.
    pub handled: bool,
}

/// Ambient engine settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Register the trace collector
    pub trace: bool,
    /// Record commands instead of running them
    pub record_only: bool,
    /// Remote source cache; enables the `source` scope
    pub cache_dir: Option<PathBuf>,
    pub max_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            trace: false,
            record_only: false,
            cache_dir: None,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// A resolved invocation waiting for a worker.
struct PlannedRun {
    target: Arc<Job>,
    args: Args,
}

pub struct Engine {
    registry: Arc<Registry>,
    logger: Arc<EventLogger>,
    runner: Arc<dyn CommandRunner>,
    inputs: Option<Arc<dyn InputResolver>>,
    source_dir: Option<PathBuf>,
    max_depth: usize,
}

impl Engine {
    /// Engine with a fresh logger and local command execution.
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            logger: Arc::new(EventLogger::new()),
            runner: Arc::new(LocalRunner),
            inputs: None,
            source_dir: None,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn from_config(registry: Arc<Registry>, config: &EngineConfig) -> Self {
        let logger = if config.trace {
            EventLogger::with_tracing()
        } else {
            EventLogger::new()
        };
        let runner: Arc<dyn CommandRunner> = if config.record_only {
            Arc::new(RecordingRunner::new())
        } else {
            Arc::new(LocalRunner)
        };
        let mut engine = Self::new(registry)
            .with_logger(Arc::new(logger))
            .with_runner(runner)
            .with_max_depth(config.max_depth);
        if let Some(dir) = &config.cache_dir {
            engine = engine.with_source_dir(CacheFetcher::new(dir).root());
        }
        engine
    }

    pub fn with_logger(mut self, logger: Arc<EventLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_input_resolver(mut self, resolver: Arc<dyn InputResolver>) -> Self {
        self.inputs = Some(resolver);
        self
    }

    pub fn with_source_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.source_dir = dir;
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn logger(&self) -> &Arc<EventLogger> {
        &self.logger
    }

    /// Invoke a job by its full registry name; the empty name is the root.
    pub fn invoke(&self, name: &str, args: &Args) -> Result<Outcome> {
        let job = self
            .registry
            .get(name)
            .cloned()
            .ok_or_else(|| Error::JobNotFound(name.to_string()))?;
        self.logger.log_run(&job.name, args);
        self.invoke_job(job, args, 0)
    }

    /// Invoke a static run from the root, with its arguments evaluated
    /// against `ctx`.
    pub fn invoke_run(&self, run: &StaticRun, ctx: &EvalContext) -> Result<Outcome> {
        let planned = self.plan_static(&JobName::root(), run, ctx, &Args::new())?;
        self.logger.log_run(&planned.target.name, &planned.args);
        self.invoke_job(planned.target, &planned.args, 0)
    }

    fn invoke_job(&self, job: Arc<Job>, args: &Args, depth: usize) -> Result<Outcome> {
        if depth > self.max_depth {
            return Err(Error::RecursionLimit {
                job: job.name.to_string(),
                limit: self.max_depth,
            });
        }
        tracing::info!(job = %job.name, depth, "job start");
        let outcome = self.execute(&job, args, depth);
        match &outcome {
            Ok(o) => tracing::info!(job = %job.name, handled = o.handled, "job finished"),
            Err(e) => tracing::error!(job = %job.name, error = %e, "job failed"),
        }
        outcome
    }

    fn execute(&self, job: &Arc<Job>, args: &Args, depth: usize) -> Result<Outcome> {
        let default_root = Job::default();
        let root = self.registry.root().map(|r| r.as_ref()).unwrap_or(&default_root);
        let inputs = resolve_inputs(root, job, args, self.inputs.as_deref())?;
        let inherited = inputs.args();
        let ctx = job_context(
            inputs.params,
            inputs.options,
            &job.variables,
            self.source_dir.as_deref(),
            &job.name.to_string(),
        )?;

        let log = match &job.log {
            Some(spec) => Some(JobLog::start(&self.logger, &job.name, spec, &ctx)?),
            None => None,
        };
        let outcome = self.run_body(job, ctx, &inherited, depth);
        if let Some(log) = log {
            let finished = log.finish(&ForwardFrom {
                engine: self,
                depth,
            });
            match (&outcome, finished) {
                (Ok(_), Err(e)) => return Err(e),
                (Err(_), Err(e)) => tracing::warn!(job = %job.name, error = %e, "log forwarding failed"),
                _ => {}
            }
        }
        outcome
    }

    fn run_body(&self, job: &Job, ctx: EvalContext, inherited: &Args, depth: usize) -> Result<Outcome> {
        let mut results: Vec<Option<RunResult>> = Vec::new();

        if !job.depends_on.is_empty() {
            let deps = self.plan_dependencies(job, &ctx, inherited)?;
            results.extend(self.run_group(deps, job.concurrency, depth)?);
        }

        let (ctx, handled) = match decode(job)? {
            Plan::Static(plan) => (self.run_static_plan(job, plan, ctx, inherited, depth, &mut results)?, true),
            Plan::Dynamic(runs) => {
                let planned = runs
                    .iter()
                    .map(|run| self.plan_dynamic(&job.name, run, &ctx, inherited))
                    .collect::<Result<Vec<_>>>()?;
                results.extend(self.run_group(planned, job.concurrency, depth)?);
                (ctx, true)
            }
            Plan::Leaf => match &job.exec {
                Some(exec) => {
                    results.push(Some(self.exec_command(job, exec, &ctx)?));
                    (ctx, true)
                }
                None => (ctx, !job.depends_on.is_empty()),
            },
        };

        let result = aggregate(&results);
        self.check_assertions(job, &job.assertions, &ctx.with_scope("result", optional_value(&result)))?;
        Ok(Outcome { result, handled })
    }

    fn run_static_plan(
        &self,
        job: &Job,
        plan: StaticPlan,
        mut ctx: EvalContext,
        inherited: &Args,
        depth: usize,
        results: &mut Vec<Option<RunResult>>,
    ) -> Result<EvalContext> {
        let mut steps: IndexMap<String, Value> = IndexMap::new();
        for step in &plan.steps {
            if !step.needs.is_empty() {
                tracing::debug!(job = %job.name, step = %step.name, needs = ?step.needs, "needs recorded, not enforced");
            }
            let step_result = match (&step.run, &step.exec) {
                (Some(block), _) => {
                    let (block_results, _) = self.run_block(job, block, ctx.clone(), inherited, depth)?;
                    aggregate(&block_results)
                }
                (None, Some(exec)) => Some(self.exec_command(job, exec, &ctx)?),
                (None, None) => None,
            };
            steps.insert(step.name.clone(), optional_value(&step_result));
            results.push(step_result);
            ctx = ctx.with_scope("step", Value::Object(steps.clone()));
        }
        if let Some(block) = &plan.block {
            let (block_results, after) = self.run_block(job, block, ctx, inherited, depth)?;
            results.extend(block_results);
            ctx = after;
        }
        Ok(ctx)
    }

    /// Static runs as one group, then each phase in order. Completed phases
    /// are published in the `phase` scope.
    fn run_block(
        &self,
        job: &Job,
        block: &RunBlock,
        mut ctx: EvalContext,
        inherited: &Args,
        depth: usize,
    ) -> Result<(Vec<Option<RunResult>>, EvalContext)> {
        let planned = block
            .jobs
            .iter()
            .map(|run| self.plan_static(&job.name, run, &ctx, inherited).map(Some))
            .collect::<Result<Vec<_>>>()?;
        let mut results = self.run_group(planned, block.concurrency, depth)?;

        let mut phases: IndexMap<String, Value> = ctx
            .scope("phase")
            .and_then(Value::as_entries)
            .cloned()
            .unwrap_or_default();
        for phase in &block.phases {
            if !phase.needs.is_empty() {
                tracing::debug!(job = %job.name, phase = %phase.name, needs = ?phase.needs, "needs recorded, not enforced");
            }
            let planned = phase
                .jobs
                .iter()
                .map(|run| self.plan_static(&job.name, run, &ctx, inherited).map(Some))
                .collect::<Result<Vec<_>>>()?;
            let phase_results = self.run_group(planned, phase.concurrency, depth)?;
            let summary = aggregate(&phase_results).unwrap_or_default();
            results.extend(phase_results);

            let mut entry = match summary.to_value() {
                Value::Object(fields) => fields,
                _ => IndexMap::new(),
            };
            phases.insert(phase.name.clone(), Value::Object(entry.clone()));
            let scoped = ctx.with_scope("phase", Value::Object(phases.clone()));
            if let Value::Object(vars) = eval_variables(&scoped, &phase.variables, &job.name.to_string())? {
                entry.extend(vars);
            }
            phases.insert(phase.name.clone(), Value::Object(entry));
            ctx = ctx.with_scope("phase", Value::Object(phases.clone()));
        }
        Ok((results, ctx))
    }

    fn run_group(&self, runs: Vec<Option<PlannedRun>>, limit: Option<usize>, depth: usize) -> Result<Vec<Option<RunResult>>> {
        run_bounded(&runs, limit, |_, planned| match planned {
            None => Ok(None),
            Some(run) => {
                self.logger.log_run(&run.target.name, &run.args);
                tracing::debug!(job = %run.target.name, "dispatch");
                Ok(self.invoke_job(run.target.clone(), &run.args, depth + 1)?.result)
            }
        })
    }

    fn plan_static(&self, caller: &JobName, run: &StaticRun, ctx: &EvalContext, inherited: &Args) -> Result<PlannedRun> {
        let target = self.registry.lookup(caller, &run.job)?;
        let mut args = inherited.clone();
        args.extend(ctx.eval_args(&run.args)?);
        Ok(PlannedRun { target, args })
    }

    fn plan_dynamic(&self, caller: &JobName, run: &DynamicRun, ctx: &EvalContext, inherited: &Args) -> Result<Option<PlannedRun>> {
        if let Some(condition) = &run.condition {
            if !ctx.eval_bool(condition)? {
                tracing::debug!(job = %caller, target = run.job.source(), "condition false; skipped");
                return Ok(None);
            }
        }
        let name = ctx.eval_string(&run.job)?;
        let target = self.registry.lookup(caller, &name)?;
        let mut args = inherited.clone();
        if let Some(expr) = &run.args {
            let value = ctx.eval(expr)?;
            match value.as_entries() {
                Some(entries) => args.extend(entries.clone()),
                None if value.is_null() => {}
                None => {
                    return Err(Error::Eval {
                        expr: expr.source().to_string(),
                        message: format!("args must be an object, got {}", value.type_of()),
                    })
                }
            }
        }
        Ok(Some(PlannedRun { target, args }))
    }

    /// One run per `items` element, with `each = {key, value}`.
    fn plan_dependencies(&self, job: &Job, ctx: &EvalContext, inherited: &Args) -> Result<Vec<Option<PlannedRun>>> {
        let mut planned = Vec::new();
        for dep in &job.depends_on {
            let run = StaticRun {
                job: dep.job.clone(),
                args: dep.args.clone(),
            };
            let Some(items_expr) = &dep.items else {
                planned.push(Some(self.plan_static(&job.name, &run, ctx, inherited)?));
                continue;
            };
            let items = ctx.eval(items_expr)?;
            let pairs: Vec<(Value, Value)> = if let Some(list) = items.as_items() {
                list.iter()
                    .enumerate()
                    .map(|(i, v)| (Value::Number(i as f64), v.clone()))
                    .collect()
            } else if let Some(entries) = items.as_entries() {
                entries
                    .iter()
                    .map(|(k, v)| (Value::string(k.clone()), v.clone()))
                    .collect()
            } else {
                return Err(Error::Eval {
                    expr: items_expr.source().to_string(),
                    message: format!("items must be a list or map, got {}", items.type_of()),
                });
            };
            for (key, value) in pairs {
                let each = ctx.with_scope("each", Value::object([("key", key), ("value", value)]));
                planned.push(Some(self.plan_static(&job.name, &run, &each, inherited)?));
            }
        }
        Ok(planned)
    }

    fn exec_command(&self, job: &Job, exec: &ExecSpec, ctx: &EvalContext) -> Result<RunResult> {
        let mut spec = CommandSpec::new(ctx.eval_string(&exec.command)?);
        spec.interactive = exec.interactive;
        if let Some(expr) = &exec.args {
            spec.args = command_args(ctx, expr)?;
        }
        for (key, expr) in &exec.env {
            spec.env.insert(key.clone(), ctx.eval_string(expr)?);
        }
        if let Some(expr) = &exec.dir {
            spec.dir = Some(job.origin.join(ctx.eval_string(expr)?));
        }

        self.logger.log_exec(&spec);
        let output = self.runner.run(&spec)?;
        if !output.success() {
            tracing::error!(job = %job.name, command = %spec.display_line(), code = output.exit_code, stderr = %output.stderr.trim_end(), "command failed");
            return Err(Error::Exit {
                job: job.name.to_string(),
                code: output.exit_code,
            });
        }
        Ok(output.into())
    }

    fn check_assertions(&self, job: &Job, assertions: &[Assertion], ctx: &EvalContext) -> Result<()> {
        for assertion in assertions {
            if !ctx.eval_bool(&assertion.condition)? {
                return Err(Error::Assertion {
                    job: job.name.to_string(),
                    expr: assertion.condition.source().to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Argument list from a list expression; scalars are stringified.
fn command_args(ctx: &EvalContext, expr: &super::expr::Expression) -> Result<Vec<String>> {
    let value = ctx.eval(expr)?;
    let bad = |what: String| Error::Eval {
        expr: expr.source().to_string(),
        message: what,
    };
    let items = value
        .as_items()
        .ok_or_else(|| bad(format!("args must be a list, got {}", value.type_of())))?;
    items
        .iter()
        .map(|item| match item {
            Value::String(_) | Value::Number(_) | Value::Bool(_) => Ok(item.to_display_string()),
            other => Err(bad(format!("argument must be a scalar, got {}", other.type_of()))),
        })
        .collect()
}

/// Routes log forwards back into the engine at the forwarding job's depth.
struct ForwardFrom<'e> {
    engine: &'e Engine,
    depth: usize,
}

impl Forwarder for ForwardFrom<'_> {
    fn forward(&self, from: &JobName, run: &StaticRun, ctx: &EvalContext) -> Result<()> {
        let planned = self.engine.plan_static(from, run, ctx, &Args::new())?;
        self.engine.logger.log_run(&planned.target.name, &planned.args);
        tracing::debug!(from = %from, job = %planned.target.name, "forwarding log");
        self.engine
            .invoke_job(planned.target, &planned.args, self.depth + 1)
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::resolver::load_str;
    use crate::transport::record::RecordingRunner;
    use std::path::Path;

    fn engine(yaml: &str) -> (Engine, Arc<RecordingRunner>) {
        let registry = Arc::new(load_str(yaml, Path::new(".")).unwrap());
        let runner = Arc::new(
            RecordingRunner::new()
                .stdout("a", "A")
                .stdout("b", "B")
                .respond(
                    "fail",
                    ExecOutput {
                        exit_code: 7,
                        ..ExecOutput::default()
                    },
                ),
        );
        (Engine::new(registry).with_runner(runner.clone()), runner)
    }

    fn args(pairs: &[(&str, Value)]) -> Args {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_jt018_aggregate_skips_and_concatenates() {
        let r = |code, out: &str| {
            Some(RunResult {
                exit_code: code,
                stdout: out.into(),
                stderr: String::new(),
            })
        };
        let agg = aggregate(&[r(0, "A"), None, r(2, "B")]).unwrap();
        assert_eq!(agg.stdout, "AB");
        assert_eq!(agg.exit_code, 2);
        assert_eq!(aggregate(&[None, None]), None);
    }

    #[test]
    fn test_jt018_exec_leaf() {
        let (e, runner) = engine(
            r#"
jobs:
  hello:
    params: [{ name: who }]
    exec: { command: '"a"', args: '["hi", param.who, 3]' }
"#,
        );
        let out = e.invoke("hello", &args(&[("who", Value::string("bob"))])).unwrap();
        assert!(out.handled);
        assert_eq!(out.result.unwrap().stdout, "A");
        assert_eq!(runner.calls()[0].args, vec!["hi", "bob", "3"]);
    }

    #[test]
    fn test_jt018_leaf_without_exec_unhandled() {
        let (e, _) = engine("jobs:\n  noop: {}\n");
        let out = e.invoke("noop", &Args::new()).unwrap();
        assert!(!out.handled);
        assert_eq!(out.result, None);
    }

    #[test]
    fn test_jt018_job_not_found() {
        let (e, _) = engine("jobs:\n  a: {}\n");
        assert!(matches!(e.invoke("zzz", &Args::new()), Err(Error::JobNotFound(_))));
    }

    #[test]
    fn test_jt018_nonzero_exit_carries_code() {
        let (e, _) = engine("jobs:\n  f:\n    exec: { command: '\"fail\"' }\n");
        let err = e.invoke("f", &Args::new()).unwrap_err();
        assert_eq!(err.exit_code(), 7);
    }

    #[test]
    fn test_jt018_static_runs_inherit_and_override_args() {
        let (e, runner) = engine(
            r#"
params: [{ name: env, default: '"dev"' }]
jobs:
  echo:
    params: [{ name: msg }]
    exec: { command: '"a"', args: '[param.env, param.msg]' }
  ci:
    params: [{ name: msg, default: '"outer"' }]
    run:
      jobs:
        - job: echo
        - job: echo
          args: { msg: '"inner"' }
"#,
        );
        let out = e.invoke("ci", &args(&[("env", Value::string("prod"))])).unwrap();
        assert_eq!(out.result.unwrap().stdout, "AA");
        let calls: Vec<Vec<String>> = runner.calls().into_iter().map(|c| c.args).collect();
        assert_eq!(calls, vec![vec!["prod", "outer"], vec!["prod", "inner"]]);
    }

    #[test]
    fn test_jt018_dynamic_skip_and_aggregate() {
        let (e, runner) = engine(
            r#"
jobs:
  ja: { exec: { command: '"a"' } }
  jb: { exec: { command: '"b"' } }
  pick:
    dynamic:
      - job: '"ja"'
      - job: '"jb"'
        condition: 'false'
      - job: 'join("", ["j", "b"])'
"#,
        );
        let out = e.invoke("pick", &Args::new()).unwrap();
        assert_eq!(out.result.unwrap().stdout, "AB");
        assert_eq!(runner.calls().len(), 2);
    }

    #[test]
    fn test_jt018_dynamic_all_skipped() {
        let (e, _) = engine(
            "jobs:\n  ja: { exec: { command: '\"a\"' } }\n  pick:\n    dynamic:\n      - { job: '\"ja\"', condition: 'false' }\n",
        );
        let out = e.invoke("pick", &Args::new()).unwrap();
        assert!(out.handled);
        assert_eq!(out.result, None);
    }

    #[test]
    fn test_jt018_steps_scope_and_assertions() {
        let (e, _) = engine(
            r#"
jobs:
  s:
    steps:
      - name: first
        exec: { command: '"a"' }
      - name: second
        exec: { command: '"b"', args: '[step.first.stdout]' }
    assert:
      - condition: 'step.second.stdout == "B"'
      - condition: 'result.stdout == "AB"'
"#,
        );
        let out = e.invoke("s", &Args::new()).unwrap();
        assert_eq!(out.result.unwrap().stdout, "AB");
    }

    #[test]
    fn test_jt018_assertion_failure_names_expression() {
        let (e, _) = engine(
            "jobs:\n  s:\n    exec: { command: '\"a\"' }\n    assert:\n      - condition: 'result.stdout == \"nope\"'\n",
        );
        match e.invoke("s", &Args::new()).unwrap_err() {
            Error::Assertion { job, expr } => {
                assert_eq!(job, "s");
                assert_eq!(expr, r#"result.stdout == "nope""#);
            }
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn test_jt018_phases_publish_results() {
        let (e, runner) = engine(
            r#"
jobs:
  ja: { exec: { command: '"a"' } }
  jb:
    params: [{ name: from }]
    exec: { command: '"b"', args: '[param.from]' }
  release:
    run:
      phases:
        - name: build
          jobs: [{ job: ja }]
          variables:
            - name: tag
              value: '"v-${phase.build.stdout}"'
        - name: ship
          needs: [build]
          jobs: [{ job: jb, args: { from: 'phase.build.tag' } }]
"#,
        );
        let out = e.invoke("release", &Args::new()).unwrap();
        assert_eq!(out.result.unwrap().stdout, "AB");
        assert_eq!(runner.calls()[1].args, vec!["v-A"]);
    }

    #[test]
    fn test_jt018_dependencies_per_item() {
        let (e, runner) = engine(
            r#"
jobs:
  fetch:
    params: [{ name: url }]
    exec: { command: '"a"', args: '[param.url]' }
  all:
    depends_on:
      - job: fetch
        items: '["x", "y"]'
        args: { url: '"${each.key}:${each.value}"' }
"#,
        );
        let out = e.invoke("all", &Args::new()).unwrap();
        assert!(out.handled);
        let calls: Vec<Vec<String>> = runner.calls().into_iter().map(|c| c.args).collect();
        assert_eq!(calls, vec![vec!["0:x"], vec!["1:y"]]);
    }

    #[test]
    fn test_jt018_recursion_limit() {
        let (e, _) = engine("jobs:\n  loop:\n    run:\n      jobs: [{ job: loop }]\n");
        let e = e.with_max_depth(5);
        assert!(matches!(
            e.invoke("loop", &Args::new()),
            Err(Error::RecursionLimit { limit: 5, .. })
        ));
    }

    #[test]
    fn test_jt018_run_events_logged_before_dispatch() {
        let (e, _) = engine(
            "jobs:\n  ja: { exec: { command: '\"a\"' } }\n  ci:\n    run: { jobs: [{ job: ja }] }\n",
        );
        e.invoke("ci", &Args::new()).unwrap();
        let kinds: Vec<&str> = e.logger().events().iter().map(|ev| ev.type_name()).collect();
        assert_eq!(kinds, vec!["run", "run", "exec"]);
    }

    #[test]
    fn test_jt018_source_scope_from_cache_dir() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(
            load_str(
                "jobs:\n  s:\n    exec: { command: '\"a\"', args: '[source.dir]' }\n",
                Path::new("."),
            )
            .unwrap(),
        );
        let config = EngineConfig {
            record_only: true,
            cache_dir: Some(dir.path().to_path_buf()),
            ..EngineConfig::default()
        };
        let e = Engine::from_config(registry, &config);
        let out = e.invoke("s", &Args::new()).unwrap();
        assert!(out.handled);
    }
}
