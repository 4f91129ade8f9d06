//! JT-014: Per-job log collection and forwarding.
//!
//! A job with a `log` spec registers a [`JobCollector`] for the duration of
//! its invocation. Each event is matched against the `collect` rules in
//! order (with the event bound to the `event` scope); the first matching
//! rule's `format` becomes a buffered line. Finishing the [`JobLog`] writes
//! the buffer to the log file and invokes every `forward` run with a `log`
//! scope `{file, lines}`.

use super::{Collector, Event, EventLogger, Registration};
use crate::core::context::EvalContext;
use crate::core::error::{Error, Result};
use crate::core::types::{CollectRule, JobName, LogSpec, StaticRun};
use crate::core::value::{Type, Value};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

/// Dispatches forward runs; implemented by the engine.
pub trait Forwarder: Send + Sync {
    fn forward(&self, from: &JobName, run: &StaticRun, ctx: &EvalContext) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LiveStream {
    Stdout,
    Stderr,
}

pub struct JobCollector {
    rules: Vec<CollectRule>,
    ctx: EvalContext,
    stream: Option<LiveStream>,
    lines: Mutex<Vec<String>>,
    /// First rule that failed to evaluate; fails the log at finish.
    failure: Mutex<Option<Error>>,
}

impl JobCollector {
    pub fn new(spec: &LogSpec, ctx: EvalContext) -> Result<Self> {
        let stream = match &spec.stream {
            None => None,
            Some(expr) => match ctx.eval(expr)? {
                Value::Null => None,
                Value::String(s) if s.is_empty() => None,
                Value::String(s) if s == "stdout" => Some(LiveStream::Stdout),
                Value::String(s) if s == "stderr" => Some(LiveStream::Stderr),
                other => {
                    return Err(Error::Eval {
                        expr: expr.source().to_string(),
                        message: format!(
                            "stream must be \"stdout\" or \"stderr\", got {}",
                            other.to_display_string()
                        ),
                    })
                }
            },
        };
        Ok(Self {
            rules: spec.collect.clone(),
            ctx,
            stream,
            lines: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
        })
    }

    /// Buffered lines so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Take the first collect-rule error, if any.
    pub fn take_failure(&self) -> Option<Error> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn apply_rules(&self, event: &Event) -> Result<Option<String>> {
        let ctx = self.ctx.with_scope("event", event.to_value());
        for rule in &self.rules {
            if !ctx.eval_bool(&rule.condition)? {
                continue;
            }
            let line = ctx.eval_string(&rule.format)?;
            match self.stream {
                Some(LiveStream::Stdout) => println!("{}", line),
                Some(LiveStream::Stderr) => eprintln!("{}", line),
                None => {}
            }
            self.lines
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(line.clone());
            return Ok(Some(line));
        }
        Ok(None)
    }
}

impl Collector for JobCollector {
    fn collect(&self, event: &Event) -> Result<Option<String>> {
        self.apply_rules(event).map_err(|e| {
            let mut failure = self.failure.lock().unwrap_or_else(PoisonError::into_inner);
            if failure.is_none() {
                *failure = Some(Error::Eval {
                    expr: format!("collect rule on {} event", event.type_name()),
                    message: e.to_string(),
                });
            }
            e
        })
    }
}

/// An active log for one job invocation.
pub struct JobLog<'a> {
    job: JobName,
    spec: LogSpec,
    ctx: EvalContext,
    collector: Arc<JobCollector>,
    registration: Registration<'a>,
}

impl<'a> JobLog<'a> {
    /// Register a collector for `job` on `logger`.
    pub fn start(logger: &'a EventLogger, job: &JobName, spec: &LogSpec, ctx: &EvalContext) -> Result<Self> {
        let collector = Arc::new(JobCollector::new(spec, ctx.clone())?);
        let registration = logger.register(collector.clone());
        Ok(Self {
            job: job.clone(),
            spec: spec.clone(),
            ctx: ctx.clone(),
            collector,
            registration,
        })
    }

    /// Deregister, write the log file, then run every forward.
    pub fn finish(self, forwarder: &dyn Forwarder) -> Result<PathBuf> {
        self.registration.deregister();
        if let Some(e) = self.collector.take_failure() {
            return Err(e);
        }
        let lines = self.collector.lines();
        let path = match &self.spec.file {
            Some(expr) => PathBuf::from(self.ctx.eval_string(expr)?),
            None => fresh_log_path()?,
        };
        write_lines(&path, &lines)?;
        tracing::debug!(job = %self.job, path = %path.display(), lines = lines.len(), "log written");

        let log = Value::object([
            ("file", Value::string(path.display().to_string())),
            (
                "lines",
                Value::List(Type::String, lines.into_iter().map(Value::String).collect()),
            ),
        ]);
        let ctx = self.ctx.with_scope("log", log);
        for run in &self.spec.forward {
            forwarder.forward(&self.job, run, &ctx)?;
        }
        Ok(path)
    }
}

fn fresh_log_path() -> Result<PathBuf> {
    let tmp = std::env::temp_dir();
    let file = tempfile::Builder::new()
        .prefix("jobtree-")
        .suffix(".log")
        .tempfile()
        .map_err(|e| Error::io(&tmp, e))?;
    file.into_temp_path()
        .keep()
        .map_err(|e| Error::io(&tmp, e.error))
}

fn write_lines(path: &std::path::Path, lines: &[String]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    let mut file = std::fs::File::create(path).map_err(|e| Error::io(path, e))?;
    for line in lines {
        writeln!(file, "{}", line).map_err(|e| Error::io(path, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::expr::Expression;
    use crate::transport::CommandSpec;

    #[derive(Default)]
    struct Captured {
        runs: Mutex<Vec<(String, Value)>>,
    }

    impl Forwarder for Captured {
        fn forward(&self, _from: &JobName, run: &StaticRun, ctx: &EvalContext) -> Result<()> {
            let log = ctx.scope("log").cloned().unwrap_or(Value::Null);
            self.runs.lock().unwrap().push((run.job.clone(), log));
            Ok(())
        }
    }

    fn spec(file: Option<&str>) -> LogSpec {
        LogSpec {
            file: file.map(|f| Expression::literal(Value::string(f))),
            stream: None,
            collect: vec![CollectRule {
                condition: Expression::parse(r#"event.type == "exec""#).unwrap(),
                format: Expression::parse(r#""${event.exec.command}""#).unwrap(),
            }],
            forward: vec![StaticRun {
                job: "ship".into(),
                args: Default::default(),
            }],
        }
    }

    #[test]
    fn test_jt014_collect_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out/job.log");
        let logger = EventLogger::new();
        let log = JobLog::start(
            &logger,
            &JobName::parse("build"),
            &spec(Some(target.to_str().unwrap())),
            &EvalContext::new(),
        )
        .unwrap();

        logger.log_run(&JobName::parse("other"), &Default::default());
        logger.log_exec(&CommandSpec::new("echo").arg("hi"));
        assert_eq!(log.collector.lines(), vec!["echo"]);

        let forwarder = Captured::default();
        let path = log.finish(&forwarder).unwrap();
        assert_eq!(path, target);
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "echo\n");

        let runs = forwarder.runs.lock().unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].0, "ship");
        assert_eq!(
            runs[0].1.get("file"),
            Some(&Value::string(target.display().to_string()))
        );
        assert_eq!(logger.collector_count(), 0);
    }

    #[test]
    fn test_jt014_first_matching_rule_wins() {
        let mut s = spec(None);
        s.collect.push(CollectRule {
            condition: Expression::parse("true").unwrap(),
            format: Expression::parse(r#""any ${event.type}""#).unwrap(),
        });
        let c = JobCollector::new(&s, EvalContext::new()).unwrap();
        let exec = Event::exec(&CommandSpec::new("ls"));
        let run = Event::run(&JobName::root(), &Default::default());
        assert_eq!(c.collect(&exec).unwrap().as_deref(), Some("ls"));
        assert_eq!(c.collect(&run).unwrap().as_deref(), Some("any run"));
        assert_eq!(c.lines(), vec!["ls", "any run"]);
    }

    #[test]
    fn test_jt014_no_match_records_nothing() {
        let c = JobCollector::new(&spec(None), EvalContext::new()).unwrap();
        let run = Event::run(&JobName::root(), &Default::default());
        assert_eq!(c.collect(&run).unwrap(), None);
        assert!(c.lines().is_empty());
    }

    #[test]
    fn test_jt014_temp_file_when_unset() {
        let logger = EventLogger::new();
        let log = JobLog::start(&logger, &JobName::root(), &spec(None), &EvalContext::new()).unwrap();
        logger.log_exec(&CommandSpec::new("make"));
        let path = log.finish(&Captured::default()).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "make\n");
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_jt014_failing_rule_fails_finish() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("job.log");
        let mut s = spec(Some(target.to_str().unwrap()));
        s.collect = vec![CollectRule {
            condition: Expression::parse("true").unwrap(),
            format: Expression::parse(r#""${event.exec.command}""#).unwrap(),
        }];
        let logger = EventLogger::new();
        let log = JobLog::start(&logger, &JobName::parse("ci"), &s, &EvalContext::new()).unwrap();
        logger.log_run(&JobName::parse("a"), &Default::default());
        logger.log_exec(&CommandSpec::new("echo"));

        let forwarder = Captured::default();
        let err = log.finish(&forwarder).unwrap_err();
        assert!(err.to_string().contains("run event"), "{err}");
        assert!(forwarder.runs.lock().unwrap().is_empty());
        assert!(!target.exists());
        assert_eq!(logger.collector_count(), 0);
    }

    #[test]
    fn test_jt014_bad_stream() {
        let mut s = spec(None);
        s.stream = Some(Expression::literal(Value::string("pipe")));
        assert!(JobCollector::new(&s, EvalContext::new()).is_err());
    }
}
