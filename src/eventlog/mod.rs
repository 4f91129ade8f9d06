//! JT-010: Append-only event log with dynamically registered collectors.
//!
//! Every job dispatch (`run`) and every external command (`exec`) is appended
//! as a timestamped [`Event`] and handed synchronously to each registered
//! [`Collector`], in registration order. The event list and the collector
//! registry have separate locks; neither is held while a collector runs.

pub mod collector;
pub mod trace;

use crate::core::error::Result;
use crate::core::inputs::Args;
use crate::core::types::JobName;
use crate::core::value::{Type, Value};
use crate::transport::CommandSpec;
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Run {
        job: String,
        args: Args,
    },
    Exec {
        command: String,
        args: Vec<String>,
        dir: Option<String>,
    },
}

/// Immutable, timestamped event.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub ts: DateTime<Utc>,
    pub kind: EventKind,
}

impl Event {
    pub fn run(job: &JobName, args: &Args) -> Self {
        Self {
            ts: Utc::now(),
            kind: EventKind::Run {
                job: job.to_string(),
                args: args.clone(),
            },
        }
    }

    pub fn exec(spec: &CommandSpec) -> Self {
        Self {
            ts: Utc::now(),
            kind: EventKind::Exec {
                command: spec.command.clone(),
                args: spec.args.clone(),
                dir: spec.dir.as_ref().map(|d| d.display().to_string()),
            },
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self.kind {
            EventKind::Run { .. } => "run",
            EventKind::Exec { .. } => "exec",
        }
    }

    /// The `event` scope seen by collect rules:
    /// `{type, ts, run: {job, args} | null, exec: {command, args, dir} | null}`.
    pub fn to_value(&self) -> Value {
        let (run, exec) = match &self.kind {
            EventKind::Run { job, args } => (
                Value::object([
                    ("job", Value::string(job.clone())),
                    ("args", Value::Object(args.clone())),
                ]),
                Value::Null,
            ),
            EventKind::Exec { command, args, dir } => (
                Value::Null,
                Value::object([
                    ("command", Value::string(command.clone())),
                    (
                        "args",
                        Value::List(Type::String, args.iter().cloned().map(Value::String).collect()),
                    ),
                    ("dir", dir.clone().map(Value::String).unwrap_or(Value::Null)),
                ]),
            ),
        };
        Value::object([
            ("type", Value::string(self.type_name())),
            (
                "ts",
                Value::string(self.ts.to_rfc3339_opts(SecondsFormat::Millis, true)),
            ),
            ("run", run),
            ("exec", exec),
        ])
    }
}

/// Observes events; returns the line it recorded, if any.
pub trait Collector: Send + Sync {
    fn collect(&self, event: &Event) -> Result<Option<String>>;
}

#[derive(Default)]
pub struct EventLogger {
    events: RwLock<Vec<Event>>,
    collectors: Mutex<BTreeMap<u64, Arc<dyn Collector>>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for EventLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLogger")
            .field("events", &self.len())
            .field("collectors", &self.collector_count())
            .finish()
    }
}

impl EventLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// A logger with the trace collector permanently registered.
    pub fn with_tracing() -> Self {
        let logger = Self::new();
        logger
            .register(Arc::new(trace::TraceCollector))
            .forget();
        logger
    }

    pub fn log_run(&self, job: &JobName, args: &Args) {
        self.append(Event::run(job, args));
    }

    pub fn log_exec(&self, spec: &CommandSpec) {
        self.append(Event::exec(spec));
    }

    fn append(&self, event: Event) {
        self.events
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        let snapshot: Vec<Arc<dyn Collector>> = self
            .collectors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for collector in snapshot {
            if let Err(e) = collector.collect(&event) {
                tracing::warn!(event = event.type_name(), error = %e, "collector failed");
            }
        }
    }

    /// Snapshot of every event so far, in append order.
    pub fn events(&self) -> Vec<Event> {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.events.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn collector_count(&self) -> usize {
        self.collectors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Register a collector. It stays registered until the returned
    /// [`Registration`] is deregistered or dropped.
    pub fn register(&self, collector: Arc<dyn Collector>) -> Registration<'_> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.collectors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, collector);
        Registration {
            logger: self,
            id: Some(id),
        }
    }

    fn deregister(&self, id: u64) {
        self.collectors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }
}

/// Deregistration handle returned by [`EventLogger::register`].
#[must_use = "dropping a registration deregisters the collector"]
pub struct Registration<'a> {
    logger: &'a EventLogger,
    id: Option<u64>,
}

impl Registration<'_> {
    pub fn deregister(mut self) {
        if let Some(id) = self.id.take() {
            self.logger.deregister(id);
        }
    }

    /// Keep the collector registered for the logger's lifetime.
    pub fn forget(mut self) {
        self.id = None;
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.logger.deregister(id);
        }
    }
}
