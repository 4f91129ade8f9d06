//! JT-008: YAML parsing and validation.
//!
//! Parses job documents and validates structural constraints of a loaded
//! registry:
//! - input names are unique per job (parameters and options share one namespace)
//! - option short aliases are unique
//! - mandatory parameters do not follow optional ones
//! - run bodies decode, and static run targets exist

use super::body::{decode, Plan};
use super::error::{Error, Result};
use super::inputs::{effective_options, effective_params};
use super::resolver::Registry;
use super::types::{Job, JobName, RunBlock};
use std::collections::HashSet;
use std::path::Path;

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Parse one document into its root job. An empty document is an empty root.
pub fn parse_document(yaml: &str, location: &str) -> Result<Job> {
    if yaml.trim().is_empty() {
        return Ok(Job::default());
    }
    serde_yaml_ng::from_str(yaml).map_err(|e| Error::Parse {
        location: location.to_string(),
        message: e.to_string(),
    })
}

/// Pre-order walk of the nested `jobs` tree, assigning hierarchical names and
/// the defining directory.
pub fn flatten(root: Job, origin: &Path) -> Vec<Job> {
    let mut out = Vec::new();
    flatten_into(root, JobName::root(), origin, &mut out);
    out
}

fn flatten_into(mut job: Job, name: JobName, origin: &Path, out: &mut Vec<Job>) {
    let children = std::mem::take(&mut job.jobs);
    job.name = name.clone();
    job.origin = origin.to_path_buf();
    out.push(job);
    for (key, child) in children {
        flatten_into(child, name.child(&key), origin, out);
    }
}

/// Validate a loaded registry. Returns a list of errors (empty = valid).
pub fn validate_registry(registry: &Registry) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let empty_root = Job::default();
    let root = registry.root().map(|r| r.as_ref()).unwrap_or(&empty_root);

    for job in registry.jobs() {
        let label = if job.name.is_root() {
            "<root>".to_string()
        } else {
            job.name.to_string()
        };
        let mut push = |message: String| {
            errors.push(ValidationError {
                message: format!("job '{}': {}", label, message),
            })
        };

        let params = match effective_params(root, job) {
            Ok(p) => p,
            Err(e) => {
                push(e.to_string());
                continue;
            }
        };
        let options = match effective_options(root, job) {
            Ok(o) => o,
            Err(e) => {
                push(e.to_string());
                continue;
            }
        };

        let mut seen = HashSet::new();
        for name in params.iter().map(|p| &p.name).chain(options.iter().map(|o| &o.name)) {
            if !seen.insert(name) {
                push(format!("duplicate input '{}'", name));
            }
        }

        let mut shorts = HashSet::new();
        for short in options.iter().filter_map(|o| o.short) {
            if !shorts.insert(short) {
                push(format!("duplicate short option '-{}'", short));
            }
        }

        let mut optional_seen = false;
        for p in &params {
            let optional = p.default.is_some() || !p.env.is_empty();
            if optional_seen && !optional {
                push(format!(
                    "mandatory parameter '{}' follows an optional parameter",
                    p.name
                ));
            }
            optional_seen |= optional;
        }

        if job.exec.is_some() && job.has_body() {
            push("exec cannot be combined with steps, run or dynamic".to_string());
        }

        let mut targets: Vec<&str> = job.depends_on.iter().map(|d| d.job.as_str()).collect();
        if let Some(log) = &job.log {
            targets.extend(log.forward.iter().map(|f| f.job.as_str()));
        }
        let plan = match decode(job) {
            Ok(plan) => Some(plan),
            Err(e) => {
                push(e.to_string());
                None
            }
        };
        if let Some(Plan::Static(plan)) = &plan {
            for step in &plan.steps {
                if let Some(block) = &step.run {
                    collect_block_targets(block, &mut targets);
                }
            }
            if let Some(block) = &plan.block {
                collect_block_targets(block, &mut targets);
            }
        }
        for target in targets {
            if registry.lookup(&job.name, target).is_err() {
                push(format!("runs unknown job '{}'", target));
            }
        }
    }

    for test in &root.tests {
        if registry.lookup(&JobName::root(), &test.run.job).is_err() {
            errors.push(ValidationError {
                message: format!("test '{}' runs unknown job '{}'", test.name, test.run.job),
            });
        }
    }

    errors
}

fn collect_block_targets<'a>(block: &'a RunBlock, out: &mut Vec<&'a str>) {
    let runs = block
        .jobs
        .iter()
        .chain(block.phases.iter().flat_map(|p| p.jobs.iter()));
    out.extend(runs.map(|r| r.job.as_str()));
}
