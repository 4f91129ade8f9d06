//! JT-006: Parameter and option resolution.
//!
//! Effective inputs are the root job's merged with the job's own, root first.
//! Each input resolves from the caller's value, then (parameters only) its
//! environment variables, then its default, then the pluggable
//! [`InputResolver`] in one batch per job. Every value is coerced to its
//! declared type.

use super::context::EvalContext;
use super::error::{Error, Result};
use super::resolver::{merge_specs, InputSpec};
use super::types::{Job, JobName, OptionSpec, Parameter, TypeConstraint};
use super::value::{coerce, Type, Value};
use indexmap::IndexMap;

/// Arguments passed to an invocation, keyed by input name.
pub type Args = IndexMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Parameter,
    Option,
}

impl InputKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Parameter => "parameter",
            Self::Option => "option",
        }
    }
}

/// An input with no caller value, no environment value and no default.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingInput {
    pub kind: InputKind,
    pub name: String,
    pub ty: Type,
    pub description: Option<String>,
}

/// Fills inputs nothing else could resolve (e.g. an interactive prompt).
///
/// Called at most once per job invocation with every pending input. Returned
/// values are coerced like caller values; names left out stay missing.
pub trait InputResolver: Send + Sync {
    fn resolve_missing(&self, job: &JobName, pending: &[PendingInput]) -> Result<Args>;
}

/// Typed inputs of one invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedInputs {
    pub params: IndexMap<String, Value>,
    pub options: IndexMap<String, Value>,
}

impl ResolvedInputs {
    /// Parameters and options as one argument map, parameters first.
    pub fn args(&self) -> Args {
        self.params
            .iter()
            .chain(self.options.iter())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Root parameters followed by the job's own.
pub fn effective_params(root: &Job, job: &Job) -> Result<Vec<Parameter>> {
    if job.name.is_root() {
        return Ok(root.params.clone());
    }
    log_shadowed(job, &root.params, &job.params);
    merge_specs(&root.params, &job.params)
}

pub fn effective_options(root: &Job, job: &Job) -> Result<Vec<OptionSpec>> {
    if job.name.is_root() {
        return Ok(root.options.clone());
    }
    log_shadowed(job, &root.options, &job.options);
    merge_specs(&root.options, &job.options)
}

/// Names the job redeclares that the root already declares.
fn shadowed<'a, S: InputSpec>(root: &[S], own: &'a [S]) -> Vec<&'a str> {
    own.iter()
        .map(InputSpec::spec_name)
        .filter(|name| root.iter().any(|r| r.spec_name() == *name))
        .collect()
}

fn log_shadowed<S: InputSpec>(job: &Job, root: &[S], own: &[S]) {
    for name in shadowed(root, own) {
        tracing::debug!(
            job = %job.name,
            kind = S::KIND,
            input = name,
            "root declaration kept over job's own"
        );
    }
}

struct Slot<'a> {
    kind: InputKind,
    name: &'a str,
    ty: &'a TypeConstraint,
    description: Option<&'a String>,
    value: Option<Value>,
}

/// Resolve every effective input of `job` against the caller's arguments.
pub fn resolve_inputs(
    root: &Job,
    job: &Job,
    supplied: &Args,
    resolver: Option<&dyn InputResolver>,
) -> Result<ResolvedInputs> {
    let params = effective_params(root, job)?;
    let options = effective_options(root, job)?;
    let defaults_ctx = EvalContext::new();
    let context = |kind: InputKind, name: &str| format!("job '{}': {} '{}'", job.name, kind.as_str(), name);

    let mut slots = Vec::with_capacity(params.len() + options.len());
    for p in &params {
        let value = match supplied.get(&p.name) {
            Some(v) => Some(v.clone()),
            None => match from_env(&p.env, &p.ty.ty) {
                Some(parsed) => Some(
                    parsed.map_err(|e| Error::type_mismatch(context(InputKind::Parameter, &p.name), e))?,
                ),
                None => p.default.as_ref().map(|d| defaults_ctx.eval(d)).transpose()?,
            },
        };
        slots.push(Slot {
            kind: InputKind::Parameter,
            name: &p.name,
            ty: &p.ty,
            description: p.description.as_ref(),
            value,
        });
    }
    for o in &options {
        let value = match supplied.get(&o.name) {
            Some(v) => Some(v.clone()),
            None => o.default.as_ref().map(|d| defaults_ctx.eval(d)).transpose()?,
        };
        slots.push(Slot {
            kind: InputKind::Option,
            name: &o.name,
            ty: &o.ty,
            description: o.description.as_ref(),
            value,
        });
    }

    let pending: Vec<PendingInput> = slots
        .iter()
        .filter(|s| s.value.is_none())
        .map(|s| PendingInput {
            kind: s.kind,
            name: s.name.to_string(),
            ty: s.ty.ty.clone(),
            description: s.description.cloned(),
        })
        .collect();
    if !pending.is_empty() {
        if let Some(resolver) = resolver {
            tracing::debug!(job = %job.name, count = pending.len(), "resolving pending inputs");
            let mut filled = resolver.resolve_missing(&job.name, &pending)?;
            for slot in slots.iter_mut().filter(|s| s.value.is_none()) {
                slot.value = filled.shift_remove(slot.name);
            }
        }
    }

    let mut out = ResolvedInputs::default();
    for slot in slots {
        let value = slot.value.ok_or_else(|| Error::Missing {
            kind: slot.kind.as_str(),
            name: slot.name.to_string(),
            job: job.name.to_string(),
        })?;
        let value = coerce(value, &slot.ty.ty)
            .map_err(|e| Error::type_mismatch(context(slot.kind, slot.name), e))?;
        match slot.kind {
            InputKind::Parameter => out.params.insert(slot.name.to_string(), value),
            InputKind::Option => out.options.insert(slot.name.to_string(), value),
        };
    }
    Ok(out)
}

fn from_env(vars: &[String], ty: &Type) -> Option<std::result::Result<Value, super::value::TypeError>> {
    vars.iter()
        .find_map(|name| std::env::var(name).ok())
        .map(|raw| Value::parse_raw(&raw, ty))
}
