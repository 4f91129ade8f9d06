//! JT-005: Body decoding.
//!
//! A job's raw `steps`/`run` are decoded as a static plan first; only when no
//! run block is present is `dynamic` tried. Any other decode failure is fatal.

use super::error::{Error, Result};
use super::types::{DynamicRun, Job, RunBlock, Step};

/// What a job executes once its inputs are bound.
#[derive(Debug, Clone)]
pub enum Plan {
    Static(StaticPlan),
    Dynamic(Vec<DynamicRun>),
    /// No run block; handled by `exec` or not at all.
    Leaf,
}

#[derive(Debug, Clone, Default)]
pub struct StaticPlan {
    pub steps: Vec<Step>,
    pub block: Option<RunBlock>,
}

#[derive(Debug)]
enum DecodeError {
    NoRunBlock,
    Invalid {
        what: &'static str,
        message: String,
    },
}

fn decode_static(job: &Job) -> std::result::Result<StaticPlan, DecodeError> {
    if job.steps.is_none() && job.run.is_none() {
        return Err(DecodeError::NoRunBlock);
    }
    let mut plan = StaticPlan::default();
    if let Some(raw) = &job.steps {
        plan.steps = serde_yaml_ng::from_value(raw.clone()).map_err(|e| DecodeError::Invalid {
            what: "steps",
            message: e.to_string(),
        })?;
        for step in &plan.steps {
            if step.run.is_some() == step.exec.is_some() {
                return Err(DecodeError::Invalid {
                    what: "steps",
                    message: format!("step '{}' needs exactly one of run or exec", step.name),
                });
            }
        }
    }
    if let Some(raw) = &job.run {
        plan.block = Some(serde_yaml_ng::from_value(raw.clone()).map_err(|e| {
            DecodeError::Invalid {
                what: "run",
                message: e.to_string(),
            }
        })?);
    }
    Ok(plan)
}

fn decode_dynamic(job: &Job) -> std::result::Result<Vec<DynamicRun>, DecodeError> {
    let raw = job.dynamic.as_ref().ok_or(DecodeError::NoRunBlock)?;
    serde_yaml_ng::from_value(raw.clone()).map_err(|e| DecodeError::Invalid {
        what: "dynamic",
        message: e.to_string(),
    })
}

/// Decode the job's body into a run plan.
pub fn decode(job: &Job) -> Result<Plan> {
    let invalid = |what, message| Error::Decode {
        job: job.name.to_string(),
        what,
        message,
    };
    match decode_static(job) {
        Ok(plan) => {
            if job.dynamic.is_some() {
                tracing::warn!(job = %job.name, "static run block present; ignoring dynamic runs");
            }
            Ok(Plan::Static(plan))
        }
        Err(DecodeError::NoRunBlock) => match decode_dynamic(job) {
            Ok(runs) => Ok(Plan::Dynamic(runs)),
            Err(DecodeError::NoRunBlock) => Ok(Plan::Leaf),
            Err(DecodeError::Invalid { what, message }) => Err(invalid(what, message)),
        },
        Err(DecodeError::Invalid { what, message }) => Err(invalid(what, message)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(yaml: &str) -> Job {
        serde_yaml_ng::from_str(yaml).unwrap()
    }

    #[test]
    fn test_jt005_static_plan() {
        let j = job(r#"
steps:
  - name: compile
    exec: { command: '"make"' }
run:
  concurrency: 2
  jobs:
    - job: test
      args: { n: "1" }
  phases:
    - name: deploy
      jobs: [{ job: push }]
"#);
        match decode(&j).unwrap() {
            Plan::Static(plan) => {
                assert_eq!(plan.steps.len(), 1);
                let block = plan.block.unwrap();
                assert_eq!(block.concurrency, Some(2));
                assert_eq!(block.jobs[0].job, "test");
                assert_eq!(block.phases[0].name, "deploy");
            }
            other => panic!("expected static plan, got {:?}", other),
        }
    }

    #[test]
    fn test_jt005_dynamic_only_without_run_block() {
        let j = job(r#"
dynamic:
  - job: '"build ${param.kind}"'
    condition: 'param.kind != ""'
"#);
        assert!(matches!(decode(&j).unwrap(), Plan::Dynamic(runs) if runs.len() == 1));
    }

    #[test]
    fn test_jt005_leaf_when_no_body() {
        let j = job("exec: { command: '\"true\"' }");
        assert!(matches!(decode(&j).unwrap(), Plan::Leaf));
    }

    #[test]
    fn test_jt005_invalid_static_is_fatal() {
        let j = job(r#"
run:
  jobs: "not a list"
dynamic:
  - job: '"x"'
"#);
        let err = decode(&j).unwrap_err();
        assert!(matches!(err, Error::Decode { what: "run", .. }), "{err}");
    }

    #[test]
    fn test_jt005_step_needs_one_action() {
        let j = job("steps:\n  - name: empty\n");
        assert!(matches!(decode(&j).unwrap_err(), Error::Decode { what: "steps", .. }));
    }

    #[test]
    fn test_jt005_invalid_dynamic() {
        let j = job("dynamic:\n  - args: '{}'\n");
        assert!(matches!(decode(&j).unwrap_err(), Error::Decode { what: "dynamic", .. }));
    }
}
