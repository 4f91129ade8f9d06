//! JT-004: Job document model.
//!
//! Defines the YAML schema types for jobs, inputs, runs, log specs and tests.
//! A document's top level is the root job; nested `jobs` give hierarchical
//! names. Run bodies (`steps`, `run`, `dynamic`) stay raw until dispatch.

use super::expr::{parse_type, Expression, ParseError};
use super::value::Type;
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::path::PathBuf;

// ============================================================================
// Names
// ============================================================================

/// Hierarchical job name. The empty name is the root job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobName(Vec<String>);

impl JobName {
    pub fn root() -> Self {
        Self::default()
    }

    /// Split a space-separated name into segments.
    pub fn parse(name: &str) -> Self {
        Self(name.split_whitespace().map(str::to_string).collect())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// `self` followed by every segment of `child`.
    pub fn join(&self, child: &JobName) -> Self {
        let mut segments = self.0.clone();
        segments.extend(child.0.iter().cloned());
        Self(segments)
    }

    pub fn child(&self, segment: &str) -> Self {
        self.join(&Self::parse(segment))
    }

    /// Every proper prefix, longest first, ending with the root.
    pub fn ancestors(&self) -> impl Iterator<Item = JobName> + '_ {
        (0..self.0.len()).rev().map(|n| Self(self.0[..n].to_vec()))
    }
}

impl fmt::Display for JobName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(" "))
    }
}

// ============================================================================
// Jobs
// ============================================================================

/// A job as declared in a document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Job {
    /// Registry name; assigned by the resolver.
    #[serde(skip)]
    pub name: JobName,

    /// Directory of the defining document; relative paths resolve from here.
    #[serde(skip)]
    pub origin: PathBuf,

    #[serde(default)]
    pub description: Option<String>,

    /// Positional inputs
    #[serde(default)]
    pub params: Vec<Parameter>,

    /// Named inputs
    #[serde(default)]
    pub options: Vec<OptionSpec>,

    #[serde(default)]
    pub variables: Vec<Variable>,

    #[serde(default)]
    pub depends_on: Vec<Dependency>,

    /// Worker bound for run groups; unset or 0 runs sequentially
    #[serde(default)]
    pub concurrency: Option<usize>,

    /// Leaf command
    #[serde(default)]
    pub exec: Option<ExecSpec>,

    #[serde(default)]
    pub log: Option<LogSpec>,

    #[serde(default, rename = "assert")]
    pub assertions: Vec<Assertion>,

    /// Import sources: single path or list
    #[serde(default)]
    pub import: Imports,

    /// Nested jobs
    #[serde(default)]
    pub jobs: IndexMap<String, Job>,

    /// Record/verify scenarios (root only)
    #[serde(default)]
    pub tests: Vec<TestSpec>,

    // -- Raw body, decoded at dispatch --
    #[serde(default)]
    pub steps: Option<serde_yaml_ng::Value>,

    #[serde(default)]
    pub run: Option<serde_yaml_ng::Value>,

    #[serde(default)]
    pub dynamic: Option<serde_yaml_ng::Value>,
}

impl Job {
    /// Whether the job declares any run block.
    pub fn has_body(&self) -> bool {
        self.steps.is_some() || self.run.is_some() || self.dynamic.is_some()
    }
}

/// Import sources: a single locator or a list.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Imports {
    #[default]
    None,
    Single(String),
    Multiple(Vec<String>),
}

impl Imports {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Self::None => Vec::new(),
            Self::Single(s) => vec![s.clone()],
            Self::Multiple(v) => v.clone(),
        }
    }
}

// ============================================================================
// Inputs
// ============================================================================

/// Positional input, bound to raw arguments in declaration order.
#[derive(Debug, Clone, Deserialize)]
pub struct Parameter {
    pub name: String,

    #[serde(default, rename = "type")]
    pub ty: TypeConstraint,

    /// No default makes the parameter mandatory
    #[serde(default)]
    pub default: Option<Expression>,

    /// Environment variables consulted before the default
    #[serde(default)]
    pub env: Vec<String>,

    #[serde(default)]
    pub description: Option<String>,
}

/// Named input.
#[derive(Debug, Clone, Deserialize)]
pub struct OptionSpec {
    pub name: String,

    #[serde(default, rename = "type")]
    pub ty: TypeConstraint,

    #[serde(default)]
    pub default: Option<Expression>,

    #[serde(default)]
    pub short: Option<char>,

    #[serde(default)]
    pub description: Option<String>,
}

/// Computed once per invocation, in declaration order.
#[derive(Debug, Clone, Deserialize)]
pub struct Variable {
    pub name: String,

    #[serde(default, rename = "type")]
    pub ty: Option<TypeConstraint>,

    pub value: Expression,
}

/// A parsed type constraint with its source text.
#[derive(Debug, Clone)]
pub struct TypeConstraint {
    pub source: String,
    pub ty: Type,
}

impl TypeConstraint {
    pub fn parse(source: &str) -> Result<Self, ParseError> {
        Ok(Self {
            source: source.to_string(),
            ty: parse_type(source)?,
        })
    }
}

impl Default for TypeConstraint {
    fn default() -> Self {
        Self {
            source: "string".to_string(),
            ty: Type::String,
        }
    }
}

/// Constraints compare by type, not by spelling.
impl PartialEq for TypeConstraint {
    fn eq(&self, other: &Self) -> bool {
        self.ty == other.ty
    }
}

impl<'de> Deserialize<'de> for TypeConstraint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        TypeConstraint::parse(&source)
            .map_err(|e| serde::de::Error::custom(format!("type `{}`: {}", source, e)))
    }
}

// ============================================================================
// Runs
// ============================================================================

/// `depends_on` entry; one run per item of `items` (or one run without it).
#[derive(Debug, Clone, Deserialize)]
pub struct Dependency {
    pub job: String,

    #[serde(default)]
    pub items: Option<Expression>,

    /// Evaluated per item with an `each` scope `{key, value}`
    #[serde(default)]
    pub args: IndexMap<String, Expression>,
}

/// A named step: a run block or a command.
#[derive(Debug, Clone, Deserialize)]
pub struct Step {
    pub name: String,

    /// Recorded, not used for scheduling
    #[serde(default)]
    pub needs: Vec<String>,

    #[serde(default)]
    pub run: Option<RunBlock>,

    #[serde(default)]
    pub exec: Option<ExecSpec>,
}

/// Static runs and phases forming one group.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunBlock {
    #[serde(default)]
    pub concurrency: Option<usize>,

    #[serde(default)]
    pub jobs: Vec<StaticRun>,

    #[serde(default)]
    pub phases: Vec<Phase>,
}

/// Invocation of a job known at load time.
#[derive(Debug, Clone, Deserialize)]
pub struct StaticRun {
    pub job: String,

    #[serde(default)]
    pub args: IndexMap<String, Expression>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Phase {
    pub name: String,

    #[serde(default)]
    pub needs: Vec<String>,

    #[serde(default)]
    pub concurrency: Option<usize>,

    #[serde(default)]
    pub jobs: Vec<StaticRun>,

    /// Published under `phase.<name>` once the phase completes
    #[serde(default)]
    pub variables: Vec<Variable>,
}

/// Invocation whose target, arguments and condition are computed.
#[derive(Debug, Clone, Deserialize)]
pub struct DynamicRun {
    pub job: Expression,

    #[serde(default)]
    pub args: Option<Expression>,

    #[serde(default)]
    pub condition: Option<Expression>,
}

/// External command for a leaf job or step.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecSpec {
    pub command: Expression,

    #[serde(default)]
    pub args: Option<Expression>,

    #[serde(default)]
    pub env: IndexMap<String, Expression>,

    #[serde(default)]
    pub dir: Option<Expression>,

    /// Inherit the terminal instead of capturing output
    #[serde(default)]
    pub interactive: bool,
}

// ============================================================================
// Logs, assertions, tests
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogSpec {
    /// Target path; a fresh temporary file when unset
    #[serde(default)]
    pub file: Option<Expression>,

    /// `"stdout"`, `"stderr"` or unset
    #[serde(default)]
    pub stream: Option<Expression>,

    #[serde(default)]
    pub collect: Vec<CollectRule>,

    /// Invoked after the log is written, with a `log` scope
    #[serde(default)]
    pub forward: Vec<StaticRun>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectRule {
    pub condition: Expression,
    pub format: Expression,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Assertion {
    #[serde(default)]
    pub name: Option<String>,
    pub condition: Expression,
}

/// A record/verify scenario.
#[derive(Debug, Clone, Deserialize)]
pub struct TestSpec {
    pub name: String,

    #[serde(default)]
    pub variables: Vec<Variable>,

    /// Argument sets; a test without cases runs once
    #[serde(default)]
    pub cases: Vec<Case>,

    pub run: StaticRun,

    #[serde(default, rename = "assert")]
    pub assertions: Vec<Assertion>,

    #[serde(default)]
    pub expect: Vec<Expect>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Case {
    pub name: String,

    #[serde(default)]
    pub args: IndexMap<String, Expression>,
}

/// An expected command invocation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Expect {
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub dir: Option<String>,
}
