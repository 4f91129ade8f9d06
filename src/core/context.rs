//! JT-003: Evaluation context: immutable, named variable scopes.
//!
//! A context maps scope names (`param`, `opt`, `var`, `step`, `phase`,
//! `source`, `log`, `event`, ...) to values. Deriving a context copies the
//! scope map and overrides one name; the parent is never touched, so sibling
//! workers can each derive their own view without locking.

use super::error::{Error, Result};
use super::expr::Expression;
use super::types::Variable;
use super::value::{coerce, Value};
use indexmap::IndexMap;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct EvalContext {
    scopes: Arc<BTreeMap<String, Arc<Value>>>,
}

impl EvalContext {
    /// A context with no variable scopes; only functions are available.
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a new context with `name` bound to `value`.
    pub fn with_scope(&self, name: &str, value: Value) -> Self {
        let mut scopes = (*self.scopes).clone();
        scopes.insert(name.to_string(), Arc::new(value));
        Self {
            scopes: Arc::new(scopes),
        }
    }

    pub fn scope(&self, name: &str) -> Option<&Value> {
        self.scopes.get(name).map(|v| v.as_ref())
    }

    pub fn scope_names(&self) -> impl Iterator<Item = &str> {
        self.scopes.keys().map(String::as_str)
    }

    pub fn eval(&self, expr: &Expression) -> Result<Value> {
        expr.evaluate(self).map_err(|e| Error::Eval {
            expr: expr.source().to_string(),
            message: e.message,
        })
    }

    /// Evaluate a condition; anything but a bool is an error.
    pub fn eval_bool(&self, expr: &Expression) -> Result<bool> {
        let v = self.eval(expr)?;
        v.as_bool().ok_or_else(|| Error::Eval {
            expr: expr.source().to_string(),
            message: format!("condition must be bool, got {}", v.type_of()),
        })
    }

    pub fn eval_string(&self, expr: &Expression) -> Result<String> {
        match self.eval(expr)? {
            Value::String(s) => Ok(s),
            v @ (Value::Number(_) | Value::Bool(_) | Value::Null) => Ok(v.to_display_string()),
            other => Err(Error::Eval {
                expr: expr.source().to_string(),
                message: format!("wanted a string, got {}", other.type_of()),
            }),
        }
    }

    /// Evaluate an argument map against this context, in declaration order.
    pub fn eval_args(&self, args: &IndexMap<String, Expression>) -> Result<IndexMap<String, Value>> {
        args.iter()
            .map(|(k, e)| self.eval(e).map(|v| (k.clone(), v)))
            .collect()
    }
}

/// Evaluate variables in declaration order. Each variable sees the ones
/// declared before it through the `var` scope.
pub fn eval_variables(ctx: &EvalContext, vars: &[Variable], job: &str) -> Result<Value> {
    let mut done: IndexMap<String, Value> = IndexMap::new();
    for var in vars {
        let scoped = ctx.with_scope("var", Value::Object(done.clone()));
        let mut value = scoped.eval(&var.value)?;
        if let Some(ty) = &var.ty {
            value = coerce(value, &ty.ty)
                .map_err(|e| Error::type_mismatch(format!("job '{}': variable '{}'", job, var.name), e))?;
        }
        done.insert(var.name.clone(), value);
    }
    Ok(Value::Object(done))
}

/// Build a job's context from its resolved inputs.
pub fn job_context(
    params: IndexMap<String, Value>,
    options: IndexMap<String, Value>,
    vars: &[Variable],
    source_dir: Option<&Path>,
    job: &str,
) -> Result<EvalContext> {
    let inputs = EvalContext::new()
        .with_scope("param", Value::Object(params))
        .with_scope("opt", Value::Object(options));
    // Variables see inputs only; `source` joins afterwards.
    let var = eval_variables(&inputs, vars, job)?;
    let ctx = inputs.with_scope("var", var);
    Ok(match source_dir {
        Some(dir) => ctx.with_scope(
            "source",
            Value::object([("dir", Value::string(dir.display().to_string()))]),
        ),
        None => ctx,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TypeConstraint;
    use crate::core::value::Type;

    fn expr(src: &str) -> Expression {
        Expression::parse(src).unwrap()
    }

    #[test]
    fn test_jt003_derivation_leaves_parent_unchanged() {
        let c1 = EvalContext::new().with_scope("param", Value::object([("a", Value::Number(1.0))]));
        let probe = expr(r#""${param.a}""#);
        let before = c1.eval(&probe).unwrap();
        let c2 = c1
            .with_scope("step", Value::object([("x", Value::Bool(true))]))
            .with_scope("param", Value::object([("a", Value::Number(2.0))]));
        assert_eq!(c1.eval(&probe).unwrap(), before);
        assert!(c1.scope("step").is_none());
        assert_eq!(c2.eval(&probe).unwrap(), Value::Number(2.0));
        assert!(c2.eval(&expr("step.x")).unwrap().as_bool().unwrap());
    }

    #[test]
    fn test_jt003_variables_in_order() {
        let vars = vec![
            Variable {
                name: "greeting".into(),
                ty: None,
                value: expr(r#""hi ${param.who}""#),
            },
            Variable {
                name: "loud".into(),
                ty: None,
                value: expr("upper(var.greeting)"),
            },
        ];
        let params = IndexMap::from([("who".to_string(), Value::string("bob"))]);
        let ctx = job_context(params, IndexMap::new(), &vars, None, "greet").unwrap();
        assert_eq!(ctx.eval(&expr("var.loud")).unwrap(), Value::string("HI BOB"));
    }

    #[test]
    fn test_jt003_forward_reference_fails() {
        let vars = vec![
            Variable {
                name: "a".into(),
                ty: None,
                value: expr("var.b"),
            },
            Variable {
                name: "b".into(),
                ty: None,
                value: expr("1"),
            },
        ];
        let err = job_context(IndexMap::new(), IndexMap::new(), &vars, None, "j").unwrap_err();
        assert!(matches!(err, Error::Eval { .. }), "{err}");
    }

    #[test]
    fn test_jt003_typed_variable_is_coerced() {
        let vars = vec![Variable {
            name: "xs".into(),
            ty: Some(TypeConstraint::parse("list(string)").unwrap()),
            value: expr(r#"["a", "b"]"#),
        }];
        let ctx = job_context(IndexMap::new(), IndexMap::new(), &vars, None, "j").unwrap();
        assert_eq!(
            ctx.eval(&expr("var.xs")).unwrap().type_of(),
            Type::list(Type::String)
        );

        let bad = vec![Variable {
            name: "xs".into(),
            ty: Some(TypeConstraint::parse("list(string)").unwrap()),
            value: expr("[1]"),
        }];
        let err = job_context(IndexMap::new(), IndexMap::new(), &bad, None, "j").unwrap_err();
        assert!(err.to_string().contains("list(string)"));
    }

    #[test]
    fn test_jt003_source_scope() {
        let ctx = job_context(
            IndexMap::new(),
            IndexMap::new(),
            &[],
            Some(Path::new("/tmp/cache")),
            "j",
        )
        .unwrap();
        assert_eq!(ctx.eval(&expr("source.dir")).unwrap(), Value::string("/tmp/cache"));
    }

    #[test]
    fn test_jt003_variables_see_only_inputs() {
        let vars = vec![Variable {
            name: "cache".into(),
            ty: None,
            value: expr("source.dir"),
        }];
        let err = job_context(
            IndexMap::new(),
            IndexMap::new(),
            &vars,
            Some(Path::new("/tmp/cache")),
            "j",
        )
        .unwrap_err();
        assert!(matches!(err, Error::Eval { .. }));
    }

    #[test]
    fn test_jt003_eval_bool_rejects_non_bool() {
        let ctx = EvalContext::new();
        assert!(ctx.eval_bool(&expr("1")).is_err());
        assert!(ctx.eval_bool(&expr("1 == 1")).unwrap());
    }
}
