//! JT-001: Typed value model.
//!
//! A closed set of value kinds shared by the expression evaluator, the input
//! binder, and the event log. Every boundary goes through [`coerce`]; there is
//! no silent conversion between kinds (a tuple of numbers never becomes a list
//! of strings). Empty lists and maps always carry their element type.

use indexmap::IndexMap;
use std::fmt;

/// A type constraint.
#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Any,
    Null,
    Bool,
    Number,
    String,
    List(Box<Type>),
    Map(Box<Type>),
    Object(IndexMap<String, Type>),
    Tuple(Vec<Type>),
}

impl Type {
    pub fn list(elem: Type) -> Self {
        Self::List(Box::new(elem))
    }

    pub fn map(elem: Type) -> Self {
        Self::Map(Box::new(elem))
    }

    /// True when a value of type `self` can stand where `target` is wanted
    /// without touching any element. Used for empty containers.
    fn assignable_to(&self, target: &Type) -> bool {
        match (self, target) {
            (_, Type::Any) | (Type::Any, _) => true,
            (Type::List(a), Type::List(b)) | (Type::Map(a), Type::Map(b)) => a.assignable_to(b),
            (a, b) => a == b,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "any"),
            Self::Null => write!(f, "null"),
            Self::Bool => write!(f, "bool"),
            Self::Number => write!(f, "number"),
            Self::String => write!(f, "string"),
            Self::List(t) => write!(f, "list({})", t),
            Self::Map(t) => write!(f, "map({})", t),
            Self::Object(fields) => {
                write!(f, "object({{")?;
                for (i, (k, t)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, t)?;
                }
                write!(f, "}})")
            }
            Self::Tuple(types) => {
                write!(f, "tuple([")?;
                for (i, t) in types.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", t)?;
                }
                write!(f, "])")
            }
        }
    }
}

/// Implied type of a value does not match a declared constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeError {
    pub wanted: Type,
    pub actual: Type,
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wanted {}, got {}", self.wanted, self.actual)
    }
}

impl std::error::Error for TypeError {}

/// A configuration value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    /// Homogeneous list; the element type survives even when empty.
    List(Type, Vec<Value>),
    /// Homogeneous string-keyed map.
    Map(Type, IndexMap<String, Value>),
    /// Named heterogeneous fields.
    Object(IndexMap<String, Value>),
    /// Ordered heterogeneous items (JSON-like literal lists).
    Tuple(Vec<Value>),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Self::String(s.into())
    }

    pub fn empty_list(elem: Type) -> Self {
        Self::List(elem, Vec::new())
    }

    pub fn empty_map(elem: Type) -> Self {
        Self::Map(elem, IndexMap::new())
    }

    pub fn object<K: Into<String>>(fields: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self::Object(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// The implied type of this value.
    pub fn type_of(&self) -> Type {
        match self {
            Self::Null => Type::Null,
            Self::Bool(_) => Type::Bool,
            Self::Number(_) => Type::Number,
            Self::String(_) => Type::String,
            Self::List(t, _) => Type::list(t.clone()),
            Self::Map(t, _) => Type::map(t.clone()),
            Self::Object(fields) => Type::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.type_of()))
                    .collect(),
            ),
            Self::Tuple(items) => Type::Tuple(items.iter().map(Value::type_of).collect()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Items of a list or tuple.
    pub fn as_items(&self) -> Option<&[Value]> {
        match self {
            Self::List(_, items) | Self::Tuple(items) => Some(items),
            _ => None,
        }
    }

    /// Entries of a map or object.
    pub fn as_entries(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Self::Map(_, entries) | Self::Object(entries) => Some(entries),
            _ => None,
        }
    }

    /// Field lookup on maps and objects.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_entries().and_then(|e| e.get(key))
    }

    /// Number of elements (items, entries, or characters for strings).
    pub fn len(&self) -> Option<usize> {
        match self {
            Self::String(s) => Some(s.chars().count()),
            Self::List(_, items) | Self::Tuple(items) => Some(items.len()),
            Self::Map(_, e) | Self::Object(e) => Some(e.len()),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    /// String form used by template interpolation and log lines.
    pub fn to_display_string(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => format_number(*n),
            Self::String(s) => s.clone(),
            other => other.to_native().to_string(),
        }
    }

    /// Recursive conversion to a host-native value.
    ///
    /// Uniform and heterogeneous tuples both land as JSON arrays; objects
    /// become string-keyed JSON objects with per-field conversion.
    pub fn to_native(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Self::Null => J::Null,
            Self::Bool(b) => J::Bool(*b),
            Self::Number(n) => number_to_native(*n),
            Self::String(s) => J::String(s.clone()),
            Self::List(_, items) | Self::Tuple(items) => {
                J::Array(items.iter().map(Value::to_native).collect())
            }
            Self::Map(_, entries) | Self::Object(entries) => J::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_native()))
                    .collect(),
            ),
        }
    }

    /// Conversion from a host-native value. Arrays become tuples and objects
    /// become objects; callers coerce to a declared type afterwards.
    pub fn from_native(native: &serde_json::Value) -> Self {
        use serde_json::Value as J;
        match native {
            J::Null => Self::Null,
            J::Bool(b) => Self::Bool(*b),
            J::Number(n) => Self::Number(n.as_f64().unwrap_or_default()),
            J::String(s) => Self::String(s.clone()),
            J::Array(items) => Self::Tuple(items.iter().map(Value::from_native).collect()),
            J::Object(map) => Self::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_native(v)))
                    .collect(),
            ),
        }
    }

    /// Items as strings, when every item is a string. Used for argv lists.
    pub fn to_string_list(&self) -> Option<Vec<String>> {
        self.as_items()?
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect()
    }

    /// Parse a raw command-line or environment string into a value of `ty`.
    ///
    /// Strings pass through; numbers and bools are parsed; collections accept
    /// either a JSON literal or, for lists, a comma-separated shorthand.
    pub fn parse_raw(raw: &str, ty: &Type) -> Result<Value, TypeError> {
        let fail = || TypeError {
            wanted: ty.clone(),
            actual: Type::String,
        };
        match ty {
            Type::Any | Type::String => Ok(Value::string(raw)),
            Type::Number => raw.trim().parse::<f64>().map(Value::Number).map_err(|_| fail()),
            Type::Bool => match raw.trim() {
                "true" | "1" | "yes" => Ok(Value::Bool(true)),
                "false" | "0" | "no" => Ok(Value::Bool(false)),
                _ => Err(fail()),
            },
            Type::List(elem) if !raw.trim_start().starts_with('[') => {
                let items = raw
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| Value::parse_raw(s, elem))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|_| fail())?;
                Ok(Value::List((**elem).clone(), items))
            }
            _ => {
                let native: serde_json::Value =
                    serde_json::from_str(raw).map_err(|_| fail())?;
                coerce(Value::from_native(&native), ty)
            }
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

fn number_to_native(n: f64) -> serde_json::Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    }
}

/// Convert `value` to `target`, failing when the structure does not match.
pub fn coerce(value: Value, target: &Type) -> Result<Value, TypeError> {
    let actual = value.type_of();
    coerce_inner(value, target).ok_or_else(|| TypeError {
        wanted: target.clone(),
        actual,
    })
}

fn coerce_inner(value: Value, target: &Type) -> Option<Value> {
    match (target, value) {
        (Type::Any, v) => Some(v),
        (_, Value::Null) => Some(Value::Null),
        (Type::Bool, v @ Value::Bool(_))
        | (Type::Number, v @ Value::Number(_))
        | (Type::String, v @ Value::String(_)) => Some(v),
        (Type::List(elem), Value::List(t, items)) => {
            if items.is_empty() {
                return t
                    .assignable_to(elem)
                    .then(|| Value::List((**elem).clone(), Vec::new()));
            }
            coerce_items(items, elem).map(|items| Value::List((**elem).clone(), items))
        }
        (Type::List(elem), Value::Tuple(items)) => {
            coerce_items(items, elem).map(|items| Value::List((**elem).clone(), items))
        }
        (Type::Map(elem), Value::Map(t, entries)) => {
            if entries.is_empty() {
                return t
                    .assignable_to(elem)
                    .then(|| Value::Map((**elem).clone(), IndexMap::new()));
            }
            coerce_entries(entries, elem).map(|e| Value::Map((**elem).clone(), e))
        }
        (Type::Map(elem), Value::Object(fields)) => {
            coerce_entries(fields, elem).map(|e| Value::Map((**elem).clone(), e))
        }
        (Type::Object(fields), Value::Object(mut vals))
        | (Type::Object(fields), Value::Map(_, mut vals)) => {
            let mut out = IndexMap::new();
            for (name, ty) in fields {
                let v = vals.shift_remove(name)?;
                out.insert(name.clone(), coerce_inner(v, ty)?);
            }
            Some(Value::Object(out))
        }
        (Type::Tuple(types), Value::Tuple(items)) | (Type::Tuple(types), Value::List(_, items)) => {
            if types.len() != items.len() {
                return None;
            }
            items
                .into_iter()
                .zip(types)
                .map(|(v, t)| coerce_inner(v, t))
                .collect::<Option<Vec<_>>>()
                .map(Value::Tuple)
        }
        _ => None,
    }
}

fn coerce_items(items: Vec<Value>, elem: &Type) -> Option<Vec<Value>> {
    items.into_iter().map(|v| coerce_inner(v, elem)).collect()
}

fn coerce_entries(entries: IndexMap<String, Value>, elem: &Type) -> Option<IndexMap<String, Value>> {
    entries
        .into_iter()
        .map(|(k, v)| coerce_inner(v, elem).map(|v| (k, v)))
        .collect()
}
