use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

/// Variable bindings for one shader variant.
pub type Env = BTreeMap<String, Value>;

/// A parameter value: booleans, 64-bit integers, strings and tuples.
///
/// Substituted values are written in their display form, so strings are
/// emitted without quotes and tuples as `(a, b, c)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Str(String),
    Tuple(Vec<Value>),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Str(_) => "string",
            Value::Tuple(_) => "tuple",
        }
    }

    /// Converts a parsed YAML value, unwrapping any tags along the way.
    ///
    /// Sequences become tuples. Floats, nulls and nested mappings have no
    /// counterpart in the template language and are rejected.
    pub fn from_yaml(value: &serde_yaml::Value) -> Result<Value, ValueError> {
        use serde_yaml::Value as Yaml;

        match value {
            Yaml::Tagged(tagged) => Value::from_yaml(&tagged.value),
            Yaml::Bool(flag) => Ok(Value::Bool(*flag)),
            Yaml::Number(number) => match number.as_i64() {
                Some(int) => Ok(Value::Int(int)),
                None if number.is_f64() => Err(ValueError::Float),
                None => Err(ValueError::OutOfRange(number.to_string())),
            },
            Yaml::String(text) => Ok(Value::Str(text.clone())),
            Yaml::Sequence(items) => {
                let items = items.iter().map(Value::from_yaml).collect::<Result<_, _>>()?;
                Ok(Value::Tuple(items))
            }
            Yaml::Null => Err(ValueError::Null),
            Yaml::Mapping(_) => Err(ValueError::Mapping),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Bool(flag) => write!(f, "{flag}"),
            Value::Int(int) => write!(f, "{int}"),
            Value::Str(text) => f.write_str(text),
            Value::Tuple(items) => {
                f.write_str("(")?;
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValueError {
    #[error("floating point values are not supported")]
    Float,

    #[error("null is not a valid value")]
    Null,

    #[error("nested mappings are not valid values")]
    Mapping,

    #[error("integer {0} is out of range")]
    OutOfRange(String),
}
