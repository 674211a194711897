//! Type conversion service — the boundary contract for coercing declared
//! values into executable parameter types.
//!
//! Object-shaped parameters are adapted through registered type views by
//! the resolution engine; everything else (scalar parsing, widening) goes
//! through a [`ConversionService`].

use crate::error::{ContainerError, Result};
use crate::registry::{ParamShape, ParamSpec};
use crate::value::Value;

/// Converts values to parameter types.
///
/// Implementations must be pure with respect to container state; a failed
/// conversion is a [`ContainerError::TypeMismatch`].
pub trait ConversionService: Send + Sync {
    fn convert(&self, value: &Value, param: &ParamSpec) -> Result<Value>;

    /// Whether `value` already satisfies `param` without conversion.
    fn is_direct_match(&self, value: &Value, param: &ParamSpec) -> bool {
        matches!(
            (value, param.shape),
            (Value::Bool(_), ParamShape::Bool)
                | (Value::Int(_), ParamShape::Int)
                | (Value::Float(_), ParamShape::Float)
                | (Value::Str(_), ParamShape::Str)
                | (Value::List(_), ParamShape::List)
                | (Value::Map(_), ParamShape::Map)
        )
    }
}

/// Default conversion rules: identity fast path, string parsing, numeric
/// widening, and stringification of scalars.
#[derive(Debug, Default)]
pub struct SimpleConversionService;

impl SimpleConversionService {
    pub fn new() -> Self {
        Self
    }
}

impl ConversionService for SimpleConversionService {
    fn convert(&self, value: &Value, param: &ParamSpec) -> Result<Value> {
        if self.is_direct_match(value, param) {
            return Ok(value.clone());
        }
        // Null flows through unchanged; the consumer decides whether an
        // absent value is acceptable.
        if matches!(value, Value::Null) {
            return Ok(Value::Null);
        }

        let converted = match (param.shape, value) {
            (ParamShape::Bool, Value::Str(s)) => match s.trim() {
                "true" | "yes" | "on" => Some(Value::Bool(true)),
                "false" | "no" | "off" => Some(Value::Bool(false)),
                _ => None,
            },
            (ParamShape::Int, Value::Str(s)) => s.trim().parse::<i64>().ok().map(Value::Int),
            (ParamShape::Int, Value::Float(f)) if f.fract() == 0.0 => Some(Value::Int(*f as i64)),
            (ParamShape::Float, Value::Int(i)) => Some(Value::Float(*i as f64)),
            (ParamShape::Float, Value::Str(s)) => {
                s.trim().parse::<f64>().ok().map(Value::Float)
            }
            (ParamShape::Str, Value::Int(i)) => Some(Value::Str(i.to_string())),
            (ParamShape::Str, Value::Float(f)) => Some(Value::Str(f.to_string())),
            (ParamShape::Str, Value::Bool(b)) => Some(Value::Str(b.to_string())),
            (ParamShape::Object, Value::Object(handle)) if handle.key() == param.key => {
                Some(value.clone())
            }
            _ => None,
        };

        converted.ok_or_else(|| ContainerError::type_mismatch(value, &param.key))
    }
}
