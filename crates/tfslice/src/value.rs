//! literal value representation
//!
//! Only variable defaults are turned into values. The model contains
//! - null
//! - boolean (true/false)
//! - integer (signed i64)
//! - decimal (f64)
//! - string (utf-8)
//! - array ("list" of values)
//! - object (order-preserving map, where the key is of type string)
//!
//! Expressions that need evaluation (references, function calls, operators other than
//! numeric negation, interpolating templates) are not literals and are rejected.
use hcl::expr::{Operation, TemplateExpr, UnaryOperator};
use hcl::template::Element;
use hcl::{Expression, ObjectKey};
use serde::{
    ser::{Error, SerializeMap, SerializeSeq},
    Serializer,
};

/// All possible value types
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Decimal(f64),
    String(String),
    Array(Vec<Value>),
    Object(indexmap::IndexMap<String, Value>),
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum LiteralError {
    #[error("expression is not a literal value")]
    NotLiteral,
    #[error("number {0} is out of range")]
    NumberOutOfRange(String),
}

impl Value {
    /// Serializes the value through `serde_json`
    ///
    /// Fails for decimals that are not finite, JSON has no representation for them.
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl TryFrom<&hcl::Number> for Value {
    type Error = LiteralError;

    fn try_from(value: &hcl::Number) -> Result<Self, Self::Error> {
        if let Some(int) = value.as_i64() {
            return Ok(Value::Integer(int));
        }

        value
            .as_f64()
            .map(Value::Decimal)
            .ok_or_else(|| LiteralError::NumberOutOfRange(value.to_string()))
    }
}

impl TryFrom<&Expression> for Value {
    type Error = LiteralError;

    fn try_from(value: &Expression) -> Result<Self, Self::Error> {
        match value {
            Expression::Null => Ok(Value::Null),
            Expression::Bool(bool) => Ok((*bool).into()),
            Expression::Number(num) => num.try_into(),
            Expression::String(s) => Ok(s.as_str().into()),
            Expression::Array(array) => array
                .iter()
                .map(Value::try_from)
                .collect::<Result<_, _>>()
                .map(Value::Array),
            Expression::Object(object) => {
                let mut map = indexmap::IndexMap::with_capacity(object.len());
                for (key, value) in object.iter() {
                    let key = match key {
                        ObjectKey::Identifier(ident) => ident.to_string(),
                        ObjectKey::Expression(Expression::String(s)) => s.clone(),
                        ObjectKey::Expression(_) => return Err(LiteralError::NotLiteral),
                        _ => return Err(LiteralError::NotLiteral),
                    };
                    map.insert(key, Value::try_from(value)?);
                }
                Ok(Value::Object(map))
            }
            Expression::TemplateExpr(template_expr) => literal_template(template_expr),
            Expression::Parenthesis(expr) => Value::try_from(expr.as_ref()),
            Expression::Operation(operation) => match operation.as_ref() {
                Operation::Unary(unary) if unary.operator == UnaryOperator::Neg => {
                    match Value::try_from(&unary.expr)? {
                        Value::Integer(int) => Ok(Value::Integer(-int)),
                        Value::Decimal(decimal) => Ok(Value::Decimal(-decimal)),
                        _ => Err(LiteralError::NotLiteral),
                    }
                }
                _ => Err(LiteralError::NotLiteral),
            },
            _ => Err(LiteralError::NotLiteral),
        }
    }
}

/// A template without interpolations or directives is a plain string
fn literal_template(template_expr: &TemplateExpr) -> Result<Value, LiteralError> {
    let template =
        hcl::Template::from_expr(template_expr).map_err(|_| LiteralError::NotLiteral)?;

    let mut out = String::new();
    for element in template.elements() {
        let Element::Literal(literal) = element else {
            return Err(LiteralError::NotLiteral);
        };
        out.push_str(literal);
    }

    Ok(Value::String(out))
}

impl serde::ser::Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Boolean(value) => serializer.serialize_bool(*value),
            Value::Integer(value) => serializer.serialize_i64(*value),
            Value::Decimal(value) if !value.is_finite() => {
                Err(S::Error::custom(format!("{value} is not a finite number")))
            }
            Value::Decimal(value) => serializer.serialize_f64(*value),
            Value::String(value) => serializer.serialize_str(value),
            Value::Array(value) => {
                let mut ser = serializer.serialize_seq(Some(value.len()))?;
                for element in value {
                    ser.serialize_element(element)?;
                }
                ser.end()
            }
            Value::Object(value) => {
                let mut ser = serializer.serialize_map(Some(value.len()))?;
                for (element_key, element_value) in value {
                    ser.serialize_entry(element_key, element_value)?;
                }
                ser.end()
            }
        }
    }
}
