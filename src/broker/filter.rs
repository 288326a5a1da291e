//! Subscription filter policies.
//!
//! A policy is a JSON object whose keys name message attributes (or body
//! fields, for body-scoped policies) and whose values are arrays of
//! conditions. A message passes when every key matches at least one of its
//! conditions. Body-scoped policies may nest objects to reach inner fields.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use super::attributes::{AttributeValue, MessageAttributes};
use super::error::{BrokerError, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
enum NumericOp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl NumericOp {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "=" => Ok(NumericOp::Eq),
            "<" => Ok(NumericOp::Lt),
            "<=" => Ok(NumericOp::Le),
            ">" => Ok(NumericOp::Gt),
            ">=" => Ok(NumericOp::Ge),
            other => Err(BrokerError::invalid(format!(
                "Unrecognized numeric range operator: {other}"
            ))),
        }
    }

    fn holds(self, lhs: f64, rhs: f64) -> bool {
        match self {
            NumericOp::Eq => lhs == rhs,
            NumericOp::Lt => lhs < rhs,
            NumericOp::Le => lhs <= rhs,
            NumericOp::Gt => lhs > rhs,
            NumericOp::Ge => lhs >= rhs,
        }
    }
}

#[derive(Debug, Clone)]
enum Condition {
    Exact(Value),
    Prefix(String),
    Suffix(String),
    AnythingBut(Vec<Value>),
    AnythingButPrefix(String),
    Exists(bool),
    Numeric(Vec<(NumericOp, f64)>),
}

#[derive(Debug, Clone)]
enum Rule {
    Conditions(Vec<Condition>),
    Nested(BTreeMap<String, Rule>),
}

#[derive(Debug, Clone)]
pub struct FilterPolicy {
    source: String,
    rules: BTreeMap<String, Rule>,
}

fn literal_eq(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) if a.is_number() && b.is_number() => x == y,
        _ => a == b,
    }
}

fn parse_rules(obj: &Map<String, Value>) -> Result<BTreeMap<String, Rule>> {
    if obj.is_empty() {
        return Err(BrokerError::invalid("FilterPolicy must not be empty"));
    }
    obj.iter()
        .map(|(key, value)| {
            let rule = match value {
                Value::Array(items) if !items.is_empty() => Rule::Conditions(
                    items.iter().map(parse_condition).collect::<Result<_>>()?,
                ),
                Value::Object(inner) => Rule::Nested(parse_rules(inner)?),
                _ => {
                    return Err(BrokerError::invalid(format!(
                        "FilterPolicy: match value for {key} must be a non-empty array or an object"
                    )))
                }
            };
            Ok((key.clone(), rule))
        })
        .collect()
}

fn parse_condition(value: &Value) -> Result<Condition> {
    let obj = match value {
        Value::Object(obj) => obj,
        Value::Array(_) => {
            return Err(BrokerError::invalid(
                "FilterPolicy: nested arrays are not supported",
            ))
        }
        literal => return Ok(Condition::Exact(literal.clone())),
    };

    let mut entries = obj.iter();
    let (Some((op, arg)), None) = (entries.next(), entries.next()) else {
        return Err(BrokerError::invalid(
            "FilterPolicy: a condition object must have exactly one operator",
        ));
    };

    let string_arg = |arg: &Value| {
        arg.as_str().map(String::from).ok_or_else(|| {
            BrokerError::invalid(format!("FilterPolicy: {op} expects a string"))
        })
    };

    match op.as_str() {
        "prefix" => Ok(Condition::Prefix(string_arg(arg)?)),
        "suffix" => Ok(Condition::Suffix(string_arg(arg)?)),
        "exists" => arg
            .as_bool()
            .map(Condition::Exists)
            .ok_or_else(|| BrokerError::invalid("FilterPolicy: exists expects a boolean")),
        "anything-but" => match arg {
            Value::String(_) | Value::Number(_) => Ok(Condition::AnythingBut(vec![arg.clone()])),
            Value::Array(items)
                if !items.is_empty()
                    && items.iter().all(|v| v.is_string() || v.is_number()) =>
            {
                Ok(Condition::AnythingBut(items.clone()))
            }
            Value::Object(inner) => match inner.get("prefix").and_then(Value::as_str) {
                Some(prefix) if inner.len() == 1 => {
                    Ok(Condition::AnythingButPrefix(prefix.to_string()))
                }
                _ => Err(BrokerError::invalid(
                    "FilterPolicy: anything-but only supports a nested prefix",
                )),
            },
            _ => Err(BrokerError::invalid(
                "FilterPolicy: anything-but expects strings or numbers",
            )),
        },
        "numeric" => {
            let items = arg.as_array().ok_or_else(|| {
                BrokerError::invalid("FilterPolicy: numeric expects an array")
            })?;
            if items.len() != 2 && items.len() != 4 {
                return Err(BrokerError::invalid(
                    "FilterPolicy: numeric expects one or two operator/value pairs",
                ));
            }
            let pairs = items
                .chunks(2)
                .map(|pair| {
                    let op = pair[0].as_str().ok_or_else(|| {
                        BrokerError::invalid("FilterPolicy: numeric operator must be a string")
                    })?;
                    let n = pair[1].as_f64().ok_or_else(|| {
                        BrokerError::invalid("FilterPolicy: numeric operand must be a number")
                    })?;
                    Ok((NumericOp::parse(op)?, n))
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Condition::Numeric(pairs))
        }
        other => Err(BrokerError::invalid(format!(
            "FilterPolicy: unrecognized match type {other}"
        ))),
    }
}

impl Condition {
    fn matches(&self, value: Option<&Value>) -> bool {
        let Some(value) = value else {
            return matches!(self, Condition::Exists(false));
        };
        if let Value::Array(items) = value {
            return match self {
                Condition::Exists(present) => *present,
                _ => items.iter().any(|item| self.matches_scalar(item)),
            };
        }
        self.matches_scalar(value)
    }

    fn matches_scalar(&self, value: &Value) -> bool {
        match self {
            Condition::Exact(expected) => literal_eq(expected, value),
            Condition::Prefix(p) => value.as_str().is_some_and(|s| s.starts_with(p.as_str())),
            Condition::Suffix(p) => value.as_str().is_some_and(|s| s.ends_with(p.as_str())),
            Condition::AnythingBut(excluded) => !excluded.iter().any(|e| literal_eq(e, value)),
            Condition::AnythingButPrefix(p) => {
                value.as_str().is_some_and(|s| !s.starts_with(p.as_str()))
            }
            Condition::Exists(present) => *present,
            Condition::Numeric(pairs) => match value {
                Value::Number(n) => n
                    .as_f64()
                    .is_some_and(|x| pairs.iter().all(|(op, rhs)| op.holds(x, *rhs))),
                _ => false,
            },
        }
    }
}

fn rules_match(rules: &BTreeMap<String, Rule>, fields: Option<&Map<String, Value>>) -> bool {
    rules.iter().all(|(key, rule)| {
        let value = fields.and_then(|f| f.get(key));
        match rule {
            Rule::Conditions(conditions) => conditions.iter().any(|c| c.matches(value)),
            Rule::Nested(inner) => rules_match(inner, value.and_then(Value::as_object)),
        }
    })
}

/// Projects message attributes onto JSON values for matching. `String.Array`
/// attributes expand to their elements; binary attributes cannot be matched
/// and are treated as absent.
fn attributes_as_fields(attrs: &MessageAttributes) -> Map<String, Value> {
    let mut fields = Map::new();
    for (name, attr) in attrs {
        let value = match attr.value {
            AttributeValue::String(ref s) if attr.custom_type.as_deref() == Some("Array") => {
                serde_json::from_str::<Value>(s)
                    .ok()
                    .filter(Value::is_array)
                    .unwrap_or_else(|| Value::String(s.clone()))
            }
            AttributeValue::String(ref s) => Value::String(s.clone()),
            AttributeValue::Number(ref s) => s
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(s.clone())),
            AttributeValue::Binary(_) => continue,
        };
        fields.insert(name.clone(), value);
    }
    fields
}

impl FilterPolicy {
    pub fn parse(source: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(source)
            .map_err(|e| BrokerError::invalid(format!("FilterPolicy: invalid JSON: {e}")))?;
        let obj = value
            .as_object()
            .ok_or_else(|| BrokerError::invalid("FilterPolicy must be a JSON object"))?;
        Ok(FilterPolicy {
            source: source.to_string(),
            rules: parse_rules(obj)?,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn matches_attributes(&self, attrs: &MessageAttributes) -> bool {
        rules_match(&self.rules, Some(&attributes_as_fields(attrs)))
    }

    /// Bodies that are not JSON objects never match a body-scoped policy.
    pub fn matches_body(&self, body: &str) -> bool {
        match serde_json::from_str::<Value>(body) {
            Ok(Value::Object(fields)) => rules_match(&self.rules, Some(&fields)),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::attributes::MessageAttribute;

    fn attrs(pairs: &[(&str, MessageAttribute)]) -> MessageAttributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn exact_and_prefix_matching() {
        let policy =
            FilterPolicy::parse(r#"{"color":["red","blue"],"region":[{"prefix":"us-"}]}"#)
                .expect("policy");
        assert!(policy.matches_attributes(&attrs(&[
            ("color", MessageAttribute::string("red")),
            ("region", MessageAttribute::string("us-east")),
        ])));
        assert!(!policy.matches_attributes(&attrs(&[
            ("color", MessageAttribute::string("green")),
            ("region", MessageAttribute::string("us-east")),
        ])));
        assert!(!policy.matches_attributes(&attrs(&[("color", MessageAttribute::string("red"))])));
    }

    #[test]
    fn numeric_ranges_and_exact_numbers() {
        let policy = FilterPolicy::parse(
            r#"{"price":[{"numeric":[">=",10,"<",20]}],"qty":[5]}"#,
        )
        .expect("policy");
        assert!(policy.matches_attributes(&attrs(&[
            ("price", MessageAttribute::number("15")),
            ("qty", MessageAttribute::number("5.0")),
        ])));
        assert!(!policy.matches_attributes(&attrs(&[
            ("price", MessageAttribute::number("20")),
            ("qty", MessageAttribute::number("5")),
        ])));
        // A string that looks like a number is still a string.
        assert!(!policy.matches_attributes(&attrs(&[
            ("price", MessageAttribute::string("15")),
            ("qty", MessageAttribute::number("5")),
        ])));
    }

    #[test]
    fn anything_but_and_exists() {
        let policy = FilterPolicy::parse(
            r#"{"status":[{"anything-but":["cancelled"]}],"debug":[{"exists":false}]}"#,
        )
        .expect("policy");
        assert!(policy.matches_attributes(&attrs(&[("status", MessageAttribute::string("paid"))])));
        assert!(!policy.matches_attributes(&attrs(&[(
            "status",
            MessageAttribute::string("cancelled")
        )])));
        assert!(!policy.matches_attributes(&attrs(&[
            ("status", MessageAttribute::string("paid")),
            ("debug", MessageAttribute::string("1")),
        ])));
        assert!(!policy.matches_attributes(&MessageAttributes::new()));
    }

    #[test]
    fn string_array_attributes_match_any_element() {
        let policy = FilterPolicy::parse(r#"{"tags":["urgent"]}"#).expect("policy");
        let tags = MessageAttribute::from_parts("String.Array", Some(r#"["low","urgent"]"#), None)
            .expect("array attribute");
        assert!(policy.matches_attributes(&attrs(&[("tags", tags)])));
    }

    #[test]
    fn body_scope_walks_nested_objects() {
        let policy =
            FilterPolicy::parse(r#"{"order":{"kind":["refund"]}}"#).expect("policy");
        assert!(policy.matches_body(r#"{"order":{"kind":"refund","id":7}}"#));
        assert!(!policy.matches_body(r#"{"order":{"kind":"sale"}}"#));
        assert!(!policy.matches_body("plain text"));
    }

    #[test]
    fn malformed_policies_are_rejected() {
        for bad in [
            "[]",
            "{}",
            r#"{"a":"red"}"#,
            r#"{"a":[]}"#,
            r#"{"a":[{"wildcard":"*"}]}"#,
            r#"{"a":[{"numeric":[">"]}]}"#,
            r#"{"a":[{"numeric":["~",1]}]}"#,
            r#"{"a":[{"prefix":"x","suffix":"y"}]}"#,
        ] {
            assert!(FilterPolicy::parse(bad).is_err(), "{bad} should be rejected");
        }
    }
}
