use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use md5::{Digest, Md5};

use super::error::{BrokerError, Result};

pub const MAX_MESSAGE_ATTRIBUTES: usize = 10;

/// Attribute payload, tagged by its base data type.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    String(String),
    /// Kept as the caller's text so precision survives the round trip.
    Number(String),
    Binary(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageAttribute {
    pub value: AttributeValue,
    /// The part after the dot in `Number.float`, `String.json`, ...
    pub custom_type: Option<String>,
}

pub type MessageAttributes = BTreeMap<String, MessageAttribute>;

impl MessageAttribute {
    pub fn string(value: impl Into<String>) -> Self {
        MessageAttribute {
            value: AttributeValue::String(value.into()),
            custom_type: None,
        }
    }

    pub fn number(value: impl Into<String>) -> Self {
        MessageAttribute {
            value: AttributeValue::Number(value.into()),
            custom_type: None,
        }
    }

    pub fn binary(value: Vec<u8>) -> Self {
        MessageAttribute {
            value: AttributeValue::Binary(value),
            custom_type: None,
        }
    }

    /// Builds an attribute from its wire parts. `binary_value` is base64.
    pub fn from_parts(
        data_type: &str,
        string_value: Option<&str>,
        binary_value: Option<&str>,
    ) -> Result<Self> {
        let (base, custom) = match data_type.split_once('.') {
            Some((base, custom)) if !custom.is_empty() => (base, Some(custom.to_string())),
            Some(_) => {
                return Err(BrokerError::invalid(format!(
                    "Invalid attribute data type: {data_type}"
                )))
            }
            None => (data_type, None),
        };

        let value = match base {
            "String" => AttributeValue::String(
                string_value
                    .ok_or_else(|| {
                        BrokerError::invalid("String attributes require a StringValue")
                    })?
                    .to_string(),
            ),
            "Number" => {
                let v = string_value.ok_or_else(|| {
                    BrokerError::invalid("Number attributes require a StringValue")
                })?;
                let parsed: f64 = v.trim().parse().map_err(|_| {
                    BrokerError::invalid(format!("Invalid number attribute value: {v}"))
                })?;
                if !parsed.is_finite() {
                    return Err(BrokerError::invalid(format!(
                        "Invalid number attribute value: {v}"
                    )));
                }
                AttributeValue::Number(v.trim().to_string())
            }
            "Binary" => {
                let v = binary_value.ok_or_else(|| {
                    BrokerError::invalid("Binary attributes require a BinaryValue")
                })?;
                AttributeValue::Binary(STANDARD.decode(v).map_err(|e| {
                    BrokerError::invalid(format!("Invalid base64 binary attribute: {e}"))
                })?)
            }
            other => {
                return Err(BrokerError::invalid(format!(
                    "Invalid attribute data type: {other}"
                )))
            }
        };

        Ok(MessageAttribute {
            value,
            custom_type: custom,
        })
    }

    pub fn data_type(&self) -> String {
        let base = match self.value {
            AttributeValue::String(_) => "String",
            AttributeValue::Number(_) => "Number",
            AttributeValue::Binary(_) => "Binary",
        };
        match self.custom_type {
            Some(ref custom) => format!("{base}.{custom}"),
            None => base.to_string(),
        }
    }

    pub fn string_value(&self) -> Option<&str> {
        match self.value {
            AttributeValue::String(ref s) | AttributeValue::Number(ref s) => Some(s),
            AttributeValue::Binary(_) => None,
        }
    }

    pub fn binary_base64(&self) -> Option<String> {
        match self.value {
            AttributeValue::Binary(ref b) => Some(STANDARD.encode(b)),
            _ => None,
        }
    }
}

pub fn validate_attributes(attrs: &MessageAttributes) -> Result<()> {
    if attrs.len() > MAX_MESSAGE_ATTRIBUTES {
        return Err(BrokerError::invalid(format!(
            "Number of message attributes [{}] exceeds the allowed maximum [{}]",
            attrs.len(),
            MAX_MESSAGE_ATTRIBUTES
        )));
    }
    for name in attrs.keys() {
        let valid = !name.is_empty()
            && name.len() <= 256
            && !name.starts_with('.')
            && !name.ends_with('.')
            && !name.contains("..")
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');
        if !valid {
            return Err(BrokerError::invalid(format!(
                "Invalid message attribute name: {name}"
            )));
        }
        let lower = name.to_ascii_lowercase();
        if lower.starts_with("aws.") || lower.starts_with("amazon.") {
            return Err(BrokerError::invalid(format!(
                "Message attribute name uses a reserved prefix: {name}"
            )));
        }
    }
    Ok(())
}

pub fn md5_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

fn push_prefixed(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    buf.extend_from_slice(bytes);
}

/// MD5 over the SQS canonical attribute encoding: for each attribute in name
/// order, length-prefixed name and data type, a transport byte (1 text,
/// 2 binary) and the length-prefixed value.
pub fn md5_of_attributes(attrs: &MessageAttributes) -> Option<String> {
    if attrs.is_empty() {
        return None;
    }
    let mut buf: Vec<u8> = Vec::new();
    for (name, attr) in attrs {
        push_prefixed(&mut buf, name.as_bytes());
        push_prefixed(&mut buf, attr.data_type().as_bytes());
        match attr.value {
            AttributeValue::Binary(ref b) => {
                buf.push(2);
                push_prefixed(&mut buf, b);
            }
            AttributeValue::String(ref s) | AttributeValue::Number(ref s) => {
                buf.push(1);
                push_prefixed(&mut buf, s.as_bytes());
            }
        }
    }
    Some(md5_hex(&buf))
}
