use std::collections::{BTreeMap, HashMap};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use super::attributes::{validate_attributes, MessageAttributes};
use super::error::{BrokerError, Result};
use super::topic::{FilterPolicyScope, Subscription};

pub const MAX_PUBLISH_SIZE: usize = 262_144;
pub const MAX_SUBJECT_LEN: usize = 100;

/// Per-protocol message texts from a `MessageStructure=json` publish.
#[derive(Debug, Clone)]
pub struct MessageStructure {
    texts: HashMap<String, String>,
}

impl MessageStructure {
    pub fn parse(message: &str) -> Result<Self> {
        let invalid = || {
            BrokerError::invalid(
                "Message structure is not valid JSON or does not contain a default key",
            )
        };
        let texts: HashMap<String, String> =
            serde_json::from_str(message).map_err(|_| invalid())?;
        if !texts.contains_key("default") {
            return Err(invalid());
        }
        Ok(MessageStructure { texts })
    }

    pub fn select(&self, protocol: &str) -> &str {
        self.texts
            .get(protocol)
            .or_else(|| self.texts.get("default"))
            .map(String::as_str)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub topic_arn: String,
    pub message: String,
    pub subject: Option<String>,
    pub message_structure: Option<String>,
    pub message_attributes: MessageAttributes,
}

impl PublishRequest {
    pub fn new(topic_arn: impl Into<String>, message: impl Into<String>) -> Self {
        PublishRequest {
            topic_arn: topic_arn.into(),
            message: message.into(),
            subject: None,
            message_structure: None,
            message_attributes: MessageAttributes::new(),
        }
    }
}

/// A validated publish, ready to be copied into subscriber queues.
#[derive(Debug)]
pub struct Publication {
    pub message_id: String,
    pub topic_arn: String,
    pub message: String,
    pub subject: Option<String>,
    pub structure: Option<MessageStructure>,
    pub attributes: MessageAttributes,
    pub timestamp: String,
}

impl Publication {
    pub fn prepare(req: PublishRequest, message_id: String) -> Result<Self> {
        if req.message.is_empty() {
            return Err(BrokerError::invalid("Message must not be empty"));
        }
        if req.message.len() > MAX_PUBLISH_SIZE {
            return Err(BrokerError::invalid(format!(
                "Message must be shorter than {MAX_PUBLISH_SIZE} bytes"
            )));
        }
        if let Some(ref subject) = req.subject {
            if subject.is_empty() || subject.chars().count() >= MAX_SUBJECT_LEN {
                return Err(BrokerError::invalid(format!(
                    "Subject must be non-empty and shorter than {MAX_SUBJECT_LEN} characters"
                )));
            }
        }
        validate_attributes(&req.message_attributes)?;

        let structure = match req.message_structure.as_deref() {
            None | Some("") => None,
            Some("json") => Some(MessageStructure::parse(&req.message)?),
            Some(other) => {
                return Err(BrokerError::invalid(format!(
                    "Invalid MessageStructure: {other}"
                )))
            }
        };

        Ok(Publication {
            message_id,
            topic_arn: req.topic_arn,
            message: req.message,
            subject: req.subject,
            structure,
            attributes: req.message_attributes,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        })
    }

    fn text_for(&self, protocol: &str) -> &str {
        match self.structure {
            Some(ref s) => s.select(protocol),
            None => &self.message,
        }
    }
}

#[derive(Debug, Serialize)]
struct EnvelopeAttribute {
    #[serde(rename = "Type")]
    data_type: String,
    #[serde(rename = "Value")]
    value: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct Envelope<'a> {
    r#type: &'static str,
    message_id: &'a str,
    topic_arn: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    subject: Option<&'a str>,
    message: &'a str,
    timestamp: &'a str,
    signature_version: &'static str,
    signature: &'static str,
    #[serde(rename = "SigningCertURL")]
    signing_cert_url: &'static str,
    #[serde(rename = "UnsubscribeURL")]
    unsubscribe_url: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    message_attributes: BTreeMap<&'a str, EnvelopeAttribute>,
}

/// What one subscribed queue receives.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryCopy {
    pub body: String,
    pub message_attributes: MessageAttributes,
}

/// Link that removes `subscription_arn` when followed. It names the owning
/// access key so an unsigned GET resolves the right namespace.
pub fn unsubscribe_url(cns_base_url: &str, access_key: &str, subscription_arn: &str) -> String {
    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair("Action", "Unsubscribe")
        .append_pair("SubscriptionArn", subscription_arn)
        .append_pair("AWSAccessKeyId", access_key)
        .finish();
    format!("{cns_base_url}/?{query}")
}

/// Builds the copy for `sub`, or `None` when its filter policy rejects the
/// publication.
pub fn build_copy(
    publication: &Publication,
    sub: &Subscription,
    cns_base_url: &str,
    access_key: &str,
) -> Result<Option<DeliveryCopy>> {
    let attrs = &sub.attributes;
    if let Some(ref policy) = attrs.filter_policy {
        let pass = match attrs.filter_policy_scope {
            FilterPolicyScope::MessageAttributes => {
                policy.matches_attributes(&publication.attributes)
            }
            FilterPolicyScope::MessageBody => policy.matches_body(&publication.message),
        };
        if !pass {
            return Ok(None);
        }
    }

    let text = publication.text_for(sub.protocol.as_str());
    if attrs.raw_message_delivery {
        return Ok(Some(DeliveryCopy {
            body: text.to_string(),
            message_attributes: publication.attributes.clone(),
        }));
    }

    let message_attributes = publication
        .attributes
        .iter()
        .map(|(name, a)| {
            let value = a
                .string_value()
                .map(String::from)
                .or_else(|| a.binary_base64())
                .unwrap_or_default();
            (
                name.as_str(),
                EnvelopeAttribute {
                    data_type: a.data_type(),
                    value,
                },
            )
        })
        .collect();

    let envelope = Envelope {
        r#type: "Notification",
        message_id: &publication.message_id,
        topic_arn: &publication.topic_arn,
        subject: publication.subject.as_deref(),
        message: text,
        timestamp: &publication.timestamp,
        signature_version: "1",
        signature: "",
        signing_cert_url: "",
        unsubscribe_url: unsubscribe_url(cns_base_url, access_key, &sub.arn),
        message_attributes,
    };
    let body = serde_json::to_string(&envelope)
        .map_err(|e| BrokerError::Internal(format!("failed to encode notification: {e}")))?;
    Ok(Some(DeliveryCopy {
        body,
        message_attributes: MessageAttributes::new(),
    }))
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryFailure {
    pub subscription_arn: String,
    pub endpoint: String,
    pub error: BrokerError,
}

/// Result of fanning one publish out to its subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishOutcome {
    pub message_id: String,
    pub delivered: usize,
    pub filtered: usize,
    pub failures: Vec<DeliveryFailure>,
}
