use std::collections::{BTreeMap, HashMap};

use super::error::{BrokerError, Result};
use super::filter::FilterPolicy;
use super::ids;

#[derive(Debug, Clone, Default)]
pub struct TopicAttributes {
    pub display_name: String,
    pub policy: String,
    pub delivery_policy: String,
}

impl TopicAttributes {
    pub fn set(&mut self, name: &str, value: String) -> Result<()> {
        match name {
            "DisplayName" => {
                if value.len() > 100 {
                    return Err(BrokerError::invalid(
                        "DisplayName must be at most 100 characters",
                    ));
                }
                self.display_name = value;
            }
            "Policy" => self.policy = value,
            "DeliveryPolicy" => self.delivery_policy = value,
            _ => {
                return Err(BrokerError::invalid(format!(
                    "Invalid attribute name: {name}"
                )))
            }
        }
        Ok(())
    }
}

/// Mutable state of one topic, guarded by the topic's own lock.
#[derive(Debug)]
pub struct Topic {
    pub arn: String,
    pub owner: String,
    pub attributes: TopicAttributes,
    pub subscriptions: BTreeMap<String, Subscription>,
    pub subscriptions_deleted: u64,
}

impl Topic {
    pub fn new(arn: String, owner: String) -> Self {
        Topic {
            arn,
            owner,
            attributes: TopicAttributes::default(),
            subscriptions: BTreeMap::new(),
            subscriptions_deleted: 0,
        }
    }

    pub fn attribute_map(&self) -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("TopicArn".into(), self.arn.clone());
        m.insert("Owner".into(), self.owner.clone());
        m.insert("DisplayName".into(), self.attributes.display_name.clone());
        m.insert(
            "SubscriptionsConfirmed".into(),
            self.subscriptions.len().to_string(),
        );
        m.insert("SubscriptionsPending".into(), "0".into());
        m.insert(
            "SubscriptionsDeleted".into(),
            self.subscriptions_deleted.to_string(),
        );
        if !self.attributes.policy.is_empty() {
            m.insert("Policy".into(), self.attributes.policy.clone());
        }
        if !self.attributes.delivery_policy.is_empty() {
            m.insert(
                "DeliveryPolicy".into(),
                self.attributes.delivery_policy.clone(),
            );
            m.insert(
                "EffectiveDeliveryPolicy".into(),
                self.attributes.delivery_policy.clone(),
            );
        }
        m
    }

    pub fn remove_subscription(&mut self, arn: &str) -> Option<Subscription> {
        let removed = self.subscriptions.remove(arn);
        if removed.is_some() {
            self.subscriptions_deleted += 1;
        }
        removed
    }
}

/// Delivery protocols a subscription may use. Only direct queue bindings
/// are served; `sqs` is accepted as an alias so stock SNS clients work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Cqs,
    Sqs,
}

impl Protocol {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "cqs" => Ok(Protocol::Cqs),
            "sqs" => Ok(Protocol::Sqs),
            other => Err(BrokerError::invalid(format!(
                "Unsupported protocol: {other}"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Cqs => "cqs",
            Protocol::Sqs => "sqs",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterPolicyScope {
    #[default]
    MessageAttributes,
    MessageBody,
}

impl FilterPolicyScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterPolicyScope::MessageAttributes => "MessageAttributes",
            FilterPolicyScope::MessageBody => "MessageBody",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SubscriptionAttributes {
    pub raw_message_delivery: bool,
    pub filter_policy: Option<FilterPolicy>,
    pub filter_policy_scope: FilterPolicyScope,
}

impl SubscriptionAttributes {
    /// Current value of a settable attribute, in its wire form.
    pub fn get(&self, name: &str) -> Option<String> {
        match name {
            "RawMessageDelivery" => Some(self.raw_message_delivery.to_string()),
            "FilterPolicy" => self.filter_policy.as_ref().map(|fp| fp.source().to_string()),
            "FilterPolicyScope" => Some(self.filter_policy_scope.as_str().to_string()),
            _ => None,
        }
    }

    pub fn set(&mut self, name: &str, value: &str) -> Result<()> {
        match name {
            "RawMessageDelivery" => {
                self.raw_message_delivery = match value.to_ascii_lowercase().as_str() {
                    "true" => true,
                    "false" => false,
                    _ => {
                        return Err(BrokerError::invalid(format!(
                            "RawMessageDelivery must be true or false, got {value}"
                        )))
                    }
                };
            }
            "FilterPolicy" => {
                self.filter_policy = if value.trim().is_empty() {
                    None
                } else {
                    Some(FilterPolicy::parse(value)?)
                };
            }
            "FilterPolicyScope" => {
                self.filter_policy_scope = match value {
                    "MessageAttributes" => FilterPolicyScope::MessageAttributes,
                    "MessageBody" => FilterPolicyScope::MessageBody,
                    _ => {
                        return Err(BrokerError::invalid(format!(
                            "Invalid FilterPolicyScope: {value}"
                        )))
                    }
                };
            }
            _ => {
                return Err(BrokerError::invalid(format!(
                    "Invalid attribute name: {name}"
                )))
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Subscription {
    pub arn: String,
    pub topic_arn: String,
    pub protocol: Protocol,
    pub endpoint: String,
    /// ARN of the queue the endpoint resolved to at subscribe time.
    pub queue_arn: String,
    pub owner: String,
    pub attributes: SubscriptionAttributes,
}

impl Subscription {
    pub fn new(
        topic_arn: String,
        protocol: Protocol,
        endpoint: String,
        queue_arn: String,
        owner: String,
    ) -> Self {
        Subscription {
            arn: ids::subscription_arn(&topic_arn),
            topic_arn,
            protocol,
            endpoint,
            queue_arn,
            owner,
            attributes: SubscriptionAttributes::default(),
        }
    }

    pub fn attribute_map(&self) -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("SubscriptionArn".into(), self.arn.clone());
        m.insert("TopicArn".into(), self.topic_arn.clone());
        m.insert("Protocol".into(), self.protocol.as_str().into());
        m.insert("Endpoint".into(), self.endpoint.clone());
        m.insert("Owner".into(), self.owner.clone());
        m.insert("ConfirmationWasAuthenticated".into(), "true".into());
        m.insert("PendingConfirmation".into(), "false".into());
        m.insert(
            "RawMessageDelivery".into(),
            self.attributes.raw_message_delivery.to_string(),
        );
        if let Some(ref fp) = self.attributes.filter_policy {
            m.insert("FilterPolicy".into(), fp.source().to_string());
            m.insert(
                "FilterPolicyScope".into(),
                self.attributes.filter_policy_scope.as_str().into(),
            );
        }
        m
    }
}
