use std::collections::HashSet;

use uuid::Uuid;

/// Issues identifiers for one namespace.
///
/// Topic ARNs and queue URLs carry the entity name. The first incarnation of
/// a name uses it verbatim; a name re-created after deletion gets a `~N`
/// generation suffix, so an identifier is never handed out twice. `~` is not
/// a legal name character, so suffixed labels cannot collide with real names.
#[derive(Debug)]
pub struct IdGenerator {
    region: String,
    account_id: String,
    base_url: String,
    issued: HashSet<String>,
}

impl IdGenerator {
    pub fn new(region: String, account_id: String, base_url: String) -> Self {
        IdGenerator {
            region,
            account_id,
            base_url,
            issued: HashSet::new(),
        }
    }

    fn unique_label(&mut self, kind: &str, name: &str) -> String {
        let mut generation = 1u32;
        loop {
            let label = if generation == 1 {
                name.to_string()
            } else {
                format!("{name}~{generation}")
            };
            if self.issued.insert(format!("{kind}/{label}")) {
                return label;
            }
            generation += 1;
        }
    }

    pub fn topic_arn(&mut self, name: &str) -> String {
        let label = self.unique_label("topic", name);
        format!("arn:cmb:cns:{}:{}:{}", self.region, self.account_id, label)
    }

    /// Returns `(url, arn)` for a new queue.
    pub fn queue_identity(&mut self, name: &str) -> (String, String) {
        let label = self.unique_label("queue", name);
        let url = format!("{}/{}/{}", self.base_url, self.account_id, label);
        let arn = format!("arn:cmb:cqs:{}:{}:{}", self.region, self.account_id, label);
        (url, arn)
    }
}

/// Subscription ARNs extend their topic's ARN, so the owning topic can be
/// recovered without an index.
pub fn subscription_arn(topic_arn: &str) -> String {
    format!("{}:{}", topic_arn, Uuid::new_v4())
}

pub fn topic_arn_of_subscription(subscription_arn: &str) -> Option<&str> {
    subscription_arn
        .rsplit_once(':')
        .map(|(topic, _)| topic)
        .filter(|topic| topic.starts_with("arn:cmb:cns:"))
}

pub fn message_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn receipt_handle() -> String {
    Uuid::new_v4().simple().to_string()
}
