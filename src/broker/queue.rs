use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use super::attributes::{md5_hex, md5_of_attributes, MessageAttributes};
use super::error::{BrokerError, ResourceKind, Result};
use super::ids;

pub const MAX_VISIBILITY_TIMEOUT: u32 = 43_200;
pub const MAX_WAIT_TIME_SECONDS: u32 = 20;
pub const MAX_RECEIVE_BATCH: usize = 10;

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

pub(crate) fn now_secs() -> u64 {
    now_millis() / 1000
}

fn parse_bounded(name: &str, value: &str, min: u32, max: u32) -> Result<u32> {
    let v: u32 = value
        .trim()
        .parse()
        .map_err(|_| BrokerError::invalid(format!("Invalid value for {name}: {value}")))?;
    if !(min..=max).contains(&v) {
        return Err(BrokerError::invalid(format!(
            "{name} must be between {min} and {max}"
        )));
    }
    Ok(v)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueAttributes {
    pub visibility_timeout: u32,
    pub message_retention_period: u32,
    pub delay_seconds: u32,
    pub maximum_message_size: u32,
    pub receive_message_wait_time_seconds: u32,
}

impl Default for QueueAttributes {
    fn default() -> Self {
        QueueAttributes {
            visibility_timeout: 30,
            message_retention_period: 345_600,
            delay_seconds: 0,
            maximum_message_size: 262_144,
            receive_message_wait_time_seconds: 0,
        }
    }
}

impl QueueAttributes {
    pub fn to_map(&self) -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("VisibilityTimeout".into(), self.visibility_timeout.to_string());
        m.insert(
            "MessageRetentionPeriod".into(),
            self.message_retention_period.to_string(),
        );
        m.insert("DelaySeconds".into(), self.delay_seconds.to_string());
        m.insert(
            "MaximumMessageSize".into(),
            self.maximum_message_size.to_string(),
        );
        m.insert(
            "ReceiveMessageWaitTimeSeconds".into(),
            self.receive_message_wait_time_seconds.to_string(),
        );
        m
    }

    /// Applies every entry or none of them.
    pub fn apply(&mut self, attrs: &HashMap<String, String>) -> Result<()> {
        let mut next = self.clone();
        for (key, value) in attrs {
            match key.as_str() {
                "VisibilityTimeout" => {
                    next.visibility_timeout =
                        parse_bounded(key, value, 0, MAX_VISIBILITY_TIMEOUT)?;
                }
                "MessageRetentionPeriod" => {
                    next.message_retention_period = parse_bounded(key, value, 60, 1_209_600)?;
                }
                "DelaySeconds" => {
                    next.delay_seconds = parse_bounded(key, value, 0, 900)?;
                }
                "MaximumMessageSize" => {
                    next.maximum_message_size = parse_bounded(key, value, 1024, 262_144)?;
                }
                "ReceiveMessageWaitTimeSeconds" => {
                    next.receive_message_wait_time_seconds =
                        parse_bounded(key, value, 0, MAX_WAIT_TIME_SECONDS)?;
                }
                _ => {
                    return Err(BrokerError::invalid(format!(
                        "Unknown queue attribute: {key}"
                    )));
                }
            }
        }
        *self = next;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub message_id: String,
    pub body: String,
    pub md5_of_body: String,
    pub message_attributes: MessageAttributes,
    pub md5_of_message_attributes: Option<String>,
    pub sent_timestamp: u64,
    pub sent_at: Instant,
    pub visible_at: Instant,
    pub receive_count: u32,
    pub first_receive_timestamp: Option<u64>,
    pub receipt_handle: Option<String>,
    pub visibility_deadline: Option<Instant>,
    pub sender_id: String,
}

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub message_id: String,
    pub md5_of_body: String,
    pub md5_of_message_attributes: Option<String>,
}

/// One delivery attempt handed to a receiver.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub message_id: String,
    pub receipt_handle: String,
    pub body: String,
    pub md5_of_body: String,
    pub md5_of_message_attributes: Option<String>,
    pub attributes: HashMap<String, String>,
    pub message_attributes: MessageAttributes,
    pub receive_count: u32,
}

impl ReceivedMessage {
    /// Narrows system and message attributes to the requested names. `All`
    /// keeps everything, `prefix.*` keeps a message attribute family, and no
    /// names at all keeps nothing.
    pub fn retain_attributes(
        &mut self,
        attribute_names: &[String],
        message_attribute_names: &[String],
    ) {
        let all = |names: &[String]| names.iter().any(|n| n == "All" || n == ".*");
        if !all(attribute_names) {
            self.attributes.retain(|k, _| attribute_names.contains(k));
        }
        if !all(message_attribute_names) {
            self.message_attributes.retain(|k, _| {
                message_attribute_names.iter().any(|n| {
                    n == k
                        || n
                            .strip_suffix(".*")
                            .is_some_and(|prefix| k.starts_with(prefix))
                })
            });
        }
    }
}

/// Message store of a single queue.
///
/// Ready messages stay in arrival order; delayed ones keep their slot and
/// are skipped until `visible_at`. In-flight messages are keyed by their
/// current receipt handle.
#[derive(Debug)]
pub struct Queue {
    pub arn: String,
    pub attributes: QueueAttributes,
    pub created_at: u64,
    pub last_modified: u64,
    messages: VecDeque<Message>,
    inflight: HashMap<String, Message>,
    deleted: bool,
}

impl Queue {
    pub fn new(arn: String, attributes: QueueAttributes) -> Self {
        let now = now_secs();
        Queue {
            arn,
            attributes,
            created_at: now,
            last_modified: now,
            messages: VecDeque::new(),
            inflight: HashMap::new(),
            deleted: false,
        }
    }

    pub fn mark_deleted(&mut self) {
        self.deleted = true;
        self.messages.clear();
        self.inflight.clear();
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn send_message(
        &mut self,
        body: String,
        delay_seconds: Option<u32>,
        message_attributes: MessageAttributes,
        sender_id: &str,
        now: Instant,
    ) -> Result<SentMessage> {
        if body.is_empty() {
            return Err(BrokerError::invalid("Message body must not be empty"));
        }
        if body.len() > self.attributes.maximum_message_size as usize {
            return Err(BrokerError::invalid(format!(
                "Message body must be shorter than {} bytes",
                self.attributes.maximum_message_size
            )));
        }
        let delay = match delay_seconds {
            Some(d) if d > 900 => {
                return Err(BrokerError::invalid("DelaySeconds must be between 0 and 900"))
            }
            Some(d) => d,
            None => self.attributes.delay_seconds,
        };

        let message_id = ids::message_id();
        let md5_of_body = md5_hex(body.as_bytes());
        let md5_of_message_attributes = md5_of_attributes(&message_attributes);

        self.messages.push_back(Message {
            message_id: message_id.clone(),
            body,
            md5_of_body: md5_of_body.clone(),
            message_attributes,
            md5_of_message_attributes: md5_of_message_attributes.clone(),
            sent_timestamp: now_millis(),
            sent_at: now,
            visible_at: now + Duration::from_secs(delay as u64),
            receive_count: 0,
            first_receive_timestamp: None,
            receipt_handle: None,
            visibility_deadline: None,
            sender_id: sender_id.to_string(),
        });

        Ok(SentMessage {
            message_id,
            md5_of_body,
            md5_of_message_attributes,
        })
    }

    /// Moves in-flight messages whose visibility deadline has passed back to
    /// the ready set. Their receipt handles stop being valid. Returns how many
    /// messages were returned.
    pub fn return_expired_inflight(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .inflight
            .iter()
            .filter(|(_, m)| m.visibility_deadline.is_some_and(|d| now >= d))
            .map(|(h, _)| h.clone())
            .collect();

        for handle in &expired {
            if let Some(mut msg) = self.inflight.remove(handle) {
                msg.receipt_handle = None;
                msg.visibility_deadline = None;
                msg.visible_at = now;
                self.messages.push_back(msg);
            }
        }
        expired.len()
    }

    /// Drops messages older than the retention period.
    pub fn discard_expired(&mut self, now: Instant) -> usize {
        let retention = Duration::from_secs(self.attributes.message_retention_period as u64);
        let alive = |m: &Message| now.saturating_duration_since(m.sent_at) < retention;
        let before = self.messages.len() + self.inflight.len();
        self.messages.retain(|m| alive(m));
        self.inflight.retain(|_, m| alive(m));
        before - self.messages.len() - self.inflight.len()
    }

    /// Brings the store up to date with `now`: expired leases come back and
    /// messages past retention go away.
    pub fn refresh(&mut self, now: Instant) {
        self.return_expired_inflight(now);
        self.discard_expired(now);
    }

    pub fn receive_messages(
        &mut self,
        max_count: usize,
        visibility_timeout: Option<u32>,
        now: Instant,
    ) -> Result<Vec<ReceivedMessage>> {
        let vis_timeout = visibility_timeout.unwrap_or(self.attributes.visibility_timeout);
        if vis_timeout > MAX_VISIBILITY_TIMEOUT {
            return Err(BrokerError::invalid(format!(
                "VisibilityTimeout must be between 0 and {MAX_VISIBILITY_TIMEOUT}"
            )));
        }
        let now_ms = now_millis();

        let mut results = Vec::new();
        let mut i = 0;
        while i < self.messages.len() && results.len() < max_count {
            if self.messages[i].visible_at > now {
                i += 1;
                continue;
            }
            let Some(mut msg) = self.messages.remove(i) else {
                break;
            };

            msg.receive_count += 1;
            let first_receive = *msg.first_receive_timestamp.get_or_insert(now_ms);
            let receipt_handle = ids::receipt_handle();
            msg.receipt_handle = Some(receipt_handle.clone());
            msg.visibility_deadline = Some(now + Duration::from_secs(vis_timeout as u64));

            let mut sys_attrs = HashMap::new();
            sys_attrs.insert("SenderId".into(), msg.sender_id.clone());
            sys_attrs.insert("SentTimestamp".into(), msg.sent_timestamp.to_string());
            sys_attrs.insert(
                "ApproximateReceiveCount".into(),
                msg.receive_count.to_string(),
            );
            sys_attrs.insert(
                "ApproximateFirstReceiveTimestamp".into(),
                first_receive.to_string(),
            );

            results.push(ReceivedMessage {
                message_id: msg.message_id.clone(),
                receipt_handle: receipt_handle.clone(),
                body: msg.body.clone(),
                md5_of_body: msg.md5_of_body.clone(),
                md5_of_message_attributes: msg.md5_of_message_attributes.clone(),
                attributes: sys_attrs,
                message_attributes: msg.message_attributes.clone(),
                receive_count: msg.receive_count,
            });
            self.inflight.insert(receipt_handle, msg);
        }

        Ok(results)
    }

    pub fn delete_message(&mut self, receipt_handle: &str) -> Result<()> {
        self.inflight
            .remove(receipt_handle)
            .map(|_| ())
            .ok_or_else(|| BrokerError::not_found(ResourceKind::ReceiptHandle, receipt_handle))
    }

    pub fn change_message_visibility(
        &mut self,
        receipt_handle: &str,
        timeout: u32,
        now: Instant,
    ) -> Result<()> {
        if timeout > MAX_VISIBILITY_TIMEOUT {
            return Err(BrokerError::invalid(format!(
                "VisibilityTimeout must be between 0 and {MAX_VISIBILITY_TIMEOUT}"
            )));
        }
        let msg = self
            .inflight
            .get_mut(receipt_handle)
            .ok_or_else(|| BrokerError::not_found(ResourceKind::ReceiptHandle, receipt_handle))?;
        msg.visibility_deadline = Some(now + Duration::from_secs(timeout as u64));
        if timeout == 0 {
            self.return_expired_inflight(now);
        }
        Ok(())
    }

    pub fn purge(&mut self) {
        self.messages.clear();
        self.inflight.clear();
    }

    /// Earliest future instant at which a delayed message becomes visible or
    /// a lease expires. Long-pollers sleep no longer than this.
    pub fn next_wakeup(&self, now: Instant) -> Option<Instant> {
        let delayed = self
            .messages
            .iter()
            .map(|m| m.visible_at)
            .filter(|t| *t > now);
        let leases = self.inflight.values().filter_map(|m| m.visibility_deadline);
        delayed.chain(leases).min()
    }

    pub fn has_visible(&self, now: Instant) -> bool {
        self.messages.iter().any(|m| m.visible_at <= now)
    }

    pub fn get_attributes(&self, names: &[String], now: Instant) -> HashMap<String, String> {
        let all = names.is_empty() || names.iter().any(|n| n == "All");
        let include = |name: &str| all || names.iter().any(|n| n == name);

        let mut result: HashMap<String, String> = self
            .attributes
            .to_map()
            .into_iter()
            .filter(|(k, _)| include(k))
            .collect();

        if include("QueueArn") {
            result.insert("QueueArn".into(), self.arn.clone());
        }
        if include("CreatedTimestamp") {
            result.insert("CreatedTimestamp".into(), self.created_at.to_string());
        }
        if include("LastModifiedTimestamp") {
            result.insert(
                "LastModifiedTimestamp".into(),
                self.last_modified.to_string(),
            );
        }
        if include("ApproximateNumberOfMessages") {
            let visible = self.messages.iter().filter(|m| m.visible_at <= now).count();
            result.insert("ApproximateNumberOfMessages".into(), visible.to_string());
        }
        if include("ApproximateNumberOfMessagesNotVisible") {
            result.insert(
                "ApproximateNumberOfMessagesNotVisible".into(),
                self.inflight.len().to_string(),
            );
        }
        if include("ApproximateNumberOfMessagesDelayed") {
            let delayed = self.messages.iter().filter(|m| m.visible_at > now).count();
            result.insert(
                "ApproximateNumberOfMessagesDelayed".into(),
                delayed.to_string(),
            );
        }
        result
    }

    pub fn set_attributes(&mut self, attrs: &HashMap<String, String>) -> Result<()> {
        self.attributes.apply(attrs)?;
        self.last_modified = now_secs();
        Ok(())
    }
}
