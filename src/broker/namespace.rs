use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Notify, RwLock};

use super::attributes::{validate_attributes, MessageAttributes};
use super::delivery::{build_copy, DeliveryFailure, Publication, PublishOutcome, PublishRequest};
use super::error::{BrokerError, ResourceKind, Result};
use super::ids::{self, IdGenerator};
use super::queue::{
    now_secs, Queue, QueueAttributes, ReceivedMessage, SentMessage, MAX_RECEIVE_BATCH,
    MAX_WAIT_TIME_SECONDS,
};
use super::topic::{Protocol, Subscription, SubscriptionAttributes, Topic, TopicAttributes};

const MAX_TOPIC_NAME_LEN: usize = 256;
const MAX_QUEUE_NAME_LEN: usize = 80;

fn validate_name(kind: &str, name: &str, max_len: usize) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= max_len
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(BrokerError::invalid(format!(
            "{kind} name must be 1-{max_len} alphanumeric characters, hyphens or underscores: {name:?}"
        )));
    }
    Ok(())
}

/// Identity and addressing of one namespace.
#[derive(Debug, Clone)]
pub struct NamespaceConfig {
    /// Access key that owns this namespace.
    pub access_key: String,
    pub account_id: String,
    pub region: String,
    pub cns_base_url: String,
    pub cqs_base_url: String,
}

struct TopicEntry {
    name: String,
    arn: String,
    created_at: u64,
    state: Mutex<Topic>,
}

struct QueueEntry {
    name: String,
    url: String,
    arn: String,
    queue: Mutex<Queue>,
    notify: Notify,
}

#[derive(Default)]
struct TopicIndex {
    by_arn: HashMap<String, Arc<TopicEntry>>,
    by_name: HashMap<String, String>,
}

#[derive(Default)]
struct QueueIndex {
    by_url: HashMap<String, Arc<QueueEntry>>,
    by_name: HashMap<String, String>,
    by_arn: HashMap<String, String>,
}

impl QueueIndex {
    fn find_by_arn(&self, arn: &str) -> Option<&Arc<QueueEntry>> {
        self.by_arn.get(arn).and_then(|url| self.by_url.get(url))
    }

    /// Matches the exact url first, then `<account>/<name>` so that clients
    /// addressing the broker through another host name still resolve.
    fn find_by_url(&self, url: &str) -> Option<&Arc<QueueEntry>> {
        if let Some(entry) = self.by_url.get(url) {
            return Some(entry);
        }
        let mut segments = url.trim_end_matches('/').rsplit('/');
        let label = segments.next()?;
        let account = segments.next()?;
        let suffix = format!("/{account}/{label}");
        self.by_url.values().find(|e| e.url.ends_with(&suffix))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSummary {
    pub arn: String,
    pub name: String,
    pub created_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSummary {
    pub arn: String,
    pub topic_arn: String,
    pub protocol: String,
    pub endpoint: String,
    pub owner: String,
}

impl From<&Subscription> for SubscriptionSummary {
    fn from(sub: &Subscription) -> Self {
        SubscriptionSummary {
            arn: sub.arn.clone(),
            topic_arn: sub.topic_arn.clone(),
            protocol: sub.protocol.as_str().to_string(),
            endpoint: sub.endpoint.clone(),
            owner: sub.owner.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReceiveOptions {
    /// Clamped to 1..=10; defaults to 1.
    pub max_messages: Option<usize>,
    /// Defaults to the queue's ReceiveMessageWaitTimeSeconds.
    pub wait_time_seconds: Option<u32>,
    pub visibility_timeout: Option<u32>,
    pub attribute_names: Vec<String>,
    pub message_attribute_names: Vec<String>,
}

/// All topics, queues and subscriptions owned by one access key.
pub struct Namespace {
    config: NamespaceConfig,
    topics: RwLock<TopicIndex>,
    queues: RwLock<QueueIndex>,
    ids: Mutex<IdGenerator>,
}

impl Namespace {
    pub fn new(config: NamespaceConfig) -> Self {
        let ids = IdGenerator::new(
            config.region.clone(),
            config.account_id.clone(),
            config.cqs_base_url.clone(),
        );
        Namespace {
            config,
            topics: RwLock::new(TopicIndex::default()),
            queues: RwLock::new(QueueIndex::default()),
            ids: Mutex::new(ids),
        }
    }

    pub fn account_id(&self) -> &str {
        &self.config.account_id
    }

    async fn topic_entry(&self, arn: &str) -> Result<Arc<TopicEntry>> {
        self.topics
            .read()
            .await
            .by_arn
            .get(arn)
            .cloned()
            .ok_or_else(|| BrokerError::not_found(ResourceKind::Topic, arn))
    }

    async fn queue_entry(&self, url: &str) -> Result<Arc<QueueEntry>> {
        self.queues
            .read()
            .await
            .find_by_url(url)
            .cloned()
            .ok_or_else(|| BrokerError::not_found(ResourceKind::Queue, url))
    }

    // --- Topic operations ---

    pub async fn create_topic(&self, name: &str) -> Result<String> {
        self.create_topic_with_attributes(name, &HashMap::new()).await
    }

    /// Creates the topic with `attributes` applied. Every attribute is
    /// validated before anything is registered; on an existing topic the
    /// attributes are applied to it.
    pub async fn create_topic_with_attributes(
        &self,
        name: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<String> {
        validate_name("Topic", name, MAX_TOPIC_NAME_LEN)?;
        let mut requested = TopicAttributes::default();
        for (key, value) in attributes {
            requested.set(key, value.clone())?;
        }

        let mut topics = self.topics.write().await;
        if let Some(entry) = topics
            .by_name
            .get(name)
            .and_then(|arn| topics.by_arn.get(arn))
        {
            let mut topic = entry.state.lock().await;
            for (key, value) in attributes {
                topic.attributes.set(key, value.clone())?;
            }
            return Ok(entry.arn.clone());
        }

        let arn = self.ids.lock().await.topic_arn(name);
        let mut topic = Topic::new(arn.clone(), self.config.account_id.clone());
        topic.attributes = requested;
        let entry = Arc::new(TopicEntry {
            name: name.to_string(),
            arn: arn.clone(),
            created_at: now_secs(),
            state: Mutex::new(topic),
        });
        topics.by_name.insert(name.to_string(), arn.clone());
        topics.by_arn.insert(arn.clone(), entry);
        tracing::info!(topic_arn = %arn, "created topic");
        Ok(arn)
    }

    /// Removes the topic together with its subscriptions. Subscribed queues
    /// are left alone.
    pub async fn delete_topic(&self, arn: &str) -> Result<()> {
        let entry = {
            let mut topics = self.topics.write().await;
            let entry = topics
                .by_arn
                .remove(arn)
                .ok_or_else(|| BrokerError::not_found(ResourceKind::Topic, arn))?;
            topics.by_name.remove(&entry.name);
            entry
        };
        let removed = {
            let mut topic = entry.state.lock().await;
            let n = topic.subscriptions.len();
            topic.subscriptions.clear();
            n
        };
        tracing::info!(topic_arn = %arn, subscriptions = removed, "deleted topic");
        Ok(())
    }

    pub async fn list_topics(&self) -> Vec<TopicSummary> {
        let topics = self.topics.read().await;
        let mut out: Vec<TopicSummary> = topics
            .by_arn
            .values()
            .map(|e| TopicSummary {
                arn: e.arn.clone(),
                name: e.name.clone(),
                created_at: e.created_at,
            })
            .collect();
        out.sort_by(|a, b| a.arn.cmp(&b.arn));
        out
    }

    pub async fn get_topic_attributes(&self, arn: &str) -> Result<HashMap<String, String>> {
        let entry = self.topic_entry(arn).await?;
        let topic = entry.state.lock().await;
        Ok(topic.attribute_map())
    }

    pub async fn set_topic_attributes(&self, arn: &str, name: &str, value: String) -> Result<()> {
        let entry = self.topic_entry(arn).await?;
        let mut topic = entry.state.lock().await;
        topic.attributes.set(name, value)
    }

    // --- Queue operations ---

    pub async fn create_queue(
        &self,
        name: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<String> {
        validate_name("Queue", name, MAX_QUEUE_NAME_LEN)?;
        let mut requested = QueueAttributes::default();
        requested.apply(attributes)?;

        let mut queues = self.queues.write().await;
        if let Some(entry) = queues.by_name.get(name).and_then(|url| queues.by_url.get(url)) {
            let existing = entry.queue.lock().await.attributes.to_map();
            let wanted = requested.to_map();
            let conflict = attributes
                .keys()
                .any(|key| existing.get(key) != wanted.get(key));
            if conflict {
                return Err(BrokerError::AlreadyExists(format!(
                    "A queue named {name} already exists with different attributes"
                )));
            }
            return Ok(entry.url.clone());
        }

        let (url, arn) = self.ids.lock().await.queue_identity(name);
        let entry = Arc::new(QueueEntry {
            name: name.to_string(),
            url: url.clone(),
            arn: arn.clone(),
            queue: Mutex::new(Queue::new(arn.clone(), requested)),
            notify: Notify::new(),
        });
        queues.by_name.insert(name.to_string(), url.clone());
        queues.by_arn.insert(arn, url.clone());
        queues.by_url.insert(url.clone(), entry);
        tracing::info!(queue_url = %url, "created queue");
        Ok(url)
    }

    /// Discards the queue's messages and wakes its long-pollers, which then
    /// observe NotFound.
    pub async fn delete_queue(&self, url: &str) -> Result<()> {
        let entry = {
            let mut queues = self.queues.write().await;
            let entry = queues
                .find_by_url(url)
                .cloned()
                .ok_or_else(|| BrokerError::not_found(ResourceKind::Queue, url))?;
            queues.by_url.remove(&entry.url);
            queues.by_name.remove(&entry.name);
            queues.by_arn.remove(&entry.arn);
            entry
        };
        entry.queue.lock().await.mark_deleted();
        entry.notify.notify_waiters();
        tracing::info!(queue_url = %entry.url, "deleted queue");
        Ok(())
    }

    pub async fn list_queues(&self, prefix: Option<&str>) -> Vec<String> {
        let queues = self.queues.read().await;
        let mut urls: Vec<String> = queues
            .by_url
            .values()
            .filter(|e| prefix.map_or(true, |p| e.name.starts_with(p)))
            .map(|e| e.url.clone())
            .collect();
        urls.sort();
        urls
    }

    pub async fn get_queue_url(&self, name: &str) -> Result<String> {
        self.queues
            .read()
            .await
            .by_name
            .get(name)
            .cloned()
            .ok_or_else(|| BrokerError::not_found(ResourceKind::Queue, name))
    }

    pub async fn get_queue_attributes(
        &self,
        url: &str,
        names: &[String],
    ) -> Result<HashMap<String, String>> {
        let entry = self.queue_entry(url).await?;
        let mut queue = entry.queue.lock().await;
        let now = Instant::now();
        queue.refresh(now);
        Ok(queue.get_attributes(names, now))
    }

    pub async fn set_queue_attributes(
        &self,
        url: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<()> {
        let entry = self.queue_entry(url).await?;
        let mut queue = entry.queue.lock().await;
        queue.set_attributes(attributes)?;
        tracing::debug!(queue_url = %entry.url, "updated queue attributes");
        Ok(())
    }

    pub async fn purge_queue(&self, url: &str) -> Result<()> {
        let entry = self.queue_entry(url).await?;
        entry.queue.lock().await.purge();
        tracing::info!(queue_url = %entry.url, "purged queue");
        Ok(())
    }

    // --- Subscriptions ---

    pub async fn subscribe(
        &self,
        topic_arn: &str,
        protocol: &str,
        endpoint: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<String> {
        let protocol = Protocol::parse(protocol)?;
        let mut sub_attrs = SubscriptionAttributes::default();
        for (name, value) in attributes {
            sub_attrs.set(name, value)?;
        }

        let topic_entry = self.topic_entry(topic_arn).await?;
        let queue_arn = {
            let queues = self.queues.read().await;
            queues
                .find_by_arn(endpoint)
                .or_else(|| queues.find_by_url(endpoint))
                .map(|e| e.arn.clone())
                .ok_or_else(|| BrokerError::not_found(ResourceKind::Queue, endpoint))?
        };

        let mut topic = topic_entry.state.lock().await;
        if let Some(existing) = topic
            .subscriptions
            .values()
            .find(|s| s.queue_arn == queue_arn && s.protocol == protocol)
        {
            let conflict = attributes
                .keys()
                .any(|name| existing.attributes.get(name) != sub_attrs.get(name));
            if conflict {
                return Err(BrokerError::invalid(format!(
                    "Subscription {} already exists with different attributes",
                    existing.arn
                )));
            }
            return Ok(existing.arn.clone());
        }

        let mut sub = Subscription::new(
            topic_arn.to_string(),
            protocol,
            endpoint.to_string(),
            queue_arn,
            self.config.account_id.clone(),
        );
        sub.attributes = sub_attrs;
        let arn = sub.arn.clone();
        topic.subscriptions.insert(arn.clone(), sub);
        tracing::info!(subscription_arn = %arn, endpoint, "subscribed queue to topic");
        Ok(arn)
    }

    async fn owning_topic(&self, subscription_arn: &str) -> Result<Arc<TopicEntry>> {
        let not_found = || BrokerError::not_found(ResourceKind::Subscription, subscription_arn);
        let topic_arn = ids::topic_arn_of_subscription(subscription_arn).ok_or_else(not_found)?;
        self.topics
            .read()
            .await
            .by_arn
            .get(topic_arn)
            .cloned()
            .ok_or_else(not_found)
    }

    pub async fn unsubscribe(&self, subscription_arn: &str) -> Result<()> {
        let entry = self.owning_topic(subscription_arn).await?;
        entry
            .state
            .lock()
            .await
            .remove_subscription(subscription_arn)
            .ok_or_else(|| BrokerError::not_found(ResourceKind::Subscription, subscription_arn))?;
        tracing::info!(subscription_arn, "unsubscribed");
        Ok(())
    }

    pub async fn list_subscriptions(&self) -> Vec<SubscriptionSummary> {
        let entries: Vec<Arc<TopicEntry>> =
            self.topics.read().await.by_arn.values().cloned().collect();
        let mut out = Vec::new();
        for entry in entries {
            let topic = entry.state.lock().await;
            out.extend(topic.subscriptions.values().map(SubscriptionSummary::from));
        }
        out.sort_by(|a, b| a.arn.cmp(&b.arn));
        out
    }

    pub async fn list_subscriptions_by_topic(
        &self,
        topic_arn: &str,
    ) -> Result<Vec<SubscriptionSummary>> {
        let entry = self.topic_entry(topic_arn).await?;
        let topic = entry.state.lock().await;
        Ok(topic
            .subscriptions
            .values()
            .map(SubscriptionSummary::from)
            .collect())
    }

    pub async fn get_subscription_attributes(
        &self,
        subscription_arn: &str,
    ) -> Result<HashMap<String, String>> {
        let entry = self.owning_topic(subscription_arn).await?;
        let topic = entry.state.lock().await;
        topic
            .subscriptions
            .get(subscription_arn)
            .map(Subscription::attribute_map)
            .ok_or_else(|| BrokerError::not_found(ResourceKind::Subscription, subscription_arn))
    }

    pub async fn set_subscription_attributes(
        &self,
        subscription_arn: &str,
        name: &str,
        value: &str,
    ) -> Result<()> {
        let entry = self.owning_topic(subscription_arn).await?;
        let mut topic = entry.state.lock().await;
        let sub = topic
            .subscriptions
            .get_mut(subscription_arn)
            .ok_or_else(|| BrokerError::not_found(ResourceKind::Subscription, subscription_arn))?;
        sub.attributes.set(name, value)
    }

    // --- Publish ---

    /// Copies the message into every subscribed queue whose filter accepts
    /// it. Per-subscription failures are reported in the outcome and do not
    /// fail the publish.
    pub async fn publish(&self, req: PublishRequest) -> Result<PublishOutcome> {
        let entry = self.topic_entry(&req.topic_arn).await?;
        let publication = Publication::prepare(req, ids::message_id())?;
        let subscriptions: Vec<Subscription> = entry
            .state
            .lock()
            .await
            .subscriptions
            .values()
            .cloned()
            .collect();

        let mut outcome = PublishOutcome {
            message_id: publication.message_id.clone(),
            delivered: 0,
            filtered: 0,
            failures: Vec::new(),
        };

        for sub in &subscriptions {
            let copy = match build_copy(
                &publication,
                sub,
                &self.config.cns_base_url,
                &self.config.access_key,
            )? {
                Some(copy) => copy,
                None => {
                    outcome.filtered += 1;
                    continue;
                }
            };
            match self.enqueue(&sub.queue_arn, copy.body, copy.message_attributes).await {
                Ok(sent) => {
                    outcome.delivered += 1;
                    tracing::debug!(
                        subscription_arn = %sub.arn,
                        message_id = %sent.message_id,
                        "delivered notification"
                    );
                }
                Err(error) => {
                    tracing::warn!(
                        subscription_arn = %sub.arn,
                        endpoint = %sub.endpoint,
                        %error,
                        "failed to deliver notification"
                    );
                    outcome.failures.push(DeliveryFailure {
                        subscription_arn: sub.arn.clone(),
                        endpoint: sub.endpoint.clone(),
                        error,
                    });
                }
            }
        }

        tracing::info!(
            topic_arn = %publication.topic_arn,
            message_id = %outcome.message_id,
            delivered = outcome.delivered,
            filtered = outcome.filtered,
            failed = outcome.failures.len(),
            "published message"
        );
        Ok(outcome)
    }

    async fn enqueue(
        &self,
        queue_arn: &str,
        body: String,
        attributes: MessageAttributes,
    ) -> Result<SentMessage> {
        let entry = self
            .queues
            .read()
            .await
            .find_by_arn(queue_arn)
            .cloned()
            .ok_or_else(|| BrokerError::not_found(ResourceKind::Queue, queue_arn))?;
        let sent = {
            let mut queue = entry.queue.lock().await;
            if queue.is_deleted() {
                return Err(BrokerError::not_found(ResourceKind::Queue, queue_arn));
            }
            queue.send_message(body, None, attributes, &self.config.account_id, Instant::now())?
        };
        entry.notify.notify_waiters();
        Ok(sent)
    }

    // --- Messages ---

    pub async fn send_message(
        &self,
        url: &str,
        body: String,
        delay_seconds: Option<u32>,
        attributes: MessageAttributes,
    ) -> Result<SentMessage> {
        validate_attributes(&attributes)?;
        let entry = self.queue_entry(url).await?;
        let sent = {
            let mut queue = entry.queue.lock().await;
            if queue.is_deleted() {
                return Err(BrokerError::not_found(ResourceKind::Queue, url));
            }
            queue.send_message(
                body,
                delay_seconds,
                attributes,
                &self.config.account_id,
                Instant::now(),
            )?
        };
        entry.notify.notify_waiters();
        tracing::debug!(queue_url = %entry.url, message_id = %sent.message_id, "sent message");
        Ok(sent)
    }

    /// Leases up to `max_messages` ready messages. With nothing ready and a
    /// non-zero wait time, suspends until a message arrives, a delayed or
    /// in-flight message becomes visible, or the wait elapses.
    pub async fn receive_messages(
        &self,
        url: &str,
        opts: ReceiveOptions,
    ) -> Result<Vec<ReceivedMessage>> {
        if let Some(wait) = opts.wait_time_seconds {
            if wait > MAX_WAIT_TIME_SECONDS {
                return Err(BrokerError::invalid(format!(
                    "WaitTimeSeconds must be between 0 and {MAX_WAIT_TIME_SECONDS}"
                )));
            }
        }
        let max = opts.max_messages.unwrap_or(1).clamp(1, MAX_RECEIVE_BATCH);
        let entry = self.queue_entry(url).await?;
        let mut deadline: Option<Instant> = None;

        loop {
            // Registered before the queue is inspected so an enqueue between
            // the check and the wait is not missed.
            let notified = entry.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wake_at = {
                let mut queue = entry.queue.lock().await;
                if queue.is_deleted() {
                    return Err(BrokerError::not_found(ResourceKind::Queue, url));
                }
                let now = Instant::now();
                queue.refresh(now);
                let mut received = queue.receive_messages(max, opts.visibility_timeout, now)?;
                let wait = opts
                    .wait_time_seconds
                    .unwrap_or(queue.attributes.receive_message_wait_time_seconds);
                let deadline = *deadline.get_or_insert(now + Duration::from_secs(wait as u64));

                if !received.is_empty() || now >= deadline {
                    for msg in &mut received {
                        msg.retain_attributes(&opts.attribute_names, &opts.message_attribute_names);
                    }
                    if !received.is_empty() {
                        tracing::debug!(queue_url = %entry.url, count = received.len(), "received messages");
                    }
                    return Ok(received);
                }
                queue
                    .next_wakeup(now)
                    .map_or(deadline, |t| t.min(deadline))
            };

            let _ = tokio::time::timeout_at(tokio::time::Instant::from_std(wake_at), notified).await;
        }
    }

    pub async fn delete_message(&self, url: &str, receipt_handle: &str) -> Result<()> {
        let entry = self.queue_entry(url).await?;
        let mut queue = entry.queue.lock().await;
        queue.return_expired_inflight(Instant::now());
        queue.delete_message(receipt_handle)?;
        tracing::debug!(queue_url = %entry.url, "deleted message");
        Ok(())
    }

    pub async fn change_message_visibility(
        &self,
        url: &str,
        receipt_handle: &str,
        timeout: u32,
    ) -> Result<()> {
        let entry = self.queue_entry(url).await?;
        {
            let mut queue = entry.queue.lock().await;
            let now = Instant::now();
            queue.return_expired_inflight(now);
            queue.change_message_visibility(receipt_handle, timeout, now)?;
        }
        if timeout == 0 {
            entry.notify.notify_waiters();
        }
        Ok(())
    }
}
