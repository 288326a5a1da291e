//! In-memory topic and queue broker.
//!
//! State is partitioned into [`Namespace`]s, one per access key. Protocol
//! adapters resolve the caller's namespace with [`Broker::namespace`] and
//! drive everything else through it.

pub mod attributes;
pub mod delivery;
pub mod error;
pub mod filter;
pub mod ids;
pub mod namespace;
pub mod queue;
pub mod topic;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

pub use attributes::{AttributeValue, MessageAttribute, MessageAttributes};
pub use delivery::{DeliveryFailure, PublishOutcome, PublishRequest};
pub use error::{BrokerError, ResourceKind, Result};
pub use namespace::{Namespace, NamespaceConfig, ReceiveOptions, SubscriptionSummary, TopicSummary};
pub use queue::{ReceivedMessage, SentMessage};

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub region: String,
    pub account_id: String,
    /// Access key that maps onto `account_id`. Other keys get an account id
    /// derived from the key itself.
    pub access_key: String,
    pub cns_base_url: String,
    pub cqs_base_url: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        BrokerConfig {
            region: "csv".into(),
            account_id: "000000000000".into(),
            access_key: "test".into(),
            cns_base_url: "http://localhost:6061".into(),
            cqs_base_url: "http://localhost:6059".into(),
        }
    }
}

pub struct Broker {
    config: BrokerConfig,
    namespaces: RwLock<HashMap<String, Arc<Namespace>>>,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Self {
        Broker {
            config,
            namespaces: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Twelve decimal digits taken from the key's digest, stable across
    /// restarts.
    fn account_for(&self, access_key: &str) -> String {
        if access_key == self.config.access_key {
            return self.config.account_id.clone();
        }
        let digest = attributes::md5_hex(access_key.as_bytes());
        let n = u64::from_str_radix(&digest[..12], 16).unwrap_or_default();
        format!("{:012}", n % 1_000_000_000_000)
    }

    /// Returns the namespace owned by `access_key`, creating it on first use.
    /// An empty key selects the configured default namespace.
    pub async fn namespace(&self, access_key: &str) -> Arc<Namespace> {
        let key = if access_key.is_empty() {
            self.config.access_key.as_str()
        } else {
            access_key
        };
        if let Some(ns) = self.namespaces.read().await.get(key) {
            return ns.clone();
        }

        let mut namespaces = self.namespaces.write().await;
        namespaces
            .entry(key.to_string())
            .or_insert_with(|| {
                let account_id = self.account_for(key);
                tracing::info!(access_key = key, account_id = %account_id, "created namespace");
                Arc::new(Namespace::new(NamespaceConfig {
                    access_key: key.to_string(),
                    account_id,
                    region: self.config.region.clone(),
                    cns_base_url: self.config.cns_base_url.clone(),
                    cqs_base_url: self.config.cqs_base_url.clone(),
                }))
            })
            .clone()
    }
}
