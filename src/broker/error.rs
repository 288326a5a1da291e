use std::fmt;

/// The kind of entity a [`BrokerError::NotFound`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Topic,
    Queue,
    Subscription,
    ReceiptHandle,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Topic => "topic",
            ResourceKind::Queue => "queue",
            ResourceKind::Subscription => "subscription",
            ResourceKind::ReceiptHandle => "receipt handle",
        };
        f.write_str(name)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("{kind} does not exist: {id}")]
    NotFound { kind: ResourceKind, id: String },
    #[error("{0}")]
    AlreadyExists(String),
    #[error("{0}")]
    InvalidParameter(String),
    #[error("request throttled: {0}")]
    Throttled(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl BrokerError {
    pub fn not_found(kind: ResourceKind, id: impl Into<String>) -> Self {
        BrokerError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        BrokerError::InvalidParameter(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, BrokerError>;
