//! Local CNS/CQS broker: SNS-style topics fanning out into SQS-style queues,
//! held entirely in memory.

pub mod broker;
pub mod cns;
pub mod config;
pub mod cqs;
pub mod credentials;
pub mod observability;
