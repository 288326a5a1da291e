//! SQS JSON-protocol adapter: `X-Amz-Target: AmazonSQS.<Action>` requests
//! with JSON bodies.

pub mod error;
pub mod server;
pub mod types;

pub use server::create_router;
