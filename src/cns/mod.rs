//! SNS query-protocol adapter: form-encoded `Action=...` requests, XML
//! responses.

pub mod error;
pub mod server;

pub use server::create_router;
