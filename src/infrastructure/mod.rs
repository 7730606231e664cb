//! Infrastructure Layer
//!
//! Outbound adapters: the HTTP implementation of the broker client seam.

pub mod http_broker_client;
