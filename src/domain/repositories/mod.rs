pub mod broker_client;
pub mod store;
