//! Signal Relay Library
//!
//! Core components of the signal broadcast and execution engine: one
//! operator signal fanned out to every active brokerage account, with
//! token lifecycle management and order status reconciliation.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod persistence;
